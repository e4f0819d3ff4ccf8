use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use campusbook::engine::{CascadeTarget, Engine, EngineError, EngineOptions};
use campusbook::model::*;

const HOUR: i64 = 3_600_000; // 1 hour in ms
/// 2026-01-01T00:00:00Z
const BASE: i64 = 1_767_225_600_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn open_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("campusbook_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}.wal"));
    let _ = std::fs::remove_file(&path);
    Arc::new(Engine::new(path, EngineOptions::default()).unwrap())
}

/// One campus with `buildings` buildings of `rooms_per_building` rooms each.
async fn setup(engine: &Engine, buildings: usize, rooms_per_building: usize) -> Vec<String> {
    engine
        .upsert_campus(Campus {
            name: "Bench".into(),
            city: "Toulouse".into(),
            university: None,
        })
        .await
        .unwrap();
    let mut rooms = Vec::new();
    for b in 0..buildings {
        let code = format!("B{b}");
        engine
            .upsert_building(Building {
                code: code.clone(),
                built: 1980,
                latitude: None,
                longitude: None,
                campus: Some("Bench".into()),
            })
            .await
            .unwrap();
        for r in 0..rooms_per_building {
            let number = format!("{code}-{r}");
            engine
                .upsert_room(Room {
                    number: number.clone(),
                    capacity: 30,
                    kind: RoomKind::Tutorial,
                    accessible: true,
                    floor: 0,
                    building: Some(code.clone()),
                })
                .await
                .unwrap();
            rooms.push(number);
        }
    }
    rooms
}

async fn new_teacher(engine: &Engine) -> TeacherId {
    let id = Ulid::new();
    engine
        .upsert_teacher(Teacher {
            id,
            full_name: format!("teacher {id}"),
        })
        .await
        .unwrap();
    id
}

async fn phase1_sequential() {
    let engine = open_engine("phase1");
    let rooms = setup(&engine, 1, 1).await;
    let teacher = new_teacher(&engine).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = BASE + (i as i64) * HOUR;
        let t = Instant::now();
        engine
            .check_and_reserve(&rooms[0], teacher, s, s + HOUR, &format!("S{i}"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve latency", &mut latencies);
}

async fn phase2_concurrent() {
    let engine = open_engine("phase2");
    let rooms = setup(&engine, 2, 5).await;
    let n_tasks = rooms.len();
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for room in rooms {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let teacher = new_teacher(&engine).await;
            for j in 0..n_per_task {
                let s = BASE + (j as i64) * HOUR;
                engine
                    .check_and_reserve(&room, teacher, s, s + HOUR, &room)
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_slot() {
    let engine = open_engine("phase3");
    let rooms = setup(&engine, 1, 1).await;
    let room = rooms[0].clone();
    let n_tasks = 50;
    let n_slots = 100;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let room = room.clone();
        handles.push(tokio::spawn(async move {
            let teacher = new_teacher(&engine).await;
            let (mut won, mut lost, mut busy) = (0usize, 0usize, 0usize);
            for slot in 0..n_slots {
                let s = BASE + (slot as i64) * HOUR;
                match engine.check_and_reserve(&room, teacher, s, s + HOUR, "Algebra").await {
                    Ok(_) => won += 1,
                    Err(EngineError::RoomConflict(_)) => lost += 1,
                    Err(EngineError::Busy) => busy += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            (won, lost, busy)
        }));
    }

    let (mut won, mut lost, mut busy) = (0, 0, 0);
    for h in handles {
        let (w, l, b) = h.await.unwrap();
        won += w;
        lost += l;
        busy += b;
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks racing for {n_slots} slots: {won} accepted, {lost} conflicts, {busy} busy in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots, "every slot must be booked exactly once");
}

async fn phase4_cascade_under_load() {
    let engine = open_engine("phase4");
    let rooms = setup(&engine, 20, 10).await;
    let teacher = new_teacher(&engine).await;
    for (i, room) in rooms.iter().enumerate() {
        for j in 0..20 {
            let s = BASE + (j as i64) * HOUR;
            engine
                .check_and_reserve(room, teacher, s, s + HOUR, &format!("S{i}-{j}"))
                .await
                .unwrap();
        }
    }

    // Readers keep querying while buildings are deleted one by one.
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut reader_handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let stop = stop.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let t = Instant::now();
                let _ = engine.campus_capacity("Bench").await;
                latencies.push(t.elapsed());
                tokio::task::yield_now().await;
            }
            latencies
        }));
    }

    let mut cascade_latencies = Vec::new();
    let mut removed = 0;
    for b in 0..20 {
        let t = Instant::now();
        let summary = engine
            .delete(CascadeTarget::Building(format!("B{b}")))
            .await
            .unwrap();
        cascade_latencies.push(t.elapsed());
        removed += summary.rooms + summary.bookings;
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    let mut read_latencies = Vec::new();
    for h in reader_handles {
        read_latencies.extend(h.await.unwrap());
    }

    println!("  removed {removed} rooms + bookings across 20 buildings");
    print_latency("cascade delete", &mut cascade_latencies);
    print_latency("capacity query", &mut read_latencies);
}

#[tokio::main]
async fn main() {
    println!("=== campusbook stress benchmark ===\n");

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent reservations, one room per task");
    phase2_concurrent().await;

    println!("\n[phase 3] contended slots");
    phase3_contended_slot().await;

    println!("\n[phase 4] cascading deletes with concurrent readers");
    phase4_cascade_under_load().await;

    println!("\n=== done ===");
}
