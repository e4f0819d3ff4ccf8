mod cascade;
mod conflict;
mod error;
mod graph;
mod mutations;
mod queries;
mod tables;
mod txn;

pub use cascade::CascadeTarget;
pub use conflict::overlapping;
pub use error::EngineError;
pub use queries::haversine_meters;
pub use tables::{Record, Tables};
pub use txn::{LockKey, LockPlan, Transaction};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::info;

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: WalRecord,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<WalRecord>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    Shutdown {
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch; on error, truncate back to the
///    last synced length.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let cmd = match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut pending = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }
                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                if result.is_err() {
                    wal.discard_unsynced();
                }
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);
                match pending {
                    Some(cmd) => cmd,
                    None => continue,
                }
            }
            other => other,
        };
        if !handle_non_append(&mut wal, cmd) {
            break;
        }
    }
    tracing::debug!("wal writer stopped: {}", wal.path().display());
}

/// Buffer and fsync the whole batch. On failure the caller discards every
/// byte written since the last sync, so a rejected record never replays.
fn flush_batch(wal: &mut Wal, batch: &[(WalRecord, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (record, _) in batch {
        wal.append_buffered(record)?;
    }
    wal.flush_sync()
}

fn respond_batch(batch: Vec<(WalRecord, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Returns false once the writer should stop.
fn handle_non_append(wal: &mut Wal, cmd: WalCommand) -> bool {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
            true
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
            true
        }
        WalCommand::Shutdown { response } => {
            let _ = response.send(wal.flush_sync());
            false
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Write a committed transaction to the WAL via the group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, record: WalRecord) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { record, response: tx })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// Drop a keyed lock entry once nobody holds or waits on it.
fn prune_lock(locks: &LockTable, key: &LockKey) {
    locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on how long a transaction waits for its locks.
    pub lock_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}

type LockTable = DashMap<LockKey, Arc<Mutex<()>>>;

/// The transactional record store plus the booking and cascade logic built on it.
pub struct Engine {
    /// Shared with in-flight commits, which apply after the caller may be gone.
    tables: Arc<RwLock<Tables>>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by ordinary transactions, taken exclusively by cascades and compaction.
    catalog: Arc<RwLock<()>>,
    /// Keyed row locks, created on demand and pruned when released.
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

impl Engine {
    pub fn new(wal_path: PathBuf, options: EngineOptions) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let mut tables = Tables::default();
        for record in &records {
            for event in &record.events {
                tables.apply(event);
            }
        }
        info!("replayed {} transactions from {}", records.len(), wal_path.display());

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            tables: Arc::new(RwLock::new(tables)),
            wal_tx,
            catalog: Arc::new(RwLock::new(())),
            locks: Arc::new(DashMap::new()),
            lock_timeout: options.lock_timeout,
        })
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Flush and stop the WAL writer. Later commits fail with `WalError`.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Shutdown { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    fn prune_lock(&self, key: &LockKey) {
        prune_lock(&self.locks, key);
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.len()
    }
}
