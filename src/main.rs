use std::sync::Arc;

use tracing::info;

use campusbook::compactor;
use campusbook::config::Config;
use campusbook::engine::{CascadeTarget, Engine};
use campusbook::model::CatalogSnapshot;

const USAGE: &str = "usage: campusbook <command>

commands:
  stats                     record counts per kind
  import <file.json>        load a catalog snapshot
  export                    print the catalog as JSON
  delete <kind> <key>       cascading delete (university, campus, building, room)
                            or department removal (department)
  compact                   rewrite the WAL as one snapshot
  serve                     run the compactor until ctrl-c/SIGTERM";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = Config::from_env();
    campusbook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), config.engine_options())?);
    info!("data_dir: {}", config.data_dir.display());

    let result = run(command, &args[1..], &engine, &config).await;
    engine.shutdown().await?;
    result
}

async fn run(
    command: &str,
    args: &[String],
    engine: &Arc<Engine>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match (command, args) {
        ("stats", []) => {
            println!("{}", serde_json::to_string_pretty(&engine.stats().await)?);
        }
        ("import", [file]) => {
            let snapshot: CatalogSnapshot = serde_json::from_reader(std::fs::File::open(file)?)?;
            let stats = engine.import_catalog(snapshot).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        ("export", []) => {
            println!("{}", serde_json::to_string_pretty(&engine.catalog_snapshot().await)?);
        }
        ("delete", [kind, key]) if kind == "department" => {
            let department = engine.delete_department(key).await?;
            println!("deleted department {}", department.acronym);
        }
        ("delete", [kind, key]) => {
            let target: CascadeTarget = format!("{kind}:{key}").parse()?;
            let summary = engine.delete(target).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        ("compact", []) => {
            engine.compact_wal().await?;
            println!("compacted {}", config.wal_path().display());
        }
        ("serve", []) => serve(engine.clone(), config).await?,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}

async fn serve(engine: Arc<Engine>, config: &Config) -> std::io::Result<()> {
    info!("campusbook serving");
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(compactor::run_compactor(
        engine,
        config.compact_threshold,
        config.compact_interval,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("shutdown signal received, stopping compactor");
    compactor.abort();
    let _ = compactor.await;
    info!("campusbook stopped");
    Ok(())
}
