use std::net::SocketAddr;

// ── Booking & cascade outcomes ──────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (accepted, room_conflict, subject_conflict).
pub const RESERVATIONS_TOTAL: &str = "campusbook_reservations_total";

/// Counter: committed cascading deletes. Labels: target (university, campus, building, room).
pub const CASCADE_DELETES_TOTAL: &str = "campusbook_cascade_deletes_total";

/// Counter: records removed by cascades, targets included.
pub const CASCADE_RECORDS_REMOVED_TOTAL: &str = "campusbook_cascade_records_removed_total";

// ── Transactions ────────────────────────────────────────────────

/// Histogram: time spent acquiring a transaction's locks, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "campusbook_lock_wait_seconds";

/// Counter: transactions that gave up waiting for a lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "campusbook_lock_timeouts_total";

/// Histogram: commit latency (WAL append + apply) in seconds.
pub const COMMIT_DURATION_SECONDS: &str = "campusbook_commit_duration_seconds";

/// Counter: events written by committed transactions.
pub const EVENTS_COMMITTED_TOTAL: &str = "campusbook_events_committed_total";

/// Counter: transactions dropped with staged writes.
pub const ROLLBACKS_TOTAL: &str = "campusbook_rollbacks_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "campusbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "campusbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "campusbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
