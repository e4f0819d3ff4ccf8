use std::collections::BTreeMap;

use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tokio::time::{timeout_at, Instant};

use crate::model::*;
use crate::observability::{
    COMMIT_DURATION_SECONDS, EVENTS_COMMITTED_TOTAL, LOCK_TIMEOUTS_TOTAL, LOCK_WAIT_SECONDS,
    ROLLBACKS_TOTAL,
};

use super::conflict::now_ms;
use super::tables::Record;
use super::{prune_lock, wal_append, Engine, EngineError};

/// Row-level lock. Ordered so a plan's keys can be taken in a global order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Entity(EntityKey),
    /// Serializes bookings of one teacher for one subject across rooms.
    Subject(TeacherId, String),
}

/// What a transaction must hold before it may read-then-write.
#[derive(Debug, Clone, Default)]
pub struct LockPlan {
    exclusive: bool,
    keys: Vec<LockKey>,
}

impl LockPlan {
    /// Catalog shared: concurrent with everything except exclusive plans.
    pub fn shared() -> Self {
        Self::default()
    }

    /// Catalog exclusive: no other transaction runs concurrently.
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            keys: Vec::new(),
        }
    }

    pub fn lock(mut self, key: LockKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn entity(self, key: EntityKey) -> Self {
        self.lock(LockKey::Entity(key))
    }
}

enum CatalogGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Scoped unit of work. Reads see this transaction's own staged writes;
/// nothing reaches the tables or the WAL until `commit`. Dropping the handle
/// without committing rolls back and releases every lock.
pub struct Transaction<'a> {
    engine: &'a Engine,
    staged: Vec<Event>,
    /// Position in `staged` of the latest write to each key.
    latest: BTreeMap<EntityKey, usize>,
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
    catalog: Option<CatalogGuard>,
}

impl Engine {
    /// Open a transaction, acquiring the catalog lock then each keyed lock in
    /// sorted order. All waits share one deadline; missing it yields `Busy`.
    pub async fn begin(&self, plan: LockPlan) -> Result<Transaction<'_>, EngineError> {
        let wait_start = std::time::Instant::now();
        let deadline = Instant::now() + self.lock_timeout;

        let catalog = if plan.exclusive {
            let guard = timeout_at(deadline, self.catalog.clone().write_owned())
                .await
                .map_err(|_| lock_timeout("catalog (exclusive)"))?;
            CatalogGuard::Exclusive(guard)
        } else {
            let guard = timeout_at(deadline, self.catalog.clone().read_owned())
                .await
                .map_err(|_| lock_timeout("catalog (shared)"))?;
            CatalogGuard::Shared(guard)
        };

        let mut txn = Transaction {
            engine: self,
            staged: Vec::new(),
            latest: BTreeMap::new(),
            held: Vec::with_capacity(plan.keys.len()),
            catalog: Some(catalog),
        };

        let mut keys = plan.keys;
        keys.sort();
        keys.dedup();
        for key in keys {
            let lock = self.locks.entry(key.clone()).or_default().clone();
            match timeout_at(deadline, lock.lock_owned()).await {
                Ok(guard) => txn.held.push((key, guard)),
                Err(_) => {
                    self.prune_lock(&key);
                    return Err(lock_timeout(&format!("{key:?}")));
                }
            }
        }

        metrics::histogram!(LOCK_WAIT_SECONDS).record(wait_start.elapsed().as_secs_f64());
        Ok(txn)
    }
}

fn lock_timeout(what: &str) -> EngineError {
    tracing::warn!("lock timeout waiting for {what}");
    metrics::counter!(LOCK_TIMEOUTS_TOTAL).increment(1);
    EngineError::Busy
}

impl Transaction<'_> {
    /// Staged state of `key`: `Some(None)` if removed here, `None` if untouched.
    fn staged<T: Record>(&self, key: &T::Key) -> Option<Option<&T>> {
        let position = *self.latest.get(&T::entity_key(key.clone()))?;
        Some(staged_record(&self.staged[position]))
    }

    /// Final staged state of every `T` touched by this transaction (`None` = removed).
    fn staged_view<T: Record>(&self) -> BTreeMap<&T::Key, Option<&T>> {
        self.latest
            .iter()
            .filter_map(|(key, &position)| {
                let key = T::key_from(key)?;
                Some((key, staged_record(&self.staged[position])))
            })
            .collect()
    }

    pub async fn get<T: Record>(&self, key: &T::Key) -> Option<T> {
        if let Some(staged) = self.staged::<T>(key) {
            return staged.cloned();
        }
        let tables = self.engine.tables.read().await;
        T::table(&tables).get(key).cloned()
    }

    /// `get`, or `NotFound` naming the missing key.
    pub async fn require<T: Record>(&self, key: &T::Key) -> Result<T, EngineError> {
        self.get(key)
            .await
            .ok_or_else(|| EngineError::NotFound(T::entity_key(key.clone())))
    }

    /// Scan every `T` matching `predicate`.
    pub async fn find_by<T: Record>(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        let staged = self.staged_view::<T>();
        let mut found: Vec<T> = {
            let tables = self.engine.tables.read().await;
            T::table(&tables)
                .iter()
                .filter(|&(key, record)| !staged.contains_key(key) && predicate(record))
                .map(|(_, record)| record.clone())
                .collect()
        };
        found.extend(
            staged
                .into_values()
                .flatten()
                .filter(|record| predicate(record))
                .cloned(),
        );
        found
    }

    fn stage(&mut self, event: Event) {
        let key = match &event {
            Event::Put(entity) => entity.key(),
            Event::Remove(key) => key.clone(),
        };
        self.latest.insert(key, self.staged.len());
        self.staged.push(event);
    }

    pub fn upsert<T: Record>(&mut self, record: T) {
        self.stage(Event::Put(record.into_entity()));
    }

    pub fn delete<T: Record>(&mut self, key: T::Key) {
        self.stage(Event::Remove(T::entity_key(key)));
    }

    pub fn delete_batch<T: Record>(&mut self, keys: impl IntoIterator<Item = T::Key>) -> usize {
        let before = self.staged.len();
        for key in keys {
            self.delete::<T>(key);
        }
        self.staged.len() - before
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Persist all staged writes as one WAL record, then apply them while the
    /// locks are still held. Returns the number of writes.
    ///
    /// Append and apply run on a spawned task that owns the locks, so a
    /// caller dropped mid-commit cannot leave a logged record unapplied.
    pub async fn commit(mut self) -> Result<usize, EngineError> {
        if self.staged.is_empty() {
            return Ok(0);
        }
        let start = std::time::Instant::now();
        self.latest.clear();
        let record = WalRecord {
            committed_at: now_ms(),
            events: std::mem::take(&mut self.staged),
        };
        let count = record.events.len();

        let catalog = self.catalog.take();
        let held = std::mem::take(&mut self.held);
        let wal_tx = self.engine.wal_tx.clone();
        let tables = self.engine.tables.clone();
        let locks = self.engine.locks.clone();
        let task = tokio::spawn(async move {
            let events = record.events.clone();
            let result = wal_append(&wal_tx, record).await;
            if result.is_ok() {
                let mut tables = tables.write().await;
                for event in &events {
                    tables.apply(event);
                }
            }
            drop(catalog);
            for (key, guard) in held {
                drop(guard);
                prune_lock(&locks, &key);
            }
            result
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::WalError(format!("commit task failed: {e}"))),
        };
        if let Err(e) = result {
            tracing::debug!("rolled back {count} staged writes: {e}");
            metrics::counter!(ROLLBACKS_TOTAL).increment(1);
            return Err(e);
        }
        metrics::counter!(EVENTS_COMMITTED_TOTAL).increment(count as u64);
        metrics::histogram!(COMMIT_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        Ok(count)
    }

    pub fn rollback(self) {}
}

fn staged_record<T: Record>(event: &Event) -> Option<&T> {
    match event {
        Event::Put(entity) => T::from_entity(entity),
        Event::Remove(_) => None,
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            tracing::debug!("rolled back {} staged writes", self.staged.len());
            metrics::counter!(ROLLBACKS_TOTAL).increment(1);
        }
        for (key, guard) in self.held.drain(..) {
            drop(guard);
            self.engine.prune_lock(&key);
        }
    }
}
