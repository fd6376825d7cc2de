//! A single named database: engine, durability, TTL, background workers
//!
//! One reader-writer lock guards the storage engine together with the WAL
//! handle, so WAL append order is the total write order. The expiry
//! manager keeps its own mutex; scheduling a TTL never blocks writers.
//!
//! Two workers run per collection: the janitor checkpoints when the WAL
//! outgrows its limit, and the TTL sweeper turns expired candidates into
//! logged deletes. Both park on a condition variable and exit on
//! [`Collection::close`].

use crate::expiry::ExpiryManager;
use crate::index::IndexKind;
use crate::persistence::{PersistenceManager, WalRecord};
use crate::storage::StorageEngine;
use crate::{Document, FluxError, Id, Result, Value};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// WAL size that triggers a janitor checkpoint (10 MiB)
pub const MAX_WAL_SIZE: u64 = 10 * 1024 * 1024;

/// Janitor wakeup interval
const JANITOR_INTERVAL: Duration = Duration::from_secs(5);

/// TTL sweep interval
const TTL_TICK: Duration = Duration::from_millis(100);

struct EngineState {
    storage: StorageEngine,
    persistence: PersistenceManager,
}

struct Shared {
    name: String,
    state: RwLock<EngineState>,
    expiry: ExpiryManager,
    running: AtomicBool,
    shutdown_mutex: Mutex<()>,
    shutdown_cv: Condvar,
}

/// Collection statistics, rendered as JSON by `STATS`
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub database: String,
    pub documents: usize,
    pub next_id: Id,
    pub adaptive_mode: bool,
    pub fields: Vec<String>,
}

/// A named document collection with durable persistence
pub struct Collection {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Collection {
    /// Open a collection, recovering `<dir>/<name>.{wal,flux}` before any
    /// worker starts
    pub fn open(name: &str, storage_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = storage_dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let persistence = PersistenceManager::open(
            dir.join(format!("{name}.wal")),
            dir.join(format!("{name}.flux")),
        )?;
        let mut storage = StorageEngine::new();
        persistence.recover(&mut storage)?;

        let shared = Arc::new(Shared {
            name: name.to_string(),
            state: RwLock::new(EngineState { storage, persistence }),
            expiry: ExpiryManager::new(),
            running: AtomicBool::new(true),
            shutdown_mutex: Mutex::new(()),
            shutdown_cv: Condvar::new(),
        });

        let janitor = spawn_worker(&format!("fluxdb-janitor-{name}"), {
            let shared = shared.clone();
            move || janitor_loop(&shared)
        })?;
        let sweeper = spawn_worker(&format!("fluxdb-ttl-{name}"), {
            let shared = shared.clone();
            move || ttl_loop(&shared)
        })?;

        info!("opened collection '{}'", name);
        Ok(Self {
            shared,
            workers: Mutex::new(vec![janitor, sweeper]),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    // --- CRUD ---

    /// Insert under a freshly allocated id
    pub fn insert(&self, doc: Document) -> Result<Id> {
        let mut state = self.shared.state.write();
        let id = state.storage.next_id();
        state.persistence.append(&WalRecord::upsert(id, &doc)?)?;
        state.storage.insert_with_id(id, doc);
        Ok(id)
    }

    /// Insert under an explicit id, replacing any existing document
    pub fn insert_with_id(&self, id: Id, doc: Document) -> Result<()> {
        let mut state = self.shared.state.write();
        state.persistence.append(&WalRecord::upsert(id, &doc)?)?;
        state.storage.insert_with_id(id, doc);
        Ok(())
    }

    /// Replace an existing document
    pub fn update(&self, id: Id, doc: Document) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.storage.get(id).is_none() {
            return Err(FluxError::NotFound(id));
        }
        state.persistence.append(&WalRecord::upsert(id, &doc)?)?;
        state.storage.update(id, doc)
    }

    /// Remove a document, cancelling any TTL it carried
    pub fn remove(&self, id: Id) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.storage.get(id).is_none() {
            return Err(FluxError::NotFound(id));
        }
        state.persistence.append(&WalRecord::delete(id))?;
        state.storage.remove(id)?;
        self.shared.expiry.remove_ttl(id);
        Ok(())
    }

    /// Fetch a document by id
    pub fn get(&self, id: Id) -> Option<Document> {
        self.shared.state.read().storage.get(id).cloned()
    }

    /// True iff the id exists
    pub fn contains(&self, id: Id) -> bool {
        self.shared.state.read().storage.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.shared.state.read().storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- search & indexing ---

    /// Equality probe through the hash index
    pub fn find(&self, field: &str, value: &Value) -> Vec<Id> {
        self.shared.state.read().storage.find(field, value)
    }

    /// Inclusive range probe through the sorted index
    pub fn find_range(&self, field: &str, lo: &Value, hi: &Value) -> Vec<Id> {
        self.shared.state.read().storage.find_range(field, lo, hi)
    }

    /// Linear scan returning ids whose document satisfies the predicate
    pub fn find_all(&self, predicate: impl Fn(&Document) -> bool) -> Vec<Id> {
        let state = self.shared.state.read();
        state
            .storage
            .iter()
            .filter(|(_, doc)| predicate(doc))
            .map(|(id, _)| id)
            .collect()
    }

    /// Create an index and backfill it
    pub fn create_index(&self, field: &str, kind: IndexKind) {
        self.shared.state.write().storage.create_index(field, kind);
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.shared.state.read().storage.has_index(field)
    }

    /// Count an index miss on a scanned field (adaptive promotion)
    pub fn report_query_miss(&self, field: &str, is_range: bool) {
        self.shared.state.write().storage.report_query_miss(field, is_range);
    }

    pub fn set_adaptive(&self, enabled: bool) {
        self.shared.state.write().storage.set_adaptive(enabled);
    }

    pub fn is_adaptive(&self) -> bool {
        self.shared.state.read().storage.is_adaptive()
    }

    // --- TTL ---

    /// Schedule a document for deletion; tolerant of absent ids
    pub fn expire(&self, id: Id, ttl: Duration) {
        self.shared.expiry.set_ttl(id, ttl);
    }

    // --- maintenance ---

    /// Force a snapshot and truncate the WAL
    pub fn checkpoint(&self) -> Result<()> {
        self.shared.checkpoint()
    }

    /// Wipe the collection and persist the empty state
    pub fn clear(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        state.storage.clear();
        info!("collection '{}' flushed", self.shared.name);
        let EngineState { storage, persistence } = &mut *state;
        persistence.save_snapshot(storage)?;
        persistence.truncate_wal()
    }

    pub fn stats(&self) -> CollectionStats {
        let state = self.shared.state.read();
        CollectionStats {
            database: self.shared.name.clone(),
            documents: state.storage.len(),
            next_id: state.storage.next_id(),
            adaptive_mode: state.storage.is_adaptive(),
            fields: state.storage.sample_fields(),
        }
    }

    /// Stop workers, join them, and release the WAL handle; idempotent
    pub fn close(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let _guard = self.shared.shutdown_mutex.lock();
            self.shared.shutdown_cv.notify_all();
        }
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
        self.shared.state.write().persistence.close();
        info!("closed collection '{}'", self.shared.name);
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn checkpoint(&self) -> Result<()> {
        let mut state = self.state.write();
        let EngineState { storage, persistence } = &mut *state;
        persistence.save_snapshot(storage)?;
        persistence.truncate_wal()
    }

    /// Park on the shutdown condvar; false once close() was requested
    fn park(&self, timeout: Duration) -> bool {
        let mut guard = self.shutdown_mutex.lock();
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let _ = self.shutdown_cv.wait_for(&mut guard, timeout);
        self.running.load(Ordering::SeqCst)
    }
}

fn spawn_worker(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(FluxError::Io)
}

fn janitor_loop(shared: &Shared) {
    while shared.park(JANITOR_INTERVAL) {
        // size check under the shared lock only; checkpoint needs exclusive
        let oversized = {
            let state = shared.state.read();
            state.persistence.wal_size() > MAX_WAL_SIZE
        };
        if !oversized {
            continue;
        }
        debug!("janitor: WAL over limit, checkpointing '{}'", shared.name);
        if let Err(e) = shared.checkpoint() {
            // leave the WAL untruncated and retry on the next tick
            warn!("janitor checkpoint failed for '{}': {}", shared.name, e);
        }
    }
}

fn ttl_loop(shared: &Shared) {
    while shared.park(TTL_TICK) {
        let candidates = shared.expiry.drain_expired(Instant::now());
        if candidates.is_empty() {
            continue;
        }
        let mut state = shared.state.write();
        let EngineState { storage, persistence } = &mut *state;
        for id in candidates {
            // superseded or already deleted ids are skipped silently
            if storage.get(id).is_none() {
                continue;
            }
            if let Err(e) = persistence.append(&WalRecord::delete(id)) {
                warn!("TTL delete of {} not logged: {}", id, e);
                continue;
            }
            let _ = storage.remove(id);
            info!("TTL expired document {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_round_trip_durability() {
        let dir = TempDir::new().unwrap();

        {
            let coll = Collection::open("t", dir.path()).unwrap();
            assert_eq!(coll.insert(doc(&[("n", Value::Int(1))])).unwrap(), 1);
            assert_eq!(coll.insert(doc(&[("n", Value::Int(2))])).unwrap(), 2);
            coll.update(1, doc(&[("n", Value::Int(10))])).unwrap();
            coll.remove(2).unwrap();
            coll.insert_with_id(7, doc(&[("n", Value::Int(7))])).unwrap();
            coll.close();
        }

        let coll = Collection::open("t", dir.path()).unwrap();
        assert_eq!(coll.get(1), Some(doc(&[("n", Value::Int(10))])));
        assert_eq!(coll.get(2), None);
        assert_eq!(coll.get(7), Some(doc(&[("n", Value::Int(7))])));
        // allocator continues past every replayed id
        assert_eq!(coll.insert(doc(&[("n", Value::Int(3))])).unwrap(), 8);
    }

    #[test]
    fn test_checkpoint_truncates_wal() {
        let dir = TempDir::new().unwrap();
        let wal = dir.path().join("t.wal");

        let coll = Collection::open("t", dir.path()).unwrap();
        coll.insert(doc(&[("n", Value::Int(1))])).unwrap();
        assert!(std::fs::metadata(&wal).unwrap().len() > 0);

        coll.checkpoint().unwrap();
        assert_eq!(std::fs::metadata(&wal).unwrap().len(), 0);
        coll.close();

        let coll = Collection::open("t", dir.path()).unwrap();
        assert_eq!(coll.get(1), Some(doc(&[("n", Value::Int(1))])));
        assert_eq!(coll.insert(doc(&[("n", Value::Int(2))])).unwrap(), 2);
    }

    #[test]
    fn test_clear_persists_empty_state() {
        let dir = TempDir::new().unwrap();

        {
            let coll = Collection::open("t", dir.path()).unwrap();
            coll.insert(doc(&[("n", Value::Int(1))])).unwrap();
            coll.clear().unwrap();
            assert!(coll.is_empty());
            // allocator reset with the wipe
            assert_eq!(coll.insert(doc(&[("n", Value::Int(2))])).unwrap(), 1);
            coll.close();
        }

        let coll = Collection::open("t", dir.path()).unwrap();
        assert_eq!(coll.len(), 1);
        assert_eq!(coll.get(1), Some(doc(&[("n", Value::Int(2))])));
    }

    #[test]
    fn test_update_and_remove_absent_fail() {
        let dir = TempDir::new().unwrap();
        let coll = Collection::open("t", dir.path()).unwrap();

        assert!(matches!(
            coll.update(5, Document::new()),
            Err(FluxError::NotFound(5))
        ));
        assert!(matches!(coll.remove(5), Err(FluxError::NotFound(5))));
    }

    #[test]
    fn test_ttl_expiry_is_durable() {
        let dir = TempDir::new().unwrap();

        {
            let coll = Collection::open("t", dir.path()).unwrap();
            let id = coll.insert(doc(&[("k", Value::String("v".into()))])).unwrap();
            coll.expire(id, Duration::from_millis(100));

            // the sweeper runs on a 100ms tick
            std::thread::sleep(Duration::from_millis(600));
            assert_eq!(coll.get(id), None);
            coll.close();
        }

        // the expiry was logged as a delete, so it survives recovery
        let coll = Collection::open("t", dir.path()).unwrap();
        assert_eq!(coll.get(1), None);
    }

    #[test]
    fn test_superseded_ttl_keeps_document() {
        let dir = TempDir::new().unwrap();
        let coll = Collection::open("t", dir.path()).unwrap();

        let id = coll.insert(doc(&[("k", Value::Int(1))])).unwrap();
        coll.expire(id, Duration::from_millis(100));
        coll.expire(id, Duration::from_secs(3600));

        std::thread::sleep(Duration::from_millis(600));
        assert!(coll.get(id).is_some());
    }

    #[test]
    fn test_find_equivalence_with_and_without_index() {
        let dir = TempDir::new().unwrap();
        let coll = Collection::open("t", dir.path()).unwrap();

        for age in [10, 20, 20, 30] {
            coll.insert(doc(&[("age", Value::Int(age))])).unwrap();
        }

        let wanted = Value::Int(20);
        let mut scanned = coll.find_all(|d| d.get("age") == Some(&wanted));
        scanned.sort_unstable();

        assert!(coll.find("age", &wanted).is_empty());
        coll.create_index("age", IndexKind::Hash);
        let mut indexed = coll.find("age", &wanted);
        indexed.sort_unstable();

        assert_eq!(scanned, indexed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let coll = Collection::open("t", dir.path()).unwrap();
        coll.insert(doc(&[("n", Value::Int(1))])).unwrap();
        coll.close();
        coll.close();
        assert!(coll.insert(doc(&[("n", Value::Int(2))])).is_err());
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let coll = Collection::open("t", dir.path()).unwrap();
        coll.insert(doc(&[("a", Value::Int(1)), ("b", Value::Int(2))]))
            .unwrap();
        coll.set_adaptive(true);

        let stats = coll.stats();
        assert_eq!(stats.database, "t");
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.next_id, 2);
        assert!(stats.adaptive_mode);
        assert_eq!(stats.fields, vec!["a", "b"]);
    }
}
