//! Named collection registry with on-disk discovery
//!
//! The registry mutex is held only across map access and collection
//! construction; data operations go through each collection's own
//! rw-lock. At most one handle exists per name.

use crate::{Collection, FluxError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// The database that can never be dropped
const DEFAULT_DB: &str = "default";

/// Registry of open collections under one data directory
pub struct DatabaseManager {
    data_dir: PathBuf,
    registry: Mutex<HashMap<String, Arc<Collection>>>,
}

impl DatabaseManager {
    /// Create the manager, ensuring the data directory exists
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            registry: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Fetch or open the named collection
    ///
    /// The second element is true when neither a WAL nor a snapshot
    /// existed, i.e. the database was newly created.
    pub fn open_or_create(&self, name: &str) -> Result<(Arc<Collection>, bool)> {
        let mut registry = self.registry.lock();
        if let Some(coll) = registry.get(name) {
            return Ok((coll.clone(), false));
        }

        let existed = self.wal_path(name).exists() || self.snapshot_path(name).exists();
        info!("loading database '{}'", name);
        let coll = Arc::new(Collection::open(name, &self.data_dir)?);
        registry.insert(name.to_string(), coll.clone());
        Ok((coll, !existed))
    }

    /// Close and delete a database; refuses the `default` sentinel
    pub fn drop_database(&self, name: &str) -> Result<()> {
        if name == DEFAULT_DB {
            return Err(FluxError::Protocol("cannot drop the default database".into()));
        }

        let mut registry = self.registry.lock();
        let coll = registry
            .remove(name)
            .ok_or_else(|| FluxError::DatabaseNotFound(name.to_string()))?;
        coll.close();

        for path in [self.wal_path(name), self.snapshot_path(name)] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        info!("dropped database '{}'", name);
        Ok(())
    }

    /// Union of open databases and on-disk `.wal`/`.flux` stems, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: BTreeSet<String> =
            self.registry.lock().keys().cloned().collect();

        if let Ok(entries) = std::fs::read_dir(&self.data_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_db_file = path
                    .extension()
                    .is_some_and(|ext| ext == "wal" || ext == "flux");
                if is_db_file {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.insert(stem.to_string());
                    }
                }
            }
        }

        names.into_iter().collect()
    }

    /// Close every open collection (server shutdown)
    pub fn close_all(&self) {
        for coll in self.registry.lock().values() {
            coll.close();
        }
    }

    fn wal_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.wal"))
    }

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.flux"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Document, Value};
    use tempfile::TempDir;

    #[test]
    fn test_open_or_create_reports_new_once() {
        let dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(dir.path()).unwrap();

        let (first, created) = manager.open_or_create("t").unwrap();
        assert!(created);
        let (second, created) = manager.open_or_create("t").unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_reopen_after_close_is_not_new() {
        let dir = TempDir::new().unwrap();

        {
            let manager = DatabaseManager::new(dir.path()).unwrap();
            let (coll, _) = manager.open_or_create("t").unwrap();
            let mut doc = Document::new();
            doc.insert("n".into(), Value::Int(1));
            coll.insert(doc).unwrap();
            manager.close_all();
        }

        let manager = DatabaseManager::new(dir.path()).unwrap();
        let (coll, created) = manager.open_or_create("t").unwrap();
        assert!(!created);
        assert_eq!(coll.len(), 1);
    }

    #[test]
    fn test_drop_refuses_default() {
        let dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(dir.path()).unwrap();
        manager.open_or_create("default").unwrap();
        assert!(manager.drop_database("default").is_err());
    }

    #[test]
    fn test_drop_deletes_files() {
        let dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(dir.path()).unwrap();
        manager.open_or_create("t").unwrap();
        assert!(dir.path().join("t.wal").exists());

        manager.drop_database("t").unwrap();
        assert!(!dir.path().join("t.wal").exists());
        assert!(!dir.path().join("t.flux").exists());
        assert!(matches!(
            manager.drop_database("t"),
            Err(FluxError::DatabaseNotFound(_))
        ));
    }

    #[test]
    fn test_list_unions_registry_and_disk() {
        let dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(dir.path()).unwrap();
        manager.open_or_create("open_db").unwrap();
        std::fs::write(dir.path().join("stale_db.flux"), b"").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"").unwrap();

        assert_eq!(manager.list(), vec!["open_db", "stale_db"]);
    }
}
