//! Storage engine: primary map, id allocator, index integration
//!
//! All methods are lock-free; the owning [`Collection`](crate::Collection)
//! serializes access through its reader-writer lock.

use crate::index::{IndexKind, IndexManager};
use crate::{Document, FluxError, Id, Result, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

/// Documents sampled by [`StorageEngine::sample_fields`]
const FIELD_SAMPLE_LIMIT: usize = 50;

/// In-memory document store for a single collection
pub struct StorageEngine {
    db: BTreeMap<Id, Document>,
    indexes: IndexManager,
    next_id: Id,

    // Adaptive indexing state
    adaptive_mode: bool,
    miss_counter: HashMap<String, u32>,
    wants_sorted: HashMap<String, bool>,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            db: BTreeMap::new(),
            indexes: IndexManager::new(),
            next_id: 1,
            adaptive_mode: false,
            miss_counter: HashMap::new(),
            wants_sorted: HashMap::new(),
        }
    }

    pub fn get(&self, id: Id) -> Option<&Document> {
        self.db.get(&id)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Next id the allocator will hand out
    pub fn next_id(&self) -> Id {
        self.next_id
    }

    /// Restore the allocator position (snapshot recovery)
    pub fn set_next_id(&mut self, id: Id) {
        self.next_id = id;
    }

    /// Advance the allocator past an externally observed id
    pub fn note_id(&mut self, id: Id) {
        if id >= self.next_id {
            self.next_id = id + 1;
        }
    }

    /// Iterate documents in id order
    pub fn iter(&self) -> impl Iterator<Item = (Id, &Document)> {
        self.db.iter().map(|(id, doc)| (*id, doc))
    }

    /// Insert under an explicit id, replacing any existing document
    pub fn insert_with_id(&mut self, id: Id, doc: Document) {
        if let Some(old) = self.db.get(&id) {
            self.indexes.remove_document(id, old);
        }
        self.indexes.add_document(id, &doc);
        self.db.insert(id, doc);
        self.note_id(id);
    }

    /// Insert under a freshly allocated id
    pub fn insert(&mut self, doc: Document) -> Id {
        let id = self.next_id;
        self.insert_with_id(id, doc);
        id
    }

    /// Replace an existing document, maintaining index entries
    pub fn update(&mut self, id: Id, doc: Document) -> Result<()> {
        let old = self.db.get(&id).ok_or(FluxError::NotFound(id))?;
        // the old revision owns the index entries being removed
        self.indexes.remove_document(id, old);
        self.indexes.add_document(id, &doc);
        self.db.insert(id, doc);
        Ok(())
    }

    /// Remove a document and its index entries
    pub fn remove(&mut self, id: Id) -> Result<()> {
        let doc = self.db.remove(&id).ok_or(FluxError::NotFound(id))?;
        self.indexes.remove_document(id, &doc);
        Ok(())
    }

    /// Wipe documents, indexes, adaptive state; reset the allocator to 1
    pub fn clear(&mut self) {
        self.db.clear();
        self.indexes.clear();
        self.next_id = 1;
        self.miss_counter.clear();
        self.wants_sorted.clear();
    }

    // --- search & indexing ---

    /// Create an index and backfill it from the primary map
    pub fn create_index(&mut self, field: &str, kind: IndexKind) {
        self.indexes.create(field, kind);
        for (id, doc) in &self.db {
            if let Some(value) = doc.get(field) {
                self.indexes.add_entry(field, *id, value);
            }
        }
    }

    /// Equality probe through the hash index
    pub fn find(&self, field: &str, value: &Value) -> Vec<Id> {
        self.indexes.search_hash(field, value)
    }

    /// Inclusive range probe through the sorted index
    pub fn find_range(&self, field: &str, lo: &Value, hi: &Value) -> Vec<Id> {
        self.indexes.search_sorted(field, lo, hi)
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.has_index(field)
    }

    // --- adaptive indexing ---

    pub fn set_adaptive(&mut self, enabled: bool) {
        self.adaptive_mode = enabled;
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive_mode
    }

    /// Count an index miss on a scanned field; promote it once the
    /// dynamic threshold is reached
    ///
    /// The promoted index is sorted when any miss since the last promotion
    /// was a range probe, hash otherwise. Counters reset on promotion.
    pub fn report_query_miss(&mut self, field: &str, is_range: bool) {
        if !self.adaptive_mode || self.indexes.has_index(field) {
            return;
        }

        let threshold = self.dynamic_threshold();
        let count = self.miss_counter.entry(field.to_string()).or_insert(0);
        *count += 1;
        if is_range {
            self.wants_sorted.insert(field.to_string(), true);
        }

        if *count >= threshold {
            let kind = if self.wants_sorted.get(field).copied().unwrap_or(false) {
                IndexKind::Sorted
            } else {
                IndexKind::Hash
            };
            info!("hot field '{}' reached miss threshold, promoting to {:?} index", field, kind);
            self.create_index(field, kind);
            self.miss_counter.remove(field);
            self.wants_sorted.remove(field);
        }
    }

    fn dynamic_threshold(&self) -> u32 {
        let count = self.db.len();
        if count < 100 {
            2
        } else {
            (count as f64).log10().floor() as u32 + 2
        }
    }

    // --- schema sampling ---

    /// Union of field names over the first 50 documents in id order
    pub fn sample_fields(&self) -> Vec<String> {
        let mut fields = BTreeSet::new();
        for (_, doc) in self.db.iter().take(FIELD_SAMPLE_LIMIT) {
            for key in doc.keys() {
                fields.insert(key.clone());
            }
        }
        fields.into_iter().collect()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_auto_ids_are_monotone() {
        let mut engine = StorageEngine::new();
        let a = engine.insert(doc(&[("n", Value::Int(1))]));
        let b = engine.insert(doc(&[("n", Value::Int(2))]));
        assert_eq!((a, b), (1, 2));

        // explicit insert past the allocator pushes it forward
        engine.insert_with_id(10, doc(&[("n", Value::Int(3))]));
        assert_eq!(engine.insert(doc(&[("n", Value::Int(4))])), 11);
    }

    #[test]
    fn test_update_moves_index_entries() {
        let mut engine = StorageEngine::new();
        engine.create_index("age", IndexKind::Hash);

        let id = engine.insert(doc(&[("age", Value::Int(30))]));
        engine.update(id, doc(&[("age", Value::Int(31))])).unwrap();

        assert!(engine.find("age", &Value::Int(30)).is_empty());
        assert_eq!(engine.find("age", &Value::Int(31)), vec![id]);
    }

    #[test]
    fn test_remove_clears_index_entries() {
        let mut engine = StorageEngine::new();
        engine.create_index("age", IndexKind::Hash);
        let id = engine.insert(doc(&[("age", Value::Int(30))]));

        engine.remove(id).unwrap();
        assert!(engine.get(id).is_none());
        assert!(engine.find("age", &Value::Int(30)).is_empty());
        assert!(matches!(engine.remove(id), Err(FluxError::NotFound(_))));
    }

    #[test]
    fn test_insert_with_id_replaces_and_reindexes() {
        let mut engine = StorageEngine::new();
        engine.create_index("age", IndexKind::Hash);
        engine.insert_with_id(5, doc(&[("age", Value::Int(30))]));
        engine.insert_with_id(5, doc(&[("age", Value::Int(40))]));

        assert!(engine.find("age", &Value::Int(30)).is_empty());
        assert_eq!(engine.find("age", &Value::Int(40)), vec![5]);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_clear_resets_allocator() {
        let mut engine = StorageEngine::new();
        engine.insert(doc(&[("n", Value::Int(1))]));
        engine.clear();
        assert!(engine.is_empty());
        assert_eq!(engine.insert(doc(&[("n", Value::Int(2))])), 1);
    }

    #[test]
    fn test_create_index_backfills() {
        let mut engine = StorageEngine::new();
        let id = engine.insert(doc(&[("age", Value::Int(30))]));
        engine.insert(doc(&[("name", Value::String("a".into()))]));

        engine.create_index("age", IndexKind::Sorted);
        assert_eq!(
            engine.find_range("age", &Value::Int(0), &Value::Int(99)),
            vec![id]
        );
    }

    #[test]
    fn test_adaptive_promotion_to_hash() {
        let mut engine = StorageEngine::new();
        engine.set_adaptive(true);
        for i in 0..50 {
            engine.insert(doc(&[("city", Value::String(format!("c{i}")))]));
        }

        // threshold is 2 below 100 documents
        engine.report_query_miss("city", false);
        assert!(!engine.has_index("city"));
        engine.report_query_miss("city", false);
        assert!(engine.has_index("city"));

        // backfill makes the probe hit immediately
        assert_eq!(engine.find("city", &Value::String("c7".into())).len(), 1);
    }

    #[test]
    fn test_adaptive_range_miss_promotes_sorted() {
        let mut engine = StorageEngine::new();
        engine.set_adaptive(true);
        for i in 0..10 {
            engine.insert(doc(&[("age", Value::Int(i))]));
        }

        engine.report_query_miss("age", true);
        engine.report_query_miss("age", false);
        assert!(engine.has_index("age"));
        assert_eq!(
            engine.find_range("age", &Value::Int(3), &Value::Int(5)).len(),
            3
        );
        // hash probes still miss: the promoted index is sorted only
        assert!(engine.find("age", &Value::Int(3)).is_empty());
    }

    #[test]
    fn test_adaptive_disabled_or_indexed_is_noop() {
        let mut engine = StorageEngine::new();
        engine.report_query_miss("city", false);
        engine.report_query_miss("city", false);
        assert!(!engine.has_index("city"));

        engine.set_adaptive(true);
        engine.create_index("city", IndexKind::Hash);
        engine.report_query_miss("city", false);
        engine.report_query_miss("city", false);
        // still only the explicitly created hash index
        assert!(engine.has_index("city"));
    }

    #[test]
    fn test_dynamic_threshold_grows_with_size() {
        let mut engine = StorageEngine::new();
        engine.set_adaptive(true);
        for i in 0..1000 {
            engine.insert(doc(&[("n", Value::Int(i))]));
        }

        // threshold is floor(log10(1000)) + 2 = 5
        for _ in 0..4 {
            engine.report_query_miss("n", false);
        }
        assert!(!engine.has_index("n"));
        engine.report_query_miss("n", false);
        assert!(engine.has_index("n"));
    }

    #[test]
    fn test_sample_fields() {
        let mut engine = StorageEngine::new();
        engine.insert(doc(&[("a", Value::Int(1)), ("b", Value::Int(2))]));
        engine.insert(doc(&[("c", Value::Int(3))]));
        assert_eq!(engine.sample_fields(), vec!["a", "b", "c"]);
    }
}
