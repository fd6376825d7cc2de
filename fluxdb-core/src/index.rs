//! Secondary indexes over document fields
//!
//! Two multimap shapes per field: a hash index for equality probes and a
//! sorted index (total order over [`Value`]) for inclusive range scans.
//! A field may carry both kinds at once.

use crate::{Document, Id, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Index shape selector: 0 = Hash (default), 1 = Sorted on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Hash,
    Sorted,
}

type HashIndex = HashMap<Value, Vec<Id>>;
type SortedIndex = BTreeMap<Value, Vec<Id>>;

/// Hash and sorted secondary indexes, keyed by field name
#[derive(Default)]
pub struct IndexManager {
    hash_indexes: HashMap<String, HashIndex>,
    sorted_indexes: HashMap<String, SortedIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index on a field; idempotent per (field, kind)
    pub fn create(&mut self, field: &str, kind: IndexKind) {
        match kind {
            IndexKind::Hash => {
                if self.hash_indexes.contains_key(field) {
                    return;
                }
                self.hash_indexes.insert(field.to_string(), HashIndex::new());
            }
            IndexKind::Sorted => {
                if self.sorted_indexes.contains_key(field) {
                    return;
                }
                self.sorted_indexes.insert(field.to_string(), SortedIndex::new());
            }
        }
        info!("created {:?} index on field '{}'", kind, field);
    }

    /// Insert one (value, id) entry per indexed field present in the document
    pub fn add_document(&mut self, id: Id, doc: &Document) {
        for (field, value) in doc {
            self.add_entry(field, id, value);
        }
    }

    /// Insert a single (value, id) entry if the field is indexed
    pub fn add_entry(&mut self, field: &str, id: Id, value: &Value) {
        if let Some(index) = self.hash_indexes.get_mut(field) {
            index.entry(value.clone()).or_default().push(id);
        }
        if let Some(index) = self.sorted_indexes.get_mut(field) {
            index.entry(value.clone()).or_default().push(id);
        }
    }

    /// Remove exactly one (value, id) entry per indexed field in the document
    ///
    /// Must be called with the document as it was indexed; removing with a
    /// newer revision would leave stale entries behind.
    pub fn remove_document(&mut self, id: Id, doc: &Document) {
        for (field, value) in doc {
            if let Some(index) = self.hash_indexes.get_mut(field) {
                remove_one(index.get_mut(value), id);
                if index.get(value).is_some_and(Vec::is_empty) {
                    index.remove(value);
                }
            }
            if let Some(index) = self.sorted_indexes.get_mut(field) {
                remove_one(index.get_mut(value), id);
                if index.get(value).is_some_and(Vec::is_empty) {
                    index.remove(value);
                }
            }
        }
    }

    /// Equality probe against the hash index; empty when the field has none
    pub fn search_hash(&self, field: &str, value: &Value) -> Vec<Id> {
        self.hash_indexes
            .get(field)
            .and_then(|index| index.get(value))
            .cloned()
            .unwrap_or_default()
    }

    /// Inclusive range scan against the sorted index, in value order
    ///
    /// Container bounds (objects, arrays) have no meaningful order and
    /// yield no results, as does an inverted range.
    pub fn search_sorted(&self, field: &str, lo: &Value, hi: &Value) -> Vec<Id> {
        if lo.is_container() || hi.is_container() || lo > hi {
            return Vec::new();
        }
        let Some(index) = self.sorted_indexes.get(field) else {
            return Vec::new();
        };
        index
            .range(lo.clone()..=hi.clone())
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// True iff the field has an index of either kind
    pub fn has_index(&self, field: &str) -> bool {
        self.hash_indexes.contains_key(field) || self.sorted_indexes.contains_key(field)
    }

    /// Drop all indexes
    pub fn clear(&mut self) {
        self.hash_indexes.clear();
        self.sorted_indexes.clear();
    }
}

fn remove_one(ids: Option<&mut Vec<Id>>, id: Id) {
    if let Some(ids) = ids {
        if let Some(pos) = ids.iter().position(|&candidate| candidate == id) {
            ids.swap_remove(pos);
        }
    }
}
