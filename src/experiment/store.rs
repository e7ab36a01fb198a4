//! Record Store - ordered in-memory collection keyed by UUID
//!
//! Records live in a vector that preserves insertion order (the default scan
//! order), with an identifier index for O(1) point lookups.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// A record that can be held by a [`RecordStore`].
pub trait Record: Clone {
    /// Human-readable kind, used in error messages.
    const KIND: &'static str;

    /// Unique, immutable identifier.
    fn uuid(&self) -> &str;

    /// The collection's allow-listed sort timestamp.
    fn sort_time(&self) -> Option<DateTime<Utc>>;
}

/// In-memory store for one record collection.
///
/// ## Design
///
/// Invariant: `index[records[i].uuid()] == i` for every position `i`. Any
/// operation that shifts positions rebuilds the index from the first shifted
/// slot onward.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStore<R> {
    records: Vec<R>,
    index: FxHashMap<String, usize>,
}

impl<R> Default for RecordStore<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<R: Record> RecordStore<R> {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records in their stored order.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if two records share a UUID.
    pub fn from_records(records: Vec<R>) -> Result<Self> {
        let mut store = Self::new();
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether a record with this UUID exists.
    #[must_use]
    pub fn contains(&self, uuid: &str) -> bool {
        self.index.contains_key(uuid)
    }

    /// Insert a new record at the end of the collection.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the UUID is already stored.
    pub fn insert(&mut self, record: R) -> Result<&R> {
        if self.index.contains_key(record.uuid()) {
            return Err(Error::AlreadyExists(format!(
                "{} {} already exists",
                R::KIND,
                record.uuid()
            )));
        }
        let position = self.records.len();
        self.index.insert(record.uuid().to_string(), position);
        self.records.push(record);
        Ok(&self.records[position])
    }

    /// Get a record by UUID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record has this UUID.
    pub fn get(&self, uuid: &str) -> Result<&R> {
        self.position(uuid).map(|position| &self.records[position])
    }

    /// All records, in insertion order.
    #[must_use]
    pub fn scan(&self) -> &[R] {
        &self.records
    }

    /// Apply `merge` to the stored record in place and return the result.
    ///
    /// The closure must not change the record's UUID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record has this UUID.
    pub fn update(&mut self, uuid: &str, merge: impl FnOnce(&mut R)) -> Result<&R> {
        let position = self.position(uuid)?;
        let record = &mut self.records[position];
        merge(record);
        debug_assert_eq!(record.uuid(), uuid, "record UUIDs are immutable");
        Ok(&self.records[position])
    }

    /// Replace the stored record carrying the same UUID, returning the old one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record has this UUID.
    pub fn replace(&mut self, record: R) -> Result<R> {
        let position = self.position(record.uuid())?;
        Ok(std::mem::replace(&mut self.records[position], record))
    }

    /// Remove a record, returning its former position and the record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record has this UUID.
    pub fn delete(&mut self, uuid: &str) -> Result<(usize, R)> {
        let position = self.position(uuid)?;
        let record = self.records.remove(position);
        self.index.remove(uuid);
        self.reindex_from(position);
        Ok((position, record))
    }

    /// Put a deleted record back at its former position.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the UUID has been reused meanwhile.
    pub fn restore(&mut self, position: usize, record: R) -> Result<()> {
        if self.index.contains_key(record.uuid()) {
            return Err(Error::AlreadyExists(format!(
                "{} {} already exists",
                R::KIND,
                record.uuid()
            )));
        }
        let position = position.min(self.records.len());
        self.records.insert(position, record);
        self.reindex_from(position);
        Ok(())
    }

    fn position(&self, uuid: &str) -> Result<usize> {
        self.index
            .get(uuid)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("{} {uuid} not found", R::KIND)))
    }

    fn reindex_from(&mut self, start: usize) {
        for (offset, record) in self.records[start..].iter().enumerate() {
            self.index.insert(record.uuid().to_string(), start + offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{ExperimentRecord, ExperimentUpdate};

    fn exp(uuid: &str) -> ExperimentRecord {
        ExperimentRecord::builder("T1", "dev").uuid(uuid).build()
    }

    fn uuids(store: &RecordStore<ExperimentRecord>) -> Vec<&str> {
        store.scan().iter().map(ExperimentRecord::uuid).collect()
    }

    #[test]
    fn test_store_default() {
        let store: RecordStore<ExperimentRecord> = RecordStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let mut store = RecordStore::new();
        store.insert(exp("e1")).unwrap();

        assert!(store.contains("e1"));
        assert_eq!(store.get("e1").unwrap().uuid(), "e1");
        assert!(matches!(store.get("e2"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let mut store = RecordStore::new();
        store.insert(exp("e1")).unwrap();
        assert!(matches!(store.insert(exp("e1")), Err(Error::AlreadyExists(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_scan_insertion_order() {
        let mut store = RecordStore::new();
        for id in ["c", "a", "b"] {
            store.insert(exp(id)).unwrap();
        }
        assert_eq!(uuids(&store), ["c", "a", "b"]);
    }

    #[test]
    fn test_update_in_place() {
        let mut store = RecordStore::new();
        store.insert(exp("e1")).unwrap();

        let updated = store
            .update("e1", |r| {
                ExperimentUpdate {
                    notes: Some(Some("n".to_string())),
                    ..Default::default()
                }
                .apply_to(r);
            })
            .unwrap();
        assert_eq!(updated.notes(), Some("n"));
        assert!(matches!(store.update("nope", |_| {}), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete_reindexes() {
        let mut store = RecordStore::new();
        for id in ["a", "b", "c"] {
            store.insert(exp(id)).unwrap();
        }

        let (position, removed) = store.delete("a").unwrap();
        assert_eq!(position, 0);
        assert_eq!(removed.uuid(), "a");
        assert_eq!(store.get("c").unwrap().uuid(), "c");
        assert!(matches!(store.get("a"), Err(Error::NotFound(_))));
        assert!(matches!(store.delete("a"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_restore_original_position() {
        let mut store = RecordStore::new();
        for id in ["a", "b", "c"] {
            store.insert(exp(id)).unwrap();
        }

        let (position, removed) = store.delete("b").unwrap();
        store.restore(position, removed).unwrap();

        assert_eq!(uuids(&store), ["a", "b", "c"]);
        assert_eq!(store.get("c").unwrap().uuid(), "c");
    }

    #[test]
    fn test_replace_returns_previous() {
        let mut store = RecordStore::new();
        store.insert(exp("e1")).unwrap();

        let newer = ExperimentRecord::builder("T2", "dev").uuid("e1").build();
        let old = store.replace(newer).unwrap();

        assert_eq!(old.experiment_type(), "T1");
        assert_eq!(store.get("e1").unwrap().experiment_type(), "T2");
    }

    #[test]
    fn test_from_records_rejects_duplicates() {
        let result = RecordStore::from_records(vec![exp("a"), exp("a")]);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }
}
