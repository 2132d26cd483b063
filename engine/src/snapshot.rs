//! Immutable point-in-time views of the record collection.
//!
//! A [`Snapshot`] shares its records behind an `Arc`, so handing one to a
//! listener or another task is a reference-count bump. The cache never
//! mutates a snapshot after publishing it.

use crate::{Record, RecordId, Version};
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// An immutable ordered sequence of records at one cache version.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    version: Version,
    records: Arc<[Record]>,
}

impl Snapshot {
    /// Create a snapshot from an ordered sequence of records.
    pub fn new(version: Version, records: impl Into<Arc<[Record]>>) -> Self {
        Self {
            version,
            records: records.into(),
        }
    }

    /// The empty snapshot at version 0.
    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    /// Logical version; strictly increases across published snapshots.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Find a record by id.
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Position of a record in the ordered sequence.
    pub fn position(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    /// Record ids in order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id).collect()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Snapshot", 2)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("records", &*self.records)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot() {
        let snapshot = Snapshot::empty();
        assert_eq!(snapshot.version(), 0);
        assert!(snapshot.is_empty());
        assert!(snapshot.get(1).is_none());
    }

    #[test]
    fn lookup_by_id() {
        let snapshot = Snapshot::new(3, vec![Record::new(10), Record::new(20)]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.position(20), Some(1));
        assert_eq!(snapshot.get(10).map(|r| r.id), Some(10));
        assert_eq!(snapshot.ids(), vec![10, 20]);
    }

    #[test]
    fn clones_share_storage() {
        let snapshot = Snapshot::new(1, vec![Record::new(1)]);
        let copy = snapshot.clone();
        assert!(std::ptr::eq(snapshot.records(), copy.records()));
    }

    #[test]
    fn serializes_version_and_records() {
        let snapshot = Snapshot::new(4, vec![Record::new(1)]);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["version"], 4);
        assert_eq!(json["records"][0]["id"], 1);
    }
}
