//! In-memory sync catalog
//!
//! [`MemoryCatalog`] is the `CatalogSink` used by the CLI and the tests.
//! Entries are keyed by backend id in a `DashMap`; the shard lock taken by
//! `entry()` makes "insert if absent" atomic per id.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use strmsync_core::domain::SyncFileEntry;
use strmsync_core::ports::catalog::validate_entry;
use strmsync_core::ports::{CatalogError, CatalogSink};

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: DashMap<String, SyncFileEntry>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<SyncFileEntry> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// All file entries, sorted by remote path
    pub fn files(&self) -> Vec<SyncFileEntry> {
        self.collect(|e| !e.is_dir())
    }

    /// All directory entries, sorted by remote path
    pub fn directories(&self) -> Vec<SyncFileEntry> {
        self.collect(SyncFileEntry::is_dir)
    }

    fn collect(&self, keep: impl Fn(&SyncFileEntry) -> bool) -> Vec<SyncFileEntry> {
        let mut entries: Vec<SyncFileEntry> = self
            .entries
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(SyncFileEntry::remote_path);
        entries
    }
}

impl CatalogSink for MemoryCatalog {
    fn insert(&self, entry: SyncFileEntry) -> Result<bool, CatalogError> {
        validate_entry(&entry)?;
        match self.entries.entry(entry.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn mark_processed(&self, id: &str) -> Result<(), CatalogError> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| CatalogError::UnknownEntry(id.to_string()))?;
        entry.processed = true;
        Ok(())
    }
}
