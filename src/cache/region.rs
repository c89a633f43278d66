//! Region stores: one keyed map of entries per entity kind, with a byte counter
//! that only ever reflects resident entries.

use std::collections::HashMap;

use serde::Serialize;

use crate::cache::entry::{CacheEntry, EntityKind};
use crate::cache::evictor::EvictionCandidate;

/// Per-region usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionStats {
    /// Number of entries, pending and resident.
    pub entries: usize,
    /// Entries still waiting for their payload.
    pub pending: usize,
    /// Sum of resident entry sizes.
    pub bytes_used: u64,
}

/// A keyed store for one entity kind.
#[derive(Debug)]
pub struct Region {
    kind: EntityKind,
    entries: HashMap<String, CacheEntry>,
    size_in_bytes: u64,
}

impl Region {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            size_in_bytes: 0,
        }
    }

    /// Bytes accounted by resident entries.
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(id)
    }

    /// Insert a pending entry. The caller has already checked for duplicates.
    pub fn insert_pending(&mut self, entry: CacheEntry) {
        debug_assert!(!entry.is_resident());
        self.entries.insert(entry.id.clone(), entry);
    }

    /// Add a newly promoted entry's bytes to the counter.
    pub fn account(&mut self, bytes: u64) {
        self.size_in_bytes += bytes;
    }

    /// Remove an entry and subtract whatever it had accounted.
    pub fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.size_in_bytes = self.size_in_bytes.saturating_sub(entry.size_in_bytes);
        Some(entry)
    }

    /// Empty the region, leaving the counter at zero.
    pub fn drain(&mut self) -> Vec<CacheEntry> {
        self.size_in_bytes = 0;
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Resident entries as eviction candidates. Non-volatile regions offer none.
    pub fn eviction_candidates(&self) -> Vec<EvictionCandidate> {
        if !self.kind.is_volatile() {
            return Vec::new();
        }
        self.entries
            .values()
            .filter(|entry| entry.is_resident())
            .map(|entry| EvictionCandidate {
                id: entry.id.clone(),
                size_in_bytes: entry.size_in_bytes,
                last_accessed: entry.last_accessed,
            })
            .collect()
    }

    pub fn stats(&self) -> RegionStats {
        RegionStats {
            entries: self.entries.len(),
            pending: self.entries.values().filter(|e| !e.is_resident()).count(),
            bytes_used: self.size_in_bytes,
        }
    }
}
