// Session persistence for in-progress drafts
// Snapshots are serialized JSON with a TTL; nothing here outlives the
// process, matching browser session storage.

use std::{
    collections::{BTreeMap, HashSet},
    time::{Duration, Instant},
};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::draft::BookingDraft;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store is full ({0} sessions)")]
    Full(usize),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub items_count: usize,
    pub size_bytes: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub rejected_count: usize,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub default_ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 30 * 60,
            max_entries: 10_000,
        }
    }
}

pub trait DraftStore: Send + Sync + 'static {
    fn save(&self, session_id: &str, draft: &BookingDraft) -> Result<(), StoreError>;

    // Expired or unknown sessions load as None
    fn load(&self, session_id: &str) -> Result<Option<BookingDraft>, StoreError>;

    fn discard(&self, session_id: &str) -> bool;

    fn stats(&self) -> StoreStats;
}

struct Snapshot {
    data: Bytes,
    expires_at: Instant,
}

pub struct MemoryDraftStore {
    entries: DashMap<String, Snapshot>,
    config: StoreConfig,
    stats: RwLock<StoreStats>,
    // expiry instant -> session ids, for sweeping
    expiry_index: RwLock<BTreeMap<Instant, HashSet<String>>>,
}

impl Default for MemoryDraftStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl MemoryDraftStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            stats: RwLock::new(StoreStats::default()),
            expiry_index: RwLock::new(BTreeMap::new()),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.default_ttl_seconds)
    }

    fn unindex(&self, session_id: &str, expires_at: Instant) {
        let mut index = self.expiry_index.write();
        if let Some(ids) = index.get_mut(&expires_at) {
            ids.remove(session_id);
            if ids.is_empty() {
                index.remove(&expires_at);
            }
        }
    }

    fn remove_entry(&self, session_id: &str) -> bool {
        match self.entries.remove(session_id) {
            Some((_, snapshot)) => {
                self.unindex(session_id, snapshot.expires_at);
                self.stats.write().size_bytes -= snapshot.data.len();
                true
            }
            None => false,
        }
    }

    /// Drop every snapshot whose TTL has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let due: Vec<String> = {
            let index = self.expiry_index.read();
            index
                .range(..=now)
                .flat_map(|(_, ids)| ids.iter().cloned())
                .collect()
        };

        let mut removed = 0;
        for session_id in due {
            if self.remove_entry(&session_id) {
                removed += 1;
            }
        }

        if removed > 0 {
            self.stats.write().expired_count += removed;
            debug!(removed, "purged expired drafts");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DraftStore for MemoryDraftStore {
    fn save(&self, session_id: &str, draft: &BookingDraft) -> Result<(), StoreError> {
        let data = Bytes::from(serde_json::to_vec(draft)?);

        if !self.entries.contains_key(session_id) && self.entries.len() >= self.config.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.config.max_entries {
                self.stats.write().rejected_count += 1;
                return Err(StoreError::Full(self.config.max_entries));
            }
        }

        self.remove_entry(session_id);

        let expires_at = Instant::now() + self.ttl();
        let size = data.len();
        self.entries
            .insert(session_id.to_string(), Snapshot { data, expires_at });
        self.expiry_index
            .write()
            .entry(expires_at)
            .or_default()
            .insert(session_id.to_string());
        self.stats.write().size_bytes += size;

        debug!(session_id, size, "saved draft snapshot");
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<BookingDraft>, StoreError> {
        let lookup = self
            .entries
            .get(session_id)
            .map(|s| (s.data.clone(), s.expires_at));

        match lookup {
            Some((_, expires_at)) if expires_at <= Instant::now() => {
                self.remove_entry(session_id);
                let mut stats = self.stats.write();
                stats.expired_count += 1;
                stats.miss_count += 1;
                Ok(None)
            }
            Some((data, _)) => {
                self.stats.write().hit_count += 1;
                Ok(Some(serde_json::from_slice(&data)?))
            }
            None => {
                self.stats.write().miss_count += 1;
                Ok(None)
            }
        }
    }

    fn discard(&self, session_id: &str) -> bool {
        self.remove_entry(session_id)
    }

    fn stats(&self) -> StoreStats {
        let mut stats = self.stats.read().clone();
        stats.items_count = self.entries.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::DraftPatch;

    fn draft_with_email(email: &str) -> BookingDraft {
        let mut draft = BookingDraft::new();
        draft.merge(DraftPatch::contact(email, "9876543210"));
        draft
    }

    #[test]
    fn test_save_and_load_round_trip() -> anyhow::Result<()> {
        let store = MemoryDraftStore::default();
        let draft = draft_with_email("a@example.com");

        store.save("s1", &draft)?;
        assert_eq!(store.load("s1")?, Some(draft));
        assert_eq!(store.load("missing")?, None);

        let stats = store.stats();
        assert_eq!(stats.items_count, 1);
        assert_eq!((stats.hit_count, stats.miss_count), (1, 1));
        assert!(stats.size_bytes > 0);
        Ok(())
    }

    #[test]
    fn test_overwrite_keeps_size_consistent() -> anyhow::Result<()> {
        let store = MemoryDraftStore::default();
        store.save("s1", &draft_with_email("a@example.com"))?;
        store.save("s1", &draft_with_email("longer.address@example.com"))?;

        let loaded = store.load("s1")?.map(|d| d.contact.email);
        assert_eq!(loaded.as_deref(), Some("longer.address@example.com"));

        assert!(store.discard("s1"));
        assert!(!store.discard("s1"));
        assert_eq!(store.stats().size_bytes, 0);
        Ok(())
    }

    #[test]
    fn test_expired_snapshots_disappear() -> anyhow::Result<()> {
        let store = MemoryDraftStore::new(StoreConfig {
            default_ttl_seconds: 0,
            max_entries: 10,
        });
        store.save("s1", &BookingDraft::new())?;
        store.save("s2", &BookingDraft::new())?;

        assert_eq!(store.load("s1")?, None);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
        assert_eq!(store.stats().expired_count, 2);
        Ok(())
    }

    #[test]
    fn test_capacity_limit() {
        let store = MemoryDraftStore::new(StoreConfig {
            default_ttl_seconds: 600,
            max_entries: 1,
        });
        store.save("s1", &BookingDraft::new()).unwrap();
        assert!(matches!(
            store.save("s2", &BookingDraft::new()),
            Err(StoreError::Full(1))
        ));
        // Existing sessions can still be updated
        assert!(store.save("s1", &BookingDraft::new()).is_ok());
        assert_eq!(store.stats().rejected_count, 1);
    }
}
