use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{SessionStore, StoreError};
use crate::tokens::SessionId;

struct Entry {
    blob: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process session store with sliding expiration.
///
/// Reads ignore and evict expired entries; abandoned sessions that are never
/// read again are reclaimed by [`MemoryStore::purge_expired`], which the
/// background cleaner calls periodically.
pub struct MemoryStore {
    entries: DashMap<SessionId, Entry>,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries currently held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

impl SessionStore for MemoryStore {
    fn save_raw(&self, id: &SessionId, blob: Vec<u8>) -> Result<(), StoreError> {
        let entry = Entry {
            blob,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.insert(*id, entry);
        Ok(())
    }

    fn get_raw(&self, id: &SessionId) -> Result<Vec<u8>, StoreError> {
        let now = Instant::now();

        // The shard write lock is held across the expiry check and refresh, so
        // a concurrent delete either lands before (NotFound) or after.
        let expired = match self.entries.get_mut(id) {
            Some(mut entry) if !entry.is_expired_at(now) => {
                entry.expires_at = now + self.ttl;
                return Ok(entry.blob.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(id, |_, entry| entry.is_expired_at(now));
            tracing::debug!(session_id = %id, "Evicted expired session state");
        }
        Err(StoreError::NotFound)
    }

    fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.entries.remove(id);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
