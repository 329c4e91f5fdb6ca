//! Typed expiring cache used for the first page of transaction history.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

pub trait Cache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn set(&self, key: K, value: V, ttl: Duration);

    fn delete(&self, key: &K);

    /// Number of times `key` has been deleted so far.
    fn generation(&self, key: &K) -> u64;

    /// Stores `value` only if `key` was not deleted since `generation` was
    /// read. Returns whether the value was stored.
    fn set_if_generation(&self, key: K, value: V, ttl: Duration, generation: u64) -> bool;
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

struct Slots<K, V> {
    entries: HashMap<K, Entry<V>>,
    // only keys that were deleted at least once have a generation
    generations: HashMap<K, u64>,
}

impl<K: Eq + Hash, V> Slots<K, V> {
    fn generation(&self, key: &K) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }
}

/// In-memory cache with a per-entry time-to-live.
///
/// Expired entries are never served. They are reclaimed either lazily on the
/// next `get` or by the sweeper task started with [`TtlCache::spawn_sweeper`].
/// Deletes bump a per-key generation that conditional fills are checked
/// against, so a fill computed before a delete cannot land after it.
pub struct TtlCache<K, V> {
    slots: RwLock<Slots<K, V>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Slots {
                entries: HashMap::new(),
                generations: HashMap::new(),
            }),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.entries.len();
        slots.entries.retain(|_, entry| entry.is_live(now));
        before - slots.entries.len()
    }

    /// Periodically purges expired entries. The task ends on its own once the
    /// cache it sweeps has been dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(live) = cache.upgrade() else {
                    tracing::debug!("Cache dropped, stopping sweeper");
                    break;
                };
                let purged = live.purge_expired();
                if purged > 0 {
                    tracing::debug!("Cache sweep removed {purged} expired entries");
                }
            }
        })
    }
}

impl<K, V> Cache<K, V> for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                None => return None,
                Some(_) => {}
            }
        }

        // expired, reclaim it unless someone refreshed it in between
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            slots.entries.remove(key);
        }
        None
    }

    fn set(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .insert(key, Entry { value, expires_at });
    }

    fn delete(&self, key: &K) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.entries.remove(key);
        match slots.generations.get_mut(key) {
            Some(generation) => *generation += 1,
            None => {
                slots.generations.insert(key.clone(), 1);
            }
        }
    }

    fn generation(&self, key: &K) -> u64 {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation(key)
    }

    fn set_if_generation(&self, key: K, value: V, ttl: Duration, generation: u64) -> bool {
        let expires_at = Instant::now() + ttl;
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.generation(&key) != generation {
            return false;
        }
        slots.entries.insert(key, Entry { value, expires_at });
        true
    }
}
