use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::config::CacheKeyMode;
use crate::error::ApiError;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

// 32-bit FNV-1a over UTF-16 code units, formatted as "<hex>-<length>".
// Collisions between same-length inputs are possible.
pub fn fingerprint(input: &str) -> String {
    let mut hash = FNV_OFFSET_BASIS;
    let mut len = 0usize;
    for unit in input.encode_utf16() {
        hash ^= u32::from(unit);
        hash = hash.wrapping_mul(FNV_PRIME);
        len += 1;
    }
    format!("{:x}-{}", hash, len)
}

// Create a cache key for an image payload
pub fn make_cache_key(mode: CacheKeyMode, input: &str) -> String {
    match mode {
        CacheKeyMode::Fnv => fingerprint(input),
        CacheKeyMode::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            format!("{:x}-{}", hasher.finalize(), input.encode_utf16().count())
        }
    }
}

// Time source for expiry checks, swapped out in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// Cache entry with expiry timestamp
#[derive(Clone)]
pub struct CacheEntry<V> {
    pub payload: V,
    pub expires_at: Instant,
}

// Fingerprint -> payload map. Nothing sweeps it; expired entries are only
// dropped when a lookup finds them.
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(key)?;
            if now < entry.expires_at {
                return Some(entry.payload.clone());
            }
        }
        // read guard is released, safe to take the shard write lock
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    pub fn set(&self, key: String, payload: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries.insert(key, CacheEntry { payload, expires_at });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type Waiter<V> = oneshot::Sender<Result<V, ApiError>>;

// Requests currently being computed, keyed by fingerprint. The first caller
// for a key leads, everyone arriving while it runs gets a copy of its result.
pub struct InFlight<V> {
    waiters: DashMap<String, Vec<Waiter<V>>>,
}

pub enum Flight<'a, V: Clone> {
    Leader(FlightGuard<'a, V>),
    Follower(oneshot::Receiver<Result<V, ApiError>>),
}

impl<V: Clone> InFlight<V> {
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
        }
    }

    pub fn join(&self, key: &str) -> Flight<'_, V> {
        match self.waiters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let (tx, rx) = oneshot::channel();
                occupied.get_mut().push(tx);
                Flight::Follower(rx)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Vec::new());
                Flight::Leader(FlightGuard {
                    flights: self,
                    key: key.to_string(),
                    completed: false,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}

impl<V: Clone> Default for InFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

// Held by the leader. Dropping it without `complete` (e.g. the client went
// away) releases the key and closes every waiter's channel.
pub struct FlightGuard<'a, V: Clone> {
    flights: &'a InFlight<V>,
    key: String,
    completed: bool,
}

impl<V: Clone> FlightGuard<'_, V> {
    pub fn complete(mut self, result: &Result<V, ApiError>) {
        self.completed = true;
        if let Some((_, waiters)) = self.flights.waiters.remove(&self.key) {
            for tx in waiters {
                let _ = tx.send(result.clone());
            }
        }
    }
}

impl<V: Clone> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        if !self.completed {
            self.flights.waiters.remove(&self.key);
        }
    }
}
