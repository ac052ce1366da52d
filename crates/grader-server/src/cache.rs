//! Read-through cache resolving key fingerprints to identities.
//!
//! Entries expire after a base TTL plus random jitter so that a burst of
//! loads does not expire all at once. Concurrent misses for one fingerprint
//! share a single load. Deleting any identity invalidates the whole cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::debug;

use crate::config::CacheConfig;
use crate::models::Identity;
use crate::store::{IdentityStore, StoreError};

/// Source of monotonic time for entry expiry.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Loads an identity on a cache miss.
#[async_trait]
pub trait IdentityLoader: Send + Sync {
    async fn load(&self, fingerprint: &str) -> Result<Option<Identity>, StoreError>;
}

#[async_trait]
impl<S: IdentityStore + ?Sized> IdentityLoader for S {
    async fn load(&self, fingerprint: &str) -> Result<Option<Identity>, StoreError> {
        self.find_by_fingerprint(fingerprint).await
    }
}

/// Cache lookup failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No identity has this fingerprint. Never cached.
    #[error("No identity for key fingerprint")]
    NotFound,

    #[error("Identity lookup failed: {0}")]
    Store(#[from] StoreError),

    #[error("Identity lookup timed out after {0:?}")]
    Timeout(Duration),
}

struct CacheEntry {
    identity: Identity,
    expires_at: Instant,
}

/// Read-through fingerprint → identity cache.
pub struct KeyCache {
    loader: Arc<dyn IdentityLoader>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    generation: AtomicU64,
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("len", &self.len())
            .finish()
    }
}

/// Per-fingerprint load lock; forgets the lock when the last holder leaves.
///
/// Clones of the lock are only taken and released under the `in_flight`
/// mutex, so a strong count of one means the map holds the last reference.
struct Flight<'a> {
    cache: &'a KeyCache,
    fingerprint: &'a str,
    lock: Option<Arc<AsyncMutex<()>>>,
}

impl Flight<'_> {
    /// Waits for exclusive access to this fingerprint's load.
    async fn acquire(&self) -> Option<AsyncMutexGuard<'_, ()>> {
        match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let mut in_flight = self
            .cache
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ours = in_flight
            .get(self.fingerprint)
            .is_some_and(|current| Arc::ptr_eq(current, &lock));
        drop(lock);
        let idle = ours
            && in_flight
                .get(self.fingerprint)
                .is_some_and(|current| Arc::strong_count(current) == 1);
        if idle {
            in_flight.remove(self.fingerprint);
        }
    }
}

impl KeyCache {
    pub fn new(loader: Arc<dyn IdentityLoader>, config: CacheConfig) -> Self {
        Self::with_clock(loader, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        loader: Arc<dyn IdentityLoader>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            loader,
            clock,
            config,
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Resolves a fingerprint, loading it from the backing store on a miss.
    pub async fn get(&self, fingerprint: &str) -> Result<Identity, CacheError> {
        if let Some(identity) = self.lookup(fingerprint) {
            return Ok(identity);
        }

        let flight = self.join_flight(fingerprint);
        let _guard = flight.acquire().await;

        // Another caller may have completed the load while we waited.
        if let Some(identity) = self.lookup(fingerprint) {
            return Ok(identity);
        }

        let generation = self.generation.load(Ordering::Acquire);
        debug!(fingerprint, "loading identity for key fingerprint");

        let identity =
            match tokio::time::timeout(self.config.load_timeout, self.loader.load(fingerprint))
                .await
            {
                Err(_) => return Err(CacheError::Timeout(self.config.load_timeout)),
                Ok(Err(e)) => return Err(CacheError::Store(e)),
                Ok(Ok(None)) => return Err(CacheError::NotFound),
                Ok(Ok(Some(identity))) => identity,
            };

        self.insert(fingerprint, &identity, generation);
        Ok(identity)
    }

    /// Drops the entry for one fingerprint.
    ///
    /// Loads already in progress will not populate the cache, whatever
    /// fingerprint they are for.
    pub fn invalidate(&self, fingerprint: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.remove(fingerprint);
    }

    /// Drops every entry. Loads already in progress will not populate the cache.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
        debug!("key cache invalidated");
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|entry| entry.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, fingerprint: &str) -> Option<Identity> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(fingerprint)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.identity.clone())
    }

    fn insert(&self, fingerprint: &str, identity: &Identity, generation: u64) {
        let now = self.clock.now();
        let ttl = self.config.ttl + rand::thread_rng().gen_range(Duration::ZERO..=self.config.jitter);

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(fingerprint, "discarding identity loaded before invalidation");
            return;
        }
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                identity: identity.clone(),
                expires_at: now + ttl,
            },
        );
    }

    fn join_flight<'a>(&'a self, fingerprint: &'a str) -> Flight<'a> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = in_flight
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        Flight {
            cache: self,
            fingerprint,
            lock: Some(lock),
        }
    }
}
