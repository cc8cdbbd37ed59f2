use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::bucket::Bucket;
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, CacheOptions};
use crate::registry::SweepRegistry;

/// The bucket map behind one or more stores.
///
/// Stores initialized with the same garbage-collector category share one
/// table through the [`SweepRegistry`].
#[derive(Debug)]
pub(crate) struct BucketTable<V> {
    buckets: DashMap<String, Bucket<V>>,
}

impl<V> BucketTable<V> {
    pub(crate) fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Removes every bucket that expired strictly before `now`.
    pub(crate) fn sweep(&self, now: u64) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            if bucket.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }
}

/// Thread-safe in-process TTL store of named buckets.
///
/// Each bucket holds one or more named values sharing one expiration clock.
/// Without a fixed key, a name is its own bucket. With a fixed key, every
/// name lands in that single bucket and lives or dies with it.
///
/// Expiry happens two ways:
/// - lazily, when a read finds a stale bucket (the bucket is deleted)
/// - actively, when [`Store::sweep`] runs, usually driven by a
///   [`SweepRegistry`] background task
///
/// Values are cloned on read, so callers never alias what the store holds.
/// The default value type is [`serde_json::Value`], whose `Clone` is a deep
/// copy.
///
/// Cloning a `Store` yields another handle on the same buckets.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use stash_core::{CacheConfig, Store};
///
/// let store = Store::with_config(CacheConfig::default().with_timeout_secs(60));
/// store.set("user:1", json!({"name": "Ada"}));
///
/// let mut user = store.get("user:1").unwrap();
/// user["name"] = json!("Grace");
///
/// // The stored copy is untouched.
/// assert_eq!(store.get("user:1"), Some(json!({"name": "Ada"})));
/// ```
pub struct Store<V = Value> {
    table: Arc<BucketTable<V>>,
    config: Arc<CacheConfig>,
    clock: Arc<dyn Clock>,
}

impl<V> Clone for Store<V> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            config: Arc::clone(&self.config),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<V> std::fmt::Debug for Store<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("buckets", &self.table.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<V> Store<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a standalone store with default configuration.
    ///
    /// The store is not registered anywhere, so only lazy expiry applies
    /// unless the host calls [`Store::sweep`] itself.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a standalone store with a fully resolved configuration.
    ///
    /// `gc_type` is ignored here; use [`Store::initialize`] to join a
    /// registry category.
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            table: Arc::new(BucketTable::new()),
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
        }
    }

    /// Merges `options` over `defaults` and joins the registry category
    /// named by the resulting `gc_type`.
    ///
    /// Stores in the same category (and of the same value type) share their
    /// buckets and are swept by the registry. With no `gc_type` the store
    /// gets a private table and is never swept actively. The store reads
    /// time from the registry's clock.
    ///
    /// # Example
    ///
    /// ```rust
    /// use serde_json::json;
    /// use stash_core::{CacheConfig, CacheOptions, Store, SweepRegistry};
    ///
    /// let registry = SweepRegistry::new();
    /// let defaults = CacheConfig::default().with_gc_type("pages");
    ///
    /// let store: Store = Store::initialize(CacheOptions::new().timeout_secs(30), &defaults, &registry);
    /// store.set("home", json!("<html/>"));
    ///
    /// assert_eq!(registry.categories(), vec!["pages".to_string()]);
    /// ```
    pub fn initialize(
        options: CacheOptions,
        defaults: &CacheConfig,
        registry: &SweepRegistry,
    ) -> Self {
        let config = options.merge_over(defaults);
        let table = match &config.gc_type {
            Some(gc_type) => registry.table::<V>(gc_type),
            None => Arc::new(BucketTable::new()),
        };

        Self {
            table,
            config: Arc::new(config),
            clock: registry.clock(),
        }
    }

    /// Replaces the clock this store reads time from.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the resolved configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn bucket_key<'a>(&'a self, name: &'a str) -> &'a str {
        self.config.fixed_key.as_deref().unwrap_or(name)
    }

    /// Retrieves a copy of the value stored under `name`.
    ///
    /// Returns `None` if there is no such value or its bucket has expired;
    /// the two cases are indistinguishable. An expired bucket is deleted.
    /// With `update_expire` set, a hit on a live bucket restarts its clock.
    pub fn get(&self, name: &str) -> Option<V> {
        let key = self.bucket_key(name);
        let now = self.clock.now_millis();

        let found = if self.config.update_expire {
            let mut bucket = self.table.buckets.get_mut(key)?;
            if bucket.is_expired(now) {
                None
            } else {
                bucket.refresh(now);
                Some(bucket.get(name).cloned())
            }
        } else {
            let bucket = self.table.buckets.get(key)?;
            if bucket.is_expired(now) {
                None
            } else {
                Some(bucket.get(name).cloned())
            }
        };

        match found {
            Some(value) => value,
            None => {
                self.expire(key, now);
                None
            }
        }
    }

    /// Checks whether `name` holds a live value.
    ///
    /// Follows the same addressing and lazy expiry as [`Store::get`] but
    /// never restarts the clock and never copies the value.
    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        let key = self.bucket_key(name);
        let now = self.clock.now_millis();

        let live = match self.table.buckets.get(key) {
            Some(bucket) if bucket.is_expired(now) => None,
            Some(bucket) => Some(bucket.get(name).is_some()),
            None => return false,
        };

        live.unwrap_or_else(|| {
            self.expire(key, now);
            false
        })
    }

    /// Returns when the bucket addressed by `name` expires, in milliseconds
    /// since the Unix epoch, or `None` if it is absent or already stale.
    pub fn expires_at(&self, name: &str) -> Option<u64> {
        let now = self.clock.now_millis();
        let bucket = self.table.buckets.get(self.bucket_key(name))?;
        (!bucket.is_expired(now)).then(|| bucket.expire_at())
    }

    /// Stores `value` under `name` with the configured default timeout.
    pub fn set(&self, name: impl Into<String>, value: V) {
        self.set_with_timeout(name, value, self.config.timeout_secs);
    }

    /// Stores `value` under `name`, creating its bucket with a
    /// `timeout_secs` lifetime if none is live.
    ///
    /// Writing into a live bucket leaves its clock alone: the first write
    /// fixes the expiry, later writes under other names in the same bucket
    /// do not extend it.
    pub fn set_with_timeout(&self, name: impl Into<String>, value: V, timeout_secs: u64) {
        let name = name.into();
        let key = self.bucket_key(&name).to_owned();
        let now = self.clock.now_millis();

        match self.table.buckets.entry(key) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                occupied.get_mut().insert(name, value);
            }
            Entry::Occupied(mut occupied) => {
                tracing::debug!(key = %occupied.key(), "replacing expired bucket");
                occupied.insert(Bucket::new(name, value, timeout_secs, now));
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(key = %vacant.key(), timeout_secs, "creating bucket");
                vacant.insert(Bucket::new(name, value, timeout_secs, now));
            }
        }
    }

    /// Removes `name`. Missing names are ignored.
    ///
    /// Without a fixed key the whole bucket goes. With a fixed key only the
    /// named value goes, and the bucket follows once it is empty.
    pub fn remove(&self, name: &str) {
        let Some(key) = self.config.fixed_key.as_deref() else {
            self.table.buckets.remove(name);
            return;
        };

        let emptied = match self.table.buckets.get_mut(key) {
            Some(mut bucket) => {
                bucket.remove(name);
                bucket.is_empty()
            }
            None => false,
        };

        if emptied && self.table.buckets.remove_if(key, |_, b| b.is_empty()).is_some() {
            tracing::debug!(key, "removed emptied bucket");
        }
    }

    /// Removes every bucket whose expiry is strictly before `now`.
    ///
    /// Returns the number of buckets removed. Never refreshes a clock, so
    /// running it twice with the same `now` removes nothing the second time.
    pub fn sweep(&self, now: u64) -> usize {
        let removed = self.table.sweep(now);
        if removed > 0 {
            tracing::debug!(removed, "swept expired buckets");
        }
        removed
    }

    /// Sweeps against the store's own clock.
    pub fn sweep_now(&self) -> usize {
        self.sweep(self.clock.now_millis())
    }

    /// Returns the number of buckets held, including stale ones not yet reclaimed
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.buckets.is_empty()
    }

    /// Drops every bucket in this store's table.
    ///
    /// Stores sharing the table through a registry category see it emptied too.
    pub fn clear(&self) {
        self.table.buckets.clear();
    }

    fn expire(&self, key: &str, now: u64) {
        // Only remove if still stale; another handle may have replaced it.
        if self
            .table
            .buckets
            .remove_if(key, |_, b| b.is_expired(now))
            .is_some()
        {
            tracing::debug!(key, "lazily expired bucket");
        }
    }
}

impl<V> Default for Store<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
