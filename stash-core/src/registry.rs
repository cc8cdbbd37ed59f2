use dashmap::DashMap;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::config::SweeperConfig;
use crate::error::SweepError;
use crate::store::BucketTable;

/// A bucket table as seen by the registry, with its value type erased.
trait SweepTable: Send + Sync {
    fn sweep(&self, now: u64) -> usize;

    fn len(&self) -> usize;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<V> SweepTable for BucketTable<V>
where
    V: Send + Sync + 'static,
{
    fn sweep(&self, now: u64) -> usize {
        BucketTable::sweep(self, now)
    }

    fn len(&self) -> usize {
        BucketTable::len(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

struct RegistryInner {
    /// Tables per garbage-collector category, one per value type
    categories: DashMap<String, Vec<Arc<dyn SweepTable>>>,
    clock: Arc<dyn Clock>,
    /// Sender half of the running sweeper's shutdown channel
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl RegistryInner {
    fn sweep(&self, now: u64) -> usize {
        self.categories
            .iter()
            .map(|category| category.value().iter().map(|t| t.sweep(now)).sum::<usize>())
            .sum()
    }
}

/// Host-owned registry of cache categories and their periodic sweeper.
///
/// Stores join a category through [`Store::initialize`](crate::Store::initialize).
/// Stores in the same category with the same value type share one bucket
/// table. The host decides when sweeping happens: call [`SweepRegistry::sweep`]
/// directly, or [`SweepRegistry::start`] a background task on a Tokio runtime.
///
/// Cloning yields another handle to the same registry. The background task
/// only holds a weak reference, so it stops once every handle is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use stash_core::{CacheConfig, CacheOptions, Store, SweepRegistry, SweeperConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = SweepRegistry::new();
///     registry
///         .start(SweeperConfig::default().with_interval(Duration::from_secs(30)))
///         .unwrap();
///
///     let defaults = CacheConfig::default().with_gc_type("sessions");
///     let sessions: Store = Store::initialize(CacheOptions::new(), &defaults, &registry);
///     sessions.set("sid:42", serde_json::json!({"user": 1}));
/// }
/// ```
#[derive(Clone)]
pub struct SweepRegistry {
    inner: Arc<RegistryInner>,
}

impl SweepRegistry {
    /// Creates an empty registry reading the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty registry reading `clock`.
    ///
    /// Stores initialized against this registry use the same clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                categories: DashMap::new(),
                clock,
                shutdown_tx: Mutex::new(None),
            }),
        }
    }

    /// Returns the clock shared with stores initialized against this registry
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// Returns the shared table for `gc_type`, creating it on first use.
    pub(crate) fn table<V>(&self, gc_type: &str) -> Arc<BucketTable<V>>
    where
        V: Send + Sync + 'static,
    {
        let mut tables = self
            .inner
            .categories
            .entry(gc_type.to_string())
            .or_default();

        for table in tables.iter() {
            if let Ok(table) = Arc::clone(table).into_any().downcast::<BucketTable<V>>() {
                return table;
            }
        }

        let table = Arc::new(BucketTable::<V>::new());
        tables.push(Arc::clone(&table) as Arc<dyn SweepTable>);
        tracing::info!(gc_type, "registered cache category");
        table
    }

    /// Returns the names of all registered categories, sorted
    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .categories
            .iter()
            .map(|category| category.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Returns the number of buckets held across every category
    pub fn bucket_count(&self) -> usize {
        self.inner
            .categories
            .iter()
            .map(|category| category.value().iter().map(|t| t.len()).sum::<usize>())
            .sum()
    }

    /// Sweeps every registered table once against `now`.
    ///
    /// Returns the total number of buckets removed.
    pub fn sweep(&self, now: u64) -> usize {
        let removed = self.inner.sweep(now);
        tracing::debug!(removed, "registry sweep");
        removed
    }

    /// Sweeps against the registry's clock
    pub fn sweep_now(&self) -> usize {
        self.sweep(self.inner.clock.now_millis())
    }

    /// Spawns the background task that sweeps every `config.interval`.
    ///
    /// # Errors
    ///
    /// - [`SweepError::NoRuntime`] outside of a Tokio runtime
    /// - [`SweepError::ZeroInterval`] for a zero interval
    /// - [`SweepError::AlreadyRunning`] if a sweeper is already running
    pub fn start(&self, config: SweeperConfig) -> Result<(), SweepError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SweepError::NoRuntime)?;
        if config.interval.is_zero() {
            return Err(SweepError::ZeroInterval);
        }

        let mut slot = self
            .inner
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(SweepError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *slot = Some(shutdown_tx);

        runtime.spawn(Self::sweep_task(
            Arc::downgrade(&self.inner),
            config.interval,
            shutdown_rx,
        ));
        tracing::info!(interval_secs = config.interval.as_secs_f64(), "sweeper started");
        Ok(())
    }

    /// Returns `true` while a background sweeper is running
    pub fn is_running(&self) -> bool {
        self.inner
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Stops the background sweeper, if any.
    pub fn shutdown(&self) {
        let tx = self
            .inner
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
    }

    async fn sweep_task(
        inner: Weak<RegistryInner>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; wait a full interval instead
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    let removed = inner.sweep(inner.clock.now_millis());
                    if removed > 0 {
                        tracing::debug!(removed, "background sweep");
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender means the registry went away
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("sweeper stopped");
    }
}

impl Default for SweepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SweepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepRegistry")
            .field("categories", &self.categories())
            .field("clock", &self.inner.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, CacheOptions};
    use crate::store::Store;
    use serde_json::json;

    const START: u64 = 1_700_000_000_000;

    fn create_test_registry() -> (SweepRegistry, ManualClock) {
        let clock = ManualClock::new(START);
        (SweepRegistry::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_store_without_gc_type_is_not_registered() {
        let (registry, clock) = create_test_registry();
        let store: Store = Store::initialize(
            CacheOptions::new().gc_type(""),
            &CacheConfig::default(),
            &registry,
        );
        store.set_with_timeout("a", json!(1), 1);
        clock.advance(Duration::from_secs(10));

        assert!(registry.categories().is_empty());
        assert_eq!(registry.sweep_now(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_default_config_joins_base_category() {
        let (registry, clock) = create_test_registry();
        let store: Store = Store::initialize(CacheOptions::new(), &CacheConfig::default(), &registry);
        store.set_with_timeout("written-once", json!(1), 1);

        clock.advance(Duration::from_secs(10));

        assert_eq!(registry.categories(), vec!["base".to_string()]);
        assert_eq!(registry.sweep_now(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_same_category_shares_buckets() {
        let (registry, _) = create_test_registry();
        let defaults = CacheConfig::default().with_gc_type("pages");

        let first: Store = Store::initialize(CacheOptions::new(), &defaults, &registry);
        let second: Store = Store::initialize(CacheOptions::new(), &defaults, &registry);
        first.set("home", json!("<html/>"));

        assert_eq!(second.get("home"), Some(json!("<html/>")));
        assert_eq!(registry.categories(), vec!["pages".to_string()]);
        assert_eq!(registry.bucket_count(), 1);
    }

    #[test]
    fn test_distinct_categories_are_isolated() {
        let (registry, _) = create_test_registry();
        let defaults = CacheConfig::default();

        let pages: Store =
            Store::initialize(CacheOptions::new().gc_type("pages"), &defaults, &registry);
        let sessions: Store =
            Store::initialize(CacheOptions::new().gc_type("sessions"), &defaults, &registry);
        pages.set("k", json!(1));

        assert_eq!(sessions.get("k"), None);
        assert_eq!(
            registry.categories(),
            vec!["pages".to_string(), "sessions".to_string()]
        );
    }

    #[test]
    fn test_value_types_do_not_collide_in_category() {
        let (registry, _) = create_test_registry();
        let defaults = CacheConfig::default().with_gc_type("mixed");

        let json_store: Store = Store::initialize(CacheOptions::new(), &defaults, &registry);
        let text_store: Store<String> = Store::initialize(CacheOptions::new(), &defaults, &registry);
        json_store.set("k", json!(1));
        text_store.set("k", "one".to_string());

        assert_eq!(json_store.get("k"), Some(json!(1)));
        assert_eq!(text_store.get("k"), Some("one".to_string()));
        assert_eq!(registry.bucket_count(), 2);
    }

    #[test]
    fn test_registry_sweep_covers_all_categories() {
        let (registry, clock) = create_test_registry();
        let defaults = CacheConfig::default().with_timeout_secs(1);

        let pages: Store =
            Store::initialize(CacheOptions::new().gc_type("pages"), &defaults, &registry);
        let sessions: Store =
            Store::initialize(CacheOptions::new().gc_type("sessions"), &defaults, &registry);
        pages.set("a", json!(1));
        sessions.set("b", json!(2));
        sessions.set_with_timeout("keep", json!(3), 60);

        clock.advance(Duration::from_secs(2));

        assert_eq!(registry.sweep_now(), 2);
        assert_eq!(registry.sweep_now(), 0);
        assert_eq!(pages.len(), 0);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions.get("keep"), Some(json!(3)));
    }

    #[test]
    fn test_store_inherits_registry_clock() {
        let (registry, clock) = create_test_registry();
        let store: Store = Store::initialize(
            CacheOptions::new().timeout_secs(5),
            &CacheConfig::default(),
            &registry,
        );
        store.set("a", json!(1));

        assert_eq!(store.expires_at("a"), Some(START + 5_000));
        clock.advance(Duration::from_secs(6));
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let registry = SweepRegistry::new();
        assert_eq!(
            registry.start(SweeperConfig::default()),
            Err(SweepError::NoRuntime)
        );
        assert!(!registry.is_running());
    }

    #[tokio::test]
    async fn test_start_rejects_zero_interval() {
        let registry = SweepRegistry::new();
        assert_eq!(
            registry.start(SweeperConfig::default().with_interval(Duration::ZERO)),
            Err(SweepError::ZeroInterval)
        );
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let registry = SweepRegistry::new();
        registry.start(SweeperConfig::default()).unwrap();

        assert_eq!(
            registry.start(SweeperConfig::default()),
            Err(SweepError::AlreadyRunning)
        );

        registry.shutdown();
        assert!(!registry.is_running());
        registry.start(SweeperConfig::default()).unwrap();
        assert!(registry.is_running());
        registry.shutdown();
    }

    #[tokio::test]
    async fn test_background_sweep_runs() {
        let registry = SweepRegistry::new();
        registry
            .start(SweeperConfig::default().with_interval(Duration::from_millis(50)))
            .unwrap();

        let defaults = CacheConfig::default().with_gc_type("short");
        let store: Store = Store::initialize(CacheOptions::new(), &defaults, &registry);
        store.set_with_timeout("expire1", json!(1), 0);
        store.set_with_timeout("expire2", json!(2), 0);
        store.set_with_timeout("keep", json!(3), 60);

        assert_eq!(store.len(), 3);

        // Zero-second buckets are stale a millisecond later; allow a few ticks
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("keep"), Some(json!(3)));
        registry.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeping() {
        let clock = ManualClock::new(START);
        let registry = SweepRegistry::with_clock(Arc::new(clock.clone()));
        registry
            .start(SweeperConfig::default().with_interval(Duration::from_millis(10)))
            .unwrap();
        registry.shutdown();

        let defaults = CacheConfig::default().with_gc_type("idle");
        let store: Store = Store::initialize(CacheOptions::new(), &defaults, &registry);
        store.set_with_timeout("a", json!(1), 1);
        clock.advance(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Still held: nothing swept it, and no read has touched it
        assert_eq!(store.len(), 1);
    }
}
