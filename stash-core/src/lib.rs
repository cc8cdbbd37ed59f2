//! # Stash Core
//!
//! An in-process key-value cache with TTL (time-to-live) buckets.
//!
//! ## Features
//!
//! - Thread-safe storage using `DashMap`
//! - Named buckets: several values can share one expiration clock
//! - Lazy expiry on read, with the stale bucket deleted as it is found
//! - Active sweeping through a host-owned [`SweepRegistry`]
//! - Fixed or sliding expiration (`update_expire`)
//! - Values are cloned on the way in and out; callers never alias store state
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stash_core::{CacheConfig, CacheOptions, Store, SweepRegistry, SweeperConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Host-wide defaults and the registry that sweeps them
//!     let defaults = CacheConfig::from_env().unwrap_or_default().with_gc_type("app");
//!     let registry = SweepRegistry::new();
//!     registry.start(SweeperConfig::default()).unwrap();
//!
//!     // A store whose reads keep entries alive
//!     let store: Store = Store::initialize(
//!         CacheOptions::new().timeout_secs(60).update_expire(true),
//!         &defaults,
//!         &registry,
//!     );
//!
//!     store.set("user:123", json!({"name": "John Doe"}));
//!     if let Some(user) = store.get("user:123") {
//!         println!("User: {}", user["name"]);
//!     }
//!
//!     store.remove("user:123");
//!
//!     // Manual sweep (also done by the registry's background task)
//!     let removed = store.sweep_now();
//! }
//! ```

mod bucket;
mod clock;
mod config;
mod error;
mod registry;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheOptions, SweeperConfig};
pub use config::{DEFAULT_GC_TYPE, DEFAULT_SWEEP_INTERVAL, DEFAULT_TIMEOUT_SECS};
pub use error::{ConfigError, SweepError};
pub use registry::SweepRegistry;
pub use store::Store;
