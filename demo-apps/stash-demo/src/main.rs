use anyhow::{ensure, Result};
use serde_json::json;
use stash_core::{CacheConfig, CacheOptions, Store, SweepRegistry, SweeperConfig};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stash_demo=info,stash_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let defaults = match CacheConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("ignoring cache environment: {}", e);
            CacheConfig::default()
        }
    }
    .with_gc_type("demo");

    let registry = SweepRegistry::new();
    registry.start(SweeperConfig::default().with_interval(Duration::from_millis(250)))?;

    tracing::info!("Stash demo");
    tracing::info!("   Default timeout: {}s", defaults.timeout_secs);

    demo_fixed_expiration(&defaults, &registry).await?;
    demo_sliding_expiration(&defaults, &registry).await?;
    demo_fixed_key_bucket(&defaults, &registry)?;
    demo_background_sweep(&defaults, &registry).await?;

    registry.shutdown();
    tracing::info!("All demos passed");

    Ok(())
}

/// A bucket written once dies on schedule no matter how often it is read
async fn demo_fixed_expiration(defaults: &CacheConfig, registry: &SweepRegistry) -> Result<()> {
    tracing::info!("Demo: fixed expiration");

    let store: Store = Store::initialize(CacheOptions::new().timeout_secs(1), defaults, registry);
    store.set("greeting", json!("hello"));

    tokio::time::sleep(Duration::from_millis(600)).await;
    ensure!(store.get("greeting") == Some(json!("hello")), "value should still be live");

    tokio::time::sleep(Duration::from_millis(600)).await;
    ensure!(store.get("greeting").is_none(), "value should have expired");

    tracing::info!("   ✓ reads do not extend a fixed bucket");
    Ok(())
}

/// Each read restarts the clock when `update_expire` is on
async fn demo_sliding_expiration(defaults: &CacheConfig, registry: &SweepRegistry) -> Result<()> {
    tracing::info!("Demo: sliding expiration");

    // Opt out of the sweeper so only reads decide this bucket's fate
    let store: Store = Store::initialize(
        CacheOptions::new().timeout_secs(1).update_expire(true).gc_type(""),
        defaults,
        registry,
    );
    store.set("session", json!({"user": 42, "roles": ["admin"]}));

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(600)).await;
        ensure!(store.get("session").is_some(), "session should slide forward");
    }

    tracing::info!("   ✓ session kept alive for 1.8s on a 1s timeout");
    Ok(())
}

/// Several names share one bucket and one clock under a fixed key
fn demo_fixed_key_bucket(defaults: &CacheConfig, registry: &SweepRegistry) -> Result<()> {
    tracing::info!("Demo: fixed-key bucket");

    let store: Store = Store::initialize(
        CacheOptions::new().fixed_key("profile:7").timeout_secs(30),
        defaults,
        registry,
    );
    store.set("name", json!("Ada"));
    store.set("langs", json!(["rust", "ocaml"]));

    let mut langs = store.get("langs").unwrap_or_default();
    if let Some(list) = langs.as_array_mut() {
        list.clear();
    }
    ensure!(
        store.get("langs") == Some(json!(["rust", "ocaml"])),
        "mutating a returned copy must not touch the store"
    );

    store.remove("name");
    ensure!(store.get("name").is_none(), "name should be gone");
    ensure!(store.get("langs").is_some(), "langs should survive");

    store.remove("langs");
    ensure!(!store.contains_key("langs"), "bucket should be empty");

    tracing::info!("   ✓ shared bucket behaves per name");
    Ok(())
}

/// Buckets nobody reads again are reclaimed by the registry's sweeper
async fn demo_background_sweep(defaults: &CacheConfig, registry: &SweepRegistry) -> Result<()> {
    tracing::info!("Demo: background sweep");

    let store: Store = Store::initialize(CacheOptions::new().gc_type("bulk"), defaults, registry);
    for i in 0..100 {
        store.set_with_timeout(format!("item:{}", i), json!(i), 1);
    }
    store.set_with_timeout("keeper", json!(true), 60);
    ensure!(store.len() == 101, "all buckets should be held");

    tokio::time::sleep(Duration::from_millis(1_600)).await;

    ensure!(
        store.len() == 1,
        "sweeper should leave only the keeper, found {}",
        store.len()
    );
    tracing::info!(
        "   ✓ swept 100 unread buckets, {} held across categories {:?}",
        registry.bucket_count(),
        registry.categories()
    );
    Ok(())
}
