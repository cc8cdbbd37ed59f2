use std::time::Duration;

use crate::error::ConfigError;

/// Default bucket lifetime: six hours
pub const DEFAULT_TIMEOUT_SECS: u64 = 6 * 60 * 60;

/// Garbage-collector category stores join unless they opt out
pub const DEFAULT_GC_TYPE: &str = "base";

/// Default interval between background sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const ENV_TIMEOUT: &str = "STASH_CACHE_TIMEOUT";
const ENV_UPDATE_EXPIRE: &str = "STASH_CACHE_UPDATE_EXPIRE";
const ENV_GC_TYPE: &str = "STASH_CACHE_GC_TYPE";
const ENV_SWEEP_INTERVAL: &str = "STASH_SWEEP_INTERVAL";

/// Resolved configuration of a single store.
///
/// These are the host-wide defaults that [`CacheOptions`] are merged over.
///
/// # Example
///
/// ```rust
/// use stash_core::CacheConfig;
///
/// let config = CacheConfig::default()
///     .with_timeout_secs(300)
///     .with_update_expire(true)
///     .with_gc_type("sessions");
/// assert_eq!(config.gc_type.as_deref(), Some("sessions"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL used when `set` is called without an explicit timeout
    pub timeout_secs: u64,
    /// Whether a successful read extends the bucket's life
    pub update_expire: bool,
    /// Garbage-collector category (default: `"base"`); `None` opts out of
    /// active sweeping
    pub gc_type: Option<String>,
    /// When set, every name is stored in this one bucket
    pub fixed_key: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            update_expire: false,
            gc_type: Some(DEFAULT_GC_TYPE.to_string()),
            fixed_key: None,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TTL used by `set` when no timeout is given
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Sets whether reads extend a bucket's life
    pub fn with_update_expire(mut self, update_expire: bool) -> Self {
        self.update_expire = update_expire;
        self
    }

    /// Sets the sweep category; an empty string opts out of sweeping
    pub fn with_gc_type(mut self, gc_type: impl Into<String>) -> Self {
        self.gc_type = non_empty(gc_type.into());
        self
    }

    /// Routes every name into one bucket; an empty string clears it
    pub fn with_fixed_key(mut self, fixed_key: impl Into<String>) -> Self {
        self.fixed_key = non_empty(fixed_key.into());
        self
    }

    /// Loads defaults from the environment.
    ///
    /// Reads:
    /// - `STASH_CACHE_TIMEOUT` - default TTL in seconds (must be > 0)
    /// - `STASH_CACHE_UPDATE_EXPIRE` - `true`/`false`/`1`/`0`
    /// - `STASH_CACHE_GC_TYPE` - sweep category name (empty opts out)
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TIMEOUT) {
            config.timeout_secs = parse_positive(ENV_TIMEOUT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_UPDATE_EXPIRE) {
            config.update_expire = parse_bool(ENV_UPDATE_EXPIRE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_GC_TYPE) {
            config.gc_type = non_empty(raw);
        }

        Ok(config)
    }
}

/// Per-store overrides, merged over a [`CacheConfig`] at initialization.
///
/// Any field left as `None` falls back to the defaults. An empty string for
/// `fixed_key` or `gc_type` counts as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub timeout_secs: Option<u64>,
    pub update_expire: Option<bool>,
    pub gc_type: Option<String>,
    pub fixed_key: Option<String>,
}

impl CacheOptions {
    /// Creates options that override nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the default TTL
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Overrides sliding expiration
    pub fn update_expire(mut self, update_expire: bool) -> Self {
        self.update_expire = Some(update_expire);
        self
    }

    /// Overrides the sweep category; `""` opts out of sweeping
    pub fn gc_type(mut self, gc_type: impl Into<String>) -> Self {
        self.gc_type = Some(gc_type.into());
        self
    }

    /// Overrides the fixed bucket key; `""` turns fixed-key mode off
    pub fn fixed_key(mut self, fixed_key: impl Into<String>) -> Self {
        self.fixed_key = Some(fixed_key.into());
        self
    }

    /// Applies these options over `defaults`; supplied values win.
    pub fn merge_over(self, defaults: &CacheConfig) -> CacheConfig {
        CacheConfig {
            timeout_secs: self.timeout_secs.unwrap_or(defaults.timeout_secs),
            update_expire: self.update_expire.unwrap_or(defaults.update_expire),
            gc_type: match self.gc_type {
                Some(gc_type) => non_empty(gc_type),
                None => defaults.gc_type.clone(),
            },
            fixed_key: match self.fixed_key {
                Some(fixed_key) => non_empty(fixed_key),
                None => defaults.fixed_key.clone(),
            },
        }
    }
}

/// Configuration for a registry's background sweep task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Interval between sweeps (default: 60 seconds)
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SweeperConfig {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how often the background task sweeps every registered category.
    ///
    /// ```rust
    /// use stash_core::SweeperConfig;
    /// use std::time::Duration;
    ///
    /// let config = SweeperConfig::default().with_interval(Duration::from_secs(30));
    /// ```
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reads `STASH_SWEEP_INTERVAL` (seconds, must be > 0) if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_SWEEP_INTERVAL) {
            config.interval = Duration::from_secs(parse_positive(ENV_SWEEP_INTERVAL, &raw)?);
        }
        Ok(config)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        expected: "a whole number of seconds",
    })?;
    if value == 0 {
        return Err(ConfigError::Zero { var });
    }
    Ok(value)
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            expected: "a boolean",
        }),
    }
}
