//! Error types for the fallible edges of the crate.
//!
//! Cache operations themselves never fail: a miss and an expired bucket are
//! both `None`. Only configuration loading and the background sweeper
//! lifecycle can report errors.

use thiserror::Error;

/// Errors raised while reading cache configuration from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("invalid value {value:?} for {var}: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    /// A timeout or interval of zero was configured
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

/// Errors raised when starting the background sweeper.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SweepError {
    /// `start` was called outside of a Tokio runtime
    #[error("the sweeper requires a Tokio runtime; call start() from within one")]
    NoRuntime,

    /// A zero sweep interval was configured
    #[error("the sweep interval must be greater than zero")]
    ZeroInterval,

    /// The sweeper task for this registry is already running
    #[error("the sweeper is already running")]
    AlreadyRunning,
}
