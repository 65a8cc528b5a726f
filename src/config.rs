//! Registry Configuration
//!
//! Scalar settings consumed once when the registry is constructed.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default lifetime of an endpoint registration
pub const DEFAULT_EXPIRE_PERIOD: Duration = Duration::from_secs(60);

/// Smallest lifetime the registry will assign
pub const MIN_EXPIRE_PERIOD: Duration = Duration::from_millis(100);

/// Upper bound on how long the sweeper sleeps between passes
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Events buffered per watcher before it is disconnected
pub const DEFAULT_WATCH_BUFFER: usize = 1024;

/// Default lifetime of the identity token recorded in path segments
pub const DEFAULT_MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(600);

/// Configuration for the in-memory registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Name of this registry instance (used in call paths)
    pub name: String,
    /// Default and maximum lifetime of an endpoint registration
    pub expire_period: Duration,
    /// Upper bound on eviction latency
    pub sweep_interval: Duration,
    /// Per-watcher event buffer
    pub watch_buffer: usize,
    /// Lifetime of tokens recorded in path segments
    pub max_token_lifetime: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "registry".to_string(),
            expire_period: DEFAULT_EXPIRE_PERIOD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            watch_buffer: DEFAULT_WATCH_BUFFER,
            max_token_lifetime: DEFAULT_MAX_TOKEN_LIFETIME,
        }
    }
}

impl RegistryConfig {
    pub fn with_expire_period(mut self, expire_period: Duration) -> Self {
        self.expire_period = expire_period;
        self
    }

    /// Lifetime actually applied to registrations.
    ///
    /// Zero falls back to the default; anything else is raised to the minimum.
    pub fn effective_expire_period(&self) -> Duration {
        if self.expire_period.is_zero() {
            DEFAULT_EXPIRE_PERIOD
        } else {
            self.expire_period.max(MIN_EXPIRE_PERIOD)
        }
    }

    /// Check the configuration for values the registry cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Configuration("registry name must not be empty".into()));
        }
        if self.watch_buffer == 0 {
            return Err(Error::Configuration("watch buffer must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Configuration("sweep interval must be positive".into()));
        }
        Ok(())
    }
}
