//! src/config.rs
//!
//! Configuration for pool behaviour.
//!
//! Example:
//! ```ignore
//! let config = PoolConfig::builder()
//!     .poll_interval(Duration::from_millis(2))
//!     .thread_name("render-worker")
//!     .interrupt_on_timeout(true)
//!     .build();
//! ```
//!
//! # Environment
//! `PoolConfig::from_env()` starts from the defaults and overrides them with:
//! - `TASKPOOL_POLL_INTERVAL_MS`: readiness poll interval in milliseconds
//! - `TASKPOOL_THREAD_NAME`: prefix for controller thread names
//! - `TASKPOOL_STACK_SIZE`: controller thread stack size, decimal or `0x` hex
//! - `TASKPOOL_INTERRUPT_ON_TIMEOUT`: `true`/`false` (also `1`/`0`, `yes`/`no`, `on`/`off`)

use anyhow::{anyhow, Context, Result};
use std::time::Duration;

const ENV_POLL_INTERVAL_MS: &str = "TASKPOOL_POLL_INTERVAL_MS";
const ENV_THREAD_NAME: &str = "TASKPOOL_THREAD_NAME";
const ENV_STACK_SIZE: &str = "TASKPOOL_STACK_SIZE";
const ENV_INTERRUPT_ON_TIMEOUT: &str = "TASKPOOL_INTERRUPT_ON_TIMEOUT";

/// Lower bound for the readiness poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a `Pool`
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How often a controller re-checks `Worker::ready` while its worker is busy.
    /// Shutdown interrupts the wait, so this only bounds readiness latency. Default: 5ms
    pub poll_interval: Duration,
    /// Prefix for controller thread names; threads are named `{prefix}-{id}`.
    pub thread_name: String,
    /// Stack size for controller threads (platform default if unset)
    pub stack_size: Option<usize>,
    /// Whether a submission that times out while waiting for its result also
    /// calls the claimed worker's interrupt hook. The hook fires only if that
    /// submission's job is still running. Default: false
    pub interrupt_on_timeout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            thread_name: "taskpool-worker".to_string(),
            stack_size: None,
            interrupt_on_timeout: false,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Loads configuration from `TASKPOOL_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be an integer, got {:?}", ENV_POLL_INTERVAL_MS, raw))?;
            config.poll_interval = Duration::from_millis(millis);
        }

        if let Some(name) = lookup(ENV_THREAD_NAME) {
            let name = name.trim();
            if name.is_empty() {
                return Err(anyhow!("{} must not be empty", ENV_THREAD_NAME));
            }
            config.thread_name = name.to_string();
        }

        if let Some(raw) = lookup(ENV_STACK_SIZE) {
            let size = parse_size(raw.trim())
                .with_context(|| format!("{} must be a byte count, got {:?}", ENV_STACK_SIZE, raw))?;
            config.stack_size = Some(size);
        }

        if let Some(raw) = lookup(ENV_INTERRUPT_ON_TIMEOUT) {
            config.interrupt_on_timeout = parse_flag(&raw).ok_or_else(|| {
                anyhow!("{} must be a boolean, got {:?}", ENV_INTERRUPT_ON_TIMEOUT, raw)
            })?;
        }

        Ok(config)
    }

    /// Poll interval actually used by controllers (never below 1ms).
    pub(crate) fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }
}

fn parse_size(raw: &str) -> Result<usize> {
    let size = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16)?,
        None => raw.parse()?,
    };
    Ok(size)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for PoolConfig with method chaining
#[derive(Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set the readiness poll interval.
    ///
    /// - Too low: workers that stay busy for long burn CPU on `ready()` checks.
    /// - Too high: a worker that becomes ready waits longer before it can be claimed.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the controller thread name prefix
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Set the controller thread stack size in bytes
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Interrupt the claimed worker when a submission times out waiting for its result.
    pub fn interrupt_on_timeout(mut self, enabled: bool) -> Self {
        self.config.interrupt_on_timeout = enabled;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> PoolConfig {
        self.config
    }
}
