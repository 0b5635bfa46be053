//! Sink configuration.
//!
//! Options are plain fields with documented defaults; `resolve` validates
//! them once at wrap time, applies the environment overrides, and produces
//! the immutable form the coordinator keeps. Environment values that are
//! absent, empty, or not parseable as non-negative integers fall back to
//! the configured value silently.

use crate::disruptor::{Result, SinkError};

/// Smallest supported ring size.
pub const MIN_BUFFER_SIZE: usize = 512;

/// Default ring size.
pub const DEFAULT_BUFFER_SIZE: usize = 16384;

/// Environment variable overriding the consumer's idle wake-up interval.
pub const WAKEUP_MS_ENV: &str = "RINGLOG_WAKEUP_MS";

/// Environment variable overriding the shutdown drain deadline.
pub const SHUTDOWN_TIMEOUT_MS_ENV: &str = "RINGLOG_SHUTDOWN_TIMEOUT_MS";

/// Configuration for [`wrap`].
///
/// [`wrap`]: crate::sink::wrap
#[derive(Debug, Clone)]
pub struct AsyncSinkConfig {
    /// Ring size. Must be at least [`MIN_BUFFER_SIZE`]; values that are not
    /// a power of two are rounded up to the next one.
    pub buffer_size: usize,
    /// Overload policy: block producers at the wrap point instead of
    /// dropping records.
    pub block_when_full: bool,
    /// Newly published events that justify waking a parked consumer.
    pub wake_batch_size: i64,
    /// Events the consumer's spin phase waits to accumulate; also the
    /// barrier's fast-path threshold.
    pub spin_batch_size: i64,
    /// Consumer idle wake-up interval in milliseconds.
    pub wakeup_ms: u64,
    /// Deadline for draining the backlog in `close`, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for AsyncSinkConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            block_when_full: false,
            wake_batch_size: 128,
            spin_batch_size: 32,
            wakeup_ms: 25,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl AsyncSinkConfig {
    /// Set the ring size.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the overload policy.
    pub fn block_when_full(mut self, block: bool) -> Self {
        self.block_when_full = block;
        self
    }

    /// Set the wake batch size.
    pub fn wake_batch_size(mut self, wake_batch_size: i64) -> Self {
        self.wake_batch_size = wake_batch_size;
        self
    }

    /// Set the spin batch size.
    pub fn spin_batch_size(mut self, spin_batch_size: i64) -> Self {
        self.spin_batch_size = spin_batch_size;
        self
    }

    /// Set the idle wake-up interval.
    pub fn wakeup_ms(mut self, wakeup_ms: u64) -> Self {
        self.wakeup_ms = wakeup_ms;
        self
    }

    /// Set the shutdown drain deadline.
    pub fn shutdown_timeout_ms(mut self, shutdown_timeout_ms: u64) -> Self {
        self.shutdown_timeout_ms = shutdown_timeout_ms;
        self
    }

    /// Validate the options and apply environment overrides.
    ///
    /// # Errors
    /// Returns `SinkError::InvalidConfig` when `buffer_size` is below
    /// [`MIN_BUFFER_SIZE`].
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(SinkError::InvalidConfig(self.buffer_size));
        }

        Ok(ResolvedConfig {
            capacity: self.buffer_size.next_power_of_two(),
            block_when_full: self.block_when_full,
            wake_batch_size: self.wake_batch_size,
            spin_batch_size: self.spin_batch_size,
            wakeup_ms: env_override_ms(WAKEUP_MS_ENV, self.wakeup_ms),
            shutdown_timeout_ms: env_override_ms(SHUTDOWN_TIMEOUT_MS_ENV, self.shutdown_timeout_ms),
        })
    }
}

/// Validated, environment-resolved configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Final ring size: a power of two, at least [`MIN_BUFFER_SIZE`].
    pub capacity: usize,
    pub block_when_full: bool,
    pub wake_batch_size: i64,
    pub spin_batch_size: i64,
    pub wakeup_ms: u64,
    pub shutdown_timeout_ms: u64,
}

/// Read a millisecond override from the environment, falling back silently.
fn env_override_ms(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(value) => value.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}
