//! Retry policies for subscribe and update requests.
//!
//! A policy maps the failure history of one request type to the time to wait
//! before the next attempt. The client keeps one retry counter per request
//! type and resets it after any success of that type.

use serde::Deserialize;
use std::time::Duration;

/// Coarse classification of why a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No response within the exchange or liveness timeout.
    Timeout,
    /// The transport could not send the request.
    Transport,
    /// The peer answered with a failure status report.
    PeerRejected,
    /// The peer sent something that could not be processed.
    MalformedMessage,
    /// A local pool or path set ran out of room.
    ResourceExhausted,
    /// The binding failed or could not be prepared.
    Binding,
    /// The application supplied invalid parameters.
    InvalidParameters,
    /// Local data may have diverged from the publisher.
    PotentialDataLoss,
}

/// Which kind of request is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// A subscribe request.
    Subscription,
    /// An update request.
    Update,
}

/// Input to a [`ResubscribePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribeAttempt {
    /// Why the last attempt failed.
    pub reason: FailureKind,
    /// Consecutive failures before this one, starting at 0.
    pub retry_count: u32,
    /// The request being retried.
    pub request_type: RequestType,
}

/// Computes the wait before the next attempt.
pub trait ResubscribePolicy: Send {
    /// Interval to wait before retrying.
    fn next_interval(&mut self, attempt: &ResubscribeAttempt) -> Duration;
}

impl<F> ResubscribePolicy for F
where
    F: FnMut(&ResubscribeAttempt) -> Duration + Send,
{
    fn next_interval(&mut self, attempt: &ResubscribeAttempt) -> Duration {
        self(attempt)
    }
}

fn default_base_ms() -> u64 {
    1_000
}

fn default_max_wait_ms() -> u64 {
    300_000
}

fn default_jitter_ms() -> u64 {
    5_000
}

/// Backoff parameters as read from configuration, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BackoffConfig {
    /// Wait before the first retry.
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    /// Upper bound of the exponential part.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Upper bound of the random part added to every interval.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_wait_ms: default_max_wait_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Exponential backoff with a cap and random jitter.
///
/// Formula: min(max_wait, base * 2^retry_count) + random(0..=jitter)
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_wait: Duration,
    jitter: Duration,
}

impl ExponentialBackoff {
    /// Highest exponent applied to the base.
    const MAX_EXPONENT: u32 = 16;

    /// Create a policy.
    pub fn new(base: Duration, max_wait: Duration, jitter: Duration) -> Self {
        Self {
            base,
            max_wait,
            jitter,
        }
    }

    /// The same policy without jitter, for deterministic intervals.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = Duration::ZERO;
        self
    }

    /// The interval without jitter for a given retry count.
    pub fn bound(&self, retry_count: u32) -> Duration {
        let factor = 1u32 << retry_count.min(Self::MAX_EXPONENT);
        self.base.saturating_mul(factor).min(self.max_wait)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        BackoffConfig::default().into()
    }
}

impl From<BackoffConfig> for ExponentialBackoff {
    fn from(config: BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_wait_ms),
            Duration::from_millis(config.jitter_ms),
        )
    }
}

impl ResubscribePolicy for ExponentialBackoff {
    fn next_interval(&mut self, attempt: &ResubscribeAttempt) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        self.bound(attempt.retry_count) + Duration::from_millis(random_below(jitter_ms))
    }
}

/// Random value in `0..=max`. Falls back to 0 if the OS source fails.
fn random_below(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % (max.saturating_add(1))
}
