//! Fault-Tolerant Call Wrapper
//!
//! Wraps every call to a rate-limited remote API so scheduled work degrades
//! instead of crashing the process:
//! - Rate limits: sleep until the server's reset, then retry
//! - Duplicate-action rejections ("already following"): reported as success
//! - Timeouts / capacity errors: fixed cooldown, then retry
//! - Anything else: propagated on first occurrence
//!
//! Only the calling task sleeps; other jobs keep running.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;

/// Classification of remote errors for recovery selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Too many requests, carries a reset-after duration
    RateLimited,
    /// The requested state already holds (already followed/favorited)
    AlreadyApplied,
    /// Execution timeout or capacity exhaustion
    Transient,
    /// Not recognized, never retried
    Unrecognized,
}

impl ErrorClass {
    /// Classify an error from its message
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("too many requests") {
            Self::RateLimited
        } else if lower.contains("already") {
            Self::AlreadyApplied
        } else if ["execution", "capacity", "timed out"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Self::Transient
        } else {
            Self::Unrecognized
        }
    }

    /// Whether the wrapper sleeps and retries this class
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::AlreadyApplied => "already_applied",
            Self::Transient => "transient",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors the wrapper knows how to classify
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// Server-provided wait before the next attempt (rate limits only)
    fn reset_in(&self) -> Option<Duration> {
        None
    }
}

impl Classify for ApiError {
    fn class(&self) -> ErrorClass {
        match self {
            ApiError::RateLimited { .. } => ErrorClass::RateLimited,
            other => ErrorClass::from_message(&other.to_string()),
        }
    }

    fn reset_in(&self) -> Option<Duration> {
        ApiError::reset_in(self)
    }
}

/// Retry policy for one wrapper
#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// Retryable failures tolerated before giving up
    pub max_retries: u32,
    /// Sleep after a timeout/capacity error
    pub timeout_cooldown: Duration,
    /// Rate-limit sleep when the server sends no reset time
    pub rate_limit_fallback: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_cooldown: Duration::from_secs(30),
            rate_limit_fallback: Duration::from_secs(15 * 60),
        }
    }
}

/// Attempt counter scoped to a single `call` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub max_attempts: u32,
}

impl RetryState {
    fn new(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_retries.saturating_add(1),
        }
    }

    fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Successful result of a wrapped call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    /// The operation ran and returned a value
    Completed(T),
    /// The server rejected the action because its effect already holds
    AlreadyApplied,
}

impl<T> CallOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::AlreadyApplied => None,
        }
    }

    pub fn is_already_applied(&self) -> bool {
        matches!(self, Self::AlreadyApplied)
    }
}

/// Failed wrapped call, with enough context to diagnose from the log alone
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s) [{class}]: {source}")]
pub struct CallError<E: std::error::Error + 'static> {
    pub operation: String,
    pub class: ErrorClass,
    pub attempts: u32,
    /// True when a retryable error ran out of attempts
    pub exhausted: bool,
    #[source]
    pub source: E,
}

/// Why the retry loop stopped without a value
enum Stop<E: std::error::Error + 'static> {
    /// Duplicate-action rejection; success for writes, failure for reads
    Duplicate { err: E, state: RetryState },
    Failed(CallError<E>),
}

/// Counters shared by every clone of a wrapper
#[derive(Debug, Default)]
struct CallMetrics {
    calls: AtomicU64,
    successful: AtomicU64,
    retried: AtomicU64,
    already_applied: AtomicU64,
    failed: AtomicU64,
}

/// Fault-tolerant wrapper around remote calls
#[derive(Clone)]
pub struct CallWrapper {
    policy: CallPolicy,
    metrics: Arc<CallMetrics>,
}

impl CallWrapper {
    pub fn new(policy: CallPolicy) -> Self {
        Self {
            policy,
            metrics: Arc::new(CallMetrics::default()),
        }
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// Run `operation` with classified recovery
    ///
    /// The attempt counter starts fresh on every invocation.
    pub async fn call<T, E, F, Fut>(
        &self,
        name: &str,
        operation: F,
    ) -> Result<CallOutcome<T>, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::error::Error + 'static,
    {
        match self.run(name, operation).await {
            Ok(value) => Ok(CallOutcome::Completed(value)),
            Err(Stop::Duplicate { err, .. }) => {
                warn!("{}: {} (treated as success)", name, err);
                self.metrics.already_applied.fetch_add(1, Ordering::Relaxed);
                Ok(CallOutcome::AlreadyApplied)
            }
            Err(Stop::Failed(e)) => Err(e),
        }
    }

    /// Run a read with the same recovery as [`call`](Self::call)
    ///
    /// A read has no effect that can already hold, so a duplicate-action
    /// rejection fails the call instead of standing in for an empty result.
    pub async fn fetch<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::error::Error + 'static,
    {
        match self.run(name, operation).await {
            Ok(value) => Ok(value),
            Err(Stop::Duplicate { err, state }) => {
                error!(
                    operation = name,
                    attempts = state.attempts,
                    "Read rejected: {}",
                    err
                );
                Err(self.fail(name, ErrorClass::AlreadyApplied, state, false, err))
            }
            Err(Stop::Failed(e)) => Err(e),
        }
    }

    async fn run<T, E, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, Stop<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::error::Error + 'static,
    {
        self.metrics.calls.fetch_add(1, Ordering::Relaxed);
        let mut state = RetryState::new(self.policy.max_retries);

        loop {
            state.attempts += 1;

            let err = match operation().await {
                Ok(value) => {
                    self.metrics.successful.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = err.class();
            match class {
                ErrorClass::AlreadyApplied => return Err(Stop::Duplicate { err, state }),
                ErrorClass::Unrecognized => {
                    error!(
                        operation = name,
                        attempts = state.attempts,
                        "Unhandled remote error: {}",
                        err
                    );
                    return Err(Stop::Failed(self.fail(name, class, state, false, err)));
                }
                ErrorClass::RateLimited | ErrorClass::Transient => {}
            }

            if state.exhausted() {
                warn!(
                    operation = name,
                    class = %class,
                    attempts = state.attempts,
                    "Giving up: {}",
                    err
                );
                return Err(Stop::Failed(self.fail(name, class, state, true, err)));
            }

            let delay = match class {
                ErrorClass::RateLimited => {
                    let delay = err.reset_in().unwrap_or(self.policy.rate_limit_fallback);
                    info!(
                        "RATE: {} sleeping for ~{} minutes (attempt {}/{})",
                        name,
                        delay.as_secs() / 60,
                        state.attempts,
                        state.max_attempts
                    );
                    delay
                }
                _ => {
                    warn!(
                        "{}: timeout? {} - sleeping for {}s (attempt {}/{})",
                        name,
                        err,
                        self.policy.timeout_cooldown.as_secs(),
                        state.attempts,
                        state.max_attempts
                    );
                    self.policy.timeout_cooldown
                }
            };

            self.metrics.retried.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
            debug!("Retrying {} (attempt {})", name, state.attempts + 1);
        }
    }

    fn fail<E: std::error::Error + 'static>(
        &self,
        name: &str,
        class: ErrorClass,
        state: RetryState,
        exhausted: bool,
        source: E,
    ) -> CallError<E> {
        self.metrics.failed.fetch_add(1, Ordering::Relaxed);
        CallError {
            operation: name.to_string(),
            class,
            attempts: state.attempts,
            exhausted,
            source,
        }
    }

    /// Snapshot of call statistics
    pub fn stats(&self) -> CallStats {
        CallStats {
            calls: self.metrics.calls.load(Ordering::Relaxed),
            successful: self.metrics.successful.load(Ordering::Relaxed),
            retried: self.metrics.retried.load(Ordering::Relaxed),
            already_applied: self.metrics.already_applied.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for CallWrapper {
    fn default() -> Self {
        Self::new(CallPolicy::default())
    }
}

/// Statistics for wrapped calls
#[derive(Debug, Clone)]
pub struct CallStats {
    pub calls: u64,
    pub successful: u64,
    pub retried: u64,
    pub already_applied: u64,
    pub failed: u64,
}

impl CallStats {
    /// Format for display
    pub fn format(&self) -> String {
        format!(
            "{} calls ({} ok, {} already applied, {} retries, {} failed)",
            self.calls, self.successful, self.already_applied, self.retried, self.failed
        )
    }
}
