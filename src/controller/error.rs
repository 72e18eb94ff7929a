//! Error types for the PostgresCluster controller

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML rendering error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),

    #[error("Conflicting write: {0}")]
    ConflictError(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{} sub-controller failure(s): {}", .0.len(), summarize(.0))]
    ReconcileFailed(Vec<ChildFailure>),
}

/// A failure of one sub-controller step, kept alongside its siblings
#[derive(Debug)]
pub struct ChildFailure {
    /// Sub-controller that failed (instances, backup, proxy)
    pub component: &'static str,
    /// The child object or repository the step was working on
    pub target: String,
    pub error: Error,
}

impl fmt::Display for ChildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.component, self.target, self.error)
    }
}

fn summarize(failures: &[ChildFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// How the orchestrator reacts to an error
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorClass {
    /// The object is absent; callers treat this as "create"
    NotFound,
    /// Optimistic-concurrency clash; retried quickly
    Conflict,
    /// Network, 5xx, throttling; exponential backoff
    Transient,
    /// Quota or capacity; long backoff
    ResourceExhausted,
    /// The declaration is invalid; never retried until it changes
    Validation,
}

impl ErrorClass {
    /// Metric label value
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Transient => "transient",
            ErrorClass::ResourceExhausted => "resource_exhausted",
            ErrorClass::Validation => "validation",
        }
    }
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::KubeError(kube::Error::Api(ae)) => {
                if ae.message.contains("exceeded quota") {
                    return ErrorClass::ResourceExhausted;
                }
                match ae.code {
                    404 => ErrorClass::NotFound,
                    409 => ErrorClass::Conflict,
                    400 | 422 => ErrorClass::Validation,
                    403 if ae.reason == "Forbidden" && ae.message.contains("quota") => {
                        ErrorClass::ResourceExhausted
                    }
                    _ => ErrorClass::Transient,
                }
            }
            // Network and other client errors are retryable
            Error::KubeError(_) => ErrorClass::Transient,
            Error::SerializationError(_) | Error::YamlError(_) => ErrorClass::Validation,
            Error::MissingObjectKey(_) => ErrorClass::Validation,
            Error::NotFound(_) => ErrorClass::NotFound,
            Error::ValidationError(_) => ErrorClass::Validation,
            Error::TransientError(_) => ErrorClass::Transient,
            Error::ConflictError(_) => ErrorClass::Conflict,
            Error::ResourceExhausted(_) => ErrorClass::ResourceExhausted,
            Error::ReconcileFailed(failures) => failures
                .iter()
                .map(|f| match f.error.class() {
                    // A child vanishing mid-pass is settled by the next pass
                    ErrorClass::NotFound | ErrorClass::Validation => ErrorClass::Transient,
                    class => class,
                })
                .max()
                .unwrap_or(ErrorClass::Transient),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Validation
    }

    /// True for a Kubernetes 404 or an explicit NotFound
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Largest exponent applied to the backoff multiplier
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
    /// Delay before retrying a conflicting write
    pub conflict_delay: Duration,
    /// Quick conflict retries before falling back to exponential backoff
    pub conflict_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
            conflict_delay: Duration::from_secs(1),
            conflict_retries: 3,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_delay_secs = self.max_delay.as_secs_f64();
        // Capped before jitter so a long failure streak cannot overflow to inf
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
        let base_delay_secs =
            (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(max_delay_secs);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay = (base_delay_secs + jitter).clamp(0.0, max_delay_secs);

        if delay.is_finite() {
            Duration::from_secs_f64(delay)
        } else {
            self.max_delay
        }
    }

    /// Requeue delay for an error on the given consecutive attempt.
    ///
    /// Returns `None` for validation errors, which wait for the declaration to change.
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Option<Duration> {
        match error.class() {
            ErrorClass::Validation => None,
            ErrorClass::Conflict if attempt < self.conflict_retries => Some(self.conflict_delay),
            ErrorClass::Conflict => Some(self.delay_for_attempt(attempt - self.conflict_retries)),
            ErrorClass::ResourceExhausted => Some(self.max_delay),
            ErrorClass::Transient | ErrorClass::NotFound => Some(self.delay_for_attempt(attempt)),
        }
    }
}
