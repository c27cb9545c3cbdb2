// Retry with exponential backoff and additive jitter for remote capability calls.
//
// Classification of failures is pluggable (ErrorClassifier) so the string
// matching on provider messages stays isolated from the retry loop.

use crate::config::RetryConfig;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Failure returned by a remote capability.
///
/// Carries the transport status code when there was one. ResilientCall hands
/// this back to the caller exactly as the last attempt produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Terminal classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rate limited or overloaded; worth retrying
    Transient,
    /// Malformed response or unsupported input; surfaced immediately
    Fatal,
    /// Key missing/invalid or quota exhausted; caller must re-prompt for credentials
    Credential,
}

/// Decides how a remote failure should be treated.
pub trait ErrorClassifier: Send + Sync {
    /// True if the call should be attempted again.
    fn is_retryable(&self, error: &RemoteError) -> bool;

    /// True if the failure means the configured credentials are unusable.
    fn is_credential(&self, error: &RemoteError) -> bool;

    /// Classification of a failure that is final for the caller.
    fn classify(&self, error: &RemoteError) -> FailureKind {
        if self.is_credential(error) {
            FailureKind::Credential
        } else if self.is_retryable(error) {
            FailureKind::Transient
        } else {
            FailureKind::Fatal
        }
    }
}

/// Status-code and message-substring classifier.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    pub retryable_statuses: Vec<u16>,
    pub retryable_patterns: Vec<String>,
    pub credential_statuses: Vec<u16>,
    pub credential_patterns: Vec<String>,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self {
            retryable_statuses: vec![429, 500, 503, 504],
            retryable_patterns: ["429", "503", "overloaded", "quota"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            credential_statuses: vec![401, 403],
            credential_patterns: [
                "API key",
                "API_KEY",
                "PERMISSION_DENIED",
                "RESOURCE_EXHAUSTED",
                "Requested entity was not found",
                "quota",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ErrorClassifier for PatternClassifier {
    fn is_retryable(&self, error: &RemoteError) -> bool {
        if let Some(status) = error.status {
            if self.retryable_statuses.contains(&status) {
                return true;
            }
        }
        self.retryable_patterns
            .iter()
            .any(|p| error.message.contains(p.as_str()))
    }

    fn is_credential(&self, error: &RemoteError) -> bool {
        if let Some(status) = error.status {
            if self.credential_statuses.contains(&status) {
                return true;
            }
        }
        self.credential_patterns
            .iter()
            .any(|p| error.message.contains(p.as_str()))
    }
}

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform random delay added to each wait
    pub max_jitter: Duration,
    /// Growth factor applied to the base delay after every retry (uncapped)
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_jitter: Duration::from_millis(config.jitter_ms),
            multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Base delays (before jitter) for each retry, in order.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_retries as usize);
        let mut delay = self.base_delay;
        for _ in 0..self.max_retries {
            delays.push(delay);
            delay = delay.mul_f64(self.multiplier);
        }
        delays
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Retry wrapper around any remote operation.
///
/// Holds no per-call state, so one instance can be shared by every caller.
#[derive(Clone)]
pub struct ResilientCall {
    policy: RetryPolicy,
    classifier: Arc<dyn ErrorClassifier>,
}

impl ResilientCall {
    pub fn new(policy: RetryPolicy, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self { policy, classifier }
    }

    /// Default classifier with the given policy.
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self::new(policy, Arc::new(PatternClassifier::default()))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn classifier(&self) -> &Arc<dyn ErrorClassifier> {
        &self.classifier
    }

    /// Runs `operation`, retrying retryable failures.
    ///
    /// A failure is retried while retries remain and the classifier says it is
    /// retryable. Each wait is `base + U(0, max_jitter)` and the base grows by
    /// `multiplier` after every retry. Anything else returns the last error as is.
    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut retries_left = self.policy.max_retries;
        let mut base_delay = self.policy.base_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            attempt,
                            "Remote call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if retries_left == 0 || !self.classifier.is_retryable(&err) {
                        return Err(err);
                    }

                    let delay = base_delay + self.policy.jitter();
                    warn!(
                        operation = operation_name,
                        attempt,
                        retries_left,
                        delay_ms = delay.as_millis() as u64,
                        status = ?err.status,
                        error = %err,
                        "Retryable remote failure, backing off"
                    );
                    tokio::time::sleep(delay).await;

                    retries_left -= 1;
                    base_delay = base_delay.mul_f64(self.policy.multiplier);
                }
            }
        }
    }
}
