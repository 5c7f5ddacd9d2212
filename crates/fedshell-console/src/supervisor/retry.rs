//! Open-retry policy for shell streams.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::registry::SessionId;
use crate::shell::{ShellConnector, ShellError, ShellStream, TargetRef, TerminalSize};

/// Exponential backoff between shell open attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_possible_wrap
        )]
        let delay = {
            let base_ms = self.initial_delay.as_millis() as f64;
            let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
            let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
            Duration::from_millis(capped_ms as u64)
        };
        delay
    }

    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Wraps a connector and retries opens that failed with
/// [`ShellError::TargetUnreachable`]. Rejections are returned at once.
pub struct RetryingConnector {
    inner: Arc<dyn ShellConnector>,
    policy: RetryPolicy,
}

impl RetryingConnector {
    pub fn new(inner: Arc<dyn ShellConnector>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ShellConnector for RetryingConnector {
    async fn open(
        &self,
        session_id: SessionId,
        target: &TargetRef,
        size: TerminalSize,
    ) -> Result<ShellStream, ShellError> {
        let mut attempt = 0;
        loop {
            match self.inner.open(session_id, target, size).await {
                Err(e) if e.is_retryable() && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        %session_id,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Shell open failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
