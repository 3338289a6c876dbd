// Retry policy for segment fetching: a fixed attempt budget with a fixed
// delay between attempts, both configurable.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Configuration for retry behavior.
///
/// The delay is flat, not exponential; both knobs are configurable.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per segment, including the first.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Sleep the backoff interval, racing cancellation.
    ///
    /// Returns `Err(Cancelled)` if the token fires before the delay elapses,
    /// so a worker never sits out a backoff for a run that is already being
    /// torn down.
    pub async fn sleep_backoff(&self, token: &CancellationToken) -> Result<(), EngineError> {
        tokio::select! {
            _ = token.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(self.backoff) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_the_fixed_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn backoff_sleep_completes_when_not_cancelled() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(5),
        };
        let token = CancellationToken::new();
        assert!(policy.sleep_backoff(&token).await.is_ok());
    }

    #[tokio::test]
    async fn backoff_sleep_aborts_on_cancellation() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(60),
        };
        let token = CancellationToken::new();
        token.cancel();
        let result = policy.sleep_backoff(&token).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
