//! Bounded retry-with-delay polling
//!
//! Used to wait for eventually-consistent server state such as proxy
//! provisioning or test-run completion.

use std::future::Future;
use std::time::Duration;
use testdroid_core::{Result, TestdroidError};
use tracing::debug;

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Upper bound on the time spent sleeping between attempts.
    pub fn budget(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }
}

impl Default for PollPolicy {
    /// 30 attempts, 5 seconds apart.
    fn default() -> Self {
        Self::new(30, Duration::from_secs(5))
    }
}

/// Run `action` until `is_acceptable` accepts its result.
///
/// Sleeps `policy.delay` between attempts, never after the last one. An
/// error from `action` stops polling and is returned as is; running out of
/// attempts yields [`TestdroidError::PollTimeout`] naming `resource`.
pub async fn poll_until<T, F, Fut, P>(
    resource: &str,
    policy: PollPolicy,
    mut action: F,
    is_acceptable: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&T) -> bool,
{
    if policy.max_attempts == 0 {
        return Err(TestdroidError::InvalidInput(
            "Poll policy needs at least one attempt".to_string(),
        ));
    }

    for attempt in 1..=policy.max_attempts {
        debug!(
            "Waiting for {}: attempt {} of {}",
            resource, attempt, policy.max_attempts
        );
        let result = action().await?;
        if is_acceptable(&result) {
            return Ok(result);
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(TestdroidError::PollTimeout {
        resource: resource.to_string(),
        attempts: policy.max_attempts,
    })
}
