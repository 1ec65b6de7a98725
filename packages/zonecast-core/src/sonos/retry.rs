//! Retry logic for transient control API errors.
//!
//! Provides exponential backoff for requests that fail with timeouts,
//! connection errors, rate limiting or server-side failures. Commands that
//! create or load something are only retried when the platform cannot have
//! acted on the failed attempt.

use std::time::Duration;

use super::control::{ControlError, ControlResult};

/// Retry delays for transient control API errors (exponential backoff).
const RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];

/// Which failures a request may be retried after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryPolicy {
    /// Reads and commands that are safe to repeat (play, pause).
    Idempotent,
    /// Group creation and content loads: repeating one that already landed
    /// creates a second group or restarts playback.
    NotApplied,
}

impl RetryPolicy {
    fn allows(self, err: &ControlError) -> bool {
        match self {
            RetryPolicy::Idempotent => err.is_transient(),
            RetryPolicy::NotApplied => err.was_not_applied(),
        }
    }
}

/// Longest time one request can take, every attempt timing out.
pub fn worst_case_duration(per_attempt: Duration) -> Duration {
    let attempts = RETRY_DELAYS_MS.len() as u32 + 1;
    let backoff: u64 = RETRY_DELAYS_MS.iter().sum();
    per_attempt * attempts + Duration::from_millis(backoff)
}

/// Executes a control API request, retrying the failures `policy` allows.
///
/// Other errors are returned immediately.
///
/// # Arguments
/// * `action` - Action name for logging
/// * `policy` - Which failures may be retried
/// * `operation` - Closure that performs the request
pub(crate) async fn with_retry<T, F, Fut>(
    action: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> ControlResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ControlResult<T>>,
{
    let mut last_error: Option<ControlError> = None;
    for (attempt, &delay_ms) in std::iter::once(&0)
        .chain(RETRY_DELAYS_MS.iter())
        .enumerate()
    {
        if attempt > 0 {
            log::info!(
                "[Sonos] Retrying {} (attempt {}/{}) after {}ms",
                action,
                attempt + 1,
                RETRY_DELAYS_MS.len() + 1,
                delay_ms
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        match operation().await {
            Ok(r) => return Ok(r),
            Err(e) if policy.allows(&e) => {
                log::warn!("[Sonos] {} transient error: {}", action, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| ControlError::Parse(format!("{action}: retries exhausted"))))
}
