//! Transport-level retry with exponential backoff.
//!
//! Used inside the FCM transport for transient responses (429 rate limiting,
//! 5xx server errors). It honors `Retry-After` when present. When retries run
//! out the last outcome is handed back unchanged, so the caller still sees the
//! provider's rejection. The dispatch engine itself never retries.

use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Retries after the first attempt, unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// First delay of the exponential schedule.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound for any single delay, including server-supplied ones.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// How often and how patiently to retry transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Doubles after every retry, capped at [`MAX_BACKOFF`].
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        }
    }
}

/// What one attempt produced.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Final outcome, accepted or rejected.
    Done(T),
    /// Transient failure (429, 5xx).
    Retriable {
        status_code: u16,
        /// Parsed `Retry-After`, if the response carried one.
        retry_after: Option<Duration>,
        /// Returned as-is once retries run out.
        outcome: T,
    },
}

/// Final value plus the number of retries it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Exponential delay schedule.
#[derive(Debug, Clone)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new(initial: Duration) -> Self {
        Self {
            next: initial.min(MAX_BACKOFF),
        }
    }

    /// Delay before the next attempt. A server hint replaces the scheduled
    /// delay for this step only; the schedule advances either way.
    fn delay(&mut self, retry_after: Option<Duration>) -> Duration {
        let scheduled = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        retry_after.unwrap_or(scheduled).min(MAX_BACKOFF)
    }
}

/// Run `operation` until it returns [`Attempt::Done`] or retries run out.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    service_name: &str,
    mut operation: F,
) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Attempt<T>>,
{
    let mut backoff = Backoff::new(config.initial_backoff);
    let mut retries = 0;

    loop {
        let (status_code, retry_after, outcome) = match operation().await {
            Attempt::Done(value) => return Retried { value, retries },
            Attempt::Retriable {
                status_code,
                retry_after,
                outcome,
            } => (status_code, retry_after, outcome),
        };

        if retries >= config.max_retries {
            warn!(
                service = service_name,
                status_code, retries, "Giving up on transient push failure"
            );
            return Retried {
                value: outcome,
                retries,
            };
        }

        retries += 1;
        let delay = backoff.delay(retry_after);
        warn!(
            service = service_name,
            status_code,
            retry = retries,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Transient push failure, backing off"
        );
        sleep(delay).await;
    }
}

/// Parse a `Retry-After` header in its delay-seconds form. HTTP-date values
/// yield `None` and the exponential schedule applies.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    header_value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(3));
        assert_eq!(backoff.delay(None), Duration::from_secs(3));
        assert_eq!(backoff.delay(None), Duration::from_secs(6));
        assert_eq!(backoff.delay(None), MAX_BACKOFF);
        assert_eq!(backoff.delay(None), MAX_BACKOFF);
    }

    #[test]
    fn test_backoff_prefers_server_hint() {
        let mut backoff = Backoff::new(Duration::from_millis(100));
        assert_eq!(
            backoff.delay(Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        // The schedule still advanced underneath the hint.
        assert_eq!(backoff.delay(None), Duration::from_millis(200));
        assert_eq!(backoff.delay(Some(Duration::from_secs(3600))), MAX_BACKOFF);
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.initial_backoff, DEFAULT_INITIAL_BACKOFF);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("60")), Some(Duration::from_secs(60)));
        assert_eq!(parse_retry_after(Some(" 0 ")), Some(Duration::from_secs(0)));
        assert_eq!(parse_retry_after(None), None);
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
    }

    #[tokio::test]
    async fn test_with_retry_done_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(&fast_config(3), "test", || {
            let count = counter.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Attempt::Done("accepted")
            }
        })
        .await;

        assert_eq!(result.value, "accepted");
        assert_eq!(result.retries, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(&fast_config(3), "test", || {
            let count = counter.clone();
            async move {
                let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Attempt::Retriable {
                        status_code: 503,
                        retry_after: None,
                        outcome: "unavailable",
                    }
                } else {
                    Attempt::Done("accepted")
                }
            }
        })
        .await;

        assert_eq!(result.value, "accepted");
        assert_eq!(result.retries, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_returns_last_outcome_when_exhausted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(&fast_config(2), "test", || {
            let count = counter.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Attempt::Retriable {
                    status_code: 429,
                    retry_after: None,
                    outcome: "QUOTA_EXCEEDED",
                }
            }
        })
        .await;

        assert_eq!(result.value, "QUOTA_EXCEEDED");
        assert_eq!(result.retries, 2);
        // Initial attempt + max_retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_zero_retries() {
        let result = with_retry(&fast_config(0), "test", || async {
            Attempt::Retriable {
                status_code: 500,
                retry_after: None,
                outcome: "INTERNAL",
            }
        })
        .await;

        assert_eq!(result.value, "INTERNAL");
        assert_eq!(result.retries, 0);
    }

    #[tokio::test]
    async fn test_with_retry_uses_retry_after() {
        let config = RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_secs(100),
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let start = std::time::Instant::now();

        let _ = with_retry(&config, "test", || {
            let count = counter.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    Attempt::Retriable {
                        status_code: 429,
                        retry_after: Some(Duration::from_millis(10)),
                        outcome: (),
                    }
                } else {
                    Attempt::Done(())
                }
            }
        })
        .await;

        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
