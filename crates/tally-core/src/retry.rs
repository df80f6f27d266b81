//! Retry and fail-open helpers
//!
//! `RetryPolicy` drives the fixed-backoff retry used by the storage backends
//! for transient failures. `fail_open` is for work whose failure must be
//! logged and dropped, such as a single metric send on the agent.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Run an operation whose failure is logged and swallowed
///
/// Returns `None` when `f` fails.
///
/// ```no_run
/// use tally_core::retry::fail_open;
/// # use tally_core::Result;
/// # async fn send() -> Result<()> { Ok(()) }
/// # async fn example() {
/// let sent = fail_open("send metric", || send()).await;
/// # }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (dropped): {}", operation_name, e);
            None
        }
    }
}

/// Fixed backoff sequence: one immediate attempt, then one retry per delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Total attempts including the first one
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `f`, retrying only while `is_retriable` accepts the error
    ///
    /// Non-retriable errors and the error of the last attempt propagate.
    pub async fn run<F, Fut, T, E, R>(
        &self,
        operation_name: &str,
        mut f: F,
        is_retriable: R,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut delays = self.delays.iter();
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(val) => return Ok(val),
                Err(e) => {
                    if !is_retriable(&e) {
                        return Err(e);
                    }
                    let Some(delay) = delays.next() else {
                        warn!(
                            "{} failed after {} attempts: {}",
                            operation_name, attempt, e
                        );
                        return Err(e);
                    };
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation_name,
                        attempt,
                        self.attempts(),
                        delay,
                        e
                    );
                    tokio::time::sleep(*delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TallyError;

    fn fast() -> RetryPolicy {
        RetryPolicy::new(vec![Duration::from_millis(1); 3])
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 4);
        assert_eq!(RetryPolicy::none().attempts(), 1);
    }

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, TallyError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(TallyError::Other("test error".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_retry_success_after_transient() {
        let mut attempts = 0;
        let result = fast()
            .run(
                "test_op",
                || {
                    attempts += 1;
                    let current = attempts;
                    async move {
                        if current < 3 {
                            Err(TallyError::Other("busy".to_string()))
                        } else {
                            Ok(42)
                        }
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_schedule() {
        let mut attempts = 0;
        let result: std::result::Result<i32, TallyError> = fast()
            .run(
                "test_op",
                || {
                    attempts += 1;
                    async { Err(TallyError::Other("busy".to_string())) }
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 4);
    }

    #[tokio::test]
    async fn test_non_retriable_propagates_immediately() {
        let mut attempts = 0;
        let result: std::result::Result<i32, TallyError> = fast()
            .run(
                "test_op",
                || {
                    attempts += 1;
                    async { Err(TallyError::Other("constraint".to_string())) }
                },
                |_| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
