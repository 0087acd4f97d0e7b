//! Failure classification and backoff for remote calls.

use std::future::Future;
use std::time::Duration;

use repodb_remote::{RemoteError, RemoteResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// How a failed remote call should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Version mismatch. Surfaced immediately as a conflict.
    Conflict,
    /// Server error or rate limit. Worth another attempt.
    Transient,
    /// Client error, transport or decoding failure. Surfaced immediately.
    Fatal,
}

impl Disposition {
    pub fn of(err: &RemoteError) -> Self {
        match err.status_code() {
            Some(_) if err.is_conflict() => Self::Conflict,
            Some(_) if err.is_rate_limited() || err.is_server_error() => Self::Transient,
            _ => Self::Fatal,
        }
    }
}

/// Capped exponential backoff.
///
/// The wait before retry `n` (zero-based) is `min(base_delay * 2^n,
/// max_delay)`, unless the remote rate limited the call and suggested a
/// wait, in which case the suggestion is used as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for(&self, attempt: u32, err: &RemoteError) -> Duration {
        if err.is_rate_limited() {
            if let Some(wait) = err.retry_after() {
                return wait;
            }
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently or the retry budget
    /// is spent.
    ///
    /// `label` names the target (usually a path) in logs and in the
    /// resulting [`StoreError::Conflict`].
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut attempt = 0u32;
        let mut last_hint = None;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(StoreError::Cancelled);
            }
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match Disposition::of(&err) {
                Disposition::Conflict => {
                    debug!(path = label, "version conflict");
                    return Err(StoreError::Conflict {
                        path: label.to_string(),
                    });
                }
                Disposition::Fatal => return Err(StoreError::Remote(err)),
                Disposition::Transient => {}
            }

            if err.is_rate_limited() {
                last_hint = err.retry_after().or(last_hint);
            }
            if attempt >= self.max_retries {
                warn!(path = label, attempts = attempt + 1, error = %err, "retries exhausted");
                if err.is_rate_limited() {
                    return Err(StoreError::RateLimited {
                        retry_after: last_hint,
                    });
                }
                return Err(StoreError::Remote(err));
            }

            let delay = self.delay_for(attempt, &err);
            debug!(
                path = label,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying remote call"
            );
            pause(delay, cancel).await?;
            attempt += 1;
        }
    }
}

async fn pause(delay: Duration, cancel: Option<&CancellationToken>) -> StoreResult<()> {
    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(StoreError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn unavailable() -> RemoteError {
        RemoteError::status(503, "service unavailable")
    }

    fn rate_limited(wait: Option<Duration>) -> RemoteError {
        RemoteError::Status {
            status: 429,
            message: "slow down".into(),
            retry_after: wait,
        }
    }

    #[test]
    fn classification() {
        assert_eq!(Disposition::of(&RemoteError::status(409, "x")), Disposition::Conflict);
        assert_eq!(Disposition::of(&RemoteError::status(500, "x")), Disposition::Transient);
        assert_eq!(Disposition::of(&RemoteError::status(502, "x")), Disposition::Transient);
        assert_eq!(Disposition::of(&rate_limited(None)), Disposition::Transient);
        assert_eq!(Disposition::of(&RemoteError::status(401, "x")), Disposition::Fatal);
        assert_eq!(Disposition::of(&RemoteError::status(404, "x")), Disposition::Fatal);
        assert_eq!(Disposition::of(&RemoteError::status(422, "x")), Disposition::Fatal);
        assert_eq!(
            Disposition::of(&RemoteError::Transport("reset".into())),
            Disposition::Fatal
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..6)
            .map(|n| policy.delay_for(n, &unavailable()).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn rate_limit_hint_is_used_verbatim() {
        let policy = RetryPolicy::default();
        let hint = Duration::from_secs(42);
        assert_eq!(policy.delay_for(0, &rate_limited(Some(hint))), hint);
        assert_eq!(
            policy.delay_for(1, &rate_limited(None)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(200, &unavailable()), policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let out = RetryPolicy::default()
            .run("data/users.json", None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(unavailable())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_is_never_retried() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("data/users.json", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::status(409, "sha mismatch")) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref path } if path == "data/users.json"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("p", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::status(403, "forbidden")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, StoreError::Remote(e) if e.status_code() == Some(403)));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_credentials_are_not_retried() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let err = RetryPolicy::default()
            .run("data/users.json", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::status(401, "Bad credentials")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(err, StoreError::Remote(e) if e.status_code() == Some(401)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_server_errors_surface_last_error() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("p", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(unavailable()) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, StoreError::Remote(e) if e.status_code() == Some(503)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limit_reports_hint() {
        let hint = Duration::from_secs(7);
        let start = Instant::now();
        let err = RetryPolicy::default()
            .run("p", None, || async move { Err::<(), _>(rate_limited(Some(hint))) })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RateLimited { retry_after: Some(w) } if w == hint));
        // Three waits of the suggested length.
        assert!(start.elapsed() >= Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_policy_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::disabled()
            .run("p", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(rate_limited(None)) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, StoreError::RateLimited { retry_after: None }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let err = RetryPolicy::default()
            .run("p", Some(&token), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(unavailable()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
