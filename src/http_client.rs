use anyhow::{Context, Result};
use std::thread;
use std::time::Duration;

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

const MAX_ERROR_BODY_CHARS: usize = 512;

pub fn build_blocking_client(timeout: Option<Duration>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder().user_agent(BROWSER_USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// Exponential backoff schedule with +/-25% jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
        }
    }

    pub fn no_delay(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(2_u64.saturating_pow(attempt as u32))
            .min(max_ms);
        let jitter_range = (delay_ms as f64 * 0.25) as u64;
        let jitter = fastrand::u64(0..=jitter_range * 2);
        Duration::from_millis(delay_ms.saturating_sub(jitter_range).saturating_add(jitter))
    }
}

/// Runs `operation` until it succeeds, `should_retry` rejects the error, or
/// the retry budget is spent.
pub fn retry_with_backoff<F, R, T, E>(
    policy: RetryPolicy,
    label: &str,
    should_retry: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) if attempt >= policy.max_retries => return Err(err),
            Err(err) if !should_retry(&err) => {
                log::debug!("{} attempt {} failed permanently ({})", label, attempt + 1, err);
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{} attempt {} failed ({}), retrying in {}ms",
                    label,
                    attempt + 1,
                    err,
                    delay.as_millis()
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

pub fn truncate_for_log(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    fn always(_: &String) -> bool {
        true
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result: Result<u32, String> = retry_with_backoff(RetryPolicy::no_delay(3), "test", always, || {
            calls += 1;
            if calls < 3 {
                Err(format!("fail {}", calls))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), String> = retry_with_backoff(RetryPolicy::no_delay(2), "test", always, || {
            calls += 1;
            Err("boom".to_string())
        });
        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls, 3);
    }

    fn status(code: u16) -> ProviderError {
        ProviderError::Status {
            status: code,
            detail: "test".to_string(),
        }
    }

    fn attempts_until_done(first_error: fn() -> ProviderError) -> usize {
        let mut calls = 0;
        let _ = retry_with_backoff(
            RetryPolicy::no_delay(2),
            "test",
            ProviderError::is_retryable,
            || -> Result<(), ProviderError> {
                calls += 1;
                Err(first_error())
            },
        );
        calls
    }

    #[test]
    fn client_errors_are_attempted_once() {
        assert_eq!(attempts_until_done(|| status(404)), 1);
        assert_eq!(attempts_until_done(|| status(400)), 1);
        assert_eq!(
            attempts_until_done(|| ProviderError::Payload("no chart".to_string())),
            1
        );
        assert_eq!(attempts_until_done(|| ProviderError::Empty("AAPL".to_string())), 1);
    }

    #[test]
    fn throttling_and_server_errors_use_the_full_budget() {
        assert_eq!(attempts_until_done(|| status(429)), 3);
        assert_eq!(attempts_until_done(|| status(503)), 3);
        assert_eq!(
            attempts_until_done(|| ProviderError::Transport("timed out".to_string())),
            3
        );
    }

    #[test]
    fn delay_is_capped_and_jittered() {
        let policy = RetryPolicy::new(5);
        for attempt in 0..6 {
            let delay = policy.delay_for(attempt).as_millis() as u64;
            assert!(delay <= 12500, "attempt {} delay {}", attempt, delay);
            assert!(delay >= 750);
        }
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(600);
        let truncated = truncate_for_log(&body);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.len(), MAX_ERROR_BODY_CHARS + 3);
    }
}
