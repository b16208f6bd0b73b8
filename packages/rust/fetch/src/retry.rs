//! Shared retry policy: bounded attempts, exponential backoff with jitter,
//! and server-specified `Retry-After` delays.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use hss_shared::FetchConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay before retrying after failed `attempt` (1-based).
    ///
    /// A server-provided delay wins over the computed backoff; both are
    /// capped at `max_delay`.
    pub fn delay(&self, url: &str, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(server) = retry_after {
            return server.min(self.max_delay);
        }
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
            .min(self.max_delay);
        // Half fixed, half jitter.
        let half = exp / 2;
        half + half.mul_f64(jitter(url, attempt))
    }
}

/// Deterministic jitter in `[0, 1)` derived from the URL and attempt.
fn jitter(url: &str, attempt: u32) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(attempt.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

/// Parse a `Retry-After` header: delay in seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok().or(Some(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            retryable_statuses: vec![429, 503],
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = policy();
        let first = p.delay("https://x/a", 1, None);
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));
        let third = p.delay("https://x/a", 3, None);
        assert!(third >= Duration::from_millis(200) && third <= Duration::from_millis(400));
        let tenth = p.delay("https://x/a", 10, None);
        assert!(tenth <= Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_is_deterministic() {
        let p = policy();
        assert_eq!(p.delay("https://x/a", 2, None), p.delay("https://x/a", 2, None));
    }

    #[test]
    fn server_delay_wins_but_is_capped() {
        let p = policy();
        assert_eq!(
            p.delay("https://x/a", 1, Some(Duration::from_millis(700))),
            Duration::from_millis(700)
        );
        assert_eq!(
            p.delay("https://x/a", 1, Some(Duration::from_secs(60))),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn retry_after_formats() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn retryable_set_is_configurable() {
        let p = policy();
        assert!(p.is_retryable(429));
        assert!(!p.is_retryable(500));
    }
}
