//! Retry classification for segment downloads.

use std::time::Duration;

use thiserror::Error;

/// Why a single download attempt failed.
#[derive(Debug, Error)]
pub enum DownloadFailure {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// Body ended before the requested byte range was received.
    #[error("received {received} of {expected} bytes")]
    ShortBody { expected: u64, received: u64 },

    /// Server answered a mid-file range request with the whole resource.
    #[error("server ignored the Range header")]
    RangeIgnored,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    /// 429 or 503.
    Throttled,
    Connection,
    Http5xx(u16),
    /// The signed capture URL is no longer valid. Never retried.
    Expired(u16),
    Other,
}

impl ErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Throttled | ErrorKind::Connection | ErrorKind::Http5xx(_)
        )
    }
}

pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        401 | 403 | 404 | 410 => ErrorKind::Expired(code),
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code),
        _ => ErrorKind::Other,
    }
}

pub fn classify(failure: &DownloadFailure) -> ErrorKind {
    match failure {
        DownloadFailure::Status(code) => classify_http_status(*code),
        DownloadFailure::Transport(e) if e.is_timeout() => ErrorKind::Timeout,
        DownloadFailure::Transport(e) if e.is_connect() || e.is_body() || e.is_request() => {
            ErrorKind::Connection
        }
        DownloadFailure::Transport(_) => ErrorKind::Other,
        DownloadFailure::ShortBody { .. } => ErrorKind::Connection,
        DownloadFailure::RangeIgnored | DownloadFailure::Io(_) => ErrorKind::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// `attempt` is 1-based: the attempt that just failed.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt > self.max_retries || !kind.is_transient() {
            return RetryDecision::NoRetry;
        }
        let factor = 1u32 << attempt.saturating_sub(1).min(8);
        RetryDecision::RetryAfter(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}
