//! Retry policy for transient read errors on the session stream.

use std::io;
use std::time::Duration;

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed before the error is treated as fatal
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Growth factor applied after each retry
    pub multiplier: f64,
    /// Cap on the delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (starting at 1), or `None` once
    /// the policy is exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = self.multiplier.max(1.0).powi(attempt as i32 - 1);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let cap = self.max_backoff.as_millis() as f64;
        Some(Duration::from_millis(millis.min(cap) as u64))
    }
}

/// "Not ready / try again / interrupted" class of read errors.
///
/// EIO is included because a PTY master reports it while the slave side is
/// being torn down.
pub fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EAGAIN) | Some(libc::EINTR) | Some(libc::EIO)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}
