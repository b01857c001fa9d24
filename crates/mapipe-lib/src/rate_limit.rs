//! Per-direction throughput cap
//!
//! The limiter keeps no tokens between sessions. It compares how long the
//! bytes written so far *should* have taken at the configured budget with how
//! long they actually took, and asks the copy loop to sleep off the difference.

use std::collections::TryReserveError;
use std::time::Duration;
use tokio::time::Instant;

/// Chunk size used when no budget is configured
pub const UNLIMITED_CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug)]
pub struct RateLimiter {
    budget: u64,
    started: Instant,
    written: u64,
}

impl RateLimiter {
    /// `budget` is in bytes per second; 0 disables limiting.
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            started: Instant::now(),
            written: 0,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.budget > 0
    }

    /// Size of the copy buffer: exactly one second's budget when limited
    pub fn chunk_size(&self) -> usize {
        if self.is_limited() {
            usize::try_from(self.budget).unwrap_or(usize::MAX)
        } else {
            UNLIMITED_CHUNK_SIZE
        }
    }

    /// Zeroed copy buffer of [`chunk_size`](Self::chunk_size) bytes.
    ///
    /// Fails rather than aborting when a budget is too large to allocate.
    pub fn buffer(&self) -> Result<Vec<u8>, TryReserveError> {
        let size = self.chunk_size();
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)?;
        buf.resize(size, 0);
        Ok(buf)
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Time the bytes written so far should take at the configured budget
    pub fn expected_elapsed(&self) -> Duration {
        if !self.is_limited() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.written as f64 / self.budget as f64)
    }

    /// Account for `n` bytes written and return how long to pause, if at all
    pub fn record(&mut self, n: usize) -> Option<Duration> {
        self.record_at(n, Instant::now())
    }

    fn record_at(&mut self, n: usize, now: Instant) -> Option<Duration> {
        self.written += n as u64;
        if !self.is_limited() {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.started);
        self.expected_elapsed()
            .checked_sub(elapsed)
            .filter(|pause| !pause.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_pauses() {
        let mut limiter = RateLimiter::new(0);
        assert!(!limiter.is_limited());
        assert_eq!(limiter.chunk_size(), UNLIMITED_CHUNK_SIZE);
        assert_eq!(limiter.record(1 << 30), None);
        assert_eq!(limiter.written(), 1 << 30);
    }

    #[test]
    fn test_chunk_size_matches_budget() {
        let limiter = RateLimiter::new(1_000);
        assert_eq!(limiter.chunk_size(), 1_000);
        assert_eq!(limiter.buffer().unwrap().len(), 1_000);
    }

    #[test]
    fn test_oversized_budget_buffer_is_an_error() {
        assert!(RateLimiter::new(u64::MAX).buffer().is_err());
        assert_eq!(
            RateLimiter::new(0).buffer().unwrap().len(),
            UNLIMITED_CHUNK_SIZE
        );
    }

    #[test]
    fn test_pause_is_expected_minus_elapsed() {
        let mut limiter = RateLimiter::new(1_000);
        let start = limiter.started;

        // 1000 bytes after 200ms: 800ms ahead of schedule
        let pause = limiter.record_at(1_000, start + Duration::from_millis(200));
        assert_eq!(pause, Some(Duration::from_millis(800)));

        // 500 more bytes at 1.5s total is exactly on schedule
        let pause = limiter.record_at(500, start + Duration::from_millis(1_500));
        assert_eq!(pause, None);
    }

    #[test]
    fn test_no_pause_when_behind_schedule() {
        let mut limiter = RateLimiter::new(100);
        let start = limiter.started;
        assert_eq!(limiter.record_at(100, start + Duration::from_secs(5)), None);
        assert_eq!(limiter.expected_elapsed(), Duration::from_secs(1));
    }
}
