//! Reconnect backoff
//!
//! Exponential growth from `base` up to `max`, with up to half of each delay
//! randomized so a fleet of clients dropped together does not reconnect in
//! lockstep. The server uses it for its MongoDB connection; realtime clients
//! use the same schedule after a dropped socket.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: u32,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            factor: 2,
            max_attempts: None,
            attempt: 0,
        }
    }

    /// Give up after `attempts` delays
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound of the next delay, before jitter
    pub fn ceiling(&self) -> Duration {
        let multiplier = self.factor.saturating_pow(self.attempt.min(31));
        self.base.saturating_mul(multiplier).min(self.max)
    }

    /// Next delay to wait, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempt >= max) {
            return None;
        }

        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let half = ceiling / 2;
        let jitter_ms = half.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        Some(ceiling - half + jitter)
    }

    /// Call after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Run `op` until it succeeds or attempts are exhausted, sleeping the
    /// next delay between tries. Returns the last error on give-up.
    pub async fn retry<T, E, F, Fut>(&mut self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            match op().await {
                Ok(value) => {
                    self.reset();
                    return Ok(value);
                }
                Err(e) => match self.next_delay() {
                    Some(delay) => {
                        warn!(
                            attempt = self.attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "{} failed, retrying",
                            what
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_within_bounds() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        let mut ceilings = Vec::new();

        for _ in 0..8 {
            let ceiling = backoff.ceiling();
            let delay = backoff.next_delay().unwrap();
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
            ceilings.push(ceiling.as_millis());
        }

        assert_eq!(ceilings, vec![100, 200, 400, 800, 1000, 1000, 1000, 1000]);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.ceiling(), Duration::from_millis(100));
    }

    #[test]
    fn test_attempts_exhaust() {
        let mut backoff = Backoff::default().with_max_attempts(2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }

    #[tokio::test]
    async fn test_retry_recovers_then_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(4))
            .with_max_attempts(5);
        let mut calls = 0;

        let result: Result<u32, String> = backoff
            .retry("connect", || {
                calls += 1;
                let outcome = if calls < 3 { Err("refused".to_string()) } else { Ok(calls) };
                async move { outcome }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(backoff.attempt(), 0);
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_last_error() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2))
            .with_max_attempts(2);
        let mut calls = 0;

        let result: Result<(), String> = backoff
            .retry("connect", || {
                calls += 1;
                let outcome = Err(format!("refused #{}", calls));
                async move { outcome }
            })
            .await;

        assert_eq!(result, Err("refused #3".to_string()));
    }
}
