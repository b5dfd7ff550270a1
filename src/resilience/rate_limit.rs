//! Per-subscription rate limiting.
//!
//! Sliding window: at most `limit` acquisitions inside any `interval`.
//! Callers wait asynchronously for the oldest slot to leave the window.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::RuleConfig;

#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    interval: Duration,
    granted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            interval,
            granted: Mutex::new(VecDeque::new()),
        }
    }

    /// Limiter for a rule, or `None` when the rule is unlimited.
    pub fn for_rule(rule: &RuleConfig) -> Option<Self> {
        (rule.rate_limit > 0).then(|| Self::new(rule.rate_limit, rule.rate_interval()))
    }

    /// Drop expired grants and report when the next slot frees up, or
    /// `None` when one is free now.
    fn next_free(&self, granted: &mut VecDeque<Instant>, now: Instant) -> Option<Instant> {
        while let Some(oldest) = granted.front() {
            if now.duration_since(*oldest) >= self.interval {
                granted.pop_front();
            } else {
                break;
            }
        }
        if granted.len() < self.limit {
            return None;
        }
        // Full window: the front entry is the next to expire.
        Some(granted[0] + self.interval)
    }

    /// Take a slot if one is free, otherwise report when to retry.
    fn try_acquire(&self) -> Result<(), Instant> {
        let now = Instant::now();
        let mut granted = self.granted.lock();
        match self.next_free(&mut granted, now) {
            None => {
                granted.push_back(now);
                Ok(())
            }
            Some(retry_at) => Err(retry_at),
        }
    }

    /// Wait until a slot is available without taking it. With a single
    /// caller, the following `acquire` returns immediately.
    pub async fn ready(&self) {
        loop {
            let retry_at = {
                let mut granted = self.granted.lock();
                self.next_free(&mut granted, Instant::now())
            };
            match retry_at {
                None => return,
                Some(retry_at) => tokio::time::sleep_until(retry_at).await,
            }
        }
    }

    /// Wait until a slot is available and take it.
    pub async fn acquire(&self) {
        while let Err(retry_at) = self.try_acquire() {
            tokio::time::sleep_until(retry_at).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_limit_then_waits() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let started = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(10));

        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_over_several_windows() {
        let limiter = RateLimiter::new(2, Duration::from_millis(500));
        let started = Instant::now();
        for _ in 0..6 {
            limiter.acquire().await;
        }
        // Slots 3-4 open at 500ms, slots 5-6 at 1000ms.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1500));
    }

    #[test]
    fn test_rule_without_limit_has_no_limiter() {
        let rule = RuleConfig::default();
        assert!(RateLimiter::for_rule(&rule).is_none());

        let limited = RuleConfig {
            rate_limit: 10,
            ..Default::default()
        };
        let limiter = RateLimiter::for_rule(&limited).unwrap();
        assert_eq!(limiter.interval, Duration::from_secs(1));
        assert_eq!(limiter.limit, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_does_not_take_a_slot() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        let started = Instant::now();

        limiter.ready().await;
        limiter.ready().await;
        limiter.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(10));

        limiter.ready().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
        limiter.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(1010));
    }

    #[test]
    fn test_large_limit_is_not_preallocated() {
        let limiter = RateLimiter::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(limiter.granted.lock().capacity(), 0);
    }
}
