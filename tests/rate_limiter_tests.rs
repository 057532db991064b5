use sitemirror::{DelayLimiter, RateLimiter};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

#[cfg(test)]
mod delay_limiter_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = DelayLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_requests_are_spaced() {
        let limiter = DelayLimiter::new(Duration::from_millis(100));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_the_delay() {
        let limiter = Arc::new(DelayLimiter::new(Duration::from_millis(100)));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut granted = Vec::new();
        for handle in handles {
            granted.push(handle.await.unwrap());
        }
        granted.sort();

        for pair in granted.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_is_not_banked() {
        let limiter = DelayLimiter::new(Duration::from_millis(100));
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_secs(1)).await;

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_zero_delay_never_waits() {
        let limiter = DelayLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.delay(), Duration::ZERO);
    }
}
