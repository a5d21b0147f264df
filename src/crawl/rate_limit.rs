//! Politeness delay between requests to one host

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Per-host rate limiter enforcing a minimum interval between requests
#[derive(Clone)]
pub struct HostRateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
}

struct RateLimiterInner {
    last_request: Option<Instant>,
    min_interval: Duration,
}

impl HostRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                last_request: None,
                min_interval,
            })),
        }
    }

    /// Build from the configured delay and an optional robots.txt Crawl-delay,
    /// whichever is longer
    pub fn with_crawl_delay(delay_ms: u64, crawl_delay_secs: Option<f64>) -> Self {
        let configured = Duration::from_millis(delay_ms);
        let robots = crawl_delay_secs
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| Duration::from_secs_f64(d.min(60.0)))
            .unwrap_or(Duration::ZERO);
        Self::new(configured.max(robots))
    }

    /// Wait until the next request is allowed
    pub async fn wait(&self) {
        let mut inner = self.inner.lock().await;

        if let Some(last) = inner.last_request {
            let elapsed = last.elapsed();
            if elapsed < inner.min_interval {
                let wait_time = inner.min_interval - elapsed;
                trace!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        inner.last_request = Some(Instant::now());
    }
}
