//! Minimum-interval throttle, one instance per external source.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Spaces granted acquisitions at least `1 / rate` seconds apart.
///
/// The last-grant time is read, waited on and updated while holding the
/// lock, so concurrent callers queue in lock order instead of computing the
/// same wait window.
pub struct RateLimiter {
    name: &'static str,
    min_interval: Option<Duration>,
    last_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `rate` is in requests per second. A rate of zero or below disables
    /// throttling.
    pub fn new(name: &'static str, rate: f64) -> Self {
        let min_interval = if rate.is_finite() && rate > 0.0 {
            Some(Duration::from_secs_f64(1.0 / rate))
        } else {
            None
        };
        Self {
            name,
            min_interval,
            last_grant: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    pub async fn acquire(&self) {
        let Some(min_interval) = self.min_interval else {
            return;
        };

        let mut last_grant = self.last_grant.lock().await;
        if let Some(last) = *last_grant {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                let wait = min_interval - elapsed;
                log::debug!("Rate limiting {}: waiting {}ms", self.name, wait.as_millis());
                sleep(wait).await;
            }
        }
        *last_grant = Some(Instant::now());
    }
}
