use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::sleep;

/// Fixed-interval polling schedule
#[derive(Debug, Clone)]
pub struct PollingScheduler {
    interval: Duration,
}

impl PollingScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until next poll time
    pub async fn sleep_until_next_poll(&self) {
        tracing::debug!(
            "Next check at: {}",
            self.next_poll_time().format("%Y-%m-%d %H:%M:%S %Z")
        );
        sleep(self.interval).await;
    }

    /// Wall-clock time of the next poll if sleeping starts now
    pub fn next_poll_time(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(offset)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
