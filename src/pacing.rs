use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::debug;

/// Keeps consecutive portal logins at least `interval` apart.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns once it is polite to start the next login. The first call
    /// returns immediately.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let ready_at = last + self.interval;
            if ready_at > Instant::now() {
                debug!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "pacing");
                time::sleep_until(ready_at).await;
            }
        }
        self.last = Some(Instant::now());
    }
}
