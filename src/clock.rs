use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Time source abstraction. The authentication poll loop and the public-key
/// cache read time and sleep only through this trait, so tests can simulate
/// a two-minute timeout without real delays.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
