//! The `Clock` seam (spec §9 Design Notes): the real implementation is
//! backed by `tokio::time`; tests inject a fake so retry-backoff timing is
//! deterministic instead of depending on wall-clock sleeps.

use std::time::Duration;

#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
    fn now(&self) -> std::time::Instant;
}

pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock whose `sleep` resolves immediately but records the
    /// requested durations, so backoff-schedule tests run instantly while
    /// still asserting on the delays that would have been used.
    #[derive(Default)]
    pub struct InstantClock {
        recorded: std::sync::Mutex<Vec<Duration>>,
        epoch_nanos: AtomicU64,
    }

    impl InstantClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn recorded_sleeps(&self) -> Vec<Duration> {
            self.recorded.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Clock for InstantClock {
        async fn sleep(&self, duration: Duration) {
            self.recorded.lock().unwrap().push(duration);
            self.epoch_nanos.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
        }

        fn now(&self) -> std::time::Instant {
            std::time::Instant::now()
        }
    }
}
