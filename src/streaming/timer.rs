//! Delay scheduling for the producer.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Capability the producer awaits between frames.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real cooperative sleeps on the tokio timer wheel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        if duration > Duration::ZERO {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Returns immediately and remembers every requested delay.
///
/// Lets tests assert on pacing without waiting in real time.
#[derive(Debug, Default)]
pub struct InstantTimer {
    requested: Mutex<Vec<Duration>>,
}

impl InstantTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in call order.
    pub fn requested(&self) -> Vec<Duration> {
        self.requested
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Timer for InstantTimer {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
