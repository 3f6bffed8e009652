//! Graceful shutdown coordination.
//!
//! Two watch channels: one carries the stop flag to the accept loop and every
//! chat session, the other carries the number of sessions still streaming so
//! the server can wait for them to drain.

use std::sync::Arc;
use tokio::sync::watch;

use crate::metrics;

/// Shared stop flag plus live-session count.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Channels>,
}

struct Channels {
    stop: watch::Sender<bool>,
    sessions: watch::Sender<u64>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (sessions, _) = watch::channel(0);
        Self {
            inner: Arc::new(Channels { stop, sessions }),
        }
    }

    /// Signal shutdown to the accept loop and every session.
    pub fn shutdown(&self) {
        self.inner.stop.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.stop.subscribe()
    }

    pub fn active_sessions(&self) -> u64 {
        *self.inner.sessions.borrow()
    }

    /// Count `session_id` as streaming until the returned guard drops.
    pub fn register_session(&self, session_id: impl Into<String>) -> SessionGuard {
        let mut count = 0;
        self.inner.sessions.send_modify(|n| {
            *n += 1;
            count = *n;
        });
        metrics::set_active_sessions(count);

        SessionGuard {
            session_id: session_id.into(),
            coordinator: self.clone(),
        }
    }

    /// Resolve once no session is registered.
    pub async fn wait_for_drain(&self) {
        let mut rx = self.inner.sessions.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn release(&self, session_id: &str) {
        let mut count = 0;
        self.inner.sessions.send_modify(|n| {
            match n.checked_sub(1) {
                Some(left) => *n = left,
                None => tracing::error!(session_id, "Session released with none registered"),
            }
            count = *n;
        });
        metrics::set_active_sessions(count);
        tracing::debug!(session_id, active = count, "Session released");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one session counted; releases it on drop.
pub struct SessionGuard {
    session_id: String,
    coordinator: ShutdownCoordinator,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop flag for the guarded session.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.coordinator.subscribe()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.coordinator.release(&self.session_id);
    }
}

/// Resolve once `rx` reports shutdown. Never resolves if the sender is gone
/// without having signaled.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_guards_track_sessions() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.active_sessions(), 0);

        let a = coordinator.register_session("a");
        let b = coordinator.register_session("b");
        assert_eq!(coordinator.active_sessions(), 2);
        assert_eq!(b.session_id(), "b");

        drop(a);
        assert_eq!(coordinator.active_sessions(), 1);
        drop(b);
        assert_eq!(coordinator.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_guard_sees_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.register_session("s");
        let mut rx = guard.subscribe();
        assert!(!coordinator.is_shutdown());

        coordinator.shutdown();
        assert!(coordinator.is_shutdown());
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .expect("shutdown observed");
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();

        let mut rx = coordinator.subscribe();
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .expect("shutdown observed");
    }

    #[tokio::test]
    async fn test_drain_waits_for_last_guard() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.register_session("s");

        let waiter = coordinator.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_drain().await });

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("drained")
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_with_no_sessions_is_immediate() {
        let coordinator = ShutdownCoordinator::new();
        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_drain())
            .await
            .expect("drained");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_never_signals() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        let result =
            tokio::time::timeout(Duration::from_secs(5), wait_for_shutdown(&mut rx)).await;
        assert!(result.is_err());
    }
}
