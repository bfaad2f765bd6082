//! Single-flight coordination for the token refresh exchange
//!
//! Every 401 that wants a refresh goes through [`RefreshCoordinator::run`].
//! The state machine below makes the invariant structural: while a flight
//! is in progress there is exactly one leader executing the exchange and
//! every other caller is a waiter sharing its outcome. The waiter queue is
//! drained and cleared on every resolution, success or failure.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Failure modes of a refresh flight. `Clone` because one outcome is
/// broadcast to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// No refresh token present; the caller may never have been logged in.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// An explicit logout happened while the exchange was in flight; the
    /// result was discarded rather than resurrecting the session.
    #[error("session was cleared while the refresh was in flight")]
    SessionCleared,

    /// The refresh endpoint rejected the exchange or was unreachable.
    #[error("refresh exchange failed: {0}")]
    Exchange(String),

    /// The leading task went away before resolving the flight.
    #[error("refresh was interrupted before completing")]
    Interrupted,
}

/// New access token on success.
pub type RefreshOutcome = Result<String, RefreshError>;

enum FlightState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

impl Default for FlightState {
    fn default() -> Self {
        Self::Idle
    }
}

#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<FlightState>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a flight is in progress.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(&*self.state.lock(), FlightState::Refreshing { .. })
    }

    /// Execute `refresh` unless a flight is already in progress, in which
    /// case wait for that flight's outcome instead. At most one `refresh`
    /// future runs at any time.
    pub async fn run<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let waiter = {
            let mut state = self.state.lock();
            match &mut *state {
                FlightState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                FlightState::Idle => {
                    *state = FlightState::Refreshing {
                        waiters: Vec::new(),
                    };
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            // A dropped sender means the leader never resolved the flight.
            return rx.await.unwrap_or(Err(RefreshError::Interrupted));
        }

        // Leader path. The guard resolves the flight even if this task is
        // cancelled mid-exchange, so waiters can never hang.
        let guard = FlightGuard {
            coordinator: self,
            armed: true,
        };
        let outcome = refresh().await;
        guard.resolve(outcome.clone());
        outcome
    }

    fn finish(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.state.lock();
            match std::mem::take(&mut *state) {
                FlightState::Refreshing { waiters } => waiters,
                FlightState::Idle => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

struct FlightGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl FlightGuard<'_> {
    fn resolve(mut self, outcome: RefreshOutcome) {
        self.armed = false;
        self.coordinator.finish(&outcome);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.finish(&Err(RefreshError::Interrupted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn test_single_caller_runs_refresh() {
        let coordinator = RefreshCoordinator::new();
        let outcome = coordinator.run(|| async { Ok("T2".to_string()) }).await;
        assert_eq!(outcome.unwrap(), "T2");
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_flight() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .run(|| async move {
                        sleep(Duration::from_millis(50)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("T2".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "T2");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_broadcast_and_queue_cleared() {
        let coordinator = Arc::new(RefreshCoordinator::new());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run(|| async {
                        sleep(Duration::from_millis(50)).await;
                        Err(RefreshError::Exchange("expired".to_string()))
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(10)).await;

        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(|| async { Ok("unused".to_string()) }).await })
        };

        assert!(leader.await.unwrap().is_err());
        assert_eq!(
            follower.await.unwrap(),
            Err(RefreshError::Exchange("expired".to_string()))
        );

        // Queue drained: a later flight starts fresh.
        assert!(!coordinator.is_refreshing());
        let outcome = coordinator.run(|| async { Ok("T3".to_string()) }).await;
        assert_eq!(outcome.unwrap(), "T3");
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::new());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run(|| async {
                        sleep(Duration::from_secs(60)).await;
                        Ok("never".to_string())
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(10)).await;
        assert!(coordinator.is_refreshing());

        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(|| async { Ok("unused".to_string()) }).await })
        };
        sleep(Duration::from_millis(10)).await;

        leader.abort();
        assert_eq!(follower.await.unwrap(), Err(RefreshError::Interrupted));
        assert!(!coordinator.is_refreshing());
    }
}
