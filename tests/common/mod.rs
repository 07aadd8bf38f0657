//! Shared helpers for lock integration tests.
//!
//! Every test builds its own [`DeterministicCoordination`] service, so
//! tests share nothing and can use the same lock root.

use std::sync::Arc;
use std::time::Duration;

use turnstile::CoordinationSession;
use turnstile::DeterministicCoordination;
use turnstile::LockConfig;
use turnstile::QueueLock;

/// Lock root used by the integration tests.
pub const ROOT: &str = "/locks/shared-resource";

/// Generous upper bound for operations that should complete quickly.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a new session on the service, wrapped for injection.
pub fn session(service: &Arc<DeterministicCoordination>) -> Arc<CoordinationSession> {
    Arc::new(service.session())
}

/// Create one lock participant with its own session.
pub fn participant(
    service: &Arc<DeterministicCoordination>,
    holder: &str,
) -> QueueLock<CoordinationSession> {
    QueueLock::new(session(service), ROOT, holder, LockConfig::default())
}

/// Poll until the lock root holds exactly `count` request nodes.
///
/// Returns `false` if the timeout elapses first.
pub async fn wait_for_node_count(
    service: &Arc<DeterministicCoordination>,
    count: usize,
    timeout: Duration,
) -> bool {
    let start = std::time::Instant::now();
    loop {
        if service.node_count(ROOT).await == count {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until exactly `count` deletion watches are armed service-wide.
///
/// Returns `false` if the timeout elapses first.
pub async fn wait_for_watch_count(
    service: &Arc<DeterministicCoordination>,
    count: usize,
    timeout: Duration,
) -> bool {
    let start = std::time::Instant::now();
    loop {
        if service.watch_count().await == count {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
