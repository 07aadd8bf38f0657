//! Failure-path behavior of the queue lock: session expiry, cancelled
//! waits, bounded waits, and connectivity faults.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use turnstile::AttemptState;
use turnstile::ClientError;
use turnstile::LockConfig;
use turnstile::LockError;
use turnstile::QueueLock;

/// A waiter whose predecessor expires must re-list instead of assuming
/// it reached the front: here B sits between holder A and waiter C, and
/// B's session expires while all three are queued.
#[tokio::test]
async fn test_waiter_relists_when_predecessor_expires() {
    tracing_subscriber::fmt::try_init().ok();
    let service = turnstile::DeterministicCoordination::new();

    let mut a = common::participant(&service, "a");
    a.lock().await.unwrap();

    let session_b = common::session(&service);
    let mut b = QueueLock::new(Arc::clone(&session_b), common::ROOT, "b", LockConfig::default());
    let b_task = tokio::spawn(async move { b.lock().await });
    assert!(common::wait_for_node_count(&service, 2, common::TEST_TIMEOUT).await);
    assert!(common::wait_for_watch_count(&service, 1, common::TEST_TIMEOUT).await);

    let mut c = common::participant(&service, "c");
    let (c_held_tx, mut c_held_rx) = oneshot::channel();
    let (c_go_tx, c_go_rx) = oneshot::channel();
    let c_task = tokio::spawn(async move {
        c.lock().await.unwrap();
        c_held_tx.send(()).unwrap();
        c_go_rx.await.unwrap();
        c.unlock().await.unwrap();
    });
    assert!(common::wait_for_node_count(&service, 3, common::TEST_TIMEOUT).await);
    assert!(common::wait_for_watch_count(&service, 2, common::TEST_TIMEOUT).await);

    // B's ephemeral request disappears; C wakes, re-lists, and finds
    // itself still behind A.
    session_b.expire().await;
    assert!(common::wait_for_node_count(&service, 2, common::TEST_TIMEOUT).await);
    assert!(common::wait_for_watch_count(&service, 2, common::TEST_TIMEOUT).await);
    assert!(matches!(c_held_rx.try_recv(), Err(TryRecvError::Empty)));

    // Releasing A wakes both: B learns its request is gone, C acquires.
    a.unlock().await.unwrap();
    let b_result = tokio::time::timeout(common::TEST_TIMEOUT, b_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(b_result, Err(LockError::Lost { .. })));
    c_held_rx.await.unwrap();
    assert_eq!(service.node_count(common::ROOT).await, 1);

    c_go_tx.send(()).unwrap();
    c_task.await.unwrap();
    assert_eq!(service.node_count(common::ROOT).await, 0);
    assert_eq!(service.watch_count().await, 0);
}

#[tokio::test]
async fn test_expired_holder_wakes_next_waiter() {
    let service = turnstile::DeterministicCoordination::new();

    let session_a = common::session(&service);
    let mut a = QueueLock::new(Arc::clone(&session_a), common::ROOT, "a", LockConfig::default());
    a.lock().await.unwrap();

    let mut b = common::participant(&service, "b");
    let (b_held_tx, b_held_rx) = oneshot::channel();
    let (b_go_tx, b_go_rx) = oneshot::channel();
    let b_task = tokio::spawn(async move {
        b.lock().await.unwrap();
        b_held_tx.send(()).unwrap();
        b_go_rx.await.unwrap();
        b.unlock().await.unwrap();
    });
    assert!(common::wait_for_node_count(&service, 2, common::TEST_TIMEOUT).await);

    // The holder's session times out: its request node is reaped and
    // the waiter takes over without anyone calling unlock.
    session_a.expire().await;
    tokio::time::timeout(common::TEST_TIMEOUT, b_held_rx)
        .await
        .unwrap()
        .unwrap();

    // A still believes it holds the lock until it hears otherwise.
    assert!(a.is_held());
    let err = a.unlock().await.unwrap_err();
    assert!(matches!(err, LockError::Lost { .. }));
    assert_eq!(a.state(), AttemptState::Lost);
    assert!(!a.is_held());

    b_go_tx.send(()).unwrap();
    b_task.await.unwrap();
    assert_eq!(service.node_count(common::ROOT).await, 0);
    assert_eq!(service.watch_count().await, 0);
}

#[tokio::test]
async fn test_bounded_wait_gives_up_after_timeout() {
    let service = turnstile::DeterministicCoordination::new();

    let mut a = common::participant(&service, "a");
    a.lock().await.unwrap();

    let mut b = common::participant(&service, "b");
    let started = std::time::Instant::now();
    let acquired = b.try_lock_for(Duration::from_millis(100)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(!acquired);
    assert!(elapsed >= Duration::from_millis(100));
    // Generous slack for a loaded test machine, but far below a second
    // wait cycle.
    assert!(elapsed < Duration::from_millis(100) + Duration::from_secs(1));
    assert_eq!(b.state(), AttemptState::Idle);

    // The expired wait withdrew its request and watch.
    assert_eq!(service.node_count(common::ROOT).await, 1);
    assert_eq!(service.watch_count().await, 0);

    a.unlock().await.unwrap();
    assert_eq!(service.node_count(common::ROOT).await, 0);
}

#[tokio::test]
async fn test_cancelled_waiter_withdraws_without_disturbing_others() {
    let service = turnstile::DeterministicCoordination::new();

    let mut a = common::participant(&service, "a");
    a.lock().await.unwrap();

    let mut b = common::participant(&service, "b");
    let cancel = CancellationToken::new();
    let b_cancel = cancel.clone();
    let b_task = tokio::spawn(async move { b.lock_interruptible(&b_cancel).await });
    assert!(common::wait_for_node_count(&service, 2, common::TEST_TIMEOUT).await);
    assert!(common::wait_for_watch_count(&service, 1, common::TEST_TIMEOUT).await);

    let mut c = common::participant(&service, "c");
    let (c_held_tx, mut c_held_rx) = oneshot::channel();
    let (c_go_tx, c_go_rx) = oneshot::channel();
    let c_task = tokio::spawn(async move {
        c.lock().await.unwrap();
        c_held_tx.send(()).unwrap();
        c_go_rx.await.unwrap();
        c.unlock().await.unwrap();
    });
    assert!(common::wait_for_node_count(&service, 3, common::TEST_TIMEOUT).await);
    assert!(common::wait_for_watch_count(&service, 2, common::TEST_TIMEOUT).await);

    // Cancelling B withdraws its request; C wakes, re-lists, and keeps
    // waiting behind A.
    cancel.cancel();
    let b_result = tokio::time::timeout(common::TEST_TIMEOUT, b_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(b_result, Err(LockError::Interrupted { .. })));
    assert!(common::wait_for_node_count(&service, 2, common::TEST_TIMEOUT).await);
    assert!(common::wait_for_watch_count(&service, 1, common::TEST_TIMEOUT).await);
    assert!(matches!(c_held_rx.try_recv(), Err(TryRecvError::Empty)));

    a.unlock().await.unwrap();
    c_held_rx.await.unwrap();
    c_go_tx.send(()).unwrap();
    c_task.await.unwrap();

    assert_eq!(service.node_count(common::ROOT).await, 0);
    assert_eq!(service.watch_count().await, 0);
}

#[tokio::test]
async fn test_closed_session_surfaces_client_error() {
    let service = turnstile::DeterministicCoordination::new();

    let session = common::session(&service);
    let mut lock = QueueLock::new(
        Arc::clone(&session),
        common::ROOT,
        "holder",
        LockConfig::default(),
    );
    lock.lock().await.unwrap();

    session.close().await;
    let err = lock.unlock().await.unwrap_err();
    assert!(matches!(
        err,
        LockError::Client {
            source: ClientError::SessionExpired
        }
    ));
}

#[tokio::test]
async fn test_connectivity_fault_keeps_attempt_resumable() {
    let service = turnstile::DeterministicCoordination::new();

    let mut a = common::participant(&service, "a");
    a.lock().await.unwrap();

    let session_b = common::session(&service);
    let mut b = QueueLock::new(Arc::clone(&session_b), common::ROOT, "b", LockConfig::default());
    assert!(!b.try_lock().await.unwrap());
    let parked_path = b.owned_path().unwrap().to_string();

    a.unlock().await.unwrap();

    // One injected fault: the resumed attempt fails but stays queued.
    session_b.fail_next_calls(1).await;
    let err = b.lock().await.unwrap_err();
    assert!(matches!(
        err,
        LockError::Client {
            source: ClientError::Connectivity { .. }
        }
    ));
    assert_eq!(b.owned_path(), Some(parked_path.as_str()));
    assert_eq!(service.node_count(common::ROOT).await, 1);

    // Retrying resumes the same request node rather than creating another.
    b.lock().await.unwrap();
    assert_eq!(b.owned_path(), Some(parked_path.as_str()));
    assert_eq!(service.node_count(common::ROOT).await, 1);

    b.unlock().await.unwrap();
    assert_eq!(service.node_count(common::ROOT).await, 0);
    assert_eq!(service.watch_count().await, 0);
}
