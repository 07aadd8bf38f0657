//! Fair mutual exclusion over ephemeral sequential request nodes.
//!
//! The queue-lock recipe: every acquisition attempt creates an ephemeral
//! sequential node under the lock root, the attempt with the lowest
//! sequence holds the lock, and every other attempt waits for the deletion
//! of the sibling immediately ahead of it. Deleting the request node is
//! both the release and the wake-up signal for the successor; no other
//! message passes between holder and waiters.
//!
//! A woken waiter never assumes it is next. It re-lists the siblings and
//! re-derives its position, because the node it watched may have belonged
//! to a session that expired mid-queue rather than to the holder.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::client::CoordinationClient;
use crate::error::AlreadyHeldSnafu;
use crate::error::InterruptedSnafu;
use crate::error::LockError;
use crate::error::LostSnafu;
use crate::error::NotHeldSnafu;
use crate::gate::WaitGate;
use crate::gate::WaitOutcome;
use crate::ordering;
use crate::ordering::QueuePosition;
use crate::types::HolderInfo;

/// Configuration for a queue lock.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Name prefix for request nodes under the lock root.
    ///
    /// The coordination service appends the sequence counter to this
    /// prefix. Every participant on one lock root must use the same
    /// prefix, otherwise their requests would not sort as one queue.
    pub request_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            request_prefix: "req-".to_string(),
        }
    }
}

/// Lifecycle of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// No attempt in flight.
    Idle,
    /// Request node created; queue position not yet established.
    Requested,
    /// Queued behind a predecessor: blocked in a wait, or parked by
    /// [`QueueLock::try_lock`].
    Waiting,
    /// Front of the queue: the lock is held.
    Held,
    /// The request node vanished before release.
    ///
    /// Terminal for the attempt. It is surfaced as [`LockError::Lost`]
    /// exactly once; the next acquisition call starts a fresh attempt.
    Lost,
}

/// One acquisition attempt: a request node plus its queue bookkeeping.
///
/// Created when an acquisition call finds no live attempt; destroyed when
/// the node is deleted (release or withdrawal) or the loss is reported.
/// A request node path is never reused across attempts.
#[derive(Debug)]
struct LockRequest {
    /// Full path of the ephemeral sequential node. Assigned once at
    /// creation, immutable for the attempt's lifetime.
    owned_path: String,
    /// Base name of the sibling watched most recently, when queued.
    predecessor: Option<String>,
    state: AttemptState,
}

/// A fair distributed mutex over a hierarchical coordination service.
///
/// Acquisition queues an ephemeral sequential request node under the lock
/// root and waits, FIFO by node sequence, until every earlier request is
/// gone. Crashed or expired participants are skipped automatically: their
/// ephemeral nodes die with their session, which wakes whoever was waiting
/// on them.
///
/// One instance is one queue participant. All operations take `&mut self`,
/// so an instance runs at most one attempt at a time; concurrent
/// contenders are separate instances, typically one per session handle.
/// The lock is not reentrant: acquiring while already holding is an error.
pub struct QueueLock<C: CoordinationClient + ?Sized + 'static> {
    client: Arc<C>,
    root: String,
    holder_id: String,
    config: LockConfig,
    attempt: Option<LockRequest>,
}

impl<C: CoordinationClient + ?Sized + 'static> QueueLock<C> {
    /// Create a new lock handle.
    ///
    /// # Arguments
    /// * `client` - Session-scoped coordination service handle
    /// * `root` - Persistent node under which requests queue; must be
    ///   dedicated to this lock
    /// * `holder_id` - Unique identifier for this participant
    /// * `config` - Lock configuration
    pub fn new(
        client: Arc<C>,
        root: impl Into<String>,
        holder_id: impl Into<String>,
        config: LockConfig,
    ) -> Self {
        Self {
            client,
            root: root.into(),
            holder_id: holder_id.into(),
            config,
            attempt: None,
        }
    }

    /// Acquire the lock, waiting in the queue as long as it takes.
    ///
    /// Each pass of the acquisition loop re-lists the siblings, and a
    /// wait on a predecessor ends only when that node is deleted, so the
    /// call blocks without polling. Fails with [`LockError::AlreadyHeld`]
    /// if this instance already holds the lock, and with
    /// [`LockError::Lost`] if the request node vanishes mid-queue.
    pub async fn lock(&mut self) -> Result<(), LockError> {
        let request = self.begin_attempt().await?;
        // No deadline and no token: the drive can only end by acquiring
        // or by failing.
        self.drive(request, None, None).await.map(|_| ())
    }

    /// Acquire the lock, giving up when `cancel` fires.
    ///
    /// Cancellation is observed while blocked behind a predecessor. On
    /// cancellation the queued request node is withdrawn before
    /// [`LockError::Interrupted`] is returned, so no abandoned entry is
    /// left to stall the queue.
    pub async fn lock_interruptible(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), LockError> {
        let request = self.begin_attempt().await?;
        self.drive(request, None, Some(cancel)).await.map(|_| ())
    }

    /// Attempt to acquire the lock without waiting.
    ///
    /// Returns `Ok(false)` when another request is ahead. The request node
    /// deliberately stays queued in that case: the attempt is parked, and
    /// a later [`lock`](QueueLock::lock) call on this instance resumes it
    /// at the same queue position. No deletion watch is armed, so nothing
    /// is left to leak. A parked attempt is resumed by any acquisition
    /// call and abandoned by dropping the instance.
    pub async fn try_lock(&mut self) -> Result<bool, LockError> {
        let mut request = self.begin_attempt().await?;
        let siblings = match self.client.list_children(&self.root).await {
            Ok(siblings) => siblings,
            Err(error) => {
                self.attempt = Some(request);
                return Err(error.into());
            }
        };

        match ordering::queue_position(&siblings, ordering::base_name(&request.owned_path)) {
            None => self.report_lost(request),
            Some(QueuePosition::Front) => {
                request.predecessor = None;
                request.state = AttemptState::Held;
                debug!(path = %request.owned_path, holder = %self.holder_id, "lock acquired");
                self.attempt = Some(request);
                Ok(true)
            }
            Some(QueuePosition::Behind { predecessor }) => {
                debug!(
                    path = %request.owned_path,
                    predecessor = %predecessor,
                    "lock busy, request parked"
                );
                request.predecessor = Some(predecessor);
                request.state = AttemptState::Waiting;
                self.attempt = Some(request);
                Ok(false)
            }
        }
    }

    /// Acquire the lock, waiting at most `timeout` in total.
    ///
    /// The bound caps the whole acquisition, not each wait: however many
    /// predecessors come and go, the call returns by the deadline. On
    /// expiry the request node is withdrawn and `Ok(false)` is returned,
    /// leaving no stale entry in the queue.
    pub async fn try_lock_for(&mut self, timeout: Duration) -> Result<bool, LockError> {
        let deadline = Instant::now() + timeout;
        let request = self.begin_attempt().await?;
        self.drive(request, Some(deadline), None).await
    }

    /// Release the lock.
    ///
    /// Deletes the request node, which is the only signal the next waiter
    /// gets. Fails with [`LockError::NotHeld`] if this instance does not
    /// hold the lock, and with [`LockError::Lost`] if the node had already
    /// vanished because the session expired while we believed we held it.
    /// The loss is reported, never papered over.
    pub async fn unlock(&mut self) -> Result<(), LockError> {
        let request = match self.attempt.take() {
            Some(request) if request.state == AttemptState::Held => request,
            other => {
                self.attempt = other;
                return NotHeldSnafu.fail();
            }
        };

        match self.client.exists(&request.owned_path).await {
            Ok(true) => {}
            Ok(false) => return self.report_lost(request).map(|_| ()),
            Err(error) => {
                self.attempt = Some(request);
                return Err(error.into());
            }
        }

        match self.client.delete(&request.owned_path).await {
            Ok(()) => {
                debug!(path = %request.owned_path, holder = %self.holder_id, "lock released");
                Ok(())
            }
            Err(error) => {
                self.attempt = Some(request);
                Err(error.into())
            }
        }
    }

    /// Current state of the in-flight attempt, [`AttemptState::Idle`] when
    /// there is none.
    pub fn state(&self) -> AttemptState {
        self.attempt
            .as_ref()
            .map(|request| request.state)
            .unwrap_or(AttemptState::Idle)
    }

    /// Whether this instance currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.state() == AttemptState::Held
    }

    /// Path of the live request node, if an attempt is in flight.
    pub fn owned_path(&self) -> Option<&str> {
        self.attempt.as_ref().map(|request| request.owned_path.as_str())
    }

    /// This participant's identifier.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// The lock root path.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Take over a live attempt or create a fresh request node.
    async fn begin_attempt(&mut self) -> Result<LockRequest, LockError> {
        match self.attempt.take() {
            Some(request) => match request.state {
                AttemptState::Held => {
                    let owned_path = request.owned_path.clone();
                    self.attempt = Some(request);
                    AlreadyHeldSnafu { owned_path }.fail()
                }
                // A lost attempt is dead; start over with a fresh node.
                AttemptState::Lost => self.create_request().await,
                _ => Ok(request),
            },
            None => self.create_request().await,
        }
    }

    /// Create the ephemeral sequential request node for a new attempt.
    async fn create_request(&self) -> Result<LockRequest, LockError> {
        self.client.ensure_root(&self.root).await?;

        let stamp = HolderInfo::new(self.holder_id.clone());
        let payload = serde_json::to_string(&stamp)?;
        let prefix = ordering::child_path(&self.root, &self.config.request_prefix);
        let owned_path = self
            .client
            .create_ephemeral_sequential(&prefix, &payload)
            .await?;

        debug!(path = %owned_path, holder = %self.holder_id, "request node created");
        Ok(LockRequest {
            owned_path,
            predecessor: None,
            state: AttemptState::Requested,
        })
    }

    /// The acquisition loop: evaluate position, wait on the predecessor,
    /// re-evaluate on wake.
    ///
    /// Returns `Ok(true)` once front, `Ok(false)` if the deadline expired
    /// (after withdrawing the request node). An explicit loop: depth of
    /// contention must not translate into stack depth.
    async fn drive(
        &mut self,
        mut request: LockRequest,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool, LockError> {
        loop {
            let siblings = match self.client.list_children(&self.root).await {
                Ok(siblings) => siblings,
                Err(error) => {
                    // The node is still queued; a later call resumes it.
                    self.attempt = Some(request);
                    return Err(error.into());
                }
            };

            match ordering::queue_position(&siblings, ordering::base_name(&request.owned_path)) {
                None => return self.report_lost(request).map(|_| false),
                Some(QueuePosition::Front) => {
                    request.predecessor = None;
                    request.state = AttemptState::Held;
                    debug!(path = %request.owned_path, holder = %self.holder_id, "lock acquired");
                    self.attempt = Some(request);
                    return Ok(true);
                }
                Some(QueuePosition::Behind { predecessor }) => {
                    let watch_path = ordering::child_path(&self.root, &predecessor);
                    request.predecessor = Some(predecessor);
                    request.state = AttemptState::Waiting;
                    debug!(
                        path = %request.owned_path,
                        predecessor = %watch_path,
                        "waiting on predecessor"
                    );

                    let gate = WaitGate::new(Arc::clone(&self.client), watch_path);
                    match gate.wait(deadline, cancel).await {
                        Ok(WaitOutcome::Notified) => {
                            // Re-derive the position from a fresh listing;
                            // the watched node may have been an expired
                            // waiter, not the holder.
                            request.state = AttemptState::Requested;
                        }
                        Ok(WaitOutcome::TimedOut) => {
                            self.withdraw(request).await?;
                            return Ok(false);
                        }
                        Ok(WaitOutcome::Interrupted) => {
                            let owned_path = request.owned_path.clone();
                            self.withdraw(request).await?;
                            return InterruptedSnafu { owned_path }.fail();
                        }
                        Err(error) => {
                            self.attempt = Some(request);
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// Delete the attempt's request node and clear local state.
    ///
    /// On delete failure the attempt is retained: the node is still queued
    /// at the service, and a later call can resume it or retry cleanup.
    async fn withdraw(&mut self, request: LockRequest) -> Result<(), LockError> {
        match self.client.delete(&request.owned_path).await {
            Ok(()) => {
                debug!(path = %request.owned_path, "request node withdrawn");
                self.attempt = None;
                Ok(())
            }
            Err(error) => {
                self.attempt = Some(request);
                Err(error.into())
            }
        }
    }

    /// Record and surface the loss of the request node.
    fn report_lost(&mut self, mut request: LockRequest) -> Result<bool, LockError> {
        let owned_path = request.owned_path.clone();
        let predecessor = request.predecessor.take();
        request.state = AttemptState::Lost;
        self.attempt = Some(request);
        warn!(path = %owned_path, "request node vanished before release");
        LostSnafu {
            owned_path,
            predecessor,
        }
        .fail()
    }
}

impl<C: CoordinationClient + ?Sized + 'static> Drop for QueueLock<C> {
    fn drop(&mut self) {
        let Some(request) = self.attempt.take() else {
            return;
        };
        if request.state == AttemptState::Lost {
            return;
        }

        // Best-effort withdrawal; session cleanup reclaims the ephemeral
        // node anyway if this never runs.
        let client = Arc::clone(&self.client);
        let path = request.owned_path;
        tokio::spawn(async move {
            match client.delete(&path).await {
                Ok(()) => debug!(path = %path, "request node withdrawn on drop"),
                Err(error) => {
                    debug!(path = %path, error = %error, "withdraw on drop failed, session cleanup will reclaim")
                }
            }
        });
    }
}
