//! One-shot bridge from a deletion notification to an awaited outcome.
//!
//! A [`WaitGate`] parks one acquisition attempt on the deletion of one node
//! (its queue predecessor). The gate is consumed by [`WaitGate::wait`], so
//! it can never be reused, and the deletion watch it arms is torn down on
//! every exit path: notification, deadline, cancellation, and error all
//! leave no subscription behind.

use std::future::pending;
use std::sync::Arc;

use tokio::time::Instant;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::CoordinationClient;
use crate::client::DeleteWatch;
use crate::client::WatchSubscription;
use crate::error::LockError;

/// Outcome of a [`WaitGate::wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The watched node was deleted, or was already gone at subscribe time.
    Notified,
    /// The deadline passed before the node was deleted.
    TimedOut,
    /// The cancellation token fired before the node was deleted.
    Interrupted,
}

/// Single-use wait for the deletion of one node.
pub struct WaitGate<C: CoordinationClient + ?Sized> {
    client: Arc<C>,
    path: String,
}

impl<C: CoordinationClient + ?Sized> WaitGate<C> {
    /// Create a gate that will wait for the node at `path` to be deleted.
    pub fn new(client: Arc<C>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    /// Wait until the watched node is deleted, the deadline passes, or the
    /// token is cancelled, whichever comes first.
    ///
    /// If the node is already absent when the watch is registered, the
    /// service reports it synchronously and the gate returns
    /// [`WaitOutcome::Notified`] without suspending. This closes the race
    /// between listing siblings and subscribing: a predecessor deleted in
    /// that window must wake the caller, not strand it on a watch that will
    /// never fire.
    ///
    /// `None` for `deadline` or `cancel` disables that arm.
    pub async fn wait(
        self,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> Result<WaitOutcome, LockError> {
        let WatchSubscription { id, fired } = match self.client.subscribe_on_delete(&self.path).await? {
            DeleteWatch::AlreadyGone => {
                debug!(path = %self.path, "watched node already gone at subscribe");
                return Ok(WaitOutcome::Notified);
            }
            DeleteWatch::Armed(subscription) => subscription,
        };

        // A closed channel also counts as a notification: the service
        // discarded the watch, and the caller re-lists on wake either way.
        let outcome = tokio::select! {
            _ = fired => WaitOutcome::Notified,
            _ = until(deadline) => WaitOutcome::TimedOut,
            _ = cancelled(cancel) => WaitOutcome::Interrupted,
        };

        self.client.unsubscribe(id).await?;
        debug!(path = %self.path, ?outcome, "wait gate resolved");
        Ok(outcome)
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => pending().await,
    }
}
