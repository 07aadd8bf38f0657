//! Capability interface to the hierarchical coordination service.
//!
//! The lock never talks to a concrete coordination service directly. It
//! consumes this narrow trait, which covers exactly the primitives the fair
//! lock recipe needs: persistent roots, ephemeral sequential children,
//! sibling listing, and one-shot deletion watches. Production deployments
//! implement [`CoordinationClient`] over their service's wire client; tests
//! use the in-memory [`DeterministicCoordination`](crate::DeterministicCoordination)
//! service.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

/// Identifier for a registered deletion watch.
///
/// Opaque to callers; pass it back to [`CoordinationClient::unsubscribe`]
/// to tear the watch down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

/// An armed deletion watch.
///
/// `fired` resolves at most once, when the watched node is deleted. Dropping
/// the receiver does not remove the registration; callers must still
/// [`unsubscribe`](CoordinationClient::unsubscribe) with `id`.
#[derive(Debug)]
pub struct WatchSubscription {
    /// Handle for tearing the watch down.
    pub id: SubscriptionId,
    /// Resolves when the watched node is deleted.
    pub fired: oneshot::Receiver<()>,
}

/// Result of registering interest in a node's deletion.
///
/// The already-absent case is reported synchronously as a variant rather
/// than through the channel. Between listing siblings and subscribing to a
/// predecessor, the predecessor may vanish; a subscription on an absent node
/// would never fire, so the caller must learn about the gap immediately.
#[derive(Debug)]
pub enum DeleteWatch {
    /// The node was already absent when the subscription was attempted.
    AlreadyGone,
    /// The node existed and the watch is armed.
    Armed(WatchSubscription),
}

/// Errors surfaced by a coordination service client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transient failure reaching the coordination service.
    #[error("coordination service unreachable: {reason}")]
    Connectivity { reason: String },
    /// The session behind this handle has ended; the handle is unusable.
    #[error("coordination session expired")]
    SessionExpired,
    /// A node operation referenced a parent that does not exist.
    #[error("no such parent node '{path}'")]
    NoSuchParent { path: String },
}

/// Session-scoped handle to a hierarchical coordination service.
///
/// Nodes form a `/`-separated tree. Persistent nodes survive their creator;
/// ephemeral nodes are removed by the service when the creating session
/// ends. Sequential children carry a fixed-width, zero-padded, per-parent
/// counter suffix assigned at creation.
///
/// # Ordering requirement
///
/// The lock relies on lexicographic order of same-prefix siblings equalling
/// creation order. That holds as long as the per-parent counter stays within
/// its 10-digit width; overflowing the width is out of contract.
///
/// # Dedicated roots
///
/// A lock root must not be shared with unrelated children: every child of
/// the root is interpreted as a queued lock request.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Create the persistent node at `path` (and any missing ancestors).
    ///
    /// Idempotent: succeeds if the node already exists.
    async fn ensure_root(&self, path: &str) -> Result<(), ClientError>;

    /// Create an ephemeral sequential child.
    ///
    /// `path_prefix` is the parent path plus the child name prefix, e.g.
    /// `/locks/jobs/req-`. The service appends a 10-digit zero-padded
    /// counter value that increases with every sequential child of the same
    /// parent and creates the node with `payload` as its content. Returns
    /// the full path of the created node.
    async fn create_ephemeral_sequential(
        &self,
        path_prefix: &str,
        payload: &str,
    ) -> Result<String, ClientError>;

    /// List the base names of the children of `parent`.
    ///
    /// No ordering is guaranteed; callers sort.
    async fn list_children(&self, parent: &str) -> Result<Vec<String>, ClientError>;

    /// Whether a node currently exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, ClientError>;

    /// Register interest in the deletion of the node at `path`.
    ///
    /// If the node is already absent this reports
    /// [`DeleteWatch::AlreadyGone`] synchronously instead of arming a watch
    /// that would never fire. An armed watch fires at most once.
    async fn subscribe_on_delete(&self, path: &str) -> Result<DeleteWatch, ClientError>;

    /// Remove a previously armed watch.
    ///
    /// Idempotent: unknown or already-fired ids are a no-op.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ClientError>;

    /// Delete the node at `path`.
    ///
    /// Idempotent: deleting an absent node is a no-op.
    async fn delete(&self, path: &str) -> Result<(), ClientError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: CoordinationClient + ?Sized> CoordinationClient for std::sync::Arc<T> {
    async fn ensure_root(&self, path: &str) -> Result<(), ClientError> {
        (**self).ensure_root(path).await
    }

    async fn create_ephemeral_sequential(
        &self,
        path_prefix: &str,
        payload: &str,
    ) -> Result<String, ClientError> {
        (**self).create_ephemeral_sequential(path_prefix, payload).await
    }

    async fn list_children(&self, parent: &str) -> Result<Vec<String>, ClientError> {
        (**self).list_children(parent).await
    }

    async fn exists(&self, path: &str) -> Result<bool, ClientError> {
        (**self).exists(path).await
    }

    async fn subscribe_on_delete(&self, path: &str) -> Result<DeleteWatch, ClientError> {
        (**self).subscribe_on_delete(path).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ClientError> {
        (**self).unsubscribe(id).await
    }

    async fn delete(&self, path: &str) -> Result<(), ClientError> {
        (**self).delete(path).await
    }
}
