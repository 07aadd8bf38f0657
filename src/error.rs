//! Error types for the queue lock.

use snafu::Snafu;

use crate::client::ClientError;

/// Errors surfaced by [`QueueLock`](crate::QueueLock) operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LockError {
    /// The request node vanished while the attempt was alive.
    ///
    /// The session that owned the node expired, or an operator deleted it.
    /// The attempt is dead; a subsequent acquisition starts over with a
    /// fresh request node.
    #[snafu(display("lock request '{owned_path}' lost before release"))]
    Lost {
        /// Path of the request node that disappeared.
        owned_path: String,
        /// Sibling being watched when the loss was detected, if any.
        predecessor: Option<String>,
    },

    /// Release was attempted without the lock being held.
    #[snafu(display("lock is not held"))]
    NotHeld,

    /// Acquisition was attempted while this instance already holds the lock.
    #[snafu(display("lock already held via request '{owned_path}'"))]
    AlreadyHeld {
        /// Path of the live request node.
        owned_path: String,
    },

    /// Acquisition was cancelled while waiting in the queue.
    ///
    /// The queued request node was withdrawn before this was returned.
    #[snafu(display("lock acquisition interrupted, request '{owned_path}' withdrawn"))]
    Interrupted {
        /// Path of the withdrawn request node.
        owned_path: String,
    },

    /// The coordination service reported an error.
    #[snafu(display("coordination client error: {source}"))]
    Client {
        /// The underlying error.
        source: ClientError,
    },

    /// JSON serialization of a node payload failed.
    #[snafu(display("payload serialization error: {source}"))]
    Serialization {
        /// The underlying error.
        source: serde_json::Error,
    },
}

impl From<ClientError> for LockError {
    fn from(source: ClientError) -> Self {
        LockError::Client { source }
    }
}

impl From<serde_json::Error> for LockError {
    fn from(source: serde_json::Error) -> Self {
        LockError::Serialization { source }
    }
}
