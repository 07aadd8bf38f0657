//! Fair distributed locking over a hierarchical coordination service.
//!
//! This crate implements the classic queue-lock recipe on top of ephemeral
//! sequential nodes and deletion watches:
//!
//! - `QueueLock` - FIFO mutual exclusion; lock, interruptible lock,
//!   non-blocking and bounded-wait variants, explicit unlock
//! - `WaitGate` - single-use bridge from a deletion notification to an
//!   awaited outcome, with guaranteed watch teardown
//! - `CoordinationClient` - the capability trait a coordination service
//!   must provide (persistent roots, ephemeral sequential children,
//!   sibling listing, one-shot deletion watches)
//! - `DeterministicCoordination` - in-memory service implementation for
//!   tests and simulation, with scriptable session expiry and fault
//!   injection
//! - `ordering` - pure queue-position logic, separated from I/O
//!
//! Each waiter watches only the sibling immediately ahead of it, so a
//! release wakes exactly one task instead of the whole queue, and requests
//! are served in creation order. Participants that crash or lose their
//! session are skipped automatically because their request nodes are
//! ephemeral.
//!
//! ## Lock Example
//!
//! ```ignore
//! use turnstile::{DeterministicCoordination, LockConfig, QueueLock};
//!
//! let service = DeterministicCoordination::new();
//! let client = std::sync::Arc::new(service.session());
//!
//! let mut lock = QueueLock::new(client, "/locks/reports", "worker-1", LockConfig::default());
//! lock.lock().await?;
//! // Critical section: sole holder until unlock.
//! lock.unlock().await?;
//! ```
//!
//! ## Bounded Wait Example
//!
//! ```ignore
//! use std::time::Duration;
//!
//! if lock.try_lock_for(Duration::from_secs(5)).await? {
//!     // Acquired within the bound.
//!     lock.unlock().await?;
//! } else {
//!     // Timed out; the queue entry was withdrawn.
//! }
//! ```

mod client;
mod error;
mod gate;
mod inmemory;
mod lock;
pub mod ordering;
mod types;

pub use client::ClientError;
pub use client::CoordinationClient;
pub use client::DeleteWatch;
pub use client::SubscriptionId;
pub use client::WatchSubscription;
pub use error::LockError;
pub use gate::WaitGate;
pub use gate::WaitOutcome;
pub use inmemory::CoordinationSession;
pub use inmemory::DeterministicCoordination;
pub use lock::AttemptState;
pub use lock::LockConfig;
pub use lock::QueueLock;
pub use ordering::QueuePosition;
pub use types::HolderInfo;
pub use types::now_unix_ms;
