//! Shared types for the queue lock.

use serde::Deserialize;
use serde::Serialize;

/// Stamp written as the payload of a request node.
///
/// Serialized as JSON for human readability and debugging. The lock never
/// reads payloads back; queue order is derived from node names alone, so
/// this exists for operators inspecting the lock root and for tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HolderInfo {
    /// Unique identifier of the client that created the request.
    pub holder_id: String,
    /// When the request node was created (Unix timestamp milliseconds).
    pub created_at_ms: u64,
}

impl HolderInfo {
    /// Create a stamp for `holder_id` timestamped now.
    pub fn new(holder_id: impl Into<String>) -> Self {
        Self {
            holder_id: holder_id.into(),
            created_at_ms: now_unix_ms(),
        }
    }
}

/// Get current Unix timestamp in milliseconds.
///
/// Returns 0 if system time is before UNIX epoch (should never happen
/// on properly configured systems, but prevents panics).
#[inline]
pub fn now_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
