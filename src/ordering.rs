//! Pure queue-position logic for sequential request nodes.
//!
//! This module implements the "Functional Core, Imperative Shell" pattern:
//! deciding where a request stands in the queue is separated from the async
//! calls that fetch sibling snapshots. All functions here are deterministic,
//! total, and side-effect free.
//!
//! The ordering contract comes from the coordination service: sequential
//! children of one parent carry a fixed-width, per-parent increasing counter
//! suffix, so lexicographic order of same-prefix sibling names equals
//! creation order.

/// Where a request node stands within its sibling queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePosition {
    /// Lowest sequence among the siblings: the lock is held.
    Front,
    /// Not lowest: wait for the named sibling to disappear.
    Behind {
        /// Base name of the sibling immediately ahead in the queue.
        predecessor: String,
    },
}

/// Compute the position of `own_name` within a snapshot of sibling names.
///
/// Siblings may arrive in any order; the snapshot is sorted here. The
/// predecessor of a non-front request is the sibling ranked directly ahead
/// of it, not necessarily the front: each waiter watches only its immediate
/// predecessor so that a release wakes exactly one waiter.
///
/// Returns `None` when `own_name` is absent from the snapshot. Callers must
/// treat that as the request node having been removed underneath them
/// (session expiry), never as an invitation to proceed.
#[inline]
pub fn queue_position(siblings: &[String], own_name: &str) -> Option<QueuePosition> {
    let mut sorted: Vec<&str> = siblings.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let rank = sorted.iter().position(|name| *name == own_name)?;
    if rank == 0 {
        Some(QueuePosition::Front)
    } else {
        Some(QueuePosition::Behind {
            predecessor: sorted[rank - 1].to_string(),
        })
    }
}

/// Base name of a node path: the segment after the last `/`.
///
/// A path without `/` is returned unchanged.
#[inline]
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a parent path and a child base name with a single `/`.
#[inline]
pub fn child_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

/// Parse the trailing decimal counter from a sequential node name.
///
/// Returns `None` for names without a trailing digit run or with one too
/// large for `u64`. Ordering decisions never depend on this; it exists for
/// diagnostics and tests.
#[inline]
pub fn sequence_of(name: &str) -> Option<u64> {
    let digits = name.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}
