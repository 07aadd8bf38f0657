//! In-memory coordination service for tests and deterministic simulation.
//!
//! Provides a non-persistent implementation of [`CoordinationClient`] that
//! mirrors the behavior of a production hierarchical coordination service
//! without network I/O: a shared node tree, per-parent sequence counters,
//! session-owned ephemeral nodes, and one-shot deletion watches. Session
//! lifecycle is driven explicitly ([`CoordinationSession::expire`] and
//! [`CoordinationSession::close`]) so tests can script expiry at exact
//! points.
//!
//! # Limitations
//!
//! - No persistence and no replication; state lives in one process.
//! - Deleting a node does not cascade to children (lock request nodes are
//!   always leaves).
//! - Timestamps and quotas of real services are not modeled.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tokio::sync::oneshot;
use tracing::debug;

use crate::client::ClientError;
use crate::client::CoordinationClient;
use crate::client::DeleteWatch;
use crate::client::SubscriptionId;
use crate::client::WatchSubscription;

#[derive(Default)]
struct NodeRecord {
    payload: String,
    /// Owning session for ephemeral nodes; `None` marks a persistent node.
    owner: Option<u64>,
}

struct RegisteredWatch {
    id: SubscriptionId,
    sender: oneshot::Sender<()>,
}

#[derive(Default)]
struct Namespace {
    nodes: HashMap<String, NodeRecord>,
    /// Next sequence number per parent path.
    next_sequence: HashMap<String, u64>,
    watches: HashMap<String, Vec<RegisteredWatch>>,
    next_subscription: u64,
    dead_sessions: HashSet<u64>,
    /// Remaining injected-failure count per session.
    fault_budgets: HashMap<u64, u32>,
}

impl Namespace {
    /// Fire and discard every watch registered on `path`.
    fn fire_watches(&mut self, path: &str) {
        if let Some(watchers) = self.watches.remove(path) {
            for watch in watchers {
                // The receiver may already be dropped; a missed send is fine.
                let _ = watch.sender.send(());
            }
        }
    }

    /// Remove a session's ephemeral nodes, firing their deletion watches.
    fn end_session(&mut self, session: u64) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, record)| record.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.nodes.remove(&path);
            self.fire_watches(&path);
            debug!(path = %path, session, "ephemeral node removed with session");
        }
        self.fault_budgets.remove(&session);
    }
}

fn child_names(nodes: &HashMap<String, NodeRecord>, parent: &str) -> Vec<String> {
    let prefix = format!("{}/", parent.trim_end_matches('/'));
    nodes
        .keys()
        .filter_map(|path| path.strip_prefix(&prefix))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .map(str::to_string)
        .collect()
}

/// In-memory deterministic coordination service.
///
/// Create sessions with [`session`](DeterministicCoordination::session);
/// each session is an independent [`CoordinationClient`] whose ephemeral
/// nodes die with it. The inherent methods on the service itself are
/// inspection oracles for tests, not part of the client capability.
///
/// # Example
///
/// ```ignore
/// let service = DeterministicCoordination::new();
/// let client = Arc::new(service.session());
/// client.ensure_root("/locks/jobs").await?;
/// let path = client.create_ephemeral_sequential("/locks/jobs/req-", "{}").await?;
/// assert_eq!(service.node_count("/locks/jobs").await, 1);
/// ```
#[derive(Default)]
pub struct DeterministicCoordination {
    inner: Mutex<Namespace>,
    next_session: AtomicU64,
}

impl DeterministicCoordination {
    /// Create a new in-memory coordination service with an empty node tree.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new session against this service.
    pub fn session(self: &Arc<Self>) -> CoordinationSession {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session, "session opened");
        CoordinationSession {
            service: Arc::clone(self),
            session: AtomicU64::new(session),
        }
    }

    /// Number of children currently under `parent` (0 if absent).
    pub async fn node_count(&self, parent: &str) -> usize {
        let ns = self.inner.lock().await;
        child_names(&ns.nodes, parent).len()
    }

    /// Total number of armed deletion watches across all paths.
    ///
    /// Fired and unsubscribed watches are pruned, so a nonzero count after
    /// a completed acquisition cycle means a leaked subscription.
    pub async fn watch_count(&self) -> usize {
        let ns = self.inner.lock().await;
        ns.watches.values().map(Vec::len).sum()
    }

    /// Payload stored on the node at `path`, if the node exists.
    pub async fn payload_of(&self, path: &str) -> Option<String> {
        let ns = self.inner.lock().await;
        ns.nodes.get(path).map(|record| record.payload.clone())
    }
}

/// One session against a [`DeterministicCoordination`] service.
///
/// Implements [`CoordinationClient`]. A session's ephemeral nodes are
/// removed (and their deletion watches fired) when the session ends via
/// [`expire`](CoordinationSession::expire) or
/// [`close`](CoordinationSession::close).
pub struct CoordinationSession {
    service: Arc<DeterministicCoordination>,
    session: AtomicU64,
}

impl CoordinationSession {
    /// Identifier of the currently bound session.
    pub fn session_id(&self) -> u64 {
        self.session.load(Ordering::Relaxed)
    }

    /// Simulate session expiry with automatic reconnect.
    ///
    /// The session's ephemeral nodes are removed and their deletion watches
    /// fire, exactly as when a real session times out. The handle then
    /// rebinds to a fresh session and stays usable, which models a client
    /// library reconnecting after the timeout: the client can still talk to
    /// the service, but every node it owned is gone.
    pub async fn expire(&self) {
        let fresh = self.service.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let mut ns = self.service.inner.lock().await;
        let old = self.session.swap(fresh, Ordering::Relaxed);
        ns.end_session(old);
        debug!(old_session = old, new_session = fresh, "session expired, handle rebound");
    }

    /// End the session for good.
    ///
    /// Ephemeral nodes are removed and their watches fire, and every
    /// subsequent call on this handle fails with
    /// [`ClientError::SessionExpired`].
    pub async fn close(&self) {
        let mut ns = self.service.inner.lock().await;
        let session = self.session.load(Ordering::Relaxed);
        ns.dead_sessions.insert(session);
        ns.end_session(session);
        debug!(session, "session closed");
    }

    /// Make the next `count` client calls on this session fail with
    /// [`ClientError::Connectivity`].
    ///
    /// The budget is consumed call by call and the session recovers by
    /// itself, so error-propagation paths can be tested deterministically.
    pub async fn fail_next_calls(&self, count: u32) {
        let mut ns = self.service.inner.lock().await;
        let session = self.session.load(Ordering::Relaxed);
        ns.fault_budgets.insert(session, count);
    }

    /// Common prologue for every client call: session liveness check and
    /// fault-budget accounting, then the namespace guard.
    async fn begin(&self) -> Result<MutexGuard<'_, Namespace>, ClientError> {
        let mut ns = self.service.inner.lock().await;
        let session = self.session.load(Ordering::Relaxed);
        if ns.dead_sessions.contains(&session) {
            return Err(ClientError::SessionExpired);
        }
        if let Some(budget) = ns.fault_budgets.get_mut(&session)
            && *budget > 0
        {
            *budget -= 1;
            return Err(ClientError::Connectivity {
                reason: "injected fault".to_string(),
            });
        }
        Ok(ns)
    }
}

#[async_trait]
impl CoordinationClient for CoordinationSession {
    async fn ensure_root(&self, path: &str) -> Result<(), ClientError> {
        let mut ns = self.begin().await?;
        let rooted = path.starts_with('/');
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() || rooted {
                prefix.push('/');
            }
            prefix.push_str(segment);
            ns.nodes.entry(prefix.clone()).or_default();
        }
        Ok(())
    }

    async fn create_ephemeral_sequential(
        &self,
        path_prefix: &str,
        payload: &str,
    ) -> Result<String, ClientError> {
        let mut ns = self.begin().await?;
        let parent = match path_prefix.rfind('/') {
            Some(idx) if idx > 0 => &path_prefix[..idx],
            _ => {
                return Err(ClientError::NoSuchParent {
                    path: path_prefix.to_string(),
                });
            }
        };
        if !ns.nodes.contains_key(parent) {
            return Err(ClientError::NoSuchParent {
                path: parent.to_string(),
            });
        }

        let counter = ns.next_sequence.entry(parent.to_string()).or_insert(0);
        let sequence = *counter;
        *counter += 1;
        debug_assert!(
            sequence < 10_000_000_000,
            "per-parent sequence counter exceeded its fixed width"
        );

        let path = format!("{path_prefix}{sequence:010}");
        let session = self.session.load(Ordering::Relaxed);
        ns.nodes.insert(
            path.clone(),
            NodeRecord {
                payload: payload.to_string(),
                owner: Some(session),
            },
        );
        debug!(path = %path, session, "ephemeral sequential node created");
        Ok(path)
    }

    async fn list_children(&self, parent: &str) -> Result<Vec<String>, ClientError> {
        let ns = self.begin().await?;
        if !ns.nodes.contains_key(parent) {
            return Err(ClientError::NoSuchParent {
                path: parent.to_string(),
            });
        }
        Ok(child_names(&ns.nodes, parent))
    }

    async fn exists(&self, path: &str) -> Result<bool, ClientError> {
        let ns = self.begin().await?;
        Ok(ns.nodes.contains_key(path))
    }

    async fn subscribe_on_delete(&self, path: &str) -> Result<DeleteWatch, ClientError> {
        let mut ns = self.begin().await?;
        if !ns.nodes.contains_key(path) {
            debug!(path = %path, "subscribe on absent node reported synchronously");
            return Ok(DeleteWatch::AlreadyGone);
        }

        ns.next_subscription += 1;
        let id = SubscriptionId(ns.next_subscription);
        let (sender, fired) = oneshot::channel();
        ns.watches
            .entry(path.to_string())
            .or_default()
            .push(RegisteredWatch { id, sender });
        debug!(path = %path, %id, "deletion watch armed");
        Ok(DeleteWatch::Armed(WatchSubscription { id, fired }))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ClientError> {
        let mut ns = self.begin().await?;
        for watchers in ns.watches.values_mut() {
            watchers.retain(|watch| watch.id != id);
        }
        ns.watches.retain(|_, watchers| !watchers.is_empty());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let mut ns = self.begin().await?;
        if ns.nodes.remove(path).is_some() {
            ns.fire_watches(path);
            debug!(path = %path, "node deleted");
        }
        Ok(())
    }
}
