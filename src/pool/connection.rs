// ABOUTME: Pooled connection records and the handles callers receive on acquire
//
// A PooledConnection is owned by exactly one ConnectionPool. Callers only
// ever see a ConnectionHandle: a cheap clone of the connection plus the id
// the pool uses to match it on release.

use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// === Connection ID ===

/// Unique identifier for a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// === Connection Handle ===

/// Exclusive checkout of a pooled connection
///
/// Hand it back with `ConnectionPool::release` (or
/// `PoolManager::release_connection`). Dropping a handle does not return
/// the connection.
pub struct ConnectionHandle<C> {
    id: ConnectionId,
    connection: Arc<C>,
}

impl<C> ConnectionHandle<C> {
    pub(crate) fn new(id: ConnectionId, connection: Arc<C>) -> Self {
        Self { id, connection }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }
}

// Manual impl: deriving would require `C: Clone`
impl<C> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C> Deref for ConnectionHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> std::fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}

// === Pooled Connection ===

/// A connection owned by a pool, with its checkout state
pub struct PooledConnection<C> {
    /// Identity used to match releases
    pub id: ConnectionId,

    /// The provider's connection object
    connection: Arc<C>,

    /// True while checked out to a caller
    is_active: bool,

    /// Stamped on every acquire and release
    last_used: Instant,

    created_at: Instant,

    /// Number of times this connection has been handed out
    use_count: u64,
}

impl<C> PooledConnection<C> {
    /// Wrap a freshly created connection; it starts checked out
    pub(crate) fn new_active(connection: C) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            connection: Arc::new(connection),
            is_active: true,
            last_used: now,
            created_at: now,
            use_count: 1,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub(crate) fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Mark as checked out and build the caller's handle
    pub(crate) fn checkout(&mut self) -> ConnectionHandle<C> {
        self.is_active = true;
        self.use_count += 1;
        self.touch();
        self.handle()
    }

    /// Mark as idle
    pub(crate) fn check_in(&mut self) {
        self.is_active = false;
        self.touch();
    }

    pub(crate) fn handle(&self) -> ConnectionHandle<C> {
        ConnectionHandle::new(self.id, Arc::clone(&self.connection))
    }

    /// Update last-used timestamp
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn into_connection(self) -> (ConnectionId, Arc<C>) {
        (self.id, self.connection)
    }
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("is_active", &self.is_active)
            .field("use_count", &self.use_count)
            .finish()
    }
}
