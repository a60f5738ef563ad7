// ABOUTME: Bounded per-provider connection pool with lazy creation and FIFO waiters
// ABOUTME: Grants exclusive use of each connection, probes health, and disconnects on dispose

//! Per-provider connection pool.
//!
//! Connections are created on demand up to `pool_size` and reused after
//! release. When the pool is saturated, callers queue in FIFO order and a
//! released connection is handed straight to the oldest waiter.
//!
//! # Architecture
//!
//! ```text
//! acquire()                                 release(handle)
//!    │                                             │
//!    ▼                                             ▼
//! ┌────────────── PoolState (Mutex) ─────────────────────────┐
//! │ connections: [c1 active] [c2 idle] [c3 active]           │
//! │ pending: slots reserved for in-flight connect() calls    │
//! │ waiters: VecDeque<oneshot::Sender<Grant>>  (FIFO)        │
//! └──────────────────────────────────────────────────────────┘
//!    │ idle found → checkout         │ waiter queued → hand off
//!    │ room left  → reserve slot,    │ no waiter     → mark idle
//!    │              provider.connect()
//!    │ saturated  → enqueue waiter, await Grant
//! ```
//!
//! The state lock is never held across an `.await`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::connection::{ConnectionHandle, ConnectionId, PooledConnection};
use super::error::{DisconnectFailure, PoolError, PoolResult};
use super::health::{ConnectionHealth, HealthCheckResult};
use super::metrics::PoolMetrics;
use super::provider::{Provider, ProviderId};

// === Pool Status ===

/// Point-in-time snapshot of a pool's occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently owned by the pool
    pub total: usize,
    /// Connections checked out to callers
    pub active: usize,
    pub idle: usize,
    /// Slots reserved for connections still being created
    pub pending: usize,
    /// Callers queued for a connection
    pub waiters: usize,
    pub closed: bool,
}

// === Internal State ===

/// What a queued caller is woken with
enum Grant<C> {
    /// A released connection, already marked active for the waiter
    Connection(ConnectionHandle<C>),
    /// A reserved creation slot freed by a failed connect
    CreateSlot,
}

struct PoolState<C> {
    connections: Vec<PooledConnection<C>>,
    pending: usize,
    waiters: VecDeque<oneshot::Sender<Grant<C>>>,
    closed: bool,
}

enum Ticket<C> {
    Create,
    Wait(oneshot::Receiver<Grant<C>>),
}

// === Connection Pool ===

/// Bounded pool of connections to one provider
pub struct ConnectionPool<C> {
    provider_id: ProviderId,
    provider: Arc<dyn Provider<Connection = C>>,
    config: PoolConfig,
    state: Mutex<PoolState<C>>,
    metrics: PoolMetrics,
}

impl<C> std::fmt::Debug for ConnectionPool<C>
where
    C: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("provider_id", &self.provider_id)
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<C> ConnectionPool<C>
where
    C: Send + Sync + 'static,
{
    /// Create an empty pool. No connection is opened until the first acquire.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(
        provider_id: impl Into<ProviderId>,
        provider: Arc<dyn Provider<Connection = C>>,
        config: PoolConfig,
    ) -> PoolResult<Self> {
        config.validate()?;

        Ok(Self {
            provider_id: provider_id.into(),
            provider,
            state: Mutex::new(PoolState {
                connections: Vec::with_capacity(config.pool_size),
                pending: 0,
                waiters: VecDeque::new(),
                closed: false,
            }),
            config,
            metrics: PoolMetrics::new(),
        })
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn max_size(&self) -> usize {
        self.config.pool_size
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        let active = state.connections.iter().filter(|c| c.is_active()).count();

        PoolStatus {
            max_size: self.config.pool_size,
            total: state.connections.len(),
            active,
            idle: state.connections.len() - active,
            pending: state.pending,
            waiters: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            closed: state.closed,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a connection, waiting as long as the pool's configured
    /// `acquire_timeout` allows (forever by default)
    pub async fn acquire(&self) -> PoolResult<ConnectionHandle<C>> {
        self.acquire_timeout(self.config.acquire_timeout).await
    }

    /// Check out a connection with an explicit deadline
    ///
    /// Reuses the first idle connection, otherwise creates one if capacity
    /// allows, otherwise queues until a connection is released. Dropping the
    /// returned future while queued is safe: anything handed to it goes back
    /// to the pool.
    ///
    /// # Errors
    ///
    /// - `PoolClosed` if the pool was disposed
    /// - `ConnectionCreation` / `NotImplemented` if the provider factory failed
    /// - `AcquireTimeout` if `timeout` elapsed while queued
    pub async fn acquire_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> PoolResult<ConnectionHandle<C>> {
        let started = Instant::now();

        let ticket = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(PoolError::PoolClosed(self.provider_id.clone()));
            }

            if let Some(conn) = state.connections.iter_mut().find(|c| !c.is_active()) {
                let handle = conn.checkout();
                self.metrics.connection_reused();
                debug!(provider = %self.provider_id, connection = %handle.id(), "Reusing idle connection");
                return Ok(handle);
            }

            if state.connections.len() + state.pending < self.config.pool_size {
                state.pending += 1;
                Ticket::Create
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                self.metrics.wait_started();
                debug!(
                    provider = %self.provider_id,
                    waiters = state.waiters.len(),
                    "Pool saturated, waiting for a connection"
                );
                Ticket::Wait(rx)
            }
        };

        match ticket {
            Ticket::Create => self.create_connection().await,
            Ticket::Wait(rx) => self.wait_for_grant(rx, timeout, started).await,
        }
    }

    /// Open a connection into a slot that has already been reserved
    async fn create_connection(&self) -> PoolResult<ConnectionHandle<C>> {
        let mut reservation = SlotReservation {
            pool: self,
            armed: true,
        };
        let result = self.provider.connect().await;
        reservation.armed = false;

        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                self.metrics.creation_failed();
                self.return_slot();
                warn!(provider = %self.provider_id, error = %e, "Failed to create connection");
                return Err(PoolError::from_creation(&self.provider_id, e));
            }
        };

        let rejected = {
            let mut state = self.lock_state();
            state.pending -= 1;

            if state.closed {
                connection
            } else {
                let pooled = PooledConnection::new_active(connection);
                let handle = pooled.handle();
                state.connections.push(pooled);
                self.metrics.connection_created();
                info!(
                    provider = %self.provider_id,
                    connection = %handle.id(),
                    total = state.connections.len(),
                    max = self.config.pool_size,
                    "Created new connection"
                );
                return Ok(handle);
            }
        };

        // Disposed while connecting: the new connection has no pool to join
        if let Err(e) = self.provider.disconnect(&rejected).await {
            warn!(provider = %self.provider_id, error = %e, "Failed to disconnect orphaned connection");
        }
        Err(PoolError::PoolClosed(self.provider_id.clone()))
    }

    async fn wait_for_grant(
        &self,
        rx: oneshot::Receiver<Grant<C>>,
        timeout: Option<Duration>,
        started: Instant,
    ) -> PoolResult<ConnectionHandle<C>> {
        let mut waiter = Waiter {
            pool: self,
            rx,
            done: false,
        };

        let grant = match timeout {
            None => waiter.recv().await,
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, waiter.recv()).await;
                match outcome {
                    Ok(grant) => grant,
                    // A grant that raced the deadline is still honoured
                    Err(_) => match waiter.close_and_reclaim() {
                        Some(grant) => Some(grant),
                        None => {
                            self.metrics.wait_timed_out();
                            warn!(
                                provider = %self.provider_id,
                                waited_ms = %started.elapsed().as_millis(),
                                "Timed out waiting for a connection"
                            );
                            return Err(PoolError::AcquireTimeout {
                                provider: self.provider_id.clone(),
                                waited: started.elapsed(),
                            });
                        }
                    },
                }
            }
        };

        match grant {
            Some(Grant::Connection(handle)) => {
                self.metrics.connection_reused();
                debug!(
                    provider = %self.provider_id,
                    connection = %handle.id(),
                    waited_ms = %started.elapsed().as_millis(),
                    "Received released connection"
                );
                Ok(handle)
            }
            Some(Grant::CreateSlot) => self.create_connection().await,
            // Sender dropped: the pool was disposed while we waited
            None => Err(PoolError::PoolClosed(self.provider_id.clone())),
        }
    }

    /// Return a checked-out connection
    ///
    /// Returns `false` without side effects when the handle is unknown to
    /// this pool, already idle, or the pool has been disposed.
    pub fn release(&self, handle: &ConnectionHandle<C>) -> bool {
        let mut state = self.lock_state();
        if state.closed {
            return false;
        }

        let Some(index) = state
            .connections
            .iter()
            .position(|c| c.id == handle.id() && c.is_active())
        else {
            debug!(provider = %self.provider_id, connection = %handle.id(), "Ignoring release of unknown or idle connection");
            return false;
        };

        self.metrics.connection_released();
        Self::hand_off(&mut state, index);
        debug!(provider = %self.provider_id, connection = %handle.id(), "Connection released");
        true
    }

    /// Give a just-released connection to the oldest live waiter, or park it
    fn hand_off(state: &mut PoolState<C>, index: usize) {
        let PoolState {
            connections,
            waiters,
            ..
        } = state;
        let conn = &mut connections[index];

        while let Some(waiter) = waiters.pop_front() {
            if waiter.send(Grant::Connection(conn.handle())).is_ok() {
                conn.checkout();
                return;
            }
        }

        conn.check_in();
    }

    /// Free a reserved creation slot, passing it to a waiter if one is queued
    fn return_slot(&self) {
        let mut state = self.lock_state();

        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(Grant::CreateSlot).is_ok() {
                return;
            }
        }

        state.pending -= 1;
    }

    /// Put back a grant whose waiter went away before using it
    fn return_grant(&self, grant: Grant<C>) {
        match grant {
            Grant::Connection(handle) => {
                let mut state = self.lock_state();
                if state.closed {
                    return;
                }
                if let Some(index) = state.connections.iter().position(|c| c.id == handle.id()) {
                    Self::hand_off(&mut state, index);
                }
            }
            Grant::CreateSlot => self.return_slot(),
        }
    }

    /// Probe every connection concurrently and aggregate the outcome
    ///
    /// Active and idle connections are both probed. A failing probe is
    /// recorded in the result and never changes any connection's state.
    pub async fn check_health(&self) -> HealthCheckResult {
        let snapshot: Vec<(ConnectionId, Arc<C>)> = {
            let state = self.lock_state();
            state
                .connections
                .iter()
                .map(|c| (c.id, Arc::clone(c.connection())))
                .collect()
        };

        let probes = snapshot.iter().map(|(id, connection)| async move {
            let started = Instant::now();
            match self.provider.health_check(connection.as_ref()).await {
                Ok(()) => ConnectionHealth::healthy(*id, started.elapsed()),
                Err(e) => {
                    debug!(provider = %self.provider_id, connection = %id, error = %e, "Connection health check failed");
                    ConnectionHealth::unhealthy(*id, e.to_string())
                }
            }
        });

        let results = join_all(probes).await;
        self.metrics.health_check_run();
        HealthCheckResult::from_results(results)
    }

    /// Close the pool and disconnect every connection
    ///
    /// Disconnects run concurrently; each failure is logged and returned
    /// without stopping the others. Queued callers fail with `PoolClosed`.
    /// Calling this again returns an empty list.
    pub async fn dispose(&self) -> Vec<DisconnectFailure> {
        let connections = {
            let mut state = self.lock_state();
            state.closed = true;
            state.waiters.clear();
            std::mem::take(&mut state.connections)
        };

        if connections.is_empty() {
            debug!(provider = %self.provider_id, "Disposed empty pool");
            return Vec::new();
        }

        info!(provider = %self.provider_id, count = connections.len(), "Disposing pool");

        let disconnects = connections.into_iter().map(|pooled| {
            let (id, connection) = pooled.into_connection();
            async move { (id, self.provider.disconnect(connection.as_ref()).await) }
        });

        let failures: Vec<DisconnectFailure> = join_all(disconnects)
            .await
            .into_iter()
            .filter_map(|(connection_id, result)| {
                result.err().map(|error| {
                    warn!(
                        provider = %self.provider_id,
                        connection = %connection_id,
                        error = %error,
                        "Failed to disconnect connection"
                    );
                    DisconnectFailure {
                        connection_id,
                        error,
                    }
                })
            })
            .collect();

        info!(
            provider = %self.provider_id,
            failed = failures.len(),
            "Pool disposed"
        );
        failures
    }
}

// === Cancellation Guards ===

/// Frees a reserved slot if `connect()` is abandoned mid-flight
struct SlotReservation<'a, C>
where
    C: Send + Sync + 'static,
{
    pool: &'a ConnectionPool<C>,
    armed: bool,
}

impl<C> Drop for SlotReservation<'_, C>
where
    C: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            self.pool.return_slot();
        }
    }
}

/// A queued caller; returns any late grant to the pool when dropped
struct Waiter<'a, C>
where
    C: Send + Sync + 'static,
{
    pool: &'a ConnectionPool<C>,
    rx: oneshot::Receiver<Grant<C>>,
    done: bool,
}

impl<C> Waiter<'_, C>
where
    C: Send + Sync + 'static,
{
    async fn recv(&mut self) -> Option<Grant<C>> {
        let grant = (&mut self.rx).await.ok();
        self.done = true;
        grant
    }

    fn close_and_reclaim(&mut self) -> Option<Grant<C>> {
        self.rx.close();
        self.done = true;
        self.rx.try_recv().ok()
    }
}

impl<C> Drop for Waiter<'_, C>
where
    C: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.rx.close();
        if let Ok(grant) = self.rx.try_recv() {
            self.pool.return_grant(grant);
        }
    }
}
