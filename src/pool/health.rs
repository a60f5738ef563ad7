// ABOUTME: Health check results for provider pools and the periodic health monitor
// ABOUTME: Background task that probes a pool on an interval and publishes the outcome

//! Health monitoring for provider pools.
//!
//! A pool's `check_health()` probes every connection concurrently and folds
//! the per-connection outcomes into one [`HealthCheckResult`]. The
//! [`HealthMonitor`] runs that check on a fixed interval for one provider
//! and publishes each result as a [`PoolEvent::HealthCheck`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  HealthMonitor                   │
//! │                                                  │
//! │  ┌──────────────┐    ┌────────────────────────┐  │
//! │  │ Interval     │───▶│ pool.check_health()    │  │
//! │  │ (30s)        │    │ (all connections)      │  │
//! │  └──────────────┘    └────────────────────────┘  │
//! │         ▲                        │               │
//! │         │                        ▼               │
//! │  ┌──────────────┐    ┌────────────────────────┐  │
//! │  │ Shutdown     │    │ EventBus::publish      │  │
//! │  │ signal       │    │ (HealthCheck event)    │  │
//! │  └──────────────┘    └────────────────────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::config::{duration_millis, option_duration_millis};
use super::connection::ConnectionId;
use super::connection_pool::ConnectionPool;
use super::events::{EventBus, PoolEvent};
use super::provider::ProviderId;

/// How long `stop()` waits for an in-flight cycle before aborting it
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

// === Per-Connection Result ===

/// Outcome of probing a single connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub connection_id: ConnectionId,

    pub is_healthy: bool,

    /// Probe round-trip; `None` when the probe failed
    #[serde(rename = "latency_ms", with = "option_duration_millis")]
    pub latency: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ConnectionHealth {
    pub fn healthy(connection_id: ConnectionId, latency: Duration) -> Self {
        Self {
            connection_id,
            is_healthy: true,
            latency: Some(latency),
            error: None,
        }
    }

    pub fn unhealthy(connection_id: ConnectionId, error: impl Into<String>) -> Self {
        Self {
            connection_id,
            is_healthy: false,
            latency: None,
            error: Some(error.into()),
        }
    }
}

// === Aggregate Result ===

/// Breakdown attached to an aggregate health result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub total_connections: usize,
    pub healthy_connections: usize,
    /// One entry per connection, in pool order
    pub results: Vec<ConnectionHealth>,
}

/// Aggregate health of one provider's pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// True when at least one connection answered its probe
    pub is_healthy: bool,

    /// Mean latency over healthy connections; zero when none are healthy
    #[serde(rename = "latency_ms", with = "duration_millis")]
    pub latency: Duration,

    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<HealthDetails>,
}

impl HealthCheckResult {
    /// Fold per-connection outcomes into an aggregate result
    #[must_use]
    pub fn from_results(results: Vec<ConnectionHealth>) -> Self {
        let healthy: Vec<Duration> = results
            .iter()
            .filter(|r| r.is_healthy)
            .filter_map(|r| r.latency)
            .collect();

        let healthy_connections = results.iter().filter(|r| r.is_healthy).count();

        let latency = if healthy.is_empty() {
            Duration::ZERO
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let count = healthy.len() as u32;
            healthy.iter().sum::<Duration>() / count
        };

        let error = if results.is_empty() {
            Some("no connections in pool".to_string())
        } else if healthy_connections == 0 {
            Some("all connections failed health check".to_string())
        } else {
            None
        };

        Self {
            is_healthy: healthy_connections > 0,
            latency,
            timestamp: Utc::now(),
            error,
            details: Some(HealthDetails {
                total_connections: results.len(),
                healthy_connections,
                results,
            }),
        }
    }

    pub fn total_connections(&self) -> usize {
        self.details.as_ref().map_or(0, |d| d.total_connections)
    }

    pub fn healthy_connections(&self) -> usize {
        self.details.as_ref().map_or(0, |d| d.healthy_connections)
    }

    /// Coarse status suitable for a status indicator
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        let Some(details) = &self.details else {
            return if self.is_healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unavailable
            };
        };

        if details.healthy_connections == 0 {
            return HealthStatus::Unavailable;
        }

        let unhealthy: Vec<ConnectionId> = details
            .results
            .iter()
            .filter(|r| !r.is_healthy)
            .map(|r| r.connection_id)
            .collect();

        if unhealthy.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded { unhealthy }
        }
    }
}

// === Health Status ===

/// Overall health of a provider's pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every connection answered its probe.
    Healthy,

    /// Some connections failed but the provider is still usable.
    Degraded {
        /// Connections that failed their probe.
        unhealthy: Vec<ConnectionId>,
    },

    /// No connection answered (or the pool is empty).
    Unavailable,
}

impl HealthStatus {
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Whether the provider can still serve requests.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

// === Health Monitor ===

/// Periodic health checker for one provider's pool.
///
/// The task holds only a weak reference to the pool, so a disposed or
/// dropped pool turns every remaining tick into a no-op.
pub struct HealthMonitor {
    /// Interval between health checks.
    interval: Duration,

    /// Shutdown signal for the background task.
    shutdown_tx: Option<broadcast::Sender<()>>,

    /// Handle to the background monitoring task.
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the health monitoring background task.
    ///
    /// The first check runs one full interval after start.
    pub fn start<C>(&mut self, pool: &Arc<ConnectionPool<C>>, events: Arc<EventBus>)
    where
        C: Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let provider_id = pool.provider_id().clone();
        let weak_pool = Arc::downgrade(pool);
        let interval = self.interval;

        let handle = tokio::spawn(Self::health_check_loop(
            provider_id.clone(),
            weak_pool,
            events,
            interval,
            shutdown_rx,
        ));

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
        info!(
            provider = %provider_id,
            interval_ms = %interval.as_millis(),
            "Health monitor started"
        );
    }

    /// Stop the monitor and wait for the background task to finish.
    ///
    /// Once this returns no further health events are published.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                warn!("Health monitor did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// The main health check loop running in the background.
    async fn health_check_loop<C>(
        provider_id: ProviderId,
        pool: Weak<ConnectionPool<C>>,
        events: Arc<EventBus>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) where
        C: Send + Sync + 'static,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {}
            }

            let Some(pool) = pool.upgrade() else {
                debug!(provider = %provider_id, "Pool dropped, health check skipped");
                break;
            };
            if pool.is_closed() {
                debug!(provider = %provider_id, "Pool closed, health check skipped");
                break;
            }

            let health = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                health = pool.check_health() => health,
            };
            drop(pool);

            match health.status() {
                HealthStatus::Healthy => {
                    debug!(
                        provider = %provider_id,
                        connections = health.total_connections(),
                        latency_ms = %health.latency.as_millis(),
                        "Provider healthy"
                    );
                }
                HealthStatus::Degraded { unhealthy } => {
                    warn!(
                        provider = %provider_id,
                        unhealthy_count = unhealthy.len(),
                        "Provider degraded"
                    );
                }
                HealthStatus::Unavailable => {
                    warn!(
                        provider = %provider_id,
                        connections = health.total_connections(),
                        "Provider has no healthy connections"
                    );
                }
            }

            events.publish(PoolEvent::health_check(provider_id.clone(), health));
        }

        debug!(provider = %provider_id, "Health check loop ended");
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        // Signal shutdown on drop; async cleanup cannot be awaited here
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
