// ABOUTME: Lifecycle notifications published by the PoolManager
//
// Subscribers get a tokio broadcast receiver. Publishing with nobody
// listening is fine; slow subscribers lag rather than block the pool.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::connection::ConnectionId;
use super::health::HealthCheckResult;
use super::provider::ProviderId;

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Checkout state of a connection as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Checked out to a caller
    Active,
    /// Returned and ready for reuse
    Available,
}

/// Lifecycle state of a provider inside the manager
///
/// `Unregistered -> Registered -> Disposing -> Unregistered`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Unregistered,
    /// Pool exists and its health monitor is running
    Registered,
    Disposing,
}

/// Notification published to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolEvent {
    /// Result of a periodic or on-demand health check
    HealthCheck {
        provider_id: ProviderId,
        health: HealthCheckResult,
        timestamp: DateTime<Utc>,
    },

    /// A connection was acquired or released
    ConnectionStateChanged {
        provider_id: ProviderId,
        connection_id: ConnectionId,
        state: ConnectionState,
        timestamp: DateTime<Utc>,
    },

    /// A provider moved through its registration lifecycle
    ProviderStateChanged {
        provider_id: ProviderId,
        state: ProviderState,
        timestamp: DateTime<Utc>,
    },
}

impl PoolEvent {
    pub fn health_check(provider_id: ProviderId, health: HealthCheckResult) -> Self {
        Self::HealthCheck {
            provider_id,
            health,
            timestamp: Utc::now(),
        }
    }

    pub fn connection_state(
        provider_id: ProviderId,
        connection_id: ConnectionId,
        state: ConnectionState,
    ) -> Self {
        Self::ConnectionStateChanged {
            provider_id,
            connection_id,
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn provider_state(provider_id: ProviderId, state: ProviderState) -> Self {
        Self::ProviderStateChanged {
            provider_id,
            state,
            timestamp: Utc::now(),
        }
    }

    /// Provider the event refers to
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::HealthCheck { provider_id, .. }
            | Self::ConnectionStateChanged { provider_id, .. }
            | Self::ProviderStateChanged { provider_id, .. } => provider_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::HealthCheck { timestamp, .. }
            | Self::ConnectionStateChanged { timestamp, .. }
            | Self::ProviderStateChanged { timestamp, .. } => *timestamp,
        }
    }
}

// === Event Bus ===

/// Broadcast fan-out for `PoolEvent`s
#[derive(Debug)]
pub struct EventBus {
    sender: Mutex<broadcast::Sender<PoolEvent>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(sender),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self) -> MutexGuard<'_, broadcast::Sender<PoolEvent>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender().subscribe()
    }

    /// Publish to all current subscribers; returns how many received it
    pub fn publish(&self, event: PoolEvent) -> usize {
        match self.sender().send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for pool event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender().receiver_count()
    }

    /// Drop every subscription. Existing receivers observe `Closed`
    pub fn clear(&self) {
        let (fresh, _) = broadcast::channel(self.capacity);
        *self.sender() = fresh;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
