// ABOUTME: Connection pooling for pluggable backend providers
//
// Each registered provider gets a bounded pool of lazily created
// connections, a periodic health monitor, and lifecycle events published
// to subscribers.
//
// Key components:
// - provider: the connect / probe / disconnect contract a backend implements
// - connection: pooled connection records and caller handles
// - connection_pool: bounded pool with FIFO waiters
// - health: health check aggregation and the interval monitor
// - events: PoolEvent and the broadcast EventBus
// - manager: PoolManager registry tying it all together
// - config / metrics / error: ambient support

pub mod config;
pub mod connection;
pub mod connection_pool;
pub mod error;
pub mod events;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod provider;

// Re-exports for convenient access
pub use config::{ManagerConfig, PoolConfig, DEFAULT_HEALTH_CHECK_INTERVAL};
pub use connection::{ConnectionHandle, ConnectionId};
pub use connection_pool::{ConnectionPool, PoolStatus};
pub use error::{DisconnectFailure, PoolError, PoolResult};
pub use events::{ConnectionState, EventBus, PoolEvent, ProviderState, DEFAULT_EVENT_CAPACITY};
pub use health::{ConnectionHealth, HealthCheckResult, HealthDetails, HealthMonitor, HealthStatus};
pub use manager::{PoolManager, ShutdownReport};
pub use metrics::PoolMetrics;
pub use provider::{Provider, ProviderError, ProviderId};
