// ABOUTME: Error taxonomy for pool and manager operations
//
// Only acquire-path failures are returned to callers. Health-check and
// disconnect failures are captured as data (ConnectionHealth, DisconnectFailure).

use std::time::Duration;

use thiserror::Error;

use super::connection::ConnectionId;
use super::provider::{ProviderError, ProviderId};

/// Errors that can occur during pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// No pool is registered under this provider id
    #[error("Unknown provider: {0}")]
    UnknownProvider(ProviderId),

    /// A pool is already registered under this provider id
    #[error("Provider already registered: {0}")]
    AlreadyRegistered(ProviderId),

    /// The provider's factory failed while creating a connection
    #[error("Failed to create connection for {provider}: {source}")]
    ConnectionCreation {
        provider: ProviderId,
        #[source]
        source: ProviderError,
    },

    /// The provider has no factory for this operation
    #[error("Provider {provider} does not implement {operation}")]
    NotImplemented {
        provider: ProviderId,
        operation: &'static str,
    },

    /// No connection became available before the deadline
    #[error("Timed out after {waited:?} waiting for a connection from {provider}")]
    AcquireTimeout {
        provider: ProviderId,
        waited: Duration,
    },

    /// The pool has been disposed
    #[error("Pool for {0} is closed")]
    PoolClosed(ProviderId),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Map a factory failure, keeping `NotImplemented` distinct
    pub(crate) fn from_creation(provider: &ProviderId, source: ProviderError) -> Self {
        match source {
            ProviderError::NotImplemented(operation) => Self::NotImplemented {
                provider: provider.clone(),
                operation,
            },
            source => Self::ConnectionCreation {
                provider: provider.clone(),
                source,
            },
        }
    }

    /// Whether a UI should present this as "backend unavailable"
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionCreation { .. }
                | Self::AcquireTimeout { .. }
                | Self::PoolClosed(_)
                | Self::UnknownProvider(_)
        )
    }
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// A connection whose disconnect failed during disposal
#[derive(Debug)]
pub struct DisconnectFailure {
    pub connection_id: ConnectionId,
    pub error: ProviderError,
}

impl std::fmt::Display for DisconnectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection {}: {}", self.connection_id, self.error)
    }
}
