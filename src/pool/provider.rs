// ABOUTME: Provider capability contract for backends the pool can connect to
//
// A provider knows how to open, probe and close one kind of backend
// connection. The pool never looks inside a connection; it only calls
// these three operations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// === Provider ID ===

/// Identifier a provider is registered under in the `PoolManager`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets registries keyed by ProviderId be queried with a plain &str
impl std::borrow::Borrow<str> for ProviderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ProviderId> for ProviderId {
    fn from(id: &ProviderId) -> Self {
        id.clone()
    }
}

// === Provider Errors ===

/// Errors raised by a provider's own connect / probe / disconnect calls
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider does not implement this operation
    #[error("{0} is not implemented for this provider")]
    NotImplemented(&'static str),

    /// The backend rejected or failed the operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend did not answer in time
    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Shorthand for `ProviderError::Backend`
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

// === Provider Trait ===

/// Capability set a backend type must supply to be pooled
///
/// `connect` is the factory extension point. Its default body fails with
/// [`ProviderError::NotImplemented`], so a provider family that forgets to
/// override it surfaces as `PoolError::NotImplemented` on first acquire.
#[cfg_attr(test, mockall::automock(type Connection = u32;))]
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Opaque provider-specific connection object
    type Connection: Send + Sync + 'static;

    /// Open a new connection to the backend
    async fn connect(&self) -> Result<Self::Connection, ProviderError> {
        Err(ProviderError::NotImplemented("connect"))
    }

    /// Probe a connection; `Err` means the connection is unhealthy
    async fn health_check(&self, connection: &Self::Connection) -> Result<(), ProviderError>;

    /// Close a connection. Failures are logged by the pool, never propagated
    async fn disconnect(&self, connection: &Self::Connection) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ProbeOnly;

    #[async_trait]
    impl Provider for ProbeOnly {
        type Connection = ();

        async fn health_check(&self, _connection: &()) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn disconnect(&self, _connection: &()) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    // ==================== ProviderId Tests ====================

    #[test]
    fn test_provider_id_display() {
        let id = ProviderId::from("openai");
        assert_eq!(id.to_string(), "openai");
        assert_eq!(id.as_str(), "openai");
    }

    #[test]
    fn test_provider_id_conversions_agree() {
        assert_eq!(ProviderId::from("p1"), ProviderId::from("p1".to_string()));
        assert_eq!(ProviderId::new("p1"), ProviderId::from(&ProviderId::new("p1")));
    }

    // ==================== ProviderError Tests ====================

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::NotImplemented("connect");
        assert_eq!(err.to_string(), "connect is not implemented for this provider");

        let err = ProviderError::backend("refused");
        assert_eq!(err.to_string(), "Backend error: refused");
    }

    #[test]
    fn test_provider_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: ProviderError = io_err.into();
        assert!(matches!(err, ProviderError::Io(_)));
    }

    // ==================== Default Factory Tests ====================

    #[tokio::test]
    async fn test_default_connect_is_not_implemented() {
        let result = ProbeOnly.connect().await;
        assert!(matches!(result, Err(ProviderError::NotImplemented("connect"))));
    }
}
