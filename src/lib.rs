// ABOUTME: Library crate for pooling connections to pluggable backend providers

#![allow(missing_docs)]

pub mod logging;
pub mod pool;

pub use pool::{
    ConnectionHandle, ConnectionPool, ManagerConfig, PoolConfig, PoolError, PoolEvent,
    PoolManager, PoolResult, Provider, ProviderError, ProviderId,
};

/// `async_trait` re-exported so providers can be implemented without a direct dependency
pub use async_trait::async_trait;
