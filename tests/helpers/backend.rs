use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use provider_pool::{async_trait, Provider, ProviderError};

/// In-memory provider with call counters and injectable failures
#[derive(Debug, Default)]
pub struct TestBackend {
    next_id: AtomicU32,
    connects: AtomicU32,
    disconnects: AtomicU32,
    health_checks: AtomicU32,
    fail_connect: AtomicBool,
    connect_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
    unhealthy: Mutex<HashSet<u32>>,
    failing_disconnects: Mutex<HashSet<u32>>,
    live: Mutex<HashSet<u32>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose factory always fails
    pub fn refusing() -> Self {
        let backend = Self::default();
        backend.fail_connect.store(true, Ordering::SeqCst);
        backend
    }

    /// Backend whose connect takes `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Backend whose disconnect takes `delay`
    pub fn slow_disconnect(delay: Duration) -> Self {
        Self {
            disconnect_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn mark_unhealthy(&self, connection: u32) {
        self.unhealthy.lock().unwrap().insert(connection);
    }

    pub fn fail_disconnect_of(&self, connection: u32) {
        self.failing_disconnects.lock().unwrap().insert(connection);
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn health_check_count(&self) -> u32 {
        self.health_checks.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet disconnected
    pub fn live_connections(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for TestBackend {
    type Connection = u32;

    async fn connect(&self) -> Result<u32, ProviderError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ProviderError::backend("connection refused"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.lock().unwrap().insert(id);
        Ok(id)
    }

    async fn health_check(&self, connection: &u32) -> Result<(), ProviderError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy.lock().unwrap().contains(connection) {
            return Err(ProviderError::backend(format!("connection {connection} unresponsive")));
        }
        Ok(())
    }

    async fn disconnect(&self, connection: &u32) -> Result<(), ProviderError> {
        if let Some(delay) = self.disconnect_delay {
            tokio::time::sleep(delay).await;
        }
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().remove(connection);
        if self.failing_disconnects.lock().unwrap().contains(connection) {
            return Err(ProviderError::backend("socket already closed"));
        }
        Ok(())
    }
}
