// ABOUTME: Registry of provider pools with health monitoring and lifecycle events
// ABOUTME: Routes acquire/release by provider id and tears everything down on dispose

//! Provider pool manager.
//!
//! One `PoolManager` owns a [`ConnectionPool`] and a [`HealthMonitor`] per
//! registered provider, plus the [`EventBus`] every lifecycle change is
//! published on.
//!
//! ```text
//! initialize_provider("openai")
//!        │
//!        ▼
//! ┌──────────── Registry (Mutex) ────────────┐      ┌──────────┐
//! │ "openai" → ConnectionPool + HealthMonitor│─────▶│ EventBus │──▶ subscribers
//! │ "local"  → ConnectionPool + HealthMonitor│      └──────────┘
//! │ disposing: {"legacy"}                    │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Provider lifecycle: `Unregistered → Registered → Disposing → Unregistered`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::config::{ManagerConfig, PoolConfig};
use super::connection::ConnectionHandle;
use super::connection_pool::{ConnectionPool, PoolStatus};
use super::error::{DisconnectFailure, PoolError, PoolResult};
use super::events::{ConnectionState, EventBus, PoolEvent, ProviderState};
use super::health::{HealthCheckResult, HealthMonitor};
use super::provider::{Provider, ProviderId};

/// Outcome of shutting down every provider
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Providers that were disposed, in no particular order
    pub disposed: Vec<ProviderId>,
    /// Disconnect failures per provider; providers without failures are absent
    pub failures: HashMap<ProviderId, Vec<DisconnectFailure>>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.values().map(Vec::len).sum()
    }
}

struct Registration<C> {
    pool: Arc<ConnectionPool<C>>,
    monitor: HealthMonitor,
}

struct Registry<C> {
    providers: HashMap<ProviderId, Registration<C>>,
    disposing: HashSet<ProviderId>,
}

fn lock<C>(registry: &Mutex<Registry<C>>) -> MutexGuard<'_, Registry<C>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears a provider's `Disposing` mark once its teardown ends, however it ends
struct DisposingMark<C> {
    registry: Arc<Mutex<Registry<C>>>,
    provider_id: ProviderId,
}

impl<C> Drop for DisposingMark<C> {
    fn drop(&mut self) {
        lock(&self.registry).disposing.remove(&self.provider_id);
    }
}

/// Owns every provider's pool and health monitor
pub struct PoolManager<C> {
    config: ManagerConfig,
    registry: Arc<Mutex<Registry<C>>>,
    events: Arc<EventBus>,
}

impl<C> std::fmt::Debug for PoolManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("PoolManager")
            .field("config", &self.config)
            .field("providers", &registry.providers.keys().collect::<Vec<_>>())
            .field("disposing", &registry.disposing)
            .finish()
    }
}

impl<C> Default for PoolManager<C>
where
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::with_valid_config(ManagerConfig::default())
    }
}

impl<C> PoolManager<C>
where
    C: Send + Sync + 'static,
{
    /// Create a manager with no providers registered
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation, e.g. a zero
    /// health check interval.
    pub fn new(config: ManagerConfig) -> PoolResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: ManagerConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_capacity));
        Self {
            config,
            registry: Arc::new(Mutex::new(Registry {
                providers: HashMap::new(),
                disposing: HashSet::new(),
            })),
            events,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry<C>> {
        lock(&self.registry)
    }

    fn get_pool(&self, provider_id: &str) -> PoolResult<Arc<ConnectionPool<C>>> {
        self.pool(provider_id)
            .ok_or_else(|| PoolError::UnknownProvider(provider_id.into()))
    }

    // === Registration ===

    /// Register a provider and start monitoring its health
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if `config` fails validation
    /// - `AlreadyRegistered` if the id is registered or still being disposed
    pub fn initialize_provider(
        &self,
        provider_id: impl Into<ProviderId>,
        provider: Arc<dyn Provider<Connection = C>>,
        config: PoolConfig,
    ) -> PoolResult<()> {
        let provider_id = provider_id.into();
        let pool_size = config.pool_size;

        {
            let mut registry = self.lock_registry();
            if registry.providers.contains_key(&provider_id)
                || registry.disposing.contains(&provider_id)
            {
                return Err(PoolError::AlreadyRegistered(provider_id));
            }

            let pool = Arc::new(ConnectionPool::new(provider_id.clone(), provider, config)?);
            let mut monitor = HealthMonitor::new(self.config.health_check_interval);
            monitor.start(&pool, Arc::clone(&self.events));

            registry
                .providers
                .insert(provider_id.clone(), Registration { pool, monitor });
        }

        info!(provider = %provider_id, pool_size, "Provider registered");
        self.events
            .publish(PoolEvent::provider_state(provider_id, ProviderState::Registered));
        Ok(())
    }

    /// Register a provider using its entry in `ManagerConfig::providers`
    pub fn initialize_from_config(
        &self,
        provider_id: impl Into<ProviderId>,
        provider: Arc<dyn Provider<Connection = C>>,
    ) -> PoolResult<()> {
        let provider_id = provider_id.into();
        let config = self.config.pool_config(provider_id.as_str());
        self.initialize_provider(provider_id, provider, config)
    }

    // === Checkout ===

    /// Acquire a connection using the provider's configured acquire timeout
    ///
    /// # Errors
    ///
    /// `UnknownProvider` if nothing is registered under `provider_id`,
    /// otherwise whatever [`ConnectionPool::acquire`] returns.
    pub async fn acquire_connection(&self, provider_id: &str) -> PoolResult<ConnectionHandle<C>> {
        let pool = self.get_pool(provider_id)?;
        let handle = pool.acquire().await?;
        self.publish_connection_state(&pool, &handle, ConnectionState::Active);
        Ok(handle)
    }

    /// Acquire a connection with an explicit deadline
    pub async fn acquire_connection_timeout(
        &self,
        provider_id: &str,
        timeout: Option<Duration>,
    ) -> PoolResult<ConnectionHandle<C>> {
        let pool = self.get_pool(provider_id)?;
        let handle = pool.acquire_timeout(timeout).await?;
        self.publish_connection_state(&pool, &handle, ConnectionState::Active);
        Ok(handle)
    }

    /// Return a connection to its provider's pool
    ///
    /// Unknown providers and handles are ignored. Returns whether the pool
    /// accepted the release.
    pub fn release_connection(&self, provider_id: &str, handle: &ConnectionHandle<C>) -> bool {
        let Some(pool) = self.pool(provider_id) else {
            debug!(provider = provider_id, "Release for unknown provider ignored");
            return false;
        };

        if !pool.release(handle) {
            return false;
        }

        self.publish_connection_state(&pool, handle, ConnectionState::Available);
        true
    }

    fn publish_connection_state(
        &self,
        pool: &ConnectionPool<C>,
        handle: &ConnectionHandle<C>,
        state: ConnectionState,
    ) {
        self.events.publish(PoolEvent::connection_state(
            pool.provider_id().clone(),
            handle.id(),
            state,
        ));
    }

    // === Health ===

    /// Run a health check now and publish it like a scheduled one
    pub async fn check_provider_health(&self, provider_id: &str) -> PoolResult<HealthCheckResult> {
        let pool = self.get_pool(provider_id)?;
        let health = pool.check_health().await;
        self.events.publish(PoolEvent::health_check(
            pool.provider_id().clone(),
            health.clone(),
        ));
        Ok(health)
    }

    // === Teardown ===

    /// Stop monitoring a provider, unregister it and disconnect its pool
    ///
    /// No health event for the provider is published after this returns.
    /// Unknown ids are a no-op. The teardown runs as its own task, so
    /// dropping the returned future does not abandon it halfway: the
    /// provider stays `Disposing` until its connections are disconnected.
    pub async fn dispose_provider(&self, provider_id: &str) -> Vec<DisconnectFailure> {
        let (provider_id, registration) = {
            let mut registry = self.lock_registry();
            let Some((provider_id, registration)) = registry.providers.remove_entry(provider_id)
            else {
                debug!(provider = provider_id, "Dispose for unknown provider ignored");
                return Vec::new();
            };
            registry.disposing.insert(provider_id.clone());
            (provider_id, registration)
        };

        self.events.publish(PoolEvent::provider_state(
            provider_id.clone(),
            ProviderState::Disposing,
        ));

        let mark = DisposingMark {
            registry: Arc::clone(&self.registry),
            provider_id: provider_id.clone(),
        };
        let events = Arc::clone(&self.events);

        let teardown = tokio::spawn(async move {
            let Registration { pool, mut monitor } = registration;
            monitor.stop().await;
            let failures = pool.dispose().await;

            drop(mark);
            info!(
                provider = %pool.provider_id(),
                failures = failures.len(),
                "Provider unregistered"
            );
            events.publish(PoolEvent::provider_state(
                pool.provider_id().clone(),
                ProviderState::Unregistered,
            ));

            failures
        });

        match teardown.await {
            Ok(failures) => failures,
            Err(e) => {
                error!(provider = %provider_id, error = %e, "Provider teardown failed");
                Vec::new()
            }
        }
    }

    /// Dispose every provider concurrently, then drop all subscribers
    ///
    /// Safe to call more than once.
    pub async fn dispose(&self) -> ShutdownReport {
        let providers = self.providers();

        let outcomes = join_all(providers.into_iter().map(|provider_id| async move {
            let failures = self.dispose_provider(provider_id.as_str()).await;
            (provider_id, failures)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (provider_id, failures) in outcomes {
            if !failures.is_empty() {
                report.failures.insert(provider_id.clone(), failures);
            }
            report.disposed.push(provider_id);
        }

        self.events.clear();

        if report.is_clean() {
            info!(disposed = report.disposed.len(), "Pool manager shut down");
        } else {
            error!(
                disposed = report.disposed.len(),
                failures = report.failure_count(),
                "Pool manager shut down with disconnect failures"
            );
        }

        report
    }

    // === Introspection ===

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Registered provider ids, sorted
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.lock_registry().providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_registered(&self, provider_id: &str) -> bool {
        self.lock_registry().providers.contains_key(provider_id)
    }

    pub fn provider_count(&self) -> usize {
        self.lock_registry().providers.len()
    }

    pub fn pool(&self, provider_id: &str) -> Option<Arc<ConnectionPool<C>>> {
        self.lock_registry()
            .providers
            .get(provider_id)
            .map(|r| Arc::clone(&r.pool))
    }

    pub fn pool_status(&self, provider_id: &str) -> Option<PoolStatus> {
        self.pool(provider_id).map(|pool| pool.status())
    }

    pub fn provider_state(&self, provider_id: &str) -> ProviderState {
        let registry = self.lock_registry();
        if registry.providers.contains_key(provider_id) {
            ProviderState::Registered
        } else if registry.disposing.contains(provider_id) {
            ProviderState::Disposing
        } else {
            ProviderState::Unregistered
        }
    }

    /// Whether the provider's health monitor task is alive
    pub fn is_monitored(&self, provider_id: &str) -> bool {
        self.lock_registry()
            .providers
            .get(provider_id)
            .is_some_and(|r| r.monitor.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::provider::{MockProvider, ProviderError};
    use async_trait::async_trait;

    struct StaticProvider;

    #[async_trait]
    impl Provider for StaticProvider {
        type Connection = u32;

        async fn connect(&self) -> Result<u32, ProviderError> {
            Ok(7)
        }

        async fn health_check(&self, _connection: &u32) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn disconnect(&self, _connection: &u32) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn manager() -> PoolManager<u32> {
        PoolManager::default()
    }

    // ==================== Registration Tests ====================

    #[test]
    fn test_new_rejects_zero_health_interval() {
        let config = ManagerConfig {
            health_check_interval: Duration::ZERO,
            ..ManagerConfig::default()
        };

        let result: PoolResult<PoolManager<u32>> = PoolManager::new(config);
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_initialize_registers_and_monitors() {
        let manager = manager();
        manager
            .initialize_provider("p1", Arc::new(StaticProvider), PoolConfig::with_size(2))
            .unwrap();

        assert!(manager.is_registered("p1"));
        assert!(manager.is_monitored("p1"));
        assert_eq!(manager.provider_count(), 1);
        assert_eq!(manager.provider_state("p1"), ProviderState::Registered);
        assert_eq!(manager.pool_status("p1").unwrap().max_size, 2);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let manager = manager();
        manager
            .initialize_provider("p1", Arc::new(StaticProvider), PoolConfig::default())
            .unwrap();

        let result =
            manager.initialize_provider("p1", Arc::new(StaticProvider), PoolConfig::with_size(5));
        assert!(matches!(result, Err(PoolError::AlreadyRegistered(_))));
        assert_eq!(manager.pool_status("p1").unwrap().max_size, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let manager = manager();
        let result =
            manager.initialize_provider("p1", Arc::new(StaticProvider), PoolConfig::with_size(0));

        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
        assert!(!manager.is_registered("p1"));
    }

    #[tokio::test]
    async fn test_initialize_from_config_uses_provider_entry() {
        let mut config = ManagerConfig::default();
        config
            .providers
            .insert("configured".to_string(), PoolConfig::with_size(4));
        let manager: PoolManager<u32> = PoolManager::new(config).unwrap();

        manager
            .initialize_from_config("configured", Arc::new(StaticProvider))
            .unwrap();
        manager
            .initialize_from_config("fallback", Arc::new(StaticProvider))
            .unwrap();

        assert_eq!(manager.pool_status("configured").unwrap().max_size, 4);
        assert_eq!(manager.pool_status("fallback").unwrap().max_size, 1);
        assert_eq!(
            manager.providers(),
            vec![ProviderId::from("configured"), ProviderId::from("fallback")]
        );
    }

    // ==================== Routing Tests ====================

    #[tokio::test]
    async fn test_acquire_unknown_provider() {
        let manager = manager();
        let result = manager.acquire_connection("missing").await;
        assert!(matches!(result, Err(PoolError::UnknownProvider(id)) if id.as_str() == "missing"));
    }

    #[tokio::test]
    async fn test_release_unknown_provider_is_noop() {
        let manager = manager();
        manager
            .initialize_provider("p1", Arc::new(StaticProvider), PoolConfig::default())
            .unwrap();
        let handle = manager.acquire_connection("p1").await.unwrap();

        assert!(!manager.release_connection("other", &handle));
        assert_eq!(manager.pool_status("p1").unwrap().active, 1);
    }

    #[tokio::test]
    async fn test_factory_called_once_for_reused_connection() {
        let mut mock = MockProvider::new();
        mock.expect_connect().times(1).returning(|| Ok(1));
        mock.expect_disconnect().times(1).returning(|_| Ok(()));

        let manager = manager();
        manager
            .initialize_provider("mock", Arc::new(mock), PoolConfig::with_size(3))
            .unwrap();

        for _ in 0..5 {
            let handle = manager.acquire_connection("mock").await.unwrap();
            assert!(manager.release_connection("mock", &handle));
        }

        assert!(manager.dispose_provider("mock").await.is_empty());
    }

    // ==================== Teardown Tests ====================

    #[tokio::test]
    async fn test_dispose_provider_unregisters() {
        let manager = manager();
        manager
            .initialize_provider("p1", Arc::new(StaticProvider), PoolConfig::default())
            .unwrap();
        let pool = manager.pool("p1").unwrap();

        manager.dispose_provider("p1").await;

        assert!(!manager.is_registered("p1"));
        assert_eq!(manager.provider_state("p1"), ProviderState::Unregistered);
        assert!(pool.is_closed());
        assert!(matches!(
            manager.acquire_connection("p1").await,
            Err(PoolError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_dispose_unknown_provider_is_noop() {
        let manager = manager();
        assert!(manager.dispose_provider("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_can_register_again_after_dispose() {
        let manager = manager();
        manager
            .initialize_provider("p1", Arc::new(StaticProvider), PoolConfig::default())
            .unwrap();
        manager.dispose_provider("p1").await;

        manager
            .initialize_provider("p1", Arc::new(StaticProvider), PoolConfig::with_size(2))
            .unwrap();
        assert_eq!(manager.pool_status("p1").unwrap().max_size, 2);
    }

    #[tokio::test]
    async fn test_shutdown_report_counts() {
        let manager = manager();
        manager
            .initialize_provider("a", Arc::new(StaticProvider), PoolConfig::default())
            .unwrap();
        manager
            .initialize_provider("b", Arc::new(StaticProvider), PoolConfig::default())
            .unwrap();

        let report = manager.dispose().await;
        assert!(report.is_clean());
        assert_eq!(report.failure_count(), 0);
        assert_eq!(report.disposed.len(), 2);
        assert_eq!(manager.provider_count(), 0);

        let again = manager.dispose().await;
        assert!(again.disposed.is_empty());
    }
}
