//! Boundary service façade.
//!
//! [`BoundaryService`] owns the cache, queue, health monitor and event bus of one
//! namespace, plus the background worker driving the processing and cleanup ticks.
//! Construct it explicitly and call [`BoundaryService::shutdown`] when done.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::{NominatimAdapter, OverpassAdapter};
use crate::cache::{BoundaryCache, CacheBackend, CacheStats};
use crate::chain::{FallbackChain, ProviderRegistry};
use crate::config::{BoundaryConfig, QueueConfig};
use crate::domain::{normalize_query, BoundaryOptions, BoundaryOverrides, BoundaryResult, Fingerprint};
use crate::error::{BoundaryError, ConfigError};
use crate::events::{BoundaryEvent, EventBus, Subscription};
use crate::health::{CircuitState, HealthMonitor, ProviderHealth};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::provider::{BoundaryProvider, ProviderId, ProviderKind};
use crate::queue::{RequestQueue, ResolveReceiver, RetryEngine};
use crate::retry::RetryPolicy;

/// Aggregate provider health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Every circuit is closed.
    Healthy,
    /// Some circuits are open or probing.
    Degraded,
    /// Every circuit is open, or the service is shut down.
    Unhealthy,
}

/// Snapshot recomputed on every [`BoundaryService::health`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub namespace: String,
    pub state: HealthState,
    pub providers: Vec<ProviderHealth>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub cache: CacheStats,
    pub shut_down: bool,
}

fn overall_state(providers: &[ProviderHealth], shut_down: bool) -> HealthState {
    if shut_down || providers.is_empty() {
        return HealthState::Unhealthy;
    }
    let open = providers
        .iter()
        .filter(|provider| provider.state == CircuitState::Open)
        .count();
    if open == providers.len() {
        HealthState::Unhealthy
    } else if providers
        .iter()
        .all(|provider| provider.state == CircuitState::Closed)
    {
        HealthState::Healthy
    } else {
        HealthState::Degraded
    }
}

/// Builder turning a [`BoundaryConfig`] into a running service.
///
/// Providers registered with [`with_provider`](Self::with_provider) replace the adapter
/// built for the config entry with the same id; `custom` entries require one.
pub struct BoundaryServiceBuilder {
    config: BoundaryConfig,
    providers: HashMap<ProviderId, Arc<dyn BoundaryProvider>>,
    http_client: Option<Arc<dyn HttpClient>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
}

impl BoundaryServiceBuilder {
    pub fn new(config: BoundaryConfig) -> Self {
        Self {
            config,
            providers: HashMap::new(),
            http_client: None,
            cache_backend: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn BoundaryProvider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    /// Transport for the built-in adapters; defaults to [`ReqwestHttpClient`].
    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Validates the configuration and spawns the worker.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(mut self) -> Result<BoundaryService, ConfigError> {
        self.config.validate()?;

        let http_client = self
            .http_client
            .take()
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));

        let mut registry = ProviderRegistry::new();
        for provider_config in &self.config.providers {
            let provider: Arc<dyn BoundaryProvider> =
                match (self.providers.get(&provider_config.id), provider_config.kind) {
                    (Some(provider), _) => Arc::clone(provider),
                    (None, ProviderKind::Osm) => Arc::new(OverpassAdapter::from_config(
                        provider_config,
                        Arc::clone(&http_client),
                    )),
                    (None, ProviderKind::Nominatim) => Arc::new(NominatimAdapter::from_config(
                        provider_config,
                        Arc::clone(&http_client),
                    )),
                    (None, ProviderKind::Custom) => {
                        return Err(ConfigError::MissingCustomAdapter {
                            id: provider_config.id.to_string(),
                        })
                    }
                };
            registry.register(
                provider,
                provider_config.priority,
                provider_config.timeout(),
                provider_config.api_config.rate_limit_per_second,
            );
        }

        let cache = match self.cache_backend.take() {
            Some(backend) => BoundaryCache::new(backend, self.config.cache.ttl()),
            None => BoundaryCache::from_config(&self.config.cache),
        };
        let events = Arc::new(EventBus::new());
        let health = Arc::new(HealthMonitor::new(self.config.health.clone()));
        let chain = Arc::new(FallbackChain::new(
            registry,
            Arc::clone(&health),
            Arc::clone(&events),
        ));
        let queue = Arc::new(RequestQueue::new(self.config.queue.max_size));
        let engine = RetryEngine::new(
            Arc::clone(&queue),
            Arc::clone(&chain),
            cache.clone(),
            Arc::clone(&events),
            RetryPolicy::from_config(&self.config.queue.retry),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(
            engine,
            Arc::clone(&queue),
            cache.clone(),
            self.config.queue.clone(),
            self.config.cache.cleanup_interval(),
            shutdown_rx,
        ));

        info!(
            namespace = %self.config.namespace,
            providers = ?chain.registry().ids(),
            "boundary service started"
        );

        Ok(BoundaryService {
            config: self.config,
            cache,
            queue,
            health,
            events,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }
}

enum Work {
    Process,
    Sweep,
}

async fn run_worker(
    engine: RetryEngine,
    queue: Arc<RequestQueue>,
    cache: BoundaryCache,
    queue_config: QueueConfig,
    cleanup_interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let eager = queue_config.eager_dispatch;
    let mut processing = tokio::time::interval(queue_config.processing_interval());
    processing.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cleanup = tokio::time::interval(cleanup_interval);
    cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let next_due = if eager { queue.next_due() } else { None };
        let work = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = processing.tick() => Work::Process,
            _ = cleanup.tick() => Work::Sweep,
            _ = queue.notified(), if eager => Work::Process,
            _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => Work::Process,
        };

        let run = async {
            match work {
                Work::Process => {
                    engine.process_due().await;
                }
                Work::Sweep => {
                    cache.sweep().await;
                }
            }
        };
        // in-flight attempts are abandoned on shutdown; close() rejects their callers
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = run => {}
        }
    }

    debug!("boundary worker stopped");
}

enum HandleState {
    Ready(Box<BoundaryResult>),
    Queued {
        receiver: ResolveReceiver,
        queue: Arc<RequestQueue>,
        waiter_id: u64,
        coalesced: bool,
    },
}

/// Pending (or already cached) resolution owned by one caller.
pub struct ResolveHandle {
    fingerprint: Fingerprint,
    state: HandleState,
}

impl std::fmt::Debug for ResolveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveHandle")
            .field("fingerprint", &self.fingerprint)
            .field("cached", &self.is_cached())
            .finish()
    }
}

impl ResolveHandle {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// True when the result came straight from the cache.
    pub fn is_cached(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }

    /// True when this caller joined a resolution another caller started.
    pub fn is_coalesced(&self) -> bool {
        matches!(self.state, HandleState::Queued { coalesced: true, .. })
    }

    /// Withdraws this caller; [`wait`](Self::wait) then yields [`BoundaryError::Cancelled`].
    ///
    /// Returns false when there was nothing left to cancel.
    pub fn cancel(&self) -> bool {
        match &self.state {
            HandleState::Ready(_) => false,
            HandleState::Queued {
                queue, waiter_id, ..
            } => queue.cancel(&self.fingerprint, *waiter_id),
        }
    }

    pub async fn wait(self) -> Result<BoundaryResult, BoundaryError> {
        match self.state {
            HandleState::Ready(result) => Ok(*result),
            // sender dropped without an answer: the queue went away
            HandleState::Queued { receiver, .. } => {
                receiver.await.unwrap_or(Err(BoundaryError::ShutDown))
            }
        }
    }
}

/// Public entry point of the boundary resolution service.
pub struct BoundaryService {
    config: BoundaryConfig,
    cache: BoundaryCache,
    queue: Arc<RequestQueue>,
    health: Arc<HealthMonitor>,
    events: Arc<EventBus>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BoundaryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryService")
            .field("namespace", &self.config.namespace)
            .field("queue_depth", &self.queue.len())
            .field("shut_down", &self.queue.is_closed())
            .finish()
    }
}

impl BoundaryService {
    /// Builds a service with the built-in adapters for `config`.
    pub fn new(config: BoundaryConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: BoundaryConfig) -> BoundaryServiceBuilder {
        BoundaryServiceBuilder::new(config)
    }

    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    /// Resolves `query` from the cache or, on a miss, through the queue.
    ///
    /// # Errors
    ///
    /// [`BoundaryError::Validation`] for a bad query or overrides,
    /// [`BoundaryError::QueueFull`] under backpressure,
    /// [`BoundaryError::ResolutionFailed`] once retries are exhausted without an
    /// approximate fallback, [`BoundaryError::ShutDown`] after shutdown.
    pub async fn resolve(
        &self,
        query: &str,
        overrides: Option<BoundaryOverrides>,
    ) -> Result<BoundaryResult, BoundaryError> {
        self.resolve_handle(query, overrides).await?.wait().await
    }

    /// Like [`resolve`](Self::resolve) but returns a cancellable handle instead of waiting.
    pub async fn resolve_handle(
        &self,
        query: &str,
        overrides: Option<BoundaryOverrides>,
    ) -> Result<ResolveHandle, BoundaryError> {
        if self.queue.is_closed() {
            return Err(BoundaryError::ShutDown);
        }

        let (query, options, fingerprint) = self.prepare(query, overrides)?;

        if let Some(result) = self.cache.get(&fingerprint).await {
            debug!(fingerprint = fingerprint.short(), "cache hit");
            self.events.publish(&BoundaryEvent::CacheHit {
                fingerprint: fingerprint.clone(),
            });
            return Ok(ResolveHandle {
                fingerprint,
                state: HandleState::Ready(Box::new(result)),
            });
        }

        let enqueued = self.queue.enqueue(fingerprint, &query, &options)?;
        Ok(ResolveHandle {
            fingerprint: enqueued.fingerprint,
            state: HandleState::Queued {
                receiver: enqueued.receiver,
                queue: Arc::clone(&self.queue),
                waiter_id: enqueued.waiter_id,
                coalesced: enqueued.coalesced,
            },
        })
    }

    /// Drops the cached result for `query` under the given options.
    pub async fn invalidate(
        &self,
        query: &str,
        overrides: Option<BoundaryOverrides>,
    ) -> Result<bool, BoundaryError> {
        let (_, _, fingerprint) = self.prepare(query, overrides)?;
        Ok(self.cache.invalidate(&fingerprint).await)
    }

    pub async fn health(&self) -> ServiceHealth {
        let providers = self.health.snapshot();
        let shut_down = self.queue.is_closed();
        ServiceHealth {
            namespace: self.config.namespace.clone(),
            state: overall_state(&providers, shut_down),
            providers,
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.max_size(),
            cache: self.cache.stats().await,
            shut_down,
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BoundaryEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn is_shut_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stops both ticks and rejects every outstanding request with
    /// [`BoundaryError::ShutDown`]. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let worker = self
            .worker
            .lock()
            .expect("worker handle lock is not poisoned")
            .take();
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                warn!(error = %error, "boundary worker ended abnormally");
            }
        }

        let rejected = self.queue.close();
        info!(namespace = %self.config.namespace, rejected, "boundary service shut down");
    }

    fn prepare(
        &self,
        query: &str,
        overrides: Option<BoundaryOverrides>,
    ) -> Result<(String, BoundaryOptions, Fingerprint), BoundaryError> {
        let query = normalize_query(query)?;
        let options = BoundaryOptions::from_defaults(&self.config.defaults)
            .with_overrides(overrides.unwrap_or_default())?;
        let fingerprint = Fingerprint::compute(&query, &options.admin_levels, options.bbox.as_ref())?;
        Ok((query, options, fingerprint))
    }
}

impl Drop for BoundaryService {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.queue.close();
    }
}
