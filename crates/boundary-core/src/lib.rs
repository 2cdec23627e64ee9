//! # Boundary Core
//!
//! Administrative boundary resolution with provider fallback, caching, bounded
//! queueing, retry with backoff and per-provider circuit breaking.
//!
//! ## Overview
//!
//! - **Provider adapters** for OSM Overpass and Nominatim, plus caller-supplied providers
//! - **Fallback chain** trying providers by priority and skipping open circuits
//! - **Health monitor** with closed / open / half-open circuits per provider
//! - **TTL cache** keyed by a deterministic query fingerprint, swept periodically
//! - **Request queue** with backpressure, coalescing by fingerprint, cancellation and
//!   exponential backoff
//! - **Event bus** for lifecycle events
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Overpass, Nominatim and scripted providers |
//! | [`cache`] | TTL cache over a pluggable backend |
//! | [`chain`] | Provider registry and fallback chain |
//! | [`config`] | Complete and partial configuration |
//! | [`domain`] | Geometry, options, results, fingerprints |
//! | [`error`] | Error types |
//! | [`events`] | Event bus |
//! | [`health`] | Circuit breaking per provider |
//! | [`http_client`] | HTTP client abstraction |
//! | [`provider`] | Provider adapter contract |
//! | [`queue`] | Request queue and retry engine |
//! | [`retry`] | Backoff and retry policy |
//! | [`service`] | The [`BoundaryService`] façade |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use boundary_core::{BoundaryConfig, BoundaryOverrides, BoundaryService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = BoundaryService::new(BoundaryConfig::default())?;
//!
//!     let _events = service.subscribe(|event| eprintln!("{}", event.kind()));
//!     let athens = service
//!         .resolve("Athens", Some(BoundaryOverrides::default().timeout_ms(2_000)))
//!         .await?;
//!     println!("{} from {}", athens.name, athens.source_provider_id);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ BoundaryService │──── cache hit ───▶ caller
//! └────────┬────────┘
//!          │ miss
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  RequestQueue   │────▶│   RetryEngine    │
//! └─────────────────┘     └────────┬─────────┘
//!                                  ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  HealthMonitor  │◀────│  FallbackChain   │
//! └─────────────────┘     └────────┬─────────┘
//!                                  ▼
//!                         ┌──────────────────┐
//!                         │ BoundaryProvider │
//!                         └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Provider failures never reach callers; they drive health changes and retries.
//! Callers only see [`BoundaryError`]:
//!
//! ```rust
//! use boundary_core::BoundaryError;
//!
//! fn describe(error: &BoundaryError) -> &'static str {
//!     match error {
//!         BoundaryError::QueueFull { .. } => "busy, try again later",
//!         BoundaryError::ResolutionFailed { .. } => "no provider could answer",
//!         BoundaryError::Validation(_) => "bad request",
//!         BoundaryError::Cancelled | BoundaryError::ShutDown => "stopped",
//!     }
//! }
//! ```

pub mod adapters;
pub mod cache;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod health;
pub mod http_client;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod service;

// Adapter implementations
pub use adapters::{NominatimAdapter, OverpassAdapter, ScriptedOutcome, ScriptedProvider};

// Caching
pub use cache::{BoundaryCache, CacheBackend, CacheEntry, CacheFuture, CacheStats, MemoryBackend};

// Fallback chain
pub use chain::{
    AttemptFailure, ChainExhausted, FallbackChain, ProviderAttempt, ProviderRegistry,
    RegisteredProvider,
};

// Configuration
pub use config::{
    ApiConfig, BoundaryConfig, CacheConfig, DefaultsConfig, HealthConfig, PartialBoundaryConfig,
    ProviderConfig, QueueConfig, RetryConfig,
};

// Domain models
pub use domain::{
    normalize_query, AdminLevels, BoundaryOptions, BoundaryOverrides, BoundaryResult,
    BoundingBox, Confidence, Fingerprint, GeocodingResult, Geometry, Position, Ring, UtcDateTime,
};

// Error types
pub use error::{BoundaryError, CacheError, ConfigError, ValidationError};

// Events
pub use events::{BoundaryEvent, EventBus, Subscription};

// Health
pub use health::{CircuitState, HealthMonitor, HealthTransition, ProviderHealth};

// HTTP client types
pub use http_client::{
    CannedHttpClient, HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Provider contract
pub use provider::{
    AdapterError, AdapterErrorKind, BoundaryProvider, ProviderFuture, ProviderId, ProviderKind,
};

// Queue
pub use queue::{PendingRequest, RequestQueue, RetryEngine};

// Retry logic
pub use retry::{Backoff, RetryDecision, RetryPolicy};

// Service façade
pub use service::{BoundaryService, BoundaryServiceBuilder, HealthState, ResolveHandle, ServiceHealth};
