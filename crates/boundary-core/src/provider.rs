//! Provider adapter contract.
//!
//! Every boundary source (Overpass, Nominatim, or a caller-supplied adapter)
//! implements [`BoundaryProvider`]. Adapters do not retry; a failure is reported
//! once and the fallback chain decides what happens next.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{BoundaryOptions, GeocodingResult};
use crate::ValidationError;

/// Identifier of a configured provider. Several providers may share a [`ProviderKind`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn parse(id: &str) -> Result<Self, ValidationError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ValidationError::EmptyProviderId);
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider family, which decides the adapter built from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OSM Overpass API.
    Osm,
    Nominatim,
    /// Adapter supplied by the embedding application.
    Custom,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Osm => "osm",
            Self::Nominatim => "nominatim",
            Self::Custom => "custom",
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "osm" | "overpass" => Ok(Self::Osm),
            "nominatim" => Ok(Self::Nominatim),
            "custom" => Ok(Self::Custom),
            other => Err(ValidationError::InvalidProviderKind {
                value: other.to_owned(),
            }),
        }
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Timeout,
    Unavailable,
    RateLimited,
    InvalidResponse,
    NotFound,
    Internal,
}

/// Structured, provider-local failure. Drives health tracking and fallback,
/// never surfaced to callers directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterError {
    kind: AdapterErrorKind,
    message: String,
    retryable: bool,
}

impl AdapterError {
    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            kind: AdapterErrorKind::Timeout,
            message: format!("provider call timed out after {timeout_ms}ms"),
            retryable: true,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::InvalidResponse,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps an HTTP status outside 2xx to an error kind.
    pub fn from_status(provider: &str, status: u16) -> Self {
        let message = format!("{provider} upstream returned status {status}");
        match status {
            404 => Self::not_found(message),
            408 | 504 => Self {
                kind: AdapterErrorKind::Timeout,
                message,
                retryable: true,
            },
            429 => Self::rate_limited(message),
            500..=599 => Self::unavailable(message),
            _ => Self::invalid_response(message),
        }
    }

    pub const fn kind(&self) -> AdapterErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            AdapterErrorKind::Timeout => "provider.timeout",
            AdapterErrorKind::Unavailable => "provider.unavailable",
            AdapterErrorKind::RateLimited => "provider.rate_limited",
            AdapterErrorKind::InvalidResponse => "provider.invalid_response",
            AdapterErrorKind::NotFound => "provider.not_found",
            AdapterErrorKind::Internal => "provider.internal",
        }
    }
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for AdapterError {}

/// Boxed future returned by [`BoundaryProvider::call`].
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GeocodingResult, AdapterError>> + Send + 'a>>;

/// Boundary provider contract.
///
/// # Required Methods
///
/// | Method | Description |
/// |--------|-------------|
/// | [`id`](BoundaryProvider::id) | Unique provider identifier |
/// | [`kind`](BoundaryProvider::kind) | Provider family |
/// | [`call`](BoundaryProvider::call) | Resolve one query |
///
/// # Example Implementation
///
/// ```rust,ignore
/// use boundary_core::{BoundaryOptions, BoundaryProvider, ProviderFuture, ProviderId, ProviderKind};
///
/// struct MyProvider;
///
/// impl BoundaryProvider for MyProvider {
///     fn id(&self) -> ProviderId {
///         ProviderId::new("my_provider")
///     }
///
///     fn kind(&self) -> ProviderKind {
///         ProviderKind::Custom
///     }
///
///     fn call<'a>(&'a self, query: &'a str, options: &'a BoundaryOptions) -> ProviderFuture<'a> {
///         Box::pin(async move { todo!() })
///     }
/// }
/// ```
///
/// Implementations must be `Send + Sync`; they are shared as `Arc<dyn BoundaryProvider>`.
pub trait BoundaryProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn kind(&self) -> ProviderKind;

    /// Resolves `query` to a single boundary.
    ///
    /// `options.timeout` is already the effective per-call budget; the chain also
    /// enforces it externally.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on non-2xx responses, malformed bodies, missing
    /// results or transport failures.
    fn call<'a>(&'a self, query: &'a str, options: &'a BoundaryOptions) -> ProviderFuture<'a>;
}
