use std::time::Duration;

use thiserror::Error;

use crate::chain::ChainExhausted;

/// Validation and contract errors exposed by `boundary-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("query length {len} exceeds max {max}")]
    QueryTooLong { len: usize, max: usize },

    #[error("admin level {value} is outside 1..=12")]
    InvalidAdminLevel { value: u8 },
    #[error("admin level set cannot be empty")]
    EmptyAdminLevels,

    #[error("bounding box field '{field}' must be finite")]
    NonFiniteCoordinate { field: &'static str },
    #[error("bounding box {field} {value} is out of range")]
    CoordinateOutOfRange { field: &'static str, value: String },
    #[error("bounding box min must be <= max on the {axis} axis")]
    InvertedBoundingBox { axis: &'static str },
    #[error("invalid bounding box '{value}', expected minLon,minLat,maxLon,maxLat")]
    InvalidBoundingBox { value: String },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("invalid provider type '{value}', expected one of osm, nominatim, custom")]
    InvalidProviderKind { value: String },
    #[error("provider id cannot be empty")]
    EmptyProviderId,
}

/// Configuration errors raised while turning a partial configuration into a complete one.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one provider must be configured")]
    NoProviders,
    #[error("duplicate provider id '{id}'")]
    DuplicateProvider { id: String },
    #[error("provider '{id}' endpoint cannot be empty")]
    EmptyEndpoint { id: String },
    #[error("field '{field}' must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("backoff multiplier must be >= 1.0, got {value}")]
    InvalidMultiplier { value: f64 },
    #[error("custom provider '{id}' has no registered adapter")]
    MissingCustomAdapter { id: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Cache backend failure. Never reaches callers; lookups degrade to misses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cache backend error: {message}")]
pub struct CacheError {
    message: String,
}

impl CacheError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced to callers of the boundary service.
#[derive(Debug, Error, Clone)]
pub enum BoundaryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("resolution queue is full ({max_size} pending requests)")]
    QueueFull { max_size: usize },

    #[error("resolution failed after {attempts} attempt(s): {last_failure}")]
    ResolutionFailed {
        attempts: u32,
        last_failure: ChainExhausted,
    },

    #[error("resolution request was cancelled")]
    Cancelled,

    #[error("boundary service has been shut down")]
    ShutDown,
}

impl BoundaryError {
    /// True when the caller may simply try again later.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::ResolutionFailed { .. })
    }

    pub(crate) fn resolution_failed(attempts: u32, last_failure: ChainExhausted) -> Self {
        Self::ResolutionFailed {
            attempts,
            last_failure,
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
