use serde::{Deserialize, Serialize};

use crate::domain::{Geometry, UtcDateTime};
use crate::provider::ProviderId;

/// How much a returned boundary can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Freshly resolved by a provider or served from a live cache entry.
    Exact,
    /// Stale cache entry served after every provider kept failing.
    Approximate,
}

/// Raw answer produced by a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodingResult {
    pub geometry: Geometry,
    pub name: String,
    pub admin_level: u8,
}

/// Resolved boundary handed to callers. Each caller receives its own clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryResult {
    pub geometry: Geometry,
    pub name: String,
    pub admin_level: u8,
    pub source_provider_id: ProviderId,
    pub confidence: Confidence,
    pub resolved_at: UtcDateTime,
}

impl BoundaryResult {
    pub fn from_geocoding(result: GeocodingResult, provider: ProviderId) -> Self {
        Self {
            geometry: result.geometry,
            name: result.name,
            admin_level: result.admin_level,
            source_provider_id: provider,
            confidence: Confidence::Exact,
            resolved_at: UtcDateTime::now(),
        }
    }

    /// Copy of `self` downgraded to [`Confidence::Approximate`].
    pub fn approximate(&self) -> Self {
        Self {
            confidence: Confidence::Approximate,
            ..self.clone()
        }
    }

    pub const fn is_exact(&self) -> bool {
        matches!(self.confidence, Confidence::Exact)
    }
}
