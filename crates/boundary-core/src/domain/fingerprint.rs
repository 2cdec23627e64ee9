use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{normalize_query, AdminLevels, BoundingBox};
use crate::ValidationError;

/// Deterministic cache and coalescing key for a query and the options that change its answer.
///
/// Only the query text, admin levels and bounding box participate; timeouts and the
/// approximate flag do not change which boundary a provider returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        query: &str,
        admin_levels: &AdminLevels,
        bbox: Option<&BoundingBox>,
    ) -> Result<Self, ValidationError> {
        let query = normalize_query(query)?.to_lowercase();

        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update(b"|levels:");
        for level in admin_levels.iter() {
            hasher.update([level]);
        }
        hasher.update(b"|bbox:");
        if let Some(bbox) = bbox {
            for value in [bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat] {
                // micro-degree precision
                let scaled = (value * 1e6).round() as i64;
                hasher.update(scaled.to_le_bytes());
            }
        }

        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, enough to tell requests apart in logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
