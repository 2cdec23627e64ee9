use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DefaultsConfig;
use crate::ValidationError;

const MAX_QUERY_LEN: usize = 512;
const MAX_ADMIN_LEVEL: u8 = 12;

/// Trims and collapses interior whitespace. Case is preserved for providers.
pub fn normalize_query(query: &str) -> Result<String, ValidationError> {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }
    let len = normalized.chars().count();
    if len > MAX_QUERY_LEN {
        return Err(ValidationError::QueryTooLong {
            len,
            max: MAX_QUERY_LEN,
        });
    }
    Ok(normalized)
}

/// Ordered, de-duplicated set of OSM admin levels (1..=12).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct AdminLevels(BTreeSet<u8>);

impl AdminLevels {
    pub fn new(levels: impl IntoIterator<Item = u8>) -> Result<Self, ValidationError> {
        let mut set = BTreeSet::new();
        for level in levels {
            if level == 0 || level > MAX_ADMIN_LEVEL {
                return Err(ValidationError::InvalidAdminLevel { value: level });
            }
            set.insert(level);
        }
        if set.is_empty() {
            return Err(ValidationError::EmptyAdminLevels);
        }
        Ok(Self(set))
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, level: u8) -> bool {
        self.0.contains(&level)
    }

    /// Most specific (highest) requested level.
    pub fn finest(&self) -> u8 {
        self.0.last().copied().unwrap_or(MAX_ADMIN_LEVEL)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.iter().copied().collect()
    }
}

impl Default for AdminLevels {
    fn default() -> Self {
        Self(BTreeSet::from([4, 6, 8]))
    }
}

impl TryFrom<Vec<u8>> for AdminLevels {
    type Error = ValidationError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AdminLevels> for Vec<u8> {
    fn from(value: AdminLevels) -> Self {
        value.to_vec()
    }
}

/// Geographic restriction in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Result<Self, ValidationError> {
        let bbox = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("minLon", self.min_lon, 180.0),
            ("minLat", self.min_lat, 90.0),
            ("maxLon", self.max_lon, 180.0),
            ("maxLat", self.max_lat, 90.0),
        ];
        for (field, value, limit) in fields {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteCoordinate { field });
            }
            if value.abs() > limit {
                return Err(ValidationError::CoordinateOutOfRange {
                    field,
                    value: value.to_string(),
                });
            }
        }
        if self.min_lon > self.max_lon {
            return Err(ValidationError::InvertedBoundingBox { axis: "longitude" });
        }
        if self.min_lat > self.max_lat {
            return Err(ValidationError::InvertedBoundingBox { axis: "latitude" });
        }
        Ok(())
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

impl FromStr for BoundingBox {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidBoundingBox {
            value: value.to_owned(),
        };
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        let &[min_lon, min_lat, max_lon, max_lat] = parts.as_slice() else {
            return Err(invalid());
        };
        Self::new(min_lon, min_lat, max_lon, max_lat)
    }
}

/// Complete per-call resolution options.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryOptions {
    pub admin_levels: AdminLevels,
    pub timeout: Duration,
    /// Permit a stale cached result when every provider keeps failing.
    pub include_approximate: bool,
    pub bbox: Option<BoundingBox>,
}

impl BoundaryOptions {
    pub fn from_defaults(defaults: &DefaultsConfig) -> Self {
        Self {
            admin_levels: defaults.admin_levels.clone(),
            timeout: Duration::from_millis(defaults.timeout_ms),
            include_approximate: defaults.include_approximate,
            bbox: None,
        }
    }

    /// Applies per-call overrides; unset fields keep their current value.
    pub fn with_overrides(mut self, overrides: BoundaryOverrides) -> Result<Self, ValidationError> {
        if let Some(levels) = overrides.admin_levels {
            self.admin_levels = levels;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            if timeout_ms == 0 {
                return Err(ValidationError::ZeroTimeout);
            }
            self.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(include_approximate) = overrides.include_approximate {
            self.include_approximate = include_approximate;
        }
        if let Some(bbox) = overrides.bbox {
            bbox.validate()?;
            self.bbox = Some(bbox);
        }
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for BoundaryOptions {
    fn default() -> Self {
        Self::from_defaults(&DefaultsConfig::default())
    }
}

/// Partial per-call options, merged over the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoundaryOverrides {
    pub admin_levels: Option<AdminLevels>,
    pub timeout_ms: Option<u64>,
    pub include_approximate: Option<bool>,
    pub bbox: Option<BoundingBox>,
}

impl BoundaryOverrides {
    pub fn admin_levels(mut self, levels: AdminLevels) -> Self {
        self.admin_levels = Some(levels);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn include_approximate(mut self, include: bool) -> Self {
        self.include_approximate = Some(include);
        self
    }

    pub fn bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}
