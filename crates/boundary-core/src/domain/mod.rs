//! # Domain Models
//!
//! Canonical types for boundary resolution.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Geometry`] | Polygon / MultiPolygon as GeoJSON |
//! | [`AdminLevels`] | Sorted set of requested OSM admin levels |
//! | [`BoundingBox`] | Optional geographic restriction |
//! | [`BoundaryOptions`] | Complete per-call options |
//! | [`BoundaryOverrides`] | Partial per-call options |
//! | [`GeocodingResult`] | What a provider adapter returns |
//! | [`BoundaryResult`] | What callers receive |
//! | [`Fingerprint`] | Cache / coalescing key |
//! | [`UtcDateTime`] | UTC timestamp |

mod fingerprint;
mod geometry;
mod options;
mod result;
mod timestamp;

pub use fingerprint::Fingerprint;
pub use geometry::{Geometry, Position, Ring};
pub use options::{normalize_query, AdminLevels, BoundaryOptions, BoundaryOverrides, BoundingBox};
pub use result::{BoundaryResult, Confidence, GeocodingResult};
pub use timestamp::UtcDateTime;
