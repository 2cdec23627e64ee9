use serde::{Deserialize, Serialize};

/// `[longitude, latitude]` pair, GeoJSON axis order.
pub type Position = [f64; 2];

/// Closed linear ring. The first ring of a polygon is its exterior, the rest are holes.
pub type Ring = Vec<Position>;

/// Provider-supplied boundary geometry, serialized as a GeoJSON geometry object.
///
/// Geometry is carried through the service untouched; nothing here computes
/// containment, area or simplification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    /// Parses a GeoJSON geometry object, rejecting anything that is not polygonal.
    pub fn from_geojson(value: &serde_json::Value) -> Result<Self, String> {
        let geometry: Self = serde_json::from_value(value.clone()).map_err(|error| {
            let kind = value
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<missing>");
            format!("expected Polygon or MultiPolygon geometry, got '{kind}': {error}")
        })?;
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<(), String> {
        let polygons: Vec<&Vec<Ring>> = match self {
            Self::Polygon(rings) => vec![rings],
            Self::MultiPolygon(polygons) => polygons.iter().collect(),
        };
        if polygons.is_empty() {
            return Err(String::from("geometry has no polygons"));
        }

        for rings in polygons {
            let Some(exterior) = rings.first() else {
                return Err(String::from("polygon has no exterior ring"));
            };
            if exterior.len() < 4 {
                return Err(format!(
                    "exterior ring has {} positions, at least 4 required",
                    exterior.len()
                ));
            }
            let finite = rings
                .iter()
                .flatten()
                .all(|[lon, lat]| lon.is_finite() && lat.is_finite());
            if !finite {
                return Err(String::from("geometry contains non-finite coordinates"));
            }
        }

        Ok(())
    }

    pub fn polygon_count(&self) -> usize {
        match self {
            Self::Polygon(_) => 1,
            Self::MultiPolygon(polygons) => polygons.len(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        match self {
            Self::Polygon(rings) => rings.iter().map(Vec::len).sum(),
            Self::MultiPolygon(polygons) => polygons.iter().flatten().map(Vec::len).sum(),
        }
    }
}
