use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::adapters::{api_key_auth, transport_error, trim_endpoint};
use crate::config::ProviderConfig;
use crate::domain::{BoundaryOptions, GeocodingResult, Geometry, Position, Ring};
use crate::error::duration_ms;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider::{AdapterError, BoundaryProvider, ProviderFuture, ProviderId, ProviderKind};

/// OSM Overpass adapter resolving `boundary=administrative` relations by name.
#[derive(Clone)]
pub struct OverpassAdapter {
    id: ProviderId,
    endpoint: String,
    auth: HttpAuth,
    http_client: Arc<dyn HttpClient>,
}

impl OverpassAdapter {
    pub fn new(
        id: ProviderId,
        endpoint: impl Into<String>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            auth: HttpAuth::None,
            http_client,
        }
    }

    pub fn from_config(config: &ProviderConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            auth: api_key_auth(config),
            ..Self::new(
                config.id.clone(),
                config.api_config.endpoint.clone(),
                http_client,
            )
        }
    }

    async fn query_relations(
        &self,
        query: &str,
        options: &BoundaryOptions,
    ) -> Result<GeocodingResult, AdapterError> {
        let timeout_ms = duration_ms(options.timeout);
        let body = format!("data={}", urlencoding::encode(&overpass_ql(query, options)));
        let request = HttpRequest::post(trim_endpoint(&self.endpoint))
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body)
            .with_timeout(options.timeout)
            .with_auth(&self.auth);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| transport_error("overpass", error, timeout_ms))?;

        if !response.is_success() {
            return Err(AdapterError::from_status("overpass", response.status));
        }

        let payload: OverpassResponse = serde_json::from_str(&response.body).map_err(|e| {
            AdapterError::invalid_response(format!("overpass returned malformed JSON: {e}"))
        })?;
        debug!(provider = %self.id, elements = payload.elements.len(), "overpass query returned");

        select_relation(payload.elements, query)
    }
}

impl BoundaryProvider for OverpassAdapter {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Osm
    }

    fn call<'a>(&'a self, query: &'a str, options: &'a BoundaryOptions) -> ProviderFuture<'a> {
        Box::pin(self.query_relations(query, options))
    }
}

fn overpass_ql(query: &str, options: &BoundaryOptions) -> String {
    let levels = options
        .admin_levels
        .iter()
        .map(|level| level.to_string())
        .collect::<Vec<_>>()
        .join("|");
    // Overpass bbox order is south,west,north,east
    let bbox = options
        .bbox
        .map(|b| format!("({},{},{},{})", b.min_lat, b.min_lon, b.max_lat, b.max_lon))
        .unwrap_or_default();
    let timeout_secs = options.timeout.as_secs().max(1);

    format!(
        "[out:json][timeout:{timeout_secs}];relation[\"boundary\"=\"administrative\"][\"name\"=\"{}\"][\"admin_level\"~\"^({levels})$\"]{bbox};out geom;",
        escape_ql(query)
    )
}

fn escape_ql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    element_type: String,
    #[serde(default)]
    tags: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    members: Vec<OverpassMember>,
}

#[derive(Debug, Deserialize)]
struct OverpassMember {
    #[serde(rename = "type")]
    member_type: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    geometry: Vec<OverpassPoint>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OverpassPoint {
    lat: f64,
    lon: f64,
}

/// Most specific relation wins; ties keep Overpass order.
fn select_relation(
    elements: Vec<OverpassElement>,
    query: &str,
) -> Result<GeocodingResult, AdapterError> {
    let mut candidates = elements
        .into_iter()
        .filter(|element| element.element_type == "relation")
        .filter_map(|element| {
            let level = element.tags.get("admin_level")?.parse::<u8>().ok()?;
            Some((level, element))
        })
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        return Err(AdapterError::not_found(format!(
            "overpass found no administrative relation named '{query}'"
        )));
    }
    candidates.sort_by(|left, right| right.0.cmp(&left.0));

    let mut last_error = None;
    for (admin_level, element) in candidates {
        match assemble_outer_rings(&element.members) {
            Ok(rings) => {
                let geometry = if rings.len() == 1 {
                    Geometry::Polygon(rings)
                } else {
                    Geometry::MultiPolygon(rings.into_iter().map(|ring| vec![ring]).collect())
                };
                let name = element
                    .tags
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| query.to_owned());
                return Ok(GeocodingResult {
                    geometry,
                    name,
                    admin_level,
                });
            }
            Err(error) => last_error = Some(error),
        }
    }

    Err(last_error.unwrap_or_else(|| AdapterError::not_found("no usable relation geometry")))
}

/// Stitches `outer` way members end-to-end into closed rings.
///
/// Inner members are dropped: assigning holes would need containment tests.
fn assemble_outer_rings(members: &[OverpassMember]) -> Result<Vec<Ring>, AdapterError> {
    let mut segments: Vec<Vec<Position>> = members
        .iter()
        .filter(|member| member.member_type == "way" && member.role != "inner")
        .filter(|member| member.geometry.len() >= 2)
        .map(|member| {
            member
                .geometry
                .iter()
                .map(|point| [point.lon, point.lat])
                .collect()
        })
        .collect();
    if segments.is_empty() {
        return Err(AdapterError::invalid_response(
            "relation has no outer way geometry",
        ));
    }

    let mut rings = Vec::new();
    while let Some(mut ring) = segments.pop() {
        while ring.first() != ring.last() {
            let Some(tail) = ring.last().copied() else {
                break;
            };
            let next = segments
                .iter()
                .position(|segment| segment.first() == Some(&tail) || segment.last() == Some(&tail));
            let Some(index) = next else {
                return Err(AdapterError::invalid_response(
                    "relation outer ways do not form a closed ring",
                ));
            };
            let mut segment = segments.swap_remove(index);
            if segment.first() != Some(&tail) {
                segment.reverse();
            }
            ring.extend(segment.into_iter().skip(1));
        }
        if ring.len() < 4 {
            return Err(AdapterError::invalid_response("relation ring is degenerate"));
        }
        rings.push(ring);
    }

    Ok(rings)
}
