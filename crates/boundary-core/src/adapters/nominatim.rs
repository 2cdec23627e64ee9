use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::adapters::{api_key_auth, transport_error, trim_endpoint};
use crate::config::ProviderConfig;
use crate::domain::{BoundaryOptions, GeocodingResult, Geometry};
use crate::error::duration_ms;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider::{AdapterError, BoundaryProvider, ProviderFuture, ProviderId, ProviderKind};

const RESULT_LIMIT: usize = 10;

/// Nominatim `/search` adapter.
#[derive(Clone)]
pub struct NominatimAdapter {
    id: ProviderId,
    endpoint: String,
    auth: HttpAuth,
    http_client: Arc<dyn HttpClient>,
}

impl NominatimAdapter {
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

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    fn search_url(&self, query: &str, options: &BoundaryOptions) -> String {
        let mut url = format!(
            "{}/search?q={}&format=jsonv2&polygon_geojson=1&limit={RESULT_LIMIT}",
            trim_endpoint(&self.endpoint),
            urlencoding::encode(query)
        );
        if let Some(bbox) = &options.bbox {
            // viewbox is x1,y1,x2,y2 = left,top,right,bottom
            url.push_str(&format!(
                "&viewbox={},{},{},{}&bounded=1",
                bbox.min_lon, bbox.max_lat, bbox.max_lon, bbox.min_lat
            ));
        }
        url
    }

    async fn search(
        &self,
        query: &str,
        options: &BoundaryOptions,
    ) -> Result<GeocodingResult, AdapterError> {
        let timeout_ms = duration_ms(options.timeout);
        let request = HttpRequest::get(self.search_url(query, options))
            .with_timeout(options.timeout)
            .with_auth(&self.auth);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| transport_error("nominatim", error, timeout_ms))?;

        if !response.is_success() {
            return Err(AdapterError::from_status("nominatim", response.status));
        }

        let places: Vec<NominatimPlace> = serde_json::from_str(&response.body).map_err(|e| {
            AdapterError::invalid_response(format!("nominatim returned malformed JSON: {e}"))
        })?;
        debug!(provider = %self.id, candidates = places.len(), "nominatim search returned");

        select_boundary(places, options)
    }
}

impl BoundaryProvider for NominatimAdapter {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Nominatim
    }

    fn call<'a>(&'a self, query: &'a str, options: &'a BoundaryOptions) -> ProviderFuture<'a> {
        Box::pin(self.search(query, options))
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    #[serde(default)]
    name: Option<String>,
    display_name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(rename = "type", default)]
    place_type: Option<String>,
    #[serde(default)]
    place_rank: Option<u8>,
    #[serde(default)]
    geojson: Option<serde_json::Value>,
}

impl NominatimPlace {
    fn is_administrative(&self) -> bool {
        self.category.as_deref() == Some("boundary")
            && self.place_type.as_deref() == Some("administrative")
    }

    /// Nominatim ranks administrative boundaries at twice their admin level.
    fn admin_level(&self) -> Option<u8> {
        self.place_rank
            .map(|rank| rank.div_ceil(2))
            .filter(|level| (1..=12).contains(level))
    }
}

fn select_boundary(
    places: Vec<NominatimPlace>,
    options: &BoundaryOptions,
) -> Result<GeocodingResult, AdapterError> {
    if places.is_empty() {
        return Err(AdapterError::not_found("nominatim returned no results"));
    }

    let mut rejected = 0usize;
    for place in places {
        if !place.is_administrative() {
            rejected += 1;
            continue;
        }
        let Some(admin_level) = place.admin_level() else {
            rejected += 1;
            continue;
        };
        if !options.admin_levels.contains(admin_level) {
            rejected += 1;
            continue;
        }
        let Some(geojson) = place.geojson.as_ref() else {
            rejected += 1;
            continue;
        };
        let Ok(geometry) = Geometry::from_geojson(geojson) else {
            rejected += 1;
            continue;
        };

        let name = place
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(place.display_name);
        return Ok(GeocodingResult {
            geometry,
            name,
            admin_level,
        });
    }

    Err(AdapterError::not_found(format!(
        "nominatim returned {rejected} result(s) but none is a polygonal boundary at admin levels {:?}",
        options.admin_levels.to_vec()
    )))
}
