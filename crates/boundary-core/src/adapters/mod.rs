//! Built-in provider adapters.
//!
//! | Adapter | Kind | Notes |
//! |---------|------|-------|
//! | [`OverpassAdapter`] | `osm` | `relation[boundary=administrative]` with `out geom` |
//! | [`NominatimAdapter`] | `nominatim` | `/search` with `polygon_geojson=1` |
//! | [`ScriptedProvider`] | `custom` | Deterministic in-memory provider for tests and offline runs |

mod nominatim;
mod overpass;
mod scripted;

pub use nominatim::NominatimAdapter;
pub use overpass::OverpassAdapter;
pub use scripted::{ScriptedOutcome, ScriptedProvider};

use crate::config::ProviderConfig;
use crate::http_client::{HttpAuth, HttpError};
use crate::provider::AdapterError;

/// Builds the auth strategy for a provider's optional API key.
///
/// `options.apiKeyHeader` sends the key as a header; otherwise it is appended as the
/// `options.apiKeyParam` query parameter (default `key`).
pub(crate) fn api_key_auth(config: &ProviderConfig) -> HttpAuth {
    let Some(key) = config.api_config.api_key.clone() else {
        return HttpAuth::None;
    };

    if let Some(header) = config.option_str("apiKeyHeader") {
        return HttpAuth::Header {
            name: header.to_owned(),
            value: key,
        };
    }

    HttpAuth::Query {
        name: config.option_str("apiKeyParam").unwrap_or("key").to_owned(),
        value: key,
    }
}

pub(crate) fn transport_error(provider: &str, error: HttpError, timeout_ms: u64) -> AdapterError {
    if error.is_timeout() {
        AdapterError::timeout(timeout_ms)
    } else {
        AdapterError::unavailable(format!("{provider} transport error: {}", error.message()))
    }
}

pub(crate) fn trim_endpoint(endpoint: &str) -> &str {
    endpoint.trim_end_matches('/')
}
