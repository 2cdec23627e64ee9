use std::sync::Arc;

use boundary_core::{
    AdapterErrorKind, AdminLevels, BoundaryConfig, BoundaryOptions, BoundaryOverrides, BoundaryProvider,
    BoundaryService, CannedHttpClient, Geometry, HttpError, HttpResponse, NominatimAdapter,
    OverpassAdapter, ProviderId, ProviderKind, ScriptedProvider,
};

const OVERPASS_ATHENS: &str = r#"{
    "elements": [{
        "type": "relation",
        "tags": {"name": "Athens", "admin_level": "8", "boundary": "administrative"},
        "members": [{"type": "way", "role": "outer", "geometry": [
            {"lat": 37.9, "lon": 23.7}, {"lat": 37.9, "lon": 23.8},
            {"lat": 38.0, "lon": 23.8}, {"lat": 38.0, "lon": 23.7},
            {"lat": 37.9, "lon": 23.7}
        ]}]
    }]
}"#;

const NOMINATIM_ATHENS: &str = r#"[{
    "name": "Athens",
    "display_name": "Athens, Greece",
    "category": "boundary",
    "type": "administrative",
    "place_rank": 16,
    "geojson": {"type": "Polygon", "coordinates": [[[23.7,37.9],[23.8,37.9],[23.8,38.0],[23.7,37.9]]]}
}]"#;

#[derive(Clone)]
struct ProviderCase {
    kind: ProviderKind,
    provider: Arc<dyn BoundaryProvider>,
    client: Arc<CannedHttpClient>,
}

fn provider_cases(body_for: impl Fn(ProviderKind) -> Result<HttpResponse, HttpError>) -> Vec<ProviderCase> {
    let osm_client = Arc::new(CannedHttpClient::new(body_for(ProviderKind::Osm)));
    let nominatim_client = Arc::new(CannedHttpClient::new(body_for(ProviderKind::Nominatim)));
    vec![
        ProviderCase {
            kind: ProviderKind::Osm,
            provider: Arc::new(OverpassAdapter::new(
                ProviderId::new("osm"),
                "https://overpass.example/api/interpreter",
                osm_client.clone(),
            )),
            client: osm_client,
        },
        ProviderCase {
            kind: ProviderKind::Nominatim,
            provider: Arc::new(NominatimAdapter::new(
                ProviderId::new("nominatim"),
                "https://nominatim.example",
                nominatim_client.clone(),
            )),
            client: nominatim_client,
        },
    ]
}

fn athens_body(kind: ProviderKind) -> Result<HttpResponse, HttpError> {
    Ok(HttpResponse::ok_json(match kind {
        ProviderKind::Nominatim => NOMINATIM_ATHENS,
        _ => OVERPASS_ATHENS,
    }))
}

fn level_8() -> BoundaryOptions {
    BoundaryOptions {
        admin_levels: AdminLevels::new([8]).expect("valid levels"),
        ..BoundaryOptions::default()
    }
}

#[tokio::test]
async fn every_adapter_returns_a_valid_closed_polygon() {
    for case in provider_cases(athens_body) {
        let result = case
            .provider
            .call("Athens", &level_8())
            .await
            .unwrap_or_else(|error| panic!("provider '{}' failed: {error}", case.provider.id()));

        assert_eq!(case.provider.kind(), case.kind);
        assert_eq!(result.name, "Athens", "provider '{}': name", case.provider.id());
        assert_eq!(result.admin_level, 8, "provider '{}': level", case.provider.id());
        assert!(
            result.geometry.validate().is_ok(),
            "provider '{}': geometry must validate",
            case.provider.id()
        );
        let Geometry::Polygon(rings) = &result.geometry else {
            panic!("provider '{}': expected a polygon", case.provider.id());
        };
        assert_eq!(rings[0].first(), rings[0].last());
        assert_eq!(case.client.requests().len(), 1);
    }
}

#[tokio::test]
async fn every_adapter_forwards_the_call_timeout_to_transport() {
    let options = BoundaryOptions {
        timeout: std::time::Duration::from_millis(1_500),
        ..level_8()
    };

    for case in provider_cases(athens_body) {
        case.provider
            .call("Athens", &options)
            .await
            .expect("athens resolves");

        let request = &case.client.requests()[0];
        assert_eq!(
            request.timeout,
            std::time::Duration::from_millis(1_500),
            "provider '{}': timeout",
            case.provider.id()
        );
    }
}

#[tokio::test]
async fn every_adapter_maps_transport_and_status_failures() {
    let cases = [
        (Err(HttpError::timeout("deadline")), AdapterErrorKind::Timeout),
        (Ok(HttpResponse::with_status(429, "slow down")), AdapterErrorKind::RateLimited),
        (Ok(HttpResponse::with_status(503, "maintenance")), AdapterErrorKind::Unavailable),
        (Ok(HttpResponse::ok_json("<html>")), AdapterErrorKind::InvalidResponse),
    ];

    for (response, expected) in cases {
        for case in provider_cases(|_| response.clone()) {
            let error = case
                .provider
                .call("Athens", &level_8())
                .await
                .expect_err("transport failure must surface");

            assert_eq!(
                error.kind(),
                expected,
                "provider '{}': {error}",
                case.provider.id()
            );
        }
    }
}

#[tokio::test]
async fn every_adapter_reports_unknown_places_as_not_found() {
    let empty = |kind: ProviderKind| -> Result<HttpResponse, HttpError> {
        Ok(HttpResponse::ok_json(match kind {
            ProviderKind::Nominatim => "[]",
            _ => r#"{"elements": []}"#,
        }))
    };

    for case in provider_cases(empty) {
        let error = case
            .provider
            .call("Atlantis", &level_8())
            .await
            .expect_err("no such place");

        assert_eq!(error.kind(), AdapterErrorKind::NotFound, "provider '{}'", case.provider.id());
    }
}

#[tokio::test]
async fn scripted_provider_honours_the_same_contract() {
    let provider: Arc<dyn BoundaryProvider> = Arc::new(ScriptedProvider::failing("gazetteer"));

    let error = provider
        .call("Athens", &level_8())
        .await
        .expect_err("scripted failure");

    assert_eq!(provider.id().as_str(), "gazetteer");
    assert_eq!(provider.kind(), ProviderKind::Custom);
    assert_eq!(error.kind(), AdapterErrorKind::Unavailable);
}

#[tokio::test]
async fn default_chain_falls_back_from_overpass_to_nominatim() {
    // Overpass is asked first and finds nothing; Nominatim answers.
    let client = Arc::new(CannedHttpClient::json(NOMINATIM_ATHENS));
    client.push(Ok(HttpResponse::ok_json(r#"{"elements": []}"#)));
    let service = BoundaryService::builder(BoundaryConfig::default())
        .with_http_client(client.clone())
        .build()
        .expect("default configuration is valid");

    let overrides = BoundaryOverrides::default().admin_levels(AdminLevels::new([8]).expect("valid levels"));
    let result = service
        .resolve("Athens", Some(overrides))
        .await
        .expect("nominatim resolves");

    assert_eq!(result.source_provider_id.as_str(), "nominatim");
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].url.starts_with("https://overpass-api.de"));
    assert!(requests[1].url.contains("/search?q=Athens"));
    service.shutdown().await;
}
