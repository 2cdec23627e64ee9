//! Behavior-driven tests for boundary resolution
//!
//! These tests verify HOW the service answers callers: provider fallback order,
//! caching, coalescing of identical requests, cancellation and backpressure.

use std::sync::Arc;
use std::time::Duration;

use boundary_tests::{
    fail, scripted_config, start_service, succeed, BoundaryError, BoundaryOverrides,
    CircuitState, Confidence, EventRecorder, ProviderKind, ScriptedOutcome, ScriptedProvider,
};

// =============================================================================
// Resolution: Provider Fallback
// =============================================================================

#[tokio::test]
async fn when_first_provider_fails_the_next_by_priority_answers() {
    // Given: Three providers, the highest-priority one failing
    let first = Arc::new(ScriptedProvider::new("first", fail()));
    let second = Arc::new(ScriptedProvider::new("second", succeed("Athens", 2.0)));
    let third = Arc::new(ScriptedProvider::new("third", succeed("Athens", 3.0)));
    let service = start_service(
        scripted_config(&["first", "second", "third"]),
        &[first.clone(), second.clone(), third.clone()],
    );

    // When: A caller resolves a place
    let result = service.resolve("Athens", None).await.expect("resolved");

    // Then: The second provider answered and the third was never asked
    assert_eq!(result.source_provider_id.as_str(), "second");
    assert_eq!(result.confidence, Confidence::Exact);
    assert_eq!((first.calls(), second.calls(), third.calls()), (1, 1, 0));
    service.shutdown().await;
}

#[tokio::test]
async fn when_osm_fails_for_athens_nominatim_answers_and_osm_health_records_it() {
    // Given: The default provider ids, OSM failing and Nominatim succeeding
    let osm = Arc::new(ScriptedProvider::new("osm", fail()).with_kind(ProviderKind::Osm));
    let nominatim = Arc::new(
        ScriptedProvider::new("nominatim", succeed("Athens", 23.0))
            .with_kind(ProviderKind::Nominatim),
    );
    let service = start_service(boundary_core::BoundaryConfig::default(), &[osm.clone(), nominatim.clone()]);

    // When: Athens is resolved
    let result = service.resolve("Athens", None).await.expect("resolved");

    // Then: Nominatim is the source and OSM has one recorded failure, still closed
    assert_eq!(result.source_provider_id.as_str(), "nominatim");
    assert_eq!(result.name, "Athens");
    let health = service.health().await;
    let osm_health = health
        .providers
        .iter()
        .find(|provider| provider.provider_id.as_str() == "osm")
        .expect("osm registered");
    assert_eq!(osm_health.consecutive_failures, 1);
    assert_eq!(osm_health.state, CircuitState::Closed);
    assert_eq!(osm.queries(), vec!["Athens"]);
    service.shutdown().await;
}

// =============================================================================
// Resolution: Caching
// =============================================================================

#[tokio::test]
async fn when_the_same_query_is_repeated_the_cache_answers_without_providers() {
    // Given: A resolved query
    let provider = Arc::new(ScriptedProvider::new("gazetteer", succeed("Athens", 0.0)));
    let service = start_service(scripted_config(&["gazetteer"]), &[provider.clone()]);
    let (recorder, _subscription) = EventRecorder::attach(&service);
    let first = service.resolve("Athens", None).await.expect("resolved");

    // When: The query is repeated with different case and spacing
    let second = service.resolve("  ATHENS ", None).await.expect("cached");

    // Then: The same boundary comes back and the provider is not called again
    assert_eq!(first, second);
    assert_eq!(provider.calls(), 1);
    assert_eq!(recorder.kinds(), vec!["resolved", "cache-hit"]);
    let stats = service.health().await.cache;
    assert_eq!((stats.hits, stats.misses), (1, 1));
    service.shutdown().await;
}

#[tokio::test]
async fn when_admin_levels_differ_the_requests_are_cached_separately() {
    // Given: A resolved query at the default admin levels
    let provider = Arc::new(ScriptedProvider::new("gazetteer", succeed("Athens", 0.0)));
    let service = start_service(scripted_config(&["gazetteer"]), &[provider.clone()]);
    service.resolve("Athens", None).await.expect("resolved");

    // When: The same name is resolved at another level set
    let levels = boundary_core::AdminLevels::new([8]).expect("valid levels");
    service
        .resolve("Athens", Some(BoundaryOverrides::default().admin_levels(levels)))
        .await
        .expect("resolved");

    // Then: Both went to the provider
    assert_eq!(provider.calls(), 2);
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn when_ttl_elapses_the_next_request_goes_back_to_providers() {
    // Given: A one second cache TTL
    let provider = Arc::new(ScriptedProvider::new("gazetteer", succeed("Athens", 0.0)));
    let mut config = scripted_config(&["gazetteer"]);
    config.cache.ttl_ms = 1_000;
    let service = start_service(config, &[provider.clone()]);

    // When: Resolving at t=0, t=500ms and t=1500ms
    service.resolve("Athens", None).await.expect("t=0");
    tokio::time::advance(Duration::from_millis(500)).await;
    let cached = service.resolve("Athens", None).await.expect("t=500");
    tokio::time::advance(Duration::from_millis(1_000)).await;
    service.resolve("Athens", None).await.expect("t=1500");

    // Then: Only the first and the last reached the provider
    assert!(cached.is_exact());
    assert_eq!(provider.calls(), 2);
    service.shutdown().await;
}

#[tokio::test]
async fn when_a_result_is_invalidated_it_is_resolved_again() {
    // Given: A cached result
    let provider = Arc::new(ScriptedProvider::new("gazetteer", succeed("Athens", 0.0)));
    let service = start_service(scripted_config(&["gazetteer"]), &[provider.clone()]);
    service.resolve("Athens", None).await.expect("resolved");

    // When: It is invalidated and requested again
    let removed = service.invalidate("athens", None).await.expect("valid query");
    service.resolve("Athens", None).await.expect("resolved again");

    // Then: The provider answered twice
    assert!(removed);
    assert_eq!(provider.calls(), 2);
    service.shutdown().await;
}

// =============================================================================
// Resolution: Coalescing and Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_callers_ask_concurrently_one_provider_call_serves_all() {
    // Given: A slow provider
    let provider = Arc::new(ScriptedProvider::new(
        "gazetteer",
        ScriptedOutcome::Delay(Duration::from_millis(200), Box::new(succeed("Athens", 0.0))),
    ));
    let service = start_service(scripted_config(&["gazetteer"]), &[provider.clone()]);

    // When: Two callers ask for the same place before it resolves
    let first = service.resolve_handle("Athens", None).await.expect("queued");
    let second = service.resolve_handle("athens", None).await.expect("coalesced");
    let (first_result, second_result) = tokio::join!(first.wait(), second.wait());

    // Then: Both got the same boundary from a single call
    assert_eq!(
        first_result.expect("first caller"),
        second_result.expect("second caller")
    );
    assert_eq!(provider.calls(), 1);
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn when_one_caller_cancels_the_others_still_receive_the_result() {
    // Given: Two callers waiting on the same slow resolution
    let provider = Arc::new(ScriptedProvider::new(
        "gazetteer",
        ScriptedOutcome::Delay(Duration::from_millis(200), Box::new(succeed("Athens", 0.0))),
    ));
    let service = start_service(scripted_config(&["gazetteer"]), &[provider.clone()]);
    let staying = service.resolve_handle("Athens", None).await.expect("queued");
    let leaving = service.resolve_handle("Athens", None).await.expect("coalesced");
    assert!(leaving.is_coalesced());

    // When: The second caller cancels
    assert!(leaving.cancel());
    assert!(!leaving.cancel());

    // Then: Only that caller is told it was cancelled
    assert!(matches!(leaving.wait().await, Err(BoundaryError::Cancelled)));
    let result = staying.wait().await.expect("still resolved");
    assert_eq!(result.name, "Athens");
    assert_eq!(provider.calls(), 1);
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn when_the_only_caller_cancels_a_queued_request_it_is_dropped() {
    // Given: Periodic dispatch only, so the request stays queued
    let provider = Arc::new(ScriptedProvider::new("gazetteer", succeed("Athens", 0.0)));
    let mut config = scripted_config(&["gazetteer"]);
    config.queue.eager_dispatch = false;
    let service = start_service(config, &[provider.clone()]);
    tokio::time::sleep(Duration::from_millis(1)).await;
    let handle = service.resolve_handle("Athens", None).await.expect("queued");
    assert_eq!(service.health().await.queue_depth, 1);

    // When: The caller cancels
    assert!(handle.cancel());

    // Then: The queue is empty and no provider was called
    assert!(matches!(handle.wait().await, Err(BoundaryError::Cancelled)));
    assert_eq!(service.health().await.queue_depth, 0);
    assert_eq!(provider.calls(), 0);
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn when_a_caller_cancels_while_waiting_behind_another_request_its_provider_call_never_happens() {
    // Given: Two places picked up by the same processing tick, behind a slow provider
    let provider = Arc::new(ScriptedProvider::new(
        "gazetteer",
        ScriptedOutcome::Delay(Duration::from_millis(200), Box::new(succeed("Athens", 0.0))),
    ));
    let mut config = scripted_config(&["gazetteer"]);
    config.queue.eager_dispatch = false;
    let service = start_service(config, &[provider.clone()]);
    tokio::time::sleep(Duration::from_millis(1)).await;
    let athens = service.resolve_handle("Athens", None).await.expect("queued");
    let sparta = service.resolve_handle("Sparta", None).await.expect("queued");
    tokio::time::advance(Duration::from_millis(300_000)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(provider.calls(), 1);

    // When: The second caller cancels while the first call is still running
    assert!(sparta.cancel());

    // Then: The cancelled place leaves the queue and is never sent to the provider
    assert_eq!(service.health().await.queue_depth, 1);
    assert!(matches!(sparta.wait().await, Err(BoundaryError::Cancelled)));
    assert_eq!(athens.wait().await.expect("resolved").name, "Athens");
    assert_eq!(provider.queries(), vec!["Athens"]);
    assert_eq!(service.health().await.queue_depth, 0);
    service.shutdown().await;
}

// =============================================================================
// Resolution: Backpressure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_the_queue_is_full_new_places_are_rejected_but_duplicates_join() {
    // Given: A queue holding at most one request that is not dispatched eagerly
    let provider = Arc::new(ScriptedProvider::new("gazetteer", succeed("Athens", 0.0)));
    let mut config = scripted_config(&["gazetteer"]);
    config.queue.max_size = 1;
    config.queue.eager_dispatch = false;
    let service = start_service(config, &[provider.clone()]);
    tokio::time::sleep(Duration::from_millis(1)).await;
    let athens = service.resolve_handle("Athens", None).await.expect("capacity");

    // When: A different place and the same place are requested
    let sparta = service.resolve_handle("Sparta", None).await;
    let athens_again = service.resolve_handle("ATHENS", None).await;

    // Then: The new place is rejected, the duplicate coalesces
    assert!(matches!(sparta, Err(BoundaryError::QueueFull { max_size: 1 })));
    let athens_again = athens_again.expect("coalesced despite full queue");
    assert!(athens_again.is_coalesced());
    assert_eq!(service.health().await.queue_depth, 1);

    // And: The next processing tick answers both callers
    tokio::time::advance(Duration::from_millis(300_000)).await;
    assert_eq!(athens.wait().await.expect("resolved").name, "Athens");
    assert_eq!(athens_again.wait().await.expect("resolved").name, "Athens");
    assert_eq!(provider.calls(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn when_input_is_invalid_nothing_is_queued() {
    // Given: A running service
    let provider = Arc::new(ScriptedProvider::new("gazetteer", succeed("Athens", 0.0)));
    let service = start_service(scripted_config(&["gazetteer"]), &[provider.clone()]);

    // When: The query is blank or the options are out of range
    let blank = service.resolve("   ", None).await;
    let too_long = service.resolve(&"x".repeat(600), None).await;
    let zero_timeout = service
        .resolve("Athens", Some(BoundaryOverrides::default().timeout_ms(0)))
        .await;

    // Then: Each is a validation error and no provider was called
    for outcome in [blank, too_long, zero_timeout] {
        assert!(matches!(outcome, Err(BoundaryError::Validation(_))));
    }
    assert_eq!(provider.calls(), 0);
    assert_eq!(service.health().await.queue_depth, 0);
    service.shutdown().await;
}
