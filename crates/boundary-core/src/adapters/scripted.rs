use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::{BoundaryOptions, GeocodingResult};
use crate::provider::{AdapterError, BoundaryProvider, ProviderFuture, ProviderId, ProviderKind};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed(GeocodingResult),
    Fail(AdapterError),
    /// Sleeps before answering, to exercise per-call timeouts.
    Delay(Duration, Box<ScriptedOutcome>),
}

/// Deterministic provider that replays queued outcomes, then repeats a default one.
///
/// Records every call so tests can assert fallback order and call counts.
#[derive(Debug)]
pub struct ScriptedProvider {
    id: ProviderId,
    kind: ProviderKind,
    queued: Mutex<VecDeque<ScriptedOutcome>>,
    default_outcome: ScriptedOutcome,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, default_outcome: ScriptedOutcome) -> Self {
        Self {
            id: ProviderId::new(id),
            kind: ProviderKind::Custom,
            queued: Mutex::new(VecDeque::new()),
            default_outcome,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(id: impl Into<String>, result: GeocodingResult) -> Self {
        Self::new(id, ScriptedOutcome::Succeed(result))
    }

    pub fn failing(id: impl Into<String>) -> Self {
        Self::new(
            id,
            ScriptedOutcome::Fail(AdapterError::unavailable("scripted provider is down")),
        )
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Queues outcomes consumed before the default one.
    pub fn then(self, outcome: ScriptedOutcome) -> Self {
        self.push(outcome);
        self
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        self.queued
            .lock()
            .expect("scripted outcomes lock is not poisoned")
            .push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .expect("scripted queries lock is not poisoned")
            .clone()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        self.queued
            .lock()
            .expect("scripted outcomes lock is not poisoned")
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

impl BoundaryProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn call<'a>(&'a self, query: &'a str, _options: &'a BoundaryOptions) -> ProviderFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .expect("scripted queries lock is not poisoned")
            .push(query.to_owned());
        let mut outcome = self.next_outcome();

        Box::pin(async move {
            loop {
                match outcome {
                    ScriptedOutcome::Succeed(result) => return Ok(result),
                    ScriptedOutcome::Fail(error) => return Err(error),
                    ScriptedOutcome::Delay(delay, next) => {
                        tokio::time::sleep(delay).await;
                        outcome = *next;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Geometry;
    use crate::provider::AdapterErrorKind;

    fn result() -> GeocodingResult {
        GeocodingResult {
            geometry: Geometry::Polygon(vec![vec![
                [0.0, 0.0],
                [1.0, 0.0],
                [1.0, 1.0],
                [0.0, 0.0],
            ]]),
            name: String::from("Test"),
            admin_level: 8,
        }
    }

    #[tokio::test]
    async fn replays_queue_then_default() {
        let provider = ScriptedProvider::succeeding("custom", result()).then(
            ScriptedOutcome::Fail(AdapterError::rate_limited("busy")),
        );
        let options = BoundaryOptions::default();

        let first = provider.call("a", &options).await;
        let second = provider.call("b", &options).await;

        assert_eq!(
            first.expect_err("queued failure").kind(),
            AdapterErrorKind::RateLimited
        );
        assert_eq!(second.expect("default success").name, "Test");
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.queries(), vec!["a", "b"]);
    }
}
