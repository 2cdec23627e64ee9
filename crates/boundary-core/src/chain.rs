//! Provider registry and priority-ordered fallback chain.

use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{BoundaryOptions, BoundaryResult};
use crate::error::duration_ms;
use crate::events::{BoundaryEvent, EventBus};
use crate::health::{HealthMonitor, HealthTransition};
use crate::provider::{AdapterError, BoundaryProvider, ProviderId};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One provider as registered with the chain.
#[derive(Clone)]
pub struct RegisteredProvider {
    provider: Arc<dyn BoundaryProvider>,
    priority: u32,
    timeout: Duration,
    limiter: Option<Arc<DirectRateLimiter>>,
    index: usize,
}

impl RegisteredProvider {
    pub fn id(&self) -> ProviderId {
        self.provider.id()
    }

    pub const fn priority(&self) -> u32 {
        self.priority
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn has_rate_budget(&self) -> bool {
        self.limiter
            .as_ref()
            .map(|limiter| limiter.check().is_ok())
            .unwrap_or(true)
    }
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("id", &self.provider.id())
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

/// Providers kept sorted by `(priority, registration order)`.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
    registered: usize,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider`; `rate_limit_per_second` of `None` (or zero) means unlimited.
    pub fn register(
        &mut self,
        provider: Arc<dyn BoundaryProvider>,
        priority: u32,
        timeout: Duration,
        rate_limit_per_second: Option<u32>,
    ) -> &mut Self {
        let limiter = rate_limit_per_second
            .and_then(NonZeroU32::new)
            .map(|per_second| Arc::new(RateLimiter::direct(Quota::per_second(per_second))));

        self.providers.push(RegisteredProvider {
            provider,
            priority,
            timeout,
            limiter,
            index: self.registered,
        });
        self.registered += 1;
        // stable sort keeps registration order for equal priorities
        self.providers
            .sort_by_key(|registered| (registered.priority, registered.index));
        self
    }

    /// Providers in the order the chain tries them.
    pub fn ordered(&self) -> &[RegisteredProvider] {
        &self.providers
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(RegisteredProvider::id).collect()
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.providers.iter().any(|registered| &registered.id() == id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Why a provider did not produce the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AttemptFailure {
    /// Circuit open; the provider was not called.
    CircuitOpen,
    /// No rate budget left; the provider was not called.
    RateLimited,
    /// The adapter call failed or timed out.
    Adapter { error: AdapterError },
}

impl Display for AttemptFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => f.write_str("circuit open"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::Adapter { error } => Display::fmt(error, f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    #[serde(flatten)]
    pub failure: AttemptFailure,
}

/// Every provider was skipped or failed during one pass of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainExhausted {
    pub attempts: Vec<ProviderAttempt>,
}

impl ChainExhausted {
    /// Providers that were actually called.
    pub fn called(&self) -> impl Iterator<Item = &ProviderId> + '_ {
        self.attempts
            .iter()
            .filter(|attempt| matches!(attempt.failure, AttemptFailure::Adapter { .. }))
            .map(|attempt| &attempt.provider_id)
    }
}

impl Display for ChainExhausted {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.attempts.is_empty() {
            return f.write_str("no providers registered");
        }
        f.write_str("all providers failed: ")?;
        for (position, attempt) in self.attempts.iter().enumerate() {
            if position > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} ({})", attempt.provider_id, attempt.failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for ChainExhausted {}

/// Single pass over the registered providers. Performs no retries.
#[derive(Debug)]
pub struct FallbackChain {
    registry: ProviderRegistry,
    health: Arc<HealthMonitor>,
    events: Arc<EventBus>,
}

impl FallbackChain {
    pub fn new(registry: ProviderRegistry, health: Arc<HealthMonitor>, events: Arc<EventBus>) -> Self {
        for registered in registry.ordered() {
            health.register(&registered.id());
        }
        Self {
            registry,
            health,
            events,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Tries each viable provider in order; first success wins.
    ///
    /// Each call is bounded by `min(options.timeout, provider timeout)`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainExhausted`] listing every provider with the reason it was skipped
    /// or failed.
    pub async fn resolve(
        &self,
        query: &str,
        options: &BoundaryOptions,
    ) -> Result<BoundaryResult, ChainExhausted> {
        let mut attempts = Vec::with_capacity(self.registry.len());

        for registered in self.registry.ordered() {
            let provider_id = registered.id();

            if !self.health.is_available(&provider_id) {
                debug!(provider = %provider_id, "skipping provider with open circuit");
                attempts.push(ProviderAttempt {
                    provider_id,
                    failure: AttemptFailure::CircuitOpen,
                });
                continue;
            }

            if !registered.has_rate_budget() {
                debug!(provider = %provider_id, "skipping provider without rate budget");
                attempts.push(ProviderAttempt {
                    provider_id,
                    failure: AttemptFailure::RateLimited,
                });
                continue;
            }

            let timeout = options.timeout.min(registered.timeout);
            let call_options = options.clone().with_timeout(timeout);
            let outcome = tokio::time::timeout(
                timeout,
                registered.provider.call(query, &call_options),
            )
            .await
            .unwrap_or_else(|_| Err(AdapterError::timeout(duration_ms(timeout))))
            .and_then(|result| {
                result
                    .geometry
                    .validate()
                    .map(|()| result)
                    .map_err(AdapterError::invalid_response)
            });

            match outcome {
                Ok(result) => {
                    let transition = self.health.record_success(&provider_id);
                    self.announce(transition);
                    debug!(provider = %provider_id, name = %result.name, "provider resolved boundary");
                    return Ok(BoundaryResult::from_geocoding(result, provider_id));
                }
                Err(error) => {
                    warn!(provider = %provider_id, code = error.code(), error = %error.message(), "provider call failed");
                    let transition = self.health.record_failure(&provider_id);
                    self.announce(transition);
                    attempts.push(ProviderAttempt {
                        provider_id,
                        failure: AttemptFailure::Adapter { error },
                    });
                }
            }
        }

        Err(ChainExhausted { attempts })
    }

    fn announce(&self, transition: Option<HealthTransition>) {
        let event = match transition {
            None => return,
            Some(HealthTransition::Opened {
                provider_id,
                consecutive_failures,
                cool_down,
            }) => BoundaryEvent::ProviderDown {
                provider_id,
                consecutive_failures,
                cool_down_ms: duration_ms(cool_down),
            },
            Some(HealthTransition::Recovered { provider_id }) => {
                BoundaryEvent::ProviderRecovered { provider_id }
            }
        };
        self.events.publish(&event);
    }
}
