//! Per-provider health tracking and circuit breaking.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::HealthConfig;
use crate::domain::UtcDateTime;
use crate::error::duration_ms;
use crate::provider::ProviderId;

/// Circuit state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Cool-down elapsed; the next call is a trial.
    HalfOpen,
}

/// Read-only health record of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider_id: ProviderId,
    pub consecutive_failures: u32,
    pub state: CircuitState,
    pub opened_at: Option<UtcDateTime>,
    pub cool_down_ms: u64,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Circuit transition worth announcing on the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTransition {
    Opened {
        provider_id: ProviderId,
        consecutive_failures: u32,
        cool_down: Duration,
    },
    Recovered {
        provider_id: ProviderId,
    },
}

#[derive(Debug)]
struct HealthRecord {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_wall: Option<UtcDateTime>,
    cool_down: Duration,
    total_successes: u64,
    total_failures: u64,
}

impl HealthRecord {
    fn new(cool_down: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            opened_wall: None,
            cool_down,
            total_successes: 0,
            total_failures: 0,
        }
    }

    /// Open circuits whose cool-down elapsed become half-open.
    fn refresh(&mut self, now: Instant) {
        if self.state != CircuitState::Open {
            return;
        }
        let elapsed = self
            .opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at) >= self.cool_down)
            .unwrap_or(true);
        if elapsed {
            self.state = CircuitState::HalfOpen;
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.opened_wall = Some(UtcDateTime::now());
    }

    fn snapshot(&self, provider_id: &ProviderId) -> ProviderHealth {
        ProviderHealth {
            provider_id: provider_id.clone(),
            consecutive_failures: self.consecutive_failures,
            state: self.state,
            opened_at: if self.state == CircuitState::Closed {
                None
            } else {
                self.opened_wall
            },
            cool_down_ms: duration_ms(self.cool_down),
            total_successes: self.total_successes,
            total_failures: self.total_failures,
        }
    }
}

/// Thread-safe health monitor shared by the fallback chain and the façade.
///
/// ```text
/// closed --(failureThreshold failures)--> open --(coolDown elapsed)--> half-open
/// half-open --(success)--> closed (cool-down reset)
/// half-open --(failure)--> open (cool-down doubled, capped)
/// ```
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    records: Mutex<BTreeMap<ProviderId, HealthRecord>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Starts tracking `provider_id` with a closed circuit. Idempotent.
    pub fn register(&self, provider_id: &ProviderId) {
        let cool_down = self.config.cool_down();
        self.records
            .lock()
            .expect("health records lock is not poisoned")
            .entry(provider_id.clone())
            .or_insert_with(|| HealthRecord::new(cool_down));
    }

    /// False only while the circuit is open and its cool-down has not elapsed.
    pub fn is_available(&self, provider_id: &ProviderId) -> bool {
        let now = Instant::now();
        let mut records = self
            .records
            .lock()
            .expect("health records lock is not poisoned");
        let cool_down = self.config.cool_down();
        let record = records
            .entry(provider_id.clone())
            .or_insert_with(|| HealthRecord::new(cool_down));
        record.refresh(now);
        record.state != CircuitState::Open
    }

    pub fn record_success(&self, provider_id: &ProviderId) -> Option<HealthTransition> {
        let mut records = self
            .records
            .lock()
            .expect("health records lock is not poisoned");
        let cool_down = self.config.cool_down();
        let record = records
            .entry(provider_id.clone())
            .or_insert_with(|| HealthRecord::new(cool_down));

        let was = record.state;
        record.total_successes = record.total_successes.saturating_add(1);
        record.consecutive_failures = 0;
        record.state = CircuitState::Closed;
        record.opened_at = None;
        record.opened_wall = None;

        if was == CircuitState::Closed {
            return None;
        }
        record.cool_down = cool_down;
        info!(provider = %provider_id, "provider circuit closed after successful trial call");
        Some(HealthTransition::Recovered {
            provider_id: provider_id.clone(),
        })
    }

    pub fn record_failure(&self, provider_id: &ProviderId) -> Option<HealthTransition> {
        let now = Instant::now();
        let mut records = self
            .records
            .lock()
            .expect("health records lock is not poisoned");
        let cool_down = self.config.cool_down();
        let record = records
            .entry(provider_id.clone())
            .or_insert_with(|| HealthRecord::new(cool_down));

        record.refresh(now);
        record.total_failures = record.total_failures.saturating_add(1);
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);

        match record.state {
            CircuitState::HalfOpen => {
                record.cool_down = record
                    .cool_down
                    .saturating_mul(2)
                    .min(self.config.max_cool_down().max(cool_down));
                record.open(now);
            }
            CircuitState::Closed
                if record.consecutive_failures >= self.config.failure_threshold =>
            {
                record.open(now);
            }
            // already open: a late result from a call started before the circuit opened
            CircuitState::Open | CircuitState::Closed => return None,
        }

        warn!(
            provider = %provider_id,
            consecutive_failures = record.consecutive_failures,
            cool_down_ms = duration_ms(record.cool_down),
            "provider circuit opened"
        );
        Some(HealthTransition::Opened {
            provider_id: provider_id.clone(),
            consecutive_failures: record.consecutive_failures,
            cool_down: record.cool_down,
        })
    }

    pub fn provider(&self, provider_id: &ProviderId) -> Option<ProviderHealth> {
        let now = Instant::now();
        let mut records = self
            .records
            .lock()
            .expect("health records lock is not poisoned");
        records.get_mut(provider_id).map(|record| {
            record.refresh(now);
            record.snapshot(provider_id)
        })
    }

    /// Snapshot of every tracked provider, ordered by id.
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let now = Instant::now();
        let mut records = self
            .records
            .lock()
            .expect("health records lock is not poisoned");
        records
            .iter_mut()
            .map(|(provider_id, record)| {
                record.refresh(now);
                record.snapshot(provider_id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(threshold: u32, cool_down_ms: u64, max_cool_down_ms: u64) -> HealthMonitor {
        HealthMonitor::new(HealthConfig {
            failure_threshold: threshold,
            cool_down_ms,
            max_cool_down_ms,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let monitor = monitor(2, 10_000, 60_000);
        let osm = ProviderId::new("osm");
        monitor.register(&osm);

        assert_eq!(monitor.record_failure(&osm), None);
        assert!(monitor.is_available(&osm));
        let transition = monitor.record_failure(&osm);

        assert!(matches!(
            transition,
            Some(HealthTransition::Opened { consecutive_failures: 2, .. })
        ));
        assert!(!monitor.is_available(&osm));
        let health = monitor.provider(&osm).expect("tracked");
        assert_eq!(health.state, CircuitState::Open);
        assert!(health.opened_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn success_in_closed_resets_consecutive_failures() {
        let monitor = monitor(3, 10_000, 60_000);
        let osm = ProviderId::new("osm");

        monitor.record_failure(&osm);
        monitor.record_failure(&osm);
        assert_eq!(monitor.record_success(&osm), None);

        let health = monitor.provider(&osm).expect("tracked");
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.total_failures, 2);
        assert_eq!(health.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_success_closes_and_resets_cool_down() {
        let monitor = monitor(1, 1_000, 60_000);
        let osm = ProviderId::new("osm");

        monitor.record_failure(&osm);
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!monitor.is_available(&osm));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(monitor.is_available(&osm));
        assert_eq!(
            monitor.provider(&osm).expect("tracked").state,
            CircuitState::HalfOpen
        );

        let transition = monitor.record_success(&osm);

        assert_eq!(
            transition,
            Some(HealthTransition::Recovered {
                provider_id: osm.clone()
            })
        );
        let health = monitor.provider(&osm).expect("tracked");
        assert_eq!(health.state, CircuitState::Closed);
        assert_eq!(health.cool_down_ms, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_failure_doubles_cool_down_up_to_cap() {
        let monitor = monitor(1, 1_000, 3_000);
        let osm = ProviderId::new("osm");
        monitor.record_failure(&osm);

        let mut observed = Vec::new();
        for _ in 0..3 {
            let cool_down = monitor.provider(&osm).expect("tracked").cool_down_ms;
            tokio::time::advance(Duration::from_millis(cool_down)).await;
            assert!(monitor.is_available(&osm));
            monitor.record_failure(&osm);
            observed.push(monitor.provider(&osm).expect("tracked").cool_down_ms);
        }

        assert_eq!(observed, vec![2_000, 3_000, 3_000]);
        assert!(!monitor.is_available(&osm));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_elapsed_open_circuit_as_half_open() {
        let monitor = monitor(1, 500, 5_000);
        let osm = ProviderId::new("osm");
        let nominatim = ProviderId::new("nominatim");
        monitor.register(&nominatim);
        monitor.record_failure(&osm);

        tokio::time::advance(Duration::from_millis(600)).await;
        let snapshot = monitor.snapshot();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].provider_id, nominatim);
        assert_eq!(snapshot[0].state, CircuitState::Closed);
        assert_eq!(snapshot[1].state, CircuitState::HalfOpen);
    }
}
