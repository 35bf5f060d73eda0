//! Market data aggregation from unreliable upstream sources.
//!
//! [`OracleService`] answers three questions for the dashboard: what does the
//! market look like right now ([`get_snapshot`](OracleService::get_snapshot)),
//! how did a protocol perform over a window
//! ([`get_historical_data`](OracleService::get_historical_data)), and how
//! healthy are the feeds ([`health_status`](OracleService::health_status)).
//!
//! Every upstream call runs behind a per-source circuit breaker, a
//! per-attempt timeout, and bounded retry with exponential backoff. Responses
//! are range- and freshness-validated; rejected values become recorded
//! discrepancies instead of corrupting aggregates. When upstreams fail the
//! oracle degrades: fresh cache, then the last known snapshot (stale), then a
//! deterministic zeroed fallback. A valid network id never produces an
//! error.
//!
//! ```text
//! get_snapshot(network)
//!       │
//!       ▼
//! ┌─────────────┐ fresh ┌──────────────────┐
//! │ cache check ├──────►│ tagged "cached"  │
//! └──────┬──────┘       └──────────────────┘
//!        │ miss
//!        ▼
//! ┌──────────────────────────────┐
//! │ concurrent fan-out           │  per source:
//! │  price / lending / dex / rpc │  breaker → timeout → retry+backoff
//! └──────┬───────────────────────┘
//!        ▼
//! ┌─────────────┐ some data ┌─────────────────────────┐
//! │  validation ├──────────►│ snapshot tagged "live"  │──► cache
//! └──────┬──────┘           └─────────────────────────┘
//!        │ none
//!        ▼
//!  last known snapshot ("cached", stale) or zeroed "fallback"
//! ```

pub mod circuit_breaker;
pub mod sources;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use sources::{HttpMarketSource, MarketSource, ProtocolObservation, SourceReport};
pub use types::{
    DataSource, Discrepancy, HistoricalSeries, HistoryPoint, HistoryWindow, MarketSnapshot,
    ProtocolEntry,
};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::VecDeque, sync::Arc, time::Duration};

use crate::{
    cache::CacheManager,
    config::{AppConfig, SourceKind},
    errors::{ErrorManager, ServiceError},
    validation::ValidationManager,
};

/// Rolling outcome window used for per-source health scores.
const HEALTH_WINDOW: usize = 50;

/// Oracle tuning knobs resolved from [`crate::config::OracleConfig`].
#[derive(Debug, Clone)]
pub struct OracleSettings {
    /// How long a cached snapshot stays fresh.
    pub freshness: Duration,
    /// Deadline for one whole snapshot fan-out.
    pub overall_deadline: Duration,
    /// Attempts per source call (first try + retries).
    pub max_attempts: u32,
    /// Base backoff delay, doubled per retry.
    pub backoff_base: Duration,
    /// Per-attempt time budget.
    pub attempt_timeout: Duration,
    /// Maximum age of an upstream observation before it is dropped as stale.
    pub max_observation_age: chrono::Duration,
    /// Protocols a complete snapshot is expected to list; missing ones are
    /// marked unavailable.
    pub expected_protocols: Vec<String>,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(300),
            overall_deadline: Duration::from_secs(10),
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(5),
            max_observation_age: chrono::Duration::seconds(600),
            expected_protocols: vec![
                "venus".to_string(),
                "beefy".to_string(),
                "pancakeswap".to_string(),
            ],
        }
    }
}

impl OracleSettings {
    /// Resolves settings from application configuration.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let attempt_timeout = config
            .oracle
            .sources
            .iter()
            .map(|s| s.timeout_seconds)
            .max()
            .unwrap_or(5);
        Self {
            freshness: config.freshness_window(),
            overall_deadline: config.overall_deadline(),
            max_attempts: config.oracle.max_attempts,
            backoff_base: Duration::from_millis(config.oracle.backoff_base_ms),
            attempt_timeout: Duration::from_secs(attempt_timeout),
            max_observation_age: chrono::Duration::seconds(
                i64::try_from(config.oracle.max_observation_age_seconds).unwrap_or(600),
            ),
            ..Self::default()
        }
    }
}

/// One source plus its guard rails and health bookkeeping.
struct SourceHandle {
    source: Arc<dyn MarketSource>,
    breaker: CircuitBreaker,
    /// Rolling window of recent call outcomes (true = success).
    outcomes: Mutex<VecDeque<bool>>,
}

impl SourceHandle {
    fn record_outcome(&self, ok: bool) {
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() == HEALTH_WINDOW {
            outcomes.pop_front();
        }
        outcomes.push_back(ok);
    }

    /// 0–100 score from the rolling success rate. A source with no recorded
    /// calls scores 100 (healthy until proven otherwise).
    fn health_score(&self) -> u8 {
        let outcomes = self.outcomes.lock();
        if outcomes.is_empty() {
            return 100;
        }
        let successes = outcomes.iter().filter(|ok| **ok).count();
        u8::try_from(successes * 100 / outcomes.len()).unwrap_or(100)
    }
}

/// Health report for one upstream source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub name: String,
    pub kind: &'static str,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    /// 0–100 from the rolling success rate.
    pub health_score: u8,
}

/// Aggregates market and protocol data from configured upstream sources.
///
/// Cheap to share behind an `Arc`; all interior state is concurrent.
pub struct OracleService {
    settings: OracleSettings,
    validation: Arc<ValidationManager>,
    errors: Arc<ErrorManager>,
    snapshots: CacheManager<MarketSnapshot>,
    history: CacheManager<HistoricalSeries>,
    handles: Vec<Arc<SourceHandle>>,
}

impl OracleService {
    /// Creates an oracle with no sources; add them with
    /// [`add_source`](Self::add_source).
    #[must_use]
    pub fn new(
        settings: OracleSettings,
        validation: Arc<ValidationManager>,
        errors: Arc<ErrorManager>,
    ) -> Self {
        Self {
            settings,
            validation,
            errors,
            snapshots: CacheManager::new(),
            history: CacheManager::new(),
            handles: Vec::new(),
        }
    }

    /// Builds an oracle with HTTP sources from application configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] if the shared HTTP client cannot be
    /// built.
    pub fn from_config(
        config: &AppConfig,
        validation: Arc<ValidationManager>,
        errors: Arc<ErrorManager>,
    ) -> Result<Self, ServiceError> {
        let client = sources::build_http_client()?;
        let mut oracle = Self::new(OracleSettings::from_config(config), validation, errors);

        for provider in &config.oracle.sources {
            let threshold = provider.circuit_breaker_threshold;
            let cooldown = Duration::from_secs(provider.circuit_breaker_cooldown_seconds);
            let source = Arc::new(HttpMarketSource::new(provider.clone(), client.clone()));
            oracle.add_source(source, threshold, cooldown);
        }

        Ok(oracle)
    }

    /// Registers a source with its circuit breaker parameters.
    pub fn add_source(
        &mut self,
        source: Arc<dyn MarketSource>,
        breaker_threshold: u32,
        breaker_cooldown: Duration,
    ) {
        self.handles.push(Arc::new(SourceHandle {
            source,
            breaker: CircuitBreaker::new(breaker_threshold, breaker_cooldown),
            outcomes: Mutex::new(VecDeque::with_capacity(HEALTH_WINDOW)),
        }));
    }

    /// Returns the current market snapshot for `network`.
    ///
    /// Serving order: fresh cache → live fan-out → last known snapshot
    /// (stale) → zeroed fallback. The returned snapshot's `data_source` tag
    /// says which one happened.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] for a network outside the
    /// allow-list. This is the only error path; upstream failures degrade
    /// instead of erroring.
    pub async fn get_snapshot(&self, network: &str) -> Result<MarketSnapshot, ServiceError> {
        if let Err(err) = self.validation.validate_network(network) {
            let service_err: ServiceError = err.into();
            self.errors.handle(
                &service_err,
                self.errors
                    .context("get_snapshot", "market/snapshot")
                    .with_metadata("network", network),
            );
            return Err(service_err);
        }

        let fresh_key = format!("snapshot:{network}");
        if let Some(snapshot) = self.snapshots.get(&fresh_key) {
            tracing::debug!(network, "snapshot served from cache");
            return Ok(snapshot.tagged(DataSource::Cached));
        }

        let outcomes = self.fan_out(network).await;
        let snapshot = self.assemble_snapshot(network, outcomes);

        match snapshot {
            Some(snapshot) => {
                self.snapshots.set(&fresh_key, snapshot.clone(), Some(self.settings.freshness));
                // Last-known copy never expires; it backs stale serving when
                // every source is down.
                self.snapshots.set(format!("snapshot:last:{network}"), snapshot.clone(), None);
                tracing::info!(
                    network,
                    protocols = snapshot.protocols.len(),
                    discrepancies = snapshot.discrepancies.len(),
                    "live snapshot assembled"
                );
                Ok(snapshot)
            }
            None => Ok(self.degraded_snapshot(network)),
        }
    }

    /// Returns the historical series for `protocol` over `window`.
    ///
    /// Same degradation ladder as [`get_snapshot`](Self::get_snapshot).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if `protocol` is empty.
    pub async fn get_historical_data(
        &self,
        protocol: &str,
        window: HistoryWindow,
    ) -> Result<HistoricalSeries, ServiceError> {
        if protocol.trim().is_empty() {
            let err = ServiceError::Validation("protocol is required".to_string());
            self.errors.handle(&err, self.errors.context("get_historical_data", "market/history"));
            return Err(err);
        }

        let fresh_key = format!("history:{protocol}:{}", window.as_str());
        if let Some(series) = self.history.get(&fresh_key) {
            tracing::debug!(protocol, window = window.as_str(), "history served from cache");
            let mut series = series;
            series.data_source = DataSource::Cached;
            return Ok(series);
        }

        for handle in &self.handles {
            if !matches!(handle.source.kind(), SourceKind::Lending | SourceKind::Dex) {
                continue;
            }

            match self.call_history_with_policy(handle, protocol, window).await {
                Ok(points) => {
                    let points = self.validate_history_points(handle.source.name(), points);
                    let series = HistoricalSeries {
                        protocol: protocol.to_string(),
                        window,
                        points,
                        data_source: DataSource::Live,
                        fetched_at: Utc::now(),
                    };
                    self.history.set(&fresh_key, series.clone(), Some(self.settings.freshness));
                    self.history.set(
                        format!("history:last:{protocol}:{}", window.as_str()),
                        series.clone(),
                        None,
                    );
                    return Ok(series);
                }
                Err(err) => {
                    tracing::warn!(
                        source = handle.source.name(),
                        protocol,
                        error = %err,
                        "history fetch failed, trying next source"
                    );
                }
            }
        }

        let last_key = format!("history:last:{protocol}:{}", window.as_str());
        if let Some(series) = self.history.get(&last_key) {
            tracing::warn!(protocol, "serving stale history, all sources failed");
            let mut series = series;
            series.data_source = DataSource::Cached;
            return Ok(series);
        }

        tracing::warn!(protocol, "serving fallback history, nothing cached");
        Ok(HistoricalSeries::fallback(protocol, window))
    }

    /// Per-source circuit state and rolling health scores.
    #[must_use]
    pub fn health_status(&self) -> Vec<SourceHealth> {
        self.handles
            .iter()
            .map(|handle| SourceHealth {
                name: handle.source.name().to_string(),
                kind: handle.source.kind().as_str(),
                circuit_state: handle.breaker.state(),
                consecutive_failures: handle.breaker.consecutive_failures(),
                health_score: handle.health_score(),
            })
            .collect()
    }

    /// Snapshot cache statistics (for the runtime's observability surface).
    #[must_use]
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.snapshots.stats()
    }

    // --- Fan-out & assembly ---

    /// Runs the concurrent fan-out under the overall deadline.
    ///
    /// Sources that miss the deadline are dropped (their futures are
    /// cancelled with the stream), so abandoned calls cannot pile up.
    async fn fan_out(&self, network: &str) -> Vec<(Arc<SourceHandle>, SourceReport)> {
        let mut in_flight: FuturesUnordered<_> = self
            .handles
            .iter()
            .map(|handle| {
                let handle = Arc::clone(handle);
                let network = network.to_string();
                async move {
                    let result = self.call_source_with_policy(&handle, &network).await;
                    (handle, result)
                }
            })
            .collect();

        let deadline = tokio::time::sleep(self.settings.overall_deadline);
        tokio::pin!(deadline);

        let mut successes = Vec::new();
        loop {
            tokio::select! {
                next = in_flight.next() => match next {
                    Some((handle, Ok(report))) => successes.push((handle, report)),
                    Some((handle, Err(err))) => {
                        self.errors.handle(
                            &err,
                            self.errors
                                .context("get_snapshot", "market/snapshot")
                                .with_metadata("source", handle.source.name())
                                .with_metadata("network", network),
                        );
                    }
                    None => break,
                },
                () = &mut deadline => {
                    tracing::warn!(
                        network,
                        pending = in_flight.len(),
                        "snapshot fan-out hit overall deadline, using partial data"
                    );
                    break;
                }
            }
        }

        successes
    }

    /// One source call: breaker admission, per-attempt timeout, bounded
    /// retry with exponential backoff. Only transient errors retry.
    async fn call_source_with_policy(
        &self,
        handle: &SourceHandle,
        network: &str,
    ) -> Result<SourceReport, ServiceError> {
        let mut last_error = None;

        for attempt in 1..=self.settings.max_attempts {
            if !handle.breaker.try_acquire() {
                return Err(ServiceError::CircuitOpen(handle.source.name().to_string()));
            }

            let result = tokio::time::timeout(
                self.settings.attempt_timeout,
                handle.source.fetch(network),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::Timeout(format!(
                    "source {} attempt timed out",
                    handle.source.name()
                )))
            });

            match result {
                Ok(report) => {
                    handle.breaker.record_success();
                    handle.record_outcome(true);
                    return Ok(report);
                }
                Err(err) => {
                    handle.breaker.record_failure();
                    handle.record_outcome(false);
                    let transient = err.is_transient();
                    tracing::warn!(
                        source = handle.source.name(),
                        attempt,
                        error = %err,
                        "source call failed"
                    );
                    last_error = Some(err);
                    if !transient || attempt == self.settings.max_attempts {
                        break;
                    }
                    let delay = self.settings.backoff_base * 2u32.saturating_pow(attempt - 1);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ServiceError::Internal("no attempts executed".to_string())))
    }

    /// Same retry policy as [`call_source_with_policy`] for history endpoints.
    async fn call_history_with_policy(
        &self,
        handle: &SourceHandle,
        protocol: &str,
        window: HistoryWindow,
    ) -> Result<Vec<HistoryPoint>, ServiceError> {
        let mut last_error = None;

        for attempt in 1..=self.settings.max_attempts {
            if !handle.breaker.try_acquire() {
                return Err(ServiceError::CircuitOpen(handle.source.name().to_string()));
            }

            let result = tokio::time::timeout(
                self.settings.attempt_timeout,
                handle.source.fetch_history(protocol, window),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::Timeout(format!(
                    "source {} attempt timed out",
                    handle.source.name()
                )))
            });

            match result {
                Ok(points) => {
                    handle.breaker.record_success();
                    handle.record_outcome(true);
                    return Ok(points);
                }
                Err(err) => {
                    handle.breaker.record_failure();
                    handle.record_outcome(false);
                    let transient = err.is_transient();
                    last_error = Some(err);
                    if !transient || attempt == self.settings.max_attempts {
                        break;
                    }
                    let delay = self.settings.backoff_base * 2u32.saturating_pow(attempt - 1);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ServiceError::Internal("no attempts executed".to_string())))
    }

    /// Validates reports and assembles a live snapshot.
    ///
    /// Returns `None` when no source produced a usable report (the degraded
    /// path takes over).
    fn assemble_snapshot(
        &self,
        network: &str,
        outcomes: Vec<(Arc<SourceHandle>, SourceReport)>,
    ) -> Option<MarketSnapshot> {
        if outcomes.is_empty() {
            return None;
        }

        let now = Utc::now();
        let mut discrepancies = Vec::new();
        let mut prices = Vec::new();
        let mut entries: Vec<ProtocolEntry> = Vec::new();

        for (handle, report) in &outcomes {
            let source_name = handle.source.name();

            if let Some(price) = report.spot_price {
                if types::bounds::spot_price_in_range(price) {
                    prices.push(price);
                } else {
                    discrepancies.push(Discrepancy {
                        source: source_name.to_string(),
                        field: "spot_price".to_string(),
                        reason: format!("out of range: {price}"),
                    });
                }
            }

            for observation in &report.protocols {
                let mut reasons = Vec::new();
                if !types::bounds::apy_in_range(observation.apy) {
                    reasons.push(("apy", format!("out of range: {}", observation.apy)));
                }
                if !types::bounds::tvl_in_range(observation.tvl) {
                    reasons.push(("tvl", format!("out of range: {}", observation.tvl)));
                }
                if !types::bounds::health_in_range(observation.health) {
                    reasons.push(("health", format!("out of range: {}", observation.health)));
                }
                if now - observation.observed_at > self.settings.max_observation_age {
                    reasons.push((
                        "last_updated",
                        format!("stale observation from {}", observation.observed_at),
                    ));
                }

                if reasons.is_empty() {
                    entries.push(ProtocolEntry {
                        name: observation.name.clone(),
                        apy: observation.apy,
                        tvl: observation.tvl,
                        health: observation.health,
                        source: source_name.to_string(),
                        last_updated: observation.observed_at,
                        available: true,
                    });
                } else {
                    // Dropped, not aggregated; the protocol shows up as
                    // unavailable below.
                    for (field, reason) in reasons {
                        discrepancies.push(Discrepancy {
                            source: source_name.to_string(),
                            field: field.to_string(),
                            reason,
                        });
                    }
                }
            }
        }

        // A snapshot with no price and no protocol rows is not usable data.
        if prices.is_empty() && entries.is_empty() {
            return None;
        }

        // Expected protocols that no validated entry covers are listed as
        // unavailable rather than silently omitted.
        for expected in &self.settings.expected_protocols {
            if !entries.iter().any(|entry| entry.name == *expected) {
                entries.push(ProtocolEntry::unavailable(expected.clone(), "aggregate"));
            }
        }

        let available: Vec<&ProtocolEntry> = entries.iter().filter(|e| e.available).collect();
        let average_apy = if available.is_empty() {
            0.0
        } else {
            available.iter().map(|e| e.apy).sum::<f64>() / available.len() as f64
        };
        let total_tvl = available.iter().map(|e| e.tvl).sum::<f64>();
        let spot_price = if prices.is_empty() {
            0.0
        } else {
            prices.iter().sum::<f64>() / prices.len() as f64
        };

        Some(MarketSnapshot {
            network: network.to_string(),
            spot_price,
            protocols: entries,
            average_apy,
            total_tvl,
            data_source: DataSource::Live,
            fetched_at: now,
            discrepancies,
        })
    }

    /// Degraded serving: last known snapshot (stale) or zeroed fallback.
    fn degraded_snapshot(&self, network: &str) -> MarketSnapshot {
        if let Some(stale) = self.snapshots.get(&format!("snapshot:last:{network}")) {
            tracing::warn!(network, "serving stale snapshot, all sources failed");
            return stale.tagged(DataSource::Cached);
        }

        tracing::warn!(network, "serving fallback snapshot, nothing cached");
        let expected: Vec<&str> =
            self.settings.expected_protocols.iter().map(String::as_str).collect();
        MarketSnapshot::fallback(network, &expected)
    }

    fn validate_history_points(
        &self,
        source_name: &str,
        points: Vec<HistoryPoint>,
    ) -> Vec<HistoryPoint> {
        let before = points.len();
        let points: Vec<HistoryPoint> = points
            .into_iter()
            .filter(|p| types::bounds::apy_in_range(p.apy) && types::bounds::tvl_in_range(p.tvl))
            .collect();
        if points.len() < before {
            tracing::warn!(
                source = source_name,
                dropped = before - points.len(),
                "dropped out-of-range history points"
            );
        }
        points
    }
}
