//! Scripted market data sources with call counters.
//!
//! [`MockSource`] lets tests control exactly what each upstream returns, call
//! by call, and assert how often the oracle actually reached it: the basis
//! for cache-hit and circuit-breaker short-circuit assertions.

use async_trait::async_trait;
use chrono::Utc;
use nectar_core::{
    config::SourceKind,
    errors::ServiceError,
    oracle::{HistoryPoint, MarketSource, ProtocolObservation, SourceReport},
};
use std::{
    sync::atomic::{AtomicU32, Ordering},
    sync::Arc,
    time::Duration,
};

/// What a [`MockSource`] does when called.
#[derive(Clone)]
pub enum MockBehavior {
    /// Always return a spot price.
    Price(f64),
    /// Always return one protocol pool row.
    Pool { protocol: String, apy: f64, tvl: f64 },
    /// Always fail with a transient network error.
    NetworkError,
    /// Fail with a network error for the first `n` calls, then succeed with
    /// the given price.
    FailFirst { n: u32, then_price: f64 },
    /// Sleep for the duration, then return a price (for deadline tests).
    Slow { delay: Duration, price: f64 },
}

/// Scripted [`MarketSource`] with an atomic call counter.
pub struct MockSource {
    name: String,
    kind: SourceKind,
    behavior: MockBehavior,
    calls: AtomicU32,
    history_points: Vec<HistoryPoint>,
}

impl MockSource {
    pub fn new(name: &str, kind: SourceKind, behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            behavior,
            calls: AtomicU32::new(0),
            history_points: Vec::new(),
        })
    }

    /// A lending source that also serves the given history points.
    pub fn with_history(
        name: &str,
        behavior: MockBehavior,
        history_points: Vec<HistoryPoint>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind: SourceKind::Lending,
            behavior,
            calls: AtomicU32::new(0),
            history_points,
        })
    }

    /// Number of `fetch`/`fetch_history` calls that reached this source.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, _network: &str) -> Result<SourceReport, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        match &self.behavior {
            MockBehavior::Price(price) => {
                Ok(SourceReport { spot_price: Some(*price), protocols: Vec::new() })
            }
            MockBehavior::Pool { protocol, apy, tvl } => Ok(SourceReport {
                spot_price: None,
                protocols: vec![ProtocolObservation {
                    name: protocol.clone(),
                    apy: *apy,
                    tvl: *tvl,
                    health: 0.99,
                    observed_at: Utc::now(),
                }],
            }),
            MockBehavior::NetworkError => {
                Err(ServiceError::Network(format!("{} unreachable", self.name)))
            }
            MockBehavior::FailFirst { n, then_price } => {
                if call <= *n {
                    Err(ServiceError::Network(format!("{} flaking", self.name)))
                } else {
                    Ok(SourceReport { spot_price: Some(*then_price), protocols: Vec::new() })
                }
            }
            MockBehavior::Slow { delay, price } => {
                tokio::time::sleep(*delay).await;
                Ok(SourceReport { spot_price: Some(*price), protocols: Vec::new() })
            }
        }
    }

    async fn fetch_history(
        &self,
        _protocol: &str,
        _window: nectar_core::oracle::HistoryWindow,
    ) -> Result<Vec<HistoryPoint>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.history_points.is_empty() {
            return Err(ServiceError::NotFound(format!("{} does not serve history", self.name)));
        }
        Ok(self.history_points.clone())
    }
}
