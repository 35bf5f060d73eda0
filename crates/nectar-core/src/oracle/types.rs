//! Market data types shared between the oracle, its sources, and the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Where the data in a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Fresh aggregate assembled from upstream responses on this call.
    Live,
    /// Served from the snapshot cache (fresh or stale).
    Cached,
    /// Deterministic zeroed data; every upstream failed and nothing was cached.
    Fallback,
}

impl DataSource {
    /// Static label for logging and response tagging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Cached => "cached",
            DataSource::Fallback => "fallback",
        }
    }
}

/// Enumerated time-series windows for historical queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryWindow {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl HistoryWindow {
    /// Wire label used in query strings and cache keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryWindow::Day => "24h",
            HistoryWindow::Week => "7d",
            HistoryWindow::Month => "30d",
        }
    }

    /// Parses a wire label.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] for anything outside `24h`/`7d`/`30d`.
    pub fn parse(input: &str) -> Result<Self, ServiceError> {
        match input {
            "24h" => Ok(HistoryWindow::Day),
            "7d" => Ok(HistoryWindow::Week),
            "30d" => Ok(HistoryWindow::Month),
            other => Err(ServiceError::Validation(format!(
                "unsupported history window: {other} (expected 24h, 7d, or 30d)"
            ))),
        }
    }
}

/// One validated protocol row in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEntry {
    /// Protocol name (e.g. "venus", "beefy", "pancakeswap").
    pub name: String,
    /// Supply APY in percent.
    pub apy: f64,
    /// Total value locked in USD.
    pub tvl: f64,
    /// Source-reported health factor in `[0, 1]`.
    pub health: f64,
    /// Name of the upstream source that reported this entry.
    pub source: String,
    pub last_updated: DateTime<Utc>,
    /// `false` when the feed for this protocol failed and the row carries no
    /// usable numbers. Unavailable protocols are listed, not silently omitted.
    pub available: bool,
}

impl ProtocolEntry {
    /// Marks a protocol as present-but-unavailable in a snapshot.
    #[must_use]
    pub fn unavailable(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            apy: 0.0,
            tvl: 0.0,
            health: 0.0,
            source: source.into(),
            last_updated: Utc::now(),
            available: false,
        }
    }
}

/// A per-field mismatch or out-of-range value detected while validating
/// upstream data. Discrepancies are recorded on the snapshot instead of
/// corrupting the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Reporting source.
    pub source: String,
    /// Field that failed validation (e.g. `"apy"`, `"spot_price"`).
    pub field: String,
    pub reason: String,
}

/// Point-in-time aggregate of market and protocol data for one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub network: String,
    /// Native token spot price in USD. `0.0` in fallback snapshots.
    pub spot_price: f64,
    pub protocols: Vec<ProtocolEntry>,
    /// Mean APY over available, validated protocol entries.
    pub average_apy: f64,
    /// Sum of TVL over available, validated protocol entries.
    pub total_tvl: f64,
    pub data_source: DataSource,
    pub fetched_at: DateTime<Utc>,
    /// Validation failures observed while assembling this snapshot.
    pub discrepancies: Vec<Discrepancy>,
}

impl MarketSnapshot {
    /// Deterministic zeroed snapshot for a network whose every source failed.
    ///
    /// Lists the expected protocols as unavailable so consumers see the full
    /// roster rather than an empty list.
    #[must_use]
    pub fn fallback(network: &str, expected_protocols: &[&str]) -> Self {
        Self {
            network: network.to_string(),
            spot_price: 0.0,
            protocols: expected_protocols
                .iter()
                .map(|name| ProtocolEntry::unavailable(*name, "fallback"))
                .collect(),
            average_apy: 0.0,
            total_tvl: 0.0,
            data_source: DataSource::Fallback,
            fetched_at: Utc::now(),
            discrepancies: Vec::new(),
        }
    }

    /// Re-tags a snapshot (used when serving a cached copy).
    #[must_use]
    pub fn tagged(mut self, data_source: DataSource) -> Self {
        self.data_source = data_source;
        self
    }
}

/// One point of a historical series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    /// APY in percent at this point.
    pub apy: f64,
    /// TVL in USD at this point.
    pub tvl: f64,
}

/// Time series for one protocol over an enumerated window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalSeries {
    pub protocol: String,
    pub window: HistoryWindow,
    pub points: Vec<HistoryPoint>,
    pub data_source: DataSource,
    pub fetched_at: DateTime<Utc>,
}

impl HistoricalSeries {
    /// Empty fallback series for a protocol whose history endpoint failed.
    #[must_use]
    pub fn fallback(protocol: &str, window: HistoryWindow) -> Self {
        Self {
            protocol: protocol.to_string(),
            window,
            points: Vec::new(),
            data_source: DataSource::Fallback,
            fetched_at: Utc::now(),
        }
    }
}

/// Declared numeric ranges for upstream observations.
///
/// Values outside these bounds are dropped and recorded as discrepancies.
pub mod bounds {
    /// Exclusive upper bound on a plausible spot price in USD.
    pub const MAX_SPOT_PRICE: f64 = 1_000_000_000.0;
    /// Inclusive upper bound on a plausible APY in percent.
    pub const MAX_APY: f64 = 1_000.0;

    /// Spot price must be positive and below [`MAX_SPOT_PRICE`].
    #[must_use]
    pub fn spot_price_in_range(price: f64) -> bool {
        price.is_finite() && price > 0.0 && price < MAX_SPOT_PRICE
    }

    /// APY must be non-negative and at most [`MAX_APY`] percent.
    #[must_use]
    pub fn apy_in_range(apy: f64) -> bool {
        apy.is_finite() && (0.0..=MAX_APY).contains(&apy)
    }

    /// TVL must be non-negative.
    #[must_use]
    pub fn tvl_in_range(tvl: f64) -> bool {
        tvl.is_finite() && tvl >= 0.0
    }

    /// Health factor must sit in `[0, 1]`.
    #[must_use]
    pub fn health_in_range(health: f64) -> bool {
        health.is_finite() && (0.0..=1.0).contains(&health)
    }
}
