//! Upstream market data sources.
//!
//! [`MarketSource`] is the seam between the oracle and the outside world:
//! the aggregation logic only sees the trait, so tests substitute scripted
//! sources and production wires [`HttpMarketSource`] instances built from
//! configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::types::{HistoryPoint, HistoryWindow};
use crate::{
    config::{SourceKind, SourceProvider},
    errors::ServiceError,
};

/// One protocol row as reported by a source, before validation.
#[derive(Debug, Clone)]
pub struct ProtocolObservation {
    pub name: String,
    /// APY in percent.
    pub apy: f64,
    /// TVL in USD.
    pub tvl: f64,
    /// Health factor in `[0, 1]`.
    pub health: f64,
    pub observed_at: DateTime<Utc>,
}

/// Everything one source reported for one network, before validation.
///
/// Price feeds fill `spot_price`, lending/DEX feeds fill `protocols`, chain
/// RPC sources fill neither (they contribute liveness only).
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub spot_price: Option<f64>,
    pub protocols: Vec<ProtocolObservation>,
}

/// An upstream market data source.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Source identifier used in logs, health reports, and protocol rows.
    fn name(&self) -> &str;

    /// Data category this source serves.
    fn kind(&self) -> SourceKind;

    /// Fetches the source's current observation for `network`.
    ///
    /// One attempt, bounded by the source's own timeout; retry and circuit
    /// breaking happen in the oracle.
    async fn fetch(&self, network: &str) -> Result<SourceReport, ServiceError>;

    /// Fetches a time series for `protocol` over `window`.
    ///
    /// Sources that don't serve history return [`ServiceError::NotFound`].
    async fn fetch_history(
        &self,
        protocol: &str,
        window: HistoryWindow,
    ) -> Result<Vec<HistoryPoint>, ServiceError> {
        let _ = (protocol, window);
        Err(ServiceError::NotFound(format!("{} does not serve history", self.name())))
    }
}

/// Builds the shared HTTP client used by all [`HttpMarketSource`]s.
///
/// # Errors
///
/// Returns [`ServiceError::Internal`] if the underlying client fails to build.
pub fn build_http_client() -> Result<Client, ServiceError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .pool_idle_timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::none())
        .user_agent("nectar-oracle/0.3")
        .build()
        .map_err(|e| ServiceError::Internal(format!("HTTP client build failed: {e}")))
}

/// HTTP-backed market data source configured from a [`SourceProvider`].
pub struct HttpMarketSource {
    provider: SourceProvider,
    client: Client,
}

impl HttpMarketSource {
    #[must_use]
    pub fn new(provider: SourceProvider, client: Client) -> Self {
        Self { provider, client }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_seconds)
    }

    async fn get_json(&self, url: &str) -> Result<Value, ServiceError> {
        let response = self.client.get(url).timeout(self.timeout()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Network(format!(
                "source {} returned status {}",
                self.provider.name,
                status.as_u16()
            )));
        }

        Ok(response.json().await?)
    }

    fn parse_price(&self, body: &Value) -> Result<SourceReport, ServiceError> {
        let price = body
            .get("price")
            .and_then(Value::as_f64)
            .ok_or_else(|| self.malformed("missing numeric price field"))?;
        Ok(SourceReport { spot_price: Some(price), protocols: Vec::new() })
    }

    fn parse_pools(&self, body: &Value) -> Result<SourceReport, ServiceError> {
        let pools = body
            .get("pools")
            .and_then(Value::as_array)
            .ok_or_else(|| self.malformed("missing pools array"))?;

        let mut protocols = Vec::with_capacity(pools.len());
        for pool in pools {
            let name = pool
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| self.malformed("pool without a name"))?;
            let apy = pool
                .get("apy")
                .and_then(Value::as_f64)
                .ok_or_else(|| self.malformed("pool without numeric apy"))?;
            let tvl = pool
                .get("tvl")
                .and_then(Value::as_f64)
                .ok_or_else(|| self.malformed("pool without numeric tvl"))?;
            let health = pool.get("health").and_then(Value::as_f64).unwrap_or(1.0);
            let observed_at = pool
                .get("updated_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

            protocols.push(ProtocolObservation {
                name: name.to_string(),
                apy,
                tvl,
                health,
                observed_at,
            });
        }

        Ok(SourceReport { spot_price: None, protocols })
    }

    async fn fetch_rpc_liveness(&self) -> Result<SourceReport, ServiceError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1,
        });

        let response = self
            .client
            .post(&self.provider.url)
            .timeout(self.timeout())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Network(format!(
                "source {} returned status {}",
                self.provider.name,
                status.as_u16()
            )));
        }

        let body: Value = response.json().await?;
        let block_hex = body
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| self.malformed("missing block number result"))?;
        u64::from_str_radix(block_hex.trim_start_matches("0x"), 16)
            .map_err(|_| self.malformed("non-hex block number"))?;

        // Liveness only; nothing to contribute to the aggregate.
        Ok(SourceReport::default())
    }

    fn malformed(&self, detail: &str) -> ServiceError {
        ServiceError::Network(format!(
            "malformed response from source {}: {detail}",
            self.provider.name
        ))
    }
}

#[async_trait]
impl MarketSource for HttpMarketSource {
    fn name(&self) -> &str {
        &self.provider.name
    }

    fn kind(&self) -> SourceKind {
        self.provider.kind
    }

    async fn fetch(&self, network: &str) -> Result<SourceReport, ServiceError> {
        match self.provider.kind {
            SourceKind::Rpc => self.fetch_rpc_liveness().await,
            kind => {
                let separator = if self.provider.url.contains('?') { '&' } else { '?' };
                let url = format!("{}{}network={}", self.provider.url, separator, network);
                let body = self.get_json(&url).await?;
                match kind {
                    SourceKind::Price => self.parse_price(&body),
                    SourceKind::Lending | SourceKind::Dex => self.parse_pools(&body),
                    SourceKind::Rpc => unreachable!("handled above"),
                }
            }
        }
    }

    async fn fetch_history(
        &self,
        protocol: &str,
        window: HistoryWindow,
    ) -> Result<Vec<HistoryPoint>, ServiceError> {
        if !matches!(self.provider.kind, SourceKind::Lending | SourceKind::Dex) {
            return Err(ServiceError::NotFound(format!(
                "{} does not serve history",
                self.provider.name
            )));
        }

        let separator = if self.provider.url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}protocol={}&window={}",
            self.provider.url,
            separator,
            protocol,
            window.as_str()
        );
        let body = self.get_json(&url).await?;

        let raw_points = body
            .get("points")
            .and_then(Value::as_array)
            .ok_or_else(|| self.malformed("missing points array"))?;

        let mut points = Vec::with_capacity(raw_points.len());
        for point in raw_points {
            let timestamp = point
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| self.malformed("point without rfc3339 timestamp"))?;
            let apy = point
                .get("apy")
                .and_then(Value::as_f64)
                .ok_or_else(|| self.malformed("point without numeric apy"))?;
            let tvl = point.get("tvl").and_then(Value::as_f64).unwrap_or(0.0);

            points.push(HistoryPoint { timestamp, apy, tvl });
        }

        Ok(points)
    }
}
