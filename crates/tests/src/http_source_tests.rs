//! `HttpMarketSource` against an in-process mock HTTP server.

use mockito::Matcher;
use nectar_core::{
    config::{SourceKind, SourceProvider},
    errors::ServiceError,
    oracle::{sources::build_http_client, HistoryWindow, HttpMarketSource, MarketSource},
};
use serde_json::json;

fn provider(name: &str, kind: SourceKind, url: String) -> SourceProvider {
    SourceProvider {
        name: name.to_string(),
        kind,
        url,
        timeout_seconds: 5,
        circuit_breaker_threshold: 3,
        circuit_breaker_cooldown_seconds: 30,
    }
}

fn source(name: &str, kind: SourceKind, url: String) -> HttpMarketSource {
    HttpMarketSource::new(provider(name, kind, url), build_http_client().unwrap())
}

#[tokio::test]
async fn price_feed_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/price")
        .match_query(Matcher::UrlEncoded("network".into(), "bsc".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "price": 308.42 }).to_string())
        .create_async()
        .await;

    let source = source("bnb-price", SourceKind::Price, format!("{}/price", server.url()));
    let report = source.fetch("bsc").await.unwrap();

    assert_eq!(report.spot_price, Some(308.42));
    assert!(report.protocols.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn lending_feed_parses_pools() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/pools")
        .match_query(Matcher::UrlEncoded("network".into(), "bscTestnet".into()))
        .with_status(200)
        .with_body(
            json!({
                "pools": [
                    { "name": "venus", "apy": 8.5, "tvl": 1_500_000.0, "health": 0.97 },
                    { "name": "beefy", "apy": 12.1, "tvl": 320_000.0 },
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let source =
        source("venus-lending", SourceKind::Lending, format!("{}/pools", server.url()));
    let report = source.fetch("bscTestnet").await.unwrap();

    assert_eq!(report.protocols.len(), 2);
    assert_eq!(report.protocols[0].name, "venus");
    assert_eq!(report.protocols[1].health, 1.0);
}

#[tokio::test]
async fn server_error_maps_to_network_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/pools")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let source = source("flaky", SourceKind::Lending, format!("{}/pools", server.url()));
    let err = source.fetch("bsc").await.unwrap_err();

    match err {
        ServiceError::Network(message) => assert!(message.contains("503")),
        other => panic!("expected network error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_maps_to_network_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/price")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({ "unexpected": true }).to_string())
        .create_async()
        .await;

    let source = source("odd", SourceKind::Price, format!("{}/price", server.url()));
    let err = source.fetch("bsc").await.unwrap_err();
    assert!(matches!(err, ServiceError::Network(_)));
}

#[tokio::test]
async fn rpc_source_posts_block_number_probe() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({ "method": "eth_blockNumber" })))
        .with_status(200)
        .with_body(json!({ "jsonrpc": "2.0", "result": "0x1b4", "id": 1 }).to_string())
        .create_async()
        .await;

    let source = source("chain-rpc", SourceKind::Rpc, server.url());
    let report = source.fetch("bsc").await.unwrap();

    // Liveness only: nothing to aggregate.
    assert!(report.spot_price.is_none());
    assert!(report.protocols.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn history_endpoint_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/pools")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("protocol".into(), "venus".into()),
            Matcher::UrlEncoded("window".into(), "7d".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "points": [
                    { "timestamp": "2026-08-01T00:00:00Z", "apy": 8.0, "tvl": 100.0 },
                    { "timestamp": "2026-08-02T00:00:00Z", "apy": 8.4, "tvl": 104.0 },
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let source = source("venus-lending", SourceKind::Lending, format!("{}/pools", server.url()));
    let points = source.fetch_history("venus", HistoryWindow::Week).await.unwrap();

    assert_eq!(points.len(), 2);
    assert_eq!(points[1].apy, 8.4);
}
