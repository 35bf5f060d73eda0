//! Full runtime wiring: configuration in, live components out, clean shutdown.

use futures::FutureExt;
use mockito::Matcher;
use nectar_core::{
    config::{AppConfig, SourceKind, SourceProvider},
    oracle::{DataSource, OracleService},
    runtime::{service_names, NectarRuntime},
};
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn config_with_sources(sources: Vec<SourceProvider>) -> AppConfig {
    let mut config = AppConfig::default();
    config.oracle.sources = sources;
    config
}

fn price_provider(url: String) -> SourceProvider {
    SourceProvider {
        name: "price-feed".to_string(),
        kind: SourceKind::Price,
        url,
        timeout_seconds: 2,
        circuit_breaker_threshold: 3,
        circuit_breaker_cooldown_seconds: 30,
    }
}

#[tokio::test]
async fn runtime_serves_snapshots_through_the_container() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/price")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({ "price": 311.7 }).to_string())
        .expect_at_most(1)
        .create_async()
        .await;

    let config = config_with_sources(vec![price_provider(format!("{}/price", server.url()))]);
    let runtime = NectarRuntime::builder().with_config(config).build().unwrap();
    runtime.start().await.unwrap();

    // The HTTP layer resolves the oracle by name, not by type.
    let oracle: Arc<OracleService> =
        runtime.container().get_as(service_names::ORACLE_SERVICE).unwrap();

    let snapshot = oracle.get_snapshot("bsc").await.unwrap();
    assert_eq!(snapshot.data_source, DataSource::Live);
    assert_eq!(snapshot.spot_price, 311.7);

    // Second call stays inside the freshness window.
    let cached = oracle.get_snapshot("bsc").await.unwrap();
    assert_eq!(cached.data_source, DataSource::Cached);

    runtime.shutdown().await;
}

#[tokio::test]
async fn runtime_health_surface_combines_container_and_oracle() {
    let config = AppConfig::default();
    let runtime = NectarRuntime::builder().with_config(config).build().unwrap();
    runtime.start().await.unwrap();

    // What the excluded HTTP layer serves on GET /health.
    let container_health = runtime.container().health_status().await;
    let oracle_health = runtime.oracle().health_status();

    assert!(container_health.services.contains_key(service_names::ORACLE_SERVICE));
    assert!(container_health.healthy, "untouched sources start healthy");
    assert_eq!(oracle_health.len(), 3, "default config has three sources");
    assert!(oracle_health.iter().all(|s| s.health_score == 100));

    runtime.shutdown().await;
}

#[tokio::test]
async fn background_jobs_flow_through_the_runtime_queues() {
    let runtime =
        NectarRuntime::builder().with_config(AppConfig::default()).build().unwrap();
    runtime.start().await.unwrap();

    let processed = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let processed_clone = Arc::clone(&processed);

    runtime
        .queues()
        .create_queue(
            "rebalance",
            2,
            Arc::new(move |task| {
                let processed = Arc::clone(&processed_clone);
                async move {
                    assert!(task.payload.get("wallet").is_some());
                    processed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }),
        )
        .unwrap();

    for _ in 0..4 {
        runtime
            .queues()
            .add("rebalance", json!({ "wallet": "0x0000000000000000000000000000000000000001" }))
            .unwrap();
    }

    for _ in 0..100 {
        if processed.load(std::sync::atomic::Ordering::SeqCst) == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(processed.load(std::sync::atomic::Ordering::SeqCst), 4);

    let stats = runtime.queues().stats();
    assert_eq!(stats.total_succeeded, 4);

    runtime.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_queue_dispatchers() {
    let runtime =
        NectarRuntime::builder().with_config(AppConfig::default()).build().unwrap();
    runtime.start().await.unwrap();

    let processed = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let processed_clone = Arc::clone(&processed);
    runtime
        .queues()
        .create_queue(
            "jobs",
            1,
            Arc::new(move |_| {
                let processed = Arc::clone(&processed_clone);
                async move {
                    processed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }),
        )
        .unwrap();

    runtime.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Post-shutdown submissions enqueue but are never processed.
    runtime.queues().add("jobs", json!({})).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(processed.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn validation_guards_the_request_surface() {
    let runtime =
        NectarRuntime::builder().with_config(AppConfig::default()).build().unwrap();
    runtime.start().await.unwrap();

    let validation = runtime.validation();
    assert!(validation.validate_network("bscTestnet").is_ok());
    assert!(validation.validate_network("mainnet").is_err());

    // Invalid network reaches the error manager as a normalized response.
    let err = runtime.oracle().get_snapshot("mainnet").await.unwrap_err();
    let response = runtime.errors().error_response(
        &err,
        runtime.errors().context("get_snapshot", "market/snapshot"),
        None,
    );
    assert!(!response.success);
    assert_eq!(response.status_code, 400);

    runtime.shutdown().await;
}
