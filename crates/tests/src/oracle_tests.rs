//! Oracle behavior against scripted sources: caching, retries, circuit
//! breaking, deadlines, and degradation.

use crate::mock_infrastructure::{MockBehavior, MockSource};
use chrono::Utc;
use nectar_core::{
    errors::{ErrorManager, ServiceError},
    oracle::{
        CircuitState, DataSource, HistoryPoint, HistoryWindow, OracleService, OracleSettings,
    },
    validation::ValidationManager,
};
use std::{sync::Arc, time::Duration};

fn validation() -> Arc<ValidationManager> {
    Arc::new(ValidationManager::new(
        ["bsc".to_string(), "bscTestnet".to_string(), "opbnb".to_string()],
        1_000_000.0,
    ))
}

fn settings(max_attempts: u32) -> OracleSettings {
    OracleSettings {
        freshness: Duration::from_secs(300),
        overall_deadline: Duration::from_secs(2),
        max_attempts,
        backoff_base: Duration::from_millis(1),
        attempt_timeout: Duration::from_millis(500),
        ..OracleSettings::default()
    }
}

fn oracle(max_attempts: u32, sources: &[Arc<MockSource>]) -> OracleService {
    let mut oracle =
        OracleService::new(settings(max_attempts), validation(), Arc::new(ErrorManager::new()));
    for source in sources {
        oracle.add_source(Arc::clone(source) as _, 3, Duration::from_secs(60));
    }
    oracle
}

#[tokio::test]
async fn snapshot_is_served_from_cache_within_freshness_window() {
    let price = MockSource::new("price", nectar_core::config::SourceKind::Price, MockBehavior::Price(305.0));
    let venus = MockSource::new(
        "venus",
        nectar_core::config::SourceKind::Lending,
        MockBehavior::Pool { protocol: "venus".to_string(), apy: 8.5, tvl: 2_000_000.0 },
    );
    let oracle = oracle(1, &[Arc::clone(&price), Arc::clone(&venus)]);

    let first = oracle.get_snapshot("bscTestnet").await.unwrap();
    let second = oracle.get_snapshot("bscTestnet").await.unwrap();

    assert_eq!(first.data_source, DataSource::Live);
    assert_eq!(second.data_source, DataSource::Cached);
    // Upstream sources were invoked at most once across both calls.
    assert_eq!(price.call_count(), 1);
    assert_eq!(venus.call_count(), 1);
    assert_eq!(second.spot_price, 305.0);
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let flaky = MockSource::new(
        "flaky",
        nectar_core::config::SourceKind::Price,
        MockBehavior::FailFirst { n: 2, then_price: 280.0 },
    );
    let oracle = oracle(3, &[Arc::clone(&flaky)]);

    let snapshot = oracle.get_snapshot("bsc").await.unwrap();
    assert_eq!(snapshot.data_source, DataSource::Live);
    assert_eq!(snapshot.spot_price, 280.0);
    // Two failures plus the successful third attempt.
    assert_eq!(flaky.call_count(), 3);
}

#[tokio::test]
async fn validation_errors_are_not_retried() {
    struct RejectingSource(std::sync::atomic::AtomicU32);

    #[async_trait::async_trait]
    impl nectar_core::oracle::MarketSource for RejectingSource {
        fn name(&self) -> &str {
            "rejecting"
        }
        fn kind(&self) -> nectar_core::config::SourceKind {
            nectar_core::config::SourceKind::Price
        }
        async fn fetch(
            &self,
            _network: &str,
        ) -> Result<nectar_core::oracle::SourceReport, ServiceError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(ServiceError::Validation("bad request".to_string()))
        }
    }

    let source = Arc::new(RejectingSource(std::sync::atomic::AtomicU32::new(0)));
    let mut oracle_svc =
        OracleService::new(settings(3), validation(), Arc::new(ErrorManager::new()));
    oracle_svc.add_source(Arc::clone(&source) as _, 5, Duration::from_secs(60));

    let snapshot = oracle_svc.get_snapshot("bsc").await.unwrap();
    assert_eq!(snapshot.data_source, DataSource::Fallback);
    // Non-transient error: exactly one attempt despite max_attempts = 3.
    assert_eq!(source.0.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn circuit_opens_and_short_circuits_without_network_attempts() {
    let dead = MockSource::new(
        "dead",
        nectar_core::config::SourceKind::Price,
        MockBehavior::NetworkError,
    );
    // Near-zero freshness so each call fans out instead of hitting the cache.
    let mut cfg = settings(1);
    cfg.freshness = Duration::from_millis(1);
    let mut oracle_svc = OracleService::new(cfg, validation(), Arc::new(ErrorManager::new()));
    // Breaker: threshold 2, long cooldown.
    oracle_svc.add_source(Arc::clone(&dead) as _, 2, Duration::from_secs(600));

    // Two calls = two real attempts, reaching the threshold.
    let _ = oracle_svc.get_snapshot("bsc").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _ = oracle_svc.get_snapshot("bsc").await.unwrap();
    assert_eq!(dead.call_count(), 2);

    // Within the cooldown the next call is short-circuited: no network attempt.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let snapshot = oracle_svc.get_snapshot("bsc").await.unwrap();
    assert_eq!(snapshot.data_source, DataSource::Fallback);
    assert_eq!(dead.call_count(), 2, "open circuit must not reach the source");

    let health = oracle_svc.health_status();
    assert_eq!(health[0].circuit_state, CircuitState::Open);
}

#[tokio::test]
async fn half_open_trial_recovers_the_source() {
    let recovering = MockSource::new(
        "recovering",
        nectar_core::config::SourceKind::Price,
        MockBehavior::FailFirst { n: 2, then_price: 290.0 },
    );
    let mut cfg = settings(1);
    cfg.freshness = Duration::from_millis(1);
    let mut oracle_svc = OracleService::new(cfg, validation(), Arc::new(ErrorManager::new()));
    oracle_svc.add_source(Arc::clone(&recovering) as _, 2, Duration::from_millis(50));

    let _ = oracle_svc.get_snapshot("bsc").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _ = oracle_svc.get_snapshot("bsc").await.unwrap();
    assert_eq!(oracle_svc.health_status()[0].circuit_state, CircuitState::Open);

    // After the cooldown the trial call goes through and succeeds.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let snapshot = oracle_svc.get_snapshot("bsc").await.unwrap();
    assert_eq!(snapshot.data_source, DataSource::Live);
    assert_eq!(snapshot.spot_price, 290.0);
    assert_eq!(oracle_svc.health_status()[0].circuit_state, CircuitState::Closed);
}

#[tokio::test]
async fn overall_deadline_returns_partial_data() {
    let fast = MockSource::new(
        "fast",
        nectar_core::config::SourceKind::Price,
        MockBehavior::Price(300.0),
    );
    let slow = MockSource::new(
        "slow",
        nectar_core::config::SourceKind::Lending,
        MockBehavior::Slow { delay: Duration::from_secs(30), price: 1.0 },
    );

    let mut cfg = settings(1);
    cfg.overall_deadline = Duration::from_millis(200);
    cfg.attempt_timeout = Duration::from_secs(60);
    let mut oracle_svc = OracleService::new(cfg, validation(), Arc::new(ErrorManager::new()));
    oracle_svc.add_source(Arc::clone(&fast) as _, 3, Duration::from_secs(60));
    oracle_svc.add_source(Arc::clone(&slow) as _, 3, Duration::from_secs(60));

    let started = std::time::Instant::now();
    let snapshot = oracle_svc.get_snapshot("bsc").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5), "must not wait for the slow source");
    assert_eq!(snapshot.data_source, DataSource::Live);
    assert_eq!(snapshot.spot_price, 300.0);
}

#[tokio::test]
async fn all_sources_down_never_errors() {
    let dead_a = MockSource::new(
        "dead-a",
        nectar_core::config::SourceKind::Price,
        MockBehavior::NetworkError,
    );
    let dead_b = MockSource::new(
        "dead-b",
        nectar_core::config::SourceKind::Lending,
        MockBehavior::NetworkError,
    );
    let oracle = oracle(2, &[dead_a, dead_b]);

    let snapshot = oracle.get_snapshot("bscTestnet").await.unwrap();
    assert_eq!(snapshot.data_source, DataSource::Fallback);
    assert!(snapshot.spot_price >= 0.0);
    assert!(snapshot.average_apy >= 0.0);
    assert!(snapshot.total_tvl >= 0.0);
    assert!(!snapshot.protocols.is_empty(), "expected protocols listed as unavailable");
}

#[tokio::test]
async fn history_is_cached_and_validated() {
    let points = vec![
        HistoryPoint { timestamp: Utc::now() - chrono::Duration::hours(2), apy: 8.0, tvl: 100.0 },
        HistoryPoint { timestamp: Utc::now() - chrono::Duration::hours(1), apy: 9.0, tvl: 110.0 },
        // Out of range, must be dropped by validation.
        HistoryPoint { timestamp: Utc::now(), apy: 90_000.0, tvl: 120.0 },
    ];
    let source = MockSource::with_history(
        "venus",
        MockBehavior::Pool { protocol: "venus".to_string(), apy: 8.0, tvl: 100.0 },
        points,
    );
    let oracle = oracle(1, &[Arc::clone(&source)]);

    let series = oracle.get_historical_data("venus", HistoryWindow::Week).await.unwrap();
    assert_eq!(series.data_source, DataSource::Live);
    assert_eq!(series.points.len(), 2, "out-of-range point dropped");
    assert_eq!(source.call_count(), 1);

    let cached = oracle.get_historical_data("venus", HistoryWindow::Week).await.unwrap();
    assert_eq!(cached.data_source, DataSource::Cached);
    assert_eq!(source.call_count(), 1, "second read served from cache");

    // A different window is a different cache entry.
    let _ = oracle.get_historical_data("venus", HistoryWindow::Day).await.unwrap();
    assert_eq!(source.call_count(), 2);
}

#[tokio::test]
async fn error_manager_records_upstream_failures() {
    let errors = Arc::new(ErrorManager::new());
    let dead = MockSource::new(
        "dead",
        nectar_core::config::SourceKind::Price,
        MockBehavior::NetworkError,
    );
    let mut oracle_svc = OracleService::new(settings(1), validation(), Arc::clone(&errors));
    oracle_svc.add_source(dead as _, 3, Duration::from_secs(60));

    let _ = oracle_svc.get_snapshot("bsc").await.unwrap();

    let stats = errors.stats();
    assert_eq!(stats.by_category["network"], 1);
}
