//! Traffic sampling end-to-end tests

use std::sync::Arc;
use std::time::Duration;

use anywhere_core::{SessionCoordinator, SessionState};
use anywhere_e2e::{wait_for, MockBackend, MockConsent, TestSession, TEST_CONFIG};
use anywhere_store::MemoryStore;

fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("anywhere_core=debug,anywhere_e2e=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_live_rates_while_connected() {
    init_test();
    let session = TestSession::new();

    // Every poll moves one second forward and transfers 2 KiB down, 1 KiB up
    session
        .backend
        .drive_clock(session.clock.clone(), Duration::from_secs(1));
    session.backend.set_traffic("wg0", 2048, 1024);

    let mut rates = session.coordinator.subscribe_rates("wg0");
    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();

    let reading = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            rates.changed().await.expect("sampler channel closed");
            if let Some(reading) = *rates.borrow_and_update() {
                return reading;
            }
        }
    })
    .await
    .expect("no rate reading published");

    assert_eq!(reading.rx().to_string(), "2.00 KB/s");
    assert_eq!(reading.tx().to_string(), "1.00 KB/s");
    assert!(reading.totals.total_rx >= 4096);

    let snapshot = session.coordinator.snapshot("wg0");
    assert!(snapshot.rate.is_some());
    assert!(snapshot.elapsed.is_some());
}

#[tokio::test]
async fn test_rates_cleared_on_disconnect() {
    init_test();
    let session = TestSession::new();
    session
        .backend
        .drive_clock(session.clock.clone(), Duration::from_secs(1));
    session.backend.set_traffic("wg0", 512, 512);

    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    wait_for(Duration::from_secs(2), || session.coordinator.snapshot("wg0").rate).await;

    session.coordinator.disconnect("wg0").await.unwrap();
    let polls = session.backend.poll_count();

    assert!(session.coordinator.snapshot("wg0").rate.is_none());
    assert!(session.coordinator.subscribe_rates("wg0").borrow().is_none());

    // Nothing polls a tunnel that is down
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.backend.poll_count(), polls);
    assert!(session.coordinator.snapshot("wg0").rate.is_none());
}

#[tokio::test]
async fn test_statistics_reads_backend_counters() {
    init_test();
    let session = TestSession::new();
    session.backend.set_counters("wg0", 10_000, 2_000);

    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    let counters = session.coordinator.statistics("wg0").await.unwrap();

    assert_eq!(counters.total_rx, 10_000);
    assert_eq!(counters.total_tx, 2_000);
}

#[tokio::test]
async fn test_statistics_for_inactive_tunnel() {
    init_test();
    let session = TestSession::new();

    let err = session.coordinator.statistics("wg0").await.unwrap_err();
    assert_eq!(err.code(), "STATS_ERROR");
    assert!(session.coordinator.snapshot("wg0").rate.is_none());
}

/// Wait for any in-flight poll to land, then check nothing polls afterwards
async fn assert_polling_stopped(backend: &MockBackend) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let polls = backend.poll_count();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.poll_count(), polls);
}

#[tokio::test]
async fn test_shutdown_stops_sampling() {
    init_test();
    let session = TestSession::new();
    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    session.coordinator.connect("wg1", TEST_CONFIG).await.unwrap();

    wait_for(Duration::from_secs(2), || {
        (session.backend.poll_count() >= 4).then_some(())
    })
    .await;

    session.coordinator.shutdown();
    assert_polling_stopped(&session.backend).await;

    // Sessions keep their state; only the readings go away
    assert_eq!(session.coordinator.state("wg0"), SessionState::Connected);
    assert!(session.coordinator.snapshot("wg0").rate.is_none());
    assert!(session.coordinator.snapshot("wg1").rate.is_none());
    assert!(session.backend.is_up("wg0"));
}

#[tokio::test]
async fn test_dropping_coordinator_stops_sampling() {
    init_test();
    let backend = MockBackend::new();
    let coordinator = SessionCoordinator::builder(
        backend.clone(),
        MockConsent::granted(),
        Arc::new(MemoryStore::new()),
    )
    .config(TestSession::fast_config())
    .build();

    coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    wait_for(Duration::from_secs(2), || (backend.poll_count() >= 2).then_some(())).await;

    drop(coordinator);
    assert_polling_stopped(&backend).await;
    assert!(backend.is_up("wg0"));
}
