//! Connection time and process restart end-to-end tests

use std::time::Duration;

use anywhere_core::SessionState;
use anywhere_e2e::{TestSession, CLOCK_START_MS, TEST_CONFIG};
use anywhere_store::KeyValueStore;

fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("anywhere_core=debug,anywhere_e2e=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_elapsed_survives_restart() {
    init_test();
    let session = TestSession::new();

    let connected = session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    assert_eq!(connected.started_at_ms, Some(CLOCK_START_MS));

    session.clock.advance(Duration::from_secs(30));
    assert_eq!(session.coordinator.elapsed_display("wg0").as_deref(), Some("00:30"));

    let restarted = session.restart();
    restarted.clock.advance(Duration::from_secs(5));

    assert_eq!(restarted.coordinator.state("wg0"), SessionState::Idle);
    assert!(restarted.coordinator.adopt_running("wg0").await.unwrap());
    assert_eq!(restarted.coordinator.state("wg0"), SessionState::Connected);
    assert_eq!(restarted.coordinator.elapsed_display("wg0").as_deref(), Some("00:35"));

    let disconnected = restarted.coordinator.disconnect("wg0").await.unwrap();
    assert!(disconnected.cached_handle);
    assert_eq!(restarted.coordinator.elapsed_display("wg0"), None);
}

#[tokio::test]
async fn test_elapsed_past_an_hour() {
    init_test();
    let session = TestSession::new();
    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();

    session.clock.advance(Duration::from_secs(75 * 60 + 9));
    assert_eq!(session.coordinator.elapsed_display("wg0").as_deref(), Some("75:09"));
}

#[tokio::test]
async fn test_adopt_ignores_marker_without_interface() {
    init_test();
    let session = TestSession::new();
    session
        .store
        .set("session.wg0.started_at", &CLOCK_START_MS.to_string())
        .unwrap();

    assert!(!session.coordinator.adopt_running("wg0").await.unwrap());
    assert_eq!(session.coordinator.state("wg0"), SessionState::Idle);
}

#[tokio::test]
async fn test_adopt_without_marker() {
    init_test();
    let session = TestSession::new();
    session.backend.force_up("wg0");

    assert!(!session.coordinator.adopt_running("wg0").await.unwrap());
}

#[tokio::test]
async fn test_reconnect_after_restart_uses_cached_config() {
    init_test();
    let session = TestSession::new();
    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    session.coordinator.disconnect("wg0").await.unwrap();

    let restarted = session.restart();
    restarted.coordinator.reconnect("wg0").await.unwrap();

    let ups: Vec<_> = restarted
        .backend
        .calls_for("wg0")
        .into_iter()
        .filter_map(|c| c.config_text)
        .collect();
    assert_eq!(ups, vec![TEST_CONFIG.to_string(), TEST_CONFIG.to_string()]);
}

#[tokio::test]
async fn test_stale_marker_keeps_original_start() {
    init_test();
    let session = TestSession::new();
    session
        .store
        .set("session.wg0.started_at", &CLOCK_START_MS.to_string())
        .unwrap();
    session.clock.advance(Duration::from_secs(10));

    // A marker left behind by a crash is continued rather than reset
    let connected = session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    assert_eq!(connected.started_at_ms, Some(CLOCK_START_MS));
    assert_eq!(session.coordinator.elapsed_display("wg0").as_deref(), Some("00:10"));
}
