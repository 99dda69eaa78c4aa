//! Connect/disconnect lifecycle end-to-end tests

use std::time::Duration;

use anywhere_core::{InterfaceState, SessionError, SessionState};
use anywhere_e2e::{wait_for, TestSession, TEST_CONFIG};

fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("anywhere_core=debug,anywhere_e2e=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_connect_then_disconnect() {
    init_test();
    let session = TestSession::new();
    let coordinator = &session.coordinator;

    let connected = coordinator
        .connect("wg0", TEST_CONFIG)
        .await
        .expect("connect failed");

    assert_eq!(connected.name, "wg0");
    assert!(!connected.prompted);
    assert!(connected.started_at_ms.is_some());
    assert_eq!(coordinator.state("wg0"), SessionState::Connected);
    assert!(session.backend.is_up("wg0"));
    assert_eq!(
        coordinator.cached_config("wg0").unwrap().as_deref(),
        Some(TEST_CONFIG)
    );

    let disconnected = coordinator.disconnect("wg0").await.expect("disconnect failed");
    assert!(disconnected.cached_handle);
    assert_eq!(coordinator.state("wg0"), SessionState::Idle);
    assert!(!session.backend.is_up("wg0"));
    assert_eq!(session.service.stops(), vec!["wg0".to_string()]);
    assert!(coordinator.elapsed_display("wg0").is_none());

    // Both calls went through the same cached handle
    let calls = session.backend.calls_for("wg0");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].state, InterfaceState::Up);
    assert_eq!(calls[0].handle_id, connected.handle_id);
    assert_eq!(calls[0].config_text.as_deref(), Some(TEST_CONFIG));
    assert_eq!(calls[1].state, InterfaceState::Down);
    assert_eq!(calls[1].handle_id, connected.handle_id);
}

#[tokio::test]
async fn test_reconnect_reuses_handle() {
    init_test();
    let session = TestSession::new();
    let coordinator = &session.coordinator;

    let first = coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    coordinator.disconnect("wg0").await.unwrap();
    let second = coordinator.reconnect("wg0").await.unwrap();

    assert_eq!(first.handle_id, second.handle_id);
    assert_eq!(coordinator.registry().len(), 1);
}

#[tokio::test]
async fn test_overlapping_requests_are_rejected() {
    init_test();
    let session = TestSession::new();
    session.backend.set_delay(Duration::from_millis(200));

    let coordinator = session.coordinator.clone();
    let first = tokio::spawn(async move { coordinator.connect("wg0", TEST_CONFIG).await });

    wait_for(Duration::from_secs(2), || {
        (session.coordinator.state("wg0") == SessionState::Connecting).then_some(())
    })
    .await;

    let second = session.coordinator.connect("wg0", TEST_CONFIG).await;
    assert_eq!(second, Err(SessionError::AlreadyInProgress("wg0".to_string())));

    let disconnect = session.coordinator.disconnect("wg0").await;
    assert_eq!(
        disconnect,
        Err(SessionError::AlreadyInProgress("wg0".to_string()))
    );

    first.await.unwrap().expect("first connect failed");
    assert_eq!(session.backend.calls_for("wg0").len(), 1);
    assert_eq!(session.backend.max_concurrent("wg0"), 1);
    assert_eq!(session.coordinator.state("wg0"), SessionState::Connected);
}

#[tokio::test]
async fn test_different_tunnels_run_concurrently() {
    init_test();
    let session = TestSession::new();
    session.backend.set_delay(Duration::from_millis(100));

    let (a, b) = tokio::join!(
        session.coordinator.connect("wg0", TEST_CONFIG),
        session.coordinator.connect("wg1", TEST_CONFIG),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_ne!(a.handle_id, b.handle_id);
    assert!(session.backend.is_up("wg0"));
    assert!(session.backend.is_up("wg1"));

    let sessions = session.coordinator.sessions();
    assert_eq!(
        sessions,
        vec![
            ("wg0".to_string(), SessionState::Connected),
            ("wg1".to_string(), SessionState::Connected),
        ]
    );
}

#[tokio::test]
async fn test_abandoned_connect_still_completes() {
    init_test();
    let session = TestSession::new();
    session.backend.set_delay(Duration::from_millis(100));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        session.coordinator.connect("wg0", TEST_CONFIG),
    )
    .await;
    assert!(abandoned.is_err());

    wait_for(Duration::from_secs(2), || {
        (session.coordinator.state("wg0") == SessionState::Connected).then_some(())
    })
    .await;

    assert!(session.backend.is_up("wg0"));
    assert!(session.coordinator.elapsed_display("wg0").is_some());

    // The flight guard was released with the task
    session.coordinator.disconnect("wg0").await.unwrap();
}

#[tokio::test]
async fn test_activation_failure_marks_session_failed() {
    init_test();
    let session = TestSession::new();
    session.backend.set_fail_up(true);

    let result = session.coordinator.connect("wg0", TEST_CONFIG).await;
    assert!(matches!(result, Err(SessionError::Backend(ref reason)) if reason.contains("activation")));
    assert!(matches!(session.coordinator.state("wg0"), SessionState::Failed(_)));
    assert!(session.coordinator.elapsed_display("wg0").is_none());
    assert!(session.coordinator.cached_config("wg0").unwrap().is_none());

    // A failed session can be retried
    session.backend.set_fail_up(false);
    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    assert_eq!(session.coordinator.state("wg0"), SessionState::Connected);
}

#[tokio::test]
async fn test_invalid_config_never_reaches_backend() {
    init_test();
    let session = TestSession::new();

    let result = session.coordinator.connect("wg0", "[Interface]\nAddress = nope\n").await;
    let err = result.unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
    assert!(matches!(session.coordinator.state("wg0"), SessionState::Failed(_)));
    assert!(session.backend.calls().is_empty());
}

#[tokio::test]
async fn test_disconnect_unknown_tunnel_uses_temporary_handle() {
    init_test();
    let session = TestSession::new();
    session.backend.force_up("wg9");

    let disconnected = session.coordinator.disconnect("wg9").await.unwrap();

    assert!(!disconnected.cached_handle);
    assert!(!session.backend.is_up("wg9"));
    assert!(!session.coordinator.registry().contains("wg9"));
    assert_eq!(session.service.stops(), vec!["wg9".to_string()]);
    assert_eq!(session.coordinator.state("wg9"), SessionState::Idle);
}

#[tokio::test]
async fn test_service_stop_failure_is_ignored() {
    init_test();
    let session = TestSession::new();
    session.service.set_fail(true);

    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    session.coordinator.disconnect("wg0").await.unwrap();

    assert_eq!(session.coordinator.state("wg0"), SessionState::Idle);
    assert_eq!(session.service.stops().len(), 1);
}

#[tokio::test]
async fn test_deactivation_failure() {
    init_test();
    let session = TestSession::new();
    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    session.backend.set_fail_down(true);

    let err = session.coordinator.disconnect("wg0").await.unwrap_err();
    assert_eq!(err.code(), "BACKEND_ERROR");
    assert!(matches!(session.coordinator.state("wg0"), SessionState::Failed(_)));
    assert!(session.service.stops().is_empty());

    // The start marker survives a failed disconnect
    assert!(session.coordinator.elapsed_display("wg0").is_some());
}

#[tokio::test]
async fn test_backend_panic_during_disconnect_is_fatal() {
    init_test();
    let session = TestSession::new();
    session.coordinator.connect("wg0", TEST_CONFIG).await.unwrap();
    session.backend.set_panic_down(true);

    let err = session.coordinator.disconnect("wg0").await.unwrap_err();
    assert!(matches!(err, SessionError::DisconnectFatal(_)));
    assert_eq!(err.code(), "DISCONNECT_FATAL");
    assert!(matches!(session.coordinator.state("wg0"), SessionState::Failed(_)));

    // The coordinator is still usable afterwards
    session.backend.set_panic_down(false);
    session.coordinator.disconnect("wg0").await.unwrap();
    assert_eq!(session.coordinator.state("wg0"), SessionState::Idle);
}

#[tokio::test]
async fn test_reconnect_without_cache() {
    init_test();
    let session = TestSession::new();

    let err = session.coordinator.reconnect("wg0").await.unwrap_err();
    assert_eq!(err, SessionError::NoCachedConfig("wg0".to_string()));
    assert!(session.backend.calls().is_empty());
}
