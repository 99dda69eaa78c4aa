//! Test harness wiring a session coordinator to mocks

use std::sync::Arc;
use std::time::Duration;

use anywhere_core::{CoordinatorConfig, ManualClock, SessionCoordinator};
use anywhere_store::MemoryStore;

use crate::mock_backend::{MockBackend, MockServiceControl};
use crate::mock_consent::MockConsent;

/// A valid single-peer tunnel config
pub const TEST_CONFIG: &str = "[Interface]
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
Address = 10.0.0.2/24
DNS = 8.8.8.8

[Peer]
PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
AllowedIPs = 0.0.0.0/0, ::/0
Endpoint = 127.0.0.1:51820
PersistentKeepalive = 25
";

/// Start time of the manual clock, in epoch milliseconds
pub const CLOCK_START_MS: u64 = 1_700_000_000_000;

/// A coordinator plus handles to everything it talks to
pub struct TestSession {
    pub coordinator: SessionCoordinator,
    pub backend: Arc<MockBackend>,
    pub service: Arc<MockServiceControl>,
    pub consent: Arc<MockConsent>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl TestSession {
    /// Coordinator with consent already granted
    pub fn new() -> Self {
        Self::with_consent(MockConsent::granted())
    }

    pub fn with_consent(consent: Arc<MockConsent>) -> Self {
        Self::with_config(consent, Self::fast_config())
    }

    pub fn with_config(consent: Arc<MockConsent>, config: CoordinatorConfig) -> Self {
        Self::assemble(
            MockBackend::new(),
            MockServiceControl::new(),
            consent,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(CLOCK_START_MS)),
            config,
        )
    }

    /// Sampling every 20ms without smoothing
    pub fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            sample_interval: Duration::from_millis(20),
            smoothing: 1.0,
            ..CoordinatorConfig::default()
        }
    }

    /// A fresh coordinator over the same store, backend and clock, as after
    /// a process restart
    pub fn restart(&self) -> Self {
        self.coordinator.shutdown();
        Self::assemble(
            self.backend.clone(),
            self.service.clone(),
            self.consent.clone(),
            self.store.clone(),
            self.clock.clone(),
            Self::fast_config(),
        )
    }

    fn assemble(
        backend: Arc<MockBackend>,
        service: Arc<MockServiceControl>,
        consent: Arc<MockConsent>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        config: CoordinatorConfig,
    ) -> Self {
        let coordinator = SessionCoordinator::builder(backend.clone(), consent.clone(), store.clone())
            .service_control(service.clone())
            .clock(clock.clone())
            .config(config)
            .build();

        Self {
            coordinator,
            backend,
            service,
            consent,
            store,
            clock,
        }
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        self.coordinator.shutdown();
    }
}

/// Poll `check` every 10ms until it returns `Some`, or panic after `timeout`
pub async fn wait_for<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("Condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
