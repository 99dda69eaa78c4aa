//! Per-tunnel session state machine
//!
//! The coordinator owns one [`SessionState`] per tunnel name and makes sure
//! at most one connect or disconnect runs for a name at any time. Each
//! transition runs on its own task holding the name's flight guard, so a
//! caller that stops waiting never strands a session in a transitional
//! state.

use std::fmt;
use std::sync::Arc;

use anywhere_common::TunnelConfig;
use anywhere_store::{KeyValueStore, StoreError};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{
    ActivationConfig, InterfaceState, ServiceControl, TrafficCounters, VpnBackend,
};
use crate::clock::{Clock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::elapsed::ElapsedTimeTracker;
use crate::error::SessionError;
use crate::permission::{ConsentProvider, ConsentStatus, PendingAuthorization, PermissionGate};
use crate::registry::{TunnelHandle, TunnelRegistry};
use crate::sampler::{RateReading, SamplerConfig, StatisticsSampler};

/// Lifecycle state of one tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingPermission,
    Connecting,
    Connected,
    Disconnecting,
    Failed(String),
}

impl SessionState {
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingPermission
                | SessionState::Connecting
                | SessionState::Disconnecting
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::AwaitingPermission => f.write_str("awaiting permission"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Disconnecting => f.write_str("disconnecting"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Successful connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub name: String,
    pub handle_id: Uuid,
    /// Whether the user was shown a consent prompt on the way
    pub prompted: bool,
    pub started_at_ms: Option<u64>,
}

/// Successful disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    pub name: String,
    /// False when no handle was cached and a temporary one was used
    pub cached_handle: bool,
}

/// Everything a UI needs to draw one tunnel
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub state: SessionState,
    pub rate: Option<RateReading>,
    pub elapsed: Option<String>,
}

struct SessionSlot {
    state: RwLock<SessionState>,
    flight: Arc<AsyncMutex<()>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Idle),
            flight: Arc::new(AsyncMutex::new(())),
        }
    }

    fn get(&self) -> SessionState {
        self.state.read().clone()
    }

    fn set(&self, name: &str, state: SessionState) {
        tracing::debug!("Session {} is now {}", name, state);
        *self.state.write() = state;
    }
}

fn config_key(name: &str) -> String {
    format!("session.{}.config", name)
}

/// Assembles a [`SessionCoordinator`] from its collaborators
pub struct SessionCoordinatorBuilder {
    backend: Arc<dyn VpnBackend>,
    consent: Arc<dyn ConsentProvider>,
    store: Arc<dyn KeyValueStore>,
    service: Option<Arc<dyn ServiceControl>>,
    clock: Arc<dyn Clock>,
    registry: Option<Arc<TunnelRegistry>>,
    config: CoordinatorConfig,
}

impl SessionCoordinatorBuilder {
    pub fn service_control(mut self, service: Arc<dyn ServiceControl>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(mut self, registry: Arc<TunnelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SessionCoordinator {
        let sampler = StatisticsSampler::new(
            SamplerConfig {
                interval: self.config.sample_interval,
                smoothing: self.config.smoothing,
            },
            self.backend.clone(),
            self.clock.clone(),
        );

        SessionCoordinator {
            inner: Arc::new(Inner {
                registry: self.registry.unwrap_or_else(TunnelRegistry::new),
                gate: PermissionGate::new(self.consent, self.config.permission_timeout),
                backend: self.backend,
                service: self.service,
                tracker: ElapsedTimeTracker::new(self.store.clone(), self.clock),
                store: self.store,
                sampler,
                sessions: DashMap::new(),
            }),
        }
    }
}

/// Coordinates tunnel sessions; cheap to clone
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<TunnelRegistry>,
    gate: PermissionGate,
    backend: Arc<dyn VpnBackend>,
    service: Option<Arc<dyn ServiceControl>>,
    store: Arc<dyn KeyValueStore>,
    tracker: ElapsedTimeTracker,
    sampler: StatisticsSampler,
    sessions: DashMap<String, Arc<SessionSlot>>,
}

impl SessionCoordinator {
    pub fn builder(
        backend: Arc<dyn VpnBackend>,
        consent: Arc<dyn ConsentProvider>,
        store: Arc<dyn KeyValueStore>,
    ) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder {
            backend,
            consent,
            store,
            service: None,
            clock: Arc::new(SystemClock),
            registry: None,
            config: CoordinatorConfig::default(),
        }
    }

    /// Bring tunnel `name` up with `config_text`
    pub async fn connect(&self, name: &str, config_text: &str) -> Result<Connected, SessionError> {
        let (slot, flight) = self.begin(name)?;
        let inner = self.inner.clone();
        let request = PendingAuthorization::new(name, config_text);

        let task = tokio::spawn(async move {
            let _flight = flight;
            inner.run_connect(slot, request).await
        });

        join(task, SessionError::Backend).await
    }

    /// Bring tunnel `name` down
    pub async fn disconnect(&self, name: &str) -> Result<Disconnected, SessionError> {
        let (slot, flight) = self.begin(name)?;
        let inner = self.inner.clone();
        let name = name.to_string();

        let task = tokio::spawn(async move {
            let _flight = flight;
            inner.run_disconnect(slot, &name).await
        });

        join(task, SessionError::DisconnectFatal).await
    }

    /// Connect again with the config from the last successful connect
    pub async fn reconnect(&self, name: &str) -> Result<Connected, SessionError> {
        let config_text = self
            .cached_config(name)
            .map_err(|e| SessionError::Backend(e.to_string()))?
            .ok_or_else(|| SessionError::NoCachedConfig(name.to_string()))?;
        self.connect(name, &config_text).await
    }

    /// Current cumulative counters straight from the backend
    pub async fn statistics(&self, name: &str) -> Result<TrafficCounters, SessionError> {
        let handle = self.inner.registry.resolve(name);
        self.inner.poll_statistics(handle).await
    }

    /// Re-arm a session that is still up after a process restart
    ///
    /// Returns true when `name` has a surviving start marker and the
    /// backend still reports counters for it.
    pub async fn adopt_running(&self, name: &str) -> Result<bool, SessionError> {
        let (slot, _flight) = self.begin(name)?;
        if slot.get().is_connected() {
            return Ok(true);
        }

        let started_at = match self.inner.tracker.started_at(name) {
            Ok(Some(started_at)) => started_at,
            Ok(None) => return Ok(false),
            Err(e) => {
                tracing::warn!("Failed to read start marker for {}: {}", name, e);
                return Ok(false);
            }
        };

        let handle = self.inner.registry.resolve(name);
        if let Err(e) = self.inner.poll_statistics(handle.clone()).await {
            tracing::debug!("Tunnel {} has a start marker but is not running: {}", name, e);
            return Ok(false);
        }

        slot.set(name, SessionState::Connected);
        self.inner.sampler.start(handle);
        tracing::info!("Adopted running tunnel {} (started at {})", name, started_at);
        Ok(true)
    }

    pub fn state(&self, name: &str) -> SessionState {
        self.inner
            .sessions
            .get(name)
            .map(|slot| slot.get())
            .unwrap_or(SessionState::Idle)
    }

    /// Every tunnel this coordinator has seen, sorted by name
    pub fn sessions(&self) -> Vec<(String, SessionState)> {
        let mut sessions: Vec<_> = self
            .inner
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }

    pub fn snapshot(&self, name: &str) -> SessionSnapshot {
        SessionSnapshot {
            name: name.to_string(),
            state: self.state(name),
            rate: self.inner.sampler.latest(name),
            elapsed: self.elapsed_display(name),
        }
    }

    pub fn subscribe_rates(&self, name: &str) -> watch::Receiver<Option<RateReading>> {
        self.inner.sampler.subscribe(name)
    }

    /// `MM:SS` since the session started, if a start marker exists
    pub fn elapsed_display(&self, name: &str) -> Option<String> {
        match self.inner.tracker.display(name) {
            Ok(display) => display,
            Err(e) => {
                tracing::warn!("Failed to read start marker for {}: {}", name, e);
                None
            }
        }
    }

    pub fn cached_config(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.inner.store.get(&config_key(name))
    }

    /// Tunnel whose consent prompt is currently outstanding
    pub fn pending_permission(&self) -> Option<String> {
        self.inner.gate.pending()
    }

    pub fn consent_status(&self) -> ConsentStatus {
        self.inner.gate.status()
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.inner.registry
    }

    /// Stop every sampler; sessions keep their state
    pub fn shutdown(&self) {
        self.inner.sampler.stop_all();
        tracing::debug!("Session coordinator shut down");
    }

    fn begin(&self, name: &str) -> Result<(Arc<SessionSlot>, OwnedMutexGuard<()>), SessionError> {
        let slot = self
            .inner
            .sessions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SessionSlot::new()))
            .value()
            .clone();

        let flight = slot.flight.clone().try_lock_owned().map_err(|_| {
            tracing::warn!("Rejecting request for {}: another operation is in flight", name);
            SessionError::AlreadyInProgress(name.to_string())
        })?;

        Ok((slot, flight))
    }
}

impl Inner {
    async fn run_connect(
        &self,
        slot: Arc<SessionSlot>,
        request: PendingAuthorization,
    ) -> Result<Connected, SessionError> {
        let name = request.name().to_string();

        if self.gate.status() == ConsentStatus::Required {
            slot.set(&name, SessionState::AwaitingPermission);
        }
        let authorization = match self.gate.ensure_authorized(request).await {
            Ok(authorization) => authorization,
            Err(e) => {
                slot.set(&name, SessionState::Idle);
                return Err(e);
            }
        };
        let prompted = authorization.prompted();
        let request = authorization.into_request();

        slot.set(&name, SessionState::Connecting);
        let (_, config_text) = request.into_parts();

        let parsed = match TunnelConfig::parse(&config_text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!("Config parse error for {}: {}", name, e);
                slot.set(&name, SessionState::Failed(e.to_string()));
                return Err(SessionError::ConfigParse(e.to_string()));
            }
        };

        let handle = self.registry.resolve(&name);
        self.sampler.stop(&name);

        let activation = ActivationConfig {
            text: config_text.clone(),
            parsed,
        };
        let up = {
            let backend = self.backend.clone();
            let handle = handle.clone();
            tokio::task::spawn_blocking(move || {
                backend.set_state(&handle, InterfaceState::Up, Some(&activation))
            })
        };

        let reason = match up.await {
            Ok(Ok(())) => {
                slot.set(&name, SessionState::Connected);
                let started_at_ms = self.on_connected(&name, &handle, &config_text);
                tracing::info!("Tunnel {} connected", name);
                return Ok(Connected {
                    name,
                    handle_id: handle.id(),
                    prompted,
                    started_at_ms,
                });
            }
            Ok(Err(e)) => e.reason,
            Err(e) => format!("backend worker failed: {}", e),
        };

        tracing::error!("Failed to connect tunnel {}: {}", name, reason);
        slot.set(&name, SessionState::Failed(reason.clone()));
        Err(SessionError::Backend(reason))
    }

    fn on_connected(&self, name: &str, handle: &Arc<TunnelHandle>, config_text: &str) -> Option<u64> {
        let started_at = match self.tracker.mark_started(name) {
            Ok(started_at) => Some(started_at),
            Err(e) => {
                tracing::warn!("Failed to record start marker for {}: {}", name, e);
                None
            }
        };

        if let Err(e) = self.store.set(&config_key(name), config_text) {
            tracing::warn!("Failed to cache config for {}: {}", name, e);
        }

        self.sampler.start(handle.clone());
        started_at
    }

    async fn run_disconnect(
        &self,
        slot: Arc<SessionSlot>,
        name: &str,
    ) -> Result<Disconnected, SessionError> {
        slot.set(name, SessionState::Disconnecting);
        self.sampler.stop(name);

        let (handle, cached_handle) = match self.registry.get(name) {
            Some(handle) => (handle, true),
            None => {
                tracing::warn!("No cached tunnel found for {}, using a temporary handle", name);
                (TunnelRegistry::temporary(name), false)
            }
        };

        let down = {
            let backend = self.backend.clone();
            let handle = handle.clone();
            tokio::task::spawn_blocking(move || {
                backend.set_state(&handle, InterfaceState::Down, None)
            })
        };

        match down.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Failed to disconnect tunnel {}: {}", name, e);
                slot.set(name, SessionState::Failed(e.reason.clone()));
                return Err(SessionError::Backend(e.reason));
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!("Fatal error while disconnecting tunnel {}: {}", name, reason);
                slot.set(name, SessionState::Failed(reason.clone()));
                return Err(SessionError::DisconnectFatal(reason));
            }
        }

        self.stop_service(handle).await;

        if let Err(e) = self.tracker.clear(name) {
            tracing::warn!("Failed to clear start marker for {}: {}", name, e);
        }

        slot.set(name, SessionState::Idle);
        tracing::info!("Tunnel {} disconnected", name);
        Ok(Disconnected {
            name: name.to_string(),
            cached_handle,
        })
    }

    async fn stop_service(&self, handle: Arc<TunnelHandle>) {
        let Some(service) = self.service.clone() else {
            return;
        };

        let name = handle.name().to_string();
        match tokio::task::spawn_blocking(move || service.stop_service(&handle)).await {
            Ok(Ok(())) => tracing::debug!("Stopped service for {}", name),
            Ok(Err(e)) => tracing::warn!("Failed to stop service for {}: {}", name, e),
            Err(e) => tracing::warn!("Service stop for {} failed: {}", name, e),
        }
    }

    async fn poll_statistics(&self, handle: Arc<TunnelHandle>) -> Result<TrafficCounters, SessionError> {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.statistics(&handle))
            .await
            .map_err(|e| SessionError::Stats(e.to_string()))?
            .map_err(|e| SessionError::Stats(e.reason))
    }
}

async fn join<T>(
    task: JoinHandle<Result<T, SessionError>>,
    on_abort: fn(String) -> SessionError,
) -> Result<T, SessionError> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(on_abort(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::clock::ManualClock;
    use crate::permission::{ConsentDecision, ConsentError, ConsentRequest};
    use anywhere_store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const CONFIG: &str = "[Interface]\n\
        PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\n\
        Address = 10.0.0.2/24\n\
        \n\
        [Peer]\n\
        PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\n\
        AllowedIPs = 0.0.0.0/0\n";

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<(String, InterfaceState)>>,
        fail_up: bool,
    }

    impl VpnBackend for RecordingBackend {
        fn set_state(
            &self,
            handle: &TunnelHandle,
            state: InterfaceState,
            config: Option<&ActivationConfig>,
        ) -> Result<(), BackendError> {
            if state == InterfaceState::Up {
                assert_eq!(config.map(|c| c.text.as_str()), Some(CONFIG));
                if self.fail_up {
                    return Err(BackendError::new("interface busy"));
                }
            }
            self.calls.lock().push((handle.name().to_string(), state));
            Ok(())
        }

        fn statistics(&self, _: &TunnelHandle) -> Result<TrafficCounters, BackendError> {
            Ok(TrafficCounters::default())
        }
    }

    struct FixedConsent(ConsentStatus, ConsentDecision);

    #[async_trait]
    impl ConsentProvider for FixedConsent {
        fn prepare(&self) -> ConsentStatus {
            self.0
        }

        async fn request(&self, _: &ConsentRequest) -> Result<ConsentDecision, ConsentError> {
            Ok(self.1)
        }
    }

    fn coordinator(
        backend: Arc<RecordingBackend>,
        consent: FixedConsent,
    ) -> (SessionCoordinator, Arc<dyn KeyValueStore>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let coordinator = SessionCoordinator::builder(backend, Arc::new(consent), store.clone())
            .clock(Arc::new(ManualClock::new(5_000)))
            .build();
        (coordinator, store)
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let backend = Arc::new(RecordingBackend::default());
        let (coordinator, store) = coordinator(
            backend.clone(),
            FixedConsent(ConsentStatus::Granted, ConsentDecision::Granted),
        );

        let connected = coordinator.connect("wg0", CONFIG).await.unwrap();
        assert!(!connected.prompted);
        assert_eq!(connected.started_at_ms, Some(5_000));
        assert_eq!(coordinator.state("wg0"), SessionState::Connected);
        assert_eq!(coordinator.cached_config("wg0").unwrap().as_deref(), Some(CONFIG));
        assert_eq!(coordinator.elapsed_display("wg0").as_deref(), Some("00:00"));

        let disconnected = coordinator.disconnect("wg0").await.unwrap();
        assert!(disconnected.cached_handle);
        assert_eq!(coordinator.state("wg0"), SessionState::Idle);
        assert!(store.get("session.wg0.started_at").unwrap().is_none());

        assert_eq!(
            *backend.calls.lock(),
            vec![
                ("wg0".to_string(), InterfaceState::Up),
                ("wg0".to_string(), InterfaceState::Down)
            ]
        );
    }

    #[tokio::test]
    async fn test_denied_permission_returns_to_idle() {
        let backend = Arc::new(RecordingBackend::default());
        let (coordinator, _) = coordinator(
            backend.clone(),
            FixedConsent(ConsentStatus::Required, ConsentDecision::Denied),
        );

        let result = coordinator.connect("wg0", CONFIG).await;

        assert_eq!(result, Err(SessionError::PermissionDenied));
        assert_eq!(coordinator.state("wg0"), SessionState::Idle);
        assert!(backend.calls.lock().is_empty());
        assert!(coordinator.pending_permission().is_none());
    }

    #[tokio::test]
    async fn test_granted_prompt_reports_prompted() {
        let backend = Arc::new(RecordingBackend::default());
        let (coordinator, _) = coordinator(
            backend.clone(),
            FixedConsent(ConsentStatus::Required, ConsentDecision::Granted),
        );

        let connected = coordinator.connect("wg0", CONFIG).await.unwrap();

        assert!(connected.prompted);
        assert_eq!(coordinator.state("wg0"), SessionState::Connected);
        assert!(coordinator.pending_permission().is_none());
        assert_eq!(backend.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_config_fails_without_backend_call() {
        let backend = Arc::new(RecordingBackend::default());
        let (coordinator, _) = coordinator(
            backend.clone(),
            FixedConsent(ConsentStatus::Granted, ConsentDecision::Granted),
        );

        let err = coordinator.connect("wg0", "[Interface]\n").await.unwrap_err();

        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(matches!(coordinator.state("wg0"), SessionState::Failed(_)));
        assert!(backend.calls.lock().is_empty());
        assert!(!coordinator.registry().contains("wg0"));
    }

    #[tokio::test]
    async fn test_backend_failure_marks_failed() {
        let backend = Arc::new(RecordingBackend {
            fail_up: true,
            ..Default::default()
        });
        let (coordinator, store) = coordinator(
            backend,
            FixedConsent(ConsentStatus::Granted, ConsentDecision::Granted),
        );

        let result = coordinator.connect("wg0", CONFIG).await;

        assert_eq!(result, Err(SessionError::Backend("interface busy".into())));
        assert_eq!(
            coordinator.state("wg0"),
            SessionState::Failed("interface busy".into())
        );
        assert!(store.get("session.wg0.started_at").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_uses_temporary_handle() {
        let backend = Arc::new(RecordingBackend::default());
        let (coordinator, _) = coordinator(
            backend.clone(),
            FixedConsent(ConsentStatus::Granted, ConsentDecision::Granted),
        );

        let disconnected = coordinator.disconnect("foo").await.unwrap();

        assert!(!disconnected.cached_handle);
        assert!(coordinator.registry().is_empty());
        assert_eq!(backend.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_without_cache() {
        let backend = Arc::new(RecordingBackend::default());
        let (coordinator, _) = coordinator(
            backend,
            FixedConsent(ConsentStatus::Granted, ConsentDecision::Granted),
        );

        assert_eq!(
            coordinator.reconnect("wg0").await,
            Err(SessionError::NoCachedConfig("wg0".into()))
        );
    }

    #[test]
    fn test_state_serializes_with_reason() {
        let json = serde_json::to_value(SessionState::Failed("boom".into())).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "boom");

        let json = serde_json::to_value(SessionState::Connected).unwrap();
        assert_eq!(json["state"], "connected");
    }
}
