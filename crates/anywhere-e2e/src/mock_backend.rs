//! Mock VPN backend for E2E tests
//!
//! Records every call, can be slowed down or made to fail, and tracks how
//! many calls overlap per tunnel name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anywhere_core::{
    ActivationConfig, BackendError, InterfaceState, ManualClock, ServiceControl,
    TrafficCounters, TunnelHandle, VpnBackend,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

/// A recorded `set_state` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub name: String,
    pub handle_id: Uuid,
    pub state: InterfaceState,
    /// Raw config text for `Up`
    pub config_text: Option<String>,
}

/// Mock backend that tracks interfaces without touching the system
pub struct MockBackend {
    calls: RwLock<Vec<BackendCall>>,
    delay: RwLock<Duration>,
    fail_up: AtomicBool,
    fail_down: AtomicBool,
    panic_down: AtomicBool,
    up: DashMap<String, ()>,
    counters: DashMap<String, TrafficCounters>,
    /// Bytes added per statistics poll: name -> (rx, tx)
    traffic: DashMap<String, (u64, u64)>,
    /// Clock moved forward on every statistics poll
    drive: Mutex<Option<(Arc<ManualClock>, Duration)>>,
    /// name -> (current, max) overlapping set_state calls
    flight: Mutex<HashMap<String, (usize, usize)>>,
    polls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.read().clone()
    }

    pub fn calls_for(&self, name: &str) -> Vec<BackendCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.up.contains_key(name)
    }

    /// Make every `set_state` call block for `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }

    pub fn set_fail_up(&self, fail: bool) {
        self.fail_up.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_down(&self, fail: bool) {
        self.fail_down.store(fail, Ordering::SeqCst);
    }

    /// Panic inside the next `Down` calls
    pub fn set_panic_down(&self, panic: bool) {
        self.panic_down.store(panic, Ordering::SeqCst);
    }

    /// Mark an interface as up without going through `set_state`
    pub fn force_up(&self, name: &str) {
        self.up.insert(name.to_string(), ());
    }

    pub fn set_counters(&self, name: &str, total_rx: u64, total_tx: u64) {
        self.counters
            .insert(name.to_string(), TrafficCounters { total_rx, total_tx });
    }

    /// Grow `name`'s counters by `rx`/`tx` on every poll
    pub fn set_traffic(&self, name: &str, rx: u64, tx: u64) {
        self.traffic.insert(name.to_string(), (rx, tx));
    }

    /// Advance `clock` by `step` on every poll so rates are deterministic
    pub fn drive_clock(&self, clock: Arc<ManualClock>, step: Duration) {
        *self.drive.lock() = Some((clock, step));
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `set_state` calls seen for `name`
    pub fn max_concurrent(&self, name: &str) -> usize {
        self.flight.lock().get(name).map(|f| f.1).unwrap_or(0)
    }

    fn enter(&self, name: &str) {
        let mut flight = self.flight.lock();
        let entry = flight.entry(name.to_string()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = entry.1.max(entry.0);
    }

    fn leave(&self, name: &str) {
        if let Some(entry) = self.flight.lock().get_mut(name) {
            entry.0 = entry.0.saturating_sub(1);
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            calls: RwLock::new(Vec::new()),
            delay: RwLock::new(Duration::ZERO),
            fail_up: AtomicBool::new(false),
            fail_down: AtomicBool::new(false),
            panic_down: AtomicBool::new(false),
            up: DashMap::new(),
            counters: DashMap::new(),
            traffic: DashMap::new(),
            drive: Mutex::new(None),
            flight: Mutex::new(HashMap::new()),
            polls: AtomicUsize::new(0),
        }
    }
}

impl VpnBackend for MockBackend {
    fn set_state(
        &self,
        handle: &TunnelHandle,
        state: InterfaceState,
        config: Option<&ActivationConfig>,
    ) -> Result<(), BackendError> {
        let name = handle.name();
        self.enter(name);

        let delay = *self.delay.read();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.calls.write().push(BackendCall {
            name: name.to_string(),
            handle_id: handle.id(),
            state,
            config_text: config.map(|c| c.text.clone()),
        });
        self.leave(name);

        match state {
            InterfaceState::Up => {
                if self.fail_up.load(Ordering::SeqCst) {
                    return Err(BackendError::new("Simulated activation failure"));
                }
                self.up.insert(name.to_string(), ());
                Ok(())
            }
            InterfaceState::Down => {
                if self.panic_down.load(Ordering::SeqCst) {
                    panic!("Simulated backend crash");
                }
                if self.fail_down.load(Ordering::SeqCst) {
                    return Err(BackendError::new("Simulated deactivation failure"));
                }
                self.up.remove(name);
                Ok(())
            }
        }
    }

    fn statistics(&self, handle: &TunnelHandle) -> Result<TrafficCounters, BackendError> {
        let name = handle.name();
        if !self.is_up(name) {
            return Err(BackendError::new(format!("Tunnel {} is not up", name)));
        }
        self.polls.fetch_add(1, Ordering::SeqCst);

        if let Some((clock, step)) = self.drive.lock().as_ref() {
            clock.advance(*step);
        }

        let (rx, tx) = self.traffic.get(name).map(|t| *t).unwrap_or((0, 0));
        let mut counters = self.counters.entry(name.to_string()).or_default();
        counters.total_rx += rx;
        counters.total_tx += tx;
        Ok(*counters)
    }
}

/// Mock service control that counts stop requests
#[derive(Default)]
pub struct MockServiceControl {
    stops: RwLock<Vec<String>>,
    fail: AtomicBool,
}

impl MockServiceControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stops(&self) -> Vec<String> {
        self.stops.read().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ServiceControl for MockServiceControl {
    fn stop_service(&self, handle: &TunnelHandle) -> Result<(), BackendError> {
        self.stops.write().push(handle.name().to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::new("Simulated service stop failure"));
        }
        Ok(())
    }
}
