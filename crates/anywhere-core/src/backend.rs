//! Seams to the external VPN backend
//!
//! Both traits are blocking: interface changes may sit in kernel calls for a
//! while, so the coordinator only ever invokes them from a blocking worker.

use anywhere_common::TunnelConfig;
use serde::Serialize;
use thiserror::Error;

use crate::registry::TunnelHandle;

/// Desired interface state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Up,
    Down,
}

/// Cumulative byte counters for one tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub total_rx: u64,
    pub total_tx: u64,
}

/// Configuration handed to the backend when bringing a tunnel up
///
/// `text` is exactly what the caller supplied; `parsed` is the validated form.
#[derive(Debug, Clone)]
pub struct ActivationConfig {
    pub text: String,
    pub parsed: TunnelConfig,
}

/// Failure reported by the backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct BackendError {
    pub reason: String,
}

impl BackendError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The tunnel implementation (WireGuard userspace/kernel backend)
pub trait VpnBackend: Send + Sync + 'static {
    /// Bring the interface identified by `handle` up or down
    ///
    /// `config` is `Some` for [`InterfaceState::Up`] and `None` for `Down`.
    fn set_state(
        &self,
        handle: &TunnelHandle,
        state: InterfaceState,
        config: Option<&ActivationConfig>,
    ) -> Result<(), BackendError>;

    fn statistics(&self, handle: &TunnelHandle) -> Result<TrafficCounters, BackendError>;
}

/// Explicit stop of whatever OS service hosts the tunnel
///
/// Called after a successful `Down`; failures are only logged.
pub trait ServiceControl: Send + Sync + 'static {
    fn stop_service(&self, handle: &TunnelHandle) -> Result<(), BackendError>;
}
