//! Anywhere core - tunnel session lifecycle coordination
//!
//! This crate sits between a UI and an external WireGuard backend:
//! - `registry`: name -> durable tunnel handle
//! - `permission`: one-time OS consent flow gating activation
//! - `session`: per-tunnel state machine with single-flight transitions
//! - `sampler`: periodic traffic counter polling into byte rates
//! - `elapsed`: persisted connection start marker and `MM:SS` display
//! - `profile`: saved tunnel profiles

mod backend;
mod clock;
mod config;
mod error;

pub mod elapsed;
pub mod permission;
pub mod profile;
pub mod registry;
pub mod sampler;
pub mod session;

pub use backend::{
    ActivationConfig, BackendError, InterfaceState, ServiceControl, TrafficCounters, VpnBackend,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoordinatorConfig;
pub use elapsed::ElapsedTimeTracker;
pub use error::SessionError;
pub use permission::{
    Authorization, ConsentDecision, ConsentError, ConsentProvider, ConsentRequest, ConsentStatus,
    PendingAuthorization, PermissionGate,
};
pub use profile::{ProfileError, ProfileStore, TunnelProfile};
pub use registry::{TunnelHandle, TunnelRegistry};
pub use sampler::{ByteRate, RateReading, RateUnit, StatisticsSampler, TrafficSample};
pub use session::{
    Connected, Disconnected, SessionCoordinator, SessionCoordinatorBuilder, SessionSnapshot,
    SessionState,
};
