//! End-to-end test utilities for Anywhere
//!
//! Mocks for every external collaborator of the session coordinator (VPN
//! backend, service control, consent prompt) plus an in-process hub, so the
//! whole client can be exercised without WireGuard or network access.

pub mod harness;
pub mod mock_backend;
pub mod mock_consent;
pub mod mock_hub;

pub use harness::{wait_for, TestSession, CLOCK_START_MS, TEST_CONFIG};
pub use mock_backend::{BackendCall, MockBackend, MockServiceControl};
pub use mock_consent::MockConsent;
pub use mock_hub::{MockHubService, HUB_PUBLIC_KEY};
