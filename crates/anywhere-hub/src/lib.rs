//! Client side of the Anywhere hub
//!
//! The hub is a small HTTP service running next to a WireGuard server. It
//! hands out peers (address + key pair) and can block, unblock or remove
//! them. This crate wraps its `/webhook` API and keeps the login in the
//! key-value store.

mod client;
mod credentials;
mod error;
mod peer_config;

pub use client::{HubClient, HubState};
pub use credentials::{CredentialStore, HubCredentials, CREDENTIALS_KEY};
pub use error::HubError;
pub use peer_config::{client_config, WIREGUARD_PORT};
