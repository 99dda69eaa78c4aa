mod error;
mod wg;

pub use error::ConfigError;
pub use wg::{Endpoint, InterfaceConfig, IpNet, PeerConfig, TunnelConfig, WgKey};
