//! Saved tunnel profiles
//!
//! Profiles live under a single store key as a versioned document so the
//! layout can change without breaking existing installs.

use std::sync::Arc;

use anywhere_common::{ConfigError, TunnelConfig};
use anywhere_store::{KeyValueStore, KeyValueStoreExt, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;

pub const PROFILES_KEY: &str = "profiles";

/// Longest interface name the kernel accepts
const MAX_NAME_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelProfile {
    pub name: String,
    pub config_text: String,
    pub created_at_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "version")]
enum ProfileDocument {
    #[serde(rename = "1")]
    V1 { profiles: Vec<TunnelProfile> },
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid tunnel name '{0}': use 1-15 characters from [a-zA-Z0-9_=+.-]")]
    InvalidName(String),

    #[error("Profile '{name}' has an invalid config: {source}")]
    InvalidConfig {
        name: String,
        #[source]
        source: ConfigError,
    },
}

/// Whether `name` can be used as an interface name
pub fn is_valid_tunnel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'))
}

pub struct ProfileStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// All profiles, sorted by name
    pub fn list(&self) -> Result<Vec<TunnelProfile>, ProfileError> {
        let mut profiles = self.load()?;
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    pub fn get(&self, name: &str) -> Result<Option<TunnelProfile>, ProfileError> {
        Ok(self.load()?.into_iter().find(|p| p.name == name))
    }

    /// Insert or replace a profile
    ///
    /// The config must parse. Replacing keeps the original creation time.
    pub fn save(&self, name: &str, config_text: &str) -> Result<TunnelProfile, ProfileError> {
        if !is_valid_tunnel_name(name) {
            return Err(ProfileError::InvalidName(name.to_string()));
        }
        TunnelConfig::parse(config_text).map_err(|source| ProfileError::InvalidConfig {
            name: name.to_string(),
            source,
        })?;

        let mut profiles = self.load()?;
        let profile = match profiles.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                existing.config_text = config_text.to_string();
                existing.clone()
            }
            None => {
                let profile = TunnelProfile {
                    name: name.to_string(),
                    config_text: config_text.to_string(),
                    created_at_ms: self.clock.now_ms(),
                };
                profiles.push(profile.clone());
                profile
            }
        };

        self.persist(profiles)?;
        tracing::info!("Saved profile {}", name);
        Ok(profile)
    }

    /// Returns whether a profile was removed
    pub fn remove(&self, name: &str) -> Result<bool, ProfileError> {
        let mut profiles = self.load()?;
        let before = profiles.len();
        profiles.retain(|p| p.name != name);

        if profiles.len() == before {
            return Ok(false);
        }

        self.persist(profiles)?;
        tracing::info!("Removed profile {}", name);
        Ok(true)
    }

    fn load(&self) -> Result<Vec<TunnelProfile>, ProfileError> {
        Ok(match self.store.get_json::<ProfileDocument>(PROFILES_KEY)? {
            Some(ProfileDocument::V1 { profiles }) => profiles,
            None => Vec::new(),
        })
    }

    fn persist(&self, profiles: Vec<TunnelProfile>) -> Result<(), ProfileError> {
        self.store
            .set_json(PROFILES_KEY, &ProfileDocument::V1 { profiles })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use anywhere_store::MemoryStore;
    use std::time::Duration;

    const CONFIG: &str = "[Interface]\n\
        PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\n\
        Address = 10.0.0.2/24\n\
        \n\
        [Peer]\n\
        PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\n\
        AllowedIPs = 0.0.0.0/0\n\
        Endpoint = hub.example.com:51820\n";

    fn profiles() -> (ProfileStore, Arc<ManualClock>, Arc<dyn KeyValueStore>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        (ProfileStore::new(store.clone(), clock.clone()), clock, store)
    }

    #[test]
    fn test_save_list_remove() {
        let (profiles, _, _) = profiles();

        profiles.save("work", CONFIG).unwrap();
        profiles.save("home", CONFIG).unwrap();

        let names: Vec<_> = profiles.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["home", "work"]);

        assert!(profiles.remove("work").unwrap());
        assert!(!profiles.remove("work").unwrap());
        assert!(profiles.get("work").unwrap().is_none());
    }

    #[test]
    fn test_update_keeps_created_at() {
        let (profiles, clock, _) = profiles();

        profiles.save("wg0", CONFIG).unwrap();
        clock.advance(Duration::from_secs(60));
        let updated = profiles.save("wg0", &CONFIG.replace("10.0.0.2", "10.0.0.3")).unwrap();

        assert_eq!(updated.created_at_ms, 1_000);
        assert!(updated.config_text.contains("10.0.0.3"));
        assert_eq!(profiles.list().unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_bad_input() {
        let (profiles, _, _) = profiles();

        assert!(matches!(
            profiles.save("not a name", CONFIG),
            Err(ProfileError::InvalidName(_))
        ));
        assert!(matches!(
            profiles.save("wg0", "[Peer]\n"),
            Err(ProfileError::InvalidConfig { .. })
        ));
        assert!(profiles.list().unwrap().is_empty());
    }

    #[test]
    fn test_document_is_versioned() {
        let (profiles, _, store) = profiles();
        profiles.save("wg0", CONFIG).unwrap();

        let raw: serde_json::Value = store.get_json(PROFILES_KEY).unwrap().unwrap();
        assert_eq!(raw["version"], "1");
        assert_eq!(raw["profiles"][0]["name"], "wg0");
    }

    #[test]
    fn test_tunnel_name_rules() {
        assert!(is_valid_tunnel_name("wg0"));
        assert!(is_valid_tunnel_name("home-vpn.1"));
        assert!(!is_valid_tunnel_name(""));
        assert!(!is_valid_tunnel_name("a-very-long-interface"));
        assert!(!is_valid_tunnel_name("wg/0"));
    }
}
