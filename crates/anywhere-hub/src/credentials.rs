//! Hub login kept in the key-value store
//!
//! Logging out keeps the uid and endpoint so the next login only needs the
//! password. A factory reset forgets everything.

use std::sync::Arc;

use anywhere_protocol::RegisterResult;
use anywhere_store::{KeyValueStore, KeyValueStoreExt};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

pub const CREDENTIALS_KEY: &str = "anywhere-hub";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubCredentials {
    pub uid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// `host[:port]` as typed at registration
    pub endpoint: String,

    pub token: String,

    /// Hub server public key, used in rendered peer configs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub login: bool,
}

impl HubCredentials {
    /// Credentials for a freshly registered hub
    pub fn from_registration(endpoint: &str, result: RegisterResult) -> Result<Self, HubError> {
        let uid = result
            .uid
            .ok_or_else(|| HubError::Decode("registration returned no uid".to_string()))?;

        Ok(Self {
            uid,
            id: result.id,
            endpoint: endpoint.to_string(),
            token: result.token,
            key: result.key,
            login: true,
        })
    }

    /// Host part of the endpoint, without scheme or port
    pub fn host(&self) -> &str {
        let endpoint = self
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let endpoint = endpoint.split('/').next().unwrap_or(endpoint);

        if let Some(rest) = endpoint.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }
        endpoint.split(':').next().unwrap_or(endpoint)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "version")]
enum CredentialDocument {
    #[serde(rename = "1")]
    V1(HubCredentials),
}

pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<Option<HubCredentials>, HubError> {
        Ok(self
            .store
            .get_json::<CredentialDocument>(CREDENTIALS_KEY)?
            .map(|CredentialDocument::V1(credentials)| credentials))
    }

    pub fn save(&self, credentials: &HubCredentials) -> Result<(), HubError> {
        self.store
            .set_json(CREDENTIALS_KEY, &CredentialDocument::V1(credentials.clone()))?;
        Ok(())
    }

    /// Logged-in credentials, or [`HubError::NotLoggedIn`]
    pub fn require_login(&self) -> Result<HubCredentials, HubError> {
        match self.load()? {
            Some(credentials) if credentials.login => Ok(credentials),
            _ => Err(HubError::NotLoggedIn),
        }
    }

    /// Store a fresh token after logging back in
    pub fn login(&self, token: &str) -> Result<HubCredentials, HubError> {
        let mut credentials = self.load()?.ok_or(HubError::NotLoggedIn)?;
        credentials.token = token.to_string();
        credentials.login = true;
        self.save(&credentials)?;
        tracing::info!("Logged in to hub {}", credentials.endpoint);
        Ok(credentials)
    }

    /// Returns false when there was nothing to log out of
    pub fn logout(&self) -> Result<bool, HubError> {
        let Some(mut credentials) = self.load()? else {
            return Ok(false);
        };
        credentials.login = false;
        self.save(&credentials)?;
        tracing::info!("Logged out of hub {}", credentials.endpoint);
        Ok(true)
    }

    pub fn forget(&self) -> Result<(), HubError> {
        self.store.remove(CREDENTIALS_KEY)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anywhere_store::MemoryStore;

    fn registered() -> HubCredentials {
        HubCredentials::from_registration(
            "hub.example.com:8080",
            RegisterResult {
                token: "t0k".into(),
                uid: Some("u1".into()),
                id: Some("1".into()),
                key: Some("srvkey".into()),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_logout_then_login_keeps_identity() {
        let credentials = CredentialStore::new(Arc::new(MemoryStore::new()));
        credentials.save(&registered()).unwrap();

        assert!(credentials.logout().unwrap());
        assert!(matches!(credentials.require_login(), Err(HubError::NotLoggedIn)));

        let relogged = credentials.login("fresh").unwrap();
        assert_eq!(relogged.uid, "u1");
        assert_eq!(relogged.token, "fresh");
        assert!(credentials.require_login().is_ok());

        credentials.forget().unwrap();
        assert!(credentials.load().unwrap().is_none());
        assert!(!credentials.logout().unwrap());
    }

    #[test]
    fn test_registration_requires_uid() {
        let result = HubCredentials::from_registration(
            "hub",
            RegisterResult {
                token: "t".into(),
                uid: None,
                id: None,
                key: None,
            },
        );
        assert!(matches!(result, Err(HubError::Decode(_))));
    }

    #[test]
    fn test_host() {
        let mut credentials = registered();
        assert_eq!(credentials.host(), "hub.example.com");

        credentials.endpoint = "http://10.1.2.3:9000".into();
        assert_eq!(credentials.host(), "10.1.2.3");

        credentials.endpoint = "[2001:db8::1]:8080".into();
        assert_eq!(credentials.host(), "2001:db8::1");
    }
}
