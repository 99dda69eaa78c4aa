use anywhere_protocol::{
    AddPeerRequest, Envelope, PeerActionRequest, PeerRecord, PeerRemoveRequest, RegisterRequest,
    RegisterResult, WEBHOOK_PREFIX,
};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;

use crate::credentials::HubCredentials;
use crate::error::HubError;

/// Whether the hub's WireGuard server is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Running,
    Stopped,
}

/// Hub API client
pub struct HubClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HubClient {
    /// `endpoint` is `host[:port]`, optionally with an `http://` or
    /// `https://` scheme (https is assumed when absent, for registration too)
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url(endpoint),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Client for a logged-in hub
    pub fn from_credentials(credentials: &HubCredentials) -> Result<Self, HubError> {
        if !credentials.login {
            return Err(HubError::NotLoggedIn);
        }
        Ok(Self::new(&credentials.endpoint).with_token(&credentials.token))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register a new hub or log back in to a known one
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResult, HubError> {
        if request.is_first_time() {
            tracing::info!("Registering new hub at {}", self.base_url);
        } else {
            tracing::info!("Logging in to hub {} as {}", self.base_url, request.uid);
        }

        let envelope = self.post("register", request).await?;
        let envelope = expect_success(envelope, "Registration")?;

        envelope
            .result_as::<RegisterResult>()
            .ok_or_else(|| HubError::Decode("registration returned no result".to_string()))?
            .map_err(|e| HubError::Decode(e.to_string()))
    }

    /// A `failed` status means the server is stopped, not that the call failed
    pub async fn status(&self) -> Result<HubState, HubError> {
        let envelope = self.get("status").await?;
        Ok(if envelope.is_success() {
            HubState::Running
        } else {
            HubState::Stopped
        })
    }

    pub async fn peers(&self) -> Result<Vec<PeerRecord>, HubError> {
        let envelope = expect_success(self.get("peers").await?, "Listing peers")?;
        Ok(envelope.peers.unwrap_or_default())
    }

    pub async fn start(&self) -> Result<(), HubError> {
        tracing::info!("Starting hub server");
        expect_success(self.get("start").await?, "Starting the server").map(drop)
    }

    pub async fn stop(&self) -> Result<(), HubError> {
        tracing::info!("Stopping hub server");
        expect_success(self.get("stop").await?, "Stopping the server").map(drop)
    }

    pub async fn add_peer(&self, name: &str) -> Result<(), HubError> {
        if name.trim().is_empty() {
            return Err(HubError::Api("Client name should not be empty".to_string()));
        }

        tracing::info!("Adding peer {}", name);
        let request = AddPeerRequest {
            name: name.to_string(),
        };
        expect_success(self.post("add", &request).await?, "Adding the peer").map(drop)
    }

    pub async fn remove_peer(&self, peer: &PeerRecord) -> Result<(), HubError> {
        tracing::info!("Removing peer {} ({})", peer.name, peer.id);
        let request = PeerRemoveRequest::from(peer);
        expect_success(self.post("remove", &request).await?, "Removing the peer").map(drop)
    }

    /// Revoke a peer's access without deleting it
    pub async fn block(&self, peer: &PeerRecord) -> Result<(), HubError> {
        tracing::info!("Blocking peer {}", peer.name);
        let request = PeerActionRequest::new(peer, false);
        expect_success(self.post("block", &request).await?, "Blocking the peer").map(drop)
    }

    pub async fn unblock(&self, peer: &PeerRecord) -> Result<(), HubError> {
        tracing::info!("Unblocking peer {}", peer.name);
        let request = PeerActionRequest::new(peer, true);
        expect_success(self.post("unblock", &request).await?, "Unblocking the peer").map(drop)
    }

    /// Wipe every peer and the registration on the hub
    pub async fn factory_reset(&self) -> Result<(), HubError> {
        tracing::warn!("Factory resetting hub {}", self.base_url);
        expect_success(self.get("factory-reset").await?, "Factory reset").map(drop)
    }

    async fn get(&self, path: &str) -> Result<Envelope, HubError> {
        let request = self.authorized(self.client.get(self.url(path)));
        send(request).await
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Envelope, HubError> {
        let request = self.authorized(self.client.post(self.url(path)).json(body));
        send(request).await
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}/{}", self.base_url, WEBHOOK_PREFIX, path)
    }
}

async fn send(request: RequestBuilder) -> Result<Envelope, HubError> {
    let response = request.send().await?.error_for_status()?;
    Ok(response.json().await?)
}

fn expect_success(envelope: Envelope, action: &str) -> Result<Envelope, HubError> {
    if envelope.is_success() {
        return Ok(envelope);
    }

    let reason = envelope
        .failure_reason()
        .unwrap_or_else(|| format!("{} failed", action));
    tracing::warn!("{} rejected by hub: {}", action, reason);
    Err(HubError::Api(reason))
}

fn base_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("hub.example.com:8080"), "https://hub.example.com:8080");
        assert_eq!(base_url("http://127.0.0.1:9000/"), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_webhook_urls() {
        let client = HubClient::new("hub.example.com");
        assert_eq!(client.url("register"), "https://hub.example.com/webhook/register");
        assert_eq!(client.url("status"), "https://hub.example.com/webhook/status");
        assert_eq!(
            client.url("factory-reset"),
            "https://hub.example.com/webhook/factory-reset"
        );
    }

    #[test]
    fn test_logged_out_credentials_rejected() {
        let credentials = HubCredentials {
            uid: "u1".into(),
            id: None,
            endpoint: "hub.example.com".into(),
            token: "t".into(),
            key: None,
            login: false,
        };
        assert!(matches!(
            HubClient::from_credentials(&credentials),
            Err(HubError::NotLoggedIn)
        ));
    }
}
