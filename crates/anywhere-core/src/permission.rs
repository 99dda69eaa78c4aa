//! One-time OS consent gating tunnel activation
//!
//! At most one consent prompt is outstanding per process. The request that
//! triggered it is held in a single slot and released on every exit path
//! (grant, denial, launch failure, timeout or the caller being dropped).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::error::SessionError;

/// Result of the non-interactive consent check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentStatus {
    Granted,
    Required,
}

/// User's answer to a consent prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsentError {
    /// Nothing in the foreground can show the prompt
    #[error("No foreground context available")]
    Unavailable,

    #[error("Failed to launch consent prompt: {0}")]
    Launch(String),
}

/// What the consent provider is asked to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    pub id: Uuid,
    pub tunnel: String,
}

/// Platform consent mechanism
#[async_trait]
pub trait ConsentProvider: Send + Sync {
    /// Whether consent is already held. Must not block or prompt.
    fn prepare(&self) -> ConsentStatus;

    /// Show the prompt and wait for the answer
    async fn request(&self, request: &ConsentRequest) -> Result<ConsentDecision, ConsentError>;
}

/// A connect request suspended behind the consent prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    id: Uuid,
    name: String,
    config_text: String,
}

impl PendingAuthorization {
    pub fn new(name: impl Into<String>, config_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            config_text: config_text.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config_text(&self) -> &str {
        &self.config_text
    }

    pub fn into_parts(self) -> (String, String) {
        (self.name, self.config_text)
    }
}

/// Outcome of [`PermissionGate::ensure_authorized`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Consent was already held; no prompt shown
    AlreadyGranted(PendingAuthorization),
    /// The user granted consent just now
    Granted(PendingAuthorization),
}

impl Authorization {
    pub fn into_request(self) -> PendingAuthorization {
        match self {
            Authorization::AlreadyGranted(request) | Authorization::Granted(request) => request,
        }
    }

    pub fn prompted(&self) -> bool {
        matches!(self, Authorization::Granted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingSlot {
    id: Uuid,
    name: String,
}

pub struct PermissionGate {
    provider: Arc<dyn ConsentProvider>,
    timeout: Duration,
    slot: Arc<Mutex<Option<PendingSlot>>>,
}

impl PermissionGate {
    pub fn new(provider: Arc<dyn ConsentProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn status(&self) -> ConsentStatus {
        self.provider.prepare()
    }

    /// Name of the tunnel whose consent prompt is outstanding
    pub fn pending(&self) -> Option<String> {
        self.slot.lock().as_ref().map(|p| p.name.clone())
    }

    /// Pass `request` through immediately when consent is held, otherwise
    /// prompt for it
    pub async fn ensure_authorized(
        &self,
        request: PendingAuthorization,
    ) -> Result<Authorization, SessionError> {
        match self.status() {
            ConsentStatus::Granted => Ok(Authorization::AlreadyGranted(request)),
            ConsentStatus::Required => self.authorize(request).await.map(Authorization::Granted),
        }
    }

    /// Prompt for consent and hand `request` back once granted
    pub async fn authorize(
        &self,
        request: PendingAuthorization,
    ) -> Result<PendingAuthorization, SessionError> {
        let _claim = self.claim(&request)?;

        let consent = ConsentRequest {
            id: request.id,
            tunnel: request.name.clone(),
        };

        tracing::info!("Requesting VPN permission for {}", request.name);

        match tokio::time::timeout(self.timeout, self.provider.request(&consent)).await {
            Ok(Ok(ConsentDecision::Granted)) => {
                tracing::info!("VPN permission granted for {}", request.name);
                Ok(request)
            }
            Ok(Ok(ConsentDecision::Denied)) => {
                tracing::warn!("VPN permission denied for {}", request.name);
                Err(SessionError::PermissionDenied)
            }
            Ok(Err(ConsentError::Unavailable)) => {
                tracing::error!("No foreground context to request VPN permission");
                Err(SessionError::ActivityUnavailable)
            }
            Ok(Err(ConsentError::Launch(reason))) => {
                tracing::error!("Failed to start VPN permission prompt: {}", reason);
                Err(SessionError::ActivityUnavailable)
            }
            Err(_) => {
                tracing::warn!(
                    "VPN permission prompt for {} timed out after {:?}",
                    request.name,
                    self.timeout
                );
                Err(SessionError::PermissionTimeout)
            }
        }
    }

    fn claim(&self, request: &PendingAuthorization) -> Result<PendingClaim, SessionError> {
        let mut slot = self.slot.lock();
        if let Some(pending) = slot.as_ref() {
            tracing::warn!(
                "Rejecting permission request for {}: {} is still pending",
                request.name,
                pending.name
            );
            return Err(SessionError::PermissionPending {
                pending: pending.name.clone(),
            });
        }

        *slot = Some(PendingSlot {
            id: request.id,
            name: request.name.clone(),
        });

        Ok(PendingClaim {
            slot: self.slot.clone(),
            id: request.id,
        })
    }
}

/// Clears the pending slot when the prompt resolves or the caller goes away
struct PendingClaim {
    slot: Arc<Mutex<Option<PendingSlot>>>,
    id: Uuid,
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().map(|p| p.id) == Some(self.id) {
            *slot = None;
        }
    }
}
