use thiserror::Error;

/// Failures surfaced by the session coordinator
///
/// Every variant is terminal for the request that produced it; none are
/// retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("VPN permission denied by user")]
    PermissionDenied,

    #[error("No foreground context available to request VPN permission")]
    ActivityUnavailable,

    #[error("VPN permission request already pending for tunnel '{pending}'")]
    PermissionPending { pending: String },

    #[error("Timed out waiting for VPN permission")]
    PermissionTimeout,

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("An operation is already in progress for tunnel '{0}'")]
    AlreadyInProgress(String),

    #[error("Statistics unavailable: {0}")]
    Stats(String),

    #[error("Fatal error during disconnect: {0}")]
    DisconnectFatal(String),

    #[error("No cached configuration for tunnel '{0}'")]
    NoCachedConfig(String),
}

impl SessionError {
    /// Stable machine-readable code, for UIs that switch on the failure kind
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied => "PERMISSION_DENIED",
            SessionError::ActivityUnavailable => "ACTIVITY_UNAVAILABLE",
            SessionError::PermissionPending { .. } => "PERMISSION_PENDING",
            SessionError::PermissionTimeout => "PERMISSION_TIMEOUT",
            SessionError::ConfigParse(_) => "CONFIG_ERROR",
            SessionError::Backend(_) => "BACKEND_ERROR",
            SessionError::AlreadyInProgress(_) => "ALREADY_IN_PROGRESS",
            SessionError::Stats(_) => "STATS_ERROR",
            SessionError::DisconnectFatal(_) => "DISCONNECT_FATAL",
            SessionError::NoCachedConfig(_) => "NO_CACHED_CONFIG",
        }
    }

    /// True for failures that come from the consent flow rather than the tunnel
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied
                | SessionError::ActivityUnavailable
                | SessionError::PermissionPending { .. }
                | SessionError::PermissionTimeout
        )
    }
}
