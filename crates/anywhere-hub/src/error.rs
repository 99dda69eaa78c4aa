use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The hub answered with `status: "failed"`
    #[error("Hub error: {0}")]
    Api(String),

    #[error("Unexpected hub response: {0}")]
    Decode(String),

    #[error("Not logged in to a hub")]
    NotLoggedIn,

    #[error("Peer '{0}' has no private key; only the hub owner can render its config")]
    MissingPrivateKey(String),

    #[error(transparent)]
    Store(#[from] anywhere_store::StoreError),
}
