//! Wire types shared by the hub client and the mock hub used in tests.
//!
//! The hub answers every call with a JSON envelope whose `status` field is
//! either `"success"` or `"failed"`; payloads ride in `result` or `peers`.

mod messages;

pub use messages::{
    AddPeerRequest, Envelope, EnvelopeStatus, PeerActionRequest, PeerRecord, PeerRemoveRequest,
    RegisterRequest, RegisterResult,
};

/// Path prefix for every hub endpoint
pub const WEBHOOK_PREFIX: &str = "/webhook";
