use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Outcome flag carried by every hub response
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Success,
    Failed,
}

/// Response envelope returned by every hub endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub status: EnvelopeStatus,

    /// Endpoint-specific payload, or a human readable reason on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Peer list (only on `GET /webhook/peers`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<PeerRecord>>,
}

impl Envelope {
    pub fn success() -> Self {
        Self {
            status: EnvelopeStatus::Success,
            result: None,
            peers: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: EnvelopeStatus::Failed,
            result: Some(serde_json::Value::String(reason.into())),
            peers: None,
        }
    }

    pub fn with_result<T: Serialize>(mut self, result: &T) -> Result<Self, serde_json::Error> {
        self.result = Some(serde_json::to_value(result)?);
        Ok(self)
    }

    pub fn with_peers(mut self, peers: Vec<PeerRecord>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == EnvelopeStatus::Success
    }

    /// Decode the `result` payload into a concrete type
    pub fn result_as<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.result
            .as_ref()
            .map(|value| serde_json::from_value(value.clone()))
    }

    /// Reason reported by the hub for a failed call, if it sent one
    pub fn failure_reason(&self) -> Option<String> {
        match &self.result {
            Some(serde_json::Value::String(reason)) => Some(reason.clone()),
            Some(other) if !other.is_null() => Some(other.to_string()),
            _ => None,
        }
    }
}

/// A peer as stored by the hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerRecord {
    #[serde(rename = "_id")]
    pub id: String,

    /// Host octet inside the hub's 10.0.0.0/24 network
    #[serde(deserialize_with = "string_or_number")]
    pub ip: String,

    pub name: String,

    pub public_key: String,

    /// Only returned to the hub owner, used to render client configs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Whether the peer is currently allowed to connect
    #[serde(default)]
    pub connection: bool,
}

/// Body of `POST /webhook/register`
///
/// A first registration sends `interface`, `endpoint` and `uid = "noid"`;
/// logging back in sends only the stored `uid` and the password.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    pub password: String,

    pub uid: String,
}

impl RegisterRequest {
    /// Placeholder uid for a hub that has never been registered
    pub const UNREGISTERED_UID: &'static str = "noid";

    pub fn first_time(interface: &str, endpoint: &str, password: &str) -> Self {
        Self {
            interface: Some(interface.to_string()),
            endpoint: Some(endpoint.to_string()),
            password: password.to_string(),
            uid: Self::UNREGISTERED_UID.to_string(),
        }
    }

    pub fn login(uid: &str, password: &str) -> Self {
        Self {
            interface: None,
            endpoint: None,
            password: password.to_string(),
            uid: uid.to_string(),
        }
    }

    pub fn is_first_time(&self) -> bool {
        self.uid == Self::UNREGISTERED_UID
    }
}

/// `result` payload of a successful registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterResult {
    pub token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Hub server public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Body of `POST /webhook/add`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddPeerRequest {
    pub name: String,
}

/// Body of `POST /webhook/remove`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerRemoveRequest {
    pub id: String,
    pub ip: String,
    pub name: String,
    pub public_key: String,
}

impl From<&PeerRecord> for PeerRemoveRequest {
    fn from(peer: &PeerRecord) -> Self {
        Self {
            id: peer.id.clone(),
            ip: peer.ip.clone(),
            name: peer.name.clone(),
            public_key: peer.public_key.clone(),
        }
    }
}

/// Body of `POST /webhook/block` and `POST /webhook/unblock`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerActionRequest {
    pub id: String,
    pub ip: String,
    pub public_key: String,
    /// Desired connection flag after the call
    pub connection: bool,
}

impl PeerActionRequest {
    pub fn new(peer: &PeerRecord, connection: bool) -> Self {
        Self {
            id: peer.id.clone(),
            ip: peer.ip.clone(),
            public_key: peer.public_key.clone(),
            connection,
        }
    }
}

/// The hub stores the host octet as a number; older deployments send a string
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_record_accepts_numeric_ip() {
        let json = r#"{"_id":"abc","ip":5,"name":"laptop","public_key":"pk","connection":true}"#;
        let peer: PeerRecord = serde_json::from_str(json).unwrap();

        assert_eq!(peer.id, "abc");
        assert_eq!(peer.ip, "5");
        assert!(peer.connection);
        assert!(peer.private_key.is_none());
    }

    #[test]
    fn test_failed_envelope_reason() {
        let json = r#"{"status":"failed","result":"Peer limit reached"}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();

        assert!(!envelope.is_success());
        assert_eq!(envelope.failure_reason().as_deref(), Some("Peer limit reached"));
    }

    #[test]
    fn test_register_result_from_envelope() {
        let json = r#"{"status":"success","result":{"token":"t0k","uid":"u1","id":"1","key":"srvkey"}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();

        let result: RegisterResult = envelope.result_as().unwrap().unwrap();
        assert_eq!(result.token, "t0k");
        assert_eq!(result.key.as_deref(), Some("srvkey"));
    }

    #[test]
    fn test_login_request_omits_first_time_fields() {
        let request = RegisterRequest::login("u1", "secret");
        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("interface").is_none());
        assert!(json.get("endpoint").is_none());
        assert_eq!(json["uid"], "u1");
        assert!(!request.is_first_time());
        assert!(RegisterRequest::first_time("wg0", "hub:8080", "pw").is_first_time());
    }
}
