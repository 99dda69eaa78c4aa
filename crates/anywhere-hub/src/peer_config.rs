use anywhere_common::{Endpoint, InterfaceConfig, IpNet, PeerConfig, TunnelConfig, WgKey};
use anywhere_protocol::PeerRecord;

use crate::credentials::HubCredentials;
use crate::error::HubError;

/// Port the hub's WireGuard server listens on
pub const WIREGUARD_PORT: u16 = 51820;

const HUB_NETWORK: [u8; 3] = [10, 0, 0];
const PEER_PREFIX: u8 = 24;
const PEER_DNS: [u8; 4] = [8, 8, 8, 8];
const KEEPALIVE_SECS: u16 = 25;

/// Render the WireGuard config a peer device imports to reach the hub
pub fn client_config(peer: &PeerRecord, credentials: &HubCredentials) -> Result<String, HubError> {
    let private_key = peer
        .private_key
        .as_deref()
        .ok_or_else(|| HubError::MissingPrivateKey(peer.name.clone()))?;
    let private_key: WgKey = private_key
        .parse()
        .map_err(|e| HubError::Decode(format!("peer private key: {}", e)))?;

    let server_key: WgKey = credentials
        .key
        .as_deref()
        .ok_or_else(|| HubError::Decode("hub public key unknown; log in again".to_string()))?
        .parse()
        .map_err(|e| HubError::Decode(format!("hub public key: {}", e)))?;

    let octet: u8 = peer
        .ip
        .parse()
        .map_err(|_| HubError::Decode(format!("peer address octet '{}'", peer.ip)))?;
    let [a, b, c] = HUB_NETWORK;

    let config = TunnelConfig {
        interface: InterfaceConfig {
            private_key,
            addresses: vec![IpNet::new([a, b, c, octet].into(), PEER_PREFIX)],
            dns: vec![PEER_DNS.into()],
            dns_search: Vec::new(),
            listen_port: None,
            mtu: None,
            extras: Vec::new(),
        },
        peers: vec![PeerConfig {
            public_key: server_key,
            preshared_key: None,
            allowed_ips: vec![
                IpNet::new([0, 0, 0, 0].into(), 0),
                IpNet::new(std::net::Ipv6Addr::UNSPECIFIED.into(), 0),
            ],
            endpoint: Some(Endpoint {
                host: credentials.host().to_string(),
                port: WIREGUARD_PORT,
            }),
            persistent_keepalive: Some(KEEPALIVE_SECS),
        }],
    };

    Ok(config.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER_PRIVATE: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
    const HUB_PUBLIC: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn credentials() -> HubCredentials {
        HubCredentials {
            uid: "u1".into(),
            id: None,
            endpoint: "hub.example.com:8080".into(),
            token: "t".into(),
            key: Some(HUB_PUBLIC.into()),
            login: true,
        }
    }

    fn peer(private_key: Option<&str>) -> PeerRecord {
        PeerRecord {
            id: "p1".into(),
            ip: "7".into(),
            name: "laptop".into(),
            public_key: "ignored".into(),
            private_key: private_key.map(str::to_string),
            connection: true,
        }
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let text = client_config(&peer(Some(PEER_PRIVATE)), &credentials()).unwrap();
        let config = TunnelConfig::parse(&text).unwrap();

        assert_eq!(config.interface.addresses[0].to_string(), "10.0.0.7/24");
        assert_eq!(config.interface.dns[0].to_string(), "8.8.8.8");
        assert_eq!(config.peers[0].public_key.to_base64(), HUB_PUBLIC);
        assert_eq!(config.peers[0].allowed_ips.len(), 2);
        assert_eq!(
            config.peers[0].endpoint.as_ref().unwrap().to_string(),
            "hub.example.com:51820"
        );
        assert_eq!(config.peers[0].persistent_keepalive, Some(25));
    }

    #[test]
    fn test_requires_private_key() {
        assert!(matches!(
            client_config(&peer(None), &credentials()),
            Err(HubError::MissingPrivateKey(_))
        ));
    }
}
