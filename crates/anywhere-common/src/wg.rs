//! WireGuard configuration text (`[Interface]` / `[Peer]` blocks)
//!
//! Parsing is deliberately strict about the keys `wg` itself understands and
//! lenient about the `wg-quick` extras (`PostUp`, `Table`, ...), which are kept
//! verbatim so the text can be re-rendered without losing them.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ConfigError;

/// Keys understood by `wg-quick` but not by the tunnel itself
const WG_QUICK_KEYS: &[&str] = &[
    "Table", "PreUp", "PostUp", "PreDown", "PostDown", "SaveConfig", "FwMark",
];

/// A 32-byte Curve25519 key in WireGuard's base64 form
#[derive(Clone, PartialEq, Eq)]
pub struct WgKey([u8; 32]);

impl WgKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl FromStr for WgKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = STANDARD
            .decode(s.trim())
            .map_err(|e| format!("not valid base64 ({})", e))?;

        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| format!("expected 32 bytes, got {}", v.len()))?;

        Ok(Self(bytes))
    }
}

// Keys never show up in logs
impl fmt::Debug for WgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WgKey(***)")
    }
}

/// An address with a CIDR prefix (`10.0.0.2/24`, `::/0`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNet {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl IpNet {
    pub fn new(addr: IpAddr, prefix: u8) -> Self {
        Self { addr, prefix }
    }

    fn max_prefix(addr: &IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }
}

impl FromStr for IpNet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((addr, prefix)) => (addr.trim(), Some(prefix.trim())),
            None => (s.trim(), None),
        };

        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| format!("'{}' is not an IP address", addr_part))?;
        let max = Self::max_prefix(&addr);

        let prefix = match prefix_part {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| format!("prefix '{}' out of range (0-{})", p, max))?,
            None => max,
        };

        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Peer endpoint; the host may be a DNS name resolved by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            rest.split_once("]:")
                .ok_or_else(|| "bracketed IPv6 endpoint must be [addr]:port".to_string())?
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| "endpoint must be host:port".to_string())?
        };

        if host.is_empty() {
            return Err("endpoint host is empty".to_string());
        }
        if !s.starts_with('[') && host.contains(':') {
            return Err("IPv6 endpoints must be written as [addr]:port".to_string());
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| format!("'{}' is not a valid port", port))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The `[Interface]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub private_key: WgKey,
    pub addresses: Vec<IpNet>,
    pub dns: Vec<IpAddr>,
    /// Non-IP `DNS` entries, used by wg-quick as search domains
    pub dns_search: Vec<String>,
    pub listen_port: Option<u16>,
    pub mtu: Option<u16>,
    /// wg-quick keys carried through untouched
    pub extras: Vec<(String, String)>,
}

/// A `[Peer]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: WgKey,
    pub preshared_key: Option<WgKey>,
    pub allowed_ips: Vec<IpNet>,
    pub endpoint: Option<Endpoint>,
    pub persistent_keepalive: Option<u16>,
}

/// A complete tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub interface: InterfaceConfig,
    pub peers: Vec<PeerConfig>,
}

impl TunnelConfig {
    /// Parse WireGuard configuration text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut section = Section::None;
        let mut interface: Option<InterfaceBuilder> = None;
        let mut peers: Vec<PeerBuilder> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }

            if let Some(name) = content
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                match name.trim().to_ascii_lowercase().as_str() {
                    "interface" => {
                        if interface.is_some() {
                            return Err(ConfigError::DuplicateInterface { line });
                        }
                        interface = Some(InterfaceBuilder::default());
                        section = Section::Interface;
                    }
                    "peer" => {
                        peers.push(PeerBuilder::default());
                        section = Section::Peer;
                    }
                    other => {
                        return Err(ConfigError::UnknownSection {
                            line,
                            section: other.to_string(),
                        })
                    }
                }
                continue;
            }

            let (key, value) = content
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or(ConfigError::MalformedLine { line })?;

            match section {
                Section::None => return Err(ConfigError::KeyOutsideSection { line }),
                Section::Interface => interface
                    .as_mut()
                    .ok_or(ConfigError::KeyOutsideSection { line })?
                    .apply(line, key, value)?,
                Section::Peer => peers
                    .last_mut()
                    .ok_or(ConfigError::KeyOutsideSection { line })?
                    .apply(line, key, value)?,
            }
        }

        let interface = interface
            .ok_or(ConfigError::MissingSection("Interface"))?
            .build()?;

        if peers.is_empty() {
            return Err(ConfigError::MissingSection("Peer"));
        }

        let peers = peers
            .into_iter()
            .map(PeerBuilder::build)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { interface, peers })
    }
}

impl FromStr for TunnelConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = &self.interface;
        writeln!(f, "[Interface]")?;
        writeln!(f, "PrivateKey = {}", iface.private_key.to_base64())?;
        if !iface.addresses.is_empty() {
            writeln!(f, "Address = {}", join(&iface.addresses))?;
        }
        if !iface.dns.is_empty() || !iface.dns_search.is_empty() {
            let mut entries: Vec<String> = iface.dns.iter().map(|d| d.to_string()).collect();
            entries.extend(iface.dns_search.iter().cloned());
            writeln!(f, "DNS = {}", entries.join(", "))?;
        }
        if let Some(port) = iface.listen_port {
            writeln!(f, "ListenPort = {}", port)?;
        }
        if let Some(mtu) = iface.mtu {
            writeln!(f, "MTU = {}", mtu)?;
        }
        for (key, value) in &iface.extras {
            writeln!(f, "{} = {}", key, value)?;
        }

        for peer in &self.peers {
            writeln!(f)?;
            writeln!(f, "[Peer]")?;
            writeln!(f, "PublicKey = {}", peer.public_key.to_base64())?;
            if let Some(psk) = &peer.preshared_key {
                writeln!(f, "PresharedKey = {}", psk.to_base64())?;
            }
            if !peer.allowed_ips.is_empty() {
                writeln!(f, "AllowedIPs = {}", join(&peer.allowed_ips))?;
            }
            if let Some(endpoint) = &peer.endpoint {
                writeln!(f, "Endpoint = {}", endpoint)?;
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                writeln!(f, "PersistentKeepalive = {}", keepalive)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Section {
    None,
    Interface,
    Peer,
}

#[derive(Default)]
struct InterfaceBuilder {
    private_key: Option<WgKey>,
    addresses: Vec<IpNet>,
    dns: Vec<IpAddr>,
    dns_search: Vec<String>,
    listen_port: Option<u16>,
    mtu: Option<u16>,
    extras: Vec<(String, String)>,
}

impl InterfaceBuilder {
    fn apply(&mut self, line: usize, key: &str, value: &str) -> Result<(), ConfigError> {
        match key.to_ascii_lowercase().as_str() {
            "privatekey" => set_once(&mut self.private_key, line, key, parse_value(line, key, value)?),
            "address" => {
                self.addresses.extend(parse_list::<IpNet>(line, key, value)?);
                Ok(())
            }
            "dns" => {
                for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                    match entry.parse::<IpAddr>() {
                        Ok(addr) => self.dns.push(addr),
                        Err(_) if !entry.contains(char::is_whitespace) => {
                            self.dns_search.push(entry.to_string())
                        }
                        Err(_) => {
                            return Err(ConfigError::invalid(
                                line,
                                key,
                                format!("'{}' is neither an address nor a domain", entry),
                            ))
                        }
                    }
                }
                Ok(())
            }
            "listenport" => set_once(&mut self.listen_port, line, key, parse_value(line, key, value)?),
            "mtu" => set_once(&mut self.mtu, line, key, parse_value(line, key, value)?),
            _ => match WG_QUICK_KEYS.iter().find(|k| k.eq_ignore_ascii_case(key)) {
                Some(canonical) => {
                    self.extras.push((canonical.to_string(), value.to_string()));
                    Ok(())
                }
                None => Err(ConfigError::UnknownKey {
                    line,
                    key: key.to_string(),
                }),
            },
        }
    }

    fn build(self) -> Result<InterfaceConfig, ConfigError> {
        Ok(InterfaceConfig {
            private_key: self.private_key.ok_or(ConfigError::MissingKey {
                section: "Interface",
                key: "PrivateKey",
            })?,
            addresses: self.addresses,
            dns: self.dns,
            dns_search: self.dns_search,
            listen_port: self.listen_port,
            mtu: self.mtu,
            extras: self.extras,
        })
    }
}

#[derive(Default)]
struct PeerBuilder {
    public_key: Option<WgKey>,
    preshared_key: Option<WgKey>,
    allowed_ips: Vec<IpNet>,
    endpoint: Option<Endpoint>,
    persistent_keepalive: Option<u16>,
}

impl PeerBuilder {
    fn apply(&mut self, line: usize, key: &str, value: &str) -> Result<(), ConfigError> {
        match key.to_ascii_lowercase().as_str() {
            "publickey" => set_once(&mut self.public_key, line, key, parse_value(line, key, value)?),
            "presharedkey" => {
                set_once(&mut self.preshared_key, line, key, parse_value(line, key, value)?)
            }
            "allowedips" => {
                self.allowed_ips.extend(parse_list::<IpNet>(line, key, value)?);
                Ok(())
            }
            "endpoint" => set_once(&mut self.endpoint, line, key, parse_value(line, key, value)?),
            "persistentkeepalive" => {
                // "off" is wg's spelling of 0
                if value.eq_ignore_ascii_case("off") {
                    return Ok(());
                }
                let seconds: u16 = parse_value(line, key, value)?;
                if seconds > 0 {
                    set_once(&mut self.persistent_keepalive, line, key, seconds)?;
                }
                Ok(())
            }
            _ => Err(ConfigError::UnknownKey {
                line,
                key: key.to_string(),
            }),
        }
    }

    fn build(self) -> Result<PeerConfig, ConfigError> {
        Ok(PeerConfig {
            public_key: self.public_key.ok_or(ConfigError::MissingKey {
                section: "Peer",
                key: "PublicKey",
            })?,
            preshared_key: self.preshared_key,
            allowed_ips: self.allowed_ips,
            endpoint: self.endpoint,
            persistent_keepalive: self.persistent_keepalive,
        })
    }
}

fn set_once<T>(slot: &mut Option<T>, line: usize, key: &str, value: T) -> Result<(), ConfigError> {
    if slot.is_some() {
        return Err(ConfigError::DuplicateKey {
            line,
            key: key.to_string(),
        });
    }
    *slot = Some(value);
    Ok(())
}

fn parse_value<T>(line: usize, key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(line, key, e.to_string()))
}

fn parse_list<T>(line: usize, key: &str, value: &str) -> Result<Vec<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_value(line, key, entry))
        .collect()
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
