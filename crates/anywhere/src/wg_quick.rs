//! wg-quick / wg tools backend
//!
//! Uses the `wg-quick` and `wg` CLI tools, which must be installed and
//! usually need root. Each tunnel is written to `<interface_dir>/<name>.conf`
//! before being brought up.

use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anywhere_core::profile::is_valid_tunnel_name;
use anywhere_core::{
    ActivationConfig, BackendError, InterfaceState, ServiceControl, TrafficCounters, TunnelHandle,
    VpnBackend,
};

pub struct WgQuickBackend {
    interface_dir: PathBuf,
    wg_quick: String,
    wg: String,
}

impl WgQuickBackend {
    pub fn new(interface_dir: PathBuf, wg_quick: String, wg: String) -> Self {
        Self {
            interface_dir,
            wg_quick,
            wg,
        }
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.interface_dir.join(format!("{}.conf", name))
    }

    fn write_config(&self, path: &Path, text: &str) -> Result<(), BackendError> {
        std::fs::create_dir_all(&self.interface_dir).map_err(|e| {
            BackendError::new(format!(
                "Failed to create {}: {}",
                self.interface_dir.display(),
                e
            ))
        })?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(path)
            .map_err(|e| BackendError::new(format!("Failed to write {}: {}", path.display(), e)))?;
        file.write_all(text.as_bytes())
            .map_err(|e| BackendError::new(format!("Failed to write {}: {}", path.display(), e)))
    }
}

impl VpnBackend for WgQuickBackend {
    fn set_state(
        &self,
        handle: &TunnelHandle,
        state: InterfaceState,
        config: Option<&ActivationConfig>,
    ) -> Result<(), BackendError> {
        let name = handle.name();
        if !is_valid_tunnel_name(name) {
            return Err(BackendError::new(format!(
                "'{}' is not a valid interface name",
                name
            )));
        }

        let path = self.config_path(name);
        match state {
            InterfaceState::Up => {
                let config = config
                    .ok_or_else(|| BackendError::new("No configuration supplied for up"))?;
                self.write_config(&path, &config.text)?;
                tracing::debug!("Wrote {} ({} peers)", path.display(), config.parsed.peers.len());
                run(&self.wg_quick, &[OsStr::new("up"), path.as_os_str()])?;
            }
            InterfaceState::Down => {
                // Without our config file wg-quick falls back to its own lookup
                let target: OsString = if path.exists() {
                    path.into_os_string()
                } else {
                    name.into()
                };
                run(&self.wg_quick, &[OsStr::new("down"), target.as_os_str()])?;
            }
        }
        Ok(())
    }

    fn statistics(&self, handle: &TunnelHandle) -> Result<TrafficCounters, BackendError> {
        let output = run(
            &self.wg,
            &[OsStr::new("show"), OsStr::new(handle.name()), OsStr::new("transfer")],
        )?;
        parse_transfer(&output)
    }
}

/// Deletes the interface outright in case wg-quick left it behind
pub struct IpLinkServiceControl {
    ip: String,
}

impl IpLinkServiceControl {
    pub fn new(ip: String) -> Self {
        Self { ip }
    }
}

impl ServiceControl for IpLinkServiceControl {
    fn stop_service(&self, handle: &TunnelHandle) -> Result<(), BackendError> {
        match run(
            &self.ip,
            &[
                OsStr::new("link"),
                OsStr::new("delete"),
                OsStr::new("dev"),
                OsStr::new(handle.name()),
            ],
        ) {
            Ok(_) => Ok(()),
            Err(e) if e.reason.contains("Cannot find device") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn run(program: &str, args: &[&OsStr]) -> Result<String, BackendError> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackendError::new(format!("'{}' not found. Install wireguard-tools", program))
        } else {
            BackendError::new(format!("Failed to execute '{}': {}", program, e))
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim();
        return Err(BackendError::new(if message.is_empty() {
            format!("'{}' exited with {}", program, output.status)
        } else {
            message.to_string()
        }));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Sum `wg show <if> transfer` output (`<peer>\t<rx>\t<tx>` per line)
fn parse_transfer(output: &str) -> Result<TrafficCounters, BackendError> {
    let mut counters = TrafficCounters::default();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split_whitespace().skip(1);
        let (Some(rx), Some(tx)) = (fields.next(), fields.next()) else {
            return Err(BackendError::new(format!("Unexpected wg output: {}", line)));
        };

        let parse = |v: &str| {
            v.parse::<u64>()
                .map_err(|_| BackendError::new(format!("Unexpected wg counter: {}", v)))
        };
        counters.total_rx = counters.total_rx.saturating_add(parse(rx)?);
        counters.total_tx = counters.total_tx.saturating_add(parse(tx)?);
    }

    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfer_sums_peers() {
        let output = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\t1000\t200\n\
                      TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=\t24\t56\n";
        let counters = parse_transfer(output).unwrap();

        assert_eq!(counters.total_rx, 1024);
        assert_eq!(counters.total_tx, 256);
    }

    #[test]
    fn test_parse_transfer_empty_and_garbage() {
        assert_eq!(parse_transfer("").unwrap(), TrafficCounters::default());
        assert!(parse_transfer("peer\tlots\t1\n").is_err());
        assert!(parse_transfer("peer-only\n").is_err());
    }

    #[test]
    fn test_config_written_private() {
        let dir = tempfile::tempdir().unwrap();
        let backend = WgQuickBackend::new(dir.path().join("wg"), "wg-quick".into(), "wg".into());
        let path = backend.config_path("wg0");

        backend.write_config(&path, "[Interface]\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[Interface]\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
