//! Anywhere configuration management
//!
//! Settings live in `~/.config/anywhere/config.toml`. Every field has a
//! default, so the file is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anywhere_core::CoordinatorConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding `store_path`
pub const STORE_ENV: &str = "ANYWHERE_STORE";

/// Environment variable overriding `interface_dir`
pub const INTERFACE_DIR_ENV: &str = "ANYWHERE_INTERFACE_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// JSON document holding start markers, profiles and hub credentials
    pub store_path: String,

    /// Where `<name>.conf` files are written for wg-quick
    pub interface_dir: String,

    pub sample_interval_ms: u64,

    /// EMA factor for displayed rates (1.0 = raw)
    pub smoothing: f64,

    pub permission_timeout_secs: u64,

    /// Executables, resolved through PATH unless absolute
    pub wg_quick: String,
    pub wg: String,
    pub ip: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let store_path = dirs::data_dir()
            .map(|dir| dir.join("anywhere").join("store.json"))
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|| "~/.anywhere/store.json".to_string());

        Self {
            store_path,
            interface_dir: "/etc/wireguard".to_string(),
            sample_interval_ms: 1000,
            smoothing: 0.5,
            permission_timeout_secs: 120,
            wg_quick: "wg-quick".to_string(),
            wg: "wg".to_string(),
            ip: "ip".to_string(),
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("anywhere")
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` (or the default location), falling back to defaults when
    /// the default file does not exist, then apply environment overrides
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None if Self::default_path().exists() => Self::load(&Self::default_path())?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(store) = lookup(STORE_ENV) {
            self.store_path = store;
        }
        if let Some(dir) = lookup(INTERFACE_DIR_ENV) {
            self.interface_dir = dir;
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.store_path).as_ref())
    }

    pub fn interface_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.interface_dir).as_ref())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            sample_interval: Duration::from_millis(self.sample_interval_ms.max(1)),
            smoothing: self.smoothing,
            permission_timeout: Duration::from_secs(self.permission_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig = toml::from_str("smoothing = 1.0\nwg = \"/usr/bin/wg\"\n").unwrap();

        assert_eq!(config.smoothing, 1.0);
        assert_eq!(config.wg, "/usr/bin/wg");
        assert_eq!(config.wg_quick, "wg-quick");
        assert_eq!(config.coordinator_config().sample_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            STORE_ENV => Some("/tmp/anywhere.json".to_string()),
            _ => None,
        });

        assert_eq!(config.store_path(), PathBuf::from("/tmp/anywhere.json"));
        assert_eq!(config.interface_dir(), PathBuf::from("/etc/wireguard"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anywhere").join("config.toml");

        let mut config = AppConfig::default();
        config.permission_timeout_secs = 30;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }
}
