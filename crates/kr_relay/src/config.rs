use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "keyrelay";
pub const APP_NAME: &str = "keyrelay";

pub const CONFIG_FILE: &str = "config.json";
pub const DATABASE_FILE: &str = "keyrelay.db";

pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Relay settings. Every field has a default, so a partial (or absent)
/// config file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bound into every challenge; distinct per relay deployment.
    pub server_id: String,
    /// Defaults to `keyrelay.db` in the data directory.
    pub database_path: Option<PathBuf>,
    pub listen_addr: String,
    /// Environment variable holding the connection auth secret.
    pub auth_secret_env: String,
    /// Environment variable holding the vault passphrase.
    pub passphrase_env: String,
    pub busy_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_id: "keyrelay".into(),
            database_path: None,
            listen_addr: "127.0.0.1:7400".into(),
            auth_secret_env: "KEYRELAY_AUTH_SECRET".into(),
            passphrase_env: "KEYRELAY_PASSPHRASE".into(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl RelayConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| data_dir.join(DATABASE_FILE))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Connection auth secret from the configured environment variable.
    pub fn auth_secret(&self) -> Result<Vec<u8>> {
        let secret = std::env::var(&self.auth_secret_env)
            .map_err(|_| anyhow!("{} is not set", self.auth_secret_env))?;
        if secret.len() < 32 {
            return Err(anyhow!("{} must be at least 32 characters", self.auth_secret_env));
        }
        Ok(secret.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"server_id":"relay-eu-1","busy_timeout_ms":250}"#).unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.server_id, "relay-eu-1");
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.listen_addr, RelayConfig::default().listen_addr);
        assert_eq!(config.database_path(dir.path()), dir.path().join(DATABASE_FILE));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = RelayConfig { server_id: "relay-2".into(), ..RelayConfig::default() };
        config.save(&path).unwrap();
        assert_eq!(RelayConfig::load(&path).unwrap(), config);
    }
}
