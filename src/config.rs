//! Plugin Configuration
//!
//! Reads the INI configuration file. Only the `[global]` section is used and
//! its keys are case-insensitive. Connection keys configure the controller
//! client; every other key is a volume option default.
//!
//! ```ini
//! [global]
//! controllers = linstor+ssl://ctrl-1,ctrl-2
//! cafile = /etc/linstor/ca.pem
//! storage-pool = thin
//! replicas = 3
//! fs = xfs
//! ```

use crate::controlplane::backends::ConnectionConfig;
use crate::error::{Error, Result};
use ini::{Ini, ParseOption};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration file read when none is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/linstor/docker-volume.conf";

/// Section holding all settings
pub const GLOBAL_SECTION: &str = "global";

// =============================================================================
// Connection Overrides
// =============================================================================

/// Connection settings taken from the environment; set fields win over the file
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub controllers: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
}

// =============================================================================
// Plugin Configuration
// =============================================================================

/// Parsed configuration file
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    /// Controller connection settings
    pub connection: ConnectionConfig,
    /// Volume option defaults, keys lowercased
    pub defaults: BTreeMap<String, String>,
}

impl PluginConfig {
    /// Load the configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file_opt(path, parse_option()).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(Self::from_ini(&ini))
    }

    /// Parse configuration from INI text
    pub fn parse(content: &str) -> Result<Self> {
        let ini = Ini::load_from_str_opt(content, parse_option())
            .map_err(|e| Error::Configuration(format!("invalid configuration: {}", e)))?;
        Ok(Self::from_ini(&ini))
    }

    fn from_ini(ini: &Ini) -> Self {
        let mut config = Self::default();

        let sections = ini.iter().filter(|(name, _)| {
            name.map_or(false, |n| n.eq_ignore_ascii_case(GLOBAL_SECTION))
        });
        for (_, properties) in sections {
            for (key, value) in properties.iter() {
                config.set(&key.to_lowercase(), value.trim());
            }
        }

        config
    }

    fn set(&mut self, key: &str, value: &str) {
        let connection = &mut self.connection;
        match key {
            "controllers" => connection.controllers = value.to_string(),
            "username" => connection.username = non_empty(value),
            "password" => connection.password = non_empty(value),
            "certfile" => connection.cert_file = non_empty(value).map(PathBuf::from),
            "keyfile" => connection.key_file = non_empty(value).map(PathBuf::from),
            "cafile" => connection.ca_file = non_empty(value).map(PathBuf::from),
            _ => {
                self.defaults.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Apply environment overrides to the connection settings
    pub fn apply_overrides(&mut self, overrides: ConnectionOverrides) {
        let connection = &mut self.connection;
        if let Some(controllers) = overrides.controllers {
            connection.controllers = controllers;
        }
        if overrides.username.is_some() {
            connection.username = overrides.username;
        }
        if overrides.password.is_some() {
            connection.password = overrides.password;
        }
        if overrides.cert_file.is_some() {
            connection.cert_file = overrides.cert_file;
        }
        if overrides.key_file.is_some() {
            connection.key_file = overrides.key_file;
        }
        if overrides.ca_file.is_some() {
            connection.ca_file = overrides.ca_file;
        }
    }
}

/// Values are taken literally; regexes and paths keep their backslashes
fn parse_option() -> ParseOption {
    ParseOption {
        enabled_escape: false,
        ..Default::default()
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::placement::VolumeParams;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
[GLOBAL]
Controllers = linstor+ssl://ctrl-1,ctrl-2
USERNAME = admin
password = secret
cafile = /etc/linstor/ca.pem
Storage-Pool = thin
replicas = 3
fs = xfs

[other]
fs = btrfs
";

    #[test]
    fn test_parse_global_section() {
        let config = PluginConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.connection.controllers, "linstor+ssl://ctrl-1,ctrl-2");
        assert_eq!(config.connection.username.as_deref(), Some("admin"));
        assert_eq!(config.connection.password.as_deref(), Some("secret"));
        assert_eq!(
            config.connection.ca_file,
            Some(PathBuf::from("/etc/linstor/ca.pem"))
        );
        assert_eq!(config.connection.cert_file, None);

        assert_eq!(config.defaults.get("storage-pool").map(String::as_str), Some("thin"));
        assert_eq!(config.defaults.get("fs").map(String::as_str), Some("xfs"));
        assert!(!config.defaults.contains_key("controllers"));
    }

    #[test]
    fn test_defaults_feed_volume_params() {
        let config = PluginConfig::parse(SAMPLE).unwrap();
        let params = VolumeParams::resolve(&config.defaults, None).unwrap();

        assert_eq!(params.replicas, 3);
        assert_eq!(params.fs, "xfs");
        assert_eq!(params.storage_pool, "thin");
    }

    #[test]
    fn test_backslashes_are_kept() {
        let config =
            PluginConfig::parse("[global]\ndo-not-place-with-regex = ^db\\d+$\n").unwrap();

        assert_eq!(
            config.defaults.get("do-not-place-with-regex").map(String::as_str),
            Some("^db\\d+$")
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = PluginConfig::load(Path::new("/nonexistent/docker-volume.conf")).unwrap();
        assert!(config.defaults.is_empty());
        assert_eq!(
            config.connection.base_url().unwrap(),
            "http://localhost:3370"
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();

        let config = PluginConfig::load(file.path()).unwrap();
        assert_eq!(config.connection.base_url().unwrap(), "https://ctrl-1:3371");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        assert_matches!(
            PluginConfig::parse("[global\nfs = xfs"),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_environment_wins() {
        let mut config = PluginConfig::parse(SAMPLE).unwrap();
        config.apply_overrides(ConnectionOverrides {
            controllers: Some("http://ctrl-env".into()),
            password: Some("from-env".into()),
            ..Default::default()
        });

        assert_eq!(config.connection.controllers, "http://ctrl-env");
        assert_eq!(config.connection.password.as_deref(), Some("from-env"));
        assert_eq!(config.connection.username.as_deref(), Some("admin"));
    }
}
