//! Configuration loading

use anyhow::Result;
use devscope_discovery::{FeedDomain, IndexConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub device_info: DeviceInfoConfig,
    #[serde(default, rename = "feed")]
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the HTTP/WebSocket server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

/// Extra names merged over the built-in lookup tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Device records answering class lookups for interface feeds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfoConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// A replayed discovery feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub domain: FeedDomain,
    /// JSON-lines script
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl FeedConfig {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.domain.to_string())
    }
}

impl Config {
    /// Resolve relative file paths against `base`
    fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(path) = self.tables.path.as_mut() {
            resolve(path);
        }
        if let Some(path) = self.device_info.path.as_mut() {
            resolve(path);
        }
        for feed in &mut self.feeds {
            resolve(&mut feed.path);
        }
        self
    }
}

/// Load configuration from file; a missing file yields the defaults
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        let base = path.parent().unwrap_or(Path::new("."));
        info!(path = %path.display(), feeds = config.feeds.len(), "Loaded configuration");
        Ok(config.relative_to(base))
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/devscope.toml")).unwrap();
        assert_eq!(config.daemon.bind, "127.0.0.1:7878");
        assert!(config.index.unknown_class_fallback);
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devscope.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[daemon]
bind = "0.0.0.0:9000"

[index]
unknown_class_fallback = false
event_capacity = 16

[device_info]
path = "devices.json"

[[feed]]
domain = "association_endpoints"
path = "scripts/endpoints.jsonl"

[[feed]]
name = "ble"
domain = "advertisements"
path = "/var/lib/devscope/ble.jsonl"
enabled = false
"#
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.daemon.bind, "0.0.0.0:9000");
        assert!(!config.index.unknown_class_fallback);
        assert_eq!(config.index.event_capacity, 16);
        assert_eq!(config.device_info.path, Some(dir.path().join("devices.json")));
        assert!(config.tables.path.is_none());

        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].domain, FeedDomain::AssociationEndpoints);
        assert_eq!(config.feeds[0].path, dir.path().join("scripts/endpoints.jsonl"));
        assert_eq!(config.feeds[0].display_name(), "association_endpoints");
        assert!(config.feeds[0].enabled);
        assert_eq!(config.feeds[1].path, PathBuf::from("/var/lib/devscope/ble.jsonl"));
        assert!(!config.feeds[1].enabled);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devscope.toml");
        std::fs::write(&path, "[[feed]]\ndomain = \"telepathy\"\npath = \"x\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
