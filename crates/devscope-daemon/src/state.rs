//! Application state management

use anyhow::Result;
use chrono::{DateTime, Utc};
use devscope_core::NameTables;
use devscope_discovery::{DiscoveryFeed, Indexer, ReplayFeed, StaticDeviceInfo};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Live discovery index
    pub indexer: Arc<Indexer>,
    /// Configuration
    pub config: Config,
    pub started: DateTime<Utc>,
}

impl AppState {
    /// Load tables and device records, then start the index with the configured feeds
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let tables = match &config.tables.path {
            Some(path) => {
                let tables = NameTables::load_json(path)?;
                info!(path = %path.display(), "Loaded name tables");
                tables
            }
            None => NameTables::builtin(),
        };

        let device_info = match &config.device_info.path {
            Some(path) => {
                let source = StaticDeviceInfo::load_json(path)?;
                info!(path = %path.display(), devices = source.len(), "Loaded device records");
                source
            }
            None => StaticDeviceInfo::new(),
        };

        let mut feeds: Vec<Arc<dyn DiscoveryFeed>> = Vec::new();
        for feed in &config.feeds {
            if !feed.enabled {
                info!(feed = %feed.display_name(), "Feed disabled in configuration");
                continue;
            }
            if !feed.path.exists() {
                warn!(feed = %feed.display_name(), path = %feed.path.display(), "Feed script not found");
            }
            feeds.push(Arc::new(ReplayFeed::new(feed.domain, feed.display_name(), &feed.path)));
        }

        let indexer = Indexer::start(
            config.index.clone(),
            Arc::new(tables),
            Arc::new(device_info),
            feeds,
        )
        .await?;

        Ok(Self::with_indexer(Arc::new(indexer), config))
    }

    /// Wrap an already running index
    pub fn with_indexer(indexer: Arc<Indexer>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            indexer,
            config,
            started: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use devscope_core::Level;
    use devscope_discovery::{FeedDomain, FeedStatus};
    use std::io::Write;

    #[tokio::test]
    async fn test_state_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("devices.jsonl");
        let mut file = std::fs::File::create(&script).unwrap();
        writeln!(
            file,
            r#"{{"event": "appeared", "id": "dev1", "properties": {{"System.Devices.ClassGuid": {{"type": "guid", "value": "4d36e972-e325-11ce-bfc1-08002be10318"}}}}}}"#
        )
        .unwrap();

        let config = Config {
            feeds: vec![
                FeedConfig {
                    name: None,
                    domain: FeedDomain::Devices,
                    path: script,
                    enabled: true,
                },
                FeedConfig {
                    name: Some("missing".into()),
                    domain: FeedDomain::Advertisements,
                    path: dir.path().join("missing.jsonl"),
                    enabled: true,
                },
                FeedConfig {
                    name: Some("off".into()),
                    domain: FeedDomain::Devices,
                    path: dir.path().join("off.jsonl"),
                    enabled: false,
                },
            ],
            ..Config::default()
        };

        let state = AppState::new(config).await.unwrap();
        state.indexer.settle().await.unwrap();
        assert_eq!(state.indexer.count(Level::Device).await, 1);

        let feeds = state.indexer.feed_status().await;
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].status, FeedStatus::Running);
        assert!(matches!(feeds[1].status, FeedStatus::Inert { .. }));
    }
}
