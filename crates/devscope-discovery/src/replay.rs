//! Replay feed: notifications read from a JSON-lines script
//!
//! Each non-empty line is one notification, optionally delayed:
//!
//! ```text
//! {"event": "appeared", "delay_ms": 50, "id": "dev1", "properties": {...}}
//! {"event": "advertisement", "address": "AA:BB:CC:DD:EE:FF", "advertisement_type": "connectable_undirected"}
//! ```
//!
//! Lines starting with `#` are comments.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::feed::{DiscoveryFeed, FeedDomain, FeedError, FeedSink, Notification};

/// One parsed script step
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    pub delay: Duration,
    pub notification: Notification,
}

/// Parse a replay script
pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>, FeedError> {
    let mut steps = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let script_error = |message: String| FeedError::Script {
            line: index + 1,
            message,
        };

        let mut value: Value = serde_json::from_str(line).map_err(|e| script_error(e.to_string()))?;
        let delay_ms = match value.as_object_mut().and_then(|o| o.remove("delay_ms")) {
            Some(delay) => delay
                .as_u64()
                .ok_or_else(|| script_error("delay_ms must be a non-negative integer".into()))?,
            None => 0,
        };
        let notification: Notification =
            serde_json::from_value(value).map_err(|e| script_error(e.to_string()))?;

        steps.push(ScriptStep {
            delay: Duration::from_millis(delay_ms),
            notification,
        });
    }
    Ok(steps)
}

#[derive(Default)]
struct ReplayState {
    task: Option<JoinHandle<()>>,
    done: Option<watch::Receiver<bool>>,
}

/// Feed that replays a recorded script on its own task
pub struct ReplayFeed {
    domain: FeedDomain,
    name: String,
    path: PathBuf,
    state: Mutex<ReplayState>,
}

impl ReplayFeed {
    pub fn new(domain: FeedDomain, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            domain,
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(ReplayState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DiscoveryFeed for ReplayFeed {
    fn domain(&self) -> FeedDomain {
        self.domain
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, sink: FeedSink) -> Result<(), FeedError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let steps = parse_script(&content)?;
        info!(
            feed = %self.name,
            path = %self.path.display(),
            steps = steps.len(),
            "Replaying discovery script"
        );

        let (done_tx, done_rx) = watch::channel(false);
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            for step in steps {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                if sink.send(step.notification).is_err() {
                    warn!(feed = %name, "Index closed, abandoning replay");
                    break;
                }
            }
            debug!(feed = %name, "Replay finished");
            let _ = done_tx.send(true);
        });

        let mut state = self.state.lock().await;
        if let Some(previous) = state.task.replace(task) {
            previous.abort();
        }
        state.done = Some(done_rx);
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.done = None;
        info!(feed = %self.name, "Feed stopped");
    }

    async fn settled(&self) {
        let done = self.state.lock().await.done.clone();
        if let Some(mut done) = done {
            // An aborted task drops the sender, which also ends the wait
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Command;
    use std::io::Write;
    use tokio::sync::mpsc;

    const SCRIPT: &str = r#"
# two devices
{"event": "appeared", "id": "dev1", "properties": {"System.ItemNameDisplay": {"type": "string", "value": "Mouse"}}}
{"event": "changed", "delay_ms": 5, "id": "dev1", "properties": {}}

{"event": "advertisement", "address": "00:11:22:33:44:55", "advertisement_type": "scan_response", "rssi": -40}
{"event": "vanished", "id": "dev1"}
"#;

    #[test]
    fn test_parse_script() {
        let steps = parse_script(SCRIPT).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[1].delay, Duration::from_millis(5));
        match &steps[2].notification {
            Notification::Advertisement(ad) => {
                assert_eq!(ad.address, 0x001122334455);
                assert_eq!(ad.rssi, -40);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse_script("{\"event\": \"vanished\", \"id\": \"a\"}\n{\"event\": \"exploded\"}").unwrap_err();
        match err {
            FeedError::Script { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_delivers_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCRIPT.as_bytes()).unwrap();

        let feed = ReplayFeed::new(FeedDomain::Devices, "replay", file.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        feed.start(FeedSink::new(FeedDomain::Devices, tx)).await.unwrap();
        feed.settled().await;

        let mut events = Vec::new();
        while let Ok(Command::Notify { notification, .. }) = rx.try_recv() {
            events.push(notification);
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(events[3], Notification::Vanished { .. }));
    }

    #[tokio::test]
    async fn test_missing_script_fails_start() {
        let feed = ReplayFeed::new(FeedDomain::Devices, "replay", "/nonexistent/devscope.jsonl");
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = feed.start(FeedSink::new(FeedDomain::Devices, tx)).await.unwrap_err();
        assert!(matches!(err, FeedError::IoError(_)));
        feed.settled().await;
    }
}
