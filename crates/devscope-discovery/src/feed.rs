//! Discovery feed contract and the in-process channel feed

use async_trait::async_trait;
use devscope_core::{Advertisement, PropertyBag};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::indexer::Command;

/// Well-known property names read by the grouping resolvers
pub mod keys {
    pub const ITEM_NAME_DISPLAY: &str = "System.ItemNameDisplay";
    pub const CLASS_GUID: &str = "System.Devices.ClassGuid";
    pub const DEVICE_INSTANCE_ID: &str = "System.Devices.DeviceInstanceId";
    pub const INTERFACE_ENABLED: &str = "System.Devices.InterfaceEnabled";
    pub const PROTOCOL_ID: &str = "System.Devices.Aep.ProtocolId";
    pub const DEVICE_ADDRESS: &str = "System.Devices.Aep.DeviceAddress";
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Feed not supported on this host: {0}")]
    Unsupported(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Script error at line {line}: {message}")]
    Script { line: usize, message: String },
    #[error("Index is closed")]
    Closed,
}

/// Discovery domain a feed reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedDomain {
    /// Devices already carrying their class GUID
    Devices,
    /// Device interfaces, class learned through a device info lookup
    DeviceInterfaces,
    AssociationEndpoints,
    Advertisements,
}

impl fmt::Display for FeedDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedDomain::Devices => "devices",
            FeedDomain::DeviceInterfaces => "device_interfaces",
            FeedDomain::AssociationEndpoints => "association_endpoints",
            FeedDomain::Advertisements => "advertisements",
        };
        f.write_str(name)
    }
}

/// A single notification emitted by a feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Appeared {
        id: String,
        #[serde(default)]
        properties: PropertyBag,
    },
    Changed {
        id: String,
        #[serde(default)]
        properties: PropertyBag,
    },
    Vanished {
        id: String,
    },
    Advertisement(Advertisement),
}

/// Feed lifecycle as reported to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    Running,
    /// Start failed; the feed contributes nothing
    Inert { reason: String },
    Stopped,
}

/// Entry point into the index's mutation queue, handed to a feed on start
#[derive(Debug, Clone)]
pub struct FeedSink {
    domain: FeedDomain,
    commands: mpsc::UnboundedSender<Command>,
}

impl FeedSink {
    pub(crate) fn new(domain: FeedDomain, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { domain, commands }
    }

    pub fn domain(&self) -> FeedDomain {
        self.domain
    }

    /// Queue a notification. Never blocks; callable from any thread.
    pub fn send(&self, notification: Notification) -> Result<(), FeedError> {
        self.commands
            .send(Command::Notify {
                domain: self.domain,
                notification,
            })
            .map_err(|_| FeedError::Closed)
    }
}

/// A source of discovery notifications for one domain
#[async_trait]
pub trait DiscoveryFeed: Send + Sync {
    fn domain(&self) -> FeedDomain;

    fn name(&self) -> &str;

    /// Begin delivering notifications into `sink`
    async fn start(&self, sink: FeedSink) -> Result<(), FeedError>;

    /// Stop delivering; notifications after this are dropped
    async fn stop(&self);

    /// Resolves once the feed has nothing more to deliver on its own
    async fn settled(&self) {}
}

#[derive(Debug, Default)]
struct ChannelState {
    sink: Option<FeedSink>,
    pending: Vec<Notification>,
    stopped: bool,
}

/// Feed driven by code holding a [`FeedHandle`], e.g. a platform watcher callback
pub struct ChannelFeed {
    domain: FeedDomain,
    name: String,
    unsupported: Option<String>,
    state: Arc<Mutex<ChannelState>>,
}

/// Cloneable, thread-safe producer side of a [`ChannelFeed`]
#[derive(Clone)]
pub struct FeedHandle {
    state: Arc<Mutex<ChannelState>>,
}

fn lock(state: &Mutex<ChannelState>) -> MutexGuard<'_, ChannelState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChannelFeed {
    pub fn new(domain: FeedDomain, name: impl Into<String>) -> (Self, FeedHandle) {
        let state = Arc::new(Mutex::new(ChannelState::default()));
        let feed = Self {
            domain,
            name: name.into(),
            unsupported: None,
            state: state.clone(),
        };
        (feed, FeedHandle { state })
    }

    /// A feed whose start always fails, as when the host lacks the radio
    pub fn unsupported(domain: FeedDomain, name: impl Into<String>, reason: impl Into<String>) -> Self {
        let (mut feed, _) = Self::new(domain, name);
        feed.unsupported = Some(reason.into());
        feed
    }
}

#[async_trait]
impl DiscoveryFeed for ChannelFeed {
    fn domain(&self) -> FeedDomain {
        self.domain
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, sink: FeedSink) -> Result<(), FeedError> {
        if let Some(reason) = &self.unsupported {
            return Err(FeedError::Unsupported(reason.clone()));
        }

        let mut state = lock(&self.state);
        let pending = std::mem::take(&mut state.pending);
        if !pending.is_empty() {
            debug!(feed = %self.name, count = pending.len(), "Releasing buffered notifications");
        }
        for notification in pending {
            sink.send(notification)?;
        }
        state.sink = Some(sink);
        state.stopped = false;
        info!(feed = %self.name, domain = %self.domain, "Feed started");
        Ok(())
    }

    async fn stop(&self) {
        let mut state = lock(&self.state);
        state.sink = None;
        state.pending.clear();
        state.stopped = true;
        info!(feed = %self.name, "Feed stopped");
    }
}

impl FeedHandle {
    pub fn appeared(&self, id: impl Into<String>, properties: PropertyBag) {
        self.emit(Notification::Appeared {
            id: id.into(),
            properties,
        });
    }

    pub fn changed(&self, id: impl Into<String>, properties: PropertyBag) {
        self.emit(Notification::Changed {
            id: id.into(),
            properties,
        });
    }

    pub fn vanished(&self, id: impl Into<String>) {
        self.emit(Notification::Vanished { id: id.into() });
    }

    pub fn advertisement(&self, advertisement: Advertisement) {
        self.emit(Notification::Advertisement(advertisement));
    }

    /// Deliver a notification; buffered before start, dropped after stop
    pub fn emit(&self, notification: Notification) {
        let mut state = lock(&self.state);
        if state.stopped {
            return;
        }
        match &state.sink {
            Some(sink) => {
                if sink.send(notification).is_err() {
                    state.sink = None;
                    state.stopped = true;
                }
            }
            None => state.pending.push(notification),
        }
    }
}
