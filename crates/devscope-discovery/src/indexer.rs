//! Single-writer indexer
//!
//! Every feed pushes into one unbounded command queue. A single writer task
//! drains it and is the only holder of the tree's write lock. Class lookups
//! run on their own tasks and re-enter the queue with their result. Readers
//! take the read lock briefly and copy out detached views.

use devscope_core::{
    guids, IndexEvent, IndexTree, Level, NameTables, NodeId, NodeView, PropertyView, TreeError,
    TreeSnapshot,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::feed::{DiscoveryFeed, FeedDomain, FeedSink, FeedStatus, Notification};
use crate::info::{DeviceInfo, DeviceInfoSource, LookupError};
use crate::resolver::Resolver;

/// Indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Group devices whose class lookup failed under the unknown class
    pub unknown_class_fallback: bool,
    /// Change broadcast buffer per subscriber
    pub event_capacity: usize,
    /// Protocol group searched for endpoints owning an advertisement's address
    pub advertisement_protocol: Uuid,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            unknown_class_fallback: true,
            event_capacity: 256,
            advertisement_protocol: guids::PROTOCOL_BLUETOOTH_LE,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum IndexerError {
    #[error("Index is closed")]
    Closed,
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),
}

/// A feed and its lifecycle state
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    pub name: String,
    pub domain: FeedDomain,
    pub status: FeedStatus,
}

#[derive(Debug)]
pub(crate) enum Command {
    Notify {
        domain: FeedDomain,
        notification: Notification,
    },
    ClassLearned {
        instance: String,
        result: Result<DeviceInfo, LookupError>,
    },
    EnsureLoaded {
        id: NodeId,
        reply: oneshot::Sender<Result<bool, IndexerError>>,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Live discovery index
pub struct Indexer {
    tree: Arc<RwLock<IndexTree>>,
    tables: Arc<NameTables>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<IndexEvent>,
    feeds: Vec<Arc<dyn DiscoveryFeed>>,
    statuses: RwLock<Vec<FeedInfo>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Indexer {
    /// Build the tree, spawn the writer and start every feed.
    ///
    /// A feed that fails to start is marked inert; the others run regardless.
    pub async fn start(
        config: IndexConfig,
        tables: Arc<NameTables>,
        device_info: Arc<dyn DeviceInfoSource>,
        feeds: Vec<Arc<dyn DiscoveryFeed>>,
    ) -> Result<Self, IndexerError> {
        let mut tree = IndexTree::new("Index");
        let resolver = Resolver::new(config.clone(), tables.clone(), &mut tree)?;
        tree.take_changes();
        let tree = Arc::new(RwLock::new(tree));

        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let writer = Writer {
            tree: tree.clone(),
            resolver,
            device_info,
            events: events.clone(),
            commands: commands.downgrade(),
            lookups: JoinSet::new(),
            waiting: Vec::new(),
        };
        let writer = tokio::spawn(writer.run(rx));

        let mut statuses = Vec::with_capacity(feeds.len());
        for feed in &feeds {
            let sink = FeedSink::new(feed.domain(), commands.clone());
            let status = match feed.start(sink).await {
                Ok(()) => FeedStatus::Running,
                Err(e) => {
                    warn!(
                        feed = %feed.name(),
                        domain = %feed.domain(),
                        error = %e,
                        "Feed failed to start, marked inert"
                    );
                    FeedStatus::Inert {
                        reason: e.to_string(),
                    }
                }
            };
            statuses.push(FeedInfo {
                name: feed.name().to_string(),
                domain: feed.domain(),
                status,
            });
        }

        info!(feeds = feeds.len(), "Indexer started");

        Ok(Self {
            tree,
            tables,
            commands,
            events,
            feeds,
            statuses: RwLock::new(statuses),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn tables(&self) -> &NameTables {
        &self.tables
    }

    /// Subscribe to tree changes
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    pub async fn root(&self) -> NodeId {
        self.tree.read().await.root()
    }

    pub async fn node(&self, id: NodeId) -> Option<NodeView> {
        self.tree.read().await.get(id).map(NodeView::from)
    }

    /// Children of `id` in ascending case-insensitive name order
    pub async fn children_of(&self, id: NodeId) -> Option<Vec<NodeView>> {
        let tree = self.tree.read().await;
        tree.get(id)?;
        Some(tree.children(id).map(NodeView::from).collect())
    }

    /// Property grid rows of `id`, sorted by name
    pub async fn properties(&self, id: NodeId) -> Option<Vec<PropertyView>> {
        let tree = self.tree.read().await;
        tree.get(id).map(|node| node.property_views(&self.tables))
    }

    pub async fn find(&self, level: Level, key: &str) -> Option<NodeId> {
        self.tree.read().await.find(level, key)
    }

    pub async fn count(&self, level: Level) -> usize {
        self.tree.read().await.count(level)
    }

    /// Full tree as a nested copy
    pub async fn snapshot(&self) -> Option<TreeSnapshot> {
        let tree = self.tree.read().await;
        tree.snapshot(tree.root())
    }

    pub async fn feed_status(&self) -> Vec<FeedInfo> {
        self.statuses.read().await.clone()
    }

    /// Mark a node's children as loaded; true on the first call for that node
    pub async fn ensure_children_loaded(&self, id: NodeId) -> Result<bool, IndexerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::EnsureLoaded { id, reply })
            .map_err(|_| IndexerError::Closed)?;
        rx.await.map_err(|_| IndexerError::Closed)?
    }

    /// Wait until everything queued so far, and the lookups it started, is applied
    pub async fn flush(&self) -> Result<(), IndexerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush(reply))
            .map_err(|_| IndexerError::Closed)?;
        rx.await.map_err(|_| IndexerError::Closed)
    }

    /// Wait for every feed to run dry, then flush
    pub async fn settle(&self) -> Result<(), IndexerError> {
        for feed in &self.feeds {
            feed.settled().await;
        }
        self.flush().await
    }

    /// Stop every feed, then the writer. Later commands fail with `Closed`.
    pub async fn shutdown(&self) {
        for feed in &self.feeds {
            feed.stop().await;
        }
        for info in self.statuses.write().await.iter_mut() {
            if info.status == FeedStatus::Running {
                info.status = FeedStatus::Stopped;
            }
        }

        let _ = self.commands.send(Command::Shutdown);
        if let Some(writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.await {
                warn!(error = %e, "Index writer ended abnormally");
            }
        }
    }
}

impl Drop for Indexer {
    // Feeds keep senders alive, so the writer only ends when told to
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Writer {
    tree: Arc<RwLock<IndexTree>>,
    resolver: Resolver,
    device_info: Arc<dyn DeviceInfoSource>,
    events: broadcast::Sender<IndexEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
    lookups: JoinSet<()>,
    waiting: Vec<oneshot::Sender<()>>,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Notify {
                    domain,
                    notification,
                } => {
                    let lookup = {
                        let mut tree = self.tree.write().await;
                        let lookup = self.resolver.apply(&mut tree, domain, notification);
                        publish(&self.events, &mut tree);
                        lookup
                    };
                    if let Some(instance) = lookup {
                        self.spawn_lookup(instance);
                    }
                }
                Command::ClassLearned { instance, result } => {
                    {
                        let mut tree = self.tree.write().await;
                        if let Err(e) = self.resolver.class_learned(&mut tree, &instance, result) {
                            warn!(instance = %instance, error = %e, "Class lookup result could not be applied");
                        }
                        publish(&self.events, &mut tree);
                    }
                    self.release_flushes();
                }
                Command::EnsureLoaded { id, reply } => {
                    let result = self
                        .tree
                        .write()
                        .await
                        .ensure_children_loaded(id)
                        .map_err(|_| IndexerError::UnknownNode(id));
                    let _ = reply.send(result);
                }
                Command::Flush(reply) => {
                    self.waiting.push(reply);
                    self.release_flushes();
                }
                Command::Shutdown => break,
            }

            while let Some(joined) = self.lookups.try_join_next() {
                if let Err(e) = joined {
                    warn!(error = %e, "Class lookup task ended abnormally");
                }
            }
        }

        self.lookups.abort_all();
        info!("Index writer stopped");
    }

    fn spawn_lookup(&mut self, instance: String) {
        let source = self.device_info.clone();
        let commands = self.commands.clone();
        self.lookups.spawn(async move {
            // A panicking source still has to answer, or the instance stays in flight
            let key = instance.clone();
            let result = match tokio::spawn(async move { source.lookup(&key).await }).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(instance = %instance, error = %e, "Class lookup task failed");
                    Err(LookupError::Failed(e.to_string()))
                }
            };
            match commands.upgrade() {
                Some(commands) => {
                    let _ = commands.send(Command::ClassLearned { instance, result });
                }
                None => debug!(instance = %instance, "Index gone, lookup result discarded"),
            }
        });
    }

    fn release_flushes(&mut self) {
        if self.resolver.lookups_in_flight() == 0 {
            for reply in self.waiting.drain(..) {
                let _ = reply.send(());
            }
        }
    }
}

fn publish(events: &broadcast::Sender<IndexEvent>, tree: &mut IndexTree) {
    for event in tree.take_changes() {
        // No subscribers is fine
        let _ = events.send(event);
    }
}
