//! Index node variants and their read-only views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

use crate::names::NameTables;
use crate::value::PropertyBag;

/// Arena identifier of a node, stable for the node's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hierarchy level of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Root,
    Group,
    ClassGroup,
    Device,
    Interface,
    ProtocolGroup,
    Endpoint,
    AdvertisementGroup,
    Advertisement,
}

impl Level {
    /// The only level a node of this level may hang under
    pub fn parent_level(self) -> Option<Level> {
        match self {
            Level::Root => None,
            Level::Group => Some(Level::Root),
            Level::ClassGroup | Level::ProtocolGroup => Some(Level::Group),
            Level::Device => Some(Level::ClassGroup),
            Level::Interface => Some(Level::Device),
            Level::Endpoint => Some(Level::ProtocolGroup),
            Level::AdvertisementGroup => Some(Level::Endpoint),
            Level::Advertisement => Some(Level::AdvertisementGroup),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Variant-specific node data
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Group,
    ClassGroup { class: Uuid },
    Device,
    Interface,
    ProtocolGroup { protocol: Uuid },
    Endpoint { address: Option<String> },
    AdvertisementGroup,
    Advertisement {
        received_count: u64,
        last_received: DateTime<Utc>,
    },
}

impl NodeKind {
    pub fn level(&self) -> Level {
        match self {
            NodeKind::Root => Level::Root,
            NodeKind::Group => Level::Group,
            NodeKind::ClassGroup { .. } => Level::ClassGroup,
            NodeKind::Device => Level::Device,
            NodeKind::Interface => Level::Interface,
            NodeKind::ProtocolGroup { .. } => Level::ProtocolGroup,
            NodeKind::Endpoint { .. } => Level::Endpoint,
            NodeKind::AdvertisementGroup => Level::AdvertisementGroup,
            NodeKind::Advertisement { .. } => Level::Advertisement,
        }
    }

    /// Fold an incoming payload into the existing one. Counters never move back.
    pub(crate) fn absorb(&mut self, incoming: NodeKind) -> bool {
        match (self, incoming) {
            (
                NodeKind::Advertisement {
                    received_count,
                    last_received,
                },
                NodeKind::Advertisement {
                    received_count: new_count,
                    last_received: new_received,
                },
            ) => {
                let mut changed = false;
                if new_count > *received_count {
                    *received_count = new_count;
                    changed = true;
                }
                if new_received > *last_received {
                    *last_received = new_received;
                    changed = true;
                }
                changed
            }
            (NodeKind::Endpoint { address }, NodeKind::Endpoint { address: new_address }) => {
                if *address != new_address {
                    *address = new_address;
                    true
                } else {
                    false
                }
            }
            // Group identity is the key itself and never changes
            _ => false,
        }
    }
}

/// Payload handed to `IndexTree::upsert`
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub name: String,
    pub properties: PropertyBag,
    pub hidden: bool,
}

impl NodeSpec {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            properties: PropertyBag::new(),
            hidden: false,
        }
    }

    pub fn with_properties(mut self, properties: PropertyBag) -> Self {
        self.properties = properties;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

/// Position of a child in its parent's name order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct SortKey {
    pub folded: String,
    pub name: String,
    pub id: NodeId,
}

impl SortKey {
    pub fn new(name: &str, id: NodeId) -> Self {
        Self {
            folded: name.to_lowercase(),
            name: name.to_string(),
            id,
        }
    }
}

/// Children of a node: unique by key, ordered by case-insensitive name
#[derive(Debug, Clone, Default)]
pub(crate) struct Children {
    pub by_key: HashMap<String, NodeId>,
    pub order: BTreeSet<SortKey>,
}

/// A node in the index tree
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) properties: PropertyBag,
    pub(crate) last_seen: DateTime<Utc>,
    pub(crate) error_text: Option<String>,
    pub(crate) hidden: bool,
    pub(crate) loaded: bool,
    pub(crate) children: Children,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn level(&self) -> Level {
        self.kind.level()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn error_text(&self) -> Option<&str> {
        self.error_text.as_deref()
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn child_count(&self) -> usize {
        self.children.by_key.len()
    }

    pub fn child_key(&self, key: &str) -> Option<NodeId> {
        self.children.by_key.get(key).copied()
    }

    /// Resolved radio/network address of an endpoint
    pub fn address(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Endpoint { address } => address.as_deref(),
            _ => None,
        }
    }

    pub fn received_count(&self) -> Option<u64> {
        match &self.kind {
            NodeKind::Advertisement { received_count, .. } => Some(*received_count),
            _ => None,
        }
    }

    /// Properties sorted by name for grid display, with resolved hints
    pub fn property_views(&self, tables: &NameTables) -> Vec<PropertyView> {
        let mut views: Vec<PropertyView> = self
            .properties
            .iter()
            .map(|(name, value)| PropertyView {
                name: name.to_string(),
                value: value.to_string(),
                hint: tables.hint(value),
            })
            .collect();
        views.sort_by_cached_key(|v| v.name.to_lowercase());
        views
    }
}

/// Detached copy of a node's observable fields
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub level: Level,
    pub key: String,
    pub name: String,
    pub parent: Option<NodeId>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    pub hidden: bool,
    pub loaded: bool,
    pub child_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_received: Option<DateTime<Utc>>,
}

impl From<&Node> for NodeView {
    fn from(node: &Node) -> Self {
        let group_id = match &node.kind {
            NodeKind::ClassGroup { class } => Some(*class),
            NodeKind::ProtocolGroup { protocol } => Some(*protocol),
            _ => None,
        };
        let last_received = match &node.kind {
            NodeKind::Advertisement { last_received, .. } => Some(*last_received),
            _ => None,
        };
        Self {
            id: node.id,
            level: node.level(),
            key: node.key.clone(),
            name: node.name.clone(),
            parent: node.parent,
            last_seen: node.last_seen,
            error_text: node.error_text.clone(),
            hidden: node.hidden,
            loaded: node.loaded,
            child_count: node.child_count(),
            group_id,
            address: node.address().map(str::to_string),
            received_count: node.received_count(),
            last_received,
        }
    }
}

/// One row of a property grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyView {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
