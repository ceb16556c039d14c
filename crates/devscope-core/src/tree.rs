//! Arena-backed index tree
//!
//! Nodes live in a map keyed by `NodeId`. Every node keeps its children twice:
//! by key for uniqueness and in a `BTreeSet` ordered by case-insensitive name,
//! so sorted reads never re-sort and a rename only moves one entry.
//!
//! The tree itself is not synchronized. The indexer owns the only writer.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::node::{Children, Level, Node, NodeId, NodeKind, NodeSpec, NodeView, SortKey};

#[derive(Error, Debug, PartialEq)]
pub enum TreeError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("A {level} node cannot be placed under a {parent} node")]
    InvalidParent { level: Level, parent: Level },
}

/// What an upsert did to the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// Only `last_seen` moved
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upsert {
    pub id: NodeId,
    pub outcome: Outcome,
}

/// Change notification published to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexEvent {
    NodeAdded {
        id: NodeId,
        parent: Option<NodeId>,
        level: Level,
    },
    NodeUpdated {
        id: NodeId,
        level: Level,
    },
    NodeRemoved {
        id: NodeId,
        level: Level,
        key: String,
    },
}

/// Nested copy of a subtree
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    #[serde(flatten)]
    pub node: NodeView,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeSnapshot>,
}

/// The index tree: root, groups and every discovered item
#[derive(Debug)]
pub struct IndexTree {
    nodes: HashMap<NodeId, Node>,
    keys: HashMap<(Level, String), NodeId>,
    root: NodeId,
    next_id: u64,
    changes: Vec<IndexEvent>,
}

impl IndexTree {
    /// Create a tree holding only the root node
    pub fn new(root_name: &str) -> Self {
        let root = NodeId(0);
        let mut tree = Self {
            nodes: HashMap::new(),
            keys: HashMap::new(),
            root,
            next_id: 1,
            changes: Vec::new(),
        };
        tree.insert_node(root, None, "root", NodeSpec::new(NodeKind::Root, root_name));
        tree.changes.clear();
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Look a node up by level and key
    pub fn find(&self, level: Level, key: &str) -> Option<NodeId> {
        self.keys.get(&(level, key.to_string())).copied()
    }

    /// Children of `id` in ascending case-insensitive name order
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.nodes
            .get(&id)
            .into_iter()
            .flat_map(|node| node.children.order.iter())
            .filter_map(move |entry| self.nodes.get(&entry.id))
    }

    pub fn count(&self, level: Level) -> usize {
        self.nodes.values().filter(|n| n.level() == level).count()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create or update the node `key` at the payload's level under `parent`.
    ///
    /// An unchanged payload only refreshes `last_seen`. If the key already
    /// exists under a different parent, the old node and its subtree are
    /// dropped and a fresh node is created, since parents never change.
    pub fn upsert(&mut self, parent: NodeId, key: &str, spec: NodeSpec) -> Result<Upsert, TreeError> {
        let level = spec.kind.level();
        let parent_level = self
            .nodes
            .get(&parent)
            .ok_or(TreeError::UnknownNode(parent))?
            .level();
        if level.parent_level() != Some(parent_level) {
            return Err(TreeError::InvalidParent {
                level,
                parent: parent_level,
            });
        }

        if let Some(existing) = self.find(level, key) {
            let same_parent = self.nodes.get(&existing).and_then(|n| n.parent) == Some(parent);
            if same_parent {
                let outcome = if self.update(existing, spec) {
                    Outcome::Updated
                } else {
                    Outcome::Unchanged
                };
                return Ok(Upsert {
                    id: existing,
                    outcome,
                });
            }
            debug!(key = %key, level = %level, "Node moved to a new parent, recreating");
            self.remove_subtree(existing);
        }

        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.insert_node(id, Some(parent), key, spec);
        Ok(Upsert {
            id,
            outcome: Outcome::Created,
        })
    }

    /// Remove the node `key` at `level` together with its subtree
    pub fn remove(&mut self, level: Level, key: &str) -> bool {
        match self.find(level, key) {
            Some(id) if id != self.root => {
                self.remove_subtree(id);
                true
            }
            _ => false,
        }
    }

    /// Set or clear the error text of a node
    pub fn set_error_text(&mut self, id: NodeId, error_text: Option<String>) -> Result<bool, TreeError> {
        let node = self.nodes.get_mut(&id).ok_or(TreeError::UnknownNode(id))?;
        if node.error_text == error_text {
            return Ok(false);
        }
        node.error_text = error_text;
        let level = node.level();
        self.changes.push(IndexEvent::NodeUpdated { id, level });
        Ok(true)
    }

    /// Mark a node's children as loaded; returns true on the first call
    pub fn ensure_children_loaded(&mut self, id: NodeId) -> Result<bool, TreeError> {
        let node = self.nodes.get_mut(&id).ok_or(TreeError::UnknownNode(id))?;
        if node.loaded {
            return Ok(false);
        }
        node.loaded = true;
        Ok(true)
    }

    /// Nested copy of the subtree rooted at `id`
    pub fn snapshot(&self, id: NodeId) -> Option<TreeSnapshot> {
        let node = self.nodes.get(&id)?;
        Some(TreeSnapshot {
            node: NodeView::from(node),
            children: self
                .children(id)
                .filter_map(|child| self.snapshot(child.id))
                .collect(),
        })
    }

    /// Drain the changes recorded since the last call
    pub fn take_changes(&mut self) -> Vec<IndexEvent> {
        std::mem::take(&mut self.changes)
    }

    fn insert_node(&mut self, id: NodeId, parent: Option<NodeId>, key: &str, spec: NodeSpec) {
        let level = spec.kind.level();
        let node = Node {
            id,
            kind: spec.kind,
            key: key.to_string(),
            name: spec.name,
            parent,
            properties: spec.properties,
            last_seen: Utc::now(),
            error_text: None,
            hidden: spec.hidden,
            loaded: false,
            children: Children::default(),
        };

        if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent_node.children.by_key.insert(key.to_string(), id);
            parent_node.children.order.insert(SortKey::new(&node.name, id));
        }

        trace!(id = %id, level = %level, key = %key, "Node created");
        self.keys.insert((level, key.to_string()), id);
        self.nodes.insert(id, node);
        self.changes.push(IndexEvent::NodeAdded { id, parent, level });
    }

    fn update(&mut self, id: NodeId, spec: NodeSpec) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };

        node.last_seen = node.last_seen.max(Utc::now());
        let mut changed = node.kind.absorb(spec.kind);
        if node.properties != spec.properties {
            node.properties = spec.properties;
            changed = true;
        }
        if node.hidden != spec.hidden {
            node.hidden = spec.hidden;
            changed = true;
        }

        let mut renamed = None;
        if node.name != spec.name {
            let old = std::mem::replace(&mut node.name, spec.name);
            renamed = Some((old, node.name.clone()));
            changed = true;
        }
        let parent = node.parent;
        let level = node.level();

        if let (Some((old, new)), Some(parent)) = (renamed, parent) {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.order.remove(&SortKey::new(&old, id));
                parent_node.children.order.insert(SortKey::new(&new, id));
            }
        }

        if changed {
            self.changes.push(IndexEvent::NodeUpdated { id, level });
        }
        changed
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let (parent, key, name) = (node.parent, node.key.clone(), node.name.clone());

        if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent_node.children.by_key.remove(&key);
            parent_node.children.order.remove(&SortKey::new(&name, id));
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            stack.extend(node.children.by_key.values().copied());
            let level = node.level();
            self.keys.remove(&(level, node.key.clone()));
            trace!(id = %current, level = %level, key = %node.key, "Node removed");
            self.changes.push(IndexEvent::NodeRemoved {
                id: current,
                level,
                key: node.key,
            });
        }
    }
}
