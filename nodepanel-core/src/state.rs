use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Node, NodeId, Selection, ServiceBinding};

/// What a running request is holding, so a second one can be refused
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BusyKey {
    /// A node creation; there is no id yet to key on
    Create,
    /// Basic settings, delete or reconnect of one node
    Node(NodeId),
    /// The binding list of one node
    Bindings(NodeId),
}

impl std::fmt::Display for BusyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusyKey::Create => write!(f, "node creation"),
            BusyKey::Node(id) => write!(f, "node {}", id),
            BusyKey::Bindings(id) => write!(f, "services of node {}", id),
        }
    }
}

/// Everything the node directory knows.
///
/// Only `reduce` writes the cache fields; the busy set is managed by the
/// store's guards.
#[derive(Debug, Default)]
pub struct DirectoryState {
    /// Nodes in the order the backend listed them
    pub nodes: Vec<Node>,
    /// At least one listing has been applied
    pub loaded: bool,
    /// A mutation succeeded since the last listing
    pub stale: bool,
    /// Count of successful mutations, used to detect listings that raced one
    pub mutations: u64,
    pub selection: Selection,
    /// Binding lists, keyed by their parent node
    pub bindings: BTreeMap<NodeId, Vec<ServiceBinding>>,
    /// Nodes deleted during this session
    pub removed: BTreeSet<NodeId>,
    pub busy: BTreeSet<BusyKey>,
    pub last_event_id: u64,
}

impl DirectoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn needs_fetch(&self) -> bool {
        !self.loaded || self.stale
    }
}
