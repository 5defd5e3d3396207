//! Cross-node state derived from the event stream.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use events::{Event, EventPayload, NodeId};
use serde::Serialize;

/// Half-open row range `[start_row, end_row)` owned by one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub start_row: u32,
    pub end_row: u32,
}

impl Partition {
    pub fn rows(&self) -> u32 {
        self.end_row.saturating_sub(self.start_row)
    }

    pub fn contains(&self, row: u32) -> bool {
        (self.start_row..self.end_row).contains(&row)
    }
}

/// What the monitor knows about one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeState {
    pub last_generation: Option<u64>,
    pub initialized: bool,
    pub partition: Option<Partition>,
}

/// Thread-safe map of node id to [`NodeState`]
///
/// Written by the output drains, read by the controller and the consumer.
#[derive(Debug, Clone, Default)]
pub struct DerivedStateTracker {
    nodes: Arc<RwLock<HashMap<NodeId, NodeState>>>,
}

impl DerivedStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the tracked state.
    ///
    /// Only `Generation` and `Init` events change anything. A node's
    /// partition is recorded once and never replaced.
    pub fn observe(&self, event: &Event) {
        match event.payload() {
            EventPayload::Generation { generation, .. } => {
                self.record_generation(event.node(), *generation)
            }
            EventPayload::Init { start_row, end_row } => {
                self.record_partition(
                    event.node(),
                    Partition {
                        start_row: *start_row,
                        end_row: *end_row,
                    },
                );
            }
            _ => {}
        }
    }

    pub fn record_generation(&self, node: NodeId, generation: u64) {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes.entry(node).or_default().last_generation = Some(generation);
    }

    /// Returns `false` if the node already had a partition.
    pub fn record_partition(&self, node: NodeId, partition: Partition) -> bool {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = nodes.entry(node).or_default();
        state.initialized = true;

        if state.partition.is_some() {
            return false;
        }
        state.partition = Some(partition);
        true
    }

    /// Forget every node, ready for a new session
    pub fn reset(&self) {
        self.nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Lowest generation reported across nodes, or 0 before any report.
    pub fn minimum_generation(&self) -> u64 {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter_map(|state| state.last_generation)
            .min()
            .unwrap_or(0)
    }

    pub fn node(&self, node: NodeId) -> Option<NodeState> {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&node)
            .cloned()
    }

    pub fn partition(&self, node: NodeId) -> Option<Partition> {
        self.node(node).and_then(|state| state.partition)
    }

    pub fn is_initialized(&self, node: NodeId) -> bool {
        self.node(node).is_some_and(|state| state.initialized)
    }

    /// Known partitions, ordered by node id
    pub fn partitions(&self) -> Vec<(NodeId, Partition)> {
        self.snapshot()
            .into_iter()
            .filter_map(|(node, state)| state.partition.map(|p| (node, p)))
            .collect()
    }

    /// Copy of every tracked node, ordered by node id
    pub fn snapshot(&self) -> Vec<(NodeId, NodeState)> {
        let nodes = self
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries: Vec<_> = nodes
            .iter()
            .map(|(node, state)| (*node, state.clone()))
            .collect();
        entries.sort_by_key(|(node, _)| *node);
        entries
    }
}
