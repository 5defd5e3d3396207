//! Consumer-side statistics folded from the event stream.

use std::collections::BTreeMap;

use events::{Event, EventPayload, NodeId};
use serde::Serialize;

/// Latest figures reported by one node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStats {
    pub generation: u64,
    pub live_cells: u64,
    pub page_faults: u64,
    pub read_faults: u64,
    pub write_faults: u64,
    pub kb_sent: f64,
    pub kb_received: f64,
    pub barriers_passed: u64,
    pub completed: bool,
    pub final_live_cells: Option<u64>,
    pub last_error: Option<String>,
}

/// Per-node statistics for the whole cluster, keyed by node id
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterStats {
    nodes: BTreeMap<NodeId, NodeStats>,
}

impl ClusterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &Event) {
        let stats = self.nodes.entry(event.node()).or_default();

        match event.payload() {
            EventPayload::Generation {
                generation,
                live_cells,
            } => {
                stats.generation = *generation;
                stats.live_cells = *live_cells;
            }
            EventPayload::PageFaults { total, read, write } => {
                stats.page_faults = *total;
                stats.read_faults = *read;
                stats.write_faults = *write;
            }
            EventPayload::Network {
                kb_sent,
                kb_received,
            } => {
                stats.kb_sent = *kb_sent;
                stats.kb_received = *kb_received;
            }
            EventPayload::Barrier { .. } => stats.barriers_passed += 1,
            EventPayload::Init { .. } => {}
            EventPayload::Complete { final_live_cells } => {
                stats.completed = true;
                if final_live_cells.is_some() {
                    stats.final_live_cells = *final_live_cells;
                }
            }
            EventPayload::Error { message } => stats.last_error = Some(message.clone()),
        }
    }

    pub fn node(&self, node: NodeId) -> Option<&NodeStats> {
        self.nodes.get(&node)
    }

    /// Nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeStats)> {
        self.nodes.iter().map(|(node, stats)| (*node, stats))
    }

    pub fn total_page_faults(&self) -> u64 {
        self.nodes.values().map(|s| s.page_faults).sum()
    }

    pub fn total_kb_sent(&self) -> f64 {
        self.nodes.values().map(|s| s.kb_sent).sum()
    }

    pub fn total_kb_received(&self) -> f64 {
        self.nodes.values().map(|s| s.kb_received).sum()
    }

    /// Sum of each node's final count, or its latest count if it has not
    /// finished
    pub fn total_live_cells(&self) -> u64 {
        self.nodes
            .values()
            .map(|s| s.final_live_cells.unwrap_or(s.live_cells))
            .sum()
    }

    pub fn completed_nodes(&self) -> usize {
        self.nodes.values().filter(|s| s.completed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::BarrierAction;

    #[test]
    fn test_apply_events() {
        let mut stats = ClusterStats::new();

        stats.apply(&Event::new(
            0,
            EventPayload::Generation {
                generation: 4,
                live_cells: 120,
            },
        ));
        stats.apply(&Event::new(
            0,
            EventPayload::PageFaults {
                total: 124,
                read: 100,
                write: 24,
            },
        ));
        stats.apply(&Event::new(
            1,
            EventPayload::Network {
                kb_sent: 45.2,
                kb_received: 38.1,
            },
        ));
        stats.apply(&Event::new(
            1,
            EventPayload::Barrier {
                name: "BARRIER_COMPUTE_0".to_string(),
                action: BarrierAction::Passed,
            },
        ));

        let node0 = stats.node(0).unwrap();
        assert_eq!(node0.generation, 4);
        assert_eq!(node0.read_faults, 100);
        assert_eq!(stats.node(1).unwrap().barriers_passed, 1);
        assert_eq!(stats.total_page_faults(), 124);
        assert!((stats.total_kb_sent() - 45.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_completion() {
        let mut stats = ClusterStats::new();

        stats.apply(&Event::new(
            0,
            EventPayload::Generation {
                generation: 10,
                live_cells: 30,
            },
        ));
        stats.apply(&Event::new(
            1,
            EventPayload::Generation {
                generation: 10,
                live_cells: 20,
            },
        ));
        stats.apply(&Event::new(
            0,
            EventPayload::Complete {
                final_live_cells: None,
            },
        ));
        stats.apply(&Event::new(
            0,
            EventPayload::Complete {
                final_live_cells: Some(31),
            },
        ));

        assert_eq!(stats.completed_nodes(), 1);
        assert_eq!(stats.node(0).unwrap().final_live_cells, Some(31));
        assert_eq!(stats.total_live_cells(), 51);
    }

    #[test]
    fn test_error_recorded() {
        let mut stats = ClusterStats::new();
        stats.apply(&Event::error(2, "stream closed"));

        assert_eq!(
            stats.node(2).unwrap().last_error.as_deref(),
            Some("stream closed")
        );
        let ids: Vec<_> = stats.nodes().map(|(node, _)| node).collect();
        assert_eq!(ids, vec![2]);
    }
}
