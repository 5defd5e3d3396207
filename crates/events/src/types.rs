//! Event types parsed from the output of observed DSM nodes

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Index of one participant process (node 0 is the coordinator)
pub type NodeId = u32;

/// An immutable record produced from one line of node output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    node: NodeId,
    observed_at: DateTime<Utc>,
    payload: EventPayload,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(node: NodeId, payload: EventPayload) -> Self {
        Self {
            node,
            observed_at: Utc::now(),
            payload,
        }
    }

    /// Create an `Error` event for a node
    pub fn error(node: NodeId, message: impl Into<String>) -> Self {
        Self::new(
            node,
            EventPayload::Error {
                message: message.into(),
            },
        )
    }

    /// Node that emitted the line this event was parsed from
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// When the line was observed by the monitor
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Discriminant of [`EventPayload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Generation,
    PageFaults,
    Network,
    Barrier,
    Init,
    Complete,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Generation => "generation",
            EventKind::PageFaults => "page_faults",
            EventKind::Network => "network",
            EventKind::Barrier => "barrier",
            EventKind::Init => "init",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific event data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A node finished one step of the computation
    Generation { generation: u64, live_cells: u64 },

    /// Cumulative page fault counters of a node
    PageFaults { total: u64, read: u64, write: u64 },

    /// Cumulative network traffic of a node, in kilobytes
    Network { kb_sent: f64, kb_received: f64 },

    /// A node reported a barrier transition
    Barrier { name: String, action: BarrierAction },

    /// A node announced the row range it owns (`end_row` exclusive)
    Init { start_row: u32, end_row: u32 },

    /// A node finished; the final line carries its live cell count
    Complete { final_live_cells: Option<u64> },

    /// The node's output stream failed
    Error { message: String },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Generation { .. } => EventKind::Generation,
            EventPayload::PageFaults { .. } => EventKind::PageFaults,
            EventPayload::Network { .. } => EventKind::Network,
            EventPayload::Barrier { .. } => EventKind::Barrier,
            EventPayload::Init { .. } => EventKind::Init,
            EventPayload::Complete { .. } => EventKind::Complete,
            EventPayload::Error { .. } => EventKind::Error,
        }
    }
}

/// What a node did at a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierAction {
    Passed,
}
