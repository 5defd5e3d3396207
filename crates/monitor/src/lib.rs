//! Launches the processes of a distributed Game of Life run and turns their
//! output into a stream of typed events.
//!
//! A [`LifecycleController`] starts the coordinator and its collaborators
//! through a [`ProcessSupervisor`], attaches one [`OutputDrain`] per process,
//! and exposes the shared [`events::EventBus`] and [`DerivedStateTracker`].

pub mod classifier;
pub mod config;
pub mod drain;
pub mod error;
pub mod lifecycle;
pub mod state;
pub mod stats;
pub mod supervisor;

pub use classifier::{classify, LineClassifier};
pub use config::{ClusterConfig, GridSize, Timings};
pub use drain::{merged_lines, DrainOutcome, DrainSummary, LineStream, OutputDrain};
pub use error::{MonitorError, Result};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use state::{DerivedStateTracker, NodeState, Partition};
pub use stats::{ClusterStats, NodeStats};
pub use supervisor::{ProcessHandle, ProcessSupervisor, Role, Termination};
