use std::path::PathBuf;

use events::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("Failed to spawn node {node}: {source}")]
    Spawn {
        node: NodeId,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Start aborted by a concurrent stop")]
    StartAborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Create a spawn failure for a node.
    pub fn spawn(node: NodeId, source: std::io::Error) -> Self {
        Self::Spawn { node, source }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
