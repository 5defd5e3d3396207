use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{MonitorError, Result};

const DEFAULT_NODES: u32 = 2;
const DEFAULT_GRID_SIZE: u32 = 100;
const DEFAULT_GENERATIONS: u64 = 100;
const DEFAULT_PATTERN: &str = "random";
const DEFAULT_COORDINATOR_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;

/// Grid dimensions, written as `WxH`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE, DEFAULT_GRID_SIZE)
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for GridSize {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MonitorError::InvalidConfig(format!("grid must be WxH, got '{}'", s));

        let (width, height) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = width.trim().parse().map_err(|_| invalid())?;
        let height = height.trim().parse().map_err(|_| invalid())?;

        Ok(Self { width, height })
    }
}

impl TryFrom<String> for GridSize {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<GridSize> for String {
    fn from(grid: GridSize) -> Self {
        grid.to_string()
    }
}

/// Delays used while launching and stopping node processes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Pause after spawning the coordinator so it can start listening
    pub coordinator_settle_ms: u64,
    /// Pause after each collaborator spawn
    pub collaborator_settle_ms: u64,
    /// How long a node gets to exit after SIGTERM before it is killed
    pub grace_period_ms: u64,
}

impl Timings {
    pub fn coordinator_settle(&self) -> Duration {
        Duration::from_millis(self.coordinator_settle_ms)
    }

    pub fn collaborator_settle(&self) -> Duration {
        Duration::from_millis(self.collaborator_settle_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            coordinator_settle_ms: 1000,
            collaborator_settle_ms: 500,
            grace_period_ms: 2000,
        }
    }
}

/// Everything needed to launch one monitored cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Path to the Game of Life node executable
    pub executable: PathBuf,
    /// Total node count, coordinator included
    pub nodes: u32,
    pub grid: GridSize,
    pub generations: u64,
    /// Initial pattern name (random, glider, rpentomino, ...)
    pub pattern: String,
    /// Address collaborators use to reach the coordinator
    pub coordinator_host: String,
    pub port: u16,
    pub timings: Timings,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::new(),
            nodes: DEFAULT_NODES,
            grid: GridSize::default(),
            generations: DEFAULT_GENERATIONS,
            pattern: DEFAULT_PATTERN.to_string(),
            coordinator_host: DEFAULT_COORDINATOR_HOST.to_string(),
            port: DEFAULT_PORT,
            timings: Timings::default(),
        }
    }
}

impl ClusterConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    /// Read a TOML config file
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub async fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "Config loaded successfully");

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(MonitorError::InvalidConfig(
                "at least one node is required".to_string(),
            ));
        }
        if self.grid.width == 0 || self.grid.height == 0 {
            return Err(MonitorError::InvalidConfig(format!(
                "grid {} has no cells",
                self.grid
            )));
        }
        Ok(())
    }
}
