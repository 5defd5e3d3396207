//! Launching and tearing down node processes.
//!
//! The coordinator (node 0) is started first and given time to begin
//! listening; collaborators follow in node order. A failed launch tears down
//! everything already started.

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use events::NodeId;
use futures::future::join_all;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::drain::{merged_lines, LineStream};
use crate::error::{MonitorError, Result};

/// Reporting interval passed to every node; live display needs every step.
const DISPLAY_INTERVAL: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Collaborator,
}

impl Role {
    pub fn for_node(node: NodeId) -> Self {
        if node == 0 {
            Role::Coordinator
        } else {
            Role::Collaborator
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => f.write_str("coordinator"),
            Role::Collaborator => f.write_str("collaborator"),
        }
    }
}

/// How a process ended when asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    AlreadyExited,
    Graceful,
    Killed,
}

/// One spawned node process
pub struct ProcessHandle {
    node: NodeId,
    role: Role,
    child: Child,
    exit_status: Option<ExitStatus>,
}

impl ProcessHandle {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status, once the process has been seen to exit
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(node = self.node, status = %status, "Node exited");
                self.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(node = self.node, error = %e, "Failed to poll node process");
                false
            }
        }
    }

    /// Ask the process to exit, killing it if it outlives `grace`
    pub async fn terminate(&mut self, grace: Duration) -> Termination {
        if !self.is_alive() {
            return Termination::AlreadyExited;
        }

        info!(node = self.node, "Terminating node");
        self.request_exit();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                Termination::Graceful
            }
            Ok(Err(e)) => {
                warn!(node = self.node, error = %e, "Failed to wait for node, killing");
                self.kill().await
            }
            Err(_) => {
                warn!(
                    node = self.node,
                    grace_ms = grace.as_millis() as u64,
                    "Node ignored termination request, killing"
                );
                self.kill().await
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(node = self.node, pid, error = %e, "Failed to send SIGTERM");
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(node = self.node, error = %e, "Failed to request node exit");
        }
    }

    async fn kill(&mut self) -> Termination {
        if let Err(e) = self.child.kill().await {
            warn!(node = self.node, error = %e, "Failed to kill node");
        }
        self.exit_status = self.child.try_wait().ok().flatten();
        Termination::Killed
    }
}

/// Owns the set of live node processes
pub struct ProcessSupervisor {
    config: ClusterConfig,
    handles: Vec<ProcessHandle>,
}

impl ProcessSupervisor {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            handles: Vec::new(),
        }
    }

    pub fn coordinator_args(&self) -> Vec<String> {
        let config = &self.config;
        vec![
            "--manager".to_string(),
            "--nodes".to_string(),
            config.nodes.to_string(),
            "--grid".to_string(),
            config.grid.to_string(),
            "--generations".to_string(),
            config.generations.to_string(),
            "--pattern".to_string(),
            config.pattern.clone(),
            "--port".to_string(),
            config.port.to_string(),
            "--display-interval".to_string(),
            DISPLAY_INTERVAL.to_string(),
        ]
    }

    pub fn collaborator_args(&self, node: NodeId) -> Vec<String> {
        let config = &self.config;
        vec![
            "--worker".to_string(),
            "--node-id".to_string(),
            node.to_string(),
            "--nodes".to_string(),
            config.nodes.to_string(),
            "--manager-host".to_string(),
            config.coordinator_host.clone(),
            "--grid".to_string(),
            config.grid.to_string(),
            "--generations".to_string(),
            config.generations.to_string(),
            "--pattern".to_string(),
            config.pattern.clone(),
            "--port".to_string(),
            config.port.to_string(),
            "--display-interval".to_string(),
            DISPLAY_INTERVAL.to_string(),
        ]
    }

    /// Spawn every node and hand back each one's output stream
    ///
    /// On failure nothing is left running.
    pub async fn launch(&mut self) -> Result<Vec<(NodeId, LineStream)>> {
        if !self.config.executable.exists() {
            return Err(MonitorError::ExecutableNotFound(
                self.config.executable.clone(),
            ));
        }

        let mut outputs = Vec::with_capacity(self.config.nodes as usize);
        match self.launch_all(&mut outputs).await {
            Ok(()) => {
                info!(nodes = self.handles.len(), "All nodes started");
                Ok(outputs)
            }
            Err(e) => {
                warn!(error = %e, "Launch failed, tearing down started nodes");
                drop(outputs);
                self.terminate_all().await;
                Err(e)
            }
        }
    }

    async fn launch_all(&mut self, outputs: &mut Vec<(NodeId, LineStream)>) -> Result<()> {
        let timings = self.config.timings.clone();

        outputs.push(self.spawn_node(0)?);
        tokio::time::sleep(timings.coordinator_settle()).await;

        for node in 1..self.config.nodes {
            outputs.push(self.spawn_node(node)?);
            tokio::time::sleep(timings.collaborator_settle()).await;
        }

        Ok(())
    }

    fn spawn_node(&mut self, node: NodeId) -> Result<(NodeId, LineStream)> {
        let role = Role::for_node(node);
        let args = match role {
            Role::Coordinator => self.coordinator_args(),
            Role::Collaborator => self.collaborator_args(node),
        };

        info!(node, role = %role, "Starting node");
        debug!(node, "Command: {} {}", self.config.executable.display(), args.join(" "));

        let mut child = Command::new(&self.config.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MonitorError::spawn(node, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        self.handles.push(ProcessHandle {
            node,
            role,
            child,
            exit_status: None,
        });

        match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => Ok((node, merged_lines(stdout, stderr))),
            _ => Err(MonitorError::spawn(
                node,
                io::Error::new(io::ErrorKind::Other, "output pipes were not captured"),
            )),
        }
    }

    /// Stop every live process and forget all handles
    pub async fn terminate_all(&mut self) -> Vec<(NodeId, Termination)> {
        let grace = self.config.timings.grace_period();

        let results = join_all(self.handles.iter_mut().map(|handle| async move {
            let termination = handle.terminate(grace).await;
            (handle.node(), termination)
        }))
        .await;

        self.handles.clear();
        results
    }

    pub fn live_count(&mut self) -> usize {
        self.handles
            .iter_mut()
            .map(|handle| handle.is_alive())
            .filter(|alive| *alive)
            .count()
    }

    pub fn any_alive(&mut self) -> bool {
        self.handles.iter_mut().any(|handle| handle.is_alive())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }
}
