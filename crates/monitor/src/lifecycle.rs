//! Session lifecycle: `Idle -> Starting -> Running -> Stopping -> Idle`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use events::EventBus;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::classifier::LineClassifier;
use crate::config::ClusterConfig;
use crate::drain::{DrainSummary, OutputDrain};
use crate::error::{MonitorError, Result};
use crate::state::DerivedStateTracker;
use crate::supervisor::ProcessSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }

    fn allowed_transitions(&self) -> &'static [LifecycleState] {
        match self {
            LifecycleState::Idle => &[LifecycleState::Starting],
            LifecycleState::Starting => &[
                LifecycleState::Running,
                LifecycleState::Stopping,
                LifecycleState::Idle,
            ],
            LifecycleState::Running => &[LifecycleState::Stopping],
            LifecycleState::Stopping => &[LifecycleState::Idle],
        }
    }

    pub fn can_transition(&self, to: LifecycleState) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Session {
    supervisor: Option<ProcessSupervisor>,
    drains: Vec<JoinHandle<DrainSummary>>,
}

/// Starts, observes and stops one monitored cluster at a time
///
/// All operations take `&self` and may be called while drains are active.
/// The controller can be started again after it returns to `Idle`.
pub struct LifecycleController {
    config: ClusterConfig,
    bus: EventBus,
    tracker: DerivedStateTracker,
    classifier: Arc<LineClassifier>,
    running: Arc<AtomicBool>,
    state: Mutex<LifecycleState>,
    session: tokio::sync::Mutex<Session>,
}

impl LifecycleController {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            bus: EventBus::new(),
            tracker: DerivedStateTracker::new(),
            classifier: Arc::new(LineClassifier::new()),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(LifecycleState::Idle),
            session: tokio::sync::Mutex::new(Session::default()),
        }
    }

    /// Bus the consumer reads events from
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tracker(&self) -> &DerivedStateTracker {
        &self.tracker
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if *state != from || !from.can_transition(to) {
            return Err(MonitorError::InvalidTransition {
                from: state.to_string(),
                to: to.to_string(),
            });
        }

        debug!(from = %from, to = %to, "Lifecycle transition");
        *state = to;
        Ok(())
    }

    /// Return to `Idle` after a failed launch, unless `stop()` has taken over
    fn abandon_start(&self) {
        if self
            .transition(LifecycleState::Starting, LifecycleState::Idle)
            .is_err()
        {
            debug!("Failed launch left to the pending stop");
        }
    }

    /// Return to `Idle` once teardown is done, if nothing else moved the state
    fn finish_stop(&self) {
        if let Err(e) = self.transition(LifecycleState::Stopping, LifecycleState::Idle) {
            debug!(error = %e, "Stop finished after the state moved on");
        }
    }

    /// Launch all nodes and attach one output drain per process
    ///
    /// Events and derived state left over from a previous session are
    /// discarded first. On error the controller is back in `Idle` with no
    /// process left running.
    pub async fn start(&self) -> Result<()> {
        self.transition(LifecycleState::Idle, LifecycleState::Starting)?;

        let mut session = self.session.lock().await;
        let stale = self.bus.clear().await;
        if stale > 0 {
            debug!(events = stale, "Discarded unread events from the previous session");
        }
        self.tracker.reset();
        self.running.store(true, Ordering::SeqCst);

        let mut supervisor = ProcessSupervisor::new(self.config.clone());
        let launched = match self.config.validate() {
            Ok(()) => supervisor.launch().await,
            Err(e) => Err(e),
        };

        let outputs = match launched {
            Ok(outputs) => outputs,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.abandon_start();
                return Err(e);
            }
        };

        if self
            .transition(LifecycleState::Starting, LifecycleState::Running)
            .is_err()
        {
            // stop() was called mid-launch; it tears the processes down once
            // it gets the session.
            session.supervisor = Some(supervisor);
            return Err(MonitorError::StartAborted);
        }

        for (node, lines) in outputs {
            let drain = OutputDrain::new(
                node,
                self.bus.clone(),
                self.tracker.clone(),
                Arc::clone(&self.running),
                Arc::clone(&self.classifier),
            );
            session.drains.push(drain.spawn(lines));
        }
        session.supervisor = Some(supervisor);

        info!(nodes = self.config.nodes, "Monitoring session running");
        Ok(())
    }

    /// True while running and at least one node process is alive
    pub async fn is_running(&self) -> bool {
        if self.state() != LifecycleState::Running {
            return false;
        }

        let mut session = self.session.lock().await;
        session
            .supervisor
            .as_mut()
            .is_some_and(|supervisor| supervisor.any_alive())
    }

    /// True once every output drain of the session has finished
    ///
    /// After the nodes exit, the drains may still be publishing buffered
    /// output. Idle controllers have no drains.
    pub async fn drains_finished(&self) -> bool {
        let session = self.session.lock().await;
        session.drains.iter().all(|drain| drain.is_finished())
    }

    /// Number of node processes still alive
    pub async fn live_count(&self) -> usize {
        let mut session = self.session.lock().await;
        session
            .supervisor
            .as_mut()
            .map_or(0, |supervisor| supervisor.live_count())
    }

    /// Terminate every live node and clear the session
    ///
    /// Nodes get SIGTERM and the configured grace period, then are killed.
    /// Calling this while idle does nothing.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match *state {
                LifecycleState::Idle | LifecycleState::Stopping => return,
                previous => {
                    debug!(from = %previous, to = "stopping", "Lifecycle transition");
                    *state = LifecycleState::Stopping;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);

        let mut session = self.session.lock().await;
        if let Some(mut supervisor) = session.supervisor.take() {
            for (node, termination) in supervisor.terminate_all().await {
                info!(node, termination = ?termination, "Node stopped");
            }
        }

        for drain in session.drains.drain(..) {
            if !drain.is_finished() {
                drain.abort();
            }
        }
        drop(session);

        self.finish_stop();
        info!("Monitoring session stopped");
    }
}
