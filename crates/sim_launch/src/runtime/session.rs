//! Launch session - drives one description from building to shutdown

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::{
    ArgumentError, ArgumentRegistry, CompositeLoader, DescriptionError, DescriptionLoader,
    Environment, LaunchAction, LaunchDescription, PackageIndex,
};
use crate::runtime::process::ProcessEvent;
use crate::runtime::resolver::{LaunchPlan, ResolveError, Resolver};
use crate::runtime::supervisor::{EventReceiver, Supervisor, SupervisorConfig};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Actions may still be added
    Building,
    /// Arguments and includes are being expanded
    Resolving,
    /// Processes are started and supervised
    Running,
    /// Processes are being shut down
    Stopping,
    /// Session ended normally
    Stopped,
    /// Session ended on an error
    Failed,
}

impl SessionState {
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Building, Resolving)
                | (Resolving, Running)
                | (Resolving, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Building => "building",
            SessionState::Resolving => "resolving",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time between SIGTERM and SIGKILL during shutdown
    pub grace_period: Duration,
    /// Directory for generated parameter files
    pub runtime_dir: PathBuf,
    /// How often exited processes are collected
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let supervisor = SupervisorConfig::default();
        Self {
            grace_period: supervisor.grace_period,
            runtime_dir: supervisor.runtime_dir,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Why a running session stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested through the watch channel
    Requested,
    /// A required process exited
    RequiredExited { name: String, code: Option<i32> },
    /// A required process could not be started
    RequiredFailedToStart { name: String },
    /// Every process exited on its own
    AllExited,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "shutdown requested"),
            StopReason::RequiredExited { name, code } => {
                write!(f, "required process '{}' exited with code {:?}", name, code)
            }
            StopReason::RequiredFailedToStart { name } => {
                write!(f, "required process '{}' failed to start", name)
            }
            StopReason::AllExited => write!(f, "all processes exited"),
        }
    }
}

/// Final result of [`Session::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub reason: StopReason,
    /// Processes killed after the grace period
    pub forced: Vec<String>,
    /// Processes that failed to start
    pub failed_starts: Vec<String>,
}

impl SessionOutcome {
    /// Process exit status for the launcher itself
    pub fn exit_code(&self) -> i32 {
        if self.state == SessionState::Failed || !self.forced.is_empty() {
            return 1;
        }
        match self.reason {
            StopReason::RequiredExited { code, .. } if code != Some(0) => 1,
            _ => 0,
        }
    }
}

/// One launch session
pub struct Session {
    description: LaunchDescription,
    config: SessionConfig,
    env: Environment,
    packages: Option<PackageIndex>,
    loader: Box<dyn DescriptionLoader>,
    registry: ArgumentRegistry,
    state: SessionState,
    plan: Option<LaunchPlan>,
}

impl Session {
    pub fn new(description: LaunchDescription, config: SessionConfig) -> Self {
        Self {
            description,
            config,
            env: Environment::default(),
            packages: None,
            loader: Box::new(CompositeLoader::default()),
            registry: ArgumentRegistry::new(),
            state: SessionState::Building,
            plan: None,
        }
    }

    /// Environment used by `$(env ...)` and the default package index
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    /// Package index; derived from the environment when not set
    pub fn with_packages(mut self, packages: PackageIndex) -> Self {
        self.packages = Some(packages);
        self
    }

    pub fn with_loader(mut self, loader: impl DescriptionLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Argument values from the invoking context
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (String, String)>) -> Self {
        self.registry = ArgumentRegistry::with_overrides(overrides);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The resolved plan, once [`Session::resolve`] succeeded
    pub fn plan(&self) -> Option<&LaunchPlan> {
        self.plan.as_ref()
    }

    pub fn description(&self) -> &LaunchDescription {
        &self.description
    }

    /// Append an action to the root description
    pub fn add(&mut self, action: impl Into<LaunchAction>) -> Result<(), SessionError> {
        if self.state != SessionState::Building {
            return Err(SessionError::NotBuilding(self.state));
        }
        self.description.add(action)?;
        Ok(())
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition(to) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        log::debug!("Session state: {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Expand the description into a launch plan. Nothing is started.
    pub fn resolve(&mut self) -> Result<&LaunchPlan, SessionError> {
        self.transition(SessionState::Resolving)?;

        let env = &self.env;
        let packages = self
            .packages
            .get_or_insert_with(|| PackageIndex::from_environment(env));
        let resolver = Resolver::new(self.loader.as_ref(), env, packages);

        match resolver.resolve(&self.description, &mut self.registry) {
            Ok(plan) => {
                log::info!("Resolved launch plan with {} processes", plan.processes.len());
                Ok(self.plan.insert(plan))
            }
            Err(e) => {
                log::error!("Failed to resolve launch description: {}", e);
                self.transition(SessionState::Failed)?;
                Err(e.into())
            }
        }
    }

    /// Start every process of the plan and supervise them until a stop
    /// condition is met, then shut everything down.
    ///
    /// A value sent on `shutdown_rx` requests a stop. Dropping the sender
    /// only means no stop request will come; the session keeps running
    /// until its processes exit.
    pub async fn run(
        &mut self,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> Result<SessionOutcome, SessionError> {
        if self.plan.is_none() {
            self.resolve()?;
        }
        self.transition(SessionState::Running)?;

        let processes = self
            .plan
            .as_ref()
            .map(|plan| plan.processes.clone())
            .unwrap_or_default();
        let supervisor_config = SupervisorConfig {
            runtime_dir: self.config.runtime_dir.clone(),
            grace_period: self.config.grace_period,
        };
        let mut supervisor =
            Supervisor::new(supervisor_config, self.packages.clone().unwrap_or_default());
        let mut events = supervisor.take_events();

        log::info!("Launching {} processes...", processes.len());
        let mut failed_starts = Vec::new();
        let mut reason = None;

        for spec in processes {
            if shutdown_rx.has_changed().unwrap_or(false) {
                log::info!("Shutdown requested, aborting launch");
                reason = Some(StopReason::Requested);
                break;
            }

            let name = spec.name.clone();
            let required = spec.required;
            if supervisor.start(spec).await.is_err() {
                failed_starts.push(name.clone());
                if required {
                    reason = Some(StopReason::RequiredFailedToStart { name });
                    break;
                }
                log::warn!("[{}] Continuing without this process", name);
            }
        }

        let reason = match reason {
            Some(reason) => reason,
            None => self.supervise(&mut supervisor, &mut events, &mut shutdown_rx).await,
        };
        log::info!("Stopping session: {}", reason);

        let failed = matches!(reason, StopReason::RequiredFailedToStart { .. });
        if failed {
            self.transition(SessionState::Failed)?;
        } else {
            self.transition(SessionState::Stopping)?;
        }

        let report = supervisor.stop_all().await;
        drain_events(&mut events);

        if !failed {
            self.transition(SessionState::Stopped)?;
        }

        Ok(SessionOutcome {
            state: self.state,
            reason,
            forced: report.forced,
            failed_starts,
        })
    }

    async fn supervise(
        &self,
        supervisor: &mut Supervisor,
        events: &mut Option<EventReceiver>,
        shutdown_rx: &mut watch::Receiver<()>,
    ) -> StopReason {
        if supervisor.live_count() == 0 {
            return StopReason::AllExited;
        }
        log::info!("All processes launched");

        // One interval for the whole loop, so steady output can't starve polling
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop_requests_open = true;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed(), if stop_requests_open => {
                    if changed.is_ok() {
                        log::info!("Shutdown signal received");
                        return StopReason::Requested;
                    }
                    log::debug!("Shutdown sender dropped, waiting for processes to exit");
                    stop_requests_open = false;
                }

                Some((name, event)) = next_event(&mut *events) => log_event(&name, event),

                _ = poll.tick() => {
                    for exited in supervisor.poll_exits() {
                        log::info!("[{}] Process exited with code: {:?}", exited.name, exited.code);
                        if exited.required {
                            return StopReason::RequiredExited {
                                name: exited.name,
                                code: exited.code,
                            };
                        }
                    }
                    if supervisor.live_count() == 0 {
                        log::info!("All processes have stopped");
                        return StopReason::AllExited;
                    }
                }
            }
        }
    }
}

async fn next_event(events: &mut Option<EventReceiver>) -> Option<(String, ProcessEvent)> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn drain_events(events: &mut Option<EventReceiver>) {
    if let Some(rx) = events {
        while let Ok((name, event)) = rx.try_recv() {
            log_event(&name, event);
        }
    }
}

fn log_event(name: &str, event: ProcessEvent) {
    match event {
        ProcessEvent::Output { line, is_stderr } => {
            if is_stderr {
                log::warn!("[{}] {}", name, line);
            } else {
                log::info!("[{}] {}", name, line);
            }
        }
        ProcessEvent::Exited { code } => {
            log::debug!("[{}] Exited with code: {:?}", name, code);
        }
        ProcessEvent::Failed { error } => {
            log::error!("[{}] Process failed: {}", name, error);
        }
        ProcessEvent::Started { pid } => {
            log::info!("[{}] Process started with PID: {}", name, pid);
        }
    }
}

/// Errors that can occur while driving a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Description(#[from] DescriptionError),

    #[error("Actions can only be added while building (session is {0})")]
    NotBuilding(SessionState),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}
