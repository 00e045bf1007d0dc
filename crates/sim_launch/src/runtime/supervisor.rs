//! Process supervisor - starts plan entries and tears them down

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::PackageIndex;
use crate::runtime::process::{
    ManagedProcess, ProcessError, ProcessEvent, ProcessSpec, ProcessStatus, StopOutcome,
};

/// Receiver side of the process event channel
pub type EventReceiver = mpsc::UnboundedReceiver<(String, ProcessEvent)>;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory for generated parameter files
    pub runtime_dir: PathBuf,
    /// Time between SIGTERM and SIGKILL during shutdown
    pub grace_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            runtime_dir: std::env::temp_dir().join(format!("sim_launch-{}", std::process::id())),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Opaque handle to a started process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(usize);

/// A process that exited on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitedProcess {
    pub handle: ProcessHandle,
    pub name: String,
    pub code: Option<i32>,
    pub required: bool,
}

/// Result of [`Supervisor::stop_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Exited within the grace period
    pub stopped: Vec<String>,
    /// Killed after the grace period ran out
    pub forced: Vec<String>,
}

/// Owns every process started in a session
pub struct Supervisor {
    config: SupervisorConfig,
    packages: PackageIndex,
    processes: Vec<ManagedProcess>,
    event_tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
    event_rx: Option<EventReceiver>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, packages: PackageIndex) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            packages,
            processes: Vec::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver so it can be polled independently
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.event_rx.take()
    }

    /// Start one process. A failed start is recorded and returned as an error.
    pub async fn start(&mut self, spec: ProcessSpec) -> Result<ProcessHandle, ProcessError> {
        let mut process = ManagedProcess::new(spec).with_event_sender(self.event_tx.clone());
        let result = process.start(&self.packages, &self.config.runtime_dir).await;

        let handle = ProcessHandle(self.processes.len());
        self.processes.push(process);
        result.map(|_| handle)
    }

    /// Block until the process behind `handle` exits
    pub async fn wait_for(&mut self, handle: ProcessHandle) -> Result<Option<i32>, ProcessError> {
        self.processes
            .get_mut(handle.0)
            .ok_or(ProcessError::UnknownHandle(handle.0))?
            .wait()
            .await
    }

    /// Processes that exited since the last poll
    pub fn poll_exits(&mut self) -> Vec<ExitedProcess> {
        let mut exited = Vec::new();
        for (index, process) in self.processes.iter_mut().enumerate() {
            if !process.status.is_running() {
                continue;
            }
            if let ProcessStatus::Stopped(code) = process.check_status() {
                exited.push(ExitedProcess {
                    handle: ProcessHandle(index),
                    name: process.spec.name.clone(),
                    code,
                    required: process.spec.required,
                });
            }
        }
        exited
    }

    /// Number of processes still running
    pub fn live_count(&self) -> usize {
        self.processes
            .iter()
            .filter(|p| p.status.is_running())
            .count()
    }

    /// Stop all processes with the configured grace period
    pub async fn stop_all(&mut self) -> StopReport {
        self.stop_all_within(self.config.grace_period).await
    }

    /// SIGTERM every live process, wait under one shared deadline, then
    /// SIGKILL whatever is left. Processes are signalled in reverse start order.
    pub async fn stop_all_within(&mut self, grace: Duration) -> StopReport {
        let mut report = StopReport::default();

        let live: Vec<usize> = self
            .processes
            .iter_mut()
            .enumerate()
            .filter_map(|(i, p)| p.check_status().is_running().then_some(i))
            .collect();

        if live.is_empty() {
            self.remove_params_files();
            return report;
        }

        log::info!("Shutting down {} processes...", live.len());
        for &index in live.iter().rev() {
            let process = &mut self.processes[index];
            match process.uptime() {
                Some(uptime) => {
                    log::info!("[{}] Stopping process after {:.1?}", process.spec.name, uptime)
                }
                None => log::info!("[{}] Stopping process...", process.spec.name),
            }
            process.terminate();
        }

        let deadline = Instant::now() + grace;
        for &index in live.iter().rev() {
            let process = &mut self.processes[index];
            let name = process.spec.name.clone();
            match process.stop_by(deadline, grace).await {
                StopOutcome::Graceful(_) | StopOutcome::NotRunning => report.stopped.push(name),
                StopOutcome::Forced => report.forced.push(name),
            }
        }

        self.remove_params_files();
        log::info!("All processes shut down");
        report
    }

    /// Remove generated parameter files, and the runtime directory once empty
    fn remove_params_files(&mut self) {
        for process in &mut self.processes {
            if let Some(file) = process.params_file.take() {
                if let Err(e) = std::fs::remove_file(&file) {
                    log::debug!("Failed to remove params file {}: {}", file.display(), e);
                }
            }
        }

        let dir = &self.config.runtime_dir;
        if dir.is_dir() {
            // Fails while anything else still lives there, which is fine
            if let Err(e) = std::fs::remove_dir(dir) {
                log::debug!("Keeping runtime directory {}: {}", dir.display(), e);
            }
        }
    }

    pub fn get(&self, handle: ProcessHandle) -> Option<&ManagedProcess> {
        self.processes.get(handle.0)
    }

    /// Get process status summary
    pub fn status(&self) -> Vec<(&str, ProcessStatus)> {
        self.processes
            .iter()
            .map(|p| (p.spec.name.as_str(), p.status))
            .collect()
    }
}
