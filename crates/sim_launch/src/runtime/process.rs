//! Managed process abstraction

use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{ArgValue, OutputPolicy, PackageIndex};

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is pending start
    Pending,
    /// Process is starting
    Starting,
    /// Process is running
    Running,
    /// Process has stopped with exit code (None when killed by a signal)
    Stopped(Option<i32>),
    /// Process failed to start
    Failed,
}

impl ProcessStatus {
    /// Check if process is running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running | ProcessStatus::Starting)
    }

    /// Check if process has stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_) | ProcessStatus::Failed)
    }
}

/// Fully resolved description of one process to start
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSpec {
    /// Entity name (for logging); unique within a plan
    pub name: String,
    /// Explicit ROS node name, remapped with `__node:=`
    pub node_name: Option<String>,
    /// Package whose `lib/` directory holds the executable
    pub package: Option<String>,
    /// Executable name or path
    pub executable: String,
    /// Command line arguments
    pub arguments: Vec<String>,
    /// Named parameters, passed through a generated params file
    pub parameters: IndexMap<String, String>,
    /// Extra environment variables
    pub env: IndexMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    pub output: OutputPolicy,
    pub required: bool,
}

impl ProcessSpec {
    /// Spec for a plain executable with default settings
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_name: None,
            package: None,
            executable: executable.into(),
            arguments: Vec::new(),
            parameters: IndexMap::new(),
            env: IndexMap::new(),
            working_dir: None,
            output: OutputPolicy::default(),
            required: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_output(mut self, output: OutputPolicy) -> Self {
        self.output = output;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Whether ROS command line conventions apply
    pub fn is_node(&self) -> bool {
        self.package.is_some()
    }
}

/// Event emitted by a managed process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Process started
    Started { pid: u32 },
    /// Process output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    /// Process exited
    Exited { code: Option<i32> },
    /// Process failed to start
    Failed { error: String },
}

/// How a stop request ended for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace period
    Graceful(Option<i32>),
    /// Had to be killed after the grace period
    Forced,
    /// Was not running
    NotRunning,
}

/// A managed child process
pub struct ManagedProcess {
    /// Process specification
    pub spec: ProcessSpec,
    /// Current status
    pub status: ProcessStatus,
    /// Process ID (if running)
    pub pid: Option<u32>,
    /// Start time
    pub started_at: Option<Instant>,
    /// Generated parameter file, if any
    pub params_file: Option<PathBuf>,
    /// Child process handle
    child: Option<Child>,
    /// Event sender
    event_tx: Option<mpsc::UnboundedSender<(String, ProcessEvent)>>,
}

impl ManagedProcess {
    /// Create a new managed process
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            status: ProcessStatus::Pending,
            pid: None,
            started_at: None,
            params_file: None,
            child: None,
            event_tx: None,
        }
    }

    /// Set the event sender for this process
    pub fn with_event_sender(
        mut self,
        tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
    ) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((self.spec.name.clone(), event));
        }
    }

    /// Executable path and full argument vector
    pub fn command_line(
        &self,
        packages: &PackageIndex,
        params_file: Option<&Path>,
    ) -> Result<(PathBuf, Vec<String>), ProcessError> {
        let executable = match &self.spec.package {
            Some(package) => packages
                .executable(package, &self.spec.executable)
                .map_err(|e| self.start_error(e.to_string()))?,
            None => PathBuf::from(&self.spec.executable),
        };

        let mut args = self.spec.arguments.clone();
        if self.spec.is_node() {
            args.push("--ros-args".to_string());
            if let Some(node_name) = &self.spec.node_name {
                args.push("-r".to_string());
                args.push(format!("__node:={}", node_name));
            }
        }
        if let Some(file) = params_file {
            args.push("--params-file".to_string());
            args.push(file.to_string_lossy().into_owned());
        }

        Ok((executable, args))
    }

    /// Write parameters to `<runtime_dir>/<name>.params.yaml`
    fn write_params_file(&self, runtime_dir: &Path) -> Result<Option<PathBuf>, ProcessError> {
        if self.spec.parameters.is_empty() {
            return Ok(None);
        }

        let params: IndexMap<&str, ArgValue> = self
            .spec
            .parameters
            .iter()
            .map(|(k, v)| (k.as_str(), ArgValue::from_str(v)))
            .collect();
        let mut node = IndexMap::new();
        node.insert("ros__parameters", params);
        let mut document = IndexMap::new();
        document.insert("/**", node);

        let yaml = serde_yaml::to_string(&document)
            .map_err(|e| self.start_error(format!("cannot encode parameters: {}", e)))?;

        let file_name: String = self
            .spec
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = runtime_dir.join(format!("{}.params.yaml", file_name));

        std::fs::create_dir_all(runtime_dir)
            .and_then(|_| std::fs::write(&path, yaml))
            .map_err(|e| self.start_error(format!("cannot write '{}': {}", path.display(), e)))?;

        Ok(Some(path))
    }

    fn start_error(&self, reason: String) -> ProcessError {
        ProcessError::ProcessStart {
            name: self.spec.name.clone(),
            reason,
        }
    }

    fn fail(&mut self, error: ProcessError) -> ProcessError {
        self.status = ProcessStatus::Failed;
        log::error!("[{}] {}", self.spec.name, error);
        self.emit(ProcessEvent::Failed {
            error: error.to_string(),
        });
        error
    }

    /// Start the process
    pub async fn start(
        &mut self,
        packages: &PackageIndex,
        runtime_dir: &Path,
    ) -> Result<(), ProcessError> {
        if self.status.is_running() {
            return Err(ProcessError::AlreadyRunning(self.spec.name.clone()));
        }

        self.status = ProcessStatus::Starting;

        let params_file = match self.write_params_file(runtime_dir) {
            Ok(file) => file,
            Err(e) => return Err(self.fail(e)),
        };
        self.params_file = params_file.clone();

        let (executable, args) = match self.command_line(packages, params_file.as_deref()) {
            Ok(cmd) => cmd,
            Err(e) => return Err(self.fail(e)),
        };

        log::info!(
            "[{}] Starting: {} {}",
            self.spec.name,
            executable.display(),
            args.join(" ")
        );

        let (stdout, stderr) = match self.spec.output {
            OutputPolicy::Inherit => (Stdio::inherit(), Stdio::inherit()),
            OutputPolicy::Capture => (Stdio::piped(), Stdio::piped()),
            OutputPolicy::Discard => (Stdio::null(), Stdio::null()),
        };

        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id().unwrap_or(0);
                self.pid = Some(pid);
                self.status = ProcessStatus::Running;
                self.started_at = Some(Instant::now());

                self.emit(ProcessEvent::Started { pid });

                // Spawn output readers
                if let Some(stdout) = child.stdout.take() {
                    self.forward_lines(stdout, false);
                }
                if let Some(stderr) = child.stderr.take() {
                    self.forward_lines(stderr, true);
                }

                self.child = Some(child);
                Ok(())
            }
            Err(e) => {
                let error = self.start_error(format!(
                    "failed to spawn '{}': {}",
                    executable.display(),
                    e
                ));
                Err(self.fail(error))
            }
        }
    }

    fn forward_lines<R>(&self, stream: R, is_stderr: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = self.spec.name.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match &tx {
                    Some(tx) => {
                        let _ = tx.send((name.clone(), ProcessEvent::Output { line, is_stderr }));
                    }
                    None if is_stderr => log::warn!("[{}] {}", name, line),
                    None => log::info!("[{}] {}", name, line),
                }
            }
        });
    }

    fn mark_exited(&mut self, code: Option<i32>) {
        self.status = ProcessStatus::Stopped(code);
        self.pid = None;
        self.child = None;
        self.emit(ProcessEvent::Exited { code });
    }

    /// Ask the process to exit (SIGTERM on Unix)
    pub fn terminate(&mut self) {
        if self.child.is_none() {
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    log::debug!("[{}] SIGTERM failed: {}", self.spec.name, e);
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On non-Unix, just kill immediately
            if let Some(child) = self.child.as_mut() {
                let _ = child.start_kill();
            }
        }
    }

    /// Wait for exit until `deadline`. Returns `None` on timeout.
    pub async fn wait_until(&mut self, deadline: Instant) -> Option<Option<i32>> {
        let result = match self.child.as_mut() {
            Some(child) => tokio::time::timeout_at(deadline, child.wait()).await,
            None => return Some(self.exit_code()),
        };

        match result {
            Ok(Ok(status)) => {
                let code = status.code();
                log::info!("[{}] Process exited with code: {:?}", self.spec.name, code);
                self.mark_exited(code);
                Some(code)
            }
            Ok(Err(e)) => {
                log::error!("[{}] Error waiting for process: {}", self.spec.name, e);
                self.mark_exited(None);
                Some(None)
            }
            Err(_) => None,
        }
    }

    /// Kill the process and reap it
    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill().await {
                log::error!("[{}] Failed to kill process: {}", self.spec.name, e);
            }
            self.mark_exited(None);
        }
    }

    /// Wait for a terminated process until `deadline`, then SIGKILL it.
    /// `grace` is only used for reporting.
    pub async fn stop_by(&mut self, deadline: Instant, grace: Duration) -> StopOutcome {
        if self.child.is_none() {
            return StopOutcome::NotRunning;
        }

        match self.wait_until(deadline).await {
            Some(code) => StopOutcome::Graceful(code),
            None => {
                let timeout_error = ProcessError::ShutdownTimeout {
                    name: self.spec.name.clone(),
                    grace,
                };
                log::warn!("{}, forcing kill", timeout_error);
                self.kill().await;
                StopOutcome::Forced
            }
        }
    }

    /// Block until the process exits
    pub async fn wait(&mut self) -> Result<Option<i32>, ProcessError> {
        let result = match self.child.as_mut() {
            Some(child) => child.wait().await,
            None if self.status.is_stopped() => return Ok(self.exit_code()),
            None => return Err(ProcessError::NotRunning(self.spec.name.clone())),
        };

        match result {
            Ok(status) => {
                let code = status.code();
                self.mark_exited(code);
                Ok(code)
            }
            Err(e) => Err(self.start_error(format!("wait failed: {}", e))),
        }
    }

    /// Check if the process is still running
    pub fn check_status(&mut self) -> ProcessStatus {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.mark_exited(status.code());
                }
                Ok(None) => {
                    // Still running
                }
                Err(e) => {
                    log::error!(
                        "[{}] Error checking process status: {}",
                        self.spec.name,
                        e
                    );
                }
            }
        }

        self.status
    }

    fn exit_code(&self) -> Option<i32> {
        match self.status {
            ProcessStatus::Stopped(code) => code,
            _ => None,
        }
    }

    /// Get uptime duration
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to start process '{name}': {reason}")]
    ProcessStart { name: String, reason: String },

    #[error("Process '{0}' is not running")]
    NotRunning(String),

    #[error("Unknown process handle #{0}")]
    UnknownHandle(usize),

    #[error("Process '{name}' did not exit within {grace:?}")]
    ShutdownTimeout { name: String, grace: Duration },
}
