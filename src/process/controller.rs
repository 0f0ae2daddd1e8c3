//! Process lifecycle: one exclusive subprocess slot per controller.
//!
//! A run goes `Idle → Configured → Running → Draining → Idle`. Every run
//! spawns a fresh child with fresh pipes. Two [`StreamPump`]s and an exit
//! watcher report on one ordered event channel, and a single coordinator task
//! consumes it: it fills the [`SinkPair`], invokes the chunk callbacks and,
//! once the child has exited *and* both streams reached end-of-file, fires
//! the completion callback exactly once.
//!
//! A grandchild that inherits the pipes can keep them open long after the
//! child is gone. Draining therefore stops [`LaunchConfig::drain_window`]
//! after the exit; pumps still attached at that point are aborted and the
//! completion fires with whatever output arrived.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{ByteSink, ProcessExit, RunEvent, SinkPair, StreamKind, StreamPump};
use crate::config::{ElevationConfig, EnvPolicy};

/// Default time a terminated child gets between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Default time output is still collected after the child has exited.
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Executable not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Observable lifecycle state of a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControllerState {
    #[default]
    Idle,
    /// Arguments and callbacks installed, child not yet spawned.
    Configured,
    /// Child alive, output streaming.
    Running,
    /// Child exited, remaining output being drained.
    Draining,
}

/// Static launch settings shared by every run of a controller.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub executable: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub env_policy: EnvPolicy,
    pub elevation: ElevationConfig,
    pub terminate_grace: Duration,
    /// How long to keep reading the pipes once the child has exited.
    pub drain_window: Duration,
}

impl LaunchConfig {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            working_dir: None,
            env: BTreeMap::new(),
            env_policy: EnvPolicy::default(),
            elevation: ElevationConfig::default(),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }

    /// Full argument vector for a request, program first.
    ///
    /// Elevated runs become `<elevation program> <elevation args..>
    /// <executable> <arguments..>`; others are `<executable> <arguments..>`.
    #[must_use]
    pub fn argv(&self, request: &RunRequest) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(request.arguments.len() + 4);
        if request.elevated {
            argv.push(OsString::from(&self.elevation.program));
            argv.extend(self.elevation.args.iter().map(OsString::from));
        }
        argv.push(self.executable.clone().into_os_string());
        argv.extend(request.arguments.iter().map(OsString::from));
        argv
    }

    fn build_command(&self, request: &RunRequest) -> Command {
        let argv = self.argv(request);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if request.writes_password() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        if self.env_policy == EnvPolicy::Replace {
            cmd.env_clear();
        }
        cmd.envs(&self.env);

        cmd
    }
}

/// Arguments and elevation details of a single run.
#[derive(Clone, Default)]
pub struct RunRequest {
    /// Base command followed by its arguments, without any elevation prefix.
    pub arguments: Vec<String>,
    pub elevated: bool,
    /// Written once to stdin, followed by a newline, when `elevated`.
    pub password: Option<String>,
}

impl RunRequest {
    fn writes_password(&self) -> bool {
        self.elevated && self.password.is_some()
    }
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("arguments", &self.arguments)
            .field("elevated", &self.elevated)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What the completion callback sees when a run finishes.
#[derive(Debug)]
pub struct RunOutput<'a> {
    pub exit: ProcessExit,
    pub stdout: &'a [u8],
    pub stderr: &'a [u8],
    /// The owning controller was dropped while this run was in flight.
    pub owner_dropped: bool,
}

/// Callback receiving each chunk of one stream.
pub type ChunkHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Callback receiving the final output of a run.
pub type CompletionHandler = Box<dyn FnOnce(RunOutput<'_>) + Send>;

/// Callbacks installed for one run.
#[derive(Default)]
pub struct RunHandlers {
    pub on_stdout: Option<ChunkHandler>,
    pub on_stderr: Option<ChunkHandler>,
    pub on_completion: Option<CompletionHandler>,
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    owner_dropped: Arc<AtomicBool>,
    handle: JoinHandle<SinkPair>,
}

/// Owns exactly one subprocess slot and drives runs through it.
pub struct ProcessController {
    launch: LaunchConfig,
    state: Arc<watch::Sender<ControllerState>>,
    active: Option<ActiveRun>,
    sinks: Option<SinkPair>,
    runs: u64,
}

impl ProcessController {
    #[must_use]
    pub fn new(launch: LaunchConfig) -> Self {
        let (state, _) = watch::channel(ControllerState::Idle);
        Self {
            launch,
            state: Arc::new(state),
            active: None,
            sinks: None,
            runs: 0,
        }
    }

    #[must_use]
    pub fn launch(&self) -> &LaunchConfig {
        &self.launch
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.launch.executable
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// True while a run has not yet delivered its completion.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Number of runs successfully spawned so far.
    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.runs
    }

    /// Start a run. Any run still in flight is terminated and fully drained
    /// first, so its completion callback has fired before this one spawns.
    ///
    /// Returns the run id once the child is spawned; output and completion
    /// arrive later through `handlers`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the child cannot be spawned. No completion
    /// callback fires for that run and the controller stays idle.
    pub async fn send(
        &mut self,
        request: RunRequest,
        handlers: RunHandlers,
    ) -> Result<u64, SpawnError> {
        let mut sinks = self.teardown().await;
        sinks.reset();
        self.state.send_replace(ControllerState::Configured);

        let mut child = match self.launch.build_command(&request).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    executable = %self.launch.executable.display(),
                    error = %e,
                    "failed to spawn process"
                );
                self.sinks = Some(sinks);
                self.state.send_replace(ControllerState::Idle);
                return Err(SpawnError::from_io(e));
            }
        };

        self.runs += 1;
        let id = self.runs;
        tracing::info!(
            run = id,
            pid = ?child.id(),
            elevated = request.elevated,
            command = %crate::display::format_command_line(&self.launch.argv(&request)),
            "spawned process"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(StreamPump::attach(
                StreamKind::Stdout,
                stdout,
                events_tx.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(StreamPump::attach(
                StreamKind::Stderr,
                stderr,
                events_tx.clone(),
            ));
        }

        let password = match (child.stdin.take(), request.password) {
            (Some(stdin), Some(password)) if request.elevated => Some((stdin, password)),
            _ => None,
        };

        let cancel = CancellationToken::new();
        tokio::spawn(watch_exit(
            id,
            child,
            password,
            cancel.clone(),
            self.launch.terminate_grace,
            events_tx,
        ));

        let owner_dropped = Arc::new(AtomicBool::new(false));
        self.state.send_replace(ControllerState::Running);

        let coordinator = Coordinator {
            id,
            events: events_rx,
            pumps,
            drain_window: self.launch.drain_window,
            sinks,
            handlers,
            state: Arc::clone(&self.state),
            owner_dropped: Arc::clone(&owner_dropped),
        };
        let handle = tokio::spawn(coordinator.run());

        self.active = Some(ActiveRun {
            id,
            cancel,
            owner_dropped,
            handle,
        });

        Ok(id)
    }

    /// Ask the current child to terminate. Does not wait; the completion
    /// callback still fires through the normal path once the child is gone.
    /// A no-op when idle.
    pub fn terminate(&self) {
        match &self.active {
            Some(run) if !run.handle.is_finished() => {
                tracing::info!(run = run.id, "termination requested");
                run.cancel.cancel();
            }
            _ => tracing::debug!("terminate called with no running process"),
        }
    }

    /// Terminate the current run, if any, and wait until its completion
    /// callback has fired.
    pub async fn shutdown(&mut self) {
        let sinks = self.teardown().await;
        self.sinks = Some(sinks);
    }

    /// Stop and drain the active run, handing back its sinks.
    async fn teardown(&mut self) -> SinkPair {
        let Some(run) = self.active.take() else {
            return self.sinks.take().unwrap_or_default();
        };

        if !run.handle.is_finished() {
            tracing::info!(run = run.id, "stopping previous run before starting a new one");
            run.cancel.cancel();
        }

        match run.handle.await {
            Ok(sinks) => sinks,
            Err(e) => {
                tracing::warn!(run = run.id, error = %e, "run coordinator failed");
                self.state.send_replace(ControllerState::Idle);
                SinkPair::default()
            }
        }
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        if let Some(run) = &self.active {
            if !run.handle.is_finished() {
                tracing::debug!(run = run.id, "controller dropped mid-run, terminating child");
                run.owner_dropped.store(true, Ordering::SeqCst);
                run.cancel.cancel();
            }
        }
    }
}

impl std::fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessController")
            .field("launch", &self.launch)
            .field("state", &self.state())
            .field("runs", &self.runs)
            .finish_non_exhaustive()
    }
}

/// Owns the child for one run: writes the password, waits for exit, and
/// turns cancellation into SIGTERM followed by SIGKILL after `grace`.
async fn watch_exit(
    run: u64,
    mut child: Child,
    password: Option<(ChildStdin, String)>,
    cancel: CancellationToken,
    grace: Duration,
    events: mpsc::UnboundedSender<RunEvent>,
) {
    if let Some((stdin, password)) = password {
        write_password(run, stdin, &password).await;
    }

    let status = tokio::select! {
        status = child.wait() => status,
        () = cancel.cancelled() => terminate_child(run, &mut child, grace).await,
    };

    let _ = events.send(RunEvent::Exited(status));
}

/// Best-effort single write; stdin is closed afterwards.
async fn write_password(run: u64, mut stdin: ChildStdin, password: &str) {
    let line = format!("{password}\n");
    if let Err(e) = stdin.write_all(line.as_bytes()).await {
        tracing::debug!(run, error = %e, "failed to write password to stdin");
        return;
    }
    if let Err(e) = stdin.flush().await {
        tracing::debug!(run, error = %e, "failed to flush stdin");
    }
}

async fn terminate_child(
    run: u64,
    child: &mut Child,
    grace: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
                tracing::debug!(run, error = %e, "SIGTERM failed");
            }

            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return status,
                Err(_) => {
                    tracing::warn!(run, "child ignored SIGTERM, killing");
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.start_kill() {
        tracing::debug!(run, error = %e, "kill failed");
    }
    child.wait().await
}

/// Consumes one run's events and performs the drain-then-signal sequence.
struct Coordinator {
    id: u64,
    events: mpsc::UnboundedReceiver<RunEvent>,
    pumps: Vec<StreamPump>,
    drain_window: Duration,
    sinks: SinkPair,
    handlers: RunHandlers,
    state: Arc<watch::Sender<ControllerState>>,
    owner_dropped: Arc<AtomicBool>,
}

impl Coordinator {
    async fn run(mut self) -> SinkPair {
        let mut open_streams = self.pumps.len();
        let mut exit: Option<ProcessExit> = None;
        let mut drain_deadline: Option<Instant> = None;
        let mut abandoned = false;

        while exit.is_none() || open_streams > 0 {
            let next = match drain_deadline {
                Some(deadline) => {
                    let next = tokio::time::timeout_at(deadline, self.events.recv()).await;
                    if let Ok(event) = next {
                        event
                    } else {
                        tracing::warn!(
                            run = self.id,
                            open_streams,
                            "output still open after child exit, abandoning remaining output"
                        );
                        abandoned = true;
                        break;
                    }
                }
                None => self.events.recv().await,
            };
            let Some(event) = next else {
                // Every sender is gone without an exit report.
                tracing::warn!(run = self.id, "run event channel closed early");
                break;
            };

            if let RunEvent::Exited(result) = event {
                let status = match result {
                    Ok(status) => ProcessExit::from_status(status),
                    Err(e) => {
                        tracing::warn!(run = self.id, error = %e, "waiting for child failed");
                        ProcessExit::abnormal()
                    }
                };
                tracing::debug!(run = self.id, %status, open_streams, "child exited, draining");
                self.state.send_replace(ControllerState::Draining);
                drain_deadline = Some(Instant::now() + self.drain_window);
                exit = Some(status);
            } else if self.handle(event) {
                open_streams = open_streams.saturating_sub(1);
            }
        }

        if abandoned {
            for pump in &self.pumps {
                pump.abort();
            }
            // Chunks already queued before the abort still belong to this run.
            while let Ok(event) = self.events.try_recv() {
                self.handle(event);
            }
        }
        for pump in self.pumps.drain(..) {
            pump.join().await;
        }

        let exit = exit.unwrap_or_else(ProcessExit::abnormal);
        let owner_dropped = self.owner_dropped.load(Ordering::SeqCst);
        tracing::info!(
            run = self.id,
            status = exit.status,
            reason = ?exit.reason,
            stdout_bytes = self.sinks.stdout.len(),
            stderr_bytes = self.sinks.stderr.len(),
            owner_dropped,
            "run finished"
        );

        let handlers = std::mem::take(&mut self.handlers);
        if let Some(on_completion) = handlers.on_completion {
            on_completion(RunOutput {
                exit,
                stdout: self.sinks.stdout.snapshot(),
                stderr: self.sinks.stderr.snapshot(),
                owner_dropped,
            });
        }
        self.state.send_replace(ControllerState::Idle);

        self.sinks
    }

    /// Apply one stream event. Returns true when a stream closed.
    fn handle(&mut self, event: RunEvent) -> bool {
        match event {
            RunEvent::Chunk { stream, bytes } => self.deliver(stream, &bytes),
            RunEvent::ReadFailed { stream, error } => {
                tracing::warn!(run = self.id, %stream, error = %error, "output stream failed");
            }
            RunEvent::Closed { stream } => {
                tracing::debug!(run = self.id, %stream, "stream drained");
                return true;
            }
            RunEvent::Exited(_) => {
                tracing::debug!(run = self.id, "duplicate exit report ignored");
            }
        }
        false
    }

    fn deliver(&mut self, stream: StreamKind, bytes: &[u8]) {
        tracing::trace!(run = self.id, %stream, len = bytes.len(), "chunk");
        let (sink, handler): (&mut ByteSink, _) = match stream {
            StreamKind::Stdout => (&mut self.sinks.stdout, self.handlers.on_stdout.as_mut()),
            StreamKind::Stderr => (&mut self.sinks.stderr, self.handlers.on_stderr.as_mut()),
        };
        sink.append(bytes);
        if let Some(handler) = handler {
            handler(bytes);
        }
    }
}
