//! Public entry point for driving an executable.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::oneshot;

use super::{CommandError, InterfaceError};
use crate::command::CommandDescriptor;
use crate::config::{DriverConfig, ElevationConfig, EnvPolicy};
use crate::process::{
    ChunkHandler, CompletionHandler, ControllerState, LaunchConfig, ProcessController,
    ProcessExit, RunHandlers, RunOutput, RunRequest, TerminationReason,
};

/// Final result of one run, delivered to the completion callback.
#[derive(Debug)]
pub struct Completion<R> {
    pub exit: ProcessExit,
    /// Stdout decoded by the command's decoder.
    pub response: Option<R>,
    /// Non-empty stderr text, if any.
    pub error: Option<CommandError>,
}

impl<R> Completion<R> {
    fn from_output<C>(command: &C, output: &RunOutput<'_>) -> Self
    where
        C: CommandDescriptor<Response = R>,
    {
        if output.owner_dropped {
            return Self {
                exit: ProcessExit::abnormal(),
                response: None,
                error: None,
            };
        }

        Self {
            exit: output.exit,
            response: command.decode_response(output.stdout),
            error: CommandError::from_stderr(output.stderr),
        }
    }

    #[must_use]
    pub fn status(&self) -> i32 {
        self.exit.status
    }

    #[must_use]
    pub fn reason(&self) -> TerminationReason {
        self.exit.reason
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

/// Optional callbacks for one `send`.
pub struct Handlers<R> {
    on_output: Option<ChunkHandler>,
    on_error: Option<ChunkHandler>,
    on_completion: Option<Box<dyn FnOnce(Completion<R>) + Send>>,
}

impl<R> Default for Handlers<R> {
    fn default() -> Self {
        Self {
            on_output: None,
            on_error: None,
            on_completion: None,
        }
    }
}

impl<R> Handlers<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with every stdout chunk, in arrival order.
    #[must_use]
    pub fn on_output(mut self, f: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_output = Some(Box::new(f));
        self
    }

    /// Called with every stderr chunk, in arrival order.
    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called once when the process has exited and all output is drained.
    #[must_use]
    pub fn on_completion(mut self, f: impl FnOnce(Completion<R>) + Send + 'static) -> Self {
        self.on_completion = Some(Box::new(f));
        self
    }
}

/// Builder for an [`Interface`].
#[derive(Clone)]
pub struct InterfaceBuilder {
    launch: LaunchConfig,
    password: Option<String>,
}

impl InterfaceBuilder {
    /// Set the working directory for spawned processes.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.launch.working_dir = Some(dir.into());
        self
    }

    /// Add one environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.launch.env.insert(key.into(), value.into());
        self
    }

    /// Whether overrides merge with or replace the inherited environment.
    #[must_use]
    pub fn env_policy(mut self, policy: EnvPolicy) -> Self {
        self.launch.env_policy = policy;
        self
    }

    /// How elevated commands are launched.
    #[must_use]
    pub fn elevation(mut self, elevation: ElevationConfig) -> Self {
        self.launch.elevation = elevation;
        self
    }

    /// Password written to stdin of elevated runs.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Time a terminated child gets before it is killed outright.
    #[must_use]
    pub fn terminate_grace(mut self, grace: Duration) -> Self {
        self.launch.terminate_grace = grace;
        self
    }

    /// How long output is still collected once the child has exited.
    #[must_use]
    pub fn drain_window(mut self, window: Duration) -> Self {
        self.launch.drain_window = window;
        self
    }

    /// Validate the executable and create the interface.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError` if the executable path is empty, missing,
    /// not a regular file, or lacks an executable permission bit.
    pub fn build(self) -> Result<Interface, InterfaceError> {
        validate_executable(&self.launch.executable)?;
        tracing::debug!(
            executable = %self.launch.executable.display(),
            env_policy = ?self.launch.env_policy,
            "interface ready"
        );
        Ok(Interface {
            controller: ProcessController::new(self.launch),
            password: self.password,
        })
    }
}

impl fmt::Debug for InterfaceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceBuilder")
            .field("launch", &self.launch)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Typed façade over one executable and its single subprocess slot.
///
/// Dropping an interface mid-run terminates the child; the run's completion
/// callback still fires, with an uncaught-signal reason and no payload.
pub struct Interface {
    controller: ProcessController,
    password: Option<String>,
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("controller", &self.controller)
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

impl Interface {
    /// Create an interface with default settings.
    ///
    /// # Errors
    ///
    /// See [`InterfaceBuilder::build`].
    pub fn new(executable: impl Into<PathBuf>) -> Result<Self, InterfaceError> {
        Self::builder(executable).build()
    }

    #[must_use]
    pub fn builder(executable: impl Into<PathBuf>) -> InterfaceBuilder {
        InterfaceBuilder {
            launch: LaunchConfig::new(executable),
            password: None,
        }
    }

    /// Create an interface from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError::EmptyPath` if no executable is configured,
    /// otherwise see [`InterfaceBuilder::build`].
    pub fn from_config(config: &DriverConfig) -> Result<Self, InterfaceError> {
        let executable = config.executable.clone().ok_or(InterfaceError::EmptyPath)?;
        let mut builder = Self::builder(executable)
            .env_policy(config.env_policy)
            .elevation(config.elevation.clone())
            .terminate_grace(config.terminate_grace())
            .drain_window(config.drain_window());
        if let Some(ref dir) = config.working_dir {
            builder = builder.working_dir(dir);
        }
        for (key, value) in &config.env {
            builder = builder.env(key, value);
        }
        if let Some(password) = config.elevation.password() {
            builder = builder.password(password);
        }
        builder.build()
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        self.controller.executable()
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.controller.state()
    }

    /// The argument vector `command` would be spawned with, elevation
    /// program first when the command requires it.
    #[must_use]
    pub fn command_line<C: CommandDescriptor>(&self, command: &C) -> Vec<OsString> {
        self.controller.launch().argv(&self.request(command))
    }

    fn request<C: CommandDescriptor>(&self, command: &C) -> RunRequest {
        let elevated = command.requires_elevation();
        RunRequest {
            arguments: command.command_line(),
            elevated,
            password: if elevated { self.password.clone() } else { None },
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    /// Run `command`, streaming output to `handlers`.
    ///
    /// A run already in flight is terminated first. Returns the run id once
    /// the child has spawned; the completion callback fires later.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError::Spawn` if the process cannot be started. No
    /// completion callback fires in that case.
    pub async fn send<C>(
        &mut self,
        command: C,
        handlers: Handlers<C::Response>,
    ) -> Result<u64, InterfaceError>
    where
        C: CommandDescriptor,
    {
        let request = self.request(&command);

        let Handlers {
            on_output,
            on_error,
            on_completion,
        } = handlers;

        let on_completion: CompletionHandler = Box::new(move |output: RunOutput<'_>| {
            let completion = Completion::from_output(&command, &output);
            if let Some(callback) = on_completion {
                callback(completion);
            }
        });

        let id = self
            .controller
            .send(
                request,
                RunHandlers {
                    on_stdout: on_output,
                    on_stderr: on_error,
                    on_completion: Some(on_completion),
                },
            )
            .await?;
        Ok(id)
    }

    /// Run `command` and wait for its completion.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError::Spawn` if the process cannot be started, or
    /// `InterfaceError::CompletionLost` if the run ended without reporting.
    pub async fn run<C>(&mut self, command: C) -> Result<Completion<C::Response>, InterfaceError>
    where
        C: CommandDescriptor,
    {
        let (tx, rx) = oneshot::channel();
        self.send(
            command,
            Handlers::new().on_completion(move |completion| {
                let _ = tx.send(completion);
            }),
        )
        .await?;
        rx.await.map_err(|_| InterfaceError::CompletionLost)
    }

    /// Ask the running process to terminate. A no-op when idle.
    pub fn terminate_execution(&self) {
        self.controller.terminate();
    }

    /// Terminate any run and wait until its completion has been delivered.
    pub async fn shutdown(&mut self) {
        self.controller.shutdown().await;
    }
}

fn validate_executable(path: &Path) -> Result<(), InterfaceError> {
    if path.as_os_str().is_empty() {
        return Err(InterfaceError::EmptyPath);
    }

    let metadata =
        std::fs::metadata(path).map_err(|_| InterfaceError::NotFound(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(InterfaceError::NotAFile(path.to_path_buf()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(InterfaceError::NotExecutable(path.to_path_buf()));
        }
    }

    Ok(())
}
