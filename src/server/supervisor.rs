//! Server – Supervisor
//! ===================
//!
//! Owns at most one running `llama-server` child and moves it between two
//! states:
//!
//! ```text
//! Stopped ──start──▶ Running ──stop──▶ Stopped
//! ```
//!
//! * `start` on a live child is a no-op that reports
//!   [`StartOutcome::AlreadyRunning`]; a child that exited on its own counts
//!   as stopped and is replaced.
//! * `stop` never fails. It escalates graceful group signal → grace period →
//!   forceful group kill → direct `kill`, logging whatever goes wrong along
//!   the way, and always leaves the slot empty.
//! * Dropping the supervisor stops a tracked child.
//!
//! Which signals are sent is delegated to a [`TerminateGroup`]; the default is
//! the platform's [`PlatformTerminator`].

use std::{
    fmt::{self, Display},
    net::IpAddr,
    path::PathBuf,
    process::Command,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use bon::Builder;
use serde::{Deserialize, Serialize};

use super::{
    catalog::ModelCatalog,
    process::{
        DEFAULT_GRACE_PERIOD, FORCE_KILL_TIMEOUT, PlatformTerminator, ProcessError, ProcessHandle,
        TerminateGroup, spawn_in_new_group,
    },
};
use crate::error::{BackendError, BackendResult};

pub const DEFAULT_GPU_LAYERS: u32 = 0;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_CTX_SIZE: u32 = 2048;

/// Launch parameters for one server instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Builder)]
#[builder(on(String, into))]
pub struct StartArgs {
    /// Path to (or bare name of) the `llama-server` binary.
    #[builder(into)]
    pub executable: PathBuf,
    /// Catalog key of the model to load.
    pub model_key: String,
    /// Layers offloaded to the GPU (`-ngl`).
    #[builder(default = DEFAULT_GPU_LAYERS)]
    pub gpu_layers: u32,
    #[builder(default = String::from(DEFAULT_HOST))]
    pub host: String,
    #[builder(default = DEFAULT_PORT)]
    pub port: u16,
    /// Context window in tokens (`-c`).
    #[builder(default = DEFAULT_CTX_SIZE)]
    pub ctx_size: u32,
    /// Appended verbatim after the generated flags.
    #[builder(default)]
    pub extra_args: Vec<String>,
}

impl StartArgs {
    /// `http://host:port`, with IPv6 literals bracketed.
    ///
    /// # Errors
    /// [`BackendError::Config`] unless `host` is a bare host name or address,
    /// i.e. the URL parses back to exactly this host and port. Paths,
    /// credentials and embedded ports are rejected.
    pub fn base_url(&self) -> BackendResult<String> {
        let address = self.host.parse::<IpAddr>().ok();
        let host = match address {
            Some(IpAddr::V6(_)) => format!("[{}]", self.host),
            _ => self.host.clone(),
        };
        let base_url = format!("http://{host}:{}", self.port);
        let parsed = url::Url::parse(&base_url)
            .map_err(|e| BackendError::config("host", format!("`{}`: {e}", self.host)))?;

        let same_host = match (parsed.host(), address) {
            (Some(url::Host::Ipv4(got)), Some(IpAddr::V4(want))) => got == want,
            (Some(url::Host::Ipv6(got)), Some(IpAddr::V6(want))) => got == want,
            (Some(url::Host::Domain(got)), None) => got.eq_ignore_ascii_case(&self.host),
            _ => false,
        };
        if !same_host
            || parsed.port_or_known_default() != Some(self.port)
            || parsed.path() != "/"
            || !parsed.username().is_empty()
            || parsed.password().is_some()
        {
            return Err(BackendError::config(
                "host",
                format!("`{}` is not a bare host name or address", self.host),
            ));
        }
        Ok(base_url)
    }

    fn args(&self, model_path: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            model_path.display().to_string(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "-c".to_string(),
            self.ctx_size.to_string(),
            "-ngl".to_string(),
            self.gpu_layers.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Started {
        /// Rendered launch command, for display only.
        command_line: String,
        base_url: String,
    },
}

impl Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::AlreadyRunning => f.write_str("server is already running"),
            StartOutcome::Started { command_line, .. } => {
                write!(f, "launch command: {command_line}")
            }
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
}

impl Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopOutcome::NotRunning => "server is not running",
            StopOutcome::Stopped => "server stopped",
        })
    }
}

#[derive(Debug)]
struct SupervisedProcess {
    handle: ProcessHandle,
    command_line: String,
}

#[derive(Debug)]
pub struct ServerSupervisor<T: TerminateGroup = PlatformTerminator> {
    catalog: Option<ModelCatalog>,
    slot: Mutex<Option<SupervisedProcess>>,
    terminator: T,
    grace_period: Duration,
}

impl ServerSupervisor {
    pub fn new(catalog: Option<ModelCatalog>) -> Self {
        Self::with_terminator(catalog, PlatformTerminator::default())
    }
}

impl<T: TerminateGroup> ServerSupervisor<T> {
    pub fn with_terminator(catalog: Option<ModelCatalog>, terminator: T) -> Self {
        Self {
            catalog,
            slot: Mutex::new(None),
            terminator,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn catalog(&self) -> Option<&ModelCatalog> {
        self.catalog.as_ref()
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<SupervisedProcess>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Launches the server unless one is already running.
    pub fn start(&self, args: &StartArgs) -> BackendResult<StartOutcome> {
        let mut slot = self.lock_slot();

        if let Some(current) = slot.as_mut() {
            match current.handle.try_wait() {
                Ok(None) => {
                    crate::debug!(
                        "start ignored; PID {} still running",
                        current.handle.pid()
                    );
                    return Ok(StartOutcome::AlreadyRunning);
                }
                Ok(Some(status)) => crate::info!(
                    "Previous server (PID {}) exited on its own with {status}; replacing it",
                    current.handle.pid()
                ),
                Err(e) => {
                    crate::warn!("Cannot query previous server: {e}; assuming it still runs");
                    return Ok(StartOutcome::AlreadyRunning);
                }
            }
        }

        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| BackendError::config("model_catalog", "no model catalog loaded"))?;
        let model_path = catalog.model_path(&args.model_key)?;
        if !model_path.is_file() {
            return Err(BackendError::config(
                "model_key",
                format!(
                    "model file for `{}` not found at {}",
                    args.model_key,
                    model_path.display()
                ),
            ));
        }
        let base_url = args.base_url()?;

        let argv = args.args(&model_path);
        let command_line = std::iter::once(args.executable.display().to_string())
            .chain(argv.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        let mut cmd = Command::new(&args.executable);
        cmd.args(&argv);
        let handle = spawn_in_new_group(cmd)?;
        crate::info!(
            "Started llama-server (PID {}) at {base_url}: {command_line}",
            handle.pid()
        );

        *slot = Some(SupervisedProcess {
            handle,
            command_line: command_line.clone(),
        });
        Ok(StartOutcome::Started {
            command_line,
            base_url,
        })
    }

    /// Stops the tracked server, if any. Blocks for at most the grace period
    /// plus [`FORCE_KILL_TIMEOUT`].
    pub fn stop(&self) -> StopOutcome {
        // Held for the whole shutdown so a concurrent start cannot race it.
        let mut slot = self.lock_slot();
        let Some(process) = slot.take() else {
            return StopOutcome::NotRunning;
        };
        self.shut_down(process);
        StopOutcome::Stopped
    }

    fn shut_down(&self, process: SupervisedProcess) {
        let SupervisedProcess {
            mut handle,
            command_line,
        } = process;
        let pid = handle.pid();
        crate::debug!("Stopping PID {pid} ({command_line})");

        match handle.try_wait() {
            Ok(Some(status)) => {
                crate::info!("Server (PID {pid}) had already exited with {status}");
                return;
            }
            Ok(None) => (),
            Err(e) => crate::warn!("Cannot query PID {pid}: {e}"),
        }

        match self.terminator.terminate_group(&handle, false) {
            Ok(()) => match handle.wait_timeout(self.grace_period) {
                Ok(Some(status)) => {
                    crate::info!("Server (PID {pid}) exited gracefully with {status}");
                    return;
                }
                Ok(None) => crate::warn!(
                    "Server (PID {pid}) ignored graceful stop for {:?}; forcing",
                    self.grace_period
                ),
                Err(e) => crate::warn!("Waiting for PID {pid} failed: {e}; forcing"),
            },
            Err(e) => crate::warn!("Graceful stop of PID {pid} failed: {e}; forcing"),
        }

        if let Err(e) = self.terminator.terminate_group(&handle, true) {
            crate::warn!("Forceful group kill of PID {pid} failed: {e}; killing child directly");
            if let Err(e) = handle.kill() {
                crate::warn!("Direct kill of PID {pid} failed: {e}");
            }
        }

        match handle.wait_timeout(FORCE_KILL_TIMEOUT) {
            Ok(Some(status)) => crate::info!("Server (PID {pid}) force-killed; exit status {status}"),
            Ok(None) => {
                let err = ProcessError::TerminationTimeout {
                    operation: "force-kill",
                    elapsed: FORCE_KILL_TIMEOUT,
                    pid,
                };
                crate::error!("{err}");
            }
            Err(e) => crate::warn!("Reaping PID {pid} failed: {e}"),
        }
    }

    /// `true` while a tracked child has not exited.
    pub fn is_running(&self) -> bool {
        self.lock_slot()
            .as_mut()
            .is_some_and(|p| matches!(p.handle.try_wait(), Ok(None)))
    }

    /// PID of the tracked child, live or not yet reaped.
    pub fn pid(&self) -> Option<u32> {
        self.lock_slot().as_ref().map(|p| p.handle.pid())
    }
}

impl<T: TerminateGroup> Drop for ServerSupervisor<T> {
    fn drop(&mut self) {
        if self.stop() == StopOutcome::Stopped {
            crate::debug!("Server stopped on supervisor drop");
        }
    }
}
