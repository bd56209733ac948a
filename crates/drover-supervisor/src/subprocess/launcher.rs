//! Process launcher with a uniform handle across launch modes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::mux::{MuxConfig, TranscriptChunk, spawn_multiplexer};

/// How a child is started and what the caller gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Inherit the terminal and block until the child exits.
    Run,
    /// Start with null stdio; the caller may wait but does not read output.
    Start,
    /// Start in its own process group and hand back only the pid. The
    /// caller never waits.
    StartDetached,
    /// Pipe stdout and stderr through the multiplexer.
    Capture,
}

/// Everything needed to start one child.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Complete child environment. `None` inherits the supervisor's.
    pub env: Option<BTreeMap<String, String>>,
    pub working_directory: Option<PathBuf>,
    pub mode: LaunchMode,
    pub mux: MuxConfig,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, mode: LaunchMode) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: None,
            working_directory: None,
            mode,
            mux: MuxConfig::default(),
        }
    }

    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_directory = dir;
        self
    }

    #[must_use]
    pub const fn mux(mut self, mux: MuxConfig) -> Self {
        self.mux = mux;
        self
    }
}

/// The supervisor's environment extended with `overrides`.
///
/// Supplying an environment replaces the inherited one entirely, so callers
/// that want inheritance plus additions build it here.
pub fn inherited_env_with<I, K, V>(overrides: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut env: BTreeMap<String, String> = std::env::vars().collect();
    env.extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
    env
}

/// Errors from launching or waiting on a child.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Executable not found: {program}")]
    NotFound { program: String },

    #[error("Failed to spawn process: {reason}")]
    SpawnFailed { reason: String },

    #[error("Failed to capture {stream} pipe")]
    PipeUnavailable { stream: &'static str },

    #[error("Failed to wait for process: {reason}")]
    Wait { reason: String },
}

enum Waiter {
    Child(Child),
    Exited(ExitStatus),
    Detached,
}

/// Handle to a launched child.
pub struct Launched {
    pid: u32,
    output: Option<mpsc::Receiver<TranscriptChunk>>,
    waiter: Waiter,
}

impl std::fmt::Debug for Launched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launched")
            .field("pid", &self.pid)
            .field("captured", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

impl Launched {
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the chunk channel. `Some` exactly once, and only in
    /// [`LaunchMode::Capture`].
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<TranscriptChunk>> {
        self.output.take()
    }

    /// Wait for the child to exit and release the OS handle.
    pub async fn wait(&mut self) -> Result<ExitStatus, LaunchError> {
        match &mut self.waiter {
            Waiter::Child(child) => {
                let status = child.wait().await.map_err(|e| LaunchError::Wait {
                    reason: e.to_string(),
                })?;
                debug!(pid = self.pid, %status, "Child exited");
                self.waiter = Waiter::Exited(status);
                Ok(status)
            }
            Waiter::Exited(status) => Ok(*status),
            Waiter::Detached => Err(LaunchError::Wait {
                reason: format!("process {} was started detached", self.pid),
            }),
        }
    }
}

/// Start a child according to `spec`.
///
/// Fails fast, before any child runs, when the executable or working
/// directory is missing or a pipe cannot be set up. Once the child is
/// running only [`Launched::wait`] reports its outcome.
pub async fn launch(spec: LaunchSpec) -> Result<Launched, LaunchError> {
    if let Some(dir) = &spec.working_directory {
        if !dir.is_dir() {
            return Err(LaunchError::SpawnFailed {
                reason: format!("working directory {} does not exist", dir.display()),
            });
        }
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if let Some(dir) = &spec.working_directory {
        cmd.current_dir(dir);
    }
    if let Some(env) = &spec.env {
        cmd.env_clear().envs(env);
    }

    match spec.mode {
        LaunchMode::Run => {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
        LaunchMode::Start | LaunchMode::StartDetached => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }
        LaunchMode::Capture => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
    }
    #[cfg(unix)]
    {
        if spec.mode == LaunchMode::StartDetached {
            cmd.process_group(0);
        }
    }

    let program = spec.program.display().to_string();
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            LaunchError::NotFound {
                program: program.clone(),
            }
        } else {
            LaunchError::SpawnFailed {
                reason: format!("{program}: {e}"),
            }
        }
    })?;

    let Some(pid) = child.id() else {
        return Err(LaunchError::SpawnFailed {
            reason: format!("{program}: exited before its pid was read"),
        });
    };
    info!(pid, program = %program, mode = ?spec.mode, "Process started");

    match spec.mode {
        LaunchMode::Run => {
            let status = child.wait().await.map_err(|e| LaunchError::Wait {
                reason: e.to_string(),
            })?;
            Ok(Launched {
                pid,
                output: None,
                waiter: Waiter::Exited(status),
            })
        }
        LaunchMode::Start => Ok(Launched {
            pid,
            output: None,
            waiter: Waiter::Child(child),
        }),
        LaunchMode::StartDetached => Ok(Launched {
            pid,
            output: None,
            waiter: Waiter::Detached,
        }),
        LaunchMode::Capture => {
            let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
                let _ = child.start_kill();
                return Err(LaunchError::PipeUnavailable {
                    stream: "stdout/stderr",
                });
            };
            let output = spawn_multiplexer(stdout, stderr, spec.mux);
            Ok(Launched {
                pid,
                output: Some(output),
                waiter: Waiter::Child(child),
            })
        }
    }
}
