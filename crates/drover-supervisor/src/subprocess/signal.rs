//! Signals and liveness probes for agent processes addressed by pid.
//!
//! The process that signals an agent is usually not the one that spawned it
//! (a foreground `drover kill` against a detached worker's child), so these
//! helpers work on raw pids rather than on a `Child` handle.

use std::io;
use std::time::Duration;

use tracing::{debug, warn};

/// Interval between liveness probes while waiting for a terminated process.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Signals the supervisor sends to agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Soft stop (SIGINT); the agent may wind down its turn.
    Interrupt,
    /// Hard stop request (SIGTERM).
    Terminate,
    /// SIGKILL.
    Kill,
}

impl Signal {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    const fn raw(self) -> libc::c_int {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Send `signal` to `pid`.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
    // SAFETY: kill(2) has no memory-safety preconditions; pid is positive.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid, signal.raw()) };
    if ret == 0 {
        debug!(pid, signal = signal.as_str(), "Signal sent");
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is only supported on Unix systems", signal.as_str()),
    ))
}

/// Whether a signal error means the process no longer exists.
pub fn is_no_such_process(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ESRCH)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

/// Probe whether `pid` is still running with `kill(pid, 0)`.
///
/// `EPERM` means the process exists but belongs to someone else, which
/// still counts as alive.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub const fn is_alive(_pid: u32) -> bool {
    true
}

/// Terminate `pid`: SIGTERM, wait up to `grace`, then SIGKILL.
///
/// A process that is already gone is not an error.
pub async fn terminate(pid: u32, grace: Duration) -> io::Result<()> {
    match send_signal(pid, Signal::Terminate) {
        Ok(()) => {}
        Err(e) if is_no_such_process(&e) => return Ok(()),
        Err(e) => return Err(e),
    }

    let exited = tokio::time::timeout(grace, async {
        while is_alive(pid) {
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok();

    if !exited {
        warn!(pid, "Grace period expired, sending SIGKILL");
        match send_signal(pid, Signal::Kill) {
            Ok(()) => {}
            Err(e) if is_no_such_process(&e) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
