//! Child-process helpers shared across the workspace.
//!
//! - [`tokio_command`] builds a command that never flashes a console window on Windows.
//! - [`terminate_gracefully`] stops a running child: a polite termination request first,
//!   a hard kill once the grace period runs out.

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<std::ffi::OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// How a child process ended after [`terminate_gracefully`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before any signal was sent.
    AlreadyExited,
    /// The process exited within the grace period after the termination request.
    Graceful,
    /// The grace period elapsed and the process was killed.
    Killed,
}

/// Ask a child process to stop, escalating to a kill after `grace`.
///
/// On unix the request is `SIGTERM`; elsewhere there is no polite signal, so the
/// process is killed straight away. The child is always reaped before returning.
#[cfg(feature = "tokio")]
pub async fn terminate_gracefully(
    child: &mut tokio::process::Child,
    grace: std::time::Duration,
) -> std::io::Result<Termination> {
    if child.try_wait()?.is_some() {
        return Ok(Termination::AlreadyExited);
    }

    let Some(pid) = child.id() else {
        // Already reaped by someone else.
        return Ok(Termination::AlreadyExited);
    };

    if send_terminate(pid) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => return Ok(Termination::Graceful),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::debug!(pid, "process ignored termination request, killing");
            }
        }
    }

    child.kill().await?;
    Ok(Termination::Killed)
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(pid, error = %e, "failed to send SIGTERM");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> bool {
    false
}
