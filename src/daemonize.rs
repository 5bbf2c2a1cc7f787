//! Fork into the background.
//!
//! Only the forking thread survives in the child, so callers must re-spawn any
//! helper threads (watchdog, credential refresh) inside the continuation, and
//! must not have a tokio runtime running at fork time.

use crate::Result;
use crate::pid_file::PidFile;
use miette::{IntoDiagnostic, miette};
use nix::unistd::{ForkResult, fork, setsid};
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;

/// Fork, and in the child: detach from the terminal, point stdio at /dev/null,
/// record the child's pid in `pid_file`, then run `continuation` and exit.
///
/// Returns the child's pid in the parent, which does nothing further.
pub fn daemonize<F>(pid_file: &PidFile, continuation: F) -> Result<u32>
where
    F: FnOnce() -> Result<()>,
{
    // SAFETY: the child only runs code owned by this process and never returns
    // into the caller's stack
    match unsafe { fork() }.into_diagnostic()? {
        ForkResult::Parent { child } => {
            debug!("forked daemon with pid {child}");
            Ok(child.as_raw() as u32)
        }
        ForkResult::Child => {
            let code = match run_child(pid_file, continuation) {
                Ok(()) => 0,
                Err(err) => {
                    error!("daemon failed: {err:?}");
                    1
                }
            };
            std::process::exit(code);
        }
    }
}

fn run_child<F>(pid_file: &PidFile, continuation: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    if let Err(err) = setsid() {
        warn!("setsid failed: {err}");
    }
    redirect_stdio_to_devnull()?;
    pid_file.write(std::process::id())?;
    continuation()
}

fn redirect_stdio_to_devnull() -> Result<()> {
    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .into_diagnostic()?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are open for the duration of the call
        if unsafe { libc::dup2(devnull.as_raw_fd(), fd) } == -1 {
            return Err(miette!(
                "failed to redirect fd {fd} to /dev/null: {}",
                std::io::Error::last_os_error()
            ));
        }
    }
    Ok(())
}
