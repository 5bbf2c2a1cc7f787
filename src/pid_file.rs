//! Single-instance guard: one `<pid_dir>/<name>.pid` per running controller.

use crate::Result;
use crate::error::{FileError, SupervisorError};
use crate::procs::PROCS;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PidFile {
    name: String,
    path: PathBuf,
}

impl PidFile {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: Self::path_for(dir, name),
        }
    }

    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.pid"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Claim the name for this process. Fails if another instance holds it.
    pub fn create(&self) -> Result<()> {
        if self.exists() {
            let pid = self.read().ok().flatten();
            let help = match pid {
                Some(pid) if !PROCS.is_running(pid) => Some(format!(
                    "process {pid} is no longer running; remove the stale pid file {}",
                    self.path.display()
                )),
                Some(_) => Some(format!("stop it first with: trema killall {}", self.name)),
                None => None,
            };
            return Err(SupervisorError::AlreadyRunning {
                name: self.name.clone(),
                path: self.path.clone(),
                pid,
                help,
            }
            .into());
        }
        self.write(std::process::id())
    }

    /// Overwrite with `pid`. Used again after daemonizing since the child has a new pid.
    pub fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            xx::file::mkdirp(parent)?;
        }
        xx::file::write(&self.path, pid.to_string()).map_err(|e| FileError::WriteError {
            path: self.path.clone(),
            details: Some(e.to_string()),
        })?;
        trace!("wrote pid {pid} to {}", self.path.display());
        Ok(())
    }

    pub fn read(&self) -> Result<Option<u32>> {
        if !self.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| FileError::ReadError {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(raw.trim().parse().ok())
    }

    /// Returns false if there was nothing to remove.
    pub fn remove(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("removed pid file {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FileError::WriteError {
                path: self.path.clone(),
                details: Some(e.to_string()),
            }
            .into()),
        }
    }
}
