//! Controller loading.
//!
//! A controller file is a TOML manifest with a `[worker]` table:
//!
//! ```toml
//! [worker]
//! name = "LearningSwitch"              # defaults to the file stem
//! run = "./learning_switch --port {port} --log {logging_level}"
//!
//! [worker.env]
//! RUST_BACKTRACE = "1"
//! ```
//!
//! The command runs from the manifest's directory so it can refer to sibling
//! files. Extra `trema run` arguments are appended, shell-quoted.

use crate::error::{ConfigParseError, FileError, SupervisorError};
use crate::options::LoggingLevel;
use crate::procs::PROCS;
use crate::shell::{self, Shell};
use crate::Result;
use indexmap::IndexMap;
use miette::{IntoDiagnostic, bail, ensure};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A long-running controller owned by the supervisor.
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Blocks until the worker exits on its own or `stop` is called.
    fn run(&self, args: &[String]) -> Result<()>;

    /// Ask a running (or not yet started) worker to stop. Must be callable from
    /// another thread while `run` is blocked.
    fn stop(&self) -> Result<()>;
}

pub trait WorkerFactory {
    fn create(&self, port: u16, logging_level: LoggingLevel) -> Result<Arc<dyn Worker>>;
}

/// Turns a controller file into a factory. Must fail with
/// `SupervisorError::NoWorkerDefined` when the file defines no worker.
pub trait WorkerLoader: Send + Sync {
    fn load(&self, script: &Path) -> Result<Box<dyn WorkerFactory>>;
}

#[derive(Debug, serde::Deserialize)]
struct ManifestRaw {
    worker: Option<WorkerRaw>,
}

#[derive(Debug, serde::Deserialize)]
struct WorkerRaw {
    name: Option<String>,
    run: Option<String>,
    #[serde(default)]
    shell: Shell,
    #[serde(default)]
    env: IndexMap<String, String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestLoader;

impl WorkerLoader for ManifestLoader {
    fn load(&self, script: &Path) -> Result<Box<dyn WorkerFactory>> {
        let raw = std::fs::read_to_string(script).map_err(|e| FileError::ReadError {
            path: script.to_path_buf(),
            source: e,
        })?;
        let manifest: ManifestRaw = toml::from_str(&raw)
            .map_err(|e| ConfigParseError::from_toml_error(script, raw.clone(), e))?;
        let no_worker = |reason: &str| SupervisorError::NoWorkerDefined {
            path: script.to_path_buf(),
            reason: reason.to_string(),
        };
        let Some(worker) = manifest.worker else {
            return Err(no_worker("no [worker] table").into());
        };
        let Some(run) = worker.run.filter(|run| !run.trim().is_empty()) else {
            return Err(no_worker("[worker] has no `run` command").into());
        };
        let name = match worker.name {
            Some(name) => name,
            None => script
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        validate_worker_name(&name)?;
        let dir = script
            .canonicalize()
            .into_diagnostic()?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!("loaded worker {name} from {}", script.display());
        Ok(Box::new(CommandWorkerFactory {
            name,
            run,
            shell: worker.shell,
            env: worker.env,
            dir,
        }))
    }
}

/// The name ends up in pid file and socket paths.
fn validate_worker_name(name: &str) -> Result<()> {
    ensure!(!name.is_empty(), "worker name cannot be empty");
    ensure!(
        !name.contains('/') && !name.contains('\\') && name != "." && name != "..",
        "worker name '{name}' cannot be used as a file name"
    );
    Ok(())
}

#[derive(Debug)]
pub struct CommandWorkerFactory {
    name: String,
    run: String,
    shell: Shell,
    env: IndexMap<String, String>,
    dir: PathBuf,
}

impl CommandWorkerFactory {
    fn build(&self, port: u16, logging_level: LoggingLevel) -> CommandWorker {
        let port = port.to_string();
        let level = logging_level.to_string();
        let command = shell::expand(&self.run, &[("port", &port), ("logging_level", &level)]);
        let mut env = self.env.clone();
        env.insert("TREMA_PORT".to_string(), port);
        env.insert("TREMA_LOGGING_LEVEL".to_string(), level);
        CommandWorker {
            name: self.name.clone(),
            command,
            shell: self.shell,
            env,
            dir: self.dir.clone(),
            child: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }
}

impl WorkerFactory for CommandWorkerFactory {
    fn create(&self, port: u16, logging_level: LoggingLevel) -> Result<Arc<dyn Worker>> {
        Ok(Arc::new(self.build(port, logging_level)))
    }
}

/// A controller running as a child process.
#[derive(Debug)]
pub struct CommandWorker {
    name: String,
    command: String,
    shell: Shell,
    env: IndexMap<String, String>,
    dir: PathBuf,
    child: Mutex<Option<Arc<duct::Handle>>>,
    stopping: AtomicBool,
}

impl CommandWorker {
    pub fn command(&self) -> &str {
        &self.command
    }

    fn command_line(&self, args: &[String]) -> String {
        if args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, shell_words::join(args))
        }
    }
}

impl Worker for CommandWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let command = self.command_line(args);
        let handle = {
            let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
            if self.stopping.load(Ordering::SeqCst) {
                return Ok(());
            }
            ensure!(child.is_none(), "{} is already running", self.name);
            let mut expr = self
                .shell
                .command(&command, Some(&self.dir))
                .unchecked();
            for (key, val) in &self.env {
                expr = expr.env(key, val);
            }
            debug!(target: self.name.as_str(), "$ {command}");
            let handle = Arc::new(expr.start().into_diagnostic()?);
            *child = Some(handle.clone());
            handle
        };
        let output = handle.wait().into_diagnostic()?;
        if self.stopping.load(Ordering::SeqCst) || output.status.success() {
            return Ok(());
        }
        match output.status.code() {
            Some(shell::EXIT_COMMAND_NOT_FOUND) => bail!("{}: command not found: {command}", self.name),
            Some(code) => bail!("{} exited with status {code}", self.name),
            None => bail!("{} was terminated by a signal", self.name),
        }
    }

    fn stop(&self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        let child = self.child.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(child) = child {
            // the shell may have forked the controller instead of exec'ing it;
            // collect the tree before the shell dies and its children reparent
            let descendants: Vec<u32> = child
                .pids()
                .into_iter()
                .flat_map(|pid| PROCS.all_children(pid))
                .collect();
            debug!(
                target: self.name.as_str(),
                "stopping pid(s) {:?} {descendants:?}",
                child.pids()
            );
            child.kill().into_diagnostic()?;
            PROCS.kill_all(&descendants);
        }
        Ok(())
    }
}
