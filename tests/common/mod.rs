#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use trema::Result;
use trema::options::{LoggingLevel, RunOptions};
use trema::worker::{Worker, WorkerFactory, WorkerLoader};

/// Isolated socket, pid and project directories for one test
pub struct TestEnv {
    temp_dir: TempDir,
    trema_bin: PathBuf,
    names: std::sync::Mutex<Vec<String>>,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        for dir in ["sock", "pid", "project"] {
            fs::create_dir_all(temp_dir.path().join(dir)).unwrap();
        }
        Self {
            temp_dir,
            trema_bin: PathBuf::from(env!("CARGO_BIN_EXE_trema")),
            names: Default::default(),
        }
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.temp_dir.path().join("sock")
    }

    pub fn pid_dir(&self) -> PathBuf {
        self.temp_dir.path().join("pid")
    }

    pub fn project_dir(&self) -> PathBuf {
        self.temp_dir.path().join("project")
    }

    pub fn pid_file(&self, name: &str) -> PathBuf {
        self.pid_dir().join(format!("{name}.pid"))
    }

    pub fn socket(&self, name: &str) -> PathBuf {
        self.socket_dir().join(format!("{name}.ctl"))
    }

    pub fn read_pid(&self, name: &str) -> Option<u32> {
        fs::read_to_string(self.pid_file(name))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Write a file into the project directory
    pub fn write(&self, file: &str, content: &str) -> PathBuf {
        let path = self.project_dir().join(file);
        fs::write(&path, content).unwrap();
        path
    }

    /// Write a controller manifest running `run`; killed on drop
    pub fn create_worker(&self, name: &str, run: &str) -> PathBuf {
        self.names.lock().unwrap().push(name.to_string());
        self.write(
            &format!("{name}.toml"),
            &format!("[worker]\nname = \"{name}\"\nrun = \"{run}\"\n"),
        )
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            socket_dir: self.socket_dir(),
            pid_dir: self.pid_dir(),
            ..Default::default()
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.trema_bin);
        cmd.arg("--socket-dir")
            .arg(self.socket_dir())
            .arg("--pid-dir")
            .arg(self.pid_dir())
            .args(args)
            .current_dir(self.project_dir())
            .env("TREMA_LOG", "debug")
            .env("TREMA_WATCHDOG_INTERVAL", "100ms")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run a trema command and return the output
    pub fn run_command(&self, args: &[&str]) -> Output {
        self.command(args)
            .output()
            .expect("Failed to execute trema command")
    }

    /// Run a trema command, returning the pid of the process started
    pub fn run_command_with_pid(&self, args: &[&str]) -> (u32, Output) {
        let child = self
            .command(args)
            .spawn()
            .expect("Failed to spawn trema command");
        let pid = child.id();
        (pid, child.wait_with_output().unwrap())
    }

    pub fn cleanup(&self) {
        for name in self.names.lock().unwrap().iter() {
            if self.socket(name).exists() {
                let _ = self.run_command(&["killall", name]);
            }
        }
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Poll `f` every 20ms until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    f()
}

/// Zombies count as dead: orphans may wait a while to be reaped.
pub fn is_alive(pid: u32) -> bool {
    if let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) {
        return stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z'));
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

pub fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    fs::metadata(path)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false)
}

/// In-process worker that blocks in `run` until stopped, or exits right away
/// when built with `exiting`.
#[derive(Default)]
pub struct FakeWorker {
    pub name: String,
    exit_immediately: bool,
    stopped: AtomicBool,
    pub runs: AtomicUsize,
    pub stops: AtomicUsize,
    pub args: std::sync::Mutex<Vec<String>>,
}

impl FakeWorker {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn exiting(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            exit_immediately: true,
            ..Default::default()
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Worker for FakeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, args: &[String]) -> Result<()> {
        *self.args.lock().unwrap() = args.to_vec();
        self.runs.fetch_add(1, Ordering::SeqCst);
        while !self.exit_immediately && !self.stopped.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out the same `FakeWorker` whatever script is loaded
pub struct FakeLoader(pub Arc<FakeWorker>);

impl WorkerLoader for FakeLoader {
    fn load(&self, _script: &Path) -> Result<Box<dyn WorkerFactory>> {
        Ok(Box::new(FakeFactory(self.0.clone())))
    }
}

struct FakeFactory(Arc<FakeWorker>);

impl WorkerFactory for FakeFactory {
    fn create(&self, _port: u16, _logging_level: LoggingLevel) -> Result<Arc<dyn Worker>> {
        Ok(self.0.clone())
    }
}
