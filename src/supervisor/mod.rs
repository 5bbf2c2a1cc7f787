//! Supervisor - owns one controller, its emulated network and its control channel
//!
//! This module is split into focused submodules:
//! - `lifecycle`: `run` (startup, daemonizing) and `killall` (teardown)
//! - `control`: network operations and control channel dispatch

mod control;
mod lifecycle;

use crate::auxiliary::AuxiliarySystem;
use crate::env;
use crate::ipc::server::ControlServerHandle;
use crate::options::RunOptions;
use crate::pid_file::PidFile;
use crate::watchdog::ShutdownFlag;
use crate::worker::{ManifestLoader, Worker, WorkerLoader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Exactly one per process. Construct it, wrap it in an `Arc`, call `run`.
pub struct Supervisor {
    options: RunOptions,
    loader: Box<dyn WorkerLoader>,
    poll_interval: Duration,
    name: OnceLock<String>,
    /// Single source of truth for every shutdown path
    shutdown: ShutdownFlag,
    daemonized: AtomicBool,
    refresh_credentials: AtomicBool,
    worker_args: Mutex<Vec<String>>,
    worker: Mutex<Option<Arc<dyn Worker>>>,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
    auxiliary: Mutex<Option<Arc<AuxiliarySystem>>>,
    auxiliary_thread: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    pid_file: Mutex<Option<PidFile>>,
    channel: Mutex<Option<ControlServerHandle>>,
    /// Serializes control channel calls
    dispatch: Mutex<()>,
    /// Held for the duration of `killall`
    teardown: Mutex<()>,
}

/// Lock ignoring poison: teardown must keep going after a panicked holder.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Supervisor {
    pub fn new(options: RunOptions) -> Self {
        Self::with_loader(options, Box::new(ManifestLoader))
    }

    pub fn with_loader(options: RunOptions, loader: Box<dyn WorkerLoader>) -> Self {
        Self {
            options,
            loader,
            poll_interval: *env::TREMA_WATCHDOG_INTERVAL,
            name: OnceLock::new(),
            shutdown: ShutdownFlag::new(),
            daemonized: AtomicBool::new(false),
            refresh_credentials: AtomicBool::new(false),
            worker_args: Mutex::new(vec![]),
            worker: Mutex::new(None),
            worker_thread: Mutex::new(None),
            auxiliary: Mutex::new(None),
            auxiliary_thread: Mutex::new(None),
            watchdog: Mutex::new(None),
            pid_file: Mutex::new(None),
            channel: Mutex::new(None),
            dispatch: Mutex::new(()),
            teardown: Mutex::new(()),
        }
    }

    /// Watchdog poll interval; defaults to `TREMA_WATCHDOG_INTERVAL`.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The controller's name, known once it has been loaded.
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_requested()
    }

    pub fn is_daemonized(&self) -> bool {
        self.daemonized.load(Ordering::SeqCst)
    }

    /// Ask for a teardown; the watchdog carries it out within one poll interval.
    pub fn request_shutdown(&self) {
        if self.shutdown.request() {
            debug!("shutdown requested");
        }
    }
}
