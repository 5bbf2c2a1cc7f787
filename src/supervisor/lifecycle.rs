//! Startup and teardown
//!
//! `run` walks the startup sequence, `killall` is the one teardown path shared
//! by signals, the control channel and startup failures.

use super::{Supervisor, lock};
use crate::auxiliary::{AuxiliarySystem, credentials};
use crate::daemonize::daemonize;
use crate::error::AuxiliaryError;
use crate::ipc::address;
use crate::ipc::server::ControlServer;
use crate::pid_file::PidFile;
use crate::{Result, env, signals, watchdog};
use miette::IntoDiagnostic;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, mpsc};
use std::time::Duration;

/// Time the control channel runtime gets to wind down its tasks
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

impl Supervisor {
    /// Start the controller named by `args[0]` and block until it is torn down.
    ///
    /// When daemonizing, the calling process returns as soon as the child is
    /// forked. A startup failure tears down whatever was already started
    /// before being returned.
    pub fn run(self: &Arc<Self>, args: Vec<String>) -> Result<()> {
        let result = self.start(args);
        if let Err(err) = &result {
            debug!("startup failed: {err}");
        }
        // a teardown that ran mid-startup may have missed resources created after it
        if result.is_err() || self.shutdown.is_requested() {
            self.killall();
            self.join_watchdog();
        }
        result
    }

    fn start(self: &Arc<Self>, args: Vec<String>) -> Result<()> {
        self.create_worker(args)?;
        self.trap_signals()?;
        self.create_pid_file()?;
        self.start_auxiliary()?;
        if self.shutdown.is_requested() {
            info!("shutdown requested during startup");
            return Ok(());
        }
        if self.options.daemonize {
            let Some(pid_file) = lock(&self.pid_file).clone() else {
                return Ok(());
            };
            let this = self.clone();
            let pid = daemonize(&pid_file, move || this.daemon_main())?;
            info!(
                "{} started in the background (pid {pid})",
                self.name().unwrap_or_default()
            );
            Ok(())
        } else {
            self.start_worker_and_channel()
        }
    }

    fn create_worker(&self, args: Vec<String>) -> Result<()> {
        let Some((script, worker_args)) = args.split_first() else {
            miette::bail!("no controller file given");
        };
        let factory = self.loader.load(&PathBuf::from(script))?;
        let worker = factory.create(self.options.port()?, self.options.logging_level)?;
        let _ = self.name.set(worker.name().to_string());
        debug!("created worker {}", worker.name());
        *lock(&self.worker_args) = worker_args.to_vec();
        *lock(&self.worker) = Some(worker);
        Ok(())
    }

    fn trap_signals(self: &Arc<Self>) -> Result<()> {
        signals::install()?;
        self.spawn_watchdog()
    }

    /// The watchdog only holds a weak reference so a dropped supervisor is not
    /// kept alive by its own helper thread.
    fn spawn_watchdog(self: &Arc<Self>) -> Result<()> {
        let this = Arc::downgrade(self);
        let handle = watchdog::spawn(self.shutdown.clone(), self.poll_interval, move || {
            if let Some(this) = this.upgrade() {
                this.killall();
            }
        })?;
        *lock(&self.watchdog) = Some(handle);
        Ok(())
    }

    fn join_watchdog(&self) {
        let handle = lock(&self.watchdog).take();
        if let Some(handle) = handle
            && handle.thread().id() != std::thread::current().id()
            && handle.join().is_err()
        {
            warn!("watchdog thread panicked");
        }
    }

    fn create_pid_file(&self) -> Result<()> {
        let Some(name) = self.name() else {
            return Ok(());
        };
        let pid_file = PidFile::new(&self.options.pid_dir, name);
        pid_file.create()?;
        trace!("wrote {}", pid_file.path().display());
        *lock(&self.pid_file) = Some(pid_file);
        Ok(())
    }

    fn start_auxiliary(&self) -> Result<()> {
        let Some(conf) = &self.options.conf else {
            return Ok(());
        };
        let auxiliary = Arc::new(AuxiliarySystem::read(conf)?);
        *lock(&self.auxiliary) = Some(auxiliary.clone());

        if auxiliary.requires_sudo() {
            if let Err(err) = credentials::refresh() {
                warn!("failed to refresh sudo credentials: {err}");
            }
            self.refresh_credentials.store(true, Ordering::SeqCst);
        }

        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("network-start".into())
            .spawn(move || {
                let _ = tx.send(auxiliary.run());
            })
            .into_diagnostic()?;
        *lock(&self.auxiliary_thread) = Some(handle);
        let result = rx.recv().unwrap_or(Err(AuxiliaryError::Stopped));
        let handle = lock(&self.auxiliary_thread).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        match result {
            Ok(()) => {}
            Err(err) if err.is_fatal_at_startup() => return Err(err.into()),
            // the flag is read without synchronizing with the failing node, so
            // an error raised just before a shutdown request still surfaces
            Err(err) if self.shutdown.is_requested() => {
                debug!("ignoring network error during shutdown: {err}");
            }
            Err(err) => return Err(err.into()),
        }

        if self.should_refresh_credentials() {
            credentials::spawn_refresh(*env::TREMA_SUDO_REFRESH_INTERVAL)?;
        }
        Ok(())
    }

    /// Nothing is left to refresh for once a teardown has been requested.
    fn should_refresh_credentials(&self) -> bool {
        self.refresh_credentials.load(Ordering::SeqCst) && !self.shutdown.is_requested()
    }

    /// Runs in the forked child. Only this thread survived the fork.
    fn daemon_main(self: &Arc<Self>) -> Result<()> {
        self.daemonized.store(true, Ordering::SeqCst);
        if let Some(stale) = lock(&self.watchdog).take() {
            std::mem::forget(stale);
        }
        self.spawn_watchdog()?;
        if self.should_refresh_credentials() {
            credentials::spawn_refresh(*env::TREMA_SUDO_REFRESH_INTERVAL)?;
        }
        self.start_worker_and_channel()?;
        // the watchdog finishes the teardown and exits the process
        self.join_watchdog();
        Ok(())
    }

    /// Serve the control channel on this thread and run the worker on another
    /// until the channel is stopped by `killall`.
    fn start_worker_and_channel(self: &Arc<Self>) -> Result<()> {
        let Some(name) = self.name().map(str::to_string) else {
            return Ok(());
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("trema-ctl")
            .enable_all()
            .build()
            .into_diagnostic()?;
        let result = runtime.block_on(async {
            let path = address(&self.options.socket_dir, &name, false)?;
            let server = ControlServer::bind(&path)?;
            *lock(&self.channel) = Some(server.handle());
            if self.shutdown.is_requested() {
                server.handle().stop();
            }
            self.spawn_worker_thread()?;
            info!("{name} is running, control channel at {}", path.display());
            server.serve(self.clone()).await
        });
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
        result
    }

    fn spawn_worker_thread(self: &Arc<Self>) -> Result<()> {
        let Some(worker) = lock(&self.worker).clone() else {
            return Ok(());
        };
        let args = lock(&self.worker_args).clone();
        let shutdown = self.shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("worker".into())
            .spawn(move || {
                match worker.run(&args) {
                    Ok(()) => info!(target: worker.name(), "exited"),
                    Err(err) => error!(target: worker.name(), "{err:?}"),
                }
                shutdown.request();
            })
            .into_diagnostic()?;
        *lock(&self.worker_thread) = Some(handle);
        Ok(())
    }

    /// Tear everything down. Safe to call repeatedly and from any thread;
    /// later calls find every resource already released and do nothing.
    /// Exits the process when running as a daemon.
    pub fn killall(&self) {
        let _teardown = lock(&self.teardown);
        self.shutdown.request();

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            debug!(target: worker.name(), "Shutting down...");
            if let Err(err) = worker.stop() {
                warn!("failed to stop {}: {err}", worker.name());
            }
        }

        let worker_thread = lock(&self.worker_thread).take();
        if let Some(handle) = worker_thread
            && handle.thread().id() != std::thread::current().id()
            && handle.join().is_err()
        {
            warn!("worker thread panicked");
        }

        let auxiliary_thread = lock(&self.auxiliary_thread).take();
        if let Some(handle) = auxiliary_thread {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // stopping the network below makes it return `Stopped`
                trace!("leaving network startup thread to finish on its own");
            }
        }

        let auxiliary = lock(&self.auxiliary).take();
        if let Some(auxiliary) = auxiliary
            && let Err(err) = auxiliary.stop()
        {
            warn!("failed to stop network {}: {err}", auxiliary.path().display());
        }

        let pid_file = lock(&self.pid_file).take();
        if let Some(pid_file) = pid_file {
            match pid_file.remove() {
                Ok(true) => trace!("removed {}", pid_file.path().display()),
                Ok(false) => {}
                Err(err) => warn!("{err}"),
            }
        }

        let channel = lock(&self.channel).take();
        if let Some(channel) = &channel {
            channel.stop();
        }

        if self.is_daemonized() {
            // exiting skips the server's own cleanup
            if let Some(channel) = channel {
                let _ = std::fs::remove_file(channel.path());
            }
            info!("stopped");
            std::process::exit(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RunOptions;

    #[test]
    fn test_no_credential_refresh_after_shutdown() {
        let sup = Supervisor::new(RunOptions::default());
        assert!(!sup.should_refresh_credentials());

        sup.refresh_credentials.store(true, Ordering::SeqCst);
        assert!(sup.should_refresh_credentials());

        sup.request_shutdown();
        assert!(!sup.should_refresh_credentials());
    }
}
