//! Background thread turning a shutdown request into a full teardown.

use crate::{Result, signals};
use miette::IntoDiagnostic;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// One-way false→true flag shared by every shutdown path.
///
/// Readers may observe a stale `false`; that only delays teardown by one
/// watchdog interval.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call flipped the flag.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Poll `flag` (and the process-wide signal flag) every `interval`. Once set,
/// run `teardown` once and stop polling.
///
/// A panic escaping `teardown` terminates the process with status 1.
pub fn spawn<F>(flag: ShutdownFlag, interval: Duration, teardown: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name("watchdog".into())
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                loop {
                    if signals::received() && flag.request() {
                        info!("received signal, stopping");
                    }
                    if flag.is_requested() {
                        teardown();
                        break;
                    }
                    std::thread::sleep(interval);
                }
            }));
            if result.is_err() {
                error!("watchdog panicked during teardown, exiting");
                std::process::exit(1);
            }
            trace!("watchdog stopped");
        })
        .into_diagnostic()
}
