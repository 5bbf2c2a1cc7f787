//! SIGTERM/SIGINT handling.
//!
//! The handler only stores into an atomic. Teardown happens later on the
//! watchdog thread, outside of signal context.

use crate::Result;
use miette::IntoDiagnostic;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, Ordering};

static RECEIVED_SIGNAL: AtomicBool = AtomicBool::new(false);

const SHUTDOWN_SIGNALS: [Signal; 2] = [Signal::SIGTERM, Signal::SIGINT];

extern "C" fn handle_shutdown_signal(_signo: libc::c_int) {
    RECEIVED_SIGNAL.store(true, Ordering::SeqCst);
}

/// Install the shutdown handlers. Safe to call more than once.
pub fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in SHUTDOWN_SIGNALS {
        // SAFETY: the handler only touches an atomic, which is async-signal-safe
        unsafe { sigaction(signal, &action) }.into_diagnostic()?;
        trace!("installed handler for {signal}");
    }
    Ok(())
}

/// True once SIGTERM or SIGINT has been delivered to this process.
pub fn received() -> bool {
    RECEIVED_SIGNAL.load(Ordering::SeqCst)
}
