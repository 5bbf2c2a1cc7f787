//! Keeps cached sudo credentials alive while the network is up.

use crate::Result;
use miette::IntoDiagnostic;
use std::thread::JoinHandle;
use std::time::Duration;

/// Run `sudo -v`, prompting for a password if the cache is empty.
pub fn refresh() -> Result<()> {
    duct::cmd!("sudo", "-v").run().into_diagnostic()?;
    Ok(())
}

/// Refresh every `interval` until the process exits. Failures are logged and retried.
pub fn spawn_refresh(interval: Duration) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("sudo-refresh".into())
        .spawn(move || {
            loop {
                std::thread::sleep(interval);
                trace!("refreshing sudo credentials");
                if let Err(err) = refresh() {
                    warn!("failed to refresh sudo credentials: {err}");
                }
            }
        })
        .into_diagnostic()
}
