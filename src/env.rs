use once_cell::sync::Lazy;
pub use std::env::*;
use std::path::PathBuf;
use std::time::Duration;

pub static HOME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::home_dir().unwrap_or_else(|| {
        eprintln!("Warning: Could not determine home directory");
        PathBuf::from("/tmp")
    })
});
pub static TREMA_STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    var_path("TREMA_STATE_DIR").unwrap_or(
        dirs::state_dir()
            .unwrap_or(HOME_DIR.join(".local").join("state"))
            .join("trema"),
    )
});

/// Directory holding one `<name>.ctl` control socket per running controller
pub static TREMA_SOCKET_DIR: Lazy<PathBuf> =
    Lazy::new(|| var_path("TREMA_SOCKET_DIR").unwrap_or(TREMA_STATE_DIR.join("sock")));
/// Directory holding one `<name>.pid` file per running controller
pub static TREMA_PID_DIR: Lazy<PathBuf> =
    Lazy::new(|| var_path("TREMA_PID_DIR").unwrap_or(TREMA_STATE_DIR.join("pid")));

pub static TREMA_LOG: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("TREMA_LOG").unwrap_or(log::LevelFilter::Info));
pub static TREMA_LOG_FILE_LEVEL: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("TREMA_LOG_FILE_LEVEL").unwrap_or(*TREMA_LOG));
pub static TREMA_LOG_FILE: Lazy<Option<PathBuf>> = Lazy::new(|| var_path("TREMA_LOG_FILE"));

pub static IPC_JSON: Lazy<bool> = Lazy::new(|| !var_false("IPC_JSON"));

// How often the watchdog checks for a pending shutdown request
pub static TREMA_WATCHDOG_INTERVAL: Lazy<Duration> = Lazy::new(|| {
    var_duration("TREMA_WATCHDOG_INTERVAL").unwrap_or(Duration::from_secs(1))
});

// sudo caches credentials for a few minutes; refresh well inside that window
pub static TREMA_SUDO_REFRESH_INTERVAL: Lazy<Duration> = Lazy::new(|| {
    var_duration("TREMA_SUDO_REFRESH_INTERVAL").unwrap_or(Duration::from_secs(60))
});

fn var_path(name: &str) -> Option<PathBuf> {
    var(name).map(PathBuf::from).ok()
}

fn var_duration(name: &str) -> Option<Duration> {
    var(name)
        .ok()
        .and_then(|val| humantime::parse_duration(&val).ok())
}

fn var_log_level(name: &str) -> Option<log::LevelFilter> {
    var(name).ok().and_then(|level| level.parse().ok())
}

fn var_false(name: &str) -> bool {
    var(name)
        .map(|val| val.to_lowercase())
        .map(|val| val == "false" || val == "0")
        .unwrap_or(false)
}
