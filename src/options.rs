use crate::Result;
use crate::env;
use crate::error::SupervisorError;
use std::path::PathBuf;

/// Log verbosity handed to the controller.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LoggingLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl From<LoggingLevel> for log::LevelFilter {
    fn from(level: LoggingLevel) -> Self {
        match level {
            LoggingLevel::Debug => log::LevelFilter::Debug,
            LoggingLevel::Info => log::LevelFilter::Info,
            LoggingLevel::Warn => log::LevelFilter::Warn,
            LoggingLevel::Error | LoggingLevel::Fatal => log::LevelFilter::Error,
        }
    }
}

/// Everything `trema run` needs besides the controller file and its arguments.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunOptions {
    pub daemonize: bool,
    /// Network configuration to start alongside the controller
    pub conf: Option<PathBuf>,
    pub port: String,
    pub logging_level: LoggingLevel,
    pub socket_dir: PathBuf,
    pub pid_dir: PathBuf,
}

pub const DEFAULT_OPENFLOW_PORT: u16 = 6653;

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            daemonize: false,
            conf: None,
            port: DEFAULT_OPENFLOW_PORT.to_string(),
            logging_level: LoggingLevel::default(),
            socket_dir: env::TREMA_SOCKET_DIR.clone(),
            pid_dir: env::TREMA_PID_DIR.clone(),
        }
    }
}

impl RunOptions {
    pub fn port(&self) -> Result<u16> {
        self.port.trim().parse().map_err(|_| {
            SupervisorError::InvalidPort {
                value: self.port.clone(),
            }
            .into()
        })
    }
}
