use crate::cli::Dirs;
use crate::options::{DEFAULT_OPENFLOW_PORT, LoggingLevel, RunOptions};
use crate::supervisor::Supervisor;
use crate::{Result, logger};
use std::path::PathBuf;
use std::sync::Arc;

/// Runs a controller
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "r",
    verbatim_doc_comment,
    long_about = "\
Runs a controller

Loads the controller file, starts the network described by --conf and
serves the control channel until `trema killall` or a signal stops it.

Examples:
  trema run learning_switch.toml
  trema run -c network.toml -d learning_switch.toml
  trema run -p 6633 learning_switch.toml -- --verbose"
)]
pub struct Run {
    /// Run in the background
    #[clap(short, long)]
    daemonize: bool,
    /// Network configuration to start alongside the controller
    #[clap(short, long)]
    conf: Option<PathBuf>,
    /// OpenFlow port the controller listens on
    #[clap(short, long, default_value_t = DEFAULT_OPENFLOW_PORT.to_string())]
    port: String,
    /// Log level passed to the controller
    #[clap(short, long, value_enum)]
    logging_level: Option<LoggingLevel>,
    /// Controller file
    script: String,
    /// Extra arguments for the controller
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Run {
    pub fn run(self, dirs: &Dirs) -> Result<()> {
        if let Some(level) = self.logging_level {
            logger::set_level(level.into());
        }
        let options = RunOptions {
            daemonize: self.daemonize,
            conf: self.conf,
            port: self.port,
            logging_level: self.logging_level.unwrap_or_default(),
            socket_dir: dirs.socket_dir.clone(),
            pid_dir: dirs.pid_dir.clone(),
        };
        let args = std::iter::once(self.script).chain(self.args).collect();
        Arc::new(Supervisor::new(options)).run(args)
    }
}
