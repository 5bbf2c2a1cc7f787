use crate::ipc::client::ControlClient;
use crate::{Result, env};
use clap::Parser;
use miette::IntoDiagnostic;
use std::future::Future;
use std::path::PathBuf;

mod delete_link;
mod kill;
mod killall;
mod port;
mod run;
mod show;
mod up;

#[derive(Debug, clap::Parser)]
#[clap(name = "trema", version, about = "Runs an OpenFlow controller and its emulated network")]
struct Cli {
    #[clap(flatten)]
    dirs: Dirs,
    #[clap(subcommand)]
    command: Command,
}

/// Where control sockets and pid files live
#[derive(Debug, Clone, clap::Args)]
pub struct Dirs {
    /// Directory holding control sockets
    #[clap(long, global = true, default_value_os_t = env::TREMA_SOCKET_DIR.clone())]
    pub socket_dir: PathBuf,
    /// Directory holding pid files
    #[clap(long, global = true, default_value_os_t = env::TREMA_PID_DIR.clone())]
    pub pid_dir: PathBuf,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    Run(run::Run),
    Killall(killall::Killall),
    Kill(kill::Kill),
    Up(up::Up),
    #[clap(name = "port_up")]
    PortUp(port::PortUp),
    #[clap(name = "port_down")]
    PortDown(port::PortDown),
    #[clap(name = "delete_link")]
    DeleteLink(delete_link::DeleteLink),
    Show(show::Show),
}

/// `run` forks before any runtime exists, so only client commands get one.
pub fn run() -> Result<()> {
    let args = Cli::parse();
    let dirs = args.dirs;
    match args.command {
        Command::Run(run) => run.run(&dirs),
        Command::Killall(killall) => block_on(killall.run(&dirs)),
        Command::Kill(kill) => block_on(kill.run(&dirs)),
        Command::Up(up) => block_on(up.run(&dirs)),
        Command::PortUp(port_up) => block_on(port_up.run(&dirs)),
        Command::PortDown(port_down) => block_on(port_down.run(&dirs)),
        Command::DeleteLink(delete_link) => block_on(delete_link.run(&dirs)),
        Command::Show(show) => block_on(show.run(&dirs)),
    }
}

fn block_on<F: Future<Output = Result<()>>>(f: F) -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?
        .block_on(f)
}

/// The supervisor running controller `name`
#[derive(Debug, Clone, clap::Args)]
pub struct Target {
    /// Name of the running controller
    #[clap(short = 'n', long = "name")]
    pub name: String,
}

impl Target {
    async fn connect(&self, dirs: &Dirs) -> Result<ControlClient> {
        ControlClient::connect(&dirs.socket_dir, &self.name).await
    }
}
