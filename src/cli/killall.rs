use crate::Result;
use crate::cli::Dirs;
use crate::ipc::client::ControlClient;

/// Stops a controller and its network
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Killall {
    /// Name of the running controller
    name: String,
}

impl Killall {
    pub async fn run(&self, dirs: &Dirs) -> Result<()> {
        let client = ControlClient::connect(&dirs.socket_dir, &self.name).await?;
        client.killall().await?;
        info!("stopped {}", self.name);
        Ok(())
    }
}
