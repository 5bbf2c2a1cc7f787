use crate::Result;
use crate::cli::{Dirs, Target};

/// Brings a switch port up
#[derive(Debug, clap::Args)]
pub struct PortUp {
    #[clap(flatten)]
    target: Target,
    /// Switch owning the port
    #[clap(long)]
    switch: String,
    #[clap(long)]
    port: u16,
}

impl PortUp {
    pub async fn run(&self, dirs: &Dirs) -> Result<()> {
        let client = self.target.connect(dirs).await?;
        client.port_up(&self.switch, self.port).await?;
        info!("{}: port {} up", self.switch, self.port);
        Ok(())
    }
}

/// Brings a switch port down
#[derive(Debug, clap::Args)]
pub struct PortDown {
    #[clap(flatten)]
    target: Target,
    /// Switch owning the port
    #[clap(long)]
    switch: String,
    #[clap(long)]
    port: u16,
}

impl PortDown {
    pub async fn run(&self, dirs: &Dirs) -> Result<()> {
        let client = self.target.connect(dirs).await?;
        client.port_down(&self.switch, self.port).await?;
        info!("{}: port {} down", self.switch, self.port);
        Ok(())
    }
}
