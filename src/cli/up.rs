use crate::Result;
use crate::cli::{Dirs, Target};

/// Starts a host or switch stopped with `trema kill`
#[derive(Debug, clap::Args)]
pub struct Up {
    #[clap(flatten)]
    target: Target,
    /// Node to start
    node: String,
}

impl Up {
    pub async fn run(&self, dirs: &Dirs) -> Result<()> {
        let client = self.target.connect(dirs).await?;
        client.up(&self.node).await
    }
}
