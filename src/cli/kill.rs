use crate::Result;
use crate::cli::{Dirs, Target};

/// Stops a host or switch
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Stops a host or switch

The node stays defined and can be started again with `trema up`.

Example:
  trema kill -n LearningSwitch s1"
)]
pub struct Kill {
    #[clap(flatten)]
    target: Target,
    /// Node to stop
    node: String,
}

impl Kill {
    pub async fn run(&self, dirs: &Dirs) -> Result<()> {
        let client = self.target.connect(dirs).await?;
        client.kill(&self.node).await
    }
}
