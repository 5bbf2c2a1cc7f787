use crate::Result;
use crate::cli::{Dirs, Target};

/// Takes down the link between two nodes
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Takes down the link between two nodes

Endpoints may be given in either order. Deleting a link that is already
down succeeds.

Example:
  trema delete_link -n LearningSwitch s1 h1"
)]
pub struct DeleteLink {
    #[clap(flatten)]
    target: Target,
    endpoint1: String,
    endpoint2: String,
}

impl DeleteLink {
    pub async fn run(&self, dirs: &Dirs) -> Result<()> {
        let client = self.target.connect(dirs).await?;
        client.delete_link(&self.endpoint1, &self.endpoint2).await
    }
}
