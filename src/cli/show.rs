use crate::Result;
use crate::auxiliary::{NodeInfo, PortStatus};
use crate::cli::{Dirs, Target};
use console::style;
use miette::IntoDiagnostic;

/// Display the state of a node
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "fetch",
    verbatim_doc_comment,
    long_about = "\
Display the state of a node

Example:
  trema show -n LearningSwitch s1

Output:
  Name: s1
  Kind: switch
  PID: 12345
  Status: running
  Port 1: up"
)]
pub struct Show {
    #[clap(flatten)]
    target: Target,
    /// Node to display
    node: String,
    /// Print as JSON
    #[clap(long)]
    json: bool,
}

impl Show {
    pub async fn run(&self, dirs: &Dirs) -> Result<()> {
        let client = self.target.connect(dirs).await?;
        let info = client.fetch(&self.node).await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&info).into_diagnostic()?);
        } else {
            print_info(&info);
        }
        Ok(())
    }
}

fn print_info(info: &NodeInfo) {
    println!("Name: {}", info.name);
    println!("Kind: {}", info.kind);
    if let Some((a, b)) = &info.endpoints {
        println!("Endpoints: {a} {b}");
    }
    if let Some(pid) = info.pid {
        println!("PID: {pid}");
    }
    let status = if info.running {
        style("running").green()
    } else {
        style("stopped").dim()
    };
    println!("Status: {status}");
    for (port, status) in &info.ports {
        let status = match status {
            PortStatus::Up => style(status.to_string()).green(),
            PortStatus::Down => style(status.to_string()).red(),
        };
        println!("Port {port}: {status}");
    }
}
