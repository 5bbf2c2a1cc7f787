//! The emulated network started next to the controller: hosts, switches and
//! the links between them, read from the file given to `trema run -c`.

mod config;
pub mod credentials;
mod node;

pub use config::{NetworkConfig, NodeKind};
pub use node::{Node, NodeInfo, PortStatus};

use crate::Result;
use crate::error::{AuxiliaryError, ConfigParseError, FileError, find_similar_node};
use indexmap::IndexMap;
use node::CommandContext;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lookup key for `fetch`: a node name, or the two endpoints of a link in either order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeKey {
    Name(String),
    Link(String, String),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Name(name) => write!(f, "{name}"),
            NodeKey::Link(a, b) => write!(f, "link {a}-{b}"),
        }
    }
}

impl From<&str> for NodeKey {
    fn from(name: &str) -> Self {
        NodeKey::Name(name.to_string())
    }
}

#[derive(Debug)]
pub struct AuxiliarySystem {
    path: PathBuf,
    sudo: bool,
    nodes: IndexMap<String, Arc<Node>>,
    links: Vec<Arc<Node>>,
    stopped: AtomicBool,
}

impl AuxiliarySystem {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| FileError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse_str(&raw, path)
    }

    pub fn parse_str(raw: &str, path: &Path) -> Result<Self> {
        let config: NetworkConfig = toml::from_str(raw)
            .map_err(|e| ConfigParseError::from_toml_error(path, raw.to_string(), e))?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let context = CommandContext {
            shell: config.shell,
            sudo: config.sudo,
            dir,
        };

        let nodes: IndexMap<String, Arc<Node>> = config
            .nodes
            .iter()
            .map(|(name, node)| {
                (
                    name.clone(),
                    Arc::new(Node::process(name, node, context.clone())),
                )
            })
            .collect();
        let mut links = Vec::with_capacity(config.links.len());
        for link in &config.links {
            let link = Node::link(link, context.clone());
            if let Some((a, b)) = link.endpoints() {
                for endpoint in [a, b] {
                    if !nodes.contains_key(endpoint) {
                        return Err(AuxiliaryError::UnknownEndpoint {
                            link: link.name().to_string(),
                            endpoint: endpoint.to_string(),
                        }
                        .into());
                    }
                }
            }
            links.push(Arc::new(link));
        }

        debug!(
            "loaded network from {}: {} node(s), {} link(s)",
            path.display(),
            nodes.len(),
            links.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            sudo: config.sudo,
            nodes,
            links,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn requires_sudo(&self) -> bool {
        self.sudo
    }

    /// Start every node, then every link. Aborts with `Stopped` if `stop` ran
    /// in the meantime so no node is left running behind a finished teardown.
    pub fn run(&self) -> std::result::Result<(), AuxiliaryError> {
        for node in self.nodes.values().chain(self.links.iter()) {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(AuxiliaryError::Stopped);
            }
            node.run()?;
        }
        info!("network {} is up", self.path.display());
        Ok(())
    }

    /// Stop links first, then nodes. Every running node is attempted; the first
    /// failure is returned.
    pub fn stop(&self) -> std::result::Result<(), AuxiliaryError> {
        self.stopped.store(true, Ordering::SeqCst);
        let mut first_err = None;
        for node in self.links.iter().rev().chain(self.nodes.values().rev()) {
            if !node.is_running() {
                continue;
            }
            if let Err(err) = node.stop() {
                warn!("failed to stop {}: {err}", node.name());
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn fetch(&self, key: &NodeKey) -> std::result::Result<Arc<Node>, AuxiliaryError> {
        let found = match key {
            NodeKey::Name(name) => self.nodes.get(name).cloned(),
            NodeKey::Link(a, b) => self
                .links
                .iter()
                .find(|link| {
                    link.endpoints()
                        .is_some_and(|(x, y)| (x == a && y == b) || (x == b && y == a))
                })
                .cloned(),
        };
        found.ok_or_else(|| not_found(key, self.nodes.keys().map(String::as_str)))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values().chain(self.links.iter())
    }
}

pub fn not_found<'a>(key: &NodeKey, available: impl Iterator<Item = &'a str>) -> AuxiliaryError {
    let suggestion = match key {
        NodeKey::Name(name) => find_similar_node(name, available),
        NodeKey::Link(..) => None,
    };
    AuxiliaryError::NotFound {
        name: key.to_string(),
        suggestion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn network(dir: &TempDir, content: &str) -> AuxiliarySystem {
        let path = dir.path().join("network.toml");
        std::fs::write(&path, content).unwrap();
        AuxiliarySystem::read(&path).unwrap()
    }

    const NETWORK: &str = r#"
sudo = false

[nodes.s1]
kind = "switch"
run = "sleep 30"

[nodes.h1]
kind = "host"
run = "sleep 30"

[[links]]
endpoints = ["s1", "h1"]
up = "touch link_up"
down = "rm link_up"
"#;

    #[test]
    fn test_run_and_stop() {
        let dir = TempDir::new().unwrap();
        let system = network(&dir, NETWORK);

        system.run().unwrap();
        assert!(system.nodes().all(|n| n.is_running()));
        assert!(dir.path().join("link_up").exists());

        system.stop().unwrap();
        assert!(system.nodes().all(|n| !n.is_running()));
        assert!(!dir.path().join("link_up").exists());

        // a second stop finds nothing running
        system.stop().unwrap();
    }

    #[test]
    fn test_run_after_stop_aborts() {
        let dir = TempDir::new().unwrap();
        let system = network(&dir, NETWORK);
        system.stop().unwrap();
        assert!(matches!(system.run(), Err(AuxiliaryError::Stopped)));
        assert!(system.nodes().all(|n| !n.is_running()));
    }

    #[test]
    fn test_missing_program_with_default_sudo() {
        let dir = TempDir::new().unwrap();
        let system = network(
            &dir,
            "[nodes.h1]\nkind = \"host\"\nrun = \"not-a-real-trema-host\"\n",
        );
        assert!(system.requires_sudo());

        let err = system.run().unwrap_err();
        assert!(matches!(err, AuxiliaryError::MissingExecutable { .. }));
        assert!(err.is_fatal_at_startup());
        assert!(system.nodes().all(|n| !n.is_running()));
    }

    #[test]
    fn test_fetch() {
        let dir = TempDir::new().unwrap();
        let system = network(&dir, NETWORK);

        assert_eq!(system.fetch(&"s1".into()).unwrap().name(), "s1");
        let link = system
            .fetch(&NodeKey::Link("h1".to_string(), "s1".to_string()))
            .unwrap();
        assert_eq!(link.kind(), NodeKind::Link);

        let err = system.fetch(&"missing".into()).unwrap_err();
        assert!(matches!(err, AuxiliaryError::NotFound { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_unknown_link_endpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("network.toml");
        std::fs::write(
            &path,
            "[[links]]\nendpoints = [\"s1\", \"h9\"]\nup = \"true\"\ndown = \"true\"\n",
        )
        .unwrap();
        let err = AuxiliarySystem::read(&path).unwrap_err();
        let err = err.downcast_ref::<AuxiliaryError>().unwrap();
        assert!(matches!(err, AuxiliaryError::UnknownEndpoint { .. }));
        assert!(err.is_fatal_at_startup());
    }

    #[test]
    fn test_malformed_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("network.toml");
        std::fs::write(&path, "[nodes.s1\n").unwrap();
        let err = AuxiliarySystem::read(&path).unwrap_err();
        assert!(err.downcast_ref::<ConfigParseError>().is_some());
    }
}
