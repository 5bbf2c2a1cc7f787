use crate::shell::Shell;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// On-disk layout of a network file passed with `trema run -c`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Run node commands through sudo and keep its credentials fresh
    #[serde(default = "default_true")]
    pub sudo: bool,
    #[serde(default)]
    pub shell: Shell,
    #[serde(default)]
    pub nodes: IndexMap<String, NodeConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    Host,
    Switch,
    Link,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub kind: NodeKind,
    /// Long-running process; executed directly, without a shell
    pub run: String,
    pub port_up: Option<String>,
    pub port_down: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    pub endpoints: [String; 2],
    pub up: String,
    pub down: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: NetworkConfig = toml::from_str("").unwrap();
        assert!(config.sudo);
        assert_eq!(config.shell, Shell::Sh);
        assert!(config.nodes.is_empty());
        assert!(config.links.is_empty());
    }

    #[test]
    fn test_node_order_preserved() {
        let config: NetworkConfig = toml::from_str(
            r#"
sudo = false

[nodes.s2]
kind = "switch"
run = "vswitch s2"

[nodes.h1]
kind = "host"
run = "vhost h1"

[nodes.s1]
kind = "switch"
run = "vswitch s1"
port_up = "ip link set s1-{port} up"

[[links]]
endpoints = ["s1", "h1"]
up = "ip link add a type veth peer b"
down = "ip link del a"
"#,
        )
        .unwrap();
        assert!(!config.sudo);
        assert_eq!(
            config.nodes.keys().collect::<Vec<_>>(),
            vec!["s2", "h1", "s1"]
        );
        assert_eq!(config.nodes["s1"].kind, NodeKind::Switch);
        assert_eq!(config.links[0].endpoints, ["s1".to_string(), "h1".to_string()]);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = toml::from_str::<NetworkConfig>("[nodes.h1]\nkind = \"host\"\nrun = \"x\"\nip = 1\n");
        assert!(err.is_err());
    }
}
