use super::config::{LinkConfig, NodeConfig, NodeKind};
use crate::error::AuxiliaryError;
use crate::shell::{self, Shell};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

type Result<T> = std::result::Result<T, AuxiliaryError>;

/// How node commands are executed, shared by every node of one network.
#[derive(Debug, Clone)]
pub(crate) struct CommandContext {
    pub shell: Shell,
    pub sudo: bool,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PortStatus {
    Up,
    Down,
}

/// Snapshot of a node returned by `fetch`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub kind: NodeKind,
    pub running: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub endpoints: Option<(String, String)>,
    #[serde(default)]
    pub ports: BTreeMap<u16, PortStatus>,
}

#[derive(Debug)]
enum Commands {
    Process {
        run: String,
        port_up: Option<String>,
        port_down: Option<String>,
    },
    Link {
        endpoints: (String, String),
        up: String,
        down: String,
    },
}

/// A started node process. After a fork the handle belongs to the parent, so
/// the child falls back to signalling `pid` directly.
#[derive(Debug)]
struct Child {
    handle: duct::Handle,
    pid: u32,
    owner: u32,
}

impl Child {
    fn is_owned(&self) -> bool {
        self.owner == process::id()
    }

    fn is_alive(&self) -> bool {
        if self.is_owned() {
            return matches!(self.handle.try_wait(), Ok(None));
        }
        // EPERM: alive but owned by root
        matches!(
            signal::kill(Pid::from_raw(self.pid as i32), None),
            Ok(()) | Err(Errno::EPERM)
        )
    }
}

#[derive(Debug, Default)]
struct NodeState {
    child: Option<Child>,
    link_up: bool,
    ports: BTreeMap<u16, PortStatus>,
}

/// A host, switch or link of the emulated network.
#[derive(Debug)]
pub struct Node {
    name: String,
    kind: NodeKind,
    commands: Commands,
    context: CommandContext,
    state: Mutex<NodeState>,
}

impl Node {
    pub(crate) fn process(name: &str, config: &NodeConfig, context: CommandContext) -> Self {
        Self {
            name: name.to_string(),
            kind: config.kind,
            commands: Commands::Process {
                run: config.run.clone(),
                port_up: config.port_up.clone(),
                port_down: config.port_down.clone(),
            },
            context,
            state: Mutex::new(NodeState::default()),
        }
    }

    pub(crate) fn link(config: &LinkConfig, context: CommandContext) -> Self {
        let [a, b] = config.endpoints.clone();
        Self {
            name: format!("{a}-{b}"),
            kind: NodeKind::Link,
            commands: Commands::Link {
                endpoints: (a, b),
                up: config.up.clone(),
                down: config.down.clone(),
            },
            context,
            state: Mutex::new(NodeState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn endpoints(&self) -> Option<(&str, &str)> {
        match &self.commands {
            Commands::Link { endpoints, .. } => Some((&endpoints.0, &endpoints.1)),
            Commands::Process { .. } => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        Self::state_running(&self.lock())
    }

    fn state_running(state: &NodeState) -> bool {
        match &state.child {
            Some(child) => child.is_alive(),
            None => state.link_up,
        }
    }

    pub fn run(&self) -> Result<()> {
        let mut state = self.lock();
        if Self::state_running(&state) {
            return Err(AuxiliaryError::AlreadyRunning {
                name: self.name.clone(),
            });
        }
        match &self.commands {
            Commands::Process { run, .. } => {
                let command = shell::expand(run, &self.vars());
                state.child = Some(self.spawn(&command)?);
            }
            Commands::Link { up, .. } => {
                self.run_once(up, &self.vars())?;
                state.link_up = true;
            }
        }
        debug!("started {} {}", self.kind, self.name);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock();
        if !Self::state_running(&state) {
            state.child = None;
            return Err(AuxiliaryError::NotRunning {
                name: self.name.clone(),
            });
        }
        match &self.commands {
            Commands::Process { .. } => {
                if let Some(child) = state.child.take() {
                    self.kill(&child)?;
                }
                state.ports.clear();
            }
            Commands::Link { down, .. } => {
                self.run_once(down, &self.vars())?;
                state.link_up = false;
            }
        }
        debug!("stopped {} {}", self.kind, self.name);
        Ok(())
    }

    pub fn bring_port_up(&self, port: u16) -> Result<()> {
        self.set_port(port, PortStatus::Up)
    }

    pub fn bring_port_down(&self, port: u16) -> Result<()> {
        self.set_port(port, PortStatus::Down)
    }

    fn set_port(&self, port: u16, status: PortStatus) -> Result<()> {
        let Commands::Process {
            port_up, port_down, ..
        } = &self.commands
        else {
            return Err(self.not_a_switch());
        };
        if self.kind != NodeKind::Switch {
            return Err(self.not_a_switch());
        }
        let template = match status {
            PortStatus::Up => port_up,
            PortStatus::Down => port_down,
        };
        let mut state = self.lock();
        if !Self::state_running(&state) {
            return Err(AuxiliaryError::NotRunning {
                name: self.name.clone(),
            });
        }
        if let Some(template) = template {
            let port_str = port.to_string();
            let mut vars = self.vars();
            vars.push(("port", &port_str));
            self.run_once(template, &vars)?;
        } else {
            debug!("{}: no port_{status} command, recording state only", self.name);
        }
        state.ports.insert(port, status);
        Ok(())
    }

    pub fn info(&self) -> NodeInfo {
        let state = self.lock();
        NodeInfo {
            name: self.name.clone(),
            kind: self.kind,
            running: Self::state_running(&state),
            pid: state
                .child
                .as_ref()
                .filter(|child| child.is_alive())
                .map(|child| child.pid),
            endpoints: self
                .endpoints()
                .map(|(a, b)| (a.to_string(), b.to_string())),
            ports: state.ports.clone(),
        }
    }

    fn not_a_switch(&self) -> AuxiliaryError {
        AuxiliaryError::NotASwitch {
            name: self.name.clone(),
        }
    }

    fn vars(&self) -> Vec<(&str, &str)> {
        let mut vars = vec![("name", self.name.as_str())];
        if let Some((a, b)) = self.endpoints() {
            vars.push(("endpoint1", a));
            vars.push(("endpoint2", b));
        }
        vars
    }

    /// A process started through sudo belongs to root, so it is stopped with
    /// `sudo kill` rather than signalled from here.
    fn kill(&self, child: &Child) -> Result<()> {
        let pid = child.pid.to_string();
        if self.context.sudo {
            self.run_once("kill {pid}", &[("pid", pid.as_str())])?;
            if child.is_owned() {
                let _ = child.handle.wait();
            }
            return Ok(());
        }
        let result = if child.is_owned() {
            child.handle.kill()
        } else {
            signal::kill(Pid::from_raw(child.pid as i32), Signal::SIGKILL).map_err(io::Error::from)
        };
        result.map_err(|source| AuxiliaryError::SpawnFailed {
            name: self.name.clone(),
            command: format!("kill {pid}"),
            source,
        })
    }

    /// Long-running node processes are executed directly so that `kill` reaches
    /// the process itself. The program must exist before the sudo prefix is
    /// added.
    fn spawn(&self, command: &str) -> Result<Child> {
        let words = shell_words::split(command).map_err(|e| AuxiliaryError::SpawnFailed {
            name: self.name.clone(),
            command: command.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;
        let Some((program, rest)) = words.split_first() else {
            return Err(AuxiliaryError::MissingExecutable {
                name: self.name.clone(),
                command: command.to_string(),
            });
        };
        let Some(program) = self.resolve(program) else {
            return Err(AuxiliaryError::MissingExecutable {
                name: self.name.clone(),
                command: program.clone(),
            });
        };
        let words: Vec<String> = std::iter::once(program).chain(rest.iter().cloned()).collect();
        let words = if self.context.sudo {
            std::iter::once("sudo".to_string()).chain(words).collect()
        } else {
            words
        };
        let command = shell_words::join(&words);
        let Some((program, args)) = words.split_first() else {
            return Err(AuxiliaryError::MissingExecutable {
                name: self.name.clone(),
                command,
            });
        };
        trace!("{}: $ {command}", self.name);
        let handle = duct::cmd(program, args)
            .dir(&self.context.dir)
            .stdin_null()
            .stdout_null()
            .stderr_null()
            .unchecked()
            .start()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => AuxiliaryError::MissingExecutable {
                    name: self.name.clone(),
                    command: program.clone(),
                },
                _ => AuxiliaryError::SpawnFailed {
                    name: self.name.clone(),
                    command: command.clone(),
                    source,
                },
            })?;
        let pid = handle.pids().first().copied().unwrap_or_default();
        Ok(Child {
            handle,
            pid,
            owner: process::id(),
        })
    }

    /// Paths are taken relative to the network file's directory and returned
    /// absolute, bare names are searched on `PATH` and returned as given.
    fn resolve(&self, program: &str) -> Option<String> {
        if program.contains('/') {
            let path = self.context.dir.join(program);
            let path = path.canonicalize().ok().filter(|p| p.is_file())?;
            Some(path.to_string_lossy().to_string())
        } else {
            xx::file::which(program)
                .filter(|path| path.is_file())
                .map(|_| program.to_string())
        }
    }

    fn run_once(&self, template: &str, vars: &[(&str, &str)]) -> Result<()> {
        let command = shell::with_sudo(&shell::expand(template, vars), self.context.sudo);
        trace!("{}: $ {command}", self.name);
        let output = self
            .context
            .shell
            .command(&command, Some(&self.context.dir))
            .stdin_null()
            .stdout_null()
            .stderr_null()
            .unchecked()
            .run()
            .map_err(|source| AuxiliaryError::SpawnFailed {
                name: self.name.clone(),
                command: command.clone(),
                source,
            })?;
        match output.status.code() {
            Some(0) => Ok(()),
            Some(shell::EXIT_COMMAND_NOT_FOUND) => Err(AuxiliaryError::MissingExecutable {
                name: self.name.clone(),
                command,
            }),
            code => Err(AuxiliaryError::CommandFailed {
                name: self.name.clone(),
                command,
                code: code.unwrap_or(-1),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> CommandContext {
        CommandContext {
            shell: Shell::Sh,
            sudo: false,
            dir: dir.path().to_path_buf(),
        }
    }

    fn switch(run: &str, port_up: Option<&str>) -> NodeConfig {
        NodeConfig {
            kind: NodeKind::Switch,
            run: run.to_string(),
            port_up: port_up.map(str::to_string),
            port_down: None,
        }
    }

    #[test]
    fn test_process_lifecycle() {
        let dir = TempDir::new().unwrap();
        let node = Node::process("s1", &switch("sleep 30", None), context(&dir));

        assert!(!node.is_running());
        node.run().unwrap();
        assert!(node.is_running());
        assert!(matches!(
            node.run(),
            Err(AuxiliaryError::AlreadyRunning { .. })
        ));
        assert!(node.info().pid.is_some());

        node.stop().unwrap();
        assert!(!node.is_running());
        assert!(matches!(node.stop(), Err(AuxiliaryError::NotRunning { .. })));
    }

    #[test]
    fn test_missing_executable() {
        let dir = TempDir::new().unwrap();
        let node = Node::process(
            "h1",
            &NodeConfig {
                kind: NodeKind::Host,
                run: "definitely-not-a-trema-binary --flag".to_string(),
                port_up: None,
                port_down: None,
            },
            context(&dir),
        );
        let err = node.run().unwrap_err();
        assert!(matches!(err, AuxiliaryError::MissingExecutable { .. }));
        assert!(err.is_fatal_at_startup());
    }

    #[test]
    fn test_missing_executable_with_sudo() {
        let dir = TempDir::new().unwrap();
        let node = Node::process(
            "h1",
            &NodeConfig {
                kind: NodeKind::Host,
                run: "not-a-real-trema-host".to_string(),
                port_up: None,
                port_down: None,
            },
            CommandContext {
                sudo: true,
                ..context(&dir)
            },
        );
        match node.run() {
            Err(AuxiliaryError::MissingExecutable { command, .. }) => {
                assert_eq!(command, "not-a-real-trema-host")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!node.is_running());
    }

    #[test]
    fn test_program_relative_to_network_dir() {
        let dir = TempDir::new().unwrap();
        let node = Node::process("s1", &switch("./bin/switchd", None), context(&dir));
        assert!(matches!(
            node.run(),
            Err(AuxiliaryError::MissingExecutable { .. })
        ));

        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        std::fs::write(bin.join("switchd"), "#!/bin/sh\nexec sleep 30\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(bin.join("switchd"), std::fs::Permissions::from_mode(0o755))
            .unwrap();
        node.run().unwrap();
        assert!(node.is_running());
        node.stop().unwrap();
    }

    #[test]
    fn test_link_up_down() {
        let dir = TempDir::new().unwrap();
        let link = Node::link(
            &LinkConfig {
                endpoints: ["s1".to_string(), "h1".to_string()],
                up: "touch {endpoint1}_{endpoint2}".to_string(),
                down: "rm {endpoint1}_{endpoint2}".to_string(),
            },
            context(&dir),
        );
        assert_eq!(link.name(), "s1-h1");
        assert_eq!(link.endpoints(), Some(("s1", "h1")));

        link.run().unwrap();
        assert!(dir.path().join("s1_h1").exists());
        assert!(link.info().running);

        link.stop().unwrap();
        assert!(!dir.path().join("s1_h1").exists());
        assert!(matches!(link.stop(), Err(AuxiliaryError::NotRunning { .. })));
    }

    #[test]
    fn test_command_failed() {
        let dir = TempDir::new().unwrap();
        let link = Node::link(
            &LinkConfig {
                endpoints: ["a".to_string(), "b".to_string()],
                up: "exit 2".to_string(),
                down: "true".to_string(),
            },
            context(&dir),
        );
        match link.run() {
            Err(AuxiliaryError::CommandFailed { code, .. }) => assert_eq!(code, 2),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!link.is_running());
    }

    #[test]
    fn test_ports() {
        let dir = TempDir::new().unwrap();
        let node = Node::process(
            "s1",
            &switch("sleep 30", Some("echo {name} > port_{port}")),
            context(&dir),
        );
        assert!(matches!(
            node.bring_port_up(1),
            Err(AuxiliaryError::NotRunning { .. })
        ));

        node.run().unwrap();
        node.bring_port_up(1).unwrap();
        node.bring_port_down(2).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("port_1")).unwrap(),
            "s1\n"
        );
        let info = node.info();
        assert_eq!(info.ports.get(&1), Some(&PortStatus::Up));
        assert_eq!(info.ports.get(&2), Some(&PortStatus::Down));
        node.stop().unwrap();
    }

    #[test]
    fn test_port_on_host() {
        let dir = TempDir::new().unwrap();
        let host = Node::process(
            "h1",
            &NodeConfig {
                kind: NodeKind::Host,
                run: "sleep 30".to_string(),
                port_up: None,
                port_down: None,
            },
            context(&dir),
        );
        assert!(matches!(
            host.bring_port_up(1),
            Err(AuxiliaryError::NotASwitch { .. })
        ));
    }
}
