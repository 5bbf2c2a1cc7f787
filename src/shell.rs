//! Shell command execution for worker and network node commands
//!
//! Commands in controller and network files are shell strings with `{placeholder}`
//! markers. They are expanded here and handed to `sh -c` (or `bash -c`) through duct.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Exit status a POSIX shell uses when the command could not be found
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    #[default]
    Sh,
    Bash,
}

impl Shell {
    pub fn program(&self) -> &'static str {
        match self {
            Shell::Sh => "sh",
            Shell::Bash => "bash",
        }
    }

    pub fn exec_args(&self, command: &str) -> Vec<String> {
        vec!["-c".to_string(), command.to_string()]
    }

    /// Build a duct expression running `command` from `dir`.
    pub fn command(&self, command: &str, dir: Option<&Path>) -> duct::Expression {
        let expr = duct::cmd(self.program(), self.exec_args(command));
        match dir {
            Some(dir) => expr.dir(dir),
            None => expr,
        }
    }
}

/// Substitute `{key}` markers in `template`. Unknown markers are left as-is.
pub fn expand(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Prefix with `sudo` when the network runs with elevated privileges.
pub fn with_sudo(command: &str, sudo: bool) -> String {
    if sudo {
        format!("sudo {command}")
    } else {
        command.to_string()
    }
}
