//! Custom diagnostic error types for rich error reporting via miette.
//!
//! Startup failures (`SupervisorError`) are fatal and surface straight to the
//! user. `AuxiliaryError`s are mostly produced by control-channel calls and are
//! reported back to the calling process without disturbing the supervisor.

// False positive: fields are used in #[error] format strings and miette derive macros
#![allow(unused_assignments)]

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort `trema run` before the controller is up.
#[derive(Debug, Error, Diagnostic)]
pub enum SupervisorError {
    #[error("{name} is already running ({})", path.display())]
    #[diagnostic(code(trema::supervisor::already_running))]
    AlreadyRunning {
        name: String,
        path: PathBuf,
        pid: Option<u32>,
        #[help]
        help: Option<String>,
    },

    #[error("{}: {reason}", path.display())]
    #[diagnostic(
        code(trema::worker::no_worker_defined),
        help("the controller file needs a [worker] table with a `run` command")
    )]
    NoWorkerDefined { path: PathBuf, reason: String },

    #[error("socket file {} does not exist", path.display())]
    #[diagnostic(
        code(trema::ipc::address_invalid),
        help("is the controller running? Start it with: trema run <controller>")
    )]
    ChannelAddressInvalid { path: PathBuf },

    #[error("invalid port number '{value}'")]
    #[diagnostic(
        code(trema::config::invalid_port),
        help("the port must be an integer between 0 and 65535")
    )]
    InvalidPort { value: String },
}

/// Errors raised by the emulated network (hosts, switches and links).
#[derive(Debug, Error, Diagnostic)]
pub enum AuxiliaryError {
    #[error("node not found: {name}")]
    #[diagnostic(code(trema::netns::not_found))]
    NotFound {
        name: String,
        #[help]
        suggestion: Option<String>,
    },

    #[error("{name} is not running")]
    #[diagnostic(code(trema::netns::not_running))]
    NotRunning { name: String },

    #[error("{name} is already running")]
    #[diagnostic(code(trema::netns::already_running))]
    AlreadyRunning { name: String },

    #[error("{name} is not a switch")]
    #[diagnostic(
        code(trema::netns::not_a_switch),
        help("port_up and port_down only apply to nodes with kind = \"switch\"")
    )]
    NotASwitch { name: String },

    #[error("{name}: command not found: {command}")]
    #[diagnostic(
        code(trema::netns::missing_executable),
        help("check that the program is installed and on PATH")
    )]
    MissingExecutable { name: String, command: String },

    #[error("{name}: `{command}` exited with status {code}")]
    #[diagnostic(code(trema::netns::command_failed))]
    CommandFailed {
        name: String,
        command: String,
        code: i32,
    },

    #[error("{name}: failed to spawn `{command}`")]
    #[diagnostic(code(trema::netns::spawn_failed))]
    SpawnFailed {
        name: String,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("link {link} refers to undefined node '{endpoint}'")]
    #[diagnostic(
        code(trema::netns::unknown_endpoint),
        help("declare the node under [nodes.{endpoint}] or fix the link endpoints")
    )]
    UnknownEndpoint { link: String, endpoint: String },

    #[error("network was stopped while starting")]
    #[diagnostic(code(trema::netns::stopped))]
    Stopped,
}

impl AuxiliaryError {
    /// Errors that make the network configuration unusable. When these happen
    /// during `trema run`, the supervisor tears down before re-raising.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            AuxiliaryError::MissingExecutable { .. } | AuxiliaryError::UnknownEndpoint { .. }
        )
    }
}

/// Error for TOML configuration parse failures with source code highlighting.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to parse {}", path.display())]
#[diagnostic(code(trema::config::parse_error))]
pub struct ConfigParseError {
    pub path: PathBuf,

    /// The source file contents for display
    #[source_code]
    pub src: NamedSource<String>,

    /// The location of the error in the source
    #[label("{message}")]
    pub span: SourceSpan,

    /// The error message from the TOML parser
    pub message: String,

    #[help]
    pub help: Option<String>,
}

impl ConfigParseError {
    pub fn from_toml_error(path: &std::path::Path, contents: String, err: toml::de::Error) -> Self {
        let message = err.message().to_string();
        let span = err
            .span()
            .map(|r| SourceSpan::from(r.start..r.end))
            .unwrap_or_else(|| SourceSpan::from(0..0));

        Self {
            path: path.to_path_buf(),
            src: NamedSource::new(path.display().to_string(), contents),
            span,
            message,
            help: Some("check TOML syntax at https://toml.io".to_string()),
        }
    }
}

/// Errors related to reading and writing pid and config files.
#[derive(Debug, Error, Diagnostic)]
pub enum FileError {
    #[error("failed to read file: {}", path.display())]
    #[diagnostic(code(trema::file::read_error))]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file: {}", path.display())]
    #[diagnostic(code(trema::file::write_error))]
    WriteError {
        path: PathBuf,
        #[help]
        details: Option<String>,
    },
}

/// Errors related to the control channel between the CLI and a running supervisor.
#[derive(Debug, Error, Diagnostic)]
pub enum IpcError {
    #[error("failed to connect to {} after {attempts} attempts", path.display())]
    #[diagnostic(code(trema::ipc::connection_failed))]
    ConnectionFailed {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: Option<io::Error>,
    },

    #[error("control connection closed unexpectedly")]
    #[diagnostic(
        code(trema::ipc::connection_closed),
        help("the supervisor may have crashed or been stopped")
    )]
    ConnectionClosed,

    #[error("failed to read control response")]
    #[diagnostic(code(trema::ipc::read_failed))]
    ReadFailed {
        #[source]
        source: io::Error,
    },

    #[error("failed to send control request")]
    #[diagnostic(code(trema::ipc::send_failed))]
    SendFailed {
        #[source]
        source: io::Error,
    },

    #[error("unexpected response from supervisor: expected {expected}, got {actual}")]
    #[diagnostic(
        code(trema::ipc::unexpected_response),
        help("this may indicate a version mismatch between the CLI and supervisor")
    )]
    UnexpectedResponse { expected: String, actual: String },

    #[error("protocol version mismatch: client speaks {client}, supervisor speaks {server}")]
    #[diagnostic(
        code(trema::ipc::version_mismatch),
        help("restart the controller with the same trema binary")
    )]
    VersionMismatch { client: u32, server: u32 },

    #[error("control message is invalid: {reason}")]
    #[diagnostic(code(trema::ipc::invalid_message))]
    InvalidMessage { reason: String },
}

/// Find the most similar node name for suggestions.
pub fn find_similar_node<'a>(
    name: &str,
    available: impl Iterator<Item = &'a str>,
) -> Option<String> {
    use fuzzy_matcher::FuzzyMatcher;
    use fuzzy_matcher::skim::SkimMatcherV2;

    let matcher = SkimMatcherV2::default();
    available
        .filter_map(|candidate| {
            matcher
                .fuzzy_match(candidate, name)
                .map(|score| (candidate, score))
        })
        .max_by_key(|(_, score)| *score)
        .filter(|(_, score)| *score > 0)
        .map(|(candidate, _)| format!("did you mean '{candidate}'?"))
}
