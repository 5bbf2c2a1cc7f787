//! Control channel between `trema` CLI invocations and a running supervisor.
//!
//! One local socket per controller at `<socket_dir>/<name>.ctl`. Each message is
//! a serialized value terminated by a 0 byte.

use crate::auxiliary::NodeInfo;
use crate::error::SupervisorError;
use crate::{Result, env};
use interprocess::local_socket::{GenericFilePath, Name, ToFsName};
use miette::IntoDiagnostic;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

pub mod client;
pub mod server;

/// Bumped whenever `ControlRequest` or `ControlResponse` change shape.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display, strum::EnumIs)]
pub enum ControlRequest {
    Connect { version: u32 },
    Kill { name: String },
    DeleteLink { endpoint1: String, endpoint2: String },
    Killall,
    Up { name: String },
    PortUp { switch: String, port: u16 },
    PortDown { switch: String, port: u16 },
    Fetch { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display, strum::EnumIs)]
pub enum ControlResponse {
    Ok,
    Node(NodeInfo),
    NotFound {
        name: String,
        suggestion: Option<String>,
    },
    VersionMismatch { server: u32 },
    Error(String),
}

/// `<socket_dir>/<name>.ctl`. With `check`, the path must already be a socket.
pub fn address(socket_dir: &Path, name: &str, check: bool) -> Result<PathBuf> {
    let path = socket_dir.join(format!("{name}.ctl"));
    let path = std::path::absolute(&path).unwrap_or(path);
    if check {
        let is_socket = std::fs::metadata(&path)
            .map(|m| m.file_type().is_socket())
            .unwrap_or(false);
        if !is_socket {
            return Err(SupervisorError::ChannelAddressInvalid { path }.into());
        }
    }
    Ok(path)
}

fn fs_name(path: &Path) -> Result<Name<'_>> {
    path.to_fs_name::<GenericFilePath>().into_diagnostic()
}

fn serialize<T: serde::Serialize>(msg: &T) -> Result<Vec<u8>> {
    let msg = if *env::IPC_JSON {
        serde_json::to_vec(msg).into_diagnostic()?
    } else {
        rmp_serde::to_vec(msg).into_diagnostic()?
    };
    Ok(msg)
}

fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut bytes = bytes.to_vec();
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    trace!("msg: {:?}", std::str::from_utf8(&bytes).unwrap_or_default());
    let msg = if *env::IPC_JSON {
        serde_json::from_slice(&bytes).into_diagnostic()?
    } else {
        rmp_serde::from_slice(&bytes).into_diagnostic()?
    };
    Ok(msg)
}

/// Serialize and append the 0 terminator.
fn frame<T: serde::Serialize>(msg: &T) -> Result<Vec<u8>> {
    let mut bytes = serialize(msg)?;
    if bytes.contains(&0) {
        return Err(crate::error::IpcError::InvalidMessage {
            reason: "message contains null byte".to_string(),
        }
        .into());
    }
    bytes.push(0);
    Ok(bytes)
}
