//! Network operations and control channel dispatch

use super::{Supervisor, lock};
use crate::Result;
use crate::auxiliary::{Node, NodeInfo, NodeKey, not_found};
use crate::error::AuxiliaryError;
use crate::ipc::server::ControlHandler;
use crate::ipc::{ControlRequest, ControlResponse, PROTOCOL_VERSION};
use std::sync::Arc;

impl Supervisor {
    fn fetch_node(&self, key: &NodeKey) -> std::result::Result<Arc<Node>, AuxiliaryError> {
        match lock(&self.auxiliary).as_ref() {
            Some(auxiliary) => auxiliary.fetch(key),
            None => Err(not_found(key, std::iter::empty())),
        }
    }

    /// Stop a host or switch of the network.
    pub fn kill(&self, name: &str) -> Result<()> {
        self.fetch_node(&name.into())?.stop()?;
        info!("stopped {name}");
        Ok(())
    }

    /// Start a node that was stopped with `kill`.
    pub fn up(&self, name: &str) -> Result<()> {
        self.fetch_node(&name.into())?.run()?;
        info!("started {name}");
        Ok(())
    }

    pub fn port_up(&self, switch: &str, port: u16) -> Result<()> {
        self.fetch_node(&switch.into())?.bring_port_up(port)?;
        debug!("{switch}: port {port} up");
        Ok(())
    }

    pub fn port_down(&self, switch: &str, port: u16) -> Result<()> {
        self.fetch_node(&switch.into())?.bring_port_down(port)?;
        debug!("{switch}: port {port} down");
        Ok(())
    }

    pub fn fetch(&self, name: &str) -> Result<NodeInfo> {
        Ok(self.fetch_node(&name.into())?.info())
    }

    /// Best effort: deleting a link that is already down or does not exist
    /// succeeds.
    pub fn delete_link(&self, endpoint1: &str, endpoint2: &str) -> Result<()> {
        let key = NodeKey::Link(endpoint1.to_string(), endpoint2.to_string());
        let link = match self.fetch_node(&key) {
            Ok(link) => link,
            Err(err) => {
                debug!("delete_link: {err}");
                return Ok(());
            }
        };
        match link.stop() {
            Ok(()) => info!("deleted {key}"),
            Err(AuxiliaryError::NotRunning { .. }) => debug!("{key} is already down"),
            Err(err) => warn!("failed to delete {key}: {err}"),
        }
        Ok(())
    }

    fn handle_request(&self, req: ControlRequest) -> Result<ControlResponse> {
        match req {
            ControlRequest::Connect { version } => {
                if version != PROTOCOL_VERSION {
                    warn!("client speaks protocol {version}, expected {PROTOCOL_VERSION}");
                    return Ok(ControlResponse::VersionMismatch {
                        server: PROTOCOL_VERSION,
                    });
                }
                trace!("client connected");
            }
            ControlRequest::Kill { name } => self.kill(&name)?,
            ControlRequest::DeleteLink {
                endpoint1,
                endpoint2,
            } => self.delete_link(&endpoint1, &endpoint2)?,
            ControlRequest::Killall => {
                info!("killall requested over the control channel");
                self.killall();
            }
            ControlRequest::Up { name } => self.up(&name)?,
            ControlRequest::PortUp { switch, port } => self.port_up(&switch, port)?,
            ControlRequest::PortDown { switch, port } => self.port_down(&switch, port)?,
            ControlRequest::Fetch { name } => return Ok(ControlResponse::Node(self.fetch(&name)?)),
        }
        Ok(ControlResponse::Ok)
    }
}

impl ControlHandler for Supervisor {
    fn handle(&self, req: ControlRequest) -> ControlResponse {
        let _dispatch = lock(&self.dispatch);
        self.handle_request(req).unwrap_or_else(|err| match err.downcast::<AuxiliaryError>() {
            Ok(AuxiliaryError::NotFound { name, suggestion }) => {
                ControlResponse::NotFound { name, suggestion }
            }
            Ok(err) => ControlResponse::Error(err.to_string()),
            Err(err) => ControlResponse::Error(err.to_string()),
        })
    }
}
