use crate::auxiliary::NodeInfo;
use crate::error::{AuxiliaryError, IpcError};
use crate::Result;
use crate::ipc::{
    ControlRequest, ControlResponse, PROTOCOL_VERSION, address, deserialize, frame, fs_name,
};
use exponential_backoff::Backoff;
use interprocess::local_socket::tokio::{RecvHalf, SendHalf};
use interprocess::local_socket::traits::tokio::Stream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

struct Connection {
    recv: BufReader<RecvHalf>,
    send: SendHalf,
}

/// Client side of the control channel, used by short-lived CLI invocations.
///
/// Calls block until the supervisor answers; there is no request timeout.
pub struct ControlClient {
    path: PathBuf,
    conn: Mutex<Connection>,
}

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_MIN_DELAY: Duration = Duration::from_millis(100);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(1);

impl ControlClient {
    /// Connect to the supervisor running controller `name`.
    pub async fn connect(socket_dir: &Path, name: &str) -> Result<Self> {
        let path = address(socket_dir, name, true)?;
        let client = Self::connect_(&path).await?;
        trace!("Connected to {}", path.display());
        match client
            .request(ControlRequest::Connect {
                version: PROTOCOL_VERSION,
            })
            .await?
        {
            ControlResponse::Ok => {}
            ControlResponse::VersionMismatch { server } => {
                return Err(IpcError::VersionMismatch {
                    client: PROTOCOL_VERSION,
                    server,
                }
                .into());
            }
            rsp => return Err(unexpected("Ok", &rsp)),
        }
        debug!("Connected to {name}");
        Ok(client)
    }

    async fn connect_(path: &Path) -> Result<Self> {
        let mut last_err = None;
        for duration in Backoff::new(CONNECT_ATTEMPTS, CONNECT_MIN_DELAY, CONNECT_MAX_DELAY) {
            match interprocess::local_socket::tokio::Stream::connect(fs_name(path)?).await {
                Ok(conn) => {
                    let (recv, send) = conn.split();
                    return Ok(Self {
                        path: path.to_path_buf(),
                        conn: Mutex::new(Connection {
                            recv: BufReader::new(recv),
                            send,
                        }),
                    });
                }
                Err(err) => {
                    debug!("Failed to connect to {}: {err:?}", path.display());
                    last_err = Some(err);
                    if let Some(duration) = duration {
                        tokio::time::sleep(duration).await;
                    }
                }
            }
        }
        Err(IpcError::ConnectionFailed {
            path: path.to_path_buf(),
            attempts: CONNECT_ATTEMPTS,
            source: last_err,
        }
        .into())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn request(&self, req: ControlRequest) -> Result<ControlResponse> {
        let msg = frame(&req)?;
        let mut conn = self.conn.lock().await;
        conn.send
            .write_all(&msg)
            .await
            .map_err(|source| IpcError::SendFailed { source })?;
        let mut bytes = Vec::new();
        conn.recv
            .read_until(0, &mut bytes)
            .await
            .map_err(|source| IpcError::ReadFailed { source })?;
        if bytes.is_empty() {
            return Err(IpcError::ConnectionClosed.into());
        }
        deserialize(&bytes)
    }

    /// Send a request whose only successful answer is `Ok`.
    async fn call(&self, req: ControlRequest) -> Result<()> {
        match self.request(req).await? {
            ControlResponse::Ok => Ok(()),
            rsp => Err(into_error(rsp)),
        }
    }

    pub async fn kill(&self, name: &str) -> Result<()> {
        self.call(ControlRequest::Kill {
            name: name.to_string(),
        })
        .await?;
        info!("stopped {name}");
        Ok(())
    }

    pub async fn delete_link(&self, endpoint1: &str, endpoint2: &str) -> Result<()> {
        self.call(ControlRequest::DeleteLink {
            endpoint1: endpoint1.to_string(),
            endpoint2: endpoint2.to_string(),
        })
        .await?;
        info!("deleted link {endpoint1}-{endpoint2}");
        Ok(())
    }

    /// A daemonized supervisor exits before answering, so a closed connection
    /// counts as success here.
    pub async fn killall(&self) -> Result<()> {
        match self.call(ControlRequest::Killall).await {
            Ok(()) => Ok(()),
            Err(err)
                if matches!(
                    err.downcast_ref::<IpcError>(),
                    Some(IpcError::ConnectionClosed | IpcError::ReadFailed { .. })
                ) =>
            {
                debug!("supervisor closed the connection while shutting down");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn up(&self, name: &str) -> Result<()> {
        self.call(ControlRequest::Up {
            name: name.to_string(),
        })
        .await?;
        info!("started {name}");
        Ok(())
    }

    pub async fn port_up(&self, switch: &str, port: u16) -> Result<()> {
        self.call(ControlRequest::PortUp {
            switch: switch.to_string(),
            port,
        })
        .await
    }

    pub async fn port_down(&self, switch: &str, port: u16) -> Result<()> {
        self.call(ControlRequest::PortDown {
            switch: switch.to_string(),
            port,
        })
        .await
    }

    pub async fn fetch(&self, name: &str) -> Result<NodeInfo> {
        let rsp = self
            .request(ControlRequest::Fetch {
                name: name.to_string(),
            })
            .await?;
        match rsp {
            ControlResponse::Node(info) => Ok(info),
            rsp => Err(into_error(rsp)),
        }
    }
}

fn into_error(rsp: ControlResponse) -> miette::Report {
    match rsp {
        ControlResponse::NotFound { name, suggestion } => {
            AuxiliaryError::NotFound { name, suggestion }.into()
        }
        ControlResponse::Error(msg) => miette::miette!("{msg}"),
        rsp => unexpected("Ok", &rsp),
    }
}

fn unexpected(expected: &str, rsp: &ControlResponse) -> miette::Report {
    IpcError::UnexpectedResponse {
        expected: expected.to_string(),
        actual: rsp.to_string(),
    }
    .into()
}
