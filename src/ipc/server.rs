use crate::Result;
use crate::ipc::{ControlRequest, ControlResponse, deserialize, frame, fs_name};
use interprocess::local_socket::ListenerOptions;
use interprocess::local_socket::tokio::{Listener as TokioListener, RecvHalf, SendHalf};
use interprocess::local_socket::traits::tokio::Listener;
use interprocess::local_socket::traits::tokio::Stream;
use miette::IntoDiagnostic;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// How long in-flight calls get to send their reply once the channel is stopped
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Executes control requests. Calls are made from a blocking thread.
pub trait ControlHandler: Send + Sync {
    fn handle(&self, req: ControlRequest) -> ControlResponse;
}

pub struct ControlServer {
    listener: TokioListener,
    path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
}

/// Stops a `ControlServer` from any thread, including outside the runtime.
#[derive(Debug, Clone)]
pub struct ControlServerHandle {
    path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
}

impl ControlServerHandle {
    pub fn stop(&self) {
        debug!("stopping control channel");
        self.shutdown_tx.send_replace(true);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ControlServer {
    /// Bind the socket at `path`, replacing a stale one. Must run inside a tokio runtime.
    pub fn bind(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            xx::file::mkdirp(dir)?;
        }
        let _ = xx::file::remove_file(path);
        let opts = ListenerOptions::new().name(fs_name(path)?);
        debug!("Listening on {}", path.display());

        // Create the socket with 0600 permissions from the start; callers are
        // only authorized by filesystem permissions.
        let old_umask = unsafe { libc::umask(0o077) };
        let listener = opts.create_tokio();
        unsafe {
            libc::umask(old_umask);
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener: listener.into_diagnostic()?,
            path: path.to_path_buf(),
            shutdown_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> ControlServerHandle {
        ControlServerHandle {
            path: self.path.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept connections until stopped through a `ControlServerHandle`.
    pub async fn serve<H>(self, handler: Arc<H>) -> Result<()>
    where
        H: ControlHandler + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(stream) => {
                        trace!("Client accepted");
                        let (recv, send) = stream.split();
                        connections.spawn(Self::connection(recv, send, handler.clone()));
                    }
                    Err(err) => error!("control channel accept failed: {err:?}"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            trace!("dropping idle control connections");
        }
        Ok(())
    }

    async fn connection<H>(recv: RecvHalf, mut send: SendHalf, handler: Arc<H>)
    where
        H: ControlHandler + 'static,
    {
        let mut recv = BufReader::new(recv);
        loop {
            let rsp = match Self::read_message(&mut recv).await {
                Ok(Some(req)) => {
                    debug!("received request: {req:?}");
                    let handler = handler.clone();
                    tokio::task::spawn_blocking(move || handler.handle(req))
                        .await
                        .unwrap_or_else(|err| {
                            ControlResponse::Error(format!("control handler failed: {err}"))
                        })
                }
                Ok(None) => {
                    trace!("Client disconnected");
                    break;
                }
                Err(err) => {
                    warn!("Failed to deserialize request: {err:?}");
                    ControlResponse::Error(format!("invalid request: {err}"))
                }
            };
            if let Err(err) = Self::send(&mut send, &rsp).await {
                debug!("Failed to send response: {err:?}");
                break;
            }
        }
    }

    async fn read_message(recv: &mut BufReader<RecvHalf>) -> Result<Option<ControlRequest>> {
        let mut bytes = Vec::new();
        recv.read_until(0, &mut bytes).await.into_diagnostic()?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(deserialize(&bytes)?))
    }

    async fn send(send: &mut SendHalf, msg: &ControlResponse) -> Result<()> {
        trace!("Sending response: {msg:?}");
        let msg = frame(msg)?;
        send.write_all(&msg).await.into_diagnostic()?;
        Ok(())
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        debug!("Closing control channel {}", self.path.display());
        let _ = std::fs::remove_file(&self.path);
    }
}
