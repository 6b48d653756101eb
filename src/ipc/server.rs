//! IPC Server
//!
//! Unix socket server for the callout daemon.

use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{IpcRequest, IpcResponse, MAX_REQUEST_BYTES};
use crate::announcer::Announcer;

/// IPC Server for the daemon
pub struct IpcServer {
    path: PathBuf,
    shutdown: CancellationToken,
}

impl IpcServer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token that stops `run` when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the server
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Bind the socket and serve until stopped
    pub async fn run(&self, announcer: Arc<Announcer>) -> Result<()> {
        // Clean up stale socket
        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }

        let listener = UnixListener::bind(&self.path)?;

        // Set strict permissions (user only: RW-------)
        let mut perms = fs::metadata(&self.path)?.permissions();
        perms.set_mode(0o600);
        if let Err(e) = fs::set_permissions(&self.path, perms) {
            warn!("⚠️ Failed to set strict IPC socket permissions: {}", e);
        } else {
            debug!("🔒 IPC socket permissions set to 0600");
        }

        info!("🔌 IPC server listening on {:?}", self.path);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let announcer = announcer.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, announcer).await {
                                warn!("IPC client error: {}", e);
                            }
                        });
                    }
                    Err(e) => warn!("IPC accept error: {}", e),
                },
            }
        }

        // Cleanup
        let _ = fs::remove_file(&self.path);
        info!("🔌 IPC server stopped");
        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, announcer: Arc<Announcer>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();

    // Message size limit
    let mut reader = BufReader::new(read_half).take(MAX_REQUEST_BYTES as u64 + 1);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    if line.is_empty() {
        return Ok(());
    }

    let response = if line.len() > MAX_REQUEST_BYTES {
        warn!("⚠️ IPC request over {} bytes rejected", MAX_REQUEST_BYTES);
        IpcResponse::Error {
            seq_id: 0,
            message: "request too large".to_string(),
        }
    } else {
        match serde_json::from_str::<IpcRequest>(line.trim()) {
            Ok(request) => {
                debug!("📨 IPC request: {:?}", request);
                handle_request(&announcer, request).await
            }
            Err(e) => IpcResponse::Error {
                seq_id: 0,
                message: format!("invalid request: {}", e),
            },
        }
    };

    let response_json = serde_json::to_string(&response)? + "\n";
    write_half.write_all(response_json.as_bytes()).await?;
    write_half.flush().await?;

    Ok(())
}

/// Execute one request against the announcer
pub async fn handle_request(announcer: &Announcer, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::Announce {
            seq_id,
            endpoint_id,
            request,
        } => {
            let outcome = announcer.dispatch_announcement(&endpoint_id, &request).await;
            IpcResponse::Outcome { seq_id, outcome }
        }
        IpcRequest::Detect {
            seq_id,
            address,
            port,
            credentials,
        } => {
            let result = announcer.run_detection(&address, port, credentials).await;
            IpcResponse::Detection { seq_id, result }
        }
        IpcRequest::Status {
            seq_id,
            endpoint_id,
        } => {
            let entries = announcer.status_entries(endpoint_id.as_deref());
            IpcResponse::Status { seq_id, entries }
        }
        IpcRequest::Stop {
            seq_id,
            endpoint_id,
        } => {
            let report = announcer.stop(&endpoint_id);
            IpcResponse::Stopped { seq_id, report }
        }
        IpcRequest::Refresh {
            seq_id,
            endpoint_id,
        } => match announcer.refresh(&endpoint_id).await {
            Ok(status) => IpcResponse::Ack {
                seq_id,
                success: true,
                message: Some(format!("{}: {}", endpoint_id, status)),
            },
            Err(e) => IpcResponse::Error {
                seq_id,
                message: e.to_string(),
            },
        },
    }
}
