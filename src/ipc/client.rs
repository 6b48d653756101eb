//! IPC Client
//!
//! Unix socket client used by the CLI to reach a running daemon.

use anyhow::{anyhow, bail, Result};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{socket_path, IpcRequest, IpcResponse};
use crate::announcement::{AnnouncementOutcome, AnnouncementRequest};
use crate::detect::DetectionResult;
use crate::dispatch::StopReport;
use crate::endpoint::Credentials;
use crate::health::HealthEntry;

static NEXT_SEQ_ID: AtomicU64 = AtomicU64::new(1);

fn next_seq_id() -> u64 {
    NEXT_SEQ_ID.fetch_add(1, Ordering::SeqCst)
}

/// IPC Client for the CLI
#[derive(Debug, Clone)]
pub struct IpcClient {
    path: PathBuf,
    timeout: Duration,
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new(socket_path())
    }
}

impl IpcClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the daemon is running
    pub fn is_daemon_running(&self) -> bool {
        self.path.exists() && UnixStream::connect(&self.path).is_ok()
    }

    /// Send one request and read its response, checking the sequence id
    pub fn send(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.path)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(Duration::from_secs(5)))?;

        let request_json = serde_json::to_string(request)? + "\n";
        stream.write_all(request_json.as_bytes())?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;

        let response: IpcResponse = serde_json::from_str(line.trim())?;
        debug!("📨 IPC response: {:?}", response);

        if let IpcResponse::Error { message, .. } = &response {
            bail!("daemon rejected request: {}", message);
        }
        if response.seq_id() != request.seq_id() {
            bail!(
                "IPC sequence ID mismatch: expected {}, got {}",
                request.seq_id(),
                response.seq_id()
            );
        }
        Ok(response)
    }

    pub fn announce(
        &self,
        endpoint_id: &str,
        request: AnnouncementRequest,
    ) -> Result<AnnouncementOutcome> {
        let response = self.send(&IpcRequest::Announce {
            seq_id: next_seq_id(),
            endpoint_id: endpoint_id.to_string(),
            request,
        })?;
        match response {
            IpcResponse::Outcome { outcome, .. } => Ok(outcome),
            other => Err(unexpected(&other)),
        }
    }

    pub fn detect(
        &self,
        address: &str,
        port: u16,
        credentials: Option<Credentials>,
    ) -> Result<DetectionResult> {
        let response = self.send(&IpcRequest::Detect {
            seq_id: next_seq_id(),
            address: address.to_string(),
            port,
            credentials,
        })?;
        match response {
            IpcResponse::Detection { result, .. } => Ok(result),
            other => Err(unexpected(&other)),
        }
    }

    pub fn status(&self, endpoint_id: Option<&str>) -> Result<Vec<HealthEntry>> {
        let response = self.send(&IpcRequest::Status {
            seq_id: next_seq_id(),
            endpoint_id: endpoint_id.map(str::to_string),
        })?;
        match response {
            IpcResponse::Status { entries, .. } => Ok(entries),
            other => Err(unexpected(&other)),
        }
    }

    pub fn stop(&self, endpoint_id: &str) -> Result<StopReport> {
        let response = self.send(&IpcRequest::Stop {
            seq_id: next_seq_id(),
            endpoint_id: endpoint_id.to_string(),
        })?;
        match response {
            IpcResponse::Stopped { report, .. } => Ok(report),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the daemon to re-check an endpoint
    pub fn refresh(&self, endpoint_id: &str) -> Result<String> {
        let response = self.send(&IpcRequest::Refresh {
            seq_id: next_seq_id(),
            endpoint_id: endpoint_id.to_string(),
        })?;
        match response {
            IpcResponse::Ack { message, .. } => Ok(message.unwrap_or_default()),
            other => Err(unexpected(&other)),
        }
    }

    /// Re-check every endpoint the daemon knows about
    pub fn refresh_all(&self) -> Result<Vec<String>> {
        self.status(None)?
            .iter()
            .map(|entry| self.refresh(&entry.endpoint_id))
            .collect()
    }
}

fn unexpected(response: &IpcResponse) -> anyhow::Error {
    anyhow!("unexpected IPC response: {:?}", response)
}
