//! IPC (Inter-Process Communication) Module
//!
//! Unix socket-based communication between the callout daemon and the CLI.
//! Protocol: JSON over newline-delimited messages, one request per
//! connection.

pub mod client;
pub mod messages;
pub mod server;

pub use client::IpcClient;
pub use messages::*;
pub use server::IpcServer;

use std::path::PathBuf;

/// Largest accepted request line
pub const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Get the Unix socket path for IPC. `CALLOUT_SOCKET` overrides the
/// per-user default.
pub fn socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("CALLOUT_SOCKET") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "callout".to_string());
    PathBuf::from(format!("/tmp/callout-{}.sock", user))
}
