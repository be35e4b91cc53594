//! Discord RPC error types.

use thiserror::Error;

/// Errors that can occur while talking to the local Discord client.
#[derive(Debug, Error)]
pub enum RpcError {
  #[error("No Discord IPC socket found")]
  NoSocket,

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("JSON serialization error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Invalid frame: {0}")]
  InvalidFrame(String),

  #[error("Handshake rejected: {0}")]
  HandshakeRejected(String),

  #[error("Discord error {code}: {message}")]
  Discord { code: i64, message: String },

  #[error("Authorization failed: {0}")]
  AuthFailed(String),

  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("Command timeout")]
  Timeout,

  #[error("Disconnected")]
  Disconnected,
}
