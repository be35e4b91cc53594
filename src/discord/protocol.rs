//! Discord RPC IPC protocol types.
//!
//! Every message is a frame: `opcode (u32 LE) | length (u32 LE) | JSON body`.
//! Commands are matched to their replies through a per-command nonce.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::RpcError;

/// IPC protocol version sent in the handshake.
pub const RPC_VERSION: u32 = 1;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 8;

/// Upper bound on an incoming frame body. Discord never sends anything close.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  Handshake = 0,
  Frame = 1,
  Close = 2,
  Ping = 3,
  Pong = 4,
}

impl Opcode {
  pub fn from_u32(value: u32) -> Option<Self> {
    match value {
      0 => Some(Opcode::Handshake),
      1 => Some(Opcode::Frame),
      2 => Some(Opcode::Close),
      3 => Some(Opcode::Ping),
      4 => Some(Opcode::Pong),
      _ => None,
    }
  }
}

/// Encode a frame ready to be written to the socket.
pub fn encode_frame(opcode: Opcode, body: &Value) -> Result<Vec<u8>, RpcError> {
  let data = serde_json::to_vec(body)?;
  let mut frame = Vec::with_capacity(HEADER_LEN + data.len());
  frame.extend_from_slice(&(opcode as u32).to_le_bytes());
  frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
  frame.extend_from_slice(&data);
  Ok(frame)
}

/// Parse a frame header into its opcode and body length.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(Opcode, usize), RpcError> {
  let op = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
  let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

  let opcode =
    Opcode::from_u32(op).ok_or_else(|| RpcError::InvalidFrame(format!("unknown opcode {}", op)))?;
  if len > MAX_FRAME_LEN {
    return Err(RpcError::InvalidFrame(format!("frame too large ({} bytes)", len)));
  }

  Ok((opcode, len))
}

/// Handshake body for the given application.
pub fn handshake(client_id: &str) -> Value {
  json!({ "v": RPC_VERSION, "client_id": client_id })
}

/// Command sent to Discord over IPC.
#[derive(Debug, Clone, Serialize)]
pub struct RpcCommand {
  pub cmd: String,
  pub args: Value,
  pub nonce: String,
}

impl RpcCommand {
  /// Create a new command with a fresh nonce.
  pub fn new(cmd: &str, args: Value) -> Self {
    Self {
      cmd: cmd.to_string(),
      args,
      nonce: Uuid::new_v4().to_string(),
    }
  }

  /// Set (or clear, with `None`) the activity of this process.
  pub fn set_activity(pid: u32, activity: Option<&Activity>) -> Self {
    Self::new("SET_ACTIVITY", json!({ "pid": pid, "activity": activity }))
  }

  /// Ask the user to authorize the application for the given scopes.
  pub fn authorize(client_id: &str, scopes: &[String]) -> Self {
    Self::new(
      "AUTHORIZE",
      json!({ "client_id": client_id, "scopes": scopes }),
    )
  }

  /// Authenticate the session with an OAuth2 access token.
  pub fn authenticate(access_token: &str) -> Self {
    Self::new("AUTHENTICATE", json!({ "access_token": access_token }))
  }
}

/// Message received from Discord in a `Frame` opcode.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcMessage {
  pub cmd: String,
  #[serde(default)]
  pub evt: Option<String>,
  #[serde(default)]
  pub nonce: Option<String>,
  #[serde(default)]
  pub data: Option<Value>,
}

impl RpcMessage {
  /// Parse a frame body.
  pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(body)
  }

  /// The READY dispatch that answers a successful handshake.
  pub fn is_ready(&self) -> bool {
    self.cmd == "DISPATCH" && self.evt.as_deref() == Some("READY")
  }

  /// Whether this reply reports a failed command.
  pub fn is_error(&self) -> bool {
    self.evt.as_deref() == Some("ERROR")
  }

  /// Convert an error reply into an `RpcError`.
  pub fn to_error(&self) -> RpcError {
    let data = self.data.as_ref();
    let code = data
      .and_then(|d| d.get("code"))
      .and_then(Value::as_i64)
      .unwrap_or(0);
    let message = data
      .and_then(|d| d.get("message"))
      .and_then(Value::as_str)
      .unwrap_or("unknown error")
      .to_string();
    RpcError::Discord { code, message }
  }
}

/// Reason attached to a close frame.
pub fn close_reason(body: &[u8]) -> String {
  serde_json::from_slice::<Value>(body)
    .ok()
    .and_then(|v| {
      let code = v.get("code").and_then(Value::as_i64).unwrap_or(0);
      v.get("message")
        .and_then(Value::as_str)
        .map(|m| format!("{} ({})", m, code))
    })
    .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

/// Rich presence activity payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Activity {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timestamps: Option<Timestamps>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assets: Option<Assets>,
  pub instance: bool,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub buttons: Vec<Button>,
}

/// Activity timestamps in epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timestamps {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end: Option<i64>,
}

/// Activity images and their hover texts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Assets {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub large_image: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub large_text: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub small_image: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub small_text: Option<String>,
}

/// Link button shown under the activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Button {
  pub label: String,
  pub url: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_frame_encoding() {
    let frame = encode_frame(Opcode::Handshake, &handshake("123")).unwrap();
    let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
    let (op, len) = parse_header(&header).unwrap();
    assert_eq!(op, Opcode::Handshake);
    assert_eq!(len, frame.len() - HEADER_LEN);

    let body: Value = serde_json::from_slice(&frame[HEADER_LEN..]).unwrap();
    assert_eq!(body["v"], 1);
    assert_eq!(body["client_id"], "123");
  }

  #[test]
  fn test_header_rejects_unknown_opcode() {
    let mut header = [0u8; HEADER_LEN];
    header[0] = 9;
    assert!(matches!(parse_header(&header), Err(RpcError::InvalidFrame(_))));
  }

  #[test]
  fn test_header_rejects_oversized_frame() {
    let mut header = [0u8; HEADER_LEN];
    header[0] = 1;
    header[4..].copy_from_slice(&(u32::MAX).to_le_bytes());
    assert!(parse_header(&header).is_err());
  }

  #[test]
  fn test_ready_parsing() {
    let json = br#"{"cmd":"DISPATCH","evt":"READY","data":{"v":1},"nonce":null}"#;
    let msg = RpcMessage::parse(json).unwrap();
    assert!(msg.is_ready());
    assert!(!msg.is_error());
  }

  #[test]
  fn test_error_reply() {
    let json =
      br#"{"cmd":"SET_ACTIVITY","evt":"ERROR","nonce":"n","data":{"code":4000,"message":"bad"}}"#;
    let msg = RpcMessage::parse(json).unwrap();
    assert!(msg.is_error());
    match msg.to_error() {
      RpcError::Discord { code, message } => {
        assert_eq!(code, 4000);
        assert_eq!(message, "bad");
      }
      other => panic!("Expected Discord error, got {:?}", other),
    }
  }

  #[test]
  fn test_clear_activity_serializes_null() {
    let cmd = RpcCommand::set_activity(42, None);
    let json = serde_json::to_value(&cmd).unwrap();
    assert_eq!(json["cmd"], "SET_ACTIVITY");
    assert_eq!(json["args"]["pid"], 42);
    assert!(json["args"]["activity"].is_null());
    assert!(!cmd.nonce.is_empty());
  }

  #[test]
  fn test_activity_skips_empty_fields() {
    let activity = Activity {
      details: Some("Song".into()),
      timestamps: Some(Timestamps {
        start: Some(1000),
        end: None,
      }),
      ..Default::default()
    };
    let json = serde_json::to_value(&activity).unwrap();
    assert_eq!(json["details"], "Song");
    assert_eq!(json["timestamps"]["start"], 1000);
    assert!(json.get("state").is_none());
    assert!(json.get("buttons").is_none());
    assert!(json["timestamps"].get("end").is_none());
    assert_eq!(json["instance"], false);
  }

  #[test]
  fn test_close_reason() {
    assert_eq!(
      close_reason(br#"{"code":4000,"message":"Invalid Client ID"}"#),
      "Invalid Client ID (4000)"
    );
    assert_eq!(close_reason(b"garbage"), "garbage");
  }
}
