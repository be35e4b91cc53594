//! Discord RPC module - rich presence over the local IPC socket.
//!
//! Architecture:
//! - `protocol.rs` - Frame codec, command/reply envelopes, activity payload types
//! - `ipc.rs` - Async IPC connection (Named Pipes on Windows, Unix Sockets on Linux/macOS)
//! - `client.rs` - Session client: handshake, authentication, activity commands
//! - `oauth.rs` - Code-for-token exchange for scoped sessions
//! - `connection.rs` - Connection manager with the endless retry loop

mod client;
mod connection;
mod error;
mod ipc;
mod oauth;
mod protocol;

pub use client::{RpcClient, SessionIdentity};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, RETRY_PERIOD};
pub use error::RpcError;
pub use oauth::{CodeExchange, DiscordOAuth};
pub use protocol::{Activity, Assets, Button, Timestamps};

/// In-process stand-in for the Discord client, listening on a Unix socket.
#[cfg(all(test, unix))]
pub(crate) mod testing {
  use std::path::PathBuf;
  use std::sync::Arc;
  use std::time::Duration;

  use parking_lot::Mutex;
  use serde_json::{json, Value};
  use tokio::io::AsyncWriteExt;
  use tokio::net::{UnixListener, UnixStream};
  use tokio::sync::mpsc;
  use tokio::task::JoinHandle;

  use super::ipc::read_frame;
  use super::protocol::{encode_frame, Opcode};

  #[derive(Debug, Clone, Copy)]
  pub enum ServerMode {
    /// Answer the handshake with READY and acknowledge every command.
    Ready,
    /// Answer the handshake with a close frame.
    Reject,
    /// Like `Ready`, but hold `AUTHORIZE` replies past the normal reply timeout.
    SlowAuthorize,
  }

  /// How long `SlowAuthorize` holds an `AUTHORIZE` reply.
  pub const SLOW_AUTHORIZE_DELAY: Duration = Duration::from_secs(6);

  pub struct FakeDiscord {
    pub path: PathBuf,
    commands: mpsc::UnboundedReceiver<Value>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accepted: Arc<Mutex<usize>>,
    accept_handle: JoinHandle<()>,
  }

  impl FakeDiscord {
    pub fn start(mode: ServerMode) -> Self {
      let path = std::env::temp_dir().join(format!("fake-discord-{}.sock", uuid::Uuid::new_v4()));
      Self::start_at(path, mode)
    }

    pub fn start_at(path: PathBuf, mode: ServerMode) -> Self {
      let _ = std::fs::remove_file(&path);
      let listener = UnixListener::bind(&path).expect("bind fake discord socket");
      let (tx, commands) = mpsc::unbounded_channel();
      let connections = Arc::new(Mutex::new(Vec::new()));
      let accepted = Arc::new(Mutex::new(0));

      let conns = connections.clone();
      let count = accepted.clone();
      let accept_handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
          *count.lock() += 1;
          let handle = tokio::spawn(serve(stream, mode, tx.clone()));
          conns.lock().push(handle);
        }
      });

      Self {
        path,
        commands,
        connections,
        accepted,
        accept_handle,
      }
    }

    /// Next command received from any client.
    pub async fn next_command(&mut self) -> Value {
      tokio::time::timeout(Duration::from_secs(2), self.commands.recv())
        .await
        .expect("timed out waiting for command")
        .expect("command channel closed")
    }

    pub fn try_next_command(&mut self) -> Option<Value> {
      self.commands.try_recv().ok()
    }

    /// Drop every open client connection, keeping the listener up.
    pub fn drop_connections(&self) {
      for handle in self.connections.lock().drain(..) {
        handle.abort();
      }
    }

    pub fn connection_count(&self) -> usize {
      *self.accepted.lock()
    }
  }

  impl Drop for FakeDiscord {
    fn drop(&mut self) {
      self.accept_handle.abort();
      self.drop_connections();
      let _ = std::fs::remove_file(&self.path);
    }
  }

  async fn serve(stream: UnixStream, mode: ServerMode, tx: mpsc::UnboundedSender<Value>) {
    let (mut reader, mut writer) = stream.into_split();

    if read_frame(&mut reader).await.is_err() {
      return;
    }

    let reply = match mode {
      ServerMode::Ready | ServerMode::SlowAuthorize => encode_frame(
        Opcode::Frame,
        &json!({"cmd": "DISPATCH", "evt": "READY", "data": {"v": 1}, "nonce": null}),
      ),
      ServerMode::Reject => encode_frame(
        Opcode::Close,
        &json!({"code": 4000, "message": "Invalid Client ID"}),
      ),
    };
    let Ok(reply) = reply else { return };
    if writer.write_all(&reply).await.is_err() {
      return;
    }
    if matches!(mode, ServerMode::Reject) {
      return;
    }

    while let Ok((opcode, body)) = read_frame(&mut reader).await {
      if opcode != Opcode::Frame {
        continue;
      }
      let Ok(cmd) = serde_json::from_slice::<Value>(&body) else {
        continue;
      };
      let ack = json!({
        "cmd": cmd["cmd"],
        "evt": null,
        "nonce": cmd["nonce"],
        "data": {"code": "auth-code"},
      });
      if matches!(mode, ServerMode::SlowAuthorize) && cmd["cmd"] == "AUTHORIZE" {
        tokio::time::sleep(SLOW_AUTHORIZE_DELAY).await;
      }
      let _ = tx.send(cmd);
      let Ok(ack) = encode_frame(Opcode::Frame, &ack) else { return };
      if writer.write_all(&ack).await.is_err() {
        return;
      }
    }
  }
}
