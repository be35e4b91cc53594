//! Async IPC connection to the local Discord client.
//!
//! Handles platform-specific socket/pipe discovery, the handshake, and
//! nonce-matched request/response plumbing over the framed protocol.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::RpcError;
use super::protocol::{
  close_reason, encode_frame, handshake, parse_header, Opcode, RpcCommand, RpcMessage, HEADER_LEN,
};

/// How long to wait for the READY dispatch and for command replies.
pub(crate) const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of `discord-ipc-N` endpoints Discord may listen on.
const IPC_SLOTS: usize = 10;

/// Pending request waiting for response.
type PendingRequest = oneshot::Sender<RpcMessage>;

/// IPC connection state shared between writer and reader.
struct IpcState {
  pending: HashMap<String, PendingRequest>,
}

/// Writer channel message.
enum WriteMessage {
  Frame(Vec<u8>),
  Close,
}

/// Candidate IPC endpoints, in the order Discord allocates them.
pub fn candidate_paths() -> Vec<PathBuf> {
  #[cfg(windows)]
  {
    (0..IPC_SLOTS)
      .map(|i| PathBuf::from(format!(r"\\?\pipe\discord-ipc-{}", i)))
      .collect()
  }
  #[cfg(not(windows))]
  {
    let base = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
      .iter()
      .find_map(|var| std::env::var_os(var).filter(|v| !v.is_empty()))
      .map(PathBuf::from)
      .unwrap_or_else(|| PathBuf::from("/tmp"));

    (0..IPC_SLOTS)
      .map(|i| base.join(format!("discord-ipc-{}", i)))
      .collect()
  }
}

/// Discord IPC connection that has completed the handshake.
pub struct RpcIpc {
  state: Arc<Mutex<IpcState>>,
  write_tx: async_channel::Sender<WriteMessage>,
  closed: CancellationToken,
  _reader_handle: JoinHandle<()>,
  _writer_handle: JoinHandle<()>,
}

impl RpcIpc {
  /// Connect and handshake on the first endpoint that accepts.
  pub async fn connect(paths: &[PathBuf], client_id: &str) -> Result<Self, RpcError> {
    let mut last_error = None;

    for path in paths {
      match Self::try_connect(path, client_id).await {
        Ok(ipc) => {
          log::debug!("Discord IPC connected on {}", path.display());
          return Ok(ipc);
        }
        Err(e) => {
          log::trace!("Discord IPC endpoint {} unavailable: {}", path.display(), e);
          // Keep the most informative error: a rejected handshake beats "not found"
          if !matches!(last_error, Some(RpcError::HandshakeRejected(_))) {
            last_error = Some(e);
          }
        }
      }
    }

    Err(last_error.unwrap_or(RpcError::NoSocket))
  }

  #[cfg(windows)]
  async fn try_connect(path: &std::path::Path, client_id: &str) -> Result<Self, RpcError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
      .open(path)
      .map_err(|e| RpcError::ConnectionFailed(format!("Failed to open pipe: {}", e)))?;

    let (reader, writer) = tokio::io::split(client);
    Self::setup(reader, writer, client_id).await
  }

  #[cfg(not(windows))]
  async fn try_connect(path: &std::path::Path, client_id: &str) -> Result<Self, RpcError> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path)
      .await
      .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;

    let (reader, writer) = tokio::io::split(stream);
    Self::setup(reader, writer, client_id).await
  }

  async fn setup<R, W>(mut reader: R, mut writer: W, client_id: &str) -> Result<Self, RpcError>
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    // Handshake runs inline; the background tasks only start once READY arrived
    let hello = encode_frame(Opcode::Handshake, &handshake(client_id))?;
    writer.write_all(&hello).await?;
    writer.flush().await?;

    let (opcode, body) = tokio::time::timeout(REPLY_TIMEOUT, read_frame(&mut reader))
      .await
      .map_err(|_| RpcError::Timeout)??;

    match opcode {
      Opcode::Frame => {
        let msg = RpcMessage::parse(&body)?;
        if !msg.is_ready() {
          return Err(RpcError::HandshakeRejected(format!(
            "expected READY, got {} {:?}",
            msg.cmd, msg.evt
          )));
        }
      }
      Opcode::Close => return Err(RpcError::HandshakeRejected(close_reason(&body))),
      other => {
        return Err(RpcError::InvalidFrame(format!(
          "unexpected {:?} during handshake",
          other
        )))
      }
    }

    let state = Arc::new(Mutex::new(IpcState {
      pending: HashMap::new(),
    }));
    let closed = CancellationToken::new();
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();

    // Spawn reader task
    let reader_state = state.clone();
    let reader_closed = closed.clone();
    let pong_tx = write_tx.clone();
    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, reader_state, pong_tx, reader_closed.clone()).await;
      reader_closed.cancel();
    });

    // Spawn writer task
    let writer_closed = closed.clone();
    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx).await;
      writer_closed.cancel();
    });

    Ok(Self {
      state,
      write_tx,
      closed,
      _reader_handle: reader_handle,
      _writer_handle: writer_handle,
    })
  }

  async fn reader_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    state: Arc<Mutex<IpcState>>,
    write_tx: async_channel::Sender<WriteMessage>,
    closed: CancellationToken,
  ) {
    log::debug!("Discord IPC reader loop started");

    loop {
      let frame = tokio::select! {
        _ = closed.cancelled() => break,
        frame = read_frame(&mut reader) => frame,
      };

      match frame {
        Ok((Opcode::Frame, body)) => match RpcMessage::parse(&body) {
          Ok(msg) => {
            let waiter = msg
              .nonce
              .as_ref()
              .and_then(|nonce| state.lock().pending.remove(nonce));
            match waiter {
              Some(tx) => {
                let _ = tx.send(msg);
              }
              None => log::debug!("Discord IPC: unsolicited {} {:?}", msg.cmd, msg.evt),
            }
          }
          Err(e) => log::warn!("Failed to parse Discord message: {}", e),
        },
        Ok((Opcode::Ping, body)) => {
          let pong = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| encode_frame(Opcode::Pong, &v).ok());
          if let Some(pong) = pong {
            let _ = write_tx.send(WriteMessage::Frame(pong)).await;
          }
        }
        Ok((Opcode::Close, body)) => {
          log::info!("Discord closed the IPC connection: {}", close_reason(&body));
          break;
        }
        Ok((opcode, _)) => {
          log::debug!("Discord IPC: ignoring {:?} frame", opcode);
        }
        Err(RpcError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
          log::info!("Discord IPC connection closed");
          break;
        }
        Err(e) => {
          log::error!("Discord IPC read error: {}", e);
          break;
        }
      }
    }

    // Dropping the waiters wakes every outstanding command with Disconnected
    state.lock().pending.clear();
    write_tx.close();
  }

  async fn writer_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: async_channel::Receiver<WriteMessage>,
  ) {
    log::debug!("Discord IPC writer loop started");

    while let Ok(msg) = write_rx.recv().await {
      match msg {
        WriteMessage::Frame(data) => {
          if let Err(e) = writer.write_all(&data).await {
            log::error!("Discord IPC write error: {}", e);
            break;
          }
          if let Err(e) = writer.flush().await {
            log::error!("Discord IPC flush error: {}", e);
            break;
          }
        }
        WriteMessage::Close => {
          if let Ok(frame) = encode_frame(Opcode::Close, &serde_json::json!({})) {
            let _ = writer.write_all(&frame).await;
          }
          let _ = writer.shutdown().await;
          log::debug!("Discord IPC writer closing");
          break;
        }
      }
    }
  }

  /// Send a command and wait for its reply.
  pub async fn send_command(&self, cmd: RpcCommand) -> Result<RpcMessage, RpcError> {
    self.send_command_with_timeout(cmd, REPLY_TIMEOUT).await
  }

  /// Send a command and wait up to `timeout` for its reply.
  pub async fn send_command_with_timeout(
    &self,
    cmd: RpcCommand,
    timeout: Duration,
  ) -> Result<RpcMessage, RpcError> {
    if self.is_closed() {
      return Err(RpcError::Disconnected);
    }

    let nonce = cmd.nonce.clone();
    let (tx, rx) = oneshot::channel();
    self.state.lock().pending.insert(nonce.clone(), tx);

    let frame = encode_frame(Opcode::Frame, &serde_json::to_value(&cmd)?)?;
    log::debug!("Sending Discord command {} ({})", cmd.cmd, nonce);

    if self.write_tx.send(WriteMessage::Frame(frame)).await.is_err() {
      self.state.lock().pending.remove(&nonce);
      return Err(RpcError::Disconnected);
    }

    match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(msg)) if msg.is_error() => Err(msg.to_error()),
      Ok(Ok(msg)) => Ok(msg),
      Ok(Err(_)) => Err(RpcError::Disconnected),
      Err(_) => {
        log::warn!("Discord command {} timed out", cmd.cmd);
        self.state.lock().pending.remove(&nonce);
        Err(RpcError::Timeout)
      }
    }
  }

  /// Token cancelled once the connection is gone, for whatever reason.
  pub fn closed(&self) -> CancellationToken {
    self.closed.clone()
  }

  /// Whether the connection has been lost or closed.
  pub fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }

  /// Close the connection.
  pub fn close(&self) {
    let _ = self.write_tx.try_send(WriteMessage::Close);
    self.closed.cancel();
  }
}

impl Drop for RpcIpc {
  fn drop(&mut self) {
    self.close();
  }
}

/// Read one frame (header + body).
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
  reader: &mut R,
) -> Result<(Opcode, Vec<u8>), RpcError> {
  let mut header = [0u8; HEADER_LEN];
  reader.read_exact(&mut header).await?;
  let (opcode, len) = parse_header(&header)?;

  let mut body = vec![0u8; len];
  reader.read_exact(&mut body).await?;
  Ok((opcode, body))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_candidate_paths() {
    let paths = candidate_paths();
    assert_eq!(paths.len(), IPC_SLOTS);
    assert!(paths[0].to_string_lossy().ends_with("discord-ipc-0"));
    assert!(paths[9].to_string_lossy().ends_with("discord-ipc-9"));
  }

  #[tokio::test]
  async fn test_read_frame_from_stream() {
    let frame = encode_frame(Opcode::Ping, &serde_json::json!({"x": 1})).unwrap();
    let mut cursor = std::io::Cursor::new(frame);
    let (op, body) = read_frame(&mut cursor).await.unwrap();
    assert_eq!(op, Opcode::Ping);
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["x"], 1);
  }

  #[tokio::test]
  async fn test_read_frame_truncated_body() {
    let mut frame = encode_frame(Opcode::Frame, &serde_json::json!({"cmd": "X"})).unwrap();
    frame.truncate(frame.len() - 2);
    let mut cursor = std::io::Cursor::new(frame);
    assert!(matches!(read_frame(&mut cursor).await, Err(RpcError::Io(_))));
  }
}
