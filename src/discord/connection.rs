//! Connection manager - keeps a Discord RPC session alive indefinitely.
//!
//! A single supervisor task owns the connect/retry cycle, so there is never
//! more than one handshake in flight nor more than one retry timer armed.
//! Callers observe the session only through [`ConnectionEvent`]s and the
//! `publish`/`clear` operations, which are dropped while disconnected.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{RpcClient, SessionIdentity};
use super::ipc::candidate_paths;
use super::protocol::Activity;
use crate::presence::PresenceSink;

/// Fixed delay between connect attempts. There is no backoff and no limit.
pub const RETRY_PERIOD: Duration = Duration::from_secs(10);

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Connected,
}

/// Transitions emitted to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
  /// A handshake succeeded (first connect or reconnect).
  Connected,
  /// An established session was lost.
  Disconnected,
}

/// Owns one Discord session and reconnects it forever.
pub struct ConnectionManager {
  identity: Arc<Mutex<SessionIdentity>>,
  endpoints: Arc<Vec<PathBuf>>,
  retry_period: Duration,
  state: Arc<RwLock<ConnectionState>>,
  session: Arc<RwLock<Option<Arc<RpcClient>>>>,
  events: broadcast::Sender<ConnectionEvent>,
  cancel_token: CancellationToken,
  task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
  /// Create a manager that will discover the Discord socket itself.
  pub fn new(identity: SessionIdentity) -> Self {
    Self::with_endpoints(identity, candidate_paths(), RETRY_PERIOD)
  }

  /// Create a manager for explicit endpoints and retry period.
  pub fn with_endpoints(
    identity: SessionIdentity,
    endpoints: Vec<PathBuf>,
    retry_period: Duration,
  ) -> Self {
    let (events, _) = broadcast::channel(16);
    Self {
      identity: Arc::new(Mutex::new(identity)),
      endpoints: Arc::new(endpoints),
      retry_period,
      state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
      session: Arc::new(RwLock::new(None)),
      events,
      cancel_token: CancellationToken::new(),
      task_handle: Mutex::new(None),
    }
  }

  /// Start the retry loop and wait until the first handshake succeeds.
  ///
  /// Calling this while the loop already runs does not start a second one.
  pub async fn start(&self) {
    let mut events = self.events.subscribe();
    self.spawn_retry_loop();

    loop {
      if self.is_connected() {
        return;
      }
      match events.recv().await {
        Ok(ConnectionEvent::Connected) => return,
        Ok(ConnectionEvent::Disconnected) => continue,
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => return,
      }
    }
  }

  /// Spawn the supervisor task unless one is already running.
  fn spawn_retry_loop(&self) {
    let mut handle = self.task_handle.lock();
    if handle.as_ref().is_some_and(|h| !h.is_finished()) {
      log::debug!("Discord retry loop already running");
      return;
    }

    let supervisor = Supervisor {
      identity: self.identity.clone(),
      endpoints: self.endpoints.clone(),
      retry_period: self.retry_period,
      state: self.state.clone(),
      session: self.session.clone(),
      events: self.events.clone(),
      cancel_token: self.cancel_token.clone(),
    };
    *handle = Some(tokio::spawn(supervisor.run()));
  }

  /// Subscribe to connection transitions.
  pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
    self.events.subscribe()
  }

  /// Current lifecycle state.
  pub fn state(&self) -> ConnectionState {
    *self.state.read()
  }

  /// Check if a usable session exists.
  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Connected
  }

  /// Display an activity. Dropped silently while disconnected.
  pub async fn publish(&self, activity: &Activity) {
    let Some(client) = self.current_session() else {
      log::debug!("Not connected to Discord, dropping activity update");
      return;
    };

    if let Err(e) = client.set_activity(activity).await {
      log::warn!("Failed to set Discord activity: {}", e);
    }
  }

  /// Remove any displayed activity. No-op while disconnected.
  pub async fn clear(&self) {
    let Some(client) = self.current_session() else {
      return;
    };

    if let Err(e) = client.clear_activity().await {
      log::warn!("Failed to clear Discord activity: {}", e);
    }
  }

  fn current_session(&self) -> Option<Arc<RpcClient>> {
    if !self.is_connected() {
      return None;
    }
    self.session.read().clone()
  }

  /// Stop the retry loop and close the session.
  pub async fn stop(&self) {
    self.cancel_token.cancel();

    // Take the handle without holding the lock across await
    let handle = self.task_handle.lock().take();
    if let Some(handle) = handle {
      let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    if let Some(client) = self.session.write().take() {
      client.close();
    }
    *self.state.write() = ConnectionState::Disconnected;
  }
}

#[async_trait]
impl PresenceSink for ConnectionManager {
  fn is_connected(&self) -> bool {
    ConnectionManager::is_connected(self)
  }

  async fn publish(&self, activity: &Activity) {
    ConnectionManager::publish(self, activity).await
  }

  async fn clear(&self) {
    ConnectionManager::clear(self).await
  }
}

/// State moved into the retry task.
struct Supervisor {
  identity: Arc<Mutex<SessionIdentity>>,
  endpoints: Arc<Vec<PathBuf>>,
  retry_period: Duration,
  state: Arc<RwLock<ConnectionState>>,
  session: Arc<RwLock<Option<Arc<RpcClient>>>>,
  events: broadcast::Sender<ConnectionEvent>,
  cancel_token: CancellationToken,
}

impl Supervisor {
  async fn run(self) {
    log::info!("Discord retry loop started");

    loop {
      let Some(client) = self.connect_until_ready().await else {
        break;
      };

      let closed = client.closed();
      *self.session.write() = Some(client.clone());
      *self.state.write() = ConnectionState::Connected;
      log::info!("Connected with Discord");
      let _ = self.events.send(ConnectionEvent::Connected);

      tokio::select! {
        _ = self.cancel_token.cancelled() => {
          client.close();
          break;
        }
        _ = closed.cancelled() => {}
      }

      self.session.write().take();
      *self.state.write() = ConnectionState::Disconnected;
      log::warn!("Lost connection with Discord");
      let _ = self.events.send(ConnectionEvent::Disconnected);

      if !self.wait_retry_period().await {
        break;
      }
    }

    *self.state.write() = ConnectionState::Disconnected;
    log::info!("Discord retry loop stopped");
  }

  /// Attempt handshakes on the fixed cadence until one succeeds.
  /// Returns `None` if cancelled first.
  async fn connect_until_ready(&self) -> Option<Arc<RpcClient>> {
    let mut attempt: u64 = 0;

    loop {
      if self.cancel_token.is_cancelled() {
        return None;
      }

      attempt += 1;
      *self.state.write() = ConnectionState::Connecting;
      let identity = self.identity.lock().clone();

      // A scoped login can sit on the consent modal for minutes
      let attempt_result = tokio::select! {
        _ = self.cancel_token.cancelled() => return None,
        result = RpcClient::connect(&self.endpoints, &identity) => result,
      };

      match attempt_result {
        Ok(client) => {
          // Keep the exchanged token so reconnects do not prompt again
          if let Some(token) = client.access_token() {
            self.identity.lock().access_token = Some(token.to_string());
          }
          return Some(Arc::new(client));
        }
        Err(e) => {
          if attempt == 1 {
            log::info!(
              "Discord not reachable ({}), retrying every {}s",
              e,
              self.retry_period.as_secs()
            );
          } else {
            log::debug!("Discord connect attempt {} failed: {}", attempt, e);
          }
        }
      }

      *self.state.write() = ConnectionState::Disconnected;
      if !self.wait_retry_period().await {
        return None;
      }
    }
  }

  /// Sleep one retry period. Returns false if cancelled.
  async fn wait_retry_period(&self) -> bool {
    tokio::select! {
      _ = self.cancel_token.cancelled() => false,
      _ = tokio::time::sleep(self.retry_period) => true,
    }
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::discord::testing::{FakeDiscord, ServerMode};

  const SHORT_RETRY: Duration = Duration::from_millis(50);

  async fn next_event(rx: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
      .await
      .expect("timed out waiting for connection event")
      .expect("event channel closed")
  }

  fn manager_for(server: &FakeDiscord) -> ConnectionManager {
    ConnectionManager::with_endpoints(
      SessionIdentity::new("42"),
      vec![server.path.clone()],
      SHORT_RETRY,
    )
  }

  #[tokio::test]
  async fn test_start_connects_and_publishes() {
    let mut server = FakeDiscord::start(ServerMode::Ready);
    let manager = manager_for(&server);

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    tokio::time::timeout(Duration::from_secs(2), manager.start())
      .await
      .unwrap();
    assert!(manager.is_connected());

    let activity = Activity {
      details: Some("Track".into()),
      ..Default::default()
    };
    manager.publish(&activity).await;
    let cmd = server.next_command().await;
    assert_eq!(cmd["args"]["activity"]["details"], "Track");

    manager.clear().await;
    let cmd = server.next_command().await;
    assert!(cmd["args"]["activity"].is_null());

    manager.stop().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
  }

  #[tokio::test]
  async fn test_publish_while_disconnected_is_dropped() {
    let path = std::env::temp_dir().join(format!("no-discord-{}.sock", uuid::Uuid::new_v4()));
    let manager =
      ConnectionManager::with_endpoints(SessionIdentity::new("42"), vec![path], SHORT_RETRY);

    manager.publish(&Activity::default()).await;
    manager.clear().await;
    assert!(!manager.is_connected());
  }

  #[tokio::test]
  async fn test_reconnects_after_transport_loss() {
    let server = FakeDiscord::start(ServerMode::Ready);
    let manager = manager_for(&server);
    let mut events = manager.subscribe();

    manager.start().await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    server.drop_connections();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert!(!manager.is_connected());

    // The listener is still up, so the next attempt succeeds
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
    assert!(manager.is_connected());

    manager.stop().await;
  }

  #[tokio::test]
  async fn test_retries_until_service_appears() {
    let path = std::env::temp_dir().join(format!("late-discord-{}.sock", uuid::Uuid::new_v4()));
    let manager = Arc::new(ConnectionManager::with_endpoints(
      SessionIdentity::new("42"),
      vec![path.clone()],
      SHORT_RETRY,
    ));

    let starter = manager.clone();
    let started = tokio::spawn(async move { starter.start().await });

    tokio::time::sleep(SHORT_RETRY * 3).await;
    assert!(!manager.is_connected());

    let _server = FakeDiscord::start_at(path, ServerMode::Ready);
    tokio::time::timeout(Duration::from_secs(2), started)
      .await
      .unwrap()
      .unwrap();
    assert!(manager.is_connected());

    manager.stop().await;
  }

  #[tokio::test]
  async fn test_start_is_idempotent() {
    let server = FakeDiscord::start(ServerMode::Ready);
    let manager = manager_for(&server);
    let mut events = manager.subscribe();

    manager.start().await;
    manager.start().await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    // A second supervisor would have produced a second handshake
    tokio::time::sleep(SHORT_RETRY * 3).await;
    assert!(events.try_recv().is_err());
    assert_eq!(server.connection_count(), 1);

    manager.stop().await;
  }

  #[tokio::test]
  async fn test_stop_interrupts_pending_authorization() {
    let server = FakeDiscord::start(ServerMode::SlowAuthorize);
    let identity = SessionIdentity {
      client_id: "42".into(),
      scopes: vec!["rpc".into()],
      client_secret: Some("secret".into()),
      ..Default::default()
    };
    let manager = Arc::new(ConnectionManager::with_endpoints(
      identity,
      vec![server.path.clone()],
      SHORT_RETRY,
    ));

    let starter = manager.clone();
    tokio::spawn(async move { starter.start().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    let stopping = std::time::Instant::now();
    manager.stop().await;
    assert!(stopping.elapsed() < Duration::from_secs(1));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
  }
}
