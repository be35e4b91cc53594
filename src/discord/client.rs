//! High-level Discord RPC client.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::RpcError;
use super::ipc::RpcIpc;
use super::oauth::{CodeExchange, DiscordOAuth};
use super::protocol::{Activity, RpcCommand};

/// `AUTHORIZE` is answered only once the user acts on Discord's consent modal.
pub const AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(300);

/// Application identity used for the handshake and optional scoped login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
  /// Discord application (client) ID.
  pub client_id: String,
  /// OAuth2 scopes. Empty means a plain transport-level session.
  #[serde(default)]
  pub scopes: Vec<String>,
  /// Pre-issued access token; skips the authorization exchange.
  #[serde(default)]
  pub access_token: Option<String>,
  #[serde(default)]
  pub client_secret: Option<String>,
  #[serde(default)]
  pub redirect_uri: Option<String>,
}

impl SessionIdentity {
  pub fn new(client_id: impl Into<String>) -> Self {
    Self {
      client_id: client_id.into(),
      ..Default::default()
    }
  }

  /// Whether the session must authenticate before it is usable.
  pub fn wants_scopes(&self) -> bool {
    !self.scopes.is_empty()
  }
}

/// A usable Discord RPC session.
pub struct RpcClient {
  ipc: RpcIpc,
  pid: u32,
  access_token: Option<String>,
}

impl RpcClient {
  /// Connect, handshake, and authenticate when scopes are requested.
  pub async fn connect(paths: &[PathBuf], identity: &SessionIdentity) -> Result<Self, RpcError> {
    Self::connect_with(paths, identity, &DiscordOAuth).await
  }

  /// Like [`RpcClient::connect`], with an explicit code exchange.
  pub async fn connect_with(
    paths: &[PathBuf],
    identity: &SessionIdentity,
    exchange: &dyn CodeExchange,
  ) -> Result<Self, RpcError> {
    let ipc = RpcIpc::connect(paths, &identity.client_id).await?;
    let mut client = Self {
      ipc,
      pid: std::process::id(),
      access_token: None,
    };

    if identity.wants_scopes() {
      let token = match identity.access_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => token.to_string(),
        None => client.authorize_and_exchange(identity, exchange).await?,
      };
      client.authenticate(&token).await?;
      client.access_token = Some(token);
    }

    Ok(client)
  }

  async fn authorize_and_exchange(
    &self,
    identity: &SessionIdentity,
    exchange: &dyn CodeExchange,
  ) -> Result<String, RpcError> {
    let secret = identity
      .client_secret
      .as_deref()
      .filter(|s| !s.is_empty())
      .ok_or_else(|| RpcError::AuthFailed("client secret required for authorization".into()))?;

    log::info!("Requesting Discord authorization for scopes {:?}", identity.scopes);
    let code = self.authorize(&identity.client_id, &identity.scopes).await?;
    exchange
      .exchange(
        &identity.client_id,
        secret,
        &code,
        identity.redirect_uri.as_deref(),
      )
      .await
  }

  /// Ask the user to authorize the application. Returns the OAuth2 code.
  pub async fn authorize(&self, client_id: &str, scopes: &[String]) -> Result<String, RpcError> {
    let reply = self
      .ipc
      .send_command_with_timeout(RpcCommand::authorize(client_id, scopes), AUTHORIZE_TIMEOUT)
      .await?;

    reply
      .data
      .as_ref()
      .and_then(|d| d.get("code"))
      .and_then(|c| c.as_str())
      .map(str::to_string)
      .ok_or_else(|| RpcError::AuthFailed("authorization reply carried no code".into()))
  }

  /// Authenticate the session with an access token.
  pub async fn authenticate(&self, access_token: &str) -> Result<(), RpcError> {
    self
      .ipc
      .send_command(RpcCommand::authenticate(access_token))
      .await?;
    log::info!("Discord session authenticated");
    Ok(())
  }

  /// Display an activity.
  pub async fn set_activity(&self, activity: &Activity) -> Result<(), RpcError> {
    self
      .ipc
      .send_command(RpcCommand::set_activity(self.pid, Some(activity)))
      .await?;
    Ok(())
  }

  /// Remove the displayed activity.
  pub async fn clear_activity(&self) -> Result<(), RpcError> {
    self
      .ipc
      .send_command(RpcCommand::set_activity(self.pid, None))
      .await?;
    Ok(())
  }

  /// Token that fires when the transport closes.
  pub fn closed(&self) -> CancellationToken {
    self.ipc.closed()
  }

  /// Access token obtained (or reused) during login.
  pub fn access_token(&self) -> Option<&str> {
    self.access_token.as_deref()
  }

  /// Close the session.
  pub fn close(&self) {
    self.ipc.close();
  }
}
