//! OAuth2 code exchange for scoped RPC sessions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::error::RpcError;

const TOKEN_URL: &str = "https://discord.com/api/oauth2/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
}

/// Turns an `AUTHORIZE` code into an access token.
#[async_trait]
pub trait CodeExchange: Send + Sync {
  async fn exchange(
    &self,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: Option<&str>,
  ) -> Result<String, RpcError>;
}

/// Exchange against Discord's OAuth2 token endpoint.
pub struct DiscordOAuth;

#[async_trait]
impl CodeExchange for DiscordOAuth {
  async fn exchange(
    &self,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: Option<&str>,
  ) -> Result<String, RpcError> {
    exchange_code(client_id, client_secret, code, redirect_uri).await
  }
}

/// Exchange an `AUTHORIZE` code for an access token.
pub async fn exchange_code(
  client_id: &str,
  client_secret: &str,
  code: &str,
  redirect_uri: Option<&str>,
) -> Result<String, RpcError> {
  let http = Client::builder().timeout(Duration::from_secs(10)).build()?;

  let mut form = vec![
    ("client_id", client_id),
    ("client_secret", client_secret),
    ("grant_type", "authorization_code"),
    ("code", code),
  ];
  if let Some(uri) = redirect_uri {
    form.push(("redirect_uri", uri));
  }

  let response = http.post(TOKEN_URL).form(&form).send().await?;

  if !response.status().is_success() {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    return Err(RpcError::AuthFailed(format!("HTTP {}: {}", status, text)));
  }

  let token: TokenResponse = response.json().await?;
  Ok(token.access_token)
}
