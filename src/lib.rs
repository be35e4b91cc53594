use std::future::Future;
use std::sync::Arc;

pub mod art;
pub mod config;
pub mod discord;
pub mod player;
pub mod presence;

pub use art::{ArtCache, ArtResolver, CoverArt, LastFm};
pub use config::{AppConfig, ConfigWarning};
pub use discord::{ConnectionEvent, ConnectionManager, ConnectionState, SessionIdentity};
pub use player::{MediaPlayer, Metadata, Playerctl};
pub use presence::{run_sync_loop, NowPlaying, PresenceEngine, PresenceSink, SyncOptions};

use tokio_util::sync::CancellationToken;

/// Directory name used under the user config and cache directories.
pub const APP_DIR: &str = "playerctl-presence";

pub async fn run() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  // Load config from disk; every invalid field has already fallen back to its default
  let config = match AppConfig::default_path() {
    Some(path) => {
      let (config, warnings) = AppConfig::load_or_init(&path);
      for warning in &warnings {
        log::warn!("{}", warning);
      }
      config
    }
    None => {
      log::warn!("No config directory available, using defaults");
      AppConfig::default()
    }
  };

  if config.discord_client_id.is_empty() {
    log::error!("discordClientId is not set; Discord will reject every handshake until it is");
  }

  let connection = Arc::new(ConnectionManager::new(config.session_identity()));
  let engine = PresenceEngine::new(
    Playerctl::new(config.player.clone()),
    cover_art(&config),
    connection.clone(),
    SyncOptions::from_config(&config),
  );

  // Subscribe before the retry loop starts so the first `Connected` is seen
  let events = connection.subscribe();
  let starter = connection.clone();
  tokio::spawn(async move { starter.start().await });

  let shutdown = CancellationToken::new();
  tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));

  run_sync_loop(engine, events, shutdown).await;

  connection.clear().await;
  connection.stop().await;
}

fn cover_art(config: &AppConfig) -> CoverArt {
  let cache = if config.cache_disabled {
    None
  } else {
    ArtCache::default_path().map(ArtCache::load)
  };

  let lastfm = if config.lastfm_api_key.is_empty() {
    log::warn!("lastfmApiKey is not set; album covers will not be fetched");
    None
  } else {
    match LastFm::new(config.lastfm_api_key.clone()) {
      Ok(client) => Some(client),
      Err(e) => {
        log::error!("Failed to create Last.fm client: {}", e);
        None
      }
    }
  };

  CoverArt::new(cache, lastfm)
}

/// Cancel `shutdown` once `signal` fires. A listener that fails to install
/// leaves the token alone, so the daemon keeps running.
async fn cancel_on_signal<F>(signal: F, shutdown: CancellationToken)
where
  F: Future<Output = std::io::Result<()>>,
{
  match signal.await {
    Ok(()) => {
      log::info!("Shutting down");
      shutdown.cancel();
    }
    Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
  }
}
