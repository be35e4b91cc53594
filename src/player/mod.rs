//! Media player adapter - read-only view of the local player.
//!
//! - `metadata.rs` - Track metadata mapping and its parser
//! - `playerctl.rs` - `playerctl` binary detection and invocation

mod metadata;
mod playerctl;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use metadata::Metadata;
pub use playerctl::Playerctl;

#[derive(Error, Debug)]
pub enum PlayerError {
  #[error("Failed to run playerctl: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("No active player: {0}")]
  NoPlayer(String),
  #[error("playerctl timed out")]
  Timeout,
}

/// Source of playback telemetry.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
  /// Raw status token (`Playing`, `Paused`, `Stopped`, ...).
  /// An error means there is no active player.
  async fn status(&self) -> Result<String, PlayerError>;

  /// Current track metadata.
  async fn metadata(&self) -> Result<Metadata, PlayerError>;
}

#[async_trait]
impl<T: MediaPlayer + ?Sized> MediaPlayer for Arc<T> {
  async fn status(&self) -> Result<String, PlayerError> {
    (**self).status().await
  }

  async fn metadata(&self) -> Result<Metadata, PlayerError> {
    (**self).metadata().await
  }
}
