//! Now-playing state owned by the sync engine.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const UNKNOWN_TITLE: &str = "unknown title";
pub const UNKNOWN_ARTIST: &str = "unknown artist";
pub const UNKNOWN_ALBUM: &str = "unknown album";

/// Image key used when no cover could be resolved.
pub const MISSING_COVER: &str = "missing-cover";

/// Normalized playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
  Playing,
  Paused,
  Other,
}

impl PlayerStatus {
  /// Normalize a raw player token (`"Playing\n"` -> `Playing`).
  pub fn from_token(token: &str) -> Self {
    match token.trim().to_lowercase().as_str() {
      "playing" => PlayerStatus::Playing,
      "paused" => PlayerStatus::Paused,
      _ => PlayerStatus::Other,
    }
  }

  /// Small image asset key for this status.
  pub fn icon_key(self) -> &'static str {
    match self {
      PlayerStatus::Playing => "playing",
      PlayerStatus::Paused => "paused",
      PlayerStatus::Other => "stopped",
    }
  }
}

impl fmt::Display for PlayerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.icon_key())
  }
}

/// What the engine last observed and published.
///
/// While `Playing`, the displayed position is `now - reference_start`;
/// otherwise `accumulated` holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
  pub title: String,
  pub artist: String,
  pub album: String,
  pub status: PlayerStatus,
  pub art_url: String,
  pub reference_start: SystemTime,
  pub accumulated: Duration,
}

impl NowPlaying {
  pub fn new(now: SystemTime) -> Self {
    Self {
      title: UNKNOWN_TITLE.to_string(),
      artist: UNKNOWN_ARTIST.to_string(),
      album: UNKNOWN_ALBUM.to_string(),
      status: PlayerStatus::Other,
      art_url: MISSING_COVER.to_string(),
      reference_start: now,
      accumulated: Duration::ZERO,
    }
  }

  /// Position to display at `now`.
  pub fn elapsed(&self, now: SystemTime) -> Duration {
    match self.status {
      PlayerStatus::Playing => now.duration_since(self.reference_start).unwrap_or_default(),
      _ => self.accumulated,
    }
  }

  /// `reference_start` in epoch milliseconds.
  pub fn start_timestamp_ms(&self) -> i64 {
    self
      .reference_start
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis() as i64)
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_normalization() {
    assert_eq!(PlayerStatus::from_token("Playing\n"), PlayerStatus::Playing);
    assert_eq!(PlayerStatus::from_token("  PAUSED "), PlayerStatus::Paused);
    assert_eq!(PlayerStatus::from_token("Stopped"), PlayerStatus::Other);
    assert_eq!(PlayerStatus::from_token(""), PlayerStatus::Other);
  }

  #[test]
  fn test_elapsed_depends_on_status() {
    let start = UNIX_EPOCH + Duration::from_secs(1_000);
    let mut np = NowPlaying::new(start);
    np.accumulated = Duration::from_secs(42);

    let now = start + Duration::from_secs(90);
    assert_eq!(np.elapsed(now), Duration::from_secs(42));

    np.status = PlayerStatus::Playing;
    assert_eq!(np.elapsed(now), Duration::from_secs(90));
    assert_eq!(np.start_timestamp_ms(), 1_000_000);
  }
}
