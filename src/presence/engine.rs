//! Presence sync engine - turns player telemetry into change-gated activity updates.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::payload::{build_activity, PayloadOptions};
use super::state::{NowPlaying, PlayerStatus, MISSING_COVER, UNKNOWN_ALBUM};
use crate::art::ArtResolver;
use crate::config::AppConfig;
use crate::discord::Activity;
use crate::player::{MediaPlayer, Metadata};

/// Where activity updates go.
#[async_trait]
pub trait PresenceSink: Send + Sync {
  fn is_connected(&self) -> bool;
  async fn publish(&self, activity: &Activity);
  async fn clear(&self);
}

#[async_trait]
impl<T: PresenceSink + ?Sized> PresenceSink for Arc<T> {
  fn is_connected(&self) -> bool {
    (**self).is_connected()
  }

  async fn publish(&self, activity: &Activity) {
    (**self).publish(activity).await
  }

  async fn clear(&self) {
    (**self).clear().await
  }
}

/// Engine settings derived from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
  /// Tick period; also the amount of time one tick adds to the position clock.
  pub refresh: Duration,
  pub payload: PayloadOptions,
}

impl SyncOptions {
  pub fn from_config(config: &AppConfig) -> Self {
    Self {
      refresh: Duration::from_secs(config.refresh_rate_seconds),
      payload: PayloadOptions::from_config(config),
    }
  }
}

/// What a tick ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  /// No player answered.
  PlayerAbsent,
  /// Title or artist missing; presence stays cleared.
  MetadataIncomplete,
  /// Nothing changed; only the position clock advanced.
  Unchanged,
  /// A change was detected but Discord is not connected.
  Offline,
  /// A fresh activity was sent.
  Published,
}

/// Polls the player and mirrors it onto the presence sink.
///
/// `tick_at` takes `&mut self`, so ticks are serialized by construction.
pub struct PresenceEngine<P, A, S> {
  player: P,
  art: A,
  sink: S,
  options: SyncOptions,
  now_playing: NowPlaying,
  player_absent: bool,
  metadata_incomplete: bool,
  /// Set whenever the displayed presence may no longer match `now_playing`.
  resync_pending: bool,
}

impl<P, A, S> PresenceEngine<P, A, S>
where
  P: MediaPlayer,
  A: ArtResolver,
  S: PresenceSink,
{
  pub fn new(player: P, art: A, sink: S, options: SyncOptions) -> Self {
    Self {
      player,
      art,
      sink,
      options,
      now_playing: NowPlaying::new(UNIX_EPOCH),
      player_absent: false,
      metadata_incomplete: false,
      resync_pending: true,
    }
  }

  pub fn now_playing(&self) -> &NowPlaying {
    &self.now_playing
  }

  pub fn refresh_period(&self) -> Duration {
    self.options.refresh
  }

  /// Run one tick against the wall clock.
  pub async fn tick(&mut self, forced: bool) -> TickOutcome {
    self.tick_at(SystemTime::now(), forced).await
  }

  /// Run one tick as if the current time were `now`.
  ///
  /// `forced` bypasses change gating (used after a reconnect). A forced tick
  /// is extra to the periodic cadence and leaves the position clock alone.
  pub async fn tick_at(&mut self, now: SystemTime, forced: bool) -> TickOutcome {
    let refresh = self.options.refresh;

    let token = match self.player.status().await {
      Ok(token) => token,
      Err(e) => {
        if !self.player_absent {
          log::info!("No active player ({}), clearing presence", e);
          self.player_absent = true;
          self.resync_pending = true;
          self.sink.clear().await;
        }
        return TickOutcome::PlayerAbsent;
      }
    };
    if self.player_absent {
      log::info!("Player is back");
      self.player_absent = false;
    }

    let status = PlayerStatus::from_token(&token);

    let metadata = match self.player.metadata().await {
      Ok(metadata) => metadata,
      Err(e) => {
        log::debug!("Failed to fetch metadata: {}", e);
        Metadata::default()
      }
    };

    if metadata.title().is_empty() || metadata.artist().is_empty() {
      if !self.metadata_incomplete {
        log::warn!("Missing track title or artist, presence disabled for this track");
        self.metadata_incomplete = true;
        self.resync_pending = true;
        self.sink.clear().await;
      }
      return TickOutcome::MetadataIncomplete;
    }
    if self.metadata_incomplete {
      log::info!("Track metadata complete again");
      self.metadata_incomplete = false;
    }

    let title = metadata.title();
    let artist = metadata.artist();
    let album = match metadata.album() {
      "" => UNKNOWN_ALBUM,
      album => album,
    };

    let np = &mut self.now_playing;
    let metadata_changed = title != np.title || artist != np.artist || album != np.album;
    let status_changed = status != np.status;

    // Players rarely signal a seamless repeat, so infer it from the clock
    let mut track_repeated = false;
    if let Some(length) = metadata.length() {
      if !metadata_changed && np.accumulated + refresh >= length {
        log::info!("Track repeated");
        np.accumulated = Duration::ZERO;
        np.reference_start = now;
        track_repeated = true;
      }
    }

    if status_changed {
      log::info!("Player status: {}", status);
      if !metadata_changed {
        match status {
          PlayerStatus::Playing => {
            np.reference_start = now.checked_sub(np.accumulated).unwrap_or(UNIX_EPOCH);
          }
          PlayerStatus::Paused => np.accumulated += refresh,
          PlayerStatus::Other => {}
        }
      }
      np.status = status;
    }

    let changed = metadata_changed || status_changed || track_repeated;

    // The clock runs whether or not anything gets published. Forced ticks fall
    // between periodic ones and must not add a period.
    if !changed && !forced && np.status == PlayerStatus::Playing {
      np.accumulated += refresh;
    }

    if !changed && !forced && !self.resync_pending {
      return TickOutcome::Unchanged;
    }

    if metadata_changed {
      log::info!("{} - {} - {}", title, album, artist);

      if album != np.album || artist != np.artist {
        np.art_url = if album == UNKNOWN_ALBUM {
          MISSING_COVER.to_string()
        } else {
          resolve_cover(&self.art, artist, album).await
        };
      }

      let np = &mut self.now_playing;
      np.title = title.to_string();
      np.artist = artist.to_string();
      np.album = album.to_string();
      np.reference_start = now;
      np.accumulated = Duration::ZERO;
    }

    if !self.sink.is_connected() {
      log::debug!("Discord not connected, presence update deferred");
      return TickOutcome::Offline;
    }

    let activity = build_activity(&self.now_playing, &self.options.payload);
    self.sink.publish(&activity).await;
    self.resync_pending = false;
    log::info!("Updated rich presence");
    TickOutcome::Published
  }
}

/// Cache first, then the network; anything unresolved becomes the missing-cover key.
async fn resolve_cover<A: ArtResolver>(art: &A, artist: &str, album: &str) -> String {
  if let Some(url) = art.lookup_cached(artist, album) {
    log::debug!(" - album cover found in cache");
    return url;
  }

  match art.resolve(artist, album).await {
    Some(url) if !url.is_empty() => {
      art.store(artist, album, &url);
      url
    }
    _ => MISSING_COVER.to_string(),
  }
}
