//! Presence synchronization.
//!
//! - `state.rs` - `NowPlaying` and status normalization
//! - `payload.rs` - Activity construction
//! - `engine.rs` - Per-tick diffing and timer bookkeeping

mod engine;
mod payload;
mod state;

pub use engine::{PresenceEngine, PresenceSink, SyncOptions, TickOutcome};
pub use payload::{build_activity, display_text, PayloadOptions};
pub use state::{
  NowPlaying, PlayerStatus, MISSING_COVER, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_TITLE,
};

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::art::ArtResolver;
use crate::discord::ConnectionEvent;
use crate::player::MediaPlayer;

/// Drive the engine on its fixed interval until `shutdown` fires.
///
/// Ticks run one at a time on this task. An interval that elapses while a
/// tick is still running is skipped, not queued. A `Connected` transition
/// triggers one forced tick so the fresh session gets a full payload.
pub async fn run_sync_loop<P, A, S>(
  mut engine: PresenceEngine<P, A, S>,
  mut events: broadcast::Receiver<ConnectionEvent>,
  shutdown: CancellationToken,
) where
  P: MediaPlayer,
  A: ArtResolver,
  S: PresenceSink,
{
  let mut interval = tokio::time::interval(engine.refresh_period());
  interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
  let mut events_open = true;

  log::info!(
    "Presence sync started, polling every {}s",
    engine.refresh_period().as_secs()
  );

  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      _ = interval.tick() => {
        engine.tick(false).await;
      }
      event = events.recv(), if events_open => match event {
        Ok(ConnectionEvent::Connected) => {
          log::info!("Discord connected, resyncing presence");
          engine.tick(true).await;
        }
        Ok(ConnectionEvent::Disconnected) => {
          log::debug!("Discord disconnected, presence updates paused");
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          log::warn!("Missed {} connection events, resyncing", skipped);
          engine.tick(true).await;
        }
        Err(broadcast::error::RecvError::Closed) => {
          events_open = false;
        }
      },
    }
  }

  log::info!("Presence sync stopped");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::discord::Activity;
  use crate::player::{Metadata, PlayerError};
  use async_trait::async_trait;
  use parking_lot::Mutex;
  use std::sync::Arc;
  use std::time::Duration;

  struct StaticPlayer;

  #[async_trait]
  impl MediaPlayer for StaticPlayer {
    async fn status(&self) -> Result<String, PlayerError> {
      Ok("Playing".into())
    }

    async fn metadata(&self) -> Result<Metadata, PlayerError> {
      Ok(
        Metadata::default()
          .with("title", "Song")
          .with("artist", "Artist")
          .with("album", "Album"),
      )
    }
  }

  struct NoArt;

  #[async_trait]
  impl ArtResolver for NoArt {
    fn lookup_cached(&self, _: &str, _: &str) -> Option<String> {
      None
    }

    async fn resolve(&self, _: &str, _: &str) -> Option<String> {
      None
    }

    fn store(&self, _: &str, _: &str, _: &str) {}
  }

  #[derive(Default)]
  struct CountingSink {
    published: Mutex<Vec<Activity>>,
  }

  #[async_trait]
  impl PresenceSink for CountingSink {
    fn is_connected(&self) -> bool {
      true
    }

    async fn publish(&self, activity: &Activity) {
      self.published.lock().push(activity.clone());
    }

    async fn clear(&self) {}
  }

  async fn wait_for_publishes(sink: &CountingSink, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
      while sink.published.lock().len() < count {
        tokio::time::sleep(Duration::from_millis(10)).await;
      }
    })
    .await
    .expect("publish count not reached");
  }

  #[tokio::test]
  async fn test_connected_event_forces_resync() {
    let sink = Arc::new(CountingSink::default());
    let options = SyncOptions {
      refresh: Duration::from_secs(60),
      payload: PayloadOptions::default(),
    };
    let engine = PresenceEngine::new(StaticPlayer, NoArt, sink.clone(), options);
    let (tx, rx) = broadcast::channel(4);
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(run_sync_loop(engine, rx, shutdown.clone()));

    // The interval's first tick fires immediately
    wait_for_publishes(&sink, 1).await;

    tx.send(ConnectionEvent::Disconnected).unwrap();
    tx.send(ConnectionEvent::Connected).unwrap();
    wait_for_publishes(&sink, 2).await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(sink.published.lock().len(), 2);
  }

  #[tokio::test]
  async fn test_closed_event_channel_keeps_polling() {
    let sink = Arc::new(CountingSink::default());
    let options = SyncOptions {
      refresh: Duration::from_secs(60),
      payload: PayloadOptions::default(),
    };
    let engine = PresenceEngine::new(StaticPlayer, NoArt, sink.clone(), options);
    let (tx, rx) = broadcast::channel(4);
    drop(tx);
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(run_sync_loop(engine, rx, shutdown.clone()));
    wait_for_publishes(&sink, 1).await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
      .await
      .unwrap()
      .unwrap();
  }
}
