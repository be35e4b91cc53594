//! Cover art resolution: persistent cache in front of Last.fm.

mod cache;
mod lastfm;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use cache::ArtCache;
pub use lastfm::LastFm;

#[derive(Debug, Error)]
pub enum ArtError {
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("JSON serialization error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Last.fm error {code}: {message}")]
  Api { code: i64, message: String },
}

/// Resolves an (artist, album) pair to a cover URL.
///
/// Failures never surface: an unresolvable cover is `None`.
#[async_trait]
pub trait ArtResolver: Send + Sync {
  /// Cached URL, without touching the network.
  fn lookup_cached(&self, artist: &str, album: &str) -> Option<String>;

  /// Look the cover up remotely.
  async fn resolve(&self, artist: &str, album: &str) -> Option<String>;

  /// Remember a resolved URL.
  fn store(&self, artist: &str, album: &str, url: &str);
}

#[async_trait]
impl<T: ArtResolver + ?Sized> ArtResolver for Arc<T> {
  fn lookup_cached(&self, artist: &str, album: &str) -> Option<String> {
    (**self).lookup_cached(artist, album)
  }

  async fn resolve(&self, artist: &str, album: &str) -> Option<String> {
    (**self).resolve(artist, album).await
  }

  fn store(&self, artist: &str, album: &str, url: &str) {
    (**self).store(artist, album, url)
  }
}

/// Cache + Last.fm. Either side may be absent (cache disabled, no API key).
pub struct CoverArt {
  cache: Option<ArtCache>,
  lastfm: Option<LastFm>,
}

impl CoverArt {
  pub fn new(cache: Option<ArtCache>, lastfm: Option<LastFm>) -> Self {
    Self { cache, lastfm }
  }
}

#[async_trait]
impl ArtResolver for CoverArt {
  fn lookup_cached(&self, artist: &str, album: &str) -> Option<String> {
    self.cache.as_ref()?.get(artist, album)
  }

  async fn resolve(&self, artist: &str, album: &str) -> Option<String> {
    let lastfm = self.lastfm.as_ref()?;
    match lastfm.album_cover(artist, album).await {
      Ok(Some(url)) => {
        log::info!(" - fetched album cover from Last.fm");
        Some(url)
      }
      Ok(None) => {
        log::info!(" - no image for given album");
        None
      }
      Err(e) => {
        log::warn!("Last.fm lookup for {} - {} failed: {}", artist, album, e);
        None
      }
    }
  }

  fn store(&self, artist: &str, album: &str, url: &str) {
    if let Some(cache) = &self.cache {
      if let Err(e) = cache.insert(artist, album, url) {
        log::warn!("Failed to persist cover cache: {}", e);
      }
    }
  }
}
