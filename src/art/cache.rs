//! On-disk cover URL cache, keyed by artist then album.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::ArtError;

const CACHE_FILE: &str = "covers.json";

type Entries = HashMap<String, HashMap<String, String>>;

/// Cover URL cache persisted as `{ "<artist>": { "<album>": "<url>" } }`.
pub struct ArtCache {
  path: Option<PathBuf>,
  entries: RwLock<Entries>,
}

impl ArtCache {
  /// Default cache location under the user cache directory.
  pub fn default_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join(crate::APP_DIR).join(CACHE_FILE))
  }

  /// Load the cache from disk. Missing or corrupt files start empty.
  pub fn load(path: PathBuf) -> Self {
    let entries = match std::fs::read_to_string(&path) {
      Ok(text) => match serde_json::from_str::<Entries>(&text) {
        Ok(entries) => {
          let count: usize = entries.values().map(HashMap::len).sum();
          log::info!("Loaded {} cached covers from {}", count, path.display());
          entries
        }
        Err(e) => {
          log::warn!("Ignoring unreadable cover cache {}: {}", path.display(), e);
          Entries::new()
        }
      },
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
      Err(e) => {
        log::warn!("Failed to read cover cache {}: {}", path.display(), e);
        Entries::new()
      }
    };

    Self {
      path: Some(path),
      entries: RwLock::new(entries),
    }
  }

  /// Cache that never touches disk.
  pub fn in_memory() -> Self {
    Self {
      path: None,
      entries: RwLock::new(Entries::new()),
    }
  }

  pub fn get(&self, artist: &str, album: &str) -> Option<String> {
    self
      .entries
      .read()
      .get(artist)
      .and_then(|albums| albums.get(album))
      .filter(|url| !url.is_empty())
      .cloned()
  }

  /// Insert an entry and write the cache back to disk.
  pub fn insert(&self, artist: &str, album: &str, url: &str) -> Result<(), ArtError> {
    let snapshot = {
      let mut entries = self.entries.write();
      entries
        .entry(artist.to_string())
        .or_default()
        .insert(album.to_string(), url.to_string());
      serde_json::to_string_pretty(&*entries)?
    };

    match &self.path {
      Some(path) => write_atomically(path, &snapshot),
      None => Ok(()),
    }
  }
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), ArtError> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let tmp = path.with_extension("json.tmp");
  std::fs::write(&tmp, contents)?;
  std::fs::rename(&tmp, path)?;
  Ok(())
}
