//! Application configuration with persistence.
//!
//! Every field is validated on its own: an invalid value falls back to its
//! default and produces a [`ConfigWarning`], the rest of the file still applies.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::discord::SessionIdentity;

const CONFIG_FILE: &str = "config.json";

pub const MIN_REFRESH_RATE_SECONDS: u64 = 5;
pub const DEFAULT_REFRESH_RATE_SECONDS: u64 = 15;

/// Nickname shipped in the template file; treated as "not set".
pub const NICKNAME_PLACEHOLDER: &str = "your-lastfm-nickname";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

/// A field that was replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
  pub field: &'static str,
  pub message: String,
}

impl fmt::Display for ConfigWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "config: {}: {}", self.field, self.message)
  }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
  /// Player poll period in seconds (>= 5).
  pub refresh_rate_seconds: u64,

  /// Show a button linking to the Last.fm profile.
  pub profile_button: bool,

  pub lastfm_nickname: String,

  /// Show a button searching the current song.
  pub search_song_button: bool,

  /// Send the `missing-cover` image key when no cover is found.
  pub placeholder_cover_enabled: bool,

  /// Skip the on-disk cover cache.
  pub cache_disabled: bool,

  /// Discord application ID.
  pub discord_client_id: String,

  /// Last.fm API key for cover lookups. Empty disables lookups.
  pub lastfm_api_key: String,

  /// Restrict playerctl to one player (e.g. "spotify").
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub player: Option<String>,

  /// OAuth2 scopes; empty means no authentication step.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub scopes: Vec<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub access_token: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub client_secret: Option<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      refresh_rate_seconds: DEFAULT_REFRESH_RATE_SECONDS,
      profile_button: false,
      lastfm_nickname: NICKNAME_PLACEHOLDER.to_string(),
      search_song_button: true,
      placeholder_cover_enabled: true,
      cache_disabled: false,
      discord_client_id: String::new(),
      lastfm_api_key: String::new(),
      player: None,
      scopes: Vec::new(),
      access_token: None,
      client_secret: None,
    }
  }
}

impl AppConfig {
  /// Default config file location.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(crate::APP_DIR).join(CONFIG_FILE))
  }

  /// Build a config from loosely-typed JSON, validating each field on its own.
  pub fn from_value(value: &Value) -> (Self, Vec<ConfigWarning>) {
    let defaults = Self::default();
    let mut warnings = Vec::new();

    let empty = Map::new();
    let obj = match value.as_object() {
      Some(obj) => obj,
      None => {
        warnings.push(ConfigWarning {
          field: "<root>",
          message: "expected a JSON object, using defaults".into(),
        });
        &empty
      }
    };

    let mut fields = FieldReader {
      obj,
      warnings: &mut warnings,
    };

    let mut refresh_rate_seconds =
      fields.read("refreshRateSeconds", defaults.refresh_rate_seconds);
    if refresh_rate_seconds < MIN_REFRESH_RATE_SECONDS {
      fields.warn(
        "refreshRateSeconds",
        format!(
          "{} is below the minimum of {}, using {}",
          refresh_rate_seconds, MIN_REFRESH_RATE_SECONDS, DEFAULT_REFRESH_RATE_SECONDS
        ),
      );
      refresh_rate_seconds = DEFAULT_REFRESH_RATE_SECONDS;
    }

    let mut lastfm_nickname: String =
      fields.read("lastfmNickname", defaults.lastfm_nickname.clone());
    if lastfm_nickname.trim().is_empty() {
      fields.warn("lastfmNickname", "empty nickname, using default".into());
      lastfm_nickname = defaults.lastfm_nickname.clone();
    }
    let lastfm_nickname = lastfm_nickname.trim().to_string();

    let mut profile_button = fields.read("profileButton", defaults.profile_button);
    if profile_button && lastfm_nickname == NICKNAME_PLACEHOLDER {
      fields.warn(
        "profileButton",
        "no Last.fm nickname configured, profile button disabled".into(),
      );
      profile_button = false;
    }

    let config = Self {
      refresh_rate_seconds,
      profile_button,
      lastfm_nickname,
      search_song_button: fields.read("searchSongButton", defaults.search_song_button),
      placeholder_cover_enabled: fields
        .read("placeholderCoverEnabled", defaults.placeholder_cover_enabled),
      cache_disabled: fields.read("cacheDisabled", defaults.cache_disabled),
      discord_client_id: fields.read("discordClientId", defaults.discord_client_id),
      lastfm_api_key: fields.read("lastfmApiKey", defaults.lastfm_api_key),
      player: fields.read("player", defaults.player),
      scopes: fields.read("scopes", defaults.scopes),
      access_token: fields.read("accessToken", defaults.access_token),
      client_secret: fields.read("clientSecret", defaults.client_secret),
    };

    (config, warnings)
  }

  /// Load from a file.
  pub fn load(path: &Path) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    Ok(Self::from_value(&value))
  }

  /// Load from a file, falling back to defaults on any error.
  ///
  /// A missing file is created from the defaults so users have a template.
  pub fn load_or_init(path: &Path) -> (Self, Vec<ConfigWarning>) {
    match Self::load(path) {
      Ok(loaded) => loaded,
      Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
        let config = Self::default();
        match config.save(path) {
          Ok(()) => log::info!("Wrote default config to {}", path.display()),
          Err(e) => log::warn!("Failed to write default config: {}", e),
        }
        (config, Vec::new())
      }
      Err(e) => (
        Self::default(),
        vec![ConfigWarning {
          field: "<file>",
          message: format!("{} unreadable ({}), using defaults", path.display(), e),
        }],
      ),
    }
  }

  /// Save to a file.
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(self)?)?;
    Ok(())
  }

  /// Identity for the Discord session.
  pub fn session_identity(&self) -> SessionIdentity {
    SessionIdentity {
      client_id: self.discord_client_id.clone(),
      scopes: self.scopes.clone(),
      access_token: self.access_token.clone(),
      client_secret: self.client_secret.clone(),
      redirect_uri: None,
    }
  }
}

/// Reads typed fields out of a JSON object, recording malformed ones.
struct FieldReader<'a> {
  obj: &'a Map<String, Value>,
  warnings: &'a mut Vec<ConfigWarning>,
}

impl FieldReader<'_> {
  fn read<T: DeserializeOwned>(&mut self, field: &'static str, default: T) -> T {
    match self.obj.get(field) {
      None | Some(Value::Null) => default,
      Some(value) => match serde_json::from_value(value.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
          self.warn(field, format!("invalid value {} ({}), using default", value, e));
          default
        }
      },
    }
  }

  fn warn(&mut self, field: &'static str, message: String) {
    self.warnings.push(ConfigWarning { field, message });
  }
}
