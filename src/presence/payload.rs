//! Activity payload construction.

use reqwest::Url;

use super::state::{NowPlaying, PlayerStatus, MISSING_COVER};
use crate::config::AppConfig;
use crate::discord::{Activity, Assets, Button, Timestamps};

/// Discord rejects text fields shorter than this.
const MIN_TEXT_LEN: usize = 2;
const MAX_TEXT_LEN: usize = 128;
const MAX_BUTTON_LABEL_LEN: usize = 32;

/// `endTimestamp` sent instead of a start time when not playing.
const END_MARKER: i64 = 1;

/// Payload options derived from configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadOptions {
  /// Last.fm nickname for the profile button; `None` hides the button.
  pub profile_nickname: Option<String>,
  pub search_button: bool,
  pub placeholder_cover: bool,
}

impl PayloadOptions {
  pub fn from_config(config: &AppConfig) -> Self {
    Self {
      profile_nickname: config
        .profile_button
        .then(|| config.lastfm_nickname.clone()),
      search_button: config.search_song_button,
      placeholder_cover: config.placeholder_cover_enabled,
    }
  }
}

/// Build the activity for the current track.
pub fn build_activity(np: &NowPlaying, options: &PayloadOptions) -> Activity {
  let title = display_text(&np.title);
  let artist = display_text(&np.artist);
  let album = display_text(&np.album);

  let large_image = if np.art_url == MISSING_COVER && !options.placeholder_cover {
    None
  } else {
    Some(np.art_url.clone())
  };

  let timestamps = if np.status == PlayerStatus::Playing {
    Timestamps {
      start: Some(np.start_timestamp_ms()),
      end: None,
    }
  } else {
    Timestamps {
      start: None,
      end: Some(END_MARKER),
    }
  };

  let mut buttons = Vec::new();
  if let Some(nickname) = &options.profile_nickname {
    if let Some(url) = profile_url(nickname) {
      buttons.push(button("Last.fm profile", url));
    }
  }
  if options.search_button {
    if let Some(url) = search_url(&np.artist, &np.title) {
      buttons.push(button("Search song", url));
    }
  }

  Activity {
    details: Some(title),
    state: Some(display_text(&format!("by {}", artist))),
    timestamps: Some(timestamps),
    assets: Some(Assets {
      large_image,
      large_text: Some(display_text(&format!("album: {}", album))),
      small_image: Some(np.status.icon_key().to_string()),
      small_text: Some(np.status.to_string()),
    }),
    instance: false,
    buttons,
  }
}

/// Pad to the service minimum and cut at its maximum (in characters).
pub fn display_text(text: &str) -> String {
  let mut out: String = text.chars().take(MAX_TEXT_LEN).collect();
  while out.chars().count() < MIN_TEXT_LEN {
    out.push(' ');
  }
  out
}

fn button(label: &str, url: Url) -> Button {
  Button {
    label: label.chars().take(MAX_BUTTON_LABEL_LEN).collect(),
    url: url.to_string(),
  }
}

fn profile_url(nickname: &str) -> Option<Url> {
  let mut url = Url::parse("https://www.last.fm/user/").ok()?;
  url.path_segments_mut().ok()?.pop_if_empty().push(nickname);
  Some(url)
}

fn search_url(artist: &str, title: &str) -> Option<Url> {
  let query = format!("{} {}", artist, title);
  Url::parse_with_params("https://www.last.fm/search/tracks", &[("q", query.as_str())]).ok()
}
