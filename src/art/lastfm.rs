//! Last.fm album cover lookup.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::Deserialize;

use super::ArtError;

const API_URL: &str = "https://ws.audioscrobbler.com/2.0/";
const PREFERRED_SIZE: &str = "extralarge";

/// `album.getinfo` response. Errors come back as `{error, message}` with HTTP 200.
#[derive(Debug, Deserialize)]
struct AlbumInfoResponse {
  #[serde(default)]
  album: Option<AlbumInfo>,
  #[serde(default)]
  error: Option<i64>,
  #[serde(default)]
  message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlbumInfo {
  #[serde(default)]
  image: Vec<AlbumImage>,
}

#[derive(Debug, Deserialize)]
struct AlbumImage {
  #[serde(rename = "#text", default)]
  url: String,
  #[serde(default)]
  size: String,
}

/// Last.fm HTTP API client.
pub struct LastFm {
  http: Client,
  api_key: String,
}

impl LastFm {
  /// Create a client. Requests time out after 10 seconds.
  pub fn new(api_key: impl Into<String>) -> Result<Self, ArtError> {
    Ok(Self {
      http: Client::builder().timeout(Duration::from_secs(10)).build()?,
      api_key: api_key.into(),
    })
  }

  /// Cover URL for an album, `None` when Last.fm has no image.
  pub async fn album_cover(&self, artist: &str, album: &str) -> Result<Option<String>, ArtError> {
    let url = Url::parse_with_params(
      API_URL,
      &[
        ("method", "album.getinfo"),
        ("api_key", self.api_key.as_str()),
        ("artist", artist),
        ("album", album),
        ("autocorrect", "0"),
        ("format", "json"),
      ],
    )
    .map_err(|e| ArtError::Api {
      code: 0,
      message: e.to_string(),
    })?;

    let text = self.http.get(url).send().await?.text().await?;
    parse_album_cover(&text)
  }
}

/// Extract the cover URL from an `album.getinfo` body.
fn parse_album_cover(body: &str) -> Result<Option<String>, ArtError> {
  let response: AlbumInfoResponse = serde_json::from_str(body)?;

  if let Some(code) = response.error {
    // 6: album not found. Not an error from our point of view.
    if code == 6 {
      return Ok(None);
    }
    return Err(ArtError::Api {
      code,
      message: response.message.unwrap_or_default(),
    });
  }

  Ok(response.album.and_then(|album| pick_cover(&album.image)))
}

/// Prefer the `extralarge` image, else the last (largest) non-empty one.
fn pick_cover(images: &[AlbumImage]) -> Option<String> {
  images
    .iter()
    .find(|img| img.size == PREFERRED_SIZE && !img.url.is_empty())
    .or_else(|| images.iter().rev().find(|img| !img.url.is_empty()))
    .map(|img| img.url.clone())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_picks_extralarge() {
    let body = r##"{"album":{"name":"Discovery","image":[
      {"#text":"https://img/s.png","size":"small"},
      {"#text":"https://img/m.png","size":"medium"},
      {"#text":"https://img/l.png","size":"large"},
      {"#text":"https://img/xl.png","size":"extralarge"},
      {"#text":"https://img/mega.png","size":"mega"}
    ]}}"##;
    assert_eq!(
      parse_album_cover(body).unwrap().as_deref(),
      Some("https://img/xl.png")
    );
  }

  #[test]
  fn test_falls_back_to_largest_available() {
    let body = r##"{"album":{"image":[
      {"#text":"https://img/s.png","size":"small"},
      {"#text":"https://img/l.png","size":"large"},
      {"#text":"","size":"extralarge"}
    ]}}"##;
    assert_eq!(
      parse_album_cover(body).unwrap().as_deref(),
      Some("https://img/l.png")
    );
  }

  #[test]
  fn test_no_images() {
    let body = r##"{"album":{"image":[{"#text":"","size":"small"}]}}"##;
    assert_eq!(parse_album_cover(body).unwrap(), None);
    assert_eq!(parse_album_cover(r#"{"album":{}}"#).unwrap(), None);
  }

  #[test]
  fn test_album_not_found_is_empty() {
    let body = r#"{"error":6,"message":"Album not found"}"#;
    assert_eq!(parse_album_cover(body).unwrap(), None);
  }

  #[test]
  fn test_api_error() {
    let body = r#"{"error":10,"message":"Invalid API key"}"#;
    match parse_album_cover(body) {
      Err(ArtError::Api { code, message }) => {
        assert_eq!(code, 10);
        assert_eq!(message, "Invalid API key");
      }
      other => panic!("Expected API error, got {:?}", other),
    }
  }
}
