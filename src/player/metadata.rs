//! Track metadata reported by the player.

use std::collections::HashMap;
use std::time::Duration;

/// Key/value metadata with namespaces stripped (`xesam:title` -> `title`).
///
/// Absent keys read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
  fields: HashMap<String, String>,
}

impl Metadata {
  /// Parse `playerctl metadata` output.
  ///
  /// Each line is `<player> <namespace>:<key> <value>`. Keys repeated on
  /// several lines (multi-artist tracks) are joined with ", ".
  pub fn parse(output: &str) -> Self {
    let mut fields: HashMap<String, String> = HashMap::new();

    for line in output.lines() {
      let mut parts = line.trim().splitn(3, char::is_whitespace);
      let (Some(_player), Some(qualified)) = (parts.next(), parts.next()) else {
        continue;
      };
      let Some((_, key)) = qualified.split_once(':') else {
        continue;
      };
      let value = parts.next().unwrap_or("").trim();
      if key.is_empty() || value.is_empty() {
        continue;
      }

      fields
        .entry(key.to_string())
        .and_modify(|existing| {
          existing.push_str(", ");
          existing.push_str(value);
        })
        .or_insert_with(|| value.to_string());
    }

    Self { fields }
  }

  /// Set a field, replacing any previous value.
  pub fn with(mut self, key: &str, value: &str) -> Self {
    self.fields.insert(key.to_string(), value.to_string());
    self
  }

  pub fn get(&self, key: &str) -> &str {
    self.fields.get(key).map(String::as_str).unwrap_or("")
  }

  pub fn title(&self) -> &str {
    self.get("title").trim()
  }

  pub fn artist(&self) -> &str {
    self.get("artist").trim()
  }

  pub fn album(&self) -> &str {
    self.get("album").trim()
  }

  /// Track length. MPRIS reports it in microseconds.
  pub fn length(&self) -> Option<Duration> {
    self
      .get("length")
      .trim()
      .parse::<u64>()
      .ok()
      .filter(|us| *us > 0)
      .map(Duration::from_micros)
  }
}
