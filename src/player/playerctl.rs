//! playerctl detection and invocation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{MediaPlayer, Metadata, PlayerError};

/// Upper bound on a single playerctl call.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Find the playerctl executable.
pub fn find_playerctl() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("playerctl") {
    return Some(path);
  }

  ["/usr/bin/playerctl", "/usr/local/bin/playerctl"]
    .into_iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

/// Media player adapter backed by the `playerctl` CLI.
pub struct Playerctl {
  binary: PathBuf,
  player: Option<String>,
}

impl Playerctl {
  /// Create an adapter, optionally restricted to one player name.
  pub fn new(player: Option<String>) -> Self {
    let binary = find_playerctl().unwrap_or_else(|| {
      log::warn!("playerctl not found in PATH; player queries will fail until it is installed");
      PathBuf::from("playerctl")
    });
    log::info!("Using playerctl at {:?}", binary);

    Self {
      binary,
      player: player.filter(|p| !p.trim().is_empty()),
    }
  }

  async fn run(&self, command: &str) -> Result<String, PlayerError> {
    let mut cmd = Command::new(&self.binary);
    if let Some(player) = &self.player {
      cmd.arg(format!("--player={}", player));
    }
    cmd
      .arg(command)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    let output = tokio::time::timeout(QUERY_TIMEOUT, cmd.output())
      .await
      .map_err(|_| PlayerError::Timeout)??;

    let stderr = String::from_utf8_lossy(&output.stderr);
    // playerctl reports "No players found" on stderr, sometimes with exit code 0
    if !output.status.success() || !stderr.trim().is_empty() {
      return Err(PlayerError::NoPlayer(stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}

#[async_trait]
impl MediaPlayer for Playerctl {
  async fn status(&self) -> Result<String, PlayerError> {
    self.run("status").await
  }

  async fn metadata(&self) -> Result<Metadata, PlayerError> {
    let output = self.run("metadata").await?;
    Ok(Metadata::parse(&output))
  }
}
