//! # Configuration Module
//!
//! Data directory layout and Discogs API settings.
//!
//! Platter stores its database in the platform-standard data directory:
//! - Linux: `~/.local/share/platter/`
//! - macOS: `~/Library/Application Support/platter/`
//! - Windows: `%APPDATA%\platter\`
//!
//! Discogs credentials come from the environment: `DISCOGS_TOKEN` (a
//! personal access token) and `DISCOGS_USERNAME` (whose collection to
//! sync).

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::discogs::DiscogsClient;

/// User agent sent to the Discogs API, as their terms ask for.
pub const USER_AGENT: &str = "Platter/0.3 +https://github.com/mprdolo/platter";

/// Returns the Platter data directory, creating it if needed.
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context(
        "Could not determine system data directory. Please ensure your platform supports standard data directories."
    )?;
    let dir = base.join("platter");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory at {}", dir.display()))?;
    Ok(dir)
}

/// Returns the database file path inside the data directory.
pub fn db_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("collection.db"))
}

/// Default location of the Big Board CSV when none is given on the command
/// line.
pub fn board_csv_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("big_board.csv"))
}

/// Discogs credentials as read from the environment.
#[derive(Debug, Clone, Default)]
pub struct DiscogsSettings {
    pub token: Option<String>,
    pub username: Option<String>,
}

impl DiscogsSettings {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            token: env::var("DISCOGS_TOKEN").ok().filter(|t| !t.is_empty()),
            username: env::var("DISCOGS_USERNAME").ok().filter(|u| !u.is_empty()),
        }
    }

    /// Build an authenticated client, failing with a pointed message when a
    /// credential is missing.
    pub fn client(&self) -> Result<DiscogsClient> {
        let token = self
            .token
            .as_deref()
            .context("DISCOGS_TOKEN is not set. Export it before syncing.")?;
        let username = self
            .username
            .as_deref()
            .context("DISCOGS_USERNAME is not set. Export it before syncing.")?;
        Ok(DiscogsClient::new(token, username, USER_AGENT))
    }
}
