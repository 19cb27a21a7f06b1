//! # Database Module
//!
//! SQLite schema, migrations, and row-level operations for the album store.
//! All tables live in a single database file; connections are short-lived and
//! request-scoped: callers open one, do their work inside a transaction
//! where multiple rows are touched, and drop it.
//!
//! ## Tables
//!
//! - `albums`: the owned collection, keyed by Discogs release id. Albums are
//!   soft-deleted (`is_removed`) so listening history stays valid.
//! - `listens`: one row per selection event; flags are flipped later.
//! - `big_board_entries`: one row per rank in the external ranking.
//! - `sync_log`: append-only audit trail of sync runs.
//! - `settings`: key-value store for app configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// An owned album, as synced from the collection source and corrected by the
/// user. The Big Board rank is not stored here; it lives on
/// `big_board_entries` and joins in where a read path needs it.
#[derive(Debug, Clone)]
pub struct Album {
    pub id: i64,
    pub discogs_release_id: i64,
    pub discogs_master_id: Option<i64>,
    pub artist: String,
    pub title: String,
    pub release_year: Option<i32>,
    pub master_year: Option<i32>,
    pub cover_image_url: Option<String>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub format: Option<String>,
    pub is_excluded: bool,
    pub is_removed: bool,
    pub discogs_url: Option<String>,
    pub master_url: Option<String>,
    pub master_id_override: Option<i64>,
    pub master_year_override: Option<i32>,
}

/// A fresh album record produced by the collection source.
#[derive(Debug, Clone)]
pub struct NewAlbum {
    pub discogs_release_id: i64,
    pub discogs_master_id: Option<i64>,
    pub artist: String,
    pub title: String,
    pub release_year: Option<i32>,
    pub cover_image_url: Option<String>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub format: Option<String>,
    pub discogs_url: String,
    pub master_url: Option<String>,
}

/// One selection event. Both flags start false ("pending decision") and a
/// later user action sets exactly one of them.
#[derive(Debug, Clone)]
pub struct Listen {
    pub id: i64,
    pub album_id: i64,
    pub selected_at: String,
    pub did_listen: bool,
    pub skipped: bool,
}

/// The user's verdict on a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    Listened,
    Skipped,
}

/// One row of the external ranking, optionally associated with an owned
/// album (directly, or indirectly through a "via" album such as a
/// compilation that contains the ranked record).
#[derive(Debug, Clone)]
pub struct BoardEntry {
    pub id: i64,
    pub rank: u32,
    pub artist: String,
    pub title: String,
    pub year: Option<i32>,
    pub album_id: Option<i64>,
    pub via_album_id: Option<i64>,
}

const ALBUM_COLUMNS: &str = "id, discogs_release_id, discogs_master_id, artist, title, \
     release_year, master_year, cover_image_url, genres, styles, format, \
     is_excluded, is_removed, discogs_url, master_url, \
     master_id_override, master_year_override";

/// Open a connection with WAL and foreign keys enabled. Does not create the
/// schema; see [`open`].
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    conn.busy_timeout(Duration::from_secs(10))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Open a connection and ensure the schema exists and is migrated.
pub fn open(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }
    let conn = connect(db_path)?;
    init(&conn)?;
    Ok(conn)
}

/// Create all tables and indexes if they don't exist, then run migrations.
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS albums (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            discogs_release_id INTEGER UNIQUE NOT NULL,
            discogs_master_id INTEGER,
            artist TEXT NOT NULL,
            title TEXT NOT NULL,
            release_year INTEGER,
            master_year INTEGER,
            big_board_year INTEGER,
            cover_image_url TEXT,
            genres TEXT,
            styles TEXT,
            format TEXT,
            big_board_rank INTEGER,
            is_excluded INTEGER DEFAULT 0,
            is_removed INTEGER DEFAULT 0,
            discogs_url TEXT,
            master_url TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS listens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            album_id INTEGER NOT NULL,
            selected_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            did_listen INTEGER DEFAULT 0,
            skipped INTEGER DEFAULT 0,
            FOREIGN KEY (album_id) REFERENCES albums(id)
        );

        CREATE TABLE IF NOT EXISTS sync_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sync_type TEXT NOT NULL,
            synced_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            albums_added INTEGER DEFAULT 0,
            albums_updated INTEGER DEFAULT 0,
            albums_removed INTEGER DEFAULT 0,
            unmatched_entries TEXT,
            notes TEXT
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE IF NOT EXISTS big_board_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rank INTEGER NOT NULL,
            artist TEXT NOT NULL,
            title TEXT NOT NULL,
            year INTEGER,
            album_id INTEGER,
            FOREIGN KEY (album_id) REFERENCES albums(id)
        );

        CREATE INDEX IF NOT EXISTS idx_albums_discogs_release_id
            ON albums(discogs_release_id);
        CREATE INDEX IF NOT EXISTS idx_albums_discogs_master_id
            ON albums(discogs_master_id);
        CREATE INDEX IF NOT EXISTS idx_albums_is_excluded
            ON albums(is_excluded);
        CREATE INDEX IF NOT EXISTS idx_albums_is_removed
            ON albums(is_removed);
        CREATE INDEX IF NOT EXISTS idx_listens_album_id
            ON listens(album_id);
        CREATE INDEX IF NOT EXISTS idx_listens_selected_at
            ON listens(selected_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_big_board_rank
            ON big_board_entries(rank);
        CREATE INDEX IF NOT EXISTS idx_big_board_album_id
            ON big_board_entries(album_id);",
    )
    .context("failed to create database schema")?;

    migrate(conn)?;
    Ok(())
}

/// Probe-and-alter column migrations plus the one-time move of legacy Big
/// Board columns into `big_board_entries`.
fn migrate(conn: &Connection) -> Result<()> {
    let column_migrations = [
        (
            "albums",
            "master_id_override",
            "ALTER TABLE albums ADD COLUMN master_id_override INTEGER",
        ),
        (
            "albums",
            "master_year_override",
            "ALTER TABLE albums ADD COLUMN master_year_override INTEGER",
        ),
        (
            "big_board_entries",
            "via_album_id",
            "ALTER TABLE big_board_entries ADD COLUMN via_album_id INTEGER REFERENCES albums(id)",
        ),
    ];
    for (table, column, sql) in column_migrations {
        let probe = format!("SELECT {column} FROM {table} LIMIT 1");
        if conn.prepare(&probe).is_err() {
            debug!("adding column {table}.{column}");
            conn.execute(sql, [])?;
        }
    }

    migrate_legacy_board(conn)?;
    Ok(())
}

/// Older databases kept rank and board year directly on `albums` and the
/// unmatched residue as JSON on the latest sync_log row. Move both into
/// `big_board_entries` once, then blank the legacy columns.
fn migrate_legacy_board(conn: &Connection) -> Result<()> {
    let entry_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM big_board_entries", [], |row| row.get(0))?;
    if entry_count > 0 {
        return Ok(());
    }

    let mut migrated = 0usize;

    let mut stmt = conn.prepare(
        "SELECT id, big_board_rank, big_board_year, artist, title
         FROM albums WHERE big_board_rank IS NOT NULL",
    )?;
    let ranked: Vec<(i64, u32, Option<i32>, String, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);
    for (album_id, rank, year, artist, title) in ranked {
        migrated += conn.execute(
            "INSERT OR IGNORE INTO big_board_entries (rank, artist, title, year, album_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![rank, artist, title, year, album_id],
        )?;
    }

    let unmatched_json: Option<String> = conn
        .query_row(
            "SELECT unmatched_entries FROM sync_log
             WHERE sync_type = 'big_board' AND unmatched_entries IS NOT NULL
             ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(json) = unmatched_json {
        if let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(&json) {
            for entry in entries {
                let rank = entry.get("rank").and_then(serde_json::Value::as_u64);
                let artist = entry.get("artist").and_then(serde_json::Value::as_str);
                let title = entry.get("title").and_then(serde_json::Value::as_str);
                let year = entry
                    .get("year")
                    .and_then(serde_json::Value::as_i64)
                    .map(|y| y as i32);
                if let (Some(rank), Some(artist), Some(title)) = (rank, artist, title) {
                    migrated += conn.execute(
                        "INSERT OR IGNORE INTO big_board_entries (rank, artist, title, year, album_id)
                         VALUES (?1, ?2, ?3, ?4, NULL)",
                        params![rank, artist, title, year],
                    )?;
                }
            }
        }
    }

    if migrated > 0 {
        conn.execute(
            "UPDATE albums SET big_board_rank = NULL, big_board_year = NULL",
            [],
        )?;
        info!("migrated {migrated} legacy Big Board entries");
    }
    Ok(())
}

// --- Timestamps ---

/// Current UTC time as the canonical stored text form.
#[must_use]
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp, accepting both RFC 3339 and SQLite's
/// `CURRENT_TIMESTAMP` form (`YYYY-MM-DD HH:MM:SS`, taken as UTC).
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// --- Albums ---

fn album_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        discogs_release_id: row.get(1)?,
        discogs_master_id: row.get(2)?,
        artist: row.get(3)?,
        title: row.get(4)?,
        release_year: row.get(5)?,
        master_year: row.get(6)?,
        cover_image_url: row.get(7)?,
        genres: tags_from_json(row.get::<_, Option<String>>(8)?),
        styles: tags_from_json(row.get::<_, Option<String>>(9)?),
        format: row.get(10)?,
        is_excluded: row.get(11)?,
        is_removed: row.get(12)?,
        discogs_url: row.get(13)?,
        master_url: row.get(14)?,
        master_id_override: row.get(15)?,
        master_year_override: row.get(16)?,
    })
}

/// Tag sets are stored as JSON arrays of strings; absent or malformed text
/// reads as no tags.
#[must_use]
pub fn tags_from_json(raw: Option<String>) -> Vec<String> {
    raw.as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

#[must_use]
pub fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

pub fn album_by_id(conn: &Connection, album_id: i64) -> Result<Option<Album>> {
    let sql = format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE id = ?1");
    conn.query_row(&sql, [album_id], album_from_row)
        .optional()
        .context("failed to query album by id")
}

pub fn album_by_release_id(conn: &Connection, release_id: i64) -> Result<Option<Album>> {
    let sql = format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE discogs_release_id = ?1");
    conn.query_row(&sql, [release_id], album_from_row)
        .optional()
        .context("failed to query album by release id")
}

pub fn insert_album(conn: &Connection, album: &NewAlbum) -> Result<i64> {
    conn.execute(
        "INSERT INTO albums
         (discogs_release_id, discogs_master_id, artist, title,
          release_year, cover_image_url, genres, styles, format,
          discogs_url, master_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            album.discogs_release_id,
            album.discogs_master_id,
            album.artist,
            album.title,
            album.release_year,
            album.cover_image_url,
            tags_to_json(&album.genres),
            tags_to_json(&album.styles),
            album.format,
            album.discogs_url,
            album.master_url,
        ],
    )
    .with_context(|| format!("failed to insert album {:?}", album.title))?;
    Ok(conn.last_insert_rowid())
}

/// Release ids of all non-removed albums, for the soft-removal sweep.
pub fn active_release_ids(conn: &Connection) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT discogs_release_id FROM albums WHERE is_removed = 0")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<i64>>>()?;
    Ok(ids)
}

/// Soft-remove albums whose release ids are no longer in the source
/// collection. History rows stay untouched.
pub fn soft_remove_releases(conn: &Connection, release_ids: &[i64]) -> Result<usize> {
    let mut removed = 0;
    for release_id in release_ids {
        removed += conn.execute(
            "UPDATE albums SET is_removed = 1, updated_at = CURRENT_TIMESTAMP
             WHERE discogs_release_id = ?1",
            [release_id],
        )?;
    }
    Ok(removed)
}

pub fn set_excluded(conn: &Connection, album_id: i64, excluded: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE albums SET is_excluded = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![excluded, album_id],
    )?;
    Ok(changed > 0)
}

// --- Partial updates ---

/// A partial album update: only fields that are present are applied.
/// Double-`Option` fields distinguish "leave alone" (`None`) from
/// "set to NULL" (`Some(None)`).
#[derive(Debug, Default, Clone)]
pub struct AlbumPatch {
    pub discogs_release_id: Option<i64>,
    pub discogs_master_id: Option<Option<i64>>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub release_year: Option<Option<i32>>,
    pub master_year: Option<Option<i32>>,
    pub cover_image_url: Option<Option<String>>,
    pub genres: Option<Vec<String>>,
    pub styles: Option<Vec<String>>,
    pub format: Option<Option<String>>,
    pub discogs_url: Option<String>,
    pub master_url: Option<Option<String>>,
    pub master_id_override: Option<Option<i64>>,
    pub master_year_override: Option<Option<i32>>,
    pub is_removed: Option<bool>,
}

impl AlbumPatch {
    fn assignments(&self) -> Vec<(&'static str, Value)> {
        let mut fields: Vec<(&'static str, Value)> = Vec::new();
        if let Some(v) = self.discogs_release_id {
            fields.push(("discogs_release_id", Value::from(v)));
        }
        if let Some(v) = &self.discogs_master_id {
            fields.push(("discogs_master_id", opt_value(*v)));
        }
        if let Some(v) = &self.artist {
            fields.push(("artist", Value::from(v.clone())));
        }
        if let Some(v) = &self.title {
            fields.push(("title", Value::from(v.clone())));
        }
        if let Some(v) = &self.release_year {
            fields.push(("release_year", opt_value(*v)));
        }
        if let Some(v) = &self.master_year {
            fields.push(("master_year", opt_value(*v)));
        }
        if let Some(v) = &self.cover_image_url {
            fields.push(("cover_image_url", opt_value(v.clone())));
        }
        if let Some(v) = &self.genres {
            fields.push(("genres", Value::from(tags_to_json(v))));
        }
        if let Some(v) = &self.styles {
            fields.push(("styles", Value::from(tags_to_json(v))));
        }
        if let Some(v) = &self.format {
            fields.push(("format", opt_value(v.clone())));
        }
        if let Some(v) = &self.discogs_url {
            fields.push(("discogs_url", Value::from(v.clone())));
        }
        if let Some(v) = &self.master_url {
            fields.push(("master_url", opt_value(v.clone())));
        }
        if let Some(v) = &self.master_id_override {
            fields.push(("master_id_override", opt_value(*v)));
        }
        if let Some(v) = &self.master_year_override {
            fields.push(("master_year_override", opt_value(*v)));
        }
        if let Some(v) = self.is_removed {
            fields.push(("is_removed", Value::from(v)));
        }
        fields
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }
}

fn opt_value<T: Into<Value>>(v: Option<T>) -> Value {
    v.map_or(Value::Null, Into::into)
}

/// Apply a patch to one album by id. Returns false when the id is unknown.
pub fn update_album(conn: &Connection, album_id: i64, patch: &AlbumPatch) -> Result<bool> {
    apply_patch(
        conn,
        "albums",
        "id",
        Value::from(album_id),
        patch.assignments(),
        true,
    )
}

/// Apply a patch keyed by Discogs release id, the sync path's natural key.
pub fn update_album_by_release(
    conn: &Connection,
    release_id: i64,
    patch: &AlbumPatch,
) -> Result<bool> {
    apply_patch(
        conn,
        "albums",
        "discogs_release_id",
        Value::from(release_id),
        patch.assignments(),
        true,
    )
}

/// A partial Big Board entry update.
#[derive(Debug, Default, Clone)]
pub struct EntryPatch {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub year: Option<Option<i32>>,
}

impl EntryPatch {
    fn assignments(&self) -> Vec<(&'static str, Value)> {
        let mut fields: Vec<(&'static str, Value)> = Vec::new();
        if let Some(v) = &self.artist {
            fields.push(("artist", Value::from(v.trim().to_string())));
        }
        if let Some(v) = &self.title {
            fields.push(("title", Value::from(v.trim().to_string())));
        }
        if let Some(v) = &self.year {
            fields.push(("year", opt_value(*v)));
        }
        fields
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }
}

pub fn update_entry(conn: &Connection, rank: u32, patch: &EntryPatch) -> Result<bool> {
    apply_patch(
        conn,
        "big_board_entries",
        "rank",
        Value::from(i64::from(rank)),
        patch.assignments(),
        false,
    )
}

/// Generic applier for the patch types: builds one UPDATE from the present
/// fields only.
fn apply_patch(
    conn: &Connection,
    table: &str,
    key_column: &str,
    key: Value,
    fields: Vec<(&'static str, Value)>,
    touch_updated_at: bool,
) -> Result<bool> {
    anyhow::ensure!(!fields.is_empty(), "no fields to update");

    let mut set_clause = fields
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("{name} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    if touch_updated_at {
        set_clause.push_str(", updated_at = CURRENT_TIMESTAMP");
    }
    let sql = format!(
        "UPDATE {table} SET {set_clause} WHERE {key_column} = ?{}",
        fields.len() + 1
    );

    let mut values: Vec<Value> = fields.into_iter().map(|(_, v)| v).collect();
    values.push(key);
    let changed = conn
        .execute(&sql, params_from_iter(values))
        .with_context(|| format!("failed to update {table}"))?;
    Ok(changed > 0)
}

// --- Listens ---

fn listen_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Listen> {
    Ok(Listen {
        id: row.get(0)?,
        album_id: row.get(1)?,
        selected_at: row.get(2)?,
        did_listen: row.get(3)?,
        skipped: row.get(4)?,
    })
}

/// Record a new pending selection for an album. Both flags start false.
pub fn record_listen(conn: &Connection, album_id: i64, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO listens (album_id, selected_at) VALUES (?1, ?2)",
        params![album_id, timestamp(now)],
    )
    .context("failed to record selection")?;
    Ok(conn.last_insert_rowid())
}

/// Flip the album's most recent listen to the given outcome. Setting one
/// flag always clears the other. Returns false when the album has no
/// listen rows.
pub fn set_listen_outcome(
    conn: &Connection,
    album_id: i64,
    outcome: ListenOutcome,
) -> Result<bool> {
    let (did_listen, skipped) = match outcome {
        ListenOutcome::Listened => (1, 0),
        ListenOutcome::Skipped => (0, 1),
    };
    let changed = conn.execute(
        "UPDATE listens SET did_listen = ?1, skipped = ?2
         WHERE id = (
             SELECT id FROM listens WHERE album_id = ?3
             ORDER BY selected_at DESC, id DESC LIMIT 1
         )",
        params![did_listen, skipped, album_id],
    )?;
    Ok(changed > 0)
}

/// Most recent listen for an album, optionally excluding one listen id
/// (the selection that was just created).
pub fn last_listen(
    conn: &Connection,
    album_id: i64,
    excluding: Option<i64>,
) -> Result<Option<Listen>> {
    let result = match excluding {
        Some(listen_id) => conn
            .query_row(
                "SELECT id, album_id, selected_at, did_listen, skipped FROM listens
                 WHERE album_id = ?1 AND id != ?2
                 ORDER BY selected_at DESC, id DESC LIMIT 1",
                params![album_id, listen_id],
                listen_from_row,
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT id, album_id, selected_at, did_listen, skipped FROM listens
                 WHERE album_id = ?1
                 ORDER BY selected_at DESC, id DESC LIMIT 1",
                [album_id],
                listen_from_row,
            )
            .optional()?,
    };
    Ok(result)
}

pub fn listen_count(conn: &Connection, album_id: i64) -> Result<u32> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM listens WHERE album_id = ?1",
        [album_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// --- Big Board entries ---

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BoardEntry> {
    Ok(BoardEntry {
        id: row.get(0)?,
        rank: row.get(1)?,
        artist: row.get(2)?,
        title: row.get(3)?,
        year: row.get(4)?,
        album_id: row.get(5)?,
        via_album_id: row.get(6)?,
    })
}

pub fn board_entries(conn: &Connection) -> Result<Vec<BoardEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, rank, artist, title, year, album_id, via_album_id
         FROM big_board_entries ORDER BY rank",
    )?;
    let entries = stmt
        .query_map([], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn entry_by_rank(conn: &Connection, rank: u32) -> Result<Option<BoardEntry>> {
    conn.query_row(
        "SELECT id, rank, artist, title, year, album_id, via_album_id
         FROM big_board_entries WHERE rank = ?1",
        [rank],
        entry_from_row,
    )
    .optional()
    .context("failed to query Big Board entry")
}

/// Point an entry at an album, clearing any other entry that already points
/// at it (an album is linked from at most one rank).
pub fn set_entry_album(conn: &Connection, rank: u32, album_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE big_board_entries SET album_id = NULL WHERE album_id = ?1",
        [album_id],
    )?;
    conn.execute(
        "UPDATE big_board_entries SET album_id = ?1 WHERE rank = ?2",
        params![album_id, rank],
    )?;
    Ok(())
}

/// Clear the association from whichever entry points at this album.
/// Returns false when no entry does.
pub fn clear_entry_album(conn: &Connection, album_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE big_board_entries SET album_id = NULL WHERE album_id = ?1",
        [album_id],
    )?;
    Ok(changed > 0)
}

pub fn set_entry_via(conn: &Connection, rank: u32, album_id: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE big_board_entries SET via_album_id = ?1 WHERE rank = ?2",
        params![album_id, rank],
    )?;
    Ok(())
}

// --- Sync log ---

/// Append one audit row for a sync run. Write-once; never mutated.
pub fn log_sync(
    conn: &Connection,
    sync_type: &str,
    added: usize,
    updated: usize,
    removed: usize,
    notes: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_log (sync_type, albums_added, albums_updated, albums_removed, notes)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![sync_type, added as i64, updated as i64, removed as i64, notes],
    )
    .context("failed to write sync log")?;
    Ok(())
}

pub fn last_sync_time(conn: &Connection, sync_type: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT synced_at FROM sync_log WHERE sync_type = ?1 ORDER BY id DESC LIMIT 1",
        [sync_type],
        |row| row.get(0),
    )
    .optional()
    .context("failed to query sync log")
}

#[cfg(test)]
pub(crate) fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory database");
    init(&conn).expect("schema init");
    conn
}
