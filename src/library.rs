//! # Library Operations
//!
//! Read paths and corrective operations over the album store: history and
//! stats, the Big Board view, collection browsing and search, listen
//! marking, exclusion, and the manual-correction surface (year overrides,
//! master/release repointing, Big Board edits and matches).
//!
//! Every operation that looks something up by id reports "not found" without
//! touching anything else.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{self, EntryPatch, ListenOutcome};
use crate::discogs::{self, ReleaseDetail};
use crate::years;

/// The most recent (or an earlier) selection with its album payload, for
/// stepping back through history.
#[derive(Debug, Clone)]
pub struct PreviousListen {
    pub listen_id: i64,
    pub album_id: i64,
    pub did_listen: bool,
    pub skipped: bool,
    pub artist: String,
    pub title: String,
    pub display_year: Option<i32>,
    pub release_year: Option<i32>,
    pub master_year: Option<i32>,
    pub cover_image_url: Option<String>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub format: Option<String>,
    pub rank: Option<u32>,
    pub discogs_url: Option<String>,
    pub master_url: Option<String>,
    pub times_played: u32,
}

/// One decided listen in the history listing.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub listen_id: i64,
    pub album_id: i64,
    pub selected_at: String,
    pub did_listen: bool,
    pub skipped: bool,
    pub artist: String,
    pub title: String,
    pub display_year: Option<i32>,
    pub cover_image_url: Option<String>,
    pub genres: Vec<String>,
    pub rank: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub page: u32,
    pub per_page: u32,
    pub total: u32,
    pub total_pages: u32,
}

/// Collection-level counters for the stats view.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub total_albums: u32,
    pub excluded: u32,
    pub removed: u32,
    pub ranked_owned: u32,
    pub unique_listened: u32,
    pub total_listens: u32,
    pub total_skips: u32,
    pub last_collection_sync: Option<String>,
    pub last_board_sync: Option<String>,
}

/// Per-album completed-listen counters.
#[derive(Debug, Clone)]
pub struct PlayStats {
    pub album_id: i64,
    pub artist: String,
    pub title: String,
    pub display_year: Option<i32>,
    pub genres: Vec<String>,
    pub rank: Option<u32>,
    pub listen_count: u32,
    pub first_listened: Option<String>,
    pub last_listened: Option<String>,
}

/// One Big Board rank with its ownership resolution. The direct album wins;
/// a via album (e.g. a compilation containing the ranked record) fills in
/// when there is no direct match.
#[derive(Debug, Clone)]
pub struct BoardView {
    pub rank: u32,
    pub artist: String,
    pub title: String,
    pub year: Option<i32>,
    pub owned: bool,
    pub album_id: Option<i64>,
    pub via_album_id: Option<i64>,
    pub via_artist: Option<String>,
    pub via_title: Option<String>,
    pub cover_image_url: Option<String>,
    pub genres: Vec<String>,
}

/// One album in the library/search/excluded listings.
#[derive(Debug, Clone)]
pub struct LibraryAlbum {
    pub album_id: i64,
    pub artist: String,
    pub title: String,
    pub release_year: Option<i32>,
    pub master_year: Option<i32>,
    pub display_year: Option<i32>,
    pub cover_image_url: Option<String>,
    pub genres: Vec<String>,
    pub format: Option<String>,
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibrarySort {
    Artist,
    Title,
    DisplayYear,
    ReleaseYear,
}

/// Full album payload for the detail view.
#[derive(Debug, Clone)]
pub struct AlbumDetail {
    pub album: db::Album,
    pub rank: Option<u32>,
    pub board_year: Option<i32>,
    pub display_year: Option<i32>,
    pub times_played: u32,
    pub times_skipped: u32,
}

// --- Listen marking & exclusion ---

/// Flip the album's latest listen to "listened". Not-found when the album
/// has no selection yet.
pub fn mark_listened(conn: &Connection, album_id: i64) -> Result<bool> {
    db::set_listen_outcome(conn, album_id, ListenOutcome::Listened)
}

/// Flip the album's latest listen to "skipped".
pub fn mark_skipped(conn: &Connection, album_id: i64) -> Result<bool> {
    db::set_listen_outcome(conn, album_id, ListenOutcome::Skipped)
}

pub fn exclude(conn: &Connection, album_id: i64) -> Result<bool> {
    db::set_excluded(conn, album_id, true)
}

pub fn include(conn: &Connection, album_id: i64) -> Result<bool> {
    db::set_excluded(conn, album_id, false)
}

// --- History ---

/// The most recent listen, or the one just before `before_listen_id`, with
/// its album resolved.
pub fn previous(conn: &Connection, before_listen_id: Option<i64>) -> Result<Option<PreviousListen>> {
    let listen: Option<(i64, i64, bool, bool)> = match before_listen_id {
        Some(listen_id) => conn
            .query_row(
                "SELECT id, album_id, did_listen, skipped FROM listens
                 WHERE id < ?1 ORDER BY id DESC LIMIT 1",
                [listen_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT id, album_id, did_listen, skipped FROM listens
                 ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?,
    };
    let Some((listen_id, album_id, did_listen, skipped)) = listen else {
        return Ok(None);
    };

    let Some(detail) = album_detail(conn, album_id)? else {
        return Ok(None);
    };
    let album = detail.album;

    Ok(Some(PreviousListen {
        listen_id,
        album_id,
        did_listen,
        skipped,
        artist: album.artist,
        title: album.title,
        display_year: detail.display_year,
        release_year: album.release_year,
        master_year: album.master_year,
        cover_image_url: album.cover_image_url,
        genres: album.genres,
        styles: album.styles,
        format: album.format,
        rank: detail.rank,
        discogs_url: album.discogs_url,
        master_url: album.master_url,
        times_played: db::listen_count(conn, album_id)?,
    }))
}

/// Decided listens (listened or skipped), newest first, paged.
pub fn history(conn: &Connection, page: u32, per_page: u32) -> Result<HistoryPage> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 100);
    let offset = (page - 1) * per_page;

    let total: u32 = conn.query_row(
        "SELECT COUNT(*) FROM listens WHERE did_listen = 1 OR skipped = 1",
        [],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT l.id, l.album_id, l.selected_at, l.did_listen, l.skipped,
                a.artist, a.title, a.release_year, a.master_year,
                a.master_year_override, a.cover_image_url, a.genres,
                bb.rank, bb.year
         FROM listens l
         JOIN albums a ON l.album_id = a.id
         LEFT JOIN big_board_entries bb ON bb.album_id = a.id
         WHERE l.did_listen = 1 OR l.skipped = 1
         ORDER BY l.selected_at DESC, l.id DESC
         LIMIT ?1 OFFSET ?2",
    )?;
    let entries = stmt
        .query_map(params![per_page, offset], |row| {
            let release_year: Option<i32> = row.get(7)?;
            let master_year: Option<i32> = row.get(8)?;
            let year_override: Option<i32> = row.get(9)?;
            let board_year: Option<i32> = row.get(13)?;
            Ok(HistoryEntry {
                listen_id: row.get(0)?,
                album_id: row.get(1)?,
                selected_at: row.get(2)?,
                did_listen: row.get(3)?,
                skipped: row.get(4)?,
                artist: row.get(5)?,
                title: row.get(6)?,
                display_year: years::display_year(
                    year_override,
                    board_year,
                    master_year,
                    release_year,
                ),
                cover_image_url: row.get(10)?,
                genres: db::tags_from_json(row.get::<_, Option<String>>(11)?),
                rank: row.get(12)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(HistoryPage {
        entries,
        page,
        per_page,
        total,
        total_pages: if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        },
    })
}

// --- Stats ---

pub fn stats(conn: &Connection) -> Result<CollectionStats> {
    let count = |sql: &str| -> Result<u32> {
        conn.query_row(sql, [], |row| row.get(0))
            .context("failed to compute collection stats")
    };

    Ok(CollectionStats {
        total_albums: count("SELECT COUNT(*) FROM albums WHERE is_removed = 0")?,
        excluded: count("SELECT COUNT(*) FROM albums WHERE is_excluded = 1 AND is_removed = 0")?,
        removed: count("SELECT COUNT(*) FROM albums WHERE is_removed = 1")?,
        ranked_owned: count("SELECT COUNT(*) FROM big_board_entries WHERE album_id IS NOT NULL")?,
        unique_listened: count(
            "SELECT COUNT(DISTINCT album_id) FROM listens WHERE did_listen = 1",
        )?,
        total_listens: count("SELECT COUNT(*) FROM listens WHERE did_listen = 1")?,
        total_skips: count("SELECT COUNT(*) FROM listens WHERE skipped = 1")?,
        last_collection_sync: db::last_sync_time(conn, "discogs")?,
        last_board_sync: db::last_sync_time(conn, "big_board")?,
    })
}

/// Completed listens per album, most-played first.
pub fn listening_stats(conn: &Connection) -> Result<Vec<PlayStats>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.artist, a.title, a.release_year, a.master_year,
                a.master_year_override, a.genres, bb.rank, bb.year,
                COUNT(l.id) AS listen_count,
                MIN(l.selected_at) AS first_listened,
                MAX(l.selected_at) AS last_listened
         FROM albums a
         JOIN listens l ON l.album_id = a.id AND l.did_listen = 1
         LEFT JOIN big_board_entries bb ON bb.album_id = a.id
         WHERE a.is_removed = 0
         GROUP BY a.id
         ORDER BY listen_count DESC, a.artist, a.title",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let release_year: Option<i32> = row.get(3)?;
            let master_year: Option<i32> = row.get(4)?;
            let year_override: Option<i32> = row.get(5)?;
            let board_year: Option<i32> = row.get(8)?;
            Ok(PlayStats {
                album_id: row.get(0)?,
                artist: row.get(1)?,
                title: row.get(2)?,
                display_year: years::display_year(
                    year_override,
                    board_year,
                    master_year,
                    release_year,
                ),
                genres: db::tags_from_json(row.get::<_, Option<String>>(6)?),
                rank: row.get(7)?,
                listen_count: row.get(9)?,
                first_listened: row.get(10)?,
                last_listened: row.get(11)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Big Board view ---

pub fn board(conn: &Connection) -> Result<Vec<BoardView>> {
    let mut stmt = conn.prepare(
        "SELECT bb.rank, bb.artist, bb.title, bb.year,
                bb.album_id, bb.via_album_id,
                a.id, a.cover_image_url, a.genres,
                va.id, va.cover_image_url, va.genres, va.artist, va.title
         FROM big_board_entries bb
         LEFT JOIN albums a ON a.id = bb.album_id AND a.is_removed = 0
         LEFT JOIN albums va ON va.id = bb.via_album_id AND va.is_removed = 0
         ORDER BY bb.rank",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let direct: Option<i64> = row.get(6)?;
            let via: Option<i64> = row.get(9)?;
            let owned = direct.is_some() || via.is_some();

            let (cover, genres_json): (Option<String>, Option<String>) = if direct.is_some() {
                (row.get(7)?, row.get(8)?)
            } else if via.is_some() {
                (row.get(10)?, row.get(11)?)
            } else {
                (None, None)
            };

            Ok(BoardView {
                rank: row.get(0)?,
                artist: row.get(1)?,
                title: row.get(2)?,
                year: row.get(3)?,
                owned,
                album_id: if direct.is_some() { row.get(4)? } else { None },
                via_album_id: if via.is_some() { row.get(5)? } else { None },
                via_artist: if via.is_some() { row.get(12)? } else { None },
                via_title: if via.is_some() { row.get(13)? } else { None },
                cover_image_url: cover,
                genres: db::tags_from_json(genres_json),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Library listings ---

fn library_album_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LibraryAlbum> {
    let release_year: Option<i32> = row.get(3)?;
    let master_year: Option<i32> = row.get(4)?;
    let year_override: Option<i32> = row.get(5)?;
    let board_year: Option<i32> = row.get(9)?;
    Ok(LibraryAlbum {
        album_id: row.get(0)?,
        artist: row.get(1)?,
        title: row.get(2)?,
        release_year,
        master_year,
        display_year: years::display_year(year_override, board_year, master_year, release_year),
        cover_image_url: row.get(6)?,
        genres: db::tags_from_json(row.get::<_, Option<String>>(7)?),
        format: row.get::<_, Option<String>>(8)?,
        rank: row.get(10)?,
    })
}

const LIBRARY_SELECT: &str = "SELECT a.id, a.artist, a.title, a.release_year, a.master_year,
        a.master_year_override, a.cover_image_url, a.genres, a.format,
        bb.year, bb.rank
 FROM albums a
 LEFT JOIN big_board_entries bb ON bb.album_id = a.id";

/// All non-removed albums, sorted. Artist and title sorts ignore a leading
/// article, matching how record shelves are filed.
pub fn library(conn: &Connection, sort: LibrarySort, descending: bool) -> Result<Vec<LibraryAlbum>> {
    let sql = format!("{LIBRARY_SELECT} WHERE a.is_removed = 0 ORDER BY a.artist, a.title");
    let mut stmt = conn.prepare(&sql)?;
    let mut albums = stmt
        .query_map([], library_album_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    match sort {
        LibrarySort::Artist => {
            albums.sort_by_key(|a| strip_article(&a.artist).to_lowercase());
        }
        LibrarySort::Title => {
            albums.sort_by_key(|a| strip_article(&a.title).to_lowercase());
        }
        LibrarySort::DisplayYear => {
            albums.sort_by_key(|a| (a.display_year.unwrap_or(0), a.artist.to_lowercase()));
        }
        LibrarySort::ReleaseYear => {
            albums.sort_by_key(|a| (a.release_year.unwrap_or(0), a.artist.to_lowercase()));
        }
    }
    if descending {
        albums.reverse();
    }
    Ok(albums)
}

pub fn excluded_albums(conn: &Connection) -> Result<Vec<LibraryAlbum>> {
    let sql = format!(
        "{LIBRARY_SELECT} WHERE a.is_excluded = 1 AND a.is_removed = 0 ORDER BY a.artist, a.title"
    );
    let mut stmt = conn.prepare(&sql)?;
    let albums = stmt
        .query_map([], library_album_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(albums)
}

/// Substring search over artist and title for manual matching. Queries
/// shorter than two characters are rejected.
pub fn search(conn: &Connection, query: &str) -> Result<Vec<LibraryAlbum>> {
    let query = query.trim();
    if query.len() < 2 {
        bail!("Search query too short.");
    }
    let like = format!("%{query}%");
    let sql = format!(
        "{LIBRARY_SELECT}
         WHERE a.is_removed = 0 AND (a.artist LIKE ?1 OR a.title LIKE ?1)
         ORDER BY a.artist, a.title
         LIMIT 20"
    );
    let mut stmt = conn.prepare(&sql)?;
    let albums = stmt
        .query_map([like], library_album_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(albums)
}

/// Leading "The " or "A " is ignored for sorting.
fn strip_article(name: &str) -> &str {
    let lower = name.to_lowercase();
    if lower.starts_with("the ") {
        &name[4..]
    } else if lower.starts_with("a ") {
        &name[2..]
    } else {
        name
    }
}

// --- Album detail & corrections ---

pub fn album_detail(conn: &Connection, album_id: i64) -> Result<Option<AlbumDetail>> {
    let Some(album) = db::album_by_id(conn, album_id)? else {
        return Ok(None);
    };

    let board: Option<(u32, Option<i32>)> = conn
        .query_row(
            "SELECT rank, year FROM big_board_entries WHERE album_id = ?1",
            [album_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (rank, board_year) = match board {
        Some((rank, year)) => (Some(rank), year),
        None => (None, None),
    };

    let times_played: u32 = conn.query_row(
        "SELECT COUNT(*) FROM listens WHERE album_id = ?1 AND did_listen = 1",
        [album_id],
        |row| row.get(0),
    )?;
    let times_skipped: u32 = conn.query_row(
        "SELECT COUNT(*) FROM listens WHERE album_id = ?1 AND skipped = 1",
        [album_id],
        |row| row.get(0),
    )?;

    let display_year = years::display_year(
        album.master_year_override,
        board_year,
        album.master_year,
        album.release_year,
    );

    Ok(Some(AlbumDetail {
        album,
        rank,
        board_year,
        display_year,
        times_played,
        times_skipped,
    }))
}

/// Completed-listen dates for one album, newest first.
pub fn play_dates(conn: &Connection, album_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT selected_at FROM listens
         WHERE album_id = ?1 AND did_listen = 1
         ORDER BY selected_at DESC",
    )?;
    let dates = stmt
        .query_map([album_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(dates)
}

fn validate_year(year: i32) -> Result<()> {
    if !(1900..=2099).contains(&year) {
        bail!("Year must be between 1900 and 2099.");
    }
    Ok(())
}

/// Set or clear the user's original-release-year override.
pub fn set_year_override(conn: &Connection, album_id: i64, year: Option<i32>) -> Result<bool> {
    if let Some(year) = year {
        validate_year(year)?;
    }
    if db::album_by_id(conn, album_id)?.is_none() {
        return Ok(false);
    }
    db::update_album(
        conn,
        album_id,
        &db::AlbumPatch {
            master_year_override: Some(year),
            ..db::AlbumPatch::default()
        },
    )
}

/// Repoint the album at a different master release, or clear the override.
/// `detail` is the best-effort fetched master data; the id is saved even
/// when the fetch failed.
pub fn set_master(
    conn: &Connection,
    album_id: i64,
    master: Option<(i64, ReleaseDetail)>,
) -> Result<bool> {
    if db::album_by_id(conn, album_id)?.is_none() {
        return Ok(false);
    }

    let patch = match master {
        None => db::AlbumPatch {
            master_id_override: Some(None),
            discogs_master_id: Some(None),
            master_url: Some(None),
            master_year: Some(None),
            ..db::AlbumPatch::default()
        },
        Some((master_id, detail)) => {
            let mut patch = db::AlbumPatch {
                master_id_override: Some(Some(master_id)),
                discogs_master_id: Some(Some(master_id)),
                master_url: Some(Some(discogs::master_url(master_id))),
                master_year: Some(detail.year),
                ..db::AlbumPatch::default()
            };
            if let Some(cover) = detail.cover_image_url {
                patch.cover_image_url = Some(Some(cover));
            }
            patch
        }
    };
    db::update_album(conn, album_id, &patch)
}

/// Repoint the album at a different Discogs release, refreshing what the
/// release page knows.
pub fn set_release(
    conn: &Connection,
    album_id: i64,
    release_id: i64,
    detail: &ReleaseDetail,
) -> Result<bool> {
    if db::album_by_id(conn, album_id)?.is_none() {
        return Ok(false);
    }

    let mut patch = db::AlbumPatch {
        discogs_release_id: Some(release_id),
        discogs_url: Some(discogs::release_url(release_id)),
        ..db::AlbumPatch::default()
    };
    if let Some(cover) = &detail.cover_image_url {
        patch.cover_image_url = Some(Some(cover.clone()));
    }
    if let Some(year) = detail.year {
        patch.release_year = Some(Some(year));
    }
    db::update_album(conn, album_id, &patch)
}

/// Apply a freshly fetched cover image.
pub fn set_cover(conn: &Connection, album_id: i64, cover_image_url: &str) -> Result<bool> {
    if db::album_by_id(conn, album_id)?.is_none() {
        return Ok(false);
    }
    db::update_album(
        conn,
        album_id,
        &db::AlbumPatch {
            cover_image_url: Some(Some(cover_image_url.to_string())),
            ..db::AlbumPatch::default()
        },
    )
}

// --- Big Board corrections ---

/// Edit artist/title/year on an entry. Not-found when the rank is unknown;
/// rejected when the patch is empty or the year is out of range.
pub fn edit_entry(conn: &Connection, rank: u32, patch: &EntryPatch) -> Result<bool> {
    if patch.is_empty() {
        bail!("No fields to update.");
    }
    if let Some(Some(year)) = patch.year {
        validate_year(year)?;
    }
    if db::entry_by_rank(conn, rank)?.is_none() {
        return Ok(false);
    }
    db::update_entry(conn, rank, patch)
}

/// Manually associate an entry with an owned album. Any prior entry
/// pointing at that album loses its link.
pub fn match_entry(conn: &Connection, rank: u32, album_id: i64) -> Result<()> {
    if db::album_by_id(conn, album_id)?.is_none() {
        bail!("Album not found.");
    }
    if db::entry_by_rank(conn, rank)?.is_none() {
        bail!("Big Board entry not found.");
    }
    db::set_entry_album(conn, rank, album_id)
}

/// Remove the association from whichever entry points at this album.
/// False when the album has no rank.
pub fn unmatch_album(conn: &Connection, album_id: i64) -> Result<bool> {
    db::clear_entry_album(conn, album_id)
}

/// Set or clear the via-album link on an entry.
pub fn set_via(conn: &Connection, rank: u32, album_id: Option<i64>) -> Result<()> {
    if db::entry_by_rank(conn, rank)?.is_none() {
        bail!("Big Board entry not found.");
    }
    if let Some(album_id) = album_id {
        if db::album_by_id(conn, album_id)?.is_none() {
            bail!("Album not found.");
        }
    }
    db::set_entry_via(conn, rank, album_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_album, open_in_memory, record_listen, NewAlbum};
    use chrono::{Duration, Utc};

    fn seed_album(conn: &Connection, release_id: i64, artist: &str, title: &str) -> i64 {
        insert_album(
            conn,
            &NewAlbum {
                discogs_release_id: release_id,
                discogs_master_id: Some(release_id * 10),
                artist: artist.to_string(),
                title: title.to_string(),
                release_year: Some(1971),
                cover_image_url: None,
                genres: vec!["Rock".to_string()],
                styles: vec![],
                format: Some("Vinyl".to_string()),
                discogs_url: format!("https://www.discogs.com/release/{release_id}"),
                master_url: None,
            },
        )
        .unwrap()
    }

    fn seed_entry(conn: &Connection, rank: u32, artist: &str, title: &str, album_id: Option<i64>) {
        conn.execute(
            "INSERT INTO big_board_entries (rank, artist, title, year, album_id)
             VALUES (?1, ?2, ?3, 1971, ?4)",
            params![rank, artist, title, album_id],
        )
        .unwrap();
    }

    #[test]
    fn history_pages_decided_listens_only() {
        let conn = open_in_memory();
        let a = seed_album(&conn, 1, "Can", "Tago Mago");
        let b = seed_album(&conn, 2, "Faust", "Faust IV");
        let now = Utc::now();
        record_listen(&conn, a, now - Duration::days(2)).unwrap();
        mark_listened(&conn, a).unwrap();
        record_listen(&conn, b, now - Duration::days(1)).unwrap();
        mark_skipped(&conn, b).unwrap();
        // A pending selection stays out of the history.
        record_listen(&conn, a, now).unwrap();

        let page = history(&conn, 1, 20).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].album_id, b);
        assert!(page.entries[0].skipped);
        assert_eq!(page.entries[1].album_id, a);
        assert!(page.entries[1].did_listen);

        let small = history(&conn, 2, 1).unwrap();
        assert_eq!(small.entries.len(), 1);
        assert_eq!(small.total_pages, 2);
        assert_eq!(small.entries[0].album_id, a);
    }

    #[test]
    fn previous_steps_back_through_selections() {
        let conn = open_in_memory();
        let a = seed_album(&conn, 1, "Can", "Tago Mago");
        let b = seed_album(&conn, 2, "Faust", "Faust IV");
        let now = Utc::now();
        record_listen(&conn, a, now - Duration::days(1)).unwrap();
        let second = record_listen(&conn, b, now).unwrap();

        let latest = previous(&conn, None).unwrap().unwrap();
        assert_eq!(latest.album_id, b);
        assert_eq!(latest.listen_id, second);
        assert!(!latest.did_listen && !latest.skipped);

        let older = previous(&conn, Some(second)).unwrap().unwrap();
        assert_eq!(older.album_id, a);

        assert!(previous(&conn, Some(older.listen_id)).unwrap().is_none());
    }

    #[test]
    fn stats_count_the_collection() {
        let conn = open_in_memory();
        let a = seed_album(&conn, 1, "Can", "Tago Mago");
        let b = seed_album(&conn, 2, "Faust", "Faust IV");
        seed_album(&conn, 3, "Neu!", "Neu! 75");
        exclude(&conn, b).unwrap();
        db::soft_remove_releases(&conn, &[3]).unwrap();
        seed_entry(&conn, 1, "Can", "Tago Mago", Some(a));

        let now = Utc::now();
        record_listen(&conn, a, now - Duration::days(2)).unwrap();
        mark_listened(&conn, a).unwrap();
        record_listen(&conn, a, now - Duration::days(1)).unwrap();
        mark_listened(&conn, a).unwrap();
        record_listen(&conn, b, now).unwrap();
        mark_skipped(&conn, b).unwrap();

        let stats = stats(&conn).unwrap();
        assert_eq!(stats.total_albums, 2);
        assert_eq!(stats.excluded, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.ranked_owned, 1);
        assert_eq!(stats.unique_listened, 1);
        assert_eq!(stats.total_listens, 2);
        assert_eq!(stats.total_skips, 1);
    }

    #[test]
    fn board_prefers_direct_album_over_via() {
        let conn = open_in_memory();
        let direct = seed_album(&conn, 1, "Can", "Tago Mago");
        let compilation = seed_album(&conn, 2, "Various", "Krautrock Sampler");

        seed_entry(&conn, 1, "Can", "Tago Mago", Some(direct));
        seed_entry(&conn, 2, "The Standells", "Dirty Water", None);
        db::set_entry_via(&conn, 2, Some(compilation)).unwrap();
        seed_entry(&conn, 3, "Nobody", "Nothing", None);

        let board = board(&conn).unwrap();
        assert_eq!(board.len(), 3);

        assert!(board[0].owned);
        assert_eq!(board[0].album_id, Some(direct));
        assert_eq!(board[0].via_album_id, None);

        assert!(board[1].owned);
        assert_eq!(board[1].album_id, None);
        assert_eq!(board[1].via_album_id, Some(compilation));
        assert_eq!(board[1].via_title.as_deref(), Some("Krautrock Sampler"));

        assert!(!board[2].owned);
        assert_eq!(board[2].genres, Vec::<String>::new());
    }

    #[test]
    fn library_sorts_ignore_articles() {
        let conn = open_in_memory();
        seed_album(&conn, 1, "The Zombies", "Odessey And Oracle");
        seed_album(&conn, 2, "Beatles", "Abbey Road");
        seed_album(&conn, 3, "A Certain Ratio", "To Each...");

        let albums = library(&conn, LibrarySort::Artist, false).unwrap();
        let artists: Vec<&str> = albums.iter().map(|a| a.artist.as_str()).collect();
        assert_eq!(artists, vec!["Beatles", "A Certain Ratio", "The Zombies"]);

        let reversed = library(&conn, LibrarySort::Artist, true).unwrap();
        assert_eq!(reversed[0].artist, "The Zombies");
    }

    #[test]
    fn search_requires_two_characters() {
        let conn = open_in_memory();
        seed_album(&conn, 1, "Can", "Tago Mago");
        assert!(search(&conn, "c").is_err());

        let hits = search(&conn, "tago").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Tago Mago");
    }

    #[test]
    fn album_detail_resolves_years_and_counts() {
        let conn = open_in_memory();
        let id = seed_album(&conn, 1, "Can", "Tago Mago");
        conn.execute("UPDATE albums SET master_year = 1969 WHERE id = ?1", [id])
            .unwrap();
        seed_entry(&conn, 5, "Can", "Tago Mago", Some(id));
        conn.execute("UPDATE big_board_entries SET year = 1970 WHERE rank = 5", [])
            .unwrap();

        let now = Utc::now();
        record_listen(&conn, id, now - Duration::days(1)).unwrap();
        mark_listened(&conn, id).unwrap();
        record_listen(&conn, id, now).unwrap();
        mark_skipped(&conn, id).unwrap();

        let detail = album_detail(&conn, id).unwrap().unwrap();
        assert_eq!(detail.rank, Some(5));
        assert_eq!(detail.display_year, Some(1970));
        assert_eq!(detail.times_played, 1);
        assert_eq!(detail.times_skipped, 1);

        set_year_override(&conn, id, Some(1975)).unwrap();
        let detail = album_detail(&conn, id).unwrap().unwrap();
        assert_eq!(detail.display_year, Some(1975));

        assert!(album_detail(&conn, 999).unwrap().is_none());
    }

    #[test]
    fn year_override_is_validated_and_clearable() {
        let conn = open_in_memory();
        let id = seed_album(&conn, 1, "Can", "Tago Mago");

        assert!(set_year_override(&conn, id, Some(1850)).is_err());
        assert!(!set_year_override(&conn, 999, Some(1975)).unwrap());

        assert!(set_year_override(&conn, id, Some(1975)).unwrap());
        assert!(set_year_override(&conn, id, None).unwrap());
        let album = db::album_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(album.master_year_override, None);
    }

    #[test]
    fn set_master_saves_id_even_without_detail() {
        let conn = open_in_memory();
        let id = seed_album(&conn, 1, "Can", "Tago Mago");

        assert!(set_master(&conn, id, Some((77, ReleaseDetail::default()))).unwrap());
        let album = db::album_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(album.master_id_override, Some(77));
        assert_eq!(album.discogs_master_id, Some(77));
        assert_eq!(
            album.master_url.as_deref(),
            Some("https://www.discogs.com/master/77")
        );
        assert_eq!(album.master_year, None);

        // Clearing drops the whole master linkage.
        assert!(set_master(&conn, id, None).unwrap());
        let album = db::album_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(album.master_id_override, None);
        assert_eq!(album.discogs_master_id, None);
        assert_eq!(album.master_url, None);
    }

    #[test]
    fn entry_corrections_check_existence_first() {
        let conn = open_in_memory();
        let id = seed_album(&conn, 1, "Can", "Tago Mago");
        seed_entry(&conn, 1, "Can", "Tago Mago", None);

        assert!(match_entry(&conn, 1, 999).is_err());
        assert!(match_entry(&conn, 99, id).is_err());
        match_entry(&conn, 1, id).unwrap();
        assert_eq!(
            db::entry_by_rank(&conn, 1).unwrap().unwrap().album_id,
            Some(id)
        );

        assert!(unmatch_album(&conn, id).unwrap());
        assert!(!unmatch_album(&conn, id).unwrap());

        assert!(set_via(&conn, 99, Some(id)).is_err());
        set_via(&conn, 1, Some(id)).unwrap();
        assert_eq!(
            db::entry_by_rank(&conn, 1).unwrap().unwrap().via_album_id,
            Some(id)
        );

        let empty = EntryPatch::default();
        assert!(edit_entry(&conn, 1, &empty).is_err());
        assert!(!edit_entry(
            &conn,
            99,
            &EntryPatch {
                title: Some("X".to_string()),
                ..EntryPatch::default()
            }
        )
        .unwrap());
    }
}
