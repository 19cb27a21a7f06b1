//! # Big Board Reconciliation
//!
//! Imports the externally authored ranked list ("the Big Board") and aligns
//! it with the owned collection by fuzzy string matching. Re-imports fully
//! replace the entry set but preserve what the user has touched: manually
//! edited fields win over freshly read ones, and existing album
//! associations are never re-scored.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;
use rusqlite::{params, Connection};

use crate::db;
use crate::similarity::{artist_metrics, best_score, normalize, title_metrics};
use crate::sync::ProgressSink;

/// Minimum combined score to accept a fuzzy match.
pub const MATCH_THRESHOLD: f64 = 80.0;

const ARTIST_WEIGHT: f64 = 0.4;
const TITLE_WEIGHT: f64 = 0.6;

/// One parsed row of the Big Board list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardRow {
    pub rank: u32,
    pub artist: String,
    pub title: String,
    pub year: Option<i32>,
    pub owned: bool,
}

/// An entry that found no acceptable match, with the nearest miss for
/// operator review.
#[derive(Debug, Clone)]
pub struct UnmatchedEntry {
    pub rank: u32,
    pub artist: String,
    pub title: String,
    pub year: Option<i32>,
    pub owned: bool,
    pub best_match_score: u32,
    pub best_match: Option<String>,
}

/// Summary of one reconciliation run.
#[derive(Debug)]
pub struct BoardSyncReport {
    pub total_entries: usize,
    pub matched: usize,
    pub unmatched: Vec<UnmatchedEntry>,
}

impl BoardSyncReport {
    #[must_use]
    pub fn unmatched_count(&self) -> usize {
        self.unmatched.len()
    }
}

/// Read the Big Board CSV: `artist, title, year, owned` per row, 1-indexed
/// by position. Blank and malformed rows are skipped without aborting, but
/// still consume their rank so positions stay stable across re-imports.
pub fn read_board_csv(path: &Path) -> Result<Vec<BoardRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open Big Board CSV at {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let rank = (index + 1) as u32;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!("skipping malformed Big Board row {rank}: {err}");
                continue;
            }
        };
        if record.iter().take(3).all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let artist = record.get(0).unwrap_or("").trim().to_string();
        let title = record.get(1).unwrap_or("").trim().to_string();
        if artist.is_empty() || title.is_empty() {
            warn!("skipping Big Board row {rank}: missing artist or title");
            continue;
        }

        let year = record
            .get(2)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<i32>().ok());
        let owned = record
            .get(3)
            .map(|cell| cell.trim().eq_ignore_ascii_case("x"))
            .unwrap_or(false);

        rows.push(BoardRow {
            rank,
            artist,
            title,
            year,
            owned,
        });
    }
    Ok(rows)
}

/// An owned album with its matching keys pre-normalized.
#[derive(Debug)]
struct MatchCandidate {
    id: i64,
    artist: String,
    title: String,
    norm_artist: String,
    norm_title: String,
}

fn load_candidates(conn: &Connection) -> Result<Vec<MatchCandidate>> {
    let mut stmt =
        conn.prepare("SELECT id, artist, title FROM albums WHERE is_removed = 0")?;
    let candidates = stmt
        .query_map([], |row| {
            let artist: String = row.get(1)?;
            let title: String = row.get(2)?;
            Ok(MatchCandidate {
                id: row.get(0)?,
                norm_artist: normalize(&artist),
                norm_title: normalize(&title),
                artist,
                title,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(candidates)
}

fn combined_score(entry_artist: &str, entry_title: &str, candidate: &MatchCandidate) -> f64 {
    let artist = best_score(entry_artist, &candidate.norm_artist, artist_metrics());
    let title = best_score(entry_title, &candidate.norm_title, title_metrics());
    artist * ARTIST_WEIGHT + title * TITLE_WEIGHT
}

/// The single best-scoring candidate for an entry, if any exist. Ties go to
/// the earlier candidate.
fn find_best_match(
    entry_artist: &str,
    entry_title: &str,
    candidates: &[MatchCandidate],
) -> Option<(usize, f64)> {
    candidates
        .par_iter()
        .enumerate()
        .map(|(index, candidate)| (index, combined_score(entry_artist, entry_title, candidate)))
        .reduce_with(|best, next| {
            if next.1 > best.1 || (next.1 == best.1 && next.0 < best.0) {
                next
            } else {
                best
            }
        })
}

/// Run one reconciliation: replace the entry set from `rows`, preserving
/// manual edits and prior associations per rank, fuzzy-matching the rest.
/// The whole run is one transaction.
pub fn sync_big_board(
    conn: &mut Connection,
    rows: &[BoardRow],
    sink: &dyn ProgressSink,
) -> Result<BoardSyncReport> {
    let total = rows.len();
    let tx = conn.transaction()?;

    let candidates = load_candidates(&tx)?;
    let previous: HashMap<u32, db::BoardEntry> = db::board_entries(&tx)?
        .into_iter()
        .map(|entry| (entry.rank, entry))
        .collect();

    tx.execute("DELETE FROM big_board_entries", [])?;

    let mut matched = 0usize;
    let mut unmatched: Vec<UnmatchedEntry> = Vec::new();
    sink.report(
        &format!("Matching {total} Big Board entries..."),
        0,
        total as u64,
    );

    for (i, row) in rows.iter().enumerate() {
        let old = previous.get(&row.rank);

        // A field that differs from what re-reading the source produces was
        // edited by hand; the edit survives the re-import.
        let mut artist = row.artist.clone();
        let mut title = row.title.clone();
        let mut year = row.year;
        if let Some(old) = old {
            if old.artist != row.artist {
                artist = old.artist.clone();
            }
            if old.title != row.title {
                title = old.title.clone();
            }
            if old.year != row.year {
                year = old.year;
            }
        }
        let via_album_id = old.and_then(|entry| entry.via_album_id);

        // A prior association, manual or automatic, is kept as-is; only
        // unassociated ranks get fresh matching.
        let album_id = match old.and_then(|entry| entry.album_id) {
            Some(prior) => {
                matched += 1;
                Some(prior)
            }
            None => {
                let entry_artist = normalize(&row.artist);
                let entry_title = normalize(&row.title);
                match find_best_match(&entry_artist, &entry_title, &candidates) {
                    Some((index, score)) if score >= MATCH_THRESHOLD => {
                        matched += 1;
                        Some(candidates[index].id)
                    }
                    best => {
                        unmatched.push(UnmatchedEntry {
                            rank: row.rank,
                            artist: row.artist.clone(),
                            title: row.title.clone(),
                            year: row.year,
                            owned: row.owned,
                            best_match_score: best.map_or(0, |(_, score)| score.round() as u32),
                            best_match: best.map(|(index, _)| {
                                format!(
                                    "{} — {}",
                                    candidates[index].artist, candidates[index].title
                                )
                            }),
                        });
                        None
                    }
                }
            }
        };

        tx.execute(
            "INSERT INTO big_board_entries (rank, artist, title, year, album_id, via_album_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![row.rank, artist, title, year, album_id, via_album_id],
        )?;

        if (i + 1) % 50 == 0 {
            sink.report(
                &format!("Matched {matched}/{} entries...", i + 1),
                (i + 1) as u64,
                total as u64,
            );
        }
    }

    db::log_sync(
        &tx,
        "big_board",
        0,
        matched,
        0,
        Some(&format!("{} unmatched entries", unmatched.len())),
    )?;
    tx.commit()?;

    info!(
        "Big Board reconciliation: {matched}/{total} matched, {} unmatched",
        unmatched.len()
    );
    sink.report(
        &format!(
            "Done! Matched {matched}/{total} entries. {} unmatched.",
            unmatched.len()
        ),
        total as u64,
        total as u64,
    );

    Ok(BoardSyncReport {
        total_entries: total,
        matched,
        unmatched,
    })
}

/// Read the CSV and reconcile it in one step.
pub fn import_board(
    conn: &mut Connection,
    csv_path: &Path,
    sink: &dyn ProgressSink,
) -> Result<BoardSyncReport> {
    let rows = read_board_csv(csv_path)?;
    sync_big_board(conn, &rows, sink)
}
