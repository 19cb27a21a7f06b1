//! # Selection Engine
//!
//! Computes a selection weight for every eligible album and draws the next
//! one to play via weighted random sampling. The weight composes four
//! signals:
//!
//! - **Base weight** from the Big Board rank, decaying by square root from
//!   1.0 at rank 1; unranked albums get a flat mid-field weight so they stay
//!   in rotation.
//! - **Recency factor**: a soft cooldown that suppresses recently played
//!   albums and climbs back to 1.0 over roughly two thirds of a full
//!   rotation of the collection.
//! - **Variety bonus** against the last ten selections: new decade and new
//!   genre get a boost, a recently heard artist gets cut hard.
//! - **Never-played bonus** for albums with no history at all.
//!
//! The weight vector is deterministic given the album set, the listen
//! history, and "now"; only the final draw is random, and the two steps are
//! exposed separately so the vector can be tested bit-for-bit.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rusqlite::Connection;

use crate::db;
use crate::years;

/// Tunable weighting parameters.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    /// How many recent selections form the variety signature.
    pub recent_window: usize,
    /// Flat base weight for albums without a Big Board rank.
    pub unranked_weight: f64,
    /// Exponent flattening the rank curve (0.5 = square root).
    pub rank_exponent: f64,
    /// Exponent sharpening the cooldown curve.
    pub recency_exponent: f64,
    /// Cycle length divisor: `cycle_days = eligible_count / cycle_divisor`.
    pub cycle_divisor: f64,
    /// Multiplier when the album's decade is absent from the recent set.
    pub decade_bonus: f64,
    /// Multiplier when the album brings a genre absent from the recent set.
    pub tag_bonus: f64,
    /// Multiplier when the artist appears in the recent selections.
    pub artist_penalty: f64,
    /// Multiplier for albums with no recorded listens of any kind.
    pub never_played_bonus: f64,
}

impl Default for SelectionContext {
    fn default() -> Self {
        Self {
            recent_window: 10,
            unranked_weight: 0.4,
            rank_exponent: 0.5,
            recency_exponent: 1.5,
            cycle_divisor: 1.5,
            decade_bonus: 1.3,
            tag_bonus: 1.2,
            artist_penalty: 0.3,
            never_played_bonus: 1.5,
        }
    }
}

/// An eligible album joined with its Big Board association.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub album_id: i64,
    pub artist: String,
    pub title: String,
    pub release_year: Option<i32>,
    pub master_year: Option<i32>,
    pub year_override: Option<i32>,
    pub board_year: Option<i32>,
    pub rank: Option<u32>,
    pub cover_image_url: Option<String>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub format: Option<String>,
    pub discogs_url: Option<String>,
    pub master_url: Option<String>,
}

impl Candidate {
    #[must_use]
    pub fn display_year(&self) -> Option<i32> {
        years::display_year(
            self.year_override,
            self.board_year,
            self.master_year,
            self.release_year,
        )
    }
}

/// A candidate with its computed selection weight.
#[derive(Debug, Clone)]
pub struct WeightedCandidate {
    pub candidate: Candidate,
    pub weight: f64,
}

/// The result of a draw: album metadata merged with history context and the
/// freshly created pending listen.
#[derive(Debug, Clone)]
pub struct Selection {
    pub album_id: i64,
    pub listen_id: i64,
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
    pub last_played: Option<String>,
}

#[derive(Debug)]
struct ListenStats {
    last_selected: Option<String>,
    #[allow(dead_code)]
    play_count: u32,
}

/// Artist/genre/decade signature of the most recent selections. Any listen
/// outcome counts; a skip keeps the artist "recent" just the same.
#[derive(Debug, Default)]
struct RecentSignature {
    decades: HashSet<i32>,
    genres: HashSet<String>,
    artists: HashSet<String>,
}

/// All albums eligible for selection: not excluded, not removed.
pub fn eligible_candidates(conn: &Connection) -> Result<Vec<Candidate>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.artist, a.title, a.release_year, a.master_year,
                a.master_year_override, bb.year, bb.rank,
                a.cover_image_url, a.genres, a.styles, a.format,
                a.discogs_url, a.master_url
         FROM albums a
         LEFT JOIN big_board_entries bb ON bb.album_id = a.id
         WHERE a.is_excluded = 0 AND a.is_removed = 0",
    )?;
    let candidates = stmt
        .query_map([], |row| {
            Ok(Candidate {
                album_id: row.get(0)?,
                artist: row.get(1)?,
                title: row.get(2)?,
                release_year: row.get(3)?,
                master_year: row.get(4)?,
                year_override: row.get(5)?,
                board_year: row.get(6)?,
                rank: row.get(7)?,
                cover_image_url: row.get(8)?,
                genres: db::tags_from_json(row.get::<_, Option<String>>(9)?),
                styles: db::tags_from_json(row.get::<_, Option<String>>(10)?),
                format: row.get(11)?,
                discogs_url: row.get(12)?,
                master_url: row.get(13)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(candidates)
}

/// Per-album last-selected timestamp and play count, in one pass.
fn listen_stats(conn: &Connection) -> Result<HashMap<i64, ListenStats>> {
    let mut stmt = conn.prepare(
        "SELECT album_id, MAX(selected_at) AS last_selected, COUNT(*) AS play_count
         FROM listens GROUP BY album_id",
    )?;
    let mut stats = HashMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, u32>(2)?,
        ))
    })?;
    for row in rows {
        let (album_id, last_selected, play_count) = row?;
        stats.insert(
            album_id,
            ListenStats {
                last_selected,
                play_count,
            },
        );
    }
    Ok(stats)
}

fn recent_signature(conn: &Connection, window: usize) -> Result<RecentSignature> {
    let mut stmt = conn.prepare(
        "SELECT a.artist, a.genres, a.master_year_override, bb.year,
                a.master_year, a.release_year
         FROM listens l
         JOIN albums a ON l.album_id = a.id
         LEFT JOIN big_board_entries bb ON bb.album_id = a.id
         ORDER BY l.selected_at DESC, l.id DESC
         LIMIT ?1",
    )?;
    let mut signature = RecentSignature::default();
    let rows = stmt.query_map([window as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<i32>>(2)?,
            row.get::<_, Option<i32>>(3)?,
            row.get::<_, Option<i32>>(4)?,
            row.get::<_, Option<i32>>(5)?,
        ))
    })?;
    for row in rows {
        let (artist, genres, year_override, board_year, master_year, release_year) = row?;
        if let Some(year) = years::display_year(year_override, board_year, master_year, release_year)
        {
            signature.decades.insert(years::decade(year));
        }
        for genre in db::tags_from_json(genres) {
            signature.genres.insert(genre);
        }
        signature.artists.insert(artist);
    }
    Ok(signature)
}

/// Compute the full weight vector. Deterministic given the database state
/// and `now`; contains one entry per eligible album, in query order.
pub fn calculate_weights(
    conn: &Connection,
    now: DateTime<Utc>,
    ctx: &SelectionContext,
) -> Result<Vec<WeightedCandidate>> {
    let candidates = eligible_candidates(conn)?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let max_rank = candidates.iter().filter_map(|c| c.rank).max().unwrap_or(1);
    let recent = recent_signature(conn, ctx.recent_window)?;
    let stats = listen_stats(conn)?;
    let cycle_days = candidates.len() as f64 / ctx.cycle_divisor;

    let weighted = candidates
        .into_iter()
        .map(|candidate| {
            let album_stats = stats.get(&candidate.album_id);

            let base = base_weight(candidate.rank, max_rank, ctx);
            let recency = album_stats
                .and_then(|s| s.last_selected.as_deref())
                .and_then(db::parse_timestamp)
                .map_or(1.0, |last| {
                    let days = (now - last).num_seconds().max(0) as f64 / 86_400.0;
                    recency_factor(days, cycle_days, ctx)
                });
            let variety = variety_bonus(&candidate, &recent, ctx);
            let never_played = if album_stats.is_none() {
                ctx.never_played_bonus
            } else {
                1.0
            };

            let weight = base * recency * variety * never_played;
            WeightedCandidate { candidate, weight }
        })
        .collect();

    Ok(weighted)
}

/// Rank-derived base weight: 1.0 at rank 1, decaying by `rank_exponent`
/// toward the bottom of the board; a flat mid-field weight when unranked.
fn base_weight(rank: Option<u32>, max_rank: u32, ctx: &SelectionContext) -> f64 {
    match rank {
        Some(rank) => {
            let span = f64::from(max_rank - rank.min(max_rank) + 1);
            (span / f64::from(max_rank)).powf(ctx.rank_exponent)
        }
        None => ctx.unranked_weight,
    }
}

/// Cooldown curve: 0 just after a play, back to 1.0 after a full cycle.
fn recency_factor(days_since: f64, cycle_days: f64, ctx: &SelectionContext) -> f64 {
    (days_since / cycle_days).powf(ctx.recency_exponent).min(1.0)
}

fn variety_bonus(candidate: &Candidate, recent: &RecentSignature, ctx: &SelectionContext) -> f64 {
    let mut bonus = 1.0;

    if let Some(year) = candidate.display_year() {
        if !recent.decades.contains(&years::decade(year)) {
            bonus *= ctx.decade_bonus;
        }
    }

    // Bringing any genre the recent batch hasn't touched earns the bonus;
    // albums with no tags at all never qualify.
    if candidate.genres.iter().any(|g| !recent.genres.contains(g)) {
        bonus *= ctx.tag_bonus;
    }

    if recent.artists.contains(&candidate.artist) {
        bonus *= ctx.artist_penalty;
    }

    bonus
}

/// Draw the next album and record a pending listen for it. Returns `None`
/// when no albums are eligible, which is a defined absence, not an error.
pub fn select_next(conn: &Connection, ctx: &SelectionContext) -> Result<Option<Selection>> {
    select_next_with_rng(conn, Utc::now(), ctx, &mut rand::thread_rng())
}

/// Deterministic-input variant of [`select_next`] for tests: the caller
/// supplies the clock and the RNG.
pub fn select_next_with_rng<R: Rng>(
    conn: &Connection,
    now: DateTime<Utc>,
    ctx: &SelectionContext,
    rng: &mut R,
) -> Result<Option<Selection>> {
    let weighted = calculate_weights(conn, now, ctx)?;
    if weighted.is_empty() {
        debug!("no eligible albums to select from");
        return Ok(None);
    }

    let distribution = WeightedIndex::new(weighted.iter().map(|w| w.weight))
        .context("no selectable weight mass among eligible albums")?;
    let chosen = &weighted[distribution.sample(rng)].candidate;
    debug!(
        "selected album {} ({} — {})",
        chosen.album_id, chosen.artist, chosen.title
    );

    // History context is captured before the new pending row goes in, so it
    // reflects the state prior to this selection.
    let times_played = db::listen_count(conn, chosen.album_id)?;
    let last_played = db::last_listen(conn, chosen.album_id, None)?.map(|l| l.selected_at);
    let listen_id = db::record_listen(conn, chosen.album_id, now)?;

    Ok(Some(Selection {
        album_id: chosen.album_id,
        listen_id,
        artist: chosen.artist.clone(),
        title: chosen.title.clone(),
        display_year: chosen.display_year(),
        release_year: chosen.release_year,
        master_year: chosen.master_year,
        cover_image_url: chosen.cover_image_url.clone(),
        genres: chosen.genres.clone(),
        styles: chosen.styles.clone(),
        format: chosen.format.clone(),
        rank: chosen.rank,
        discogs_url: chosen.discogs_url.clone(),
        master_url: chosen.master_url.clone(),
        times_played,
        last_played,
    }))
}
