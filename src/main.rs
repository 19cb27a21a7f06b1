//! # Platter - Record Collection Curator
//!
//! Command-line front end. Parses arguments, opens the database, routes each
//! subcommand to the library/engine functions, and renders the results as
//! plain text.
//!
//! ## Architecture
//!
//! - `cli`: Command-line interface definitions
//! - `db`: SQLite schema and row operations
//! - `selector`: Selection weighting and the weighted random draw
//! - `bigboard`: Big Board import and fuzzy reconciliation
//! - `sync`: Sync coordination, Discogs collection sync, master-year backfill
//! - `library`: Read paths and manual corrections
//!
//! ## Usage
//!
//! ```bash
//! # Pull the collection from Discogs
//! platter sync collection
//!
//! # Import the ranked list
//! platter sync board ~/big_board.csv
//!
//! # Pick tonight's record
//! platter next
//!
//! # Settle the verdict
//! platter listened 42
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser};
use log::info;
use rusqlite::Connection;

use platter::cli::{self, AlbumAction, Command, SortKey, SyncSource};
use platter::db::EntryPatch;
use platter::library::{self, LibrarySort};
use platter::selector::{self, SelectionContext};
use platter::sync::{self, SyncKind, SyncPacing};
use platter::{bigboard, completion, config, db};

fn main() -> Result<()> {
    // Logging is controlled via RUST_LOG, e.g. RUST_LOG=platter=debug.
    env_logger::init();

    let args = cli::Args::parse();
    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => config::db_path()?,
    };

    match args.command {
        Command::InitDb => {
            db::open(&db_path)?;
            println!("Database initialized at {}", db_path.display());
        }

        Command::Next => {
            let conn = db::open(&db_path)?;
            match selector::select_next(&conn, &SelectionContext::default())? {
                Some(selection) => print_selection(&selection),
                None => println!(
                    "No eligible albums found. Sync your collection or un-exclude some albums."
                ),
            }
        }

        Command::Previous { before } => {
            let conn = db::open(&db_path)?;
            match library::previous(&conn, before)? {
                Some(listen) => print_previous(&listen),
                None => println!("No previous selection found."),
            }
        }

        Command::Listened { album_id } => {
            let conn = db::open(&db_path)?;
            if !library::mark_listened(&conn, album_id)? {
                bail!("No selection found for this album.");
            }
            println!("Marked as listened.");
        }

        Command::Skipped { album_id } => {
            let conn = db::open(&db_path)?;
            if !library::mark_skipped(&conn, album_id)? {
                bail!("No selection found for this album.");
            }
            println!("Marked as skipped.");
        }

        Command::Exclude { album_id } => {
            let conn = db::open(&db_path)?;
            if !library::exclude(&conn, album_id)? {
                bail!("Album not found.");
            }
            println!("Album excluded from future selections.");
        }

        Command::Include { album_id } => {
            let conn = db::open(&db_path)?;
            if !library::include(&conn, album_id)? {
                bail!("Album not found.");
            }
            println!("Album re-included in selections.");
        }

        Command::History { page, per_page } => {
            let conn = db::open(&db_path)?;
            let history = library::history(&conn, page, per_page)?;
            if history.entries.is_empty() {
                println!("No listening history yet.");
            } else {
                for entry in &history.entries {
                    let verdict = if entry.did_listen { "listened" } else { "skipped" };
                    println!(
                        "{}  [{verdict:8}]  {} — {} ({})",
                        entry.selected_at,
                        entry.artist,
                        entry.title,
                        year_label(entry.display_year),
                    );
                }
                println!(
                    "Page {}/{} ({} decided selections)",
                    history.page, history.total_pages, history.total
                );
            }
        }

        Command::Stats => {
            let conn = db::open(&db_path)?;
            let stats = library::stats(&conn)?;
            println!("Albums:          {}", stats.total_albums);
            println!("  excluded:      {}", stats.excluded);
            println!("  removed:       {}", stats.removed);
            println!("Ranked & owned:  {}", stats.ranked_owned);
            println!("Unique listened: {}", stats.unique_listened);
            println!("Total listens:   {}", stats.total_listens);
            println!("Total skips:     {}", stats.total_skips);
            println!(
                "Last collection sync: {}",
                stats.last_collection_sync.as_deref().unwrap_or("never")
            );
            println!(
                "Last Big Board sync:  {}",
                stats.last_board_sync.as_deref().unwrap_or("never")
            );
        }

        Command::Plays => {
            let conn = db::open(&db_path)?;
            let plays = library::listening_stats(&conn)?;
            if plays.is_empty() {
                println!("Nothing listened to yet.");
            }
            for entry in &plays {
                println!(
                    "{:3}x  {} — {} ({}){}",
                    entry.listen_count,
                    entry.artist,
                    entry.title,
                    year_label(entry.display_year),
                    rank_suffix(entry.rank),
                );
            }
        }

        Command::Board => {
            let conn = db::open(&db_path)?;
            for entry in library::board(&conn)? {
                let ownership = if entry.album_id.is_some() {
                    "owned".to_string()
                } else if let (Some(artist), Some(title)) = (&entry.via_artist, &entry.via_title) {
                    format!("via {artist} — {title}")
                } else {
                    "wanted".to_string()
                };
                println!(
                    "#{:3}  {} — {} ({})  [{ownership}]",
                    entry.rank,
                    entry.artist,
                    entry.title,
                    year_label(entry.year),
                );
            }
        }

        Command::Library { sort, desc } => {
            let conn = db::open(&db_path)?;
            let albums = library::library(&conn, library_sort(sort), desc)?;
            print_album_list(&albums);
            println!("{} albums", albums.len());
        }

        Command::Excluded => {
            let conn = db::open(&db_path)?;
            let albums = library::excluded_albums(&conn)?;
            if albums.is_empty() {
                println!("No albums are excluded.");
            } else {
                print_album_list(&albums);
            }
        }

        Command::Search { query } => {
            let conn = db::open(&db_path)?;
            let hits = library::search(&conn, &query)?;
            if hits.is_empty() {
                println!("No albums matched {query:?}.");
            } else {
                print_album_list(&hits);
            }
        }

        Command::Album { album_id, action } => {
            let conn = db::open(&db_path)?;
            run_album_command(&conn, album_id, action)?;
        }

        Command::BoardEdit {
            rank,
            artist,
            title,
            year,
            clear_year,
        } => {
            let conn = db::open(&db_path)?;
            let patch = EntryPatch {
                artist,
                title,
                year: if clear_year { Some(None) } else { year.map(Some) },
            };
            if !library::edit_entry(&conn, rank, &patch)? {
                bail!("Big Board entry not found.");
            }
            println!("Big Board entry updated.");
        }

        Command::BoardMatch { rank, album_id } => {
            let conn = db::open(&db_path)?;
            library::match_entry(&conn, rank, album_id)?;
            println!("Album matched to Big Board rank #{rank}.");
        }

        Command::BoardUnmatch { album_id } => {
            let conn = db::open(&db_path)?;
            if !library::unmatch_album(&conn, album_id)? {
                bail!("Album has no Big Board rank.");
            }
            println!("Big Board rank removed.");
        }

        Command::BoardVia { rank, album_id } => {
            let conn = db::open(&db_path)?;
            library::set_via(&conn, rank, album_id)?;
            match album_id {
                Some(_) => println!("Via album linked to Big Board rank #{rank}."),
                None => println!("Via album removed from Big Board rank #{rank}."),
            }
        }

        Command::Sync { source } => {
            run_sync(db_path, source)?;
        }

        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(&shell), &mut cmd);
        }
    }

    Ok(())
}

fn library_sort(sort: SortKey) -> LibrarySort {
    match sort {
        SortKey::Artist => LibrarySort::Artist,
        SortKey::Title => LibrarySort::Title,
        SortKey::Year => LibrarySort::DisplayYear,
        SortKey::ReleaseYear => LibrarySort::ReleaseYear,
    }
}

fn year_label(year: Option<i32>) -> String {
    year.map_or_else(|| "?".to_string(), |y| y.to_string())
}

fn rank_suffix(rank: Option<u32>) -> String {
    rank.map_or_else(String::new, |r| format!("  [Big Board #{r}]"))
}

fn print_selection(selection: &selector::Selection) {
    println!(
        "{} — {} ({})",
        selection.artist,
        selection.title,
        year_label(selection.display_year)
    );
    let genres = if selection.genres.is_empty() {
        "?".to_string()
    } else {
        selection.genres.join(", ")
    };
    let rank = selection
        .rank
        .map_or_else(|| "unranked".to_string(), |r| format!("#{r}"));
    println!(
        "   {genres} | Big Board: {rank} | Played: {}x",
        selection.times_played
    );
    if let Some(last) = &selection.last_played {
        println!("   Last played: {last}");
    }
    println!(
        "   album id {} — settle with `platter listened {}` or `platter skipped {}`",
        selection.album_id, selection.album_id, selection.album_id
    );
}

fn print_previous(listen: &library::PreviousListen) {
    println!(
        "{} — {} ({})",
        listen.artist,
        listen.title,
        year_label(listen.display_year)
    );
    let verdict = match (listen.did_listen, listen.skipped) {
        (false, false) => "pending",
        (true, _) => "listened",
        (_, true) => "skipped",
    };
    println!(
        "   album id {} | verdict: {verdict} | Played: {}x",
        listen.album_id, listen.times_played
    );
}

fn print_album_list(albums: &[library::LibraryAlbum]) {
    for album in albums {
        println!(
            "{:5}  {} — {} ({}){}",
            album.album_id,
            album.artist,
            album.title,
            year_label(album.display_year),
            rank_suffix(album.rank),
        );
    }
}

fn run_album_command(conn: &Connection, album_id: i64, action: Option<AlbumAction>) -> Result<()> {
    match action {
        None => {
            let detail = library::album_detail(conn, album_id)?.context("Album not found.")?;
            print_album_detail(&detail);
        }

        Some(AlbumAction::Dates) => {
            library::album_detail(conn, album_id)?.context("Album not found.")?;
            let dates = library::play_dates(conn, album_id)?;
            if dates.is_empty() {
                println!("No completed listens yet.");
            }
            for date in dates {
                println!("{date}");
            }
        }

        Some(AlbumAction::SetYear { year }) => {
            if !library::set_year_override(conn, album_id, year)? {
                bail!("Album not found.");
            }
            println!("Original release year updated.");
        }

        Some(AlbumAction::SetMaster { master_id }) => {
            let master = match master_id {
                None => None,
                Some(master_id) => {
                    // Best effort: the id is saved even when Discogs is
                    // unreachable or credentials are missing.
                    let detail = config::DiscogsSettings::from_env()
                        .client()
                        .ok()
                        .and_then(|client| client.fetch_master(master_id).ok())
                        .unwrap_or_default();
                    Some((master_id, detail))
                }
            };
            if !library::set_master(conn, album_id, master)? {
                bail!("Album not found.");
            }
            println!("Master release updated.");
        }

        Some(AlbumAction::SetRelease { release_id }) => {
            let client = config::DiscogsSettings::from_env().client()?;
            let detail = client
                .fetch_release(release_id)
                .context("Failed to fetch the release from Discogs.")?;
            if !library::set_release(conn, album_id, release_id, &detail)? {
                bail!("Album not found.");
            }
            println!("Discogs release updated.");
        }

        Some(AlbumAction::RefreshCover) => {
            let album = db::album_by_id(conn, album_id)?.context("Album not found.")?;
            let client = config::DiscogsSettings::from_env().client()?;
            let detail = client
                .fetch_release(album.discogs_release_id)
                .context("Failed to fetch the release from Discogs.")?;
            let cover = detail
                .cover_image_url
                .context("No cover image found on release.")?;
            library::set_cover(conn, album_id, &cover)?;
            println!("Cover image refreshed from release.");
        }
    }
    Ok(())
}

fn print_album_detail(detail: &library::AlbumDetail) {
    let album = &detail.album;
    println!(
        "{} — {} ({})",
        album.artist,
        album.title,
        year_label(detail.display_year)
    );
    println!("   album id:     {}", album.id);
    println!("   release year: {}", year_label(album.release_year));
    println!("   master year:  {}", year_label(album.master_year));
    if let Some(override_year) = album.master_year_override {
        println!("   year override: {override_year}");
    }
    if let Some(rank) = detail.rank {
        println!(
            "   Big Board:    #{rank} ({})",
            year_label(detail.board_year)
        );
    }
    if !album.genres.is_empty() {
        println!("   genres:       {}", album.genres.join(", "));
    }
    if !album.styles.is_empty() {
        println!("   styles:       {}", album.styles.join(", "));
    }
    if let Some(format) = &album.format {
        println!("   format:       {format}");
    }
    println!(
        "   played {}x, skipped {}x",
        detail.times_played, detail.times_skipped
    );
    if let Some(url) = &album.discogs_url {
        println!("   {url}");
    }
    if let Some(url) = &album.master_url {
        println!("   {url}");
    }
    if album.is_excluded {
        println!("   (excluded from selection)");
    }
    if album.is_removed {
        println!("   (no longer in the source collection)");
    }
}

/// Kick off a sync on the worker thread and render its progress until it
/// releases the slot.
fn run_sync(db_path: PathBuf, source: SyncSource) -> Result<()> {
    let coordinator = sync::coordinator();

    let handle = match source {
        SyncSource::Collection => {
            let client = config::DiscogsSettings::from_env().client()?;
            let path = db_path.clone();
            sync::run_in_background(coordinator, SyncKind::Collection, move |sink| {
                let mut conn = db::open(&path)?;
                let report =
                    sync::sync_collection(&mut conn, &client, &SyncPacing::default(), sink)?;
                Ok(format!(
                    "Sync complete! Added {}, updated {}, removed {} ({} releases fetched).",
                    report.added, report.updated, report.removed, report.total_fetched
                ))
            })?
        }

        SyncSource::Board { csv } => {
            let csv = match csv {
                Some(path) => path,
                None => config::board_csv_path()?,
            };
            let path = db_path.clone();
            sync::run_in_background(coordinator, SyncKind::BigBoard, move |sink| {
                let mut conn = db::open(&path)?;
                let report = bigboard::import_board(&mut conn, &csv, sink)?;
                Ok(render_board_report(&report))
            })?
        }

        SyncSource::MasterYears { batch } => {
            let client = config::DiscogsSettings::from_env().client()?;
            let path = db_path.clone();
            sync::run_in_background(coordinator, SyncKind::MasterYears, move |sink| {
                let mut conn = db::open(&path)?;
                let report = sync::sync_master_years(
                    &mut conn,
                    &client,
                    &SyncPacing::default(),
                    batch,
                    sink,
                )?;
                Ok(format!(
                    "Master year sync complete! Fetched {}, {} errors, {} remaining.",
                    report.fetched, report.errors, report.remaining
                ))
            })?
        }
    };

    watch_sync(handle)
}

fn render_board_report(report: &bigboard::BoardSyncReport) -> String {
    let mut out = format!(
        "Big Board import complete! Matched {}/{} entries, {} unmatched.",
        report.matched,
        report.total_entries,
        report.unmatched_count()
    );
    for miss in &report.unmatched {
        let owned_tag = if miss.owned { " [OWNED]" } else { "" };
        let closest = miss
            .best_match
            .as_deref()
            .map(|best| format!(" (closest: {best}, score={})", miss.best_match_score))
            .unwrap_or_default();
        out.push_str(&format!(
            "\n  #{:3}: {} — {} ({}){owned_tag}{closest}",
            miss.rank,
            miss.artist,
            miss.title,
            year_label(miss.year),
        ));
    }
    out
}

/// Poll the shared status record and echo progress lines as they change.
fn watch_sync(handle: thread::JoinHandle<()>) -> Result<()> {
    let coordinator = sync::coordinator();
    let mut last_message = String::new();

    loop {
        let status = coordinator.status();
        if status.message != last_message && !status.message.is_empty() {
            println!("{}", status.message);
            last_message = status.message.clone();
        }
        if !status.running {
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }

    handle
        .join()
        .map_err(|_| anyhow!("sync worker panicked"))?;

    let status = coordinator.status();
    if status.message != last_message && !status.message.is_empty() {
        println!("{}", status.message);
    }
    info!("sync finished");
    Ok(())
}
