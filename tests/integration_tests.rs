//! # Integration Tests for Platter
//!
//! End-to-end flows against a real on-disk database: sync a canned
//! collection in, reconcile a Big Board list, pick an album, settle the
//! verdict, and read it all back.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::Connection;
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

use platter::bigboard::{self, BoardRow};
use platter::db::{self, NewAlbum};
use platter::discogs::{
    ArtistCredit, BasicInformation, CollectionItem, CollectionPage, DiscogsError, FormatInfo,
    Pagination, ReleaseDetail,
};
use platter::library::{self, LibrarySort};
use platter::selector::{self, SelectionContext};
use platter::sync::{self, NullSink, ReleaseSource, SyncKind, SyncPacing};

/// Test helper: a fresh database in a temp directory.
fn create_test_database() -> Result<(TempDir, Connection)> {
    let temp_dir = TempDir::new()?;
    let conn = db::open(&temp_dir.path().join("test_collection.db"))?;
    Ok((temp_dir, conn))
}

fn seed_album(
    conn: &Connection,
    release_id: i64,
    artist: &str,
    title: &str,
    year: i32,
    genres: &[&str],
) -> i64 {
    db::insert_album(
        conn,
        &NewAlbum {
            discogs_release_id: release_id,
            discogs_master_id: None,
            artist: artist.to_string(),
            title: title.to_string(),
            release_year: Some(year),
            cover_image_url: None,
            genres: genres.iter().map(|g| g.to_string()).collect(),
            styles: vec![],
            format: Some("Vinyl".to_string()),
            discogs_url: format!("https://www.discogs.com/release/{release_id}"),
            master_url: None,
        },
    )
    .expect("insert album")
}

fn collection_item(id: i64, master_id: Option<i64>, artist: &str, title: &str) -> CollectionItem {
    CollectionItem {
        basic_information: BasicInformation {
            id,
            master_id,
            title: title.to_string(),
            year: Some(1971),
            cover_image: Some(format!("https://img.discogs.com/{id}.jpg")),
            thumb: None,
            genres: vec!["Rock".to_string()],
            styles: vec!["Krautrock".to_string()],
            artists: vec![ArtistCredit {
                name: artist.to_string(),
            }],
            formats: vec![FormatInfo {
                name: "Vinyl".to_string(),
            }],
        },
    }
}

/// Canned collection source with scripted pages.
struct ScriptedSource {
    pages: Vec<Vec<CollectionItem>>,
    master_year: Option<i32>,
}

impl ReleaseSource for ScriptedSource {
    fn collection_page(&self, page: u32, _per_page: u32) -> Result<CollectionPage, DiscogsError> {
        let releases = self
            .pages
            .get((page - 1) as usize)
            .cloned()
            .unwrap_or_default();
        Ok(CollectionPage {
            pagination: Some(Pagination {
                pages: self.pages.len().max(1) as u32,
            }),
            releases,
        })
    }

    fn master_detail(&self, _master_id: i64) -> Result<ReleaseDetail, DiscogsError> {
        Ok(ReleaseDetail {
            year: self.master_year,
            cover_image_url: None,
        })
    }
}

fn fast_pacing() -> SyncPacing {
    SyncPacing {
        delay: Duration::from_millis(0),
        rate_limit_backoff: Duration::from_millis(0),
    }
}

mod selection_flow {
    use super::*;

    #[test]
    fn pick_settle_and_read_back() -> Result<()> {
        let (_tmp, conn) = create_test_database()?;
        let a = seed_album(&conn, 1, "Miles Davis", "Kind Of Blue", 1959, &["Jazz"]);
        seed_album(&conn, 2, "Can", "Future Days", 1973, &["Rock"]);
        conn.execute(
            "INSERT INTO big_board_entries (rank, artist, title, year, album_id)
             VALUES (1, 'Miles Davis', 'Kind Of Blue', 1959, ?1)",
            [a],
        )?;

        let mut rng = StdRng::seed_from_u64(42);
        let selection = selector::select_next_with_rng(
            &conn,
            Utc::now(),
            &SelectionContext::default(),
            &mut rng,
        )?
        .expect("two eligible albums");

        // The pick exists as a pending history entry.
        let pending = db::last_listen(&conn, selection.album_id, None)?.unwrap();
        assert_eq!(pending.id, selection.listen_id);
        assert!(!pending.did_listen && !pending.skipped);

        // Pending selections stay out of the decided history.
        assert_eq!(library::history(&conn, 1, 20)?.total, 0);

        assert!(library::mark_listened(&conn, selection.album_id)?);
        let history = library::history(&conn, 1, 20)?;
        assert_eq!(history.total, 1);
        assert!(history.entries[0].did_listen);
        assert_eq!(history.entries[0].album_id, selection.album_id);

        let stats = library::stats(&conn)?;
        assert_eq!(stats.total_listens, 1);
        assert_eq!(stats.unique_listened, 1);

        Ok(())
    }

    #[test]
    fn empty_collection_is_an_absence_not_an_error() -> Result<()> {
        let (_tmp, conn) = create_test_database()?;
        let mut rng = StdRng::seed_from_u64(42);
        let result = selector::select_next_with_rng(
            &conn,
            Utc::now(),
            &SelectionContext::default(),
            &mut rng,
        )?;
        assert!(result.is_none());
        Ok(())
    }

    #[test]
    fn excluding_everything_empties_the_pool() -> Result<()> {
        let (_tmp, conn) = create_test_database()?;
        let a = seed_album(&conn, 1, "Can", "Tago Mago", 1971, &["Rock"]);
        library::exclude(&conn, a)?;

        let mut rng = StdRng::seed_from_u64(42);
        let result = selector::select_next_with_rng(
            &conn,
            Utc::now(),
            &SelectionContext::default(),
            &mut rng,
        )?;
        assert!(result.is_none());

        library::include(&conn, a)?;
        let result = selector::select_next_with_rng(
            &conn,
            Utc::now(),
            &SelectionContext::default(),
            &mut rng,
        )?;
        assert_eq!(result.unwrap().album_id, a);
        Ok(())
    }

    #[test]
    fn repeated_weighting_is_reproducible_on_disk() -> Result<()> {
        let (_tmp, conn) = create_test_database()?;
        let a = seed_album(&conn, 1, "Miles Davis", "Kind Of Blue", 1959, &["Jazz"]);
        seed_album(&conn, 2, "Can", "Future Days", 1973, &["Rock"]);
        db::record_listen(&conn, a, Utc::now() - ChronoDuration::days(2))?;

        let now = Utc::now();
        let ctx = SelectionContext::default();
        let first = selector::calculate_weights(&conn, now, &ctx)?;
        let second = selector::calculate_weights(&conn, now, &ctx)?;
        for (x, y) in first.iter().zip(second.iter()) {
            assert_eq!(x.weight.to_bits(), y.weight.to_bits());
        }
        Ok(())
    }
}

mod board_flow {
    use super::*;

    #[test]
    fn csv_import_matches_and_reports() -> Result<()> {
        let (_tmp, mut conn) = create_test_database()?;
        seed_album(&conn, 1, "Miles Davis", "Kind Of Blue", 1959, &["Jazz"]);
        seed_album(&conn, 2, "The Beatles", "Abbey Road", 1969, &["Rock"]);

        let mut csv = tempfile::NamedTempFile::new()?;
        writeln!(csv, "Davis, Miles,Kind of Blue,1959,x")?;
        writeln!(csv, "Beatles,Abbey Road,1969,x")?;
        writeln!(csv, "Unknown Artist X,Totally Different Title,2020,")?;
        csv.flush()?;

        let report = bigboard::import_board(&mut conn, csv.path(), &NullSink)?;
        assert_eq!(report.total_entries, 3);
        assert_eq!(report.matched, 2);
        assert_eq!(report.unmatched_count(), 1);
        assert_eq!(report.unmatched[0].rank, 3);

        let entries = db::board_entries(&conn)?;
        assert_eq!(entries.len(), 3);
        assert!(entries[0].album_id.is_some());
        assert!(entries[1].album_id.is_some());
        assert!(entries[2].album_id.is_none());

        // The board view resolves ownership.
        let board = library::board(&conn)?;
        assert!(board[0].owned);
        assert!(!board[2].owned);
        Ok(())
    }

    #[test]
    fn manual_corrections_survive_the_next_import() -> Result<()> {
        let (_tmp, mut conn) = create_test_database()?;
        let owned = seed_album(&conn, 1, "Miles Davis", "Kind Of Blue", 1959, &["Jazz"]);

        let rows = vec![
            BoardRow {
                rank: 1,
                artist: "Miles Davis".to_string(),
                title: "Kind Of Blue".to_string(),
                year: Some(1959),
                owned: true,
            },
            BoardRow {
                rank: 2,
                artist: "The Standells".to_string(),
                title: "Dirty Water".to_string(),
                year: Some(1966),
                owned: false,
            },
        ];
        bigboard::sync_big_board(&mut conn, &rows, &NullSink)?;

        // Manual edit, manual match, and a via link.
        library::edit_entry(
            &conn,
            2,
            &db::EntryPatch {
                year: Some(Some(1965)),
                ..db::EntryPatch::default()
            },
        )?;
        library::set_via(&conn, 2, Some(owned))?;

        let report = bigboard::sync_big_board(&mut conn, &rows, &NullSink)?;
        assert_eq!(report.total_entries, 2);

        let entry = db::entry_by_rank(&conn, 2)?.unwrap();
        assert_eq!(entry.year, Some(1965));
        assert_eq!(entry.via_album_id, Some(owned));
        Ok(())
    }
}

mod sync_flow {
    use super::*;

    #[test]
    fn full_pipeline_sync_reconcile_select() -> Result<()> {
        let (_tmp, mut conn) = create_test_database()?;

        // Two pages of collection data.
        let source = ScriptedSource {
            pages: vec![
                vec![
                    collection_item(1, Some(10), "Can", "Tago Mago"),
                    collection_item(2, None, "Faust", "Faust IV"),
                ],
                vec![collection_item(3, Some(30), "Neu!", "Neu! 75")],
            ],
            master_year: Some(1971),
        };
        let report = sync::sync_collection(&mut conn, &source, &fast_pacing(), &NullSink)?;
        assert_eq!(report.added, 3);
        assert_eq!(report.total_fetched, 3);

        // Backfill master years for the two albums that have a master id.
        let years = sync::sync_master_years(&mut conn, &source, &fast_pacing(), 0, &NullSink)?;
        assert_eq!(years.fetched, 2);

        // Reconcile a ranking, then pick.
        let rows = vec![BoardRow {
            rank: 1,
            artist: "Can".to_string(),
            title: "Tago Mago".to_string(),
            year: Some(1971),
            owned: true,
        }];
        let board_report = bigboard::sync_big_board(&mut conn, &rows, &NullSink)?;
        assert_eq!(board_report.matched, 1);

        let mut rng = StdRng::seed_from_u64(1);
        let selection = selector::select_next_with_rng(
            &conn,
            Utc::now(),
            &SelectionContext::default(),
            &mut rng,
        )?
        .expect("three eligible albums");
        assert!(selection.listen_id > 0);

        // Every sync left an audit row.
        assert!(db::last_sync_time(&conn, "discogs")?.is_some());
        assert!(db::last_sync_time(&conn, "big_board")?.is_some());
        Ok(())
    }

    #[test]
    fn vanished_releases_are_soft_removed_but_keep_history() -> Result<()> {
        let (_tmp, mut conn) = create_test_database()?;
        let source = ScriptedSource {
            pages: vec![vec![
                collection_item(1, None, "Can", "Tago Mago"),
                collection_item(2, None, "Faust", "Faust IV"),
            ]],
            master_year: None,
        };
        sync::sync_collection(&mut conn, &source, &fast_pacing(), &NullSink)?;

        let faust = db::album_by_release_id(&conn, 2)?.unwrap();
        db::record_listen(&conn, faust.id, Utc::now())?;
        library::mark_listened(&conn, faust.id)?;

        let source = ScriptedSource {
            pages: vec![vec![collection_item(1, None, "Can", "Tago Mago")]],
            master_year: None,
        };
        let report = sync::sync_collection(&mut conn, &source, &fast_pacing(), &NullSink)?;
        assert_eq!(report.removed, 1);

        let faust = db::album_by_release_id(&conn, 2)?.unwrap();
        assert!(faust.is_removed);
        assert_eq!(db::listen_count(&conn, faust.id)?, 1);

        // Removed albums are out of the selection pool and the library view.
        assert!(selector::eligible_candidates(&conn)?
            .iter()
            .all(|c| c.album_id != faust.id));
        assert!(library::library(&conn, LibrarySort::Artist, false)?
            .iter()
            .all(|a| a.album_id != faust.id));
        Ok(())
    }

    #[test]
    fn concurrent_sync_requests_conflict() {
        let coordinator = sync::SyncCoordinator::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let handle = sync::run_in_background(&coordinator, SyncKind::Collection, move |sink| {
            sink.report("holding the slot", 0, 0);
            release_rx.recv().ok();
            Ok("Done!".to_string())
        })
        .expect("first sync claims the slot");

        // Wait until the worker has reported in.
        for _ in 0..50 {
            if coordinator.status().message == "holding the slot" {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let conflict = sync::run_in_background(&coordinator, SyncKind::BigBoard, |_| {
            Ok(String::new())
        });
        assert!(conflict.is_err(), "second sync must be rejected, not queued");

        release_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(!coordinator.status().running);
    }
}

mod cli_tests {
    use std::process::Command;

    #[test]
    fn help_lists_the_main_commands() {
        let output = Command::new("cargo")
            .args(["run", "--quiet", "--", "--help"])
            .output()
            .expect("failed to run help command");

        let stdout = String::from_utf8_lossy(&output.stdout);
        for command in ["next", "listened", "skipped", "board", "library", "sync"] {
            assert!(stdout.contains(command), "help is missing `{command}`");
        }
    }

    #[test]
    fn version_flag_reports_the_crate() {
        let output = Command::new("cargo")
            .args(["run", "--quiet", "--", "--version"])
            .output()
            .expect("failed to run version command");

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("platter"));
    }
}
