//! # Sync Coordination
//!
//! One long-running sync (collection sync, Big Board reconciliation, or
//! master-year backfill) may be active at a time. The coordinator is a
//! single-slot primitive: starting is a compare-and-set against the idle
//! state, a second start fails immediately with a conflict, and the running
//! task is the only writer of the shared status record. Callers poll the
//! status through a read-only snapshot while the work runs on a worker
//! thread.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::{error, info, warn};
use rusqlite::Connection;

use crate::db::{self, AlbumPatch};
use crate::discogs::{self, CollectionPage, DiscogsClient, DiscogsError, ReleaseDetail};

/// Observational progress reporting; nothing flows back to the engine.
pub trait ProgressSink: Sync {
    fn report(&self, message: &str, current: u64, total: u64);
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _message: &str, _current: u64, _total: u64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Collection,
    BigBoard,
    MasterYears,
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncKind::Collection => write!(f, "collection"),
            SyncKind::BigBoard => write!(f, "Big Board"),
            SyncKind::MasterYears => write!(f, "master year"),
        }
    }
}

/// The shared status record: written only by the running task, read by
/// anyone polling.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub running: bool,
    pub kind: Option<SyncKind>,
    pub message: String,
    pub current: u64,
    pub total: u64,
}

/// Single-slot coordinator guarding the status record.
#[derive(Clone, Default)]
pub struct SyncCoordinator {
    inner: Arc<Mutex<SyncStatus>>,
}

fn lock_status(inner: &Mutex<SyncStatus>) -> MutexGuard<'_, SyncStatus> {
    // A panicked sync worker must not wedge the status record for the rest
    // of the process.
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SyncCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only snapshot of the current status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        lock_status(&self.inner).clone()
    }

    /// Claim the slot for a new sync. Fails immediately with a conflict when
    /// another sync is active; requests are never queued.
    pub fn try_begin(&self, kind: SyncKind) -> Result<SyncTicket> {
        let mut status = lock_status(&self.inner);
        if status.running {
            let active = status.kind.map_or_else(|| "sync".to_string(), |k| k.to_string());
            bail!("A {active} sync is already in progress.");
        }
        *status = SyncStatus {
            running: true,
            kind: Some(kind),
            message: format!("Starting {kind} sync..."),
            current: 0,
            total: 0,
        };
        Ok(SyncTicket {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Exclusive hold on the sync slot. Reports progress into the shared status
/// and releases the slot when finished or dropped.
pub struct SyncTicket {
    inner: Arc<Mutex<SyncStatus>>,
}

impl ProgressSink for SyncTicket {
    fn report(&self, message: &str, current: u64, total: u64) {
        let mut status = lock_status(&self.inner);
        status.message = message.to_string();
        status.current = current;
        status.total = total;
    }
}

impl SyncTicket {
    /// Release the slot, leaving a final message behind.
    pub fn finish(self, message: &str) {
        let mut status = lock_status(&self.inner);
        status.message = message.to_string();
        // The guard must be released before Drop re-locks to clear `running`.
        drop(status);
    }
}

impl Drop for SyncTicket {
    fn drop(&mut self) {
        lock_status(&self.inner).running = false;
    }
}

lazy_static! {
    /// Process-wide sync slot.
    static ref GLOBAL_COORDINATOR: SyncCoordinator = SyncCoordinator::new();
}

#[must_use]
pub fn coordinator() -> &'static SyncCoordinator {
    &GLOBAL_COORDINATOR
}

/// Run a sync job on a worker thread under the coordinator. Returns as soon
/// as the slot is claimed; the caller polls [`SyncCoordinator::status`].
pub fn run_in_background<F>(
    coordinator: &SyncCoordinator,
    kind: SyncKind,
    job: F,
) -> Result<JoinHandle<()>>
where
    F: FnOnce(&dyn ProgressSink) -> Result<String> + Send + 'static,
{
    let ticket = coordinator.try_begin(kind)?;
    let handle = thread::Builder::new()
        .name(format!("sync-{kind}").replace(' ', "-").to_lowercase())
        .spawn(move || match job(&ticket) {
            Ok(message) => {
                info!("{kind} sync finished: {message}");
                ticket.finish(&message);
            }
            Err(err) => {
                error!("{kind} sync failed: {err:#}");
                ticket.finish(&format!("Error: {err:#}"));
            }
        })
        .context("failed to spawn sync worker")?;
    Ok(handle)
}

/// The external collection collaborator, seen through the narrow interface
/// the sync drivers need.
pub trait ReleaseSource: Sync {
    fn collection_page(&self, page: u32, per_page: u32) -> Result<CollectionPage, DiscogsError>;
    fn master_detail(&self, master_id: i64) -> Result<ReleaseDetail, DiscogsError>;
}

impl ReleaseSource for DiscogsClient {
    fn collection_page(&self, page: u32, per_page: u32) -> Result<CollectionPage, DiscogsError> {
        self.fetch_collection_page(page, per_page)
    }

    fn master_detail(&self, master_id: i64) -> Result<ReleaseDetail, DiscogsError> {
        self.fetch_master(master_id)
    }
}

/// Fixed inter-call delay and the single bounded backoff on rate limits.
#[derive(Debug, Clone)]
pub struct SyncPacing {
    pub delay: Duration,
    pub rate_limit_backoff: Duration,
}

impl Default for SyncPacing {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(60),
        }
    }
}

const PAGE_SIZE: u32 = 100;
const COMMIT_EVERY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub total_fetched: usize,
}

/// Walk the full remote collection and upsert it into the store. Albums
/// that disappeared from the source are soft-removed. The whole run is one
/// transaction: an API or connectivity failure rolls it back.
pub fn sync_collection(
    conn: &mut Connection,
    source: &dyn ReleaseSource,
    pacing: &SyncPacing,
    sink: &dyn ProgressSink,
) -> Result<CollectionSyncReport> {
    let existing = db::active_release_ids(conn)?;
    let tx = conn.transaction()?;

    let mut fetched: HashSet<i64> = HashSet::new();
    let mut added = 0usize;
    let mut updated = 0usize;
    let mut page = 1u32;
    let mut total_pages: Option<u32> = None;

    loop {
        match total_pages {
            Some(pages) => sink.report(
                &format!("Fetching page {page} of {pages}..."),
                u64::from(page),
                u64::from(pages),
            ),
            None => sink.report(&format!("Fetching page {page}..."), u64::from(page), 0),
        }

        let data = source
            .collection_page(page, PAGE_SIZE)
            .context("Discogs collection sync aborted")?;
        total_pages = Some(data.total_pages());

        if data.releases.is_empty() {
            break;
        }

        for item in &data.releases {
            let release = discogs::parse_release(&item.basic_information);
            fetched.insert(release.discogs_release_id);

            match db::album_by_release_id(&tx, release.discogs_release_id)? {
                None => {
                    db::insert_album(&tx, &release)?;
                    added += 1;
                }
                Some(album) => {
                    let mut patch = AlbumPatch {
                        artist: Some(release.artist.clone()),
                        title: Some(release.title.clone()),
                        release_year: Some(release.release_year),
                        cover_image_url: Some(release.cover_image_url.clone()),
                        genres: Some(release.genres.clone()),
                        styles: Some(release.styles.clone()),
                        format: Some(release.format.clone()),
                        discogs_url: Some(release.discogs_url.clone()),
                        is_removed: Some(false),
                        ..AlbumPatch::default()
                    };
                    // A manual master override survives the sync.
                    if album.master_id_override.is_none() {
                        patch.discogs_master_id = Some(release.discogs_master_id);
                        patch.master_url = Some(release.master_url.clone());
                    }
                    db::update_album_by_release(&tx, release.discogs_release_id, &patch)?;
                    updated += 1;
                }
            }
        }

        if page >= total_pages.unwrap_or(1) {
            break;
        }
        page += 1;
        thread::sleep(pacing.delay);
    }

    let missing: Vec<i64> = existing.difference(&fetched).copied().collect();
    let removed = db::soft_remove_releases(&tx, &missing)?;

    db::log_sync(&tx, "discogs", added, updated, removed, None)?;
    tx.commit()?;

    let report = CollectionSyncReport {
        added,
        updated,
        removed,
        total_fetched: fetched.len(),
    };
    info!(
        "collection sync: added {added}, updated {updated}, removed {removed}, fetched {}",
        report.total_fetched
    );
    sink.report(
        &format!("Done! Added {added}, updated {updated}, removed {removed}."),
        u64::from(total_pages.unwrap_or(1)),
        u64::from(total_pages.unwrap_or(1)),
    );
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterYearReport {
    pub fetched: usize,
    pub errors: usize,
    pub remaining: usize,
}

/// Backfill master (original-issue) years for albums that have a master id
/// but no year yet. Commits every few records so partial progress survives
/// a later failure; a rate limit gets one fixed wait and one retry, then
/// counts as an error.
pub fn sync_master_years(
    conn: &mut Connection,
    source: &dyn ReleaseSource,
    pacing: &SyncPacing,
    batch_size: usize,
    sink: &dyn ProgressSink,
) -> Result<MasterYearReport> {
    let pending: Vec<(i64, i64)> = {
        let mut stmt = conn.prepare(
            "SELECT id, discogs_master_id FROM albums
             WHERE discogs_master_id IS NOT NULL
               AND master_year IS NULL
               AND is_removed = 0
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let total = pending.len();
    let batch: &[(i64, i64)] = if batch_size > 0 {
        &pending[..batch_size.min(total)]
    } else {
        &pending
    };
    let to_fetch = batch.len();

    sink.report(
        &format!("Fetching master years for {to_fetch} of {total} albums..."),
        0,
        to_fetch as u64,
    );

    let mut fetched = 0usize;
    let mut errors = 0usize;
    let mut tx = conn.transaction()?;

    for (album_id, master_id) in batch {
        match fetch_master_year(source, *master_id, pacing, sink, fetched, to_fetch) {
            Ok(year) => {
                if let Some(year) = year {
                    db::update_album(
                        &tx,
                        *album_id,
                        &AlbumPatch {
                            master_year: Some(Some(year)),
                            ..AlbumPatch::default()
                        },
                    )?;
                }
                fetched += 1;
            }
            Err(err) => {
                warn!("master year fetch failed for master {master_id}: {err}");
                errors += 1;
            }
        }

        // Commit every few records so progress isn't lost on failure.
        if fetched % COMMIT_EVERY == 0 && fetched > 0 {
            tx.commit()?;
            tx = conn.transaction()?;
        }
        if fetched % 10 == 0 && fetched > 0 {
            sink.report(
                &format!("Fetched {fetched}/{to_fetch} master years..."),
                fetched as u64,
                to_fetch as u64,
            );
        }

        thread::sleep(pacing.delay);
    }

    tx.commit()?;

    let remaining = total - fetched;
    let report = MasterYearReport {
        fetched,
        errors,
        remaining,
    };
    info!("master year sync: fetched {fetched}, {errors} errors, {remaining} remaining");
    sink.report(
        &format!("Done! Fetched {fetched} master years ({errors} errors, {remaining} remaining)."),
        to_fetch as u64,
        to_fetch as u64,
    );
    Ok(report)
}

/// One master-year fetch. A missing master reads as "no year"; a rate limit
/// waits once and retries once.
fn fetch_master_year(
    source: &dyn ReleaseSource,
    master_id: i64,
    pacing: &SyncPacing,
    sink: &dyn ProgressSink,
    fetched: usize,
    to_fetch: usize,
) -> Result<Option<i32>, DiscogsError> {
    match source.master_detail(master_id) {
        Ok(detail) => Ok(detail.year),
        Err(DiscogsError::NotFound) => Ok(None),
        Err(DiscogsError::RateLimited) => {
            sink.report(
                &format!(
                    "Rate limited, waiting {}s...",
                    pacing.rate_limit_backoff.as_secs()
                ),
                fetched as u64,
                to_fetch as u64,
            );
            thread::sleep(pacing.rate_limit_backoff);
            match source.master_detail(master_id) {
                Ok(detail) => Ok(detail.year),
                Err(DiscogsError::NotFound) => Ok(None),
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::discogs::{BasicInformation, CollectionItem};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn item(id: i64, master_id: Option<i64>, artist: &str, title: &str) -> CollectionItem {
        let info: BasicInformation = serde_json::from_value(serde_json::json!({
            "id": id,
            "master_id": master_id,
            "title": title,
            "year": 1970,
            "artists": [{"name": artist}],
            "genres": ["Jazz"],
            "formats": [{"name": "Vinyl"}]
        }))
        .unwrap();
        CollectionItem {
            basic_information: info,
        }
    }

    /// Canned collection source: one page of items plus scripted master
    /// responses.
    struct FakeSource {
        items: Vec<CollectionItem>,
        master_year: Option<i32>,
        rate_limit_first: AtomicUsize,
        master_calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(items: Vec<CollectionItem>) -> Self {
            Self {
                items,
                master_year: Some(1959),
                rate_limit_first: AtomicUsize::new(0),
                master_calls: AtomicUsize::new(0),
            }
        }
    }

    impl ReleaseSource for FakeSource {
        fn collection_page(
            &self,
            page: u32,
            _per_page: u32,
        ) -> Result<CollectionPage, DiscogsError> {
            let releases = if page == 1 { self.items.clone() } else { vec![] };
            Ok(CollectionPage {
                pagination: None,
                releases,
            })
        }

        fn master_detail(&self, _master_id: i64) -> Result<ReleaseDetail, DiscogsError> {
            self.master_calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limit_first.load(Ordering::SeqCst) > 0 {
                self.rate_limit_first.fetch_sub(1, Ordering::SeqCst);
                return Err(DiscogsError::RateLimited);
            }
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

    #[test]
    fn coordinator_rejects_concurrent_syncs() {
        let coordinator = SyncCoordinator::new();
        let ticket = coordinator.try_begin(SyncKind::Collection).unwrap();

        let err = match coordinator.try_begin(SyncKind::BigBoard) {
            Ok(_) => panic!("second sync must be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("already in progress"));

        ticket.finish("Done!");
        let status = coordinator.status();
        assert!(!status.running);
        assert_eq!(status.message, "Done!");

        // Idle again, so the slot can be claimed.
        assert!(coordinator.try_begin(SyncKind::BigBoard).is_ok());
    }

    #[test]
    fn ticket_reports_into_status() {
        let coordinator = SyncCoordinator::new();
        let ticket = coordinator.try_begin(SyncKind::MasterYears).unwrap();
        ticket.report("Fetching 3 of 9...", 3, 9);

        let status = coordinator.status();
        assert!(status.running);
        assert_eq!(status.kind, Some(SyncKind::MasterYears));
        assert_eq!(status.message, "Fetching 3 of 9...");
        assert_eq!((status.current, status.total), (3, 9));
    }

    #[test]
    fn background_job_releases_slot_when_done() {
        let coordinator = SyncCoordinator::new();
        let handle = run_in_background(&coordinator, SyncKind::Collection, |sink| {
            sink.report("working", 1, 2);
            Ok("Done! All good.".to_string())
        })
        .unwrap();
        handle.join().expect("worker thread");

        let status = coordinator.status();
        assert!(!status.running);
        assert_eq!(status.message, "Done! All good.");
    }

    #[test]
    fn background_job_failure_reports_error_and_releases_slot() {
        let coordinator = SyncCoordinator::new();
        let handle = run_in_background(&coordinator, SyncKind::Collection, |_sink| {
            anyhow::bail!("boom")
        })
        .unwrap();
        handle.join().expect("worker thread");

        let status = coordinator.status();
        assert!(!status.running);
        assert!(status.message.starts_with("Error:"), "{}", status.message);
    }

    #[test]
    fn collection_sync_adds_updates_and_removes() {
        let mut conn = open_in_memory();
        let source = FakeSource::new(vec![
            item(1, Some(10), "Miles Davis", "Kind Of Blue"),
            item(2, None, "Can", "Future Days"),
        ]);
        let report =
            sync_collection(&mut conn, &source, &fast_pacing(), &NullSink).unwrap();
        assert_eq!((report.added, report.updated, report.removed), (2, 0, 0));

        // Second run with one release gone and one changed.
        let source = FakeSource::new(vec![item(1, Some(10), "Miles Davis", "Kind Of Blue (Reissue)")]);
        let report =
            sync_collection(&mut conn, &source, &fast_pacing(), &NullSink).unwrap();
        assert_eq!((report.added, report.updated, report.removed), (0, 1, 1));

        let kept = db::album_by_release_id(&conn, 1).unwrap().unwrap();
        assert_eq!(kept.title, "Kind Of Blue (Reissue)");
        assert!(!kept.is_removed);
        let gone = db::album_by_release_id(&conn, 2).unwrap().unwrap();
        assert!(gone.is_removed);

        assert!(db::last_sync_time(&conn, "discogs").unwrap().is_some());
    }

    #[test]
    fn collection_sync_respects_master_override() {
        let mut conn = open_in_memory();
        let source = FakeSource::new(vec![item(1, Some(10), "Miles Davis", "Kind Of Blue")]);
        sync_collection(&mut conn, &source, &fast_pacing(), &NullSink).unwrap();

        let album = db::album_by_release_id(&conn, 1).unwrap().unwrap();
        db::update_album(
            &conn,
            album.id,
            &AlbumPatch {
                master_id_override: Some(Some(999)),
                discogs_master_id: Some(Some(999)),
                master_url: Some(Some("https://www.discogs.com/master/999".to_string())),
                ..AlbumPatch::default()
            },
        )
        .unwrap();

        // The source still reports master 10; the override must win.
        let source = FakeSource::new(vec![item(1, Some(10), "Miles Davis", "Kind Of Blue")]);
        sync_collection(&mut conn, &source, &fast_pacing(), &NullSink).unwrap();

        let album = db::album_by_release_id(&conn, 1).unwrap().unwrap();
        assert_eq!(album.discogs_master_id, Some(999));
        assert_eq!(
            album.master_url.as_deref(),
            Some("https://www.discogs.com/master/999")
        );
    }

    #[test]
    fn sync_failure_rolls_back_cleanly() {
        struct BrokenSource;
        impl ReleaseSource for BrokenSource {
            fn collection_page(
                &self,
                _page: u32,
                _per_page: u32,
            ) -> Result<CollectionPage, DiscogsError> {
                Err(DiscogsError::Http(500))
            }
            fn master_detail(&self, _master_id: i64) -> Result<ReleaseDetail, DiscogsError> {
                Err(DiscogsError::Http(500))
            }
        }

        let mut conn = open_in_memory();
        let err = sync_collection(&mut conn, &BrokenSource, &fast_pacing(), &NullSink)
            .expect_err("HTTP failure aborts the run");
        assert!(format!("{err:#}").contains("HTTP 500"));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM albums", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(db::last_sync_time(&conn, "discogs").unwrap().is_none());
    }

    #[test]
    fn master_year_backfill_fills_only_missing_years() {
        let mut conn = open_in_memory();
        let source = FakeSource::new(vec![
            item(1, Some(10), "Miles Davis", "Kind Of Blue"),
            item(2, None, "Can", "Future Days"),
        ]);
        sync_collection(&mut conn, &source, &fast_pacing(), &NullSink).unwrap();

        let report =
            sync_master_years(&mut conn, &source, &fast_pacing(), 0, &NullSink).unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.remaining, 0);

        let album = db::album_by_release_id(&conn, 1).unwrap().unwrap();
        assert_eq!(album.master_year, Some(1959));
    }

    #[test]
    fn rate_limit_gets_exactly_one_retry() {
        let mut conn = open_in_memory();
        let source = FakeSource::new(vec![item(1, Some(10), "Miles Davis", "Kind Of Blue")]);
        sync_collection(&mut conn, &source, &fast_pacing(), &NullSink).unwrap();

        // First master call is rate limited; the retry succeeds.
        let source = FakeSource::new(vec![]);
        source.rate_limit_first.store(1, Ordering::SeqCst);
        let report =
            sync_master_years(&mut conn, &source, &fast_pacing(), 0, &NullSink).unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(source.master_calls.load(Ordering::SeqCst), 2);

        let album = db::album_by_release_id(&conn, 1).unwrap().unwrap();
        assert_eq!(album.master_year, Some(1959));
    }

    #[test]
    fn persistent_rate_limit_counts_as_error() {
        let mut conn = open_in_memory();
        let source = FakeSource::new(vec![item(1, Some(10), "Miles Davis", "Kind Of Blue")]);
        sync_collection(&mut conn, &source, &fast_pacing(), &NullSink).unwrap();

        let source = FakeSource::new(vec![]);
        source.rate_limit_first.store(2, Ordering::SeqCst);
        let report =
            sync_master_years(&mut conn, &source, &fast_pacing(), 0, &NullSink).unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(report.errors, 1);
        assert_eq!(report.remaining, 1);
        // One original call plus exactly one retry; no unbounded loop.
        assert_eq!(source.master_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batch_size_caps_the_run() {
        let mut conn = open_in_memory();
        let source = FakeSource::new(vec![
            item(1, Some(10), "A", "One"),
            item(2, Some(11), "B", "Two"),
            item(3, Some(12), "C", "Three"),
        ]);
        sync_collection(&mut conn, &source, &fast_pacing(), &NullSink).unwrap();

        let report =
            sync_master_years(&mut conn, &source, &fast_pacing(), 2, &NullSink).unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.remaining, 1);
    }
}
