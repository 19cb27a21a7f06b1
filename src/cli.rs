//! # Command-Line Interface Module
//!
//! Defines the Platter command tree using Clap derive macros. Everything the
//! curator does is a subcommand: picking the next album, marking the
//! verdict, browsing the collection and the Big Board, running syncs, and
//! applying manual corrections.
//!
//! ## Examples
//!
//! ```bash
//! platter sync collection
//! platter sync board ~/Downloads/big_board.csv
//! platter next
//! platter listened 42
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Sort orders for the library listing.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum SortKey {
    /// By artist, ignoring a leading article
    Artist,
    /// By title, ignoring a leading article
    Title,
    /// By resolved display year
    Year,
    /// By the pressing's release year
    ReleaseYear,
}

/// Main application arguments structure.
#[derive(Parser)]
#[command(name = "platter")]
#[command(about = "Platter: What's next on the turntable - Discogs collection curator & album picker")]
#[command(version)]
pub struct Args {
    /// Use a specific database file instead of the platform data directory
    #[arg(long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Initialize the database (safe to run repeatedly)
    ///
    /// Creates the schema and applies any pending migrations. Every other
    /// command does this implicitly; init-db exists to set things up
    /// explicitly and confirm where the data lives.
    InitDb,

    /// Pick the next album to listen to
    ///
    /// Draws one album by weighted random selection, balancing Big Board
    /// rank, how recently each album was played, and variety against the
    /// last ten picks. The pick is recorded as a pending history entry;
    /// settle it later with `listened` or `skipped`.
    Next,

    /// Show the most recent selection so it can be marked late
    Previous {
        /// Step back from this listen id instead of the latest one
        #[arg(long)]
        before: Option<i64>,
    },

    /// Mark an album's latest selection as listened
    Listened {
        /// Album id as shown by `next`, `library`, or `search`
        album_id: i64,
    },

    /// Mark an album's latest selection as skipped
    Skipped {
        /// Album id as shown by `next`, `library`, or `search`
        album_id: i64,
    },

    /// Exclude an album from future selections
    Exclude {
        album_id: i64,
    },

    /// Bring an excluded album back into rotation
    Include {
        album_id: i64,
    },

    /// Listening history (decided selections only), newest first
    History {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },

    /// Collection and listening totals
    Stats,

    /// Most-played albums with first/last listen dates
    Plays,

    /// The full Big Board with ownership status
    Board,

    /// Browse the collection
    Library {
        /// Sort order
        #[arg(long, value_enum, default_value_t = SortKey::Artist)]
        sort: SortKey,
        /// Reverse the sort
        #[arg(long)]
        desc: bool,
    },

    /// Albums currently excluded from selection
    Excluded,

    /// Search owned albums by artist or title (for manual matching)
    Search {
        /// Substring to look for; two characters minimum
        query: String,
    },

    /// Album details, or apply a correction to one album
    Album {
        album_id: i64,
        #[command(subcommand)]
        action: Option<AlbumAction>,
    },

    /// Edit artist/title/year on a Big Board entry
    ///
    /// Edited fields survive re-imports of the CSV: the import keeps the
    /// manual value over the freshly read one.
    BoardEdit {
        rank: u32,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "clear_year")]
        year: Option<i32>,
        /// Remove the entry's year
        #[arg(long)]
        clear_year: bool,
    },

    /// Manually match a Big Board entry to an owned album
    BoardMatch {
        rank: u32,
        album_id: i64,
    },

    /// Remove an album's Big Board association
    BoardUnmatch {
        album_id: i64,
    },

    /// Link a Big Board entry to an album that contains it indirectly
    ///
    /// Use this when the ranked record isn't owned as such but lives on an
    /// owned compilation. Omit the album id to clear the link.
    BoardVia {
        rank: u32,
        album_id: Option<i64>,
    },

    /// Run a sync against an external source
    Sync {
        #[command(subcommand)]
        source: SyncSource,
    },

    /// Generate shell completions
    ///
    /// Usage: platter completion bash > ~/.local/share/bash-completion/completions/platter
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Corrections applied to a single album.
#[derive(Subcommand)]
pub enum AlbumAction {
    /// Completed-listen dates for this album
    Dates,

    /// Override the display year, or clear the override
    ///
    /// The override takes precedence over the Big Board year, the master
    /// year, and the release year everywhere a year is shown.
    SetYear {
        /// Year between 1900 and 2099; omit to clear the override
        year: Option<i32>,
    },

    /// Point the album at a different Discogs master release
    ///
    /// Fetches the master's original year and cover art when reachable;
    /// the id is saved either way and survives collection syncs. Omit the
    /// id to clear the override.
    SetMaster {
        master_id: Option<i64>,
    },

    /// Point the album at a different Discogs release
    SetRelease {
        release_id: i64,
    },

    /// Re-fetch the cover image from the album's Discogs release
    RefreshCover,
}

/// The sync operations. One may run at a time.
#[derive(Subcommand)]
pub enum SyncSource {
    /// Sync the owned collection from Discogs
    ///
    /// Pages through the collection, upserting albums and soft-removing
    /// ones no longer present. Listening history is never deleted.
    Collection,

    /// Import the Big Board CSV and reconcile it against the collection
    ///
    /// Fuzzy-matches each entry to an owned album. Manual edits and manual
    /// matches from earlier imports are preserved.
    Board {
        /// CSV path; defaults to big_board.csv in the data directory
        csv: Option<PathBuf>,
    },

    /// Backfill original-issue years from Discogs master releases
    MasterYears {
        /// Stop after this many fetches (0 = all)
        #[arg(long, default_value_t = 0)]
        batch: usize,
    },
}
