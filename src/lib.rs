//! Record-collection curator: what's next on the turntable.
//!
//! Platter keeps a local SQLite copy of a Discogs collection, reconciles it
//! against an externally authored ranked list (the "Big Board"), and picks
//! the next album to play with a weighted random draw that balances rank,
//! listen recency, and variety.
//!
//! Core modules:
//! - [`selector`] - Selection weighting and the weighted random draw
//! - [`bigboard`] - Big Board import and fuzzy reconciliation
//! - [`similarity`] - Pluggable string-similarity metrics
//! - [`db`] - SQLite schema, entities, and row operations
//! - [`sync`] - Single-slot sync coordination and the sync drivers
//!
//! ### Supporting Modules
//!
//! - [`discogs`] - Discogs API client
//! - [`library`] - Read paths and manual-correction operations
//! - [`years`] - Display-year resolution
//! - [`config`] - Data directory and Discogs credentials
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use platter::{config, db, selector};
//! use platter::selector::SelectionContext;
//!
//! let conn = db::open(&config::db_path()?)?;
//! match selector::select_next(&conn, &SelectionContext::default())? {
//!     Some(pick) => println!("Next up: {} — {}", pick.artist, pick.title),
//!     None => println!("Nothing eligible; sync the collection first."),
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Selection Weighting
//!
//! Every eligible album gets `base * recency * variety * never_played`:
//! the base decays by square root from 1.0 at Big Board rank 1 (unranked
//! albums get a flat 0.4), the recency factor is a soft cooldown that
//! recovers over roughly two thirds of a full rotation, the variety bonus
//! rewards decades and genres missing from the last ten picks and cuts
//! recently heard artists to 0.3x, and never-played albums get 1.5x.
//! The weight vector is deterministic; only the draw is random.
//!
//! ## Error Handling
//!
//! Public functions return `Result<T, anyhow::Error>`. External-service
//! failures are typed ([`discogs::DiscogsError`]) so sync paths can tell a
//! rate limit from a dead network. "Nothing eligible" and "not found" are
//! results, not errors.

pub mod bigboard;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod discogs;
pub mod library;
pub mod selector;
pub mod similarity;
pub mod sync;
pub mod years;
