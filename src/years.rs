//! Display-year resolution.
//!
//! An album carries up to four year fields: the user override, the Big Board
//! year, the master (original issue) year, and the pressing's release year.
//! Every read path that shows a year resolves them through the same ordered
//! fallback, so the priority lives in exactly one place.

/// First non-`None` year in priority order.
#[must_use]
pub fn resolve(candidates: &[Option<i32>]) -> Option<i32> {
    candidates.iter().copied().flatten().next()
}

/// Resolve the display year: override, then Big Board, then master, then
/// release year.
#[must_use]
pub fn display_year(
    override_year: Option<i32>,
    board_year: Option<i32>,
    master_year: Option<i32>,
    release_year: Option<i32>,
) -> Option<i32> {
    resolve(&[override_year, board_year, master_year, release_year])
}

/// Decade bucket for a year (1973 -> 1970).
#[must_use]
pub fn decade(year: i32) -> i32 {
    (year / 10) * 10
}
