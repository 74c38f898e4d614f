//! Date arithmetic for ranking and expiry
//!
//! Polips only carry a calendar date, so every age here is in whole days
//! measured against an explicit `today`. Callers pass the date in, which
//! keeps ranking reproducible in tests.

use chrono::{Local, NaiveDate};

use crate::polip::{Polip, Scope};

/// Today's date in local time
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Whole days between `updated` and `today`; dates in the future count as 0
pub fn age_in_days(updated: NaiveDate, today: NaiveDate) -> u32 {
    let days = (today - updated).num_days();
    u32::try_from(days.max(0)).unwrap_or(u32::MAX)
}

/// Ranking multiplier in `(0.5, 1.0]` that halves its excess every `half_life_days`
///
/// Recency breaks near-ties; it can never more than double a score, so term
/// overlap still dominates.
pub fn recency_weight(updated: NaiveDate, today: NaiveDate, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let age = age_in_days(updated, today) as f64;
    0.5 + 0.5 * 0.5_f64.powf(age / half_life_days)
}

/// Session polips expire once they are older than `ttl_days`
pub fn is_stale(polip: &Polip, today: NaiveDate, ttl_days: u32) -> bool {
    polip.scope == Scope::Session && age_in_days(polip.updated, today) > ttl_days
}
