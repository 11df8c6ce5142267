//! Calendar-expression parsing for recurring [`super::store::Job`]s.
//!
//! Wraps the `cron` crate (already part of the dependency stack via
//! [`super::legacy`]'s `tokio_cron_scheduler` usage) rather than hand
//! rolling a parser. Accepts the standard six-field form
//! `sec min hour day month dow` plus the `@hourly`/`@daily`/`@weekly`/
//! `@monthly`/`@yearly` descriptor aliases.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Parse a calendar expression, resolving descriptor aliases first.
pub fn parse(expr: &str) -> Result<Schedule, String> {
    let resolved = resolve_alias(expr.trim());
    Schedule::from_str(resolved).map_err(|e| e.to_string())
}

/// Expand a `@hourly`-style alias to its six-field equivalent. Anything
/// that isn't a recognized alias passes through untouched so ordinary
/// cron expressions reach `Schedule::from_str` verbatim.
fn resolve_alias(expr: &str) -> &str {
    match expr {
        "@yearly" | "@annually" => "0 0 0 1 1 * *",
        "@monthly" => "0 0 0 1 * * *",
        "@weekly" => "0 0 0 * * Sun *",
        "@daily" | "@midnight" => "0 0 0 * * * *",
        "@hourly" => "0 0 * * * * *",
        other => other,
    }
}

/// The next fire time strictly after `after`, if the expression has one.
pub fn next_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}
