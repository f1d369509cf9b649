//! Shared timestamp and identifier helpers for audit records.

use crate::core::error::WardenError;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use ulid::Ulid;

/// Current time at microsecond precision, the resolution traces are stored at.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 rendering (`2026-01-02T03:04:05.123456Z`).
///
/// Every persisted timestamp uses this form so that lexicographic order in
/// SQLite equals chronological order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, WardenError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WardenError::AuditPersistence(format!("bad timestamp '{}': {}", raw, e)))
}

pub fn new_trace_id() -> String {
    Ulid::new().to_string()
}
