//! SQLite schema definitions for the durable audit store.
//!
//! Timestamps are stored as fixed-width RFC 3339 text so that string order
//! matches time order and window queries can compare them directly.

pub const AUDIT_DB_NAME: &str = "audit.db";

pub const AUDIT_DB_SCHEMA_TRACES: &str = "
    CREATE TABLE IF NOT EXISTS delegation_traces (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        trace_id TEXT NOT NULL UNIQUE,
        timestamp TEXT NOT NULL,
        requesting_actor TEXT NOT NULL,
        owner_actor TEXT,
        path TEXT NOT NULL,
        operation TEXT NOT NULL,
        outcome TEXT NOT NULL,
        latency_ms REAL NOT NULL
    )
";
pub const AUDIT_DB_SCHEMA_INDEX_TS: &str =
    "CREATE INDEX IF NOT EXISTS idx_traces_timestamp ON delegation_traces(timestamp)";
pub const AUDIT_DB_SCHEMA_INDEX_ACTOR: &str =
    "CREATE INDEX IF NOT EXISTS idx_traces_actor ON delegation_traces(requesting_actor, outcome)";

pub const AUDIT_DB_SCHEMAS: &[&str] = &[
    AUDIT_DB_SCHEMA_TRACES,
    AUDIT_DB_SCHEMA_INDEX_TS,
    AUDIT_DB_SCHEMA_INDEX_ACTOR,
];
