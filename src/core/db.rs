use crate::core::error::WardenError;
use crate::core::schemas;
use crate::core::time;
use crate::core::trace::{DelegationTrace, TraceFilter};
use rusqlite::{Connection, params, params_from_iter};
use std::fs;
use std::path::Path;

/// Busy timeout for the audit database.
const BUSY_TIMEOUT_SECS: u64 = 5;

pub fn db_connect(db_path: &Path) -> Result<Connection, WardenError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(BUSY_TIMEOUT_SECS))
        .map_err(WardenError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(WardenError::RusqliteError)?;
    Ok(conn)
}

/// Open (creating if needed) the audit database and apply its schema.
pub fn initialize_audit_db(db_path: &Path) -> Result<Connection, WardenError> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(WardenError::IoError)?;
    }
    let conn = db_connect(db_path)?;
    for ddl in schemas::AUDIT_DB_SCHEMAS {
        conn.execute(ddl, [])?;
    }
    Ok(conn)
}

/// Insert a batch in one transaction. Re-sending an already stored trace is a no-op.
pub fn insert_traces(conn: &mut Connection, traces: &[DelegationTrace]) -> Result<usize, WardenError> {
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO delegation_traces
                (trace_id, timestamp, requesting_actor, owner_actor, path, operation, outcome, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for trace in traces {
            inserted += stmt.execute(params![
                trace.trace_id,
                time::format_ts(&trace.timestamp),
                trace.requesting_actor,
                trace.owner_actor,
                trace.path,
                trace.operation.as_str(),
                trace.outcome.as_str(),
                trace.latency_ms,
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

/// Push a bound value and return its `?N` placeholder.
fn push_arg(args: &mut Vec<String>, value: String) -> String {
    args.push(value);
    format!("?{}", args.len())
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Run a [`TraceFilter`] against the audit database, oldest first.
pub fn query_traces(conn: &Connection, filter: &TraceFilter) -> Result<Vec<DelegationTrace>, WardenError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    if let Some(actor) = &filter.requesting_actor {
        let p = push_arg(&mut args, actor.clone());
        clauses.push(format!("requesting_actor = {}", p));
    }
    if let Some(owner) = &filter.owner_actor {
        let p = push_arg(&mut args, owner.clone());
        clauses.push(format!("owner_actor = {}", p));
    }
    if let Some(outcome) = filter.outcome {
        let p = push_arg(&mut args, outcome.as_str().to_string());
        clauses.push(format!("outcome = {}", p));
    }
    if let Some(since) = &filter.since {
        let p = push_arg(&mut args, time::format_ts(since));
        clauses.push(format!("timestamp >= {}", p));
    }
    if let Some(until) = &filter.until {
        let p = push_arg(&mut args, time::format_ts(until));
        clauses.push(format!("timestamp <= {}", p));
    }
    if let Some(prefix) = filter.normalized_prefix() {
        let exact = push_arg(&mut args, prefix.to_string());
        let nested = push_arg(&mut args, format!("{}/%", escape_like(prefix)));
        clauses.push(format!(
            "(path = {} OR path LIKE {} ESCAPE '\\')",
            exact, nested
        ));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    // Newest first so LIMIT keeps the most recent rows; reversed below.
    let limit_sql = match filter.limit {
        Some(n) => format!("LIMIT {}", n),
        None => String::new(),
    };
    let sql = format!(
        "SELECT trace_id, timestamp, requesting_actor, owner_actor, path, operation, outcome, latency_ms
         FROM delegation_traces {} ORDER BY seq DESC {}",
        where_sql, limit_sql
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, f64>(7)?,
        ))
    })?;

    let mut traces = Vec::new();
    for row in rows {
        let (trace_id, ts, requesting_actor, owner_actor, path, operation, outcome, latency_ms) = row?;
        traces.push(DelegationTrace {
            trace_id,
            timestamp: time::parse_ts(&ts)?,
            requesting_actor,
            owner_actor,
            path,
            operation: operation.parse()?,
            outcome: outcome.parse()?,
            latency_ms,
        });
    }
    traces.reverse();
    Ok(traces)
}

pub fn count_traces(conn: &Connection) -> Result<usize, WardenError> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM delegation_traces", [], |row| row.get(0))?;
    Ok(count as usize)
}
