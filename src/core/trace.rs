//! Delegation traces: the immutable audit record of one governed mutation.

use crate::core::error::WardenError;
use crate::core::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Write,
    Edit,
    Delete,
    Read,
    List,
    Exists,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Read => "read",
            Self::List => "list",
            Self::Exists => "exists",
        }
    }

    /// Mutations are governed; everything else bypasses ownership.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Write | Self::Edit | Self::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(Self::Write),
            "edit" => Ok(Self::Edit),
            "delete" => Ok(Self::Delete),
            "read" => Ok(Self::Read),
            "list" => Ok(Self::List),
            "exists" => Ok(Self::Exists),
            other => Err(WardenError::AuditPersistence(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Direct,
    Delegated,
    PolicyGap,
}

impl TraceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Delegated => "delegated",
            Self::PolicyGap => "policy_gap",
        }
    }
}

impl fmt::Display for TraceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceOutcome {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "delegated" => Ok(Self::Delegated),
            "policy_gap" => Ok(Self::PolicyGap),
            other => Err(WardenError::AuditPersistence(format!(
                "unknown outcome '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationTrace {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub requesting_actor: String,
    /// `None` for policy gaps: no rule named an owner.
    pub owner_actor: Option<String>,
    pub path: String,
    pub operation: OperationKind,
    pub outcome: TraceOutcome,
    pub latency_ms: f64,
}

/// Audit query. Every set field must match; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub requesting_actor: Option<String>,
    pub owner_actor: Option<String>,
    pub outcome: Option<TraceOutcome>,
    pub path_prefix: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches.
    pub limit: Option<usize>,
}

impl TraceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requesting_actor(mut self, actor: impl Into<String>) -> Self {
        self.requesting_actor = Some(actor.into());
        self
    }

    pub fn owner_actor(mut self, actor: impl Into<String>) -> Self {
        self.owner_actor = Some(actor.into());
        self
    }

    pub fn outcome(mut self, outcome: TraceOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn normalized_prefix(&self) -> Option<&str> {
        self.path_prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
    }

    pub fn matches(&self, trace: &DelegationTrace) -> bool {
        if let Some(actor) = &self.requesting_actor
            && &trace.requesting_actor != actor
        {
            return false;
        }
        if let Some(owner) = &self.owner_actor
            && trace.owner_actor.as_ref() != Some(owner)
        {
            return false;
        }
        if let Some(outcome) = self.outcome
            && trace.outcome != outcome
        {
            return false;
        }
        if let Some(since) = self.since
            && trace.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && trace.timestamp > until
        {
            return false;
        }
        if let Some(prefix) = self.normalized_prefix() {
            return path_has_prefix(&trace.path, prefix);
        }
        true
    }

    /// Filter chronologically ordered traces, honoring `limit`.
    pub fn apply<'a, I>(&self, traces: I) -> Vec<DelegationTrace>
    where
        I: IntoIterator<Item = &'a DelegationTrace>,
    {
        let matched: Vec<DelegationTrace> = traces
            .into_iter()
            .filter(|t| self.matches(t))
            .cloned()
            .collect();
        match self.limit {
            Some(n) if matched.len() > n => matched[matched.len() - n..].to_vec(),
            _ => matched,
        }
    }
}

/// Segment-boundary prefix test: `docs` covers `docs/a.md`, not `docs2/a.md`.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Aggregates over delegated traces, used by health dashboards to spot an
/// actor that keeps targeting resources it does not own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DelegationStats {
    pub total: usize,
    pub by_requesting_actor: BTreeMap<String, usize>,
    pub by_path_prefix: BTreeMap<String, usize>,
    pub by_owner: BTreeMap<String, usize>,
}

impl DelegationStats {
    pub fn from_traces<'a, I>(traces: I) -> Self
    where
        I: IntoIterator<Item = &'a DelegationTrace>,
    {
        let mut stats = Self::default();
        for trace in traces {
            if trace.outcome != TraceOutcome::Delegated {
                continue;
            }
            stats.total += 1;
            *stats
                .by_requesting_actor
                .entry(trace.requesting_actor.clone())
                .or_default() += 1;
            *stats
                .by_path_prefix
                .entry(top_level(&trace.path).to_string())
                .or_default() += 1;
            if let Some(owner) = &trace.owner_actor {
                *stats.by_owner.entry(owner.clone()).or_default() += 1;
            }
        }
        stats
    }
}

fn top_level(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

pub fn append_traces_jsonl(path: &Path, traces: &[DelegationTrace]) -> Result<(), WardenError> {
    append_traces_jsonl_with(path, traces, |_| {})
}

/// Append `traces` one line at a time, calling `on_written` after each line
/// is fully handed to the file. A torn last line from an earlier failed
/// write is terminated first so it cannot swallow the next record.
pub fn append_traces_jsonl_with<F>(
    path: &Path,
    traces: &[DelegationTrace],
    mut on_written: F,
) -> Result<(), WardenError>
where
    F: FnMut(&DelegationTrace),
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(WardenError::IoError)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(WardenError::IoError)?;
    if ends_mid_line(&mut file).map_err(WardenError::IoError)? {
        file.write_all(b"\n").map_err(WardenError::IoError)?;
    }
    for trace in traces {
        let mut line = serde_json::to_string(trace)?;
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(WardenError::IoError)?;
        on_written(trace);
    }
    file.flush().map_err(WardenError::IoError)?;
    Ok(())
}

fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Read a JSONL trace file. A missing file is an empty log.
///
/// A trace id seen twice (a batch re-appended after a partial write) counts
/// once. Torn lines are skipped with a warning.
pub fn read_traces_jsonl(path: &Path) -> Result<Vec<DelegationTrace>, WardenError> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let reader = BufReader::new(File::open(path).map_err(WardenError::IoError)?);
    let mut seen = HashSet::new();
    let mut traces = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(WardenError::IoError)?;
        if line.trim().is_empty() {
            continue;
        }
        let trace: DelegationTrace = match serde_json::from_str(&line) {
            Ok(trace) => trace,
            Err(e) => {
                tracing::warn!(
                    file = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping malformed trace line"
                );
                continue;
            }
        };
        if seen.insert(trace.trace_id.clone()) {
            traces.push(trace);
        }
    }
    Ok(traces)
}

/// Build a trace stamped with the current time and a fresh id.
pub(crate) fn new_trace(
    requesting_actor: &str,
    owner_actor: Option<&str>,
    path: &str,
    operation: OperationKind,
    outcome: TraceOutcome,
    latency_ms: f64,
) -> DelegationTrace {
    DelegationTrace {
        trace_id: time::new_trace_id(),
        timestamp: time::now_utc(),
        requesting_actor: requesting_actor.to_string(),
        owner_actor: owner_actor.map(str::to_string),
        path: path.to_string(),
        operation,
        outcome,
        latency_ms,
    }
}
