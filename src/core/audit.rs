//! Append-only audit log of governed mutations.
//!
//! Appends land in an in-process log under a mutex and are immediately
//! queryable. When a durable [`AuditSink`] is configured, the same trace is
//! handed to a dedicated writer thread over an unbounded channel, so a slow or
//! failing sink never blocks or fails the operation being governed.
//!
//! Per-actor ordering holds because an actor's appends happen in its own
//! call order, and both the log and the channel are FIFO.

use crate::core::db;
use crate::core::error::WardenError;
use crate::core::trace::{self, DelegationTrace, TraceFilter};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on traces handed to a sink in one call.
const MAX_BATCH: usize = 256;
/// Maximum delay cap between retries (milliseconds).
const MAX_DELAY_MS: u64 = 5_000;

/// Durable destination for traces. Runs on the writer thread only.
pub trait AuditSink: Send {
    fn name(&self) -> &'static str;

    fn persist(&mut self, batch: &[DelegationTrace]) -> Result<(), WardenError>;
}

/// One JSON object per line, appended.
///
/// A retried batch resumes after the last line that made it to the file, so
/// a partial write is never appended twice.
pub struct JsonlAuditSink {
    path: PathBuf,
    last_written: Option<String>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_written: None,
        }
    }

    fn resume_index(&self, batch: &[DelegationTrace]) -> usize {
        self.last_written
            .as_ref()
            .and_then(|id| batch.iter().position(|t| &t.trace_id == id))
            .map_or(0, |idx| idx + 1)
    }
}

impl AuditSink for JsonlAuditSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn persist(&mut self, batch: &[DelegationTrace]) -> Result<(), WardenError> {
        let rest = &batch[self.resume_index(batch)..];
        if rest.is_empty() {
            return Ok(());
        }
        let last_written = &mut self.last_written;
        trace::append_traces_jsonl_with(&self.path, rest, |t| {
            *last_written = Some(t.trace_id.clone());
        })
    }
}

/// SQLite table `delegation_traces`, one transaction per batch.
pub struct SqliteAuditSink {
    conn: Connection,
}

impl SqliteAuditSink {
    pub fn open(db_path: &Path) -> Result<Self, WardenError> {
        Ok(Self {
            conn: db::initialize_audit_db(db_path)?,
        })
    }
}

impl AuditSink for SqliteAuditSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn persist(&mut self, batch: &[DelegationTrace]) -> Result<(), WardenError> {
        db::insert_traces(&mut self.conn, batch).map(|_| ())
    }
}

/// Retry behavior of the writer thread.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Traces held back while the sink keeps failing; oldest are dropped past this.
    pub max_pending: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_pending: 10_000,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(base.saturating_mul(factor).min(MAX_DELAY_MS))
    }
}

#[derive(Default)]
struct HealthCounters {
    persisted: AtomicU64,
    failed_batches: AtomicU64,
    dropped: AtomicU64,
    pending: AtomicU64,
}

/// Snapshot of the durable writer's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditHealth {
    pub recorded: u64,
    pub persisted: u64,
    pub failed_batches: u64,
    pub dropped: u64,
    pub pending: u64,
    pub durable: bool,
}

enum WriterCommand {
    Persist(DelegationTrace),
    Flush(Sender<()>),
}

struct LogState {
    entries: Vec<DelegationTrace>,
    tx: Option<Sender<WriterCommand>>,
}

pub struct AuditLog {
    state: Mutex<LogState>,
    writer: Mutex<Option<JoinHandle<()>>>,
    health: Arc<HealthCounters>,
    durable: bool,
}

impl AuditLog {
    /// Log kept only in memory.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: Vec::new(),
                tx: None,
            }),
            writer: Mutex::new(None),
            health: Arc::new(HealthCounters::default()),
            durable: false,
        }
    }

    /// Log mirrored to `sink` by a background writer thread.
    pub fn with_sink(sink: Box<dyn AuditSink>, policy: RetryPolicy) -> Result<Self, WardenError> {
        let (tx, rx) = mpsc::channel();
        let health = Arc::new(HealthCounters::default());
        let thread_health = Arc::clone(&health);
        let sink_name = sink.name();
        let handle = thread::Builder::new()
            .name("warden-audit".to_string())
            .spawn(move || run_writer(sink, rx, policy, thread_health))
            .map_err(WardenError::IoError)?;
        tracing::info!(sink = sink_name, "audit writer started");

        Ok(Self {
            state: Mutex::new(LogState {
                entries: Vec::new(),
                tx: Some(tx),
            }),
            writer: Mutex::new(Some(handle)),
            health,
            durable: true,
        })
    }

    // Appends must never fail the governed operation, so a poisoned lock is
    // recovered rather than reported.
    fn lock_state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, trace: DelegationTrace) {
        let mut state = self.lock_state();
        if let Some(tx) = &state.tx {
            self.health.pending.fetch_add(1, Ordering::Relaxed);
            if tx.send(WriterCommand::Persist(trace.clone())).is_err() {
                self.health.pending.fetch_sub(1, Ordering::Relaxed);
                self.health.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(trace_id = %trace.trace_id, "audit writer is gone; trace kept in memory only");
            }
        }
        state.entries.push(trace);
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn traces(&self, filter: &TraceFilter) -> Vec<DelegationTrace> {
        filter.apply(self.lock_state().entries.iter())
    }

    pub fn health(&self) -> AuditHealth {
        AuditHealth {
            recorded: self.len() as u64,
            persisted: self.health.persisted.load(Ordering::Relaxed),
            failed_batches: self.health.failed_batches.load(Ordering::Relaxed),
            dropped: self.health.dropped.load(Ordering::Relaxed),
            pending: self.health.pending.load(Ordering::Relaxed),
            durable: self.durable,
        }
    }

    /// Wait until the writer has attempted everything appended so far.
    ///
    /// Fails with `AuditPersistence` when traces are still pending after the
    /// attempt. The in-memory log is unaffected either way.
    pub fn flush(&self) -> Result<(), WardenError> {
        let ack = {
            let state = self.lock_state();
            let Some(tx) = &state.tx else {
                return Ok(());
            };
            let (ack_tx, ack_rx) = mpsc::channel();
            if tx.send(WriterCommand::Flush(ack_tx)).is_err() {
                return Err(WardenError::AuditPersistence(
                    "audit writer is not running".to_string(),
                ));
            }
            ack_rx
        };
        ack.recv().map_err(|_| {
            WardenError::AuditPersistence("audit writer exited during flush".to_string())
        })?;
        self.ensure_drained()
    }

    fn ensure_drained(&self) -> Result<(), WardenError> {
        let pending = self.health.pending.load(Ordering::Relaxed);
        if pending > 0 {
            return Err(WardenError::AuditPersistence(format!(
                "{} trace(s) not yet persisted",
                pending
            )));
        }
        Ok(())
    }

    /// Stop the writer after it drains what it has. Idempotent.
    pub fn shutdown(&self) -> Result<(), WardenError> {
        let tx = self.lock_state().tx.take();
        let Some(tx) = tx else {
            return Ok(());
        };
        drop(tx);
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            return Err(WardenError::AuditPersistence(
                "audit writer panicked".to_string(),
            ));
        }
        tracing::info!("audit writer stopped");
        self.ensure_drained()
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "audit log dropped with unpersisted traces");
        }
    }
}

fn run_writer(
    mut sink: Box<dyn AuditSink>,
    rx: Receiver<WriterCommand>,
    policy: RetryPolicy,
    health: Arc<HealthCounters>,
) {
    let mut pending: VecDeque<DelegationTrace> = VecDeque::new();

    while let Ok(first) = rx.recv() {
        let mut acks = Vec::new();
        let mut absorb = |cmd: WriterCommand, pending: &mut VecDeque<DelegationTrace>| match cmd {
            WriterCommand::Persist(trace) => {
                pending.push_back(trace);
                if pending.len() > policy.max_pending {
                    pending.pop_front();
                    health.pending.fetch_sub(1, Ordering::Relaxed);
                    health.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            WriterCommand::Flush(ack) => acks.push(ack),
        };

        absorb(first, &mut pending);
        while let Ok(cmd) = rx.try_recv() {
            absorb(cmd, &mut pending);
        }

        drain(sink.as_mut(), &mut pending, &policy, &health);
        for ack in acks {
            let _ = ack.send(());
        }
    }

    // Channel closed: one last attempt at whatever is left.
    drain(sink.as_mut(), &mut pending, &policy, &health);
}

fn drain(
    sink: &mut dyn AuditSink,
    pending: &mut VecDeque<DelegationTrace>,
    policy: &RetryPolicy,
    health: &HealthCounters,
) {
    while !pending.is_empty() {
        let take = pending.len().min(MAX_BATCH);
        let batch: Vec<DelegationTrace> = pending.iter().take(take).cloned().collect();
        match persist_with_retry(sink, &batch, policy) {
            Ok(()) => {
                pending.drain(..take);
                health.persisted.fetch_add(take as u64, Ordering::Relaxed);
                health.pending.fetch_sub(take as u64, Ordering::Relaxed);
            }
            Err(e) => {
                health.failed_batches.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    sink = sink.name(),
                    error = %e,
                    held = pending.len(),
                    "audit persistence failed; traces held for the next attempt"
                );
                return;
            }
        }
    }
}

fn persist_with_retry(
    sink: &mut dyn AuditSink,
    batch: &[DelegationTrace],
    policy: &RetryPolicy,
) -> Result<(), WardenError> {
    let mut attempt = 0u32;
    loop {
        match sink.persist(batch) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(sink = sink.name(), attempt, error = %e, "retrying audit persistence");
                thread::sleep(policy.delay_for(attempt));
            }
            Err(e) => return Err(WardenError::AuditPersistence(e.to_string())),
        }
    }
}
