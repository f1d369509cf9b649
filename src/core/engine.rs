//! The enforcement engine: every governed operation passes through here.
//!
//! Per call: `Received -> OwnerResolved -> {Authorized | Delegated | PolicyGap} -> Completed`.
//!
//! Read-class operations (`Read`, `Exists`, `List`) skip ownership entirely and
//! leave no trace. Visibility is universal; only mutation is governed.
//! A mutation by its owner executes and records `direct`. A mutation by
//! anyone else is *not* executed: it records `delegated` and reports the owner
//! back to the caller, or fails with `OwnershipViolation` when the caller
//! opted in. Delegation is advisory; nothing here hands work to the owner.

use crate::core::actor::{Actor, Roster};
use crate::core::audit::AuditLog;
use crate::core::cache::OwnershipCache;
use crate::core::config::UnclearPolicy;
use crate::core::error::{StorageError, WardenError};
use crate::core::pattern::{normalize_dir, normalize_path};
use crate::core::registry::{Ownership, OwnershipRegistry};
use crate::core::storage::{Storage, StorageOutput};
use crate::core::trace::{
    self, DelegationStats, DelegationTrace, OperationKind, TraceFilter, TraceOutcome,
};
use chrono::Duration as ChronoDuration;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// An operation together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Write { content: String },
    Edit { find: String, replace: String },
    Delete,
    Read,
    List { pattern: Option<String> },
    Exists,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Write { .. } => OperationKind::Write,
            Self::Edit { .. } => OperationKind::Edit,
            Self::Delete => OperationKind::Delete,
            Self::Read => OperationKind::Read,
            Self::List { .. } => OperationKind::List,
            Self::Exists => OperationKind::Exists,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub actor: Actor,
    pub path: String,
    pub operation: Operation,
    /// Fail with `OwnershipViolation` instead of delegating.
    pub raise_on_violation: bool,
}

impl OperationRequest {
    pub fn new(actor: Actor, path: impl Into<String>, operation: Operation) -> Self {
        Self {
            actor,
            path: path.into(),
            operation,
            raise_on_violation: false,
        }
    }

    pub fn raise_on_violation(mut self, raise: bool) -> Self {
        self.raise_on_violation = raise;
        self
    }
}

/// How a governed call completed. Violations are reported as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Executed: the caller owns the path, or the operation is read-class.
    Direct(StorageOutput),
    /// Not executed; responsibility belongs to `owner`.
    Delegated { owner: Actor },
    /// Executed on a path no rule covers (fail-open policy).
    PolicyGap(StorageOutput),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub outcome: Outcome,
    /// `None` for read-class operations, which are never traced.
    pub trace_id: Option<String>,
}

impl OperationResult {
    /// Always true: failures are returned as `Err`, and a delegation counts as handled.
    pub fn success(&self) -> bool {
        true
    }

    pub fn delegated(&self) -> bool {
        matches!(self.outcome, Outcome::Delegated { .. })
    }

    pub fn delegated_to(&self) -> Option<&Actor> {
        match &self.outcome {
            Outcome::Delegated { owner } => Some(owner),
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&StorageOutput> {
        match &self.outcome {
            Outcome::Direct(out) | Outcome::PolicyGap(out) => Some(out),
            Outcome::Delegated { .. } => None,
        }
    }

    pub fn into_output(self) -> Option<StorageOutput> {
        match self.outcome {
            Outcome::Direct(out) | Outcome::PolicyGap(out) => Some(out),
            Outcome::Delegated { .. } => None,
        }
    }
}

pub struct EnforcementEngine {
    roster: Roster,
    registry: RwLock<Arc<OwnershipRegistry>>,
    cache: OwnershipCache,
    storage: Arc<dyn Storage>,
    audit: AuditLog,
    unclear_policy: UnclearPolicy,
}

impl EnforcementEngine {
    /// Build an engine. Fails unless the registry validates and every owner
    /// is declared in `roster`, so no request can ever be served against an
    /// ambiguous rule set.
    pub fn new(
        roster: Roster,
        registry: OwnershipRegistry,
        storage: Arc<dyn Storage>,
        audit: AuditLog,
        unclear_policy: UnclearPolicy,
    ) -> Result<Self, WardenError> {
        ensure_owners_declared(&roster, &registry)?;
        registry.ensure_valid()?;
        tracing::info!(
            actors = roster.len(),
            rules = registry.len(),
            fingerprint = %registry.fingerprint(),
            ?unclear_policy,
            "enforcement engine initialized"
        );
        Ok(Self {
            roster,
            registry: RwLock::new(Arc::new(registry)),
            cache: OwnershipCache::new(),
            storage,
            audit,
            unclear_policy,
        })
    }

    /// Replace the ownership cache with an empty one bounded at `capacity`.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = OwnershipCache::with_capacity(capacity);
        self
    }

    fn current_registry(&self) -> Result<Arc<OwnershipRegistry>, WardenError> {
        self.registry
            .read()
            .map(|r| Arc::clone(&r))
            .map_err(|_| WardenError::LockPoisoned("ownership registry"))
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Refuse any actor that was not declared in this engine's roster.
    pub fn ensure_declared(&self, actor: &Actor) -> Result<(), WardenError> {
        if self.roster.contains(actor) {
            Ok(())
        } else {
            Err(WardenError::UnknownActor {
                actor: actor.to_string(),
            })
        }
    }

    pub fn intercept(&self, request: OperationRequest) -> Result<OperationResult, WardenError> {
        let started = Instant::now();
        let OperationRequest {
            actor,
            path,
            operation,
            raise_on_violation,
        } = request;
        if let Err(err) = self.ensure_declared(&actor) {
            tracing::warn!(actor = %actor, path = %path, "rejected undeclared actor");
            return Err(err);
        }
        let kind = operation.kind();

        if !kind.is_mutation() {
            let path = match kind {
                OperationKind::List => normalize_dir(&path)?,
                _ => normalize_path(&path)?,
            };
            tracing::trace!(actor = %actor, path = %path, op = %kind, "read-class bypass");
            let output = self.execute(&path, &operation)?;
            return Ok(OperationResult {
                outcome: Outcome::Direct(output),
                trace_id: None,
            });
        }

        let path = normalize_path(&path)?;
        let ownership = self.owner_of(&path)?;

        match ownership {
            Ownership::Unclear => {
                tracing::warn!(
                    actor = %actor,
                    path = %path,
                    op = %kind,
                    policy = ?self.unclear_policy,
                    "no ownership rule covers path"
                );
                match self.unclear_policy {
                    UnclearPolicy::FailClosed => {
                        self.record(&actor, None, &path, kind, TraceOutcome::PolicyGap, started);
                        Err(WardenError::OwnershipUnclear { path })
                    }
                    UnclearPolicy::FailOpen => {
                        let executed = self.execute(&path, &operation);
                        let trace_id =
                            self.record(&actor, None, &path, kind, TraceOutcome::PolicyGap, started);
                        Ok(OperationResult {
                            outcome: Outcome::PolicyGap(executed?),
                            trace_id: Some(trace_id),
                        })
                    }
                }
            }
            Ownership::Owned(owner) if owner == actor => {
                let executed = self.execute(&path, &operation);
                let trace_id = self.record(
                    &actor,
                    Some(&owner),
                    &path,
                    kind,
                    TraceOutcome::Direct,
                    started,
                );
                tracing::debug!(actor = %actor, path = %path, op = %kind, ok = executed.is_ok(), "direct");
                Ok(OperationResult {
                    outcome: Outcome::Direct(executed?),
                    trace_id: Some(trace_id),
                })
            }
            Ownership::Owned(owner) => {
                let trace_id = self.record(
                    &actor,
                    Some(&owner),
                    &path,
                    kind,
                    TraceOutcome::Delegated,
                    started,
                );
                tracing::debug!(actor = %actor, owner = %owner, path = %path, op = %kind, "delegated");
                if raise_on_violation {
                    return Err(WardenError::OwnershipViolation {
                        actor: actor.to_string(),
                        owner: owner.to_string(),
                        path,
                    });
                }
                Ok(OperationResult {
                    outcome: Outcome::Delegated { owner },
                    trace_id: Some(trace_id),
                })
            }
        }
    }

    fn execute(&self, path: &str, operation: &Operation) -> Result<StorageOutput, StorageError> {
        let storage = self.storage.as_ref();
        match operation {
            Operation::Write { content } => {
                storage.write(path, content)?;
                Ok(StorageOutput::Written {
                    bytes: content.len(),
                })
            }
            Operation::Edit { find, replace } => Ok(StorageOutput::Edited {
                replacements: storage.edit(path, find, replace)?,
            }),
            Operation::Delete => {
                storage.delete(path)?;
                Ok(StorageOutput::Deleted)
            }
            Operation::Read => Ok(StorageOutput::Content {
                text: storage.read(path)?,
            }),
            Operation::Exists => Ok(StorageOutput::Exists {
                exists: storage.exists(path)?,
            }),
            Operation::List { pattern } => Ok(StorageOutput::Listing {
                entries: storage.list(path, pattern.as_deref())?,
            }),
        }
    }

    fn record(
        &self,
        actor: &Actor,
        owner: Option<&Actor>,
        path: &str,
        kind: OperationKind,
        outcome: TraceOutcome,
        started: Instant,
    ) -> String {
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let trace = trace::new_trace(
            actor.name(),
            owner.map(Actor::name),
            path,
            kind,
            outcome,
            latency_ms,
        );
        let trace_id = trace.trace_id.clone();
        self.audit.append(trace);
        trace_id
    }

    /// Resolve the owner of `path` through the cache.
    pub fn owner_of(&self, path: &str) -> Result<Ownership, WardenError> {
        self.cache.resolve_with(path, |normalized| {
            Ok(self.current_registry()?.resolve_normalized(normalized))
        })
    }

    /// Pure authorization query: no trace, no storage access.
    pub fn can_write(&self, actor: &Actor, path: &str) -> bool {
        self.roster.contains(actor)
            && matches!(self.owner_of(path), Ok(Ownership::Owned(owner)) if &owner == actor)
    }

    pub fn allowed_paths(&self, actor: &Actor) -> Result<Vec<String>, WardenError> {
        self.ensure_declared(actor)?;
        Ok(self.current_registry()?.get_allowed_paths(actor))
    }

    /// Swap in a new rule set and invalidate the cache in one step.
    ///
    /// The new registry must validate; on failure the old rules stay active.
    pub fn reconfigure(&self, registry: OwnershipRegistry) -> Result<(), WardenError> {
        ensure_owners_declared(&self.roster, &registry)?;
        registry.ensure_valid()?;
        let fingerprint = registry.fingerprint();
        let rules = registry.len();
        let replacement = Arc::new(registry);
        self.cache.invalidate_with(|| {
            let mut current = self
                .registry
                .write()
                .map_err(|_| WardenError::LockPoisoned("ownership registry"))?;
            *current = replacement;
            Ok::<(), WardenError>(())
        })??;
        tracing::info!(rules, fingerprint = %fingerprint, "ownership rules reconfigured");
        Ok(())
    }

    pub fn cache(&self) -> &OwnershipCache {
        &self.cache
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn unclear_policy(&self) -> UnclearPolicy {
        self.unclear_policy
    }

    pub fn registry_fingerprint(&self) -> Result<String, WardenError> {
        Ok(self.current_registry()?.fingerprint())
    }

    /// Delegation aggregates over the trailing `window` (all time when `None`).
    pub fn get_delegation_stats(&self, window: Option<Duration>) -> Result<DelegationStats, WardenError> {
        let mut filter = TraceFilter::new().outcome(TraceOutcome::Delegated);
        if let Some(window) = window {
            let span = ChronoDuration::from_std(window)
                .map_err(|e| WardenError::Configuration(format!("stats window out of range: {}", e)))?;
            if let Some(since) = crate::core::time::now_utc().checked_sub_signed(span) {
                filter = filter.since(since);
            }
        }
        Ok(DelegationStats::from_traces(&self.audit.traces(&filter)))
    }

    pub fn get_delegation_traces(&self, filter: &TraceFilter) -> Vec<DelegationTrace> {
        self.audit.traces(filter)
    }

    /// Drain the audit writer. The engine keeps answering afterwards, but
    /// traces stay in memory only.
    pub fn shutdown(&self) -> Result<(), WardenError> {
        self.audit.shutdown()
    }
}

fn ensure_owners_declared(roster: &Roster, registry: &OwnershipRegistry) -> Result<(), WardenError> {
    for rule in registry.rules() {
        if !roster.contains(&rule.owner) {
            return Err(WardenError::Configuration(format!(
                "rule '{}' names owner '{}' outside the roster",
                rule.pattern, rule.owner
            )));
        }
    }
    Ok(())
}
