//! The `Warden` service context.
//!
//! Owns the shared [`EnforcementEngine`], which holds the roster it was built
//! from. Mediators are only handed out for actors declared in that roster.
//! There is no process-wide instance: construct one with
//! [`Warden::initialize`] and pass it (or its engine) to whoever needs it.
//! Tests can run many isolated instances side by side.

use crate::core::actor::{Actor, Roster};
use crate::core::audit::{AuditLog, AuditSink, JsonlAuditSink, SqliteAuditSink};
use crate::core::config::{RuleSpec, SinkKind, UnclearPolicy, WardenConfig};
use crate::core::engine::EnforcementEngine;
use crate::core::error::WardenError;
use crate::core::mediator::{ReadMediator, WriteMediator};
use crate::core::registry::OwnershipRegistry;
use crate::core::storage::Storage;
use std::sync::Arc;

pub struct Warden {
    engine: Arc<EnforcementEngine>,
}

impl Warden {
    /// Validate the configuration and start serving.
    ///
    /// This is the initialization barrier: an ambiguous rule set returns a
    /// `Configuration` error and no engine is ever created.
    pub fn initialize(config: &WardenConfig, storage: Arc<dyn Storage>) -> Result<Self, WardenError> {
        config.validate()?;
        let roster = config.roster()?;
        let registry = config.registry(&roster)?;
        registry.ensure_valid()?;
        let audit = open_audit_log(config)?;
        let engine = EnforcementEngine::new(
            roster,
            registry,
            storage,
            audit,
            config.enforcement.unclear_policy,
        )?
        .with_cache_capacity(config.enforcement.cache_capacity);
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn from_parts(
        roster: Roster,
        registry: OwnershipRegistry,
        storage: Arc<dyn Storage>,
        audit: AuditLog,
        unclear_policy: UnclearPolicy,
    ) -> Result<Self, WardenError> {
        let engine = EnforcementEngine::new(roster, registry, storage, audit, unclear_policy)?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<EnforcementEngine> {
        &self.engine
    }

    pub fn roster(&self) -> &Roster {
        self.engine.roster()
    }

    pub fn actor(&self, name: &str) -> Result<Actor, WardenError> {
        self.roster().actor(name)
    }

    /// Fails with `UnknownActor` for an actor outside the roster.
    pub fn write_mediator(&self, actor: &Actor) -> Result<WriteMediator, WardenError> {
        self.engine.ensure_declared(actor)?;
        Ok(WriteMediator::new(Arc::clone(&self.engine), actor.clone()))
    }

    pub fn read_mediator(&self, actor: &Actor) -> Result<ReadMediator, WardenError> {
        self.engine.ensure_declared(actor)?;
        Ok(ReadMediator::new(Arc::clone(&self.engine), actor.clone()))
    }

    /// Replace the rule set. Owners must come from the existing roster.
    pub fn reconfigure(&self, rules: &[RuleSpec]) -> Result<(), WardenError> {
        let registry = OwnershipRegistry::from_specs(self.roster(), rules)?;
        self.engine.reconfigure(registry)
    }

    /// Stop accepting durable writes and drain the audit writer.
    pub fn shutdown(self) -> Result<(), WardenError> {
        self.engine.shutdown()
    }
}

fn open_audit_log(config: &WardenConfig) -> Result<AuditLog, WardenError> {
    let audit = &config.audit;
    let sink: Box<dyn AuditSink> = match (audit.sink, &audit.path) {
        (SinkKind::None, _) => return Ok(AuditLog::in_memory()),
        (SinkKind::Sqlite, Some(path)) => Box::new(SqliteAuditSink::open(path)?),
        (SinkKind::Jsonl, Some(path)) => Box::new(JsonlAuditSink::new(path.clone())),
        (_, None) => {
            return Err(WardenError::Configuration(
                "audit.path is required for a durable sink".to_string(),
            ));
        }
    };
    AuditLog::with_sink(sink, audit.retry_policy())
}
