//! Per-actor façades over the enforcement engine.
//!
//! A mediator is bound to one actor for its whole life; callers cannot pick
//! a different identity per call. Actors are expected to touch resources only
//! through their mediators. This module cannot stop code that goes to storage
//! directly.

use crate::core::actor::Actor;
use crate::core::engine::{EnforcementEngine, Operation, OperationRequest, OperationResult};
use crate::core::error::WardenError;
use crate::core::storage::StorageOutput;
use std::sync::Arc;

#[derive(Clone)]
pub struct WriteMediator {
    engine: Arc<EnforcementEngine>,
    actor: Actor,
    raise_on_violation: bool,
}

impl WriteMediator {
    pub fn new(engine: Arc<EnforcementEngine>, actor: Actor) -> Self {
        Self {
            engine,
            actor,
            raise_on_violation: false,
        }
    }

    /// Fail with `OwnershipViolation` instead of delegating.
    pub fn with_raise_on_violation(mut self, raise: bool) -> Self {
        self.raise_on_violation = raise;
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    fn submit(&self, path: &str, operation: Operation) -> Result<OperationResult, WardenError> {
        let request = OperationRequest::new(self.actor.clone(), path, operation)
            .raise_on_violation(self.raise_on_violation);
        self.engine.intercept(request)
    }

    pub fn write(&self, path: &str, content: &str) -> Result<OperationResult, WardenError> {
        self.submit(
            path,
            Operation::Write {
                content: content.to_string(),
            },
        )
    }

    pub fn edit(
        &self,
        path: &str,
        find: &str,
        replace: &str,
    ) -> Result<OperationResult, WardenError> {
        self.submit(
            path,
            Operation::Edit {
                find: find.to_string(),
                replace: replace.to_string(),
            },
        )
    }

    pub fn delete(&self, path: &str) -> Result<OperationResult, WardenError> {
        self.submit(path, Operation::Delete)
    }

    /// Whether this actor owns `path`. Records nothing and never touches storage.
    pub fn can_write(&self, path: &str) -> bool {
        self.engine.can_write(&self.actor, path)
    }

    pub fn get_allowed_paths(&self) -> Result<Vec<String>, WardenError> {
        self.engine.allowed_paths(&self.actor)
    }
}

/// Read access. Always bypasses ownership and is never traced.
#[derive(Clone)]
pub struct ReadMediator {
    engine: Arc<EnforcementEngine>,
    actor: Actor,
}

impl ReadMediator {
    pub fn new(engine: Arc<EnforcementEngine>, actor: Actor) -> Self {
        Self { engine, actor }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    fn observe(&self, path: &str, operation: Operation) -> Result<StorageOutput, WardenError> {
        let kind = operation.kind();
        self.engine
            .intercept(OperationRequest::new(self.actor.clone(), path, operation))?
            .into_output()
            .ok_or_else(|| WardenError::UnexpectedOutput(kind.to_string()))
    }

    pub fn read(&self, path: &str) -> Result<String, WardenError> {
        match self.observe(path, Operation::Read)? {
            StorageOutput::Content { text } => Ok(text),
            _ => Err(WardenError::UnexpectedOutput("read".to_string())),
        }
    }

    pub fn exists(&self, path: &str) -> Result<bool, WardenError> {
        match self.observe(path, Operation::Exists)? {
            StorageOutput::Exists { exists } => Ok(exists),
            _ => Err(WardenError::UnexpectedOutput("exists".to_string())),
        }
    }

    /// Entries directly under `dir`, optionally filtered by a file-name glob.
    pub fn list(&self, dir: &str, pattern: Option<&str>) -> Result<Vec<String>, WardenError> {
        let operation = Operation::List {
            pattern: pattern.map(str::to_string),
        };
        match self.observe(dir, operation)? {
            StorageOutput::Listing { entries } => Ok(entries),
            _ => Err(WardenError::UnexpectedOutput("list".to_string())),
        }
    }
}
