//! Actor identities and the closed roster they are minted from.
//!
//! An [`Actor`] can only be obtained from a [`Roster`], and a roster is fixed
//! when the configuration is loaded. A misspelled owner in a rule therefore
//! fails at load time instead of quietly becoming a new, unenforced owner.

use crate::core::error::WardenError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Actor(Arc<str>);

impl Actor {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Actor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// The finite set of actors known to a deployment.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    actors: Vec<Actor>,
}

impl Roster {
    pub fn new<I, S>(names: I) -> Result<Self, WardenError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut actors: Vec<Actor> = Vec::new();
        for raw in names {
            let name = raw.as_ref().trim();
            validate_actor_name(name)?;
            if actors.iter().any(|a| a.name() == name) {
                return Err(WardenError::Configuration(format!(
                    "actor '{}' is declared more than once",
                    name
                )));
            }
            actors.push(Actor(Arc::from(name)));
        }
        if actors.is_empty() {
            return Err(WardenError::Configuration(
                "roster must declare at least one actor".to_string(),
            ));
        }
        Ok(Self { actors })
    }

    /// Look up a declared actor, failing for anything outside the roster.
    pub fn actor(&self, name: &str) -> Result<Actor, WardenError> {
        self.get(name).ok_or_else(|| {
            WardenError::Configuration(format!(
                "unknown actor '{}' (declared: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn get(&self, name: &str) -> Option<Actor> {
        self.actors.iter().find(|a| a.name() == name).cloned()
    }

    pub fn contains(&self, actor: &Actor) -> bool {
        self.actors.contains(actor)
    }

    pub fn names(&self) -> Vec<&str> {
        self.actors.iter().map(Actor::name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Actor> {
        self.actors.iter()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

fn validate_actor_name(name: &str) -> Result<(), WardenError> {
    if name.is_empty() {
        return Err(WardenError::Configuration(
            "actor name must not be empty".to_string(),
        ));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(WardenError::Configuration(format!(
            "actor name '{}' may only contain ASCII letters, digits, '_', '-' or '.'",
            name
        )));
    }
    Ok(())
}
