//! Ownership registry: the static table mapping path patterns to owners.
//!
//! Resolution is pure. For a fixed rule set the same path always resolves to
//! the same owner, and the registry never touches storage or the audit log.

use crate::core::actor::{Actor, Roster};
use crate::core::config::RuleSpec;
use crate::core::error::WardenError;
use crate::core::pattern::{OwnerPattern, Specificity, normalize_path};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct OwnershipRule {
    pub pattern: OwnerPattern,
    pub owner: Actor,
}

impl OwnershipRule {
    pub fn new(pattern: &str, owner: Actor) -> Result<Self, WardenError> {
        Ok(Self {
            pattern: OwnerPattern::parse(pattern)?,
            owner,
        })
    }
}

/// Outcome of an ownership lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    Owned(Actor),
    /// No rule covers the path.
    Unclear,
}

impl Ownership {
    pub fn owner(&self) -> Option<&Actor> {
        match self {
            Ownership::Owned(actor) => Some(actor),
            Ownership::Unclear => None,
        }
    }
}

/// Two rules that tie on specificity while matching a common path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleConflict {
    pub first: String,
    pub first_owner: String,
    pub second: String,
    pub second_owner: String,
    pub specificity: String,
}

#[derive(Debug, Clone, Default)]
pub struct OwnershipRegistry {
    rules: Vec<OwnershipRule>,
}

impl OwnershipRegistry {
    /// Build a registry. Conflicts are not checked here; see [`Self::ensure_valid`].
    pub fn new(rules: Vec<OwnershipRule>) -> Self {
        Self { rules }
    }

    /// Parse configured rules, resolving every owner against the roster.
    pub fn from_specs(roster: &Roster, specs: &[RuleSpec]) -> Result<Self, WardenError> {
        let rules = specs
            .iter()
            .map(|spec| OwnershipRule::new(&spec.pattern, roster.actor(&spec.owner)?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[OwnershipRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve the owner of a path (normalizing it first).
    pub fn get_owner(&self, path: &str) -> Result<Ownership, WardenError> {
        let normalized = normalize_path(path)?;
        Ok(self.resolve_normalized(&normalized))
    }

    /// Resolve an already-normalized path.
    ///
    /// The most specific matching rule wins. On a validated registry the winner
    /// is unique; otherwise the earliest declared rule breaks the tie.
    pub fn resolve_normalized(&self, normalized: &str) -> Ownership {
        let mut best: Option<(&OwnershipRule, Specificity)> = None;
        for rule in &self.rules {
            if !rule.pattern.matches(normalized) {
                continue;
            }
            let specificity = rule.pattern.specificity();
            match best {
                Some((_, current)) if current >= specificity => {}
                _ => best = Some((rule, specificity)),
            }
        }
        match best {
            Some((rule, _)) => Ownership::Owned(rule.owner.clone()),
            None => Ownership::Unclear,
        }
    }

    /// Every pair of distinct rules with equal specificity and overlapping matches.
    pub fn conflicts(&self) -> Vec<RuleConflict> {
        let mut out = Vec::new();
        for (i, a) in self.rules.iter().enumerate() {
            for b in &self.rules[i + 1..] {
                let specificity = a.pattern.specificity();
                if specificity != b.pattern.specificity() {
                    continue;
                }
                if a.pattern.overlaps(&b.pattern) {
                    out.push(RuleConflict {
                        first: a.pattern.to_string(),
                        first_owner: a.owner.to_string(),
                        second: b.pattern.to_string(),
                        second_owner: b.owner.to_string(),
                        specificity: specificity.to_string(),
                    });
                }
            }
        }
        out
    }

    pub fn validate_rules(&self) -> bool {
        self.conflicts().is_empty()
    }

    pub fn ensure_valid(&self) -> Result<(), WardenError> {
        let conflicts = self.conflicts();
        if conflicts.is_empty() {
            return Ok(());
        }
        let detail = conflicts
            .iter()
            .map(|c| {
                format!(
                    "'{}' ({}) vs '{}' ({}) at {}",
                    c.first, c.first_owner, c.second, c.second_owner, c.specificity
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(WardenError::Configuration(format!(
            "{} ambiguous ownership rule pair(s): {}",
            conflicts.len(),
            detail
        )))
    }

    pub fn get_allowed_paths(&self, owner: &Actor) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| &rule.owner == owner)
            .map(|rule| rule.pattern.to_string())
            .collect()
    }

    /// SHA-256 over the rule list in declaration order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for rule in &self.rules {
            hasher.update(rule.pattern.as_str().as_bytes());
            hasher.update(b"\t");
            hasher.update(rule.owner.name().as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Roster {
        Roster::new(["x", "y", "z"]).unwrap()
    }

    fn registry(rules: &[(&str, &str)]) -> OwnershipRegistry {
        let roster = roster();
        let specs: Vec<RuleSpec> = rules
            .iter()
            .map(|(p, o)| RuleSpec {
                pattern: p.to_string(),
                owner: o.to_string(),
            })
            .collect();
        OwnershipRegistry::from_specs(&roster, &specs).unwrap()
    }

    #[test]
    fn test_exact_rule_beats_glob() {
        let reg = registry(&[("a/**", "x"), ("a/b/file.txt", "y")]);
        let r = roster();
        assert_eq!(
            reg.get_owner("a/b/file.txt").unwrap(),
            Ownership::Owned(r.actor("y").unwrap())
        );
        assert_eq!(
            reg.get_owner("a/c/file.txt").unwrap(),
            Ownership::Owned(r.actor("x").unwrap())
        );
        assert!(reg.validate_rules());
    }

    #[test]
    fn test_longer_literal_prefix_wins() {
        let reg = registry(&[("docs/**", "x"), ("docs/architecture/**", "y")]);
        let r = roster();
        assert_eq!(
            reg.get_owner("docs/architecture/adr/001.md").unwrap(),
            Ownership::Owned(r.actor("y").unwrap())
        );
        assert_eq!(
            reg.get_owner("docs/roadmap.md").unwrap(),
            Ownership::Owned(r.actor("x").unwrap())
        );
    }

    #[test]
    fn test_unmatched_path_is_unclear() {
        let reg = registry(&[("src/**", "x")]);
        assert_eq!(reg.get_owner("README.md").unwrap(), Ownership::Unclear);
    }

    #[test]
    fn test_get_owner_normalizes_and_rejects_traversal() {
        let reg = registry(&[("src/**", "x")]);
        assert_eq!(
            reg.get_owner("./src//lib.rs").unwrap(),
            reg.get_owner("src/lib.rs").unwrap()
        );
        assert!(reg.get_owner("src/../../etc/passwd").is_err());
    }

    #[test]
    fn test_get_owner_is_deterministic() {
        let reg = registry(&[("a/**", "x"), ("a/b/**", "y"), ("a/b/c.txt", "z")]);
        for path in ["a/b/c.txt", "a/b/d.txt", "a/q.txt", "other"] {
            let first = reg.get_owner(path).unwrap();
            for _ in 0..5 {
                assert_eq!(reg.get_owner(path).unwrap(), first);
            }
        }
    }

    #[test]
    fn test_validate_rules_flags_equal_specificity_overlap() {
        let reg = registry(&[("a/*/c", "x"), ("a/**", "y")]);
        assert!(!reg.validate_rules());
        let conflicts = reg.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].first, "a/*/c");
        assert_eq!(conflicts[0].second, "a/**");
        assert!(reg.ensure_valid().is_err());
    }

    #[test]
    fn test_validate_rules_accepts_disjoint_equal_specificity() {
        let reg = registry(&[("src/**", "x"), ("docs/**", "y"), ("tests/**", "z")]);
        assert!(reg.validate_rules());
        assert!(reg.ensure_valid().is_ok());
    }

    #[test]
    fn test_duplicate_exact_rule_is_a_conflict() {
        let reg = registry(&[("pyproject.toml", "x"), ("pyproject.toml", "y")]);
        assert!(!reg.validate_rules());
    }

    #[test]
    fn test_from_specs_rejects_unknown_owner() {
        let specs = vec![RuleSpec {
            pattern: "src/**".to_string(),
            owner: "nobody".to_string(),
        }];
        assert!(OwnershipRegistry::from_specs(&roster(), &specs).is_err());
    }

    #[test]
    fn test_get_allowed_paths_lists_owner_patterns() {
        let reg = registry(&[("src/**", "x"), ("docs/**", "y"), ("Cargo.toml", "x")]);
        let x = roster().actor("x").unwrap();
        assert_eq!(reg.get_allowed_paths(&x), vec!["src/**", "Cargo.toml"]);
        let z = roster().actor("z").unwrap();
        assert!(reg.get_allowed_paths(&z).is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_rule_changes() {
        let a = registry(&[("src/**", "x")]);
        let b = registry(&[("src/**", "x")]);
        let c = registry(&[("src/**", "y")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
