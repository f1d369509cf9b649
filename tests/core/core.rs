use warden::core::actor::Roster;
use warden::core::cache::OwnershipCache;
use warden::core::config::{self, SinkKind, UnclearPolicy};
use warden::core::error::WardenError;
use warden::core::pattern::{OwnerPattern, Specificity};
use warden::core::registry::{Ownership, OwnershipRegistry, OwnershipRule};
use tempfile::tempdir;

fn roster() -> Roster {
    Roster::new(["architect", "code_developer", "project_manager"]).expect("roster")
}

fn registry(roster: &Roster, rules: &[(&str, &str)]) -> OwnershipRegistry {
    OwnershipRegistry::new(
        rules
            .iter()
            .map(|(pattern, owner)| {
                OwnershipRule::new(pattern, roster.actor(owner).expect("actor")).expect("rule")
            })
            .collect(),
    )
}

#[test]
fn exact_rule_beats_glob_for_the_same_subtree() {
    let roster = roster();
    let reg = registry(
        &roster,
        &[("a/**", "architect"), ("a/b/file.txt", "code_developer")],
    );
    assert!(reg.validate_rules());

    let y = roster.actor("code_developer").unwrap();
    let x = roster.actor("architect").unwrap();
    assert_eq!(reg.get_owner("a/b/file.txt").unwrap(), Ownership::Owned(y));
    assert_eq!(reg.get_owner("a/c/file.txt").unwrap(), Ownership::Owned(x));
}

#[test]
fn resolution_is_deterministic_across_repeated_calls() {
    let roster = roster();
    let reg = registry(
        &roster,
        &[
            ("docs/**", "architect"),
            ("docs/roadmap/*", "project_manager"),
            ("coffee_maker/**", "code_developer"),
        ],
    );
    for path in ["docs/roadmap/ROADMAP.md", "docs/adr/001.md", "coffee_maker/x.py", "README.md"] {
        let first = reg.get_owner(path).unwrap();
        for _ in 0..10 {
            assert_eq!(reg.get_owner(path).unwrap(), first, "{path}");
        }
    }
    assert_eq!(reg.get_owner("README.md").unwrap(), Ownership::Unclear);
}

#[test]
fn validation_flags_equal_specificity_overlap_only() {
    let roster = roster();

    let clean = registry(
        &roster,
        &[("docs/**", "architect"), ("src/**", "code_developer")],
    );
    assert!(clean.validate_rules());
    assert!(clean.conflicts().is_empty());

    let ambiguous = registry(
        &roster,
        &[("docs/*/spec.md", "architect"), ("docs/**", "project_manager")],
    );
    assert!(!ambiguous.validate_rules());
    let conflicts = ambiguous.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].first, "docs/*/spec.md");
    assert_eq!(conflicts[0].second, "docs/**");

    // Same specificity, disjoint match sets.
    let disjoint = registry(
        &roster,
        &[("docs/*/a.md", "architect"), ("src/*/a.md", "code_developer")],
    );
    assert!(disjoint.validate_rules());

    let err = ambiguous.ensure_valid().unwrap_err();
    assert!(matches!(err, WardenError::Configuration(_)));
}

#[test]
fn specificity_orders_exact_above_longer_prefixes() {
    let exact = OwnerPattern::parse("docs/a.md").unwrap();
    let deep = OwnerPattern::parse("docs/roadmap/**").unwrap();
    let shallow = OwnerPattern::parse("docs/**").unwrap();
    assert_eq!(exact.specificity(), Specificity::Exact);
    assert!(exact.specificity() > deep.specificity());
    assert!(deep.specificity() > shallow.specificity());
    assert!(OwnerPattern::parse("docs/*.md").is_err());
}

#[test]
fn cache_serves_stale_results_until_cleared() {
    let roster = roster();
    let before = registry(&roster, &[("docs/**", "architect")]);
    let after = registry(&roster, &[("docs/**", "project_manager")]);
    let cache = OwnershipCache::new();

    let arch = roster.actor("architect").unwrap();
    let pm = roster.actor("project_manager").unwrap();

    assert_eq!(
        cache.get_owner(&before, "docs/a.md").unwrap(),
        Ownership::Owned(arch.clone())
    );
    assert_eq!(
        cache.get_owner(&after, "docs/a.md").unwrap(),
        Ownership::Owned(arch),
        "cached result must persist until clear()"
    );

    cache.clear().unwrap();
    assert_eq!(
        cache.get_owner(&after, "docs/a.md").unwrap(),
        Ownership::Owned(pm)
    );

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.generation, 1);
}

#[test]
fn config_file_round_trip_resolves_audit_path_relative_to_config() {
    let tmp = tempdir().expect("tempdir");
    let cfg_path = tmp.path().join("warden.toml");
    std::fs::write(
        &cfg_path,
        r#"
actors = ["architect", "code_developer"]

[enforcement]
unclear_policy = "fail_closed"

[audit]
sink = "jsonl"
path = "audit/traces.jsonl"

[[rules]]
pattern = "docs/**"
owner = "architect"
"#,
    )
    .expect("write config");

    let cfg = config::load_from_file(&cfg_path).expect("load config");
    assert_eq!(cfg.enforcement.unclear_policy, UnclearPolicy::FailClosed);
    assert_eq!(cfg.audit.sink, SinkKind::Jsonl);
    assert_eq!(
        cfg.audit.path.as_deref(),
        Some(tmp.path().join("audit/traces.jsonl").as_path())
    );

    let roster = cfg.roster().unwrap();
    let reg = cfg.registry(&roster).unwrap();
    assert_eq!(reg.len(), 1);
}

#[test]
fn config_rejects_unknown_owner_and_unknown_keys() {
    let unknown_owner = r#"
actors = ["architect"]

[[rules]]
pattern = "docs/**"
owner = "architekt"
"#;
    let cfg = config::load_from_str(unknown_owner).expect("structurally valid");
    let roster = cfg.roster().unwrap();
    assert!(matches!(
        cfg.registry(&roster),
        Err(WardenError::Configuration(_))
    ));

    let typo_key = r#"
actors = ["architect"]

[enforcement]
unclear_polcy = "fail_open"
"#;
    assert!(config::load_from_str(typo_key).is_err());
}

#[test]
fn fingerprint_tracks_rule_content() {
    let roster = roster();
    let a = registry(&roster, &[("docs/**", "architect")]);
    let b = registry(&roster, &[("docs/**", "architect")]);
    let c = registry(&roster, &[("docs/**", "project_manager")]);
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), c.fingerprint());
}
