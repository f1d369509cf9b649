use std::sync::Arc;
use tempfile::tempdir;
use warden::core::actor::Roster;
use warden::core::audit::AuditLog;
use warden::core::config::{self, RuleSpec, UnclearPolicy};
use warden::core::context::Warden;
use warden::core::error::{StorageError, WardenError};
use warden::core::mediator::WriteMediator;
use warden::core::registry::{OwnershipRegistry, OwnershipRule};
use warden::core::storage::{FsStorage, MemoryStorage, Storage, StorageOutput};
use warden::core::trace::{OperationKind, TraceFilter, TraceOutcome};

const CONFIG: &str = r#"
actors = ["architect", "code_developer", "project_manager"]

[[rules]]
pattern = "docs/**"
owner = "architect"

[[rules]]
pattern = "docs/roadmap/**"
owner = "project_manager"

[[rules]]
pattern = "coffee_maker/**"
owner = "code_developer"
"#;

fn warden_with(storage: Arc<dyn Storage>, policy: UnclearPolicy) -> Warden {
    let roster = Roster::new(["architect", "code_developer", "project_manager"]).expect("roster");
    let rule = |p: &str, o: &str| OwnershipRule::new(p, roster.actor(o).unwrap()).unwrap();
    let registry = OwnershipRegistry::new(vec![
        rule("docs/**", "architect"),
        rule("docs/roadmap/**", "project_manager"),
        rule("coffee_maker/**", "code_developer"),
    ]);
    Warden::from_parts(roster, registry, storage, AuditLog::in_memory(), policy)
        .expect("valid rules")
}

fn all_traces(warden: &Warden) -> Vec<warden::core::trace::DelegationTrace> {
    warden.engine().get_delegation_traces(&TraceFilter::new())
}

#[test]
fn owner_write_mutates_storage_and_is_visible_to_every_reader() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage.clone(), UnclearPolicy::FailOpen);
    let dev = warden.actor("code_developer").unwrap();
    let pm = warden.actor("project_manager").unwrap();

    let result = warden
        .write_mediator(&dev)
        .unwrap()
        .write("coffee_maker/cli/main.py", "print('hi')")
        .expect("owner write");
    assert!(result.success());
    assert!(!result.delegated());
    assert_eq!(
        result.output(),
        Some(&StorageOutput::Written { bytes: 11 })
    );

    assert_eq!(
        warden.read_mediator(&pm).unwrap().read("coffee_maker/cli/main.py").unwrap(),
        "print('hi')"
    );

    let traces = all_traces(&warden);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].outcome, TraceOutcome::Direct);
    assert_eq!(traces[0].owner_actor.as_deref(), Some("code_developer"));
    assert_eq!(Some(traces[0].trace_id.clone()), result.trace_id);
}

#[test]
fn non_owner_write_is_delegated_and_leaves_storage_untouched() {
    let storage = Arc::new(MemoryStorage::with_files([("docs/adr/001.md", "original")]));
    let warden = warden_with(storage.clone(), UnclearPolicy::FailOpen);
    let dev = warden.actor("code_developer").unwrap();
    let arch = warden.actor("architect").unwrap();

    let result = warden
        .write_mediator(&dev)
        .unwrap()
        .write("docs/adr/001.md", "rewritten")
        .expect("delegation is not an error");
    assert!(result.success());
    assert!(result.delegated());
    assert_eq!(result.delegated_to(), Some(&arch));
    assert!(result.output().is_none());
    assert_eq!(storage.read("docs/adr/001.md").unwrap(), "original");

    let traces = all_traces(&warden);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].outcome, TraceOutcome::Delegated);
    assert_eq!(traces[0].requesting_actor, "code_developer");
    assert_eq!(traces[0].owner_actor.as_deref(), Some("architect"));
    assert_eq!(traces[0].operation, OperationKind::Write);
}

#[test]
fn raise_on_violation_fails_without_mutation_but_still_traces() {
    let storage = Arc::new(MemoryStorage::with_files([("docs/roadmap/ROADMAP.md", "v1")]));
    let warden = warden_with(storage.clone(), UnclearPolicy::FailOpen);
    let dev = warden.actor("code_developer").unwrap();
    let strict = warden.write_mediator(&dev).unwrap().with_raise_on_violation(true);

    let err = strict
        .edit("docs/roadmap/ROADMAP.md", "v1", "v2")
        .expect_err("non-owner edit must fail");
    match err {
        WardenError::OwnershipViolation { actor, owner, path } => {
            assert_eq!(actor, "code_developer");
            assert_eq!(owner, "project_manager");
            assert_eq!(path, "docs/roadmap/ROADMAP.md");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(storage.read("docs/roadmap/ROADMAP.md").unwrap(), "v1");

    let traces = all_traces(&warden);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].outcome, TraceOutcome::Delegated);
    assert_eq!(traces[0].operation, OperationKind::Edit);
}

#[test]
fn reads_never_trace_and_ignore_ownership() {
    let storage = Arc::new(MemoryStorage::with_files([
        ("docs/a.md", "a"),
        ("docs/b.txt", "b"),
        ("README.md", "readme"),
    ]));
    let warden = warden_with(storage, UnclearPolicy::FailClosed);

    for name in ["architect", "code_developer", "project_manager"] {
        let reader = warden.read_mediator(&warden.actor(name).unwrap()).unwrap();
        assert_eq!(reader.read("docs/a.md").unwrap(), "a");
        // Unclear under fail-closed; reads still pass.
        assert_eq!(reader.read("README.md").unwrap(), "readme");
        assert!(reader.exists("docs").unwrap());
        assert!(!reader.exists("nowhere.md").unwrap());
        assert_eq!(
            reader.list("docs", Some("*.md")).unwrap(),
            vec!["docs/a.md".to_string()]
        );
        assert_eq!(reader.list("", None).unwrap().len(), 2);
    }

    assert!(all_traces(&warden).is_empty());
    assert!(warden.engine().cache().is_empty());
}

#[test]
fn can_write_is_a_pure_query() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage.clone(), UnclearPolicy::FailOpen);
    let arch = warden.write_mediator(&warden.actor("architect").unwrap()).unwrap();

    for _ in 0..50 {
        assert!(arch.can_write("docs/design.md"));
        assert!(!arch.can_write("docs/roadmap/ROADMAP.md"));
        assert!(!arch.can_write("README.md"));
    }
    assert!(all_traces(&warden).is_empty());
    assert!(storage.snapshot().is_empty());
    assert_eq!(arch.get_allowed_paths().unwrap(), vec!["docs/**".to_string()]);
}

#[test]
fn unclear_path_under_fail_open_executes_and_records_policy_gap() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage.clone(), UnclearPolicy::FailOpen);
    let dev = warden.actor("code_developer").unwrap();

    let result = warden.write_mediator(&dev).unwrap().write("README.md", "hello").unwrap();
    assert!(!result.delegated());
    assert_eq!(storage.read("README.md").unwrap(), "hello");

    let traces = all_traces(&warden);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].outcome, TraceOutcome::PolicyGap);
    assert!(traces[0].owner_actor.is_none());
}

#[test]
fn unclear_path_under_fail_closed_is_refused() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage.clone(), UnclearPolicy::FailClosed);
    let dev = warden.actor("code_developer").unwrap();

    let err = warden.write_mediator(&dev).unwrap().write("README.md", "hello").unwrap_err();
    assert!(matches!(err, WardenError::OwnershipUnclear { ref path } if path == "README.md"));
    assert!(storage.snapshot().is_empty());
    assert_eq!(all_traces(&warden)[0].outcome, TraceOutcome::PolicyGap);
}

#[test]
fn owner_storage_failure_is_reported_after_tracing() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage, UnclearPolicy::FailOpen);
    let arch = warden.write_mediator(&warden.actor("architect").unwrap()).unwrap();

    let err = arch.delete("docs/missing.md").unwrap_err();
    assert!(matches!(err, WardenError::Storage(StorageError::NotFound(_))));

    let err = arch.edit("docs/missing.md", "a", "b").unwrap_err();
    assert!(matches!(err, WardenError::Storage(StorageError::NotFound(_))));

    let traces = all_traces(&warden);
    assert_eq!(traces.len(), 2);
    assert!(traces.iter().all(|t| t.outcome == TraceOutcome::Direct));
}

#[test]
fn paths_are_normalized_before_resolution() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage.clone(), UnclearPolicy::FailOpen);
    let arch = warden.write_mediator(&warden.actor("architect").unwrap()).unwrap();

    let result = arch.write("./docs//guide.md", "g").unwrap();
    assert!(!result.delegated());
    assert!(storage.snapshot().contains_key("docs/guide.md"));

    assert!(matches!(
        arch.write("../outside.md", "x"),
        Err(WardenError::InvalidPath { .. })
    ));
    assert!(matches!(
        arch.write("/etc/passwd", "x"),
        Err(WardenError::InvalidPath { .. })
    ));
}

#[test]
fn reconfigure_applies_to_the_next_resolution() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage, UnclearPolicy::FailOpen);
    let dev = warden.write_mediator(&warden.actor("code_developer").unwrap()).unwrap();

    assert!(dev.write("docs/a.md", "x").unwrap().delegated());

    warden
        .reconfigure(&[RuleSpec {
            pattern: "docs/**".to_string(),
            owner: "code_developer".to_string(),
        }])
        .expect("valid rules");
    assert!(!dev.write("docs/a.md", "x").unwrap().delegated());

    let bad = [RuleSpec {
        pattern: "docs/**".to_string(),
        owner: "intern".to_string(),
    }];
    assert!(matches!(
        warden.reconfigure(&bad),
        Err(WardenError::Configuration(_))
    ));
    assert!(dev.can_write("docs/a.md"));
}

#[test]
fn initialize_refuses_ambiguous_configuration() {
    let ranked = r#"
actors = ["architect", "code_developer"]

[[rules]]
pattern = "docs/*/a.md"
owner = "architect"

[[rules]]
pattern = "docs/x/*"
owner = "code_developer"
"#;
    let cfg = config::load_from_str(ranked).unwrap();
    let result = Warden::initialize(&cfg, Arc::new(MemoryStorage::new()));
    // `docs/*/a.md` has a one-segment prefix and `docs/x/*` two, so they are
    // ranked, not ambiguous.
    assert!(result.is_ok());

    let tied = r#"
actors = ["architect", "code_developer"]

[[rules]]
pattern = "docs/*/a.md"
owner = "architect"

[[rules]]
pattern = "docs/*/*"
owner = "code_developer"
"#;
    let cfg = config::load_from_str(tied).unwrap();
    assert!(matches!(
        Warden::initialize(&cfg, Arc::new(MemoryStorage::new())),
        Err(WardenError::Configuration(_))
    ));
}

#[test]
fn delegation_stats_aggregate_by_actor_prefix_and_owner() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage, UnclearPolicy::FailOpen);
    let dev = warden.write_mediator(&warden.actor("code_developer").unwrap()).unwrap();
    let pm = warden.write_mediator(&warden.actor("project_manager").unwrap()).unwrap();

    dev.write("docs/a.md", "x").unwrap();
    dev.write("docs/roadmap/R.md", "x").unwrap();
    pm.write("coffee_maker/app.py", "x").unwrap();
    dev.write("coffee_maker/app.py", "x").unwrap();

    let stats = warden.engine().get_delegation_stats(None).unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_requesting_actor["code_developer"], 2);
    assert_eq!(stats.by_requesting_actor["project_manager"], 1);
    assert_eq!(stats.by_path_prefix["docs"], 2);
    assert_eq!(stats.by_path_prefix["coffee_maker"], 1);
    assert_eq!(stats.by_owner["project_manager"], 1);

    let recent = warden
        .engine()
        .get_delegation_stats(Some(std::time::Duration::from_secs(3600)))
        .unwrap();
    assert_eq!(recent.total, 3);

    let dev_only = warden.engine().get_delegation_traces(
        &TraceFilter::new()
            .requesting_actor("code_developer")
            .outcome(TraceOutcome::Delegated),
    );
    assert_eq!(dev_only.len(), 2);
}

#[test]
fn filesystem_storage_end_to_end() {
    let tmp = tempdir().expect("tempdir");
    let cfg = config::load_from_str(CONFIG).unwrap();
    let warden = Warden::initialize(&cfg, Arc::new(FsStorage::new(tmp.path()))).unwrap();
    let dev = warden.actor("code_developer").unwrap();
    let writer = warden.write_mediator(&dev).unwrap();

    writer.write("coffee_maker/app.py", "x = 1\nx = 1\n").unwrap();
    let edited = writer.edit("coffee_maker/app.py", "x = 1", "x = 2").unwrap();
    assert_eq!(
        edited.output(),
        Some(&StorageOutput::Edited { replacements: 2 })
    );
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("coffee_maker/app.py")).unwrap(),
        "x = 2\nx = 2\n"
    );

    assert!(writer.write("docs/a.md", "nope").unwrap().delegated());
    assert!(!tmp.path().join("docs/a.md").exists());

    let reader = warden.read_mediator(&dev).unwrap();
    assert_eq!(
        reader.list("coffee_maker", None).unwrap(),
        vec!["coffee_maker/app.py".to_string()]
    );

    writer.delete("coffee_maker/app.py").unwrap();
    assert!(!reader.exists("coffee_maker/app.py").unwrap());
    warden.shutdown().unwrap();
}

#[test]
fn actors_outside_the_roster_are_refused() {
    let storage = Arc::new(MemoryStorage::new());
    let warden = warden_with(storage.clone(), UnclearPolicy::FailOpen);
    let intruder = Roster::new(["intruder"])
        .expect("roster")
        .actor("intruder")
        .expect("actor");

    assert!(matches!(
        warden.write_mediator(&intruder),
        Err(WardenError::UnknownActor { ref actor }) if actor == "intruder"
    ));
    assert!(matches!(
        warden.read_mediator(&intruder),
        Err(WardenError::UnknownActor { .. })
    ));

    // A mediator built by hand still goes through the engine's roster check.
    let forged = WriteMediator::new(Arc::clone(warden.engine()), intruder.clone());
    assert!(matches!(
        forged.write("README.md", "pwned"),
        Err(WardenError::UnknownActor { .. })
    ));
    assert!(!forged.can_write("README.md"));
    assert!(storage.read("README.md").is_err());
    assert!(all_traces(&warden).is_empty());

    // A declared name resolves to the same identity whichever roster minted it.
    let architect = Roster::new(["architect"])
        .expect("roster")
        .actor("architect")
        .expect("actor");
    assert!(warden.write_mediator(&architect).is_ok());
}

#[test]
fn configured_cache_capacity_bounds_resolutions() {
    let cfg_text = format!("{CONFIG}\n[enforcement]\ncache_capacity = 8\n");
    let cfg = config::load_from_str(&cfg_text).unwrap();
    let warden = Warden::initialize(&cfg, Arc::new(MemoryStorage::new())).unwrap();
    let dev = warden.write_mediator(&warden.actor("code_developer").unwrap()).unwrap();

    for i in 0..100 {
        assert!(dev.can_write(&format!("coffee_maker/m{i}.py")));
    }
    let stats = warden.engine().cache().stats();
    assert_eq!(warden.engine().cache().capacity(), 8);
    assert!(stats.entries <= 8);
    assert!(stats.evictions > 0);
    assert_eq!(stats.generation, 0);
}
