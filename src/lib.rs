//! Warden: ownership enforcement for multi-agent repositories.
//!
//! **Warden decides which actor may mutate which path, and records what happened.**
//!
//! Every actor in a deployment gets a mediator bound to its identity. Reads go
//! straight through. Mutations are checked against a static, validated
//! ownership table: the owner's writes execute, and anyone else's are rerouted
//! to the owner (delegated) instead of failing. Every mutation attempt leaves
//! an immutable trace in the audit log.
//!
//! # Architecture
//!
//! - **Roster**: the closed set of actors, fixed at configuration time
//! - **OwnershipRegistry**: `pattern -> owner` rules with specificity ordering
//! - **OwnershipCache**: read-mostly memo of resolutions, cleared wholesale
//! - **EnforcementEngine**: the mediator every operation passes through
//! - **AuditLog**: append-only traces, persisted off the critical path
//! - **WriteMediator / ReadMediator**: per-actor entry points
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden::core::config;
//! use warden::core::context::Warden;
//! use warden::core::storage::FsStorage;
//!
//! # fn main() -> Result<(), warden::core::error::WardenError> {
//! let cfg = config::load_from_file(std::path::Path::new("warden.toml"))?;
//! let warden = Warden::initialize(&cfg, Arc::new(FsStorage::new(".")))?;
//! let dev = warden.actor("code_developer")?;
//! let result = warden.write_mediator(&dev)?.write("docs/architecture/adr.md", "...")?;
//! if let Some(owner) = result.delegated_to() {
//!     println!("rerouted to {}", owner);
//! }
//! warden.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: registry, cache, engine, audit, mediators and their support types

pub mod core;
mod cli;

use clap::Parser;
use cli::{Cli, Command, SourceArgs};
use colored::Colorize;
use core::error::WardenError;
use core::registry::Ownership;
use core::trace::{DelegationStats, DelegationTrace, TraceFilter, TraceOutcome};
use core::{config, db, schemas, time, trace};
use std::path::Path;

pub fn run() -> Result<(), WardenError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate { config, format } => run_validate(&config, &format),
        Command::Owner {
            config,
            paths,
            format,
        } => run_owner(&config, &paths, &format),
        Command::Allowed {
            config,
            actor,
            format,
        } => run_allowed(&config, &actor, &format),
        Command::Traces {
            source,
            actor,
            owner,
            outcome,
            prefix,
            limit,
            format,
        } => {
            let mut filter = source_filter(&source)?;
            filter.requesting_actor = actor;
            filter.owner_actor = owner;
            filter.outcome = outcome.map(TraceOutcome::from);
            filter.path_prefix = prefix;
            filter.limit = limit;
            let traces = load_traces(&source.source, &filter)?;
            print_traces(&traces, &format)
        }
        Command::Stats { source, format } => {
            let filter = source_filter(&source)?.outcome(TraceOutcome::Delegated);
            let traces = load_traces(&source.source, &filter)?;
            print_stats(&DelegationStats::from_traces(&traces), &format)
        }
    }
}

fn run_validate(config_path: &Path, format: &str) -> Result<(), WardenError> {
    let cfg = config::load_from_file(config_path)?;
    let roster = cfg.roster()?;
    let registry = cfg.registry(&roster)?;
    let conflicts = registry.conflicts();

    if format == "json" {
        let report = serde_json::json!({
            "valid": conflicts.is_empty(),
            "actors": roster.names(),
            "rules": registry.len(),
            "fingerprint": registry.fingerprint(),
            "conflicts": conflicts,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if conflicts.is_empty() {
        println!(
            "{} {} rules, {} actors, fingerprint {}",
            "✓ valid:".bright_green().bold(),
            registry.len(),
            roster.len(),
            &registry.fingerprint()[..12]
        );
    } else {
        println!("{}", "✗ ambiguous ownership rules:".bright_red().bold());
        for c in &conflicts {
            println!(
                "  {} ({}) <-> {} ({}) at {}",
                c.first.bright_white(),
                c.first_owner,
                c.second.bright_white(),
                c.second_owner,
                c.specificity
            );
        }
    }

    registry.ensure_valid()
}

fn run_owner(config_path: &Path, paths: &[String], format: &str) -> Result<(), WardenError> {
    let cfg = config::load_from_file(config_path)?;
    let roster = cfg.roster()?;
    let registry = cfg.registry(&roster)?;
    registry.ensure_valid()?;

    let mut rows = Vec::with_capacity(paths.len());
    for path in paths {
        let owner = match registry.get_owner(path)? {
            Ownership::Owned(actor) => Some(actor.name().to_string()),
            Ownership::Unclear => None,
        };
        rows.push((path.clone(), owner));
    }

    if format == "json" {
        let out: Vec<_> = rows
            .iter()
            .map(|(path, owner)| serde_json::json!({ "path": path, "owner": owner }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for (path, owner) in rows {
            match owner {
                Some(owner) => println!("{} -> {}", path, owner.bright_cyan()),
                None => println!("{} -> {}", path, "unclear".bright_yellow()),
            }
        }
    }
    Ok(())
}

fn run_allowed(config_path: &Path, actor: &str, format: &str) -> Result<(), WardenError> {
    let cfg = config::load_from_file(config_path)?;
    let roster = cfg.roster()?;
    let registry = cfg.registry(&roster)?;
    let actor = roster.actor(actor)?;
    let patterns = registry.get_allowed_paths(&actor);

    if format == "json" {
        let out = serde_json::json!({ "actor": actor, "patterns": patterns });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for pattern in patterns {
            println!("{}", pattern);
        }
    }
    Ok(())
}

fn source_filter(source: &SourceArgs) -> Result<TraceFilter, WardenError> {
    let mut filter = TraceFilter::new();
    if let Some(secs) = source.since_secs {
        let span = i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                WardenError::Configuration(format!("--since-secs {} is out of range", secs))
            })?;
        // A window reaching past the earliest representable time covers everything.
        if let Some(since) = time::now_utc().checked_sub_signed(span) {
            filter = filter.since(since);
        }
    }
    Ok(filter)
}

fn load_traces(source: &Path, filter: &TraceFilter) -> Result<Vec<DelegationTrace>, WardenError> {
    let is_jsonl = source
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
    if is_jsonl {
        return Ok(filter.apply(&trace::read_traces_jsonl(source)?));
    }
    // A directory means the default database inside it.
    let db_path = if source.is_dir() {
        source.join(schemas::AUDIT_DB_NAME)
    } else {
        source.to_path_buf()
    };
    if !db_path.exists() {
        return Err(WardenError::Configuration(format!(
            "audit store {} does not exist",
            db_path.display()
        )));
    }
    let conn = db::db_connect(&db_path)?;
    db::query_traces(&conn, filter)
}

fn print_traces(traces: &[DelegationTrace], format: &str) -> Result<(), WardenError> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(traces)?);
        return Ok(());
    }
    for t in traces {
        let outcome = match t.outcome {
            TraceOutcome::Direct => t.outcome.as_str().bright_green(),
            TraceOutcome::Delegated => t.outcome.as_str().bright_yellow(),
            TraceOutcome::PolicyGap => t.outcome.as_str().bright_red(),
        };
        println!(
            "{} {} {} {} {} -> {} ({:.3}ms)",
            time::format_ts(&t.timestamp),
            outcome,
            t.operation,
            t.path.bright_white(),
            t.requesting_actor,
            t.owner_actor.as_deref().unwrap_or("-"),
            t.latency_ms
        );
    }
    Ok(())
}

fn print_stats(stats: &DelegationStats, format: &str) -> Result<(), WardenError> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }
    println!("{} {}", "Delegations:".bright_white().bold(), stats.total);
    let sections = [
        ("By requesting actor", &stats.by_requesting_actor),
        ("By path prefix", &stats.by_path_prefix),
        ("By owner", &stats.by_owner),
    ];
    for (title, counts) in sections {
        println!("{}", title.bright_white());
        for (key, count) in counts {
            println!("  {:<32} {}", key, count);
        }
    }
    Ok(())
}
