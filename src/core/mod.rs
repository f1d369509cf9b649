//! Core modules for Warden's ownership enforcement.
//!
//! Leaf-first: `pattern` and `actor` feed the `registry`, which the `cache`
//! memoizes; the `engine` mediates every operation against `storage` and
//! records outcomes in the `audit` log; `mediator` exposes per-actor façades
//! and `context` owns the lifecycle.

pub mod actor;
pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod mediator;
pub mod pattern;
pub mod registry;
pub mod schemas;
pub mod storage;
pub mod time;
pub mod trace;
