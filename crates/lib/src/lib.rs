//! keel-lib: declarative infrastructure reconciliation.
//!
//! A stack's desired state is a graph of resources declared by a Lua program.
//! The engine diffs it against the recorded state, plans the minimal set of
//! provider operations and runs them concurrently in dependency order:
//!
//! - [`graph`]: desired resource graph, cycle detection, waves
//! - [`diff`]: per-resource actions and the [`diff::Plan`]
//! - [`execute`]: operation scheduling, checkpoints and stack orchestration
//! - [`state`]: durable per-stack state records and locks
//! - [`provider`]: the capability interface and the local reference providers

pub mod config;
pub mod consts;
pub mod diff;
pub mod eval;
pub mod execute;
pub mod graph;
pub mod lua;
pub mod placeholder;
pub mod platform;
pub mod provider;
pub mod resource;
pub mod state;
pub mod util;
pub mod value;
