//! Lua program evaluation.
//!
//! A stack is declared by a Lua program. Evaluating it only records
//! declarations; nothing touches a provider until the engine runs.
//!
//! # Submodules
//!
//! - [`globals`] - the `keel` global table
//! - [`resource`] - resource declarations and handles
//! - [`runtime`] - Lua VM setup and program loading

pub mod globals;
pub mod resource;
pub mod runtime;
