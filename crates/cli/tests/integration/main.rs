//! CLI integration tests.
//!
//! Each test runs the `keel` binary against an isolated state store and
//! local runtime inside a temporary directory.

mod common;

mod destroy_tests;
mod plan_tests;
mod state_tests;
mod up_tests;
