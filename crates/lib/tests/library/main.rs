//! Library integration tests: programs evaluated and applied through the
//! public API against the local providers.

mod common;

mod recovery_tests;
mod stack_tests;
