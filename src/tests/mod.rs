//! Executor scenario tests and their shared fixtures.

pub mod support;
