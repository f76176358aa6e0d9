//! Integration test suite entry point.

mod backend_tests;
mod cli_tests;
mod engine_tests;
mod fixture;
mod persistence_tests;
