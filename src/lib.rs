//! Remend library crate
//!
//! Exposes the repair pipeline's modules so benchmarks and external
//! tooling can exercise them without going through CLI startup.

pub mod candidates;
pub mod config;
pub mod dataset;
pub mod llm;
pub mod locate;
pub mod outcome;
pub mod patch;
pub mod prompts;
pub mod repo;
pub mod results;
pub mod runner;
pub mod search;
pub mod traces;
pub mod validate;
