//! Benchmark mode
//!
//! The [`TestOrchestrator`] runs test cases over a shared channel, one
//! expectation at a time, and records each case's outcome.

mod orchestrator;
mod pending;
mod report;
mod suite;

pub use orchestrator::{BenchEvent, TestOrchestrator};
pub use pending::{PendingExpectation, Resolution};
pub use report::{CaseOutcome, CaseResult, CaseStatus, ResultsExport};
pub use suite::TestSuite;

use thiserror::Error;

/// Benchmark errors
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("A benchmark run is already in progress")]
    AlreadyRunning,

    #[error("Benchmark run cancelled")]
    Cancelled,

    #[error("Unknown test case: {0}")]
    UnknownCase(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid case file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid test suite: {0}")]
    Invalid(String),

    #[error("Failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}
