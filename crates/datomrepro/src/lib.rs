// Public fallible APIs in this crate share one concrete error contract (`ReproError`).
// Repeating per-function `# Errors` boilerplate obscures behavior more than it clarifies.
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod config;
pub mod datom_log;
pub mod engine;
pub mod error;
pub(crate) mod jsonl;
pub mod models;
pub mod probe;
pub mod run_log;
pub mod schema;
pub mod search;
pub mod tester;

pub use config::{DatabaseConfig, HarnessConfig};
pub use engine::{DatomConnection, DatomEngine, SqliteEngine};
pub use error::{ReproError, Result};
pub use search::{SearchBound, SearchOutcome};
pub use tester::{ScopedDatabase, VulnerabilityTester};
