//! Core engine for pummel: slot pool, weighted URL rotation, statistics,
//! and the periodic report. Used by the CLI binary; reusable as a library.

pub mod config;
pub mod cookie;
pub mod driver;
pub mod engine;
pub mod error;
pub mod report;
pub mod request;
pub mod rotator;
pub mod signal;
pub mod slot;
pub mod stats;

// Re-export the main API for the CLI
pub use config::{parse_weights, urlencode_data, FormField, RunConfig};
pub use engine::{run, run_with_flags, RunSummary};
pub use error::PummelError;
pub use signal::RunFlags;
