//! Error type shared across the engine: usage, startup resources, driver.

use std::fmt;

/// Failures that stop a run before or during startup. Per-transaction
/// problems never surface here; they become status-0 completions.
#[derive(Debug)]
pub enum PummelError {
    /// Bad invocation: missing URL, malformed value.
    Usage(String),
    /// A startup resource could not be opened (upload file, cookie file,
    /// debug directory).
    Resource {
        what: &'static str,
        path: String,
        source: String,
    },
    /// Driver or session level failure (client build, runtime startup).
    Driver {
        operation: &'static str,
        source: String,
    },
}

impl fmt::Display for PummelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PummelError::Usage(msg) => write!(f, "{}", msg),
            PummelError::Resource { what, path, source } => {
                write!(f, "cannot open {} {}: {}", what, path, source)
            }
            PummelError::Driver { operation, source } => {
                write!(f, "{} error: {}", operation, source)
            }
        }
    }
}

impl std::error::Error for PummelError {}

impl From<reqwest::Error> for PummelError {
    fn from(e: reqwest::Error) -> Self {
        PummelError::Driver {
            operation: "http client",
            source: e.to_string(),
        }
    }
}
