//! Unified error type for the converter.
//!
//! Every failure funnels into [`Error`]. Per-file failures (scan, probe,
//! conversion) are reported and the run continues; [`Error::kind`] gives the
//! short label that ends up in pipeline events and the log file.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Category of a resource sampling failure.
///
/// The monitor logs each category once, so this is `Hash + Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFailure {
    /// The platform has no sampling backend.
    Unsupported,
    /// Reading the OS interface failed (permissions, missing procfs).
    Io,
    /// The OS interface returned data we could not interpret.
    Parse,
}

impl fmt::Display for SampleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported"),
            Self::Io => write!(f, "io"),
            Self::Parse => write!(f, "parse"),
        }
    }
}

/// Unified error type covering all failure modes of the converter.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A directory or entry could not be read during the walk.
    #[error("Scan error at {}: {message}", path.display())]
    Scan {
        /// The directory or entry that failed.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Metadata could not be obtained for a file.
    #[error("Probe error for {}: {message}", path.display())]
    Probe {
        /// The probed file.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// The converter exited unsuccessfully.
    #[error("Conversion failed for {}: {message}", path.display())]
    ConversionFailed {
        /// The source file.
        path: PathBuf,
        /// Captured diagnostic output.
        message: String,
    },

    /// The converter exceeded its wall-clock budget and was terminated.
    #[error("Conversion of {} timed out after {timeout:?}", path.display())]
    ConversionTimeout {
        /// The source file.
        path: PathBuf,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// Sampling process resources failed.
    #[error("Resource sample error ({kind}): {message}")]
    ResourceSample {
        /// Failure category.
        kind: SampleFailure,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool could not be run or returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool ran past its timeout and was killed.
    #[error("Tool [{tool}] timed out after {timeout:?}")]
    ToolTimeout {
        /// Name of the tool that was killed.
        tool: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A conversion job was asked to make an illegal state change.
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition {
        /// State the job was in.
        from: crate::JobState,
        /// State that was requested.
        to: crate::JobState,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "source folder").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Short, stable label for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Scan { .. } => "scan",
            Error::Probe { .. } => "probe",
            Error::ConversionFailed { .. } => "conversion_failure",
            Error::ConversionTimeout { .. } => "conversion_timeout",
            Error::ResourceSample { .. } => "resource_sample",
            Error::Tool { .. } => "tool",
            Error::ToolTimeout { .. } => "tool_timeout",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::NotFound { .. } => "not_found",
            Error::Config(_) => "config",
            Error::Io { .. } => "io",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Scan`].
    pub fn scan(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Error::Scan {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Probe`].
    pub fn probe(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Error::Probe {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::ResourceSample`].
    pub fn sample(kind: SampleFailure, message: impl fmt::Display) -> Self {
        Error::ResourceSample {
            kind,
            message: message.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
