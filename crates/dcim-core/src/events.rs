//! Events flowing from the background pipeline to the presentation layer.
//!
//! The scanner, coordinator and resource monitor push [`PipelineEvent`]s
//! onto a bounded queue; a single consumer drains it on a fixed tick.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::{JobId, JobState};

/// Payload describing what happened in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // -- Scan lifecycle ------------------------------------------------------
    ScanStarted {
        root: PathBuf,
        workers: usize,
    },
    FileDiscovered {
        path: PathBuf,
        relative_path: PathBuf,
        size_bytes: u64,
        format: String,
    },
    ScanProgress {
        directories: u64,
        files_seen: u64,
        discovered: u64,
    },
    ScanError {
        path: PathBuf,
        message: String,
    },
    ScanFinished {
        discovered: u64,
        errors: u64,
        cancelled: bool,
    },

    // -- Conversion ----------------------------------------------------------
    FileSkipped {
        path: PathBuf,
        output: PathBuf,
        reason: String,
    },
    JobStarted {
        job_id: JobId,
        path: PathBuf,
        output: PathBuf,
    },
    JobFinished {
        job_id: JobId,
        path: PathBuf,
        output: PathBuf,
        state: JobState,
        /// Short error label (see `Error::kind`), absent on success.
        error_kind: Option<String>,
        message: Option<String>,
        elapsed: Duration,
    },

    // -- Resources -----------------------------------------------------------
    MemoryPressure {
        rss_bytes: u64,
        threshold_bytes: u64,
        caches_cleared: usize,
    },

    RunFinished {
        succeeded: u64,
        failed: u64,
        timed_out: u64,
        cancelled: u64,
        skipped: u64,
    },
}

impl PipelineEvent {
    /// Whether this event reports a per-file failure.
    pub fn is_failure(&self) -> bool {
        match self {
            Self::ScanError { .. } => true,
            Self::JobFinished { state, .. } => {
                matches!(state, JobState::Failed | JobState::TimedOut)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = PipelineEvent::ScanFinished {
            discovered: 3,
            errors: 1,
            cancelled: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "scan_finished");
        assert_eq!(json["discovered"], 3);
    }

    #[test]
    fn failure_classification() {
        let failed = PipelineEvent::JobFinished {
            job_id: JobId::new(),
            path: PathBuf::from("a.mov"),
            output: PathBuf::from("a.mp4"),
            state: JobState::TimedOut,
            error_kind: Some("conversion_timeout".into()),
            message: None,
            elapsed: Duration::from_secs(1),
        };
        assert!(failed.is_failure());

        let skipped = PipelineEvent::FileSkipped {
            path: PathBuf::from("a.mov"),
            output: PathBuf::from("a.mp4"),
            reason: "already exists".into(),
        };
        assert!(!skipped.is_failure());
    }
}
