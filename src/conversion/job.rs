//! A single conversion job and its state machine.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dcim_av::ConversionParams;
use dcim_core::{DiscoveredFile, JobId, JobState, Quality, Resolution};

/// Output location for `relative` under `output_root`: same folders, `.mp4`
/// extension.
pub fn output_path_for(output_root: &Path, relative: &Path) -> PathBuf {
    output_root.join(relative).with_extension("mp4")
}

/// One source file on its way to an iPhone-compatible MP4.
///
/// Owns its [`DiscoveredFile`]. State changes go through
/// [`transition`](Self::transition), which rejects anything outside
/// `Pending -> Running -> {Succeeded, Failed, TimedOut}` and
/// `Pending -> Cancelled`.
#[derive(Debug)]
pub struct ConversionJob {
    pub id: JobId,
    pub source: DiscoveredFile,
    pub output: PathBuf,
    pub quality: Quality,
    pub max_resolution: Option<Resolution>,
    state: JobState,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    diagnostics: Option<String>,
}

impl ConversionJob {
    pub fn new(
        source: DiscoveredFile,
        output: PathBuf,
        quality: Quality,
        max_resolution: Option<Resolution>,
    ) -> Self {
        Self {
            id: JobId::new(),
            source,
            output,
            quality,
            max_resolution,
            state: JobState::Pending,
            started_at: None,
            finished_at: None,
            diagnostics: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Captured converter diagnostics for failed or timed-out jobs.
    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    /// Time spent running, zero if the job never started.
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Move to `next`, recording start and finish instants.
    pub fn transition(&mut self, next: JobState) -> dcim_core::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(dcim_core::Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Instant::now();
        match next {
            JobState::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    /// Record a terminal outcome for a running job.
    ///
    /// Returns the error kind label when the conversion did not succeed.
    pub fn finish<T>(&mut self, result: &dcim_core::Result<T>) -> dcim_core::Result<Option<&'static str>> {
        match result {
            Ok(_) => {
                self.transition(JobState::Succeeded)?;
                Ok(None)
            }
            Err(e) => {
                let next = match e {
                    dcim_core::Error::ConversionTimeout { .. } => JobState::TimedOut,
                    _ => JobState::Failed,
                };
                self.transition(next)?;
                self.diagnostics = Some(e.to_string());
                Ok(Some(e.kind()))
            }
        }
    }

    /// Parameter set for the converter.
    pub fn params(&self) -> ConversionParams {
        ConversionParams {
            input: self.source.path.clone(),
            output: self.output.clone(),
            quality: self.quality,
            max_resolution: self.max_resolution,
        }
    }
}
