//! Presentation side of the event queue.
//!
//! A single consumer drains [`PipelineEvent`]s on a fixed tick and renders
//! them. The projector holds no pipeline state of its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use dcim_core::{JobState, PipelineEvent};
use tokio_util::sync::CancellationToken;

use crate::queue::BoundedQueue;

/// Renders pipeline events.
pub trait EventProjector: Send {
    fn project(&mut self, event: &PipelineEvent);

    /// Called once per drain tick, after that tick's events.
    fn tick(&mut self, _dropped_events: u64) {}
}

/// Drain `events` every `interval`, up to `batch` at a time, until `stop`
/// fires. A final drain after `stop` empties the queue.
pub async fn drain_events(
    events: Arc<BoundedQueue<PipelineEvent>>,
    projector: &mut dyn EventProjector,
    interval: Duration,
    batch: usize,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let stopping = tokio::select! {
            _ = stop.cancelled() => true,
            _ = ticker.tick() => false,
        };

        if stopping {
            loop {
                let drained = events.pop_batch(batch.max(1));
                if drained.is_empty() {
                    break;
                }
                drained.iter().for_each(|e| projector.project(e));
            }
            projector.tick(events.dropped_count());
            return;
        }

        for event in events.pop_batch(batch.max(1)) {
            projector.project(&event);
        }
        projector.tick(events.dropped_count());
    }
}

/// Line-oriented terminal output with timestamps.
#[derive(Debug, Default)]
pub struct ConsoleProjector {
    /// Also print per-file discovery lines.
    verbose: bool,
    discovered: u64,
    finished: u64,
    reported_drops: u64,
}

impl ConsoleProjector {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    fn line(&self, message: impl std::fmt::Display) {
        println!("{} - {}", Local::now().format("%H:%M:%S"), message);
    }

    fn file_name(path: &std::path::Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

impl EventProjector for ConsoleProjector {
    fn project(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::ScanStarted { root, workers } => {
                self.line(format_args!("Scanning {} ({workers} workers)", root.display()));
            }
            PipelineEvent::ScanProgress {
                directories,
                discovered,
                ..
            } => {
                self.line(format_args!("... {directories} folders, {discovered} videos"));
            }
            PipelineEvent::FileDiscovered {
                relative_path,
                size_bytes,
                format,
                ..
            } => {
                self.discovered += 1;
                if self.verbose {
                    let mb = *size_bytes as f64 / (1024.0 * 1024.0);
                    self.line(format_args!(
                        "Found {} ({mb:.1} MB, {format})",
                        relative_path.display()
                    ));
                }
            }
            PipelineEvent::ScanError { path, message } => {
                self.line(format_args!("Scan error at {}: {message}", path.display()));
            }
            PipelineEvent::ScanFinished {
                discovered,
                errors,
                cancelled,
            } => {
                let suffix = if *cancelled { " (cancelled)" } else { "" };
                self.line(format_args!(
                    "Scan complete: {discovered} videos, {errors} errors{suffix}"
                ));
            }
            PipelineEvent::FileSkipped { path, reason, .. } => {
                self.line(format_args!("Skipping {} - {reason}", Self::file_name(path)));
            }
            PipelineEvent::JobStarted { path, .. } => {
                self.line(format_args!("Converting {}...", Self::file_name(path)));
            }
            PipelineEvent::JobFinished {
                path,
                state,
                message,
                elapsed,
                ..
            } => {
                self.finished += 1;
                let name = Self::file_name(path);
                match state {
                    JobState::Succeeded => self.line(format_args!(
                        "Converted {name} in {:.1}s",
                        elapsed.as_secs_f64()
                    )),
                    JobState::Cancelled => self.line(format_args!("Cancelled {name}")),
                    _ => self.line(format_args!(
                        "Failed {name} ({state}): {}",
                        message.as_deref().unwrap_or("no diagnostics")
                    )),
                }
            }
            PipelineEvent::MemoryPressure {
                rss_bytes,
                threshold_bytes,
                caches_cleared,
            } => {
                self.line(format_args!(
                    "Memory high ({} MB > {} MB), cleared {caches_cleared} caches",
                    rss_bytes / (1024 * 1024),
                    threshold_bytes / (1024 * 1024)
                ));
            }
            PipelineEvent::RunFinished {
                succeeded,
                failed,
                timed_out,
                cancelled,
                skipped,
            } => {
                self.line(format_args!(
                    "Done: {succeeded} converted, {failed} failed, {timed_out} timed out, \
                     {cancelled} cancelled, {skipped} skipped"
                ));
            }
        }
    }

    fn tick(&mut self, dropped_events: u64) {
        if dropped_events > self.reported_drops {
            self.line(format_args!(
                "{} progress messages dropped",
                dropped_events - self.reported_drops
            ));
            self.reported_drops = dropped_events;
        }
    }
}

/// Keeps every event; useful for tests and JSON output.
#[derive(Debug, Default)]
pub struct RecordingProjector {
    pub events: Vec<PipelineEvent>,
    pub ticks: usize,
}

impl EventProjector for RecordingProjector {
    fn project(&mut self, event: &PipelineEvent) {
        self.events.push(event.clone());
    }

    fn tick(&mut self, _dropped_events: u64) {
        self.ticks += 1;
    }
}
