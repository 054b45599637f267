//! Drains the discovery queue and runs conversions on a bounded pool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dcim_core::config::ConversionConfig;
use dcim_core::{DiscoveredFile, JobState, PipelineEvent, Quality, Resolution};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{output_path_for, ConversionJob};
use crate::queue::BoundedQueue;

/// Coordinator settings, usually derived from [`ConversionConfig`].
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub output_root: PathBuf,
    pub quality: Quality,
    pub max_resolution: Option<Resolution>,
    pub workers: usize,
    pub batch_size: usize,
    pub timeout: Duration,
    pub overwrite: bool,
    /// Sleep between polls of an empty discovery queue.
    pub poll_interval: Duration,
}

impl CoordinatorOptions {
    pub fn from_config(config: &ConversionConfig, output_root: PathBuf) -> Self {
        Self {
            output_root,
            quality: config.quality,
            max_resolution: config.max_resolution,
            workers: config.workers,
            batch_size: config.batch_size,
            timeout: config.timeout(),
            overwrite: config.overwrite,
            poll_interval: config.poll_interval(),
        }
    }
}

/// Terminal counts for one conversion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Files whose output already existed or was claimed earlier in the run.
    pub skipped: u64,
}

impl ConversionSummary {
    fn record(&mut self, state: JobState) {
        match state {
            JobState::Succeeded => self.succeeded += 1,
            JobState::Failed => self.failed += 1,
            JobState::TimedOut => self.timed_out += 1,
            JobState::Cancelled => self.cancelled += 1,
            JobState::Pending | JobState::Running => {}
        }
    }

    /// Jobs that reached a terminal state, skips excluded.
    pub fn total_jobs(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out + self.cancelled
    }

    pub fn to_event(self) -> PipelineEvent {
        PipelineEvent::RunFinished {
            succeeded: self.succeeded,
            failed: self.failed,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            skipped: self.skipped,
        }
    }
}

/// Consumer side of the discovery queue.
///
/// Runs until the producer has signalled completion and the queue is
/// empty, or until cancelled. Once cancelled no new converter process is
/// started; jobs already running finish or hit their own timeout.
pub struct ConversionCoordinator {
    options: CoordinatorOptions,
    ffmpeg: PathBuf,
    discovered: Arc<BoundedQueue<DiscoveredFile>>,
    events: Arc<BoundedQueue<PipelineEvent>>,
    producer_done: Arc<AtomicBool>,
}

impl ConversionCoordinator {
    pub fn new(
        options: CoordinatorOptions,
        ffmpeg: PathBuf,
        discovered: Arc<BoundedQueue<DiscoveredFile>>,
        events: Arc<BoundedQueue<PipelineEvent>>,
        producer_done: Arc<AtomicBool>,
    ) -> Self {
        Self {
            options,
            ffmpeg,
            discovered,
            events,
            producer_done,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> ConversionSummary {
        let workers = self.options.workers.max(1);
        let batch_size = self.options.batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<JobState> = JoinSet::new();
        let mut summary = ConversionSummary::default();
        // Output path -> source that claimed it during this run.
        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();

        info!(
            workers,
            batch_size,
            quality = %self.options.quality,
            timeout = ?self.options.timeout,
            "Conversion coordinator started"
        );

        'batches: loop {
            while let Some(joined) = tasks.try_join_next() {
                summary.record(Self::joined_state(joined));
            }

            if cancel.is_cancelled() {
                break;
            }

            let batch = self.discovered.pop_batch(batch_size);
            if batch.is_empty() {
                if self.producer_done.load(Ordering::Acquire) && self.discovered.is_empty() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break 'batches,
                    _ = tokio::time::sleep(self.options.poll_interval) => continue 'batches,
                }
            }

            debug!(size = batch.len(), "Dispatching batch");
            let mut pending = batch.into_iter();
            while let Some(file) = pending.next() {
                let Some(job) = self.prepare(file, &mut claimed, &mut summary) else {
                    continue;
                };

                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                };
                match permit {
                    Some(permit) if !cancel.is_cancelled() => {
                        tasks.spawn(run_job(
                            job,
                            permit,
                            self.ffmpeg.clone(),
                            self.options.timeout,
                            Arc::clone(&self.events),
                        ));
                    }
                    _ => {
                        self.cancel_job(job, &mut summary);
                        for file in pending.by_ref() {
                            if let Some(job) = self.prepare(file, &mut claimed, &mut summary) {
                                self.cancel_job(job, &mut summary);
                            }
                        }
                        break 'batches;
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            // Work still queued never becomes a running job.
            for file in self.discovered.pop_batch(usize::MAX) {
                if let Some(job) = self.prepare(file, &mut claimed, &mut summary) {
                    self.cancel_job(job, &mut summary);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            summary.record(Self::joined_state(joined));
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "Conversion finished"
        );
        summary
    }

    /// Build a job for `file`, or skip it if its output already exists.
    ///
    /// Sources differing only in extension share an output path; the first
    /// one seen in the run claims it and later ones are skipped.
    fn prepare(
        &self,
        file: DiscoveredFile,
        claimed: &mut HashMap<PathBuf, PathBuf>,
        summary: &mut ConversionSummary,
    ) -> Option<ConversionJob> {
        let output = output_path_for(&self.options.output_root, &file.relative_path);

        if let Some(owner) = claimed.get(&output) {
            debug!(path = %file.path.display(), owner = %owner.display(), "Output claimed, skipping");
            summary.skipped += 1;
            let reason = format!("output claimed by {}", owner.display());
            self.events.push(PipelineEvent::FileSkipped {
                path: file.path,
                output,
                reason,
            });
            return None;
        }

        if !self.options.overwrite && output.exists() {
            debug!(path = %file.path.display(), output = %output.display(), "Output exists, skipping");
            summary.skipped += 1;
            self.events.push(PipelineEvent::FileSkipped {
                path: file.path,
                output,
                reason: "output already exists".into(),
            });
            return None;
        }

        claimed.insert(output.clone(), file.path.clone());
        Some(ConversionJob::new(
            file,
            output,
            self.options.quality,
            self.options.max_resolution,
        ))
    }

    fn cancel_job(&self, mut job: ConversionJob, summary: &mut ConversionSummary) {
        if let Err(e) = job.transition(JobState::Cancelled) {
            warn!(job_id = %job.id, error = %e, "Could not cancel job");
            return;
        }
        summary.record(JobState::Cancelled);
        self.events.push(PipelineEvent::JobFinished {
            job_id: job.id,
            path: job.source.path,
            output: job.output,
            state: JobState::Cancelled,
            error_kind: None,
            message: None,
            elapsed: Duration::ZERO,
        });
    }

    fn joined_state(joined: Result<JobState, tokio::task::JoinError>) -> JobState {
        joined.unwrap_or_else(|e| {
            warn!(error = %e, "Conversion task panicked");
            JobState::Failed
        })
    }
}

async fn run_job(
    mut job: ConversionJob,
    _permit: OwnedSemaphorePermit,
    ffmpeg: PathBuf,
    timeout: Duration,
    events: Arc<BoundedQueue<PipelineEvent>>,
) -> JobState {
    if let Err(e) = job.transition(JobState::Running) {
        warn!(job_id = %job.id, error = %e, "Job not runnable");
        return job.state();
    }
    events.push(PipelineEvent::JobStarted {
        job_id: job.id,
        path: job.source.path.clone(),
        output: job.output.clone(),
    });

    let result = match prepare_output_dir(&job).await {
        Ok(()) => dcim_av::convert_for_iphone(&ffmpeg, &job.params(), timeout)
            .await
            .map(|_| ()),
        Err(e) => Err(e),
    };

    if result.is_err() {
        // A killed or failed encode leaves a partial file that a later run
        // would otherwise skip as already converted.
        let _ = tokio::fs::remove_file(&job.output).await;
    }

    let error_kind = match job.finish(&result) {
        Ok(kind) => kind,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Invalid job transition");
            return job.state();
        }
    };

    match &result {
        Ok(()) => info!(
            job_id = %job.id,
            path = %job.source.path.display(),
            output = %job.output.display(),
            elapsed = ?job.elapsed(),
            "Converted"
        ),
        Err(e) => warn!(
            job_id = %job.id,
            path = %job.source.path.display(),
            state = %job.state(),
            error = %e,
            "Conversion did not succeed"
        ),
    }

    let state = job.state();
    events.push(PipelineEvent::JobFinished {
        job_id: job.id,
        path: job.source.path.clone(),
        output: job.output.clone(),
        state,
        error_kind: error_kind.map(str::to_string),
        message: job.diagnostics().map(str::to_string),
        elapsed: job.elapsed(),
    });
    state
}

async fn prepare_output_dir(job: &ConversionJob) -> dcim_core::Result<()> {
    let Some(parent) = job.output.parent() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| dcim_core::Error::ConversionFailed {
            path: job.source.path.clone(),
            message: format!("cannot create {}: {e}", parent.display()),
        })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::{Instant, SystemTime};

    /// Writes an executable shell script standing in for ffmpeg.
    fn fake_ffmpeg(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const SUCCEEDS: &str = r#"for last; do :; done
echo converted > "$last""#;
    const FAILS: &str = "echo 'Invalid data found when processing input' >&2\nexit 1";
    const HANGS: &str = "sleep 10";

    struct Harness {
        _dir: tempfile::TempDir,
        source: PathBuf,
        output: PathBuf,
        tools: PathBuf,
        discovered: Arc<BoundedQueue<DiscoveredFile>>,
        events: Arc<BoundedQueue<PipelineEvent>>,
        done: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("DCIM");
            let output = dir.path().join("out");
            let tools = dir.path().join("bin");
            std::fs::create_dir_all(&source).unwrap();
            std::fs::create_dir_all(&tools).unwrap();
            Self {
                source,
                output,
                tools,
                _dir: dir,
                discovered: Arc::new(BoundedQueue::new(100)),
                events: Arc::new(BoundedQueue::new(1_000)),
                done: Arc::new(AtomicBool::new(false)),
            }
        }

        fn discover(&self, relative: &str) {
            let path = self.source.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"video").unwrap();
            self.discovered.push(DiscoveredFile {
                path,
                relative_path: PathBuf::from(relative),
                size_bytes: 5,
                modified: SystemTime::now(),
                info: None,
            });
        }

        fn options(&self) -> CoordinatorOptions {
            CoordinatorOptions {
                output_root: self.output.clone(),
                quality: Quality::Medium,
                max_resolution: None,
                workers: 2,
                batch_size: 4,
                timeout: Duration::from_secs(10),
                overwrite: false,
                poll_interval: Duration::from_millis(10),
            }
        }

        fn coordinator(&self, options: CoordinatorOptions, ffmpeg: PathBuf) -> ConversionCoordinator {
            ConversionCoordinator::new(
                options,
                ffmpeg,
                Arc::clone(&self.discovered),
                Arc::clone(&self.events),
                Arc::clone(&self.done),
            )
        }

        fn finished_events(&self) -> Vec<PipelineEvent> {
            self.events
                .pop_batch(usize::MAX)
                .into_iter()
                .filter(|e| matches!(e, PipelineEvent::JobFinished { .. }))
                .collect()
        }
    }

    #[tokio::test]
    async fn converts_into_mirrored_folders() {
        let h = Harness::new();
        h.discover("100APPLE/IMG_0001.MOV");
        h.discover("101APPLE/IMG_0101.avi");
        h.done.store(true, Ordering::Release);

        let ffmpeg = fake_ffmpeg(&h.tools, "ffmpeg", SUCCEEDS);
        let summary = h
            .coordinator(h.options(), ffmpeg)
            .run(CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.total_jobs(), 2);
        assert!(h.output.join("100APPLE/IMG_0001.mp4").is_file());
        assert!(h.output.join("101APPLE/IMG_0101.mp4").is_file());

        let finished = h.finished_events();
        assert_eq!(finished.len(), 2);
        assert!(finished.iter().all(|e| matches!(
            e,
            PipelineEvent::JobFinished {
                state: JobState::Succeeded,
                error_kind: None,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn failed_conversion_reports_stderr() {
        let h = Harness::new();
        h.discover("IMG_0001.MOV");
        h.done.store(true, Ordering::Release);

        let ffmpeg = fake_ffmpeg(&h.tools, "ffmpeg", FAILS);
        let summary = h
            .coordinator(h.options(), ffmpeg)
            .run(CancellationToken::new())
            .await;

        assert_eq!(summary.failed, 1);
        match h.finished_events().as_slice() {
            [PipelineEvent::JobFinished {
                state,
                error_kind,
                message,
                ..
            }] => {
                assert_eq!(*state, JobState::Failed);
                assert_eq!(error_kind.as_deref(), Some("conversion_failure"));
                assert!(message.as_deref().unwrap().contains("Invalid data found"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(!h.output.join("IMG_0001.mp4").exists());
    }

    #[tokio::test]
    async fn slow_conversion_times_out() {
        let h = Harness::new();
        h.discover("IMG_0001.MOV");
        h.done.store(true, Ordering::Release);

        let ffmpeg = fake_ffmpeg(&h.tools, "ffmpeg", HANGS);
        let options = CoordinatorOptions {
            timeout: Duration::from_millis(200),
            ..h.options()
        };

        let started = Instant::now();
        let summary = h.coordinator(options, ffmpeg).run(CancellationToken::new()).await;

        assert_eq!(summary.timed_out, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            h.finished_events().as_slice(),
            [PipelineEvent::JobFinished {
                state: JobState::TimedOut,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn existing_output_is_skipped() {
        let h = Harness::new();
        h.discover("100APPLE/IMG_0001.MOV");
        h.done.store(true, Ordering::Release);
        std::fs::create_dir_all(h.output.join("100APPLE")).unwrap();
        std::fs::write(h.output.join("100APPLE/IMG_0001.mp4"), b"old").unwrap();

        let ffmpeg = fake_ffmpeg(&h.tools, "ffmpeg", SUCCEEDS);
        let summary = h
            .coordinator(h.options(), ffmpeg)
            .run(CancellationToken::new())
            .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_jobs(), 0);
        let events = h.events.pop_batch(usize::MAX);
        assert!(matches!(events.as_slice(), [PipelineEvent::FileSkipped { .. }]));
        assert_eq!(
            std::fs::read(h.output.join("100APPLE/IMG_0001.mp4")).unwrap(),
            b"old"
        );
    }

    #[tokio::test]
    async fn colliding_outputs_convert_once() {
        let h = Harness::new();
        h.discover("100APPLE/IMG_0001.MOV");
        h.discover("100APPLE/IMG_0001.avi");
        h.done.store(true, Ordering::Release);

        // The .avi encode would fail after the .MOV one finished.
        let body = format!("case \"$*\" in *.avi*) sleep 0.3; exit 1;; esac\n{SUCCEEDS}");
        let ffmpeg = fake_ffmpeg(&h.tools, "ffmpeg", &body);
        let summary = h
            .coordinator(h.options(), ffmpeg)
            .run(CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 1);
        assert!(h.output.join("100APPLE/IMG_0001.mp4").is_file());

        let events = h.events.pop_batch(usize::MAX);
        let skipped: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::FileSkipped { path, reason, .. } => Some((path, reason)),
                _ => None,
            })
            .collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].0.ends_with("IMG_0001.avi"));
        assert!(skipped[0].1.contains("claimed by"));
        assert!(skipped[0].1.contains("IMG_0001.MOV"));
    }

    #[tokio::test]
    async fn overwrite_replaces_existing_output() {
        let h = Harness::new();
        h.discover("IMG_0001.MOV");
        h.done.store(true, Ordering::Release);
        std::fs::create_dir_all(&h.output).unwrap();
        std::fs::write(h.output.join("IMG_0001.mp4"), b"old").unwrap();

        let ffmpeg = fake_ffmpeg(&h.tools, "ffmpeg", SUCCEEDS);
        let options = CoordinatorOptions {
            overwrite: true,
            ..h.options()
        };
        let summary = h.coordinator(options, ffmpeg).run(CancellationToken::new()).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            std::fs::read_to_string(h.output.join("IMG_0001.mp4")).unwrap().trim(),
            "converted"
        );
    }

    #[tokio::test]
    async fn cancelled_run_starts_nothing() {
        let h = Harness::new();
        for i in 0..5 {
            h.discover(&format!("IMG_{i:04}.MOV"));
        }

        let ffmpeg = fake_ffmpeg(&h.tools, "ffmpeg", SUCCEEDS);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = h.coordinator(h.options(), ffmpeg).run(cancel).await;

        assert_eq!(summary.cancelled, 5);
        assert_eq!(summary.succeeded, 0);
        assert!(h.discovered.is_empty());
        assert!(!h.output.exists());
    }

    #[tokio::test]
    async fn waits_for_producer_before_finishing() {
        let h = Harness::new();
        let ffmpeg = fake_ffmpeg(&h.tools, "ffmpeg", SUCCEEDS);
        let coordinator = h.coordinator(h.options(), ffmpeg);

        let producer = {
            let discovered = Arc::clone(&h.discovered);
            let done = Arc::clone(&h.done);
            let path = h.source.join("late.mov");
            std::fs::write(&path, b"video").unwrap();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                discovered.push(DiscoveredFile {
                    path,
                    relative_path: PathBuf::from("late.mov"),
                    size_bytes: 5,
                    modified: SystemTime::now(),
                    info: None,
                });
                done.store(true, Ordering::Release);
            }
        };

        let (summary, ()) = tokio::join!(coordinator.run(CancellationToken::new()), producer);
        assert_eq!(summary.succeeded, 1);
        assert!(h.output.join("late.mp4").is_file());
    }
}
