//! One end-to-end run: scan, convert, monitor, project.
//!
//! ```text
//! Scanner (rayon) -> discovery queue -> ConversionCoordinator (tokio) -> ffmpeg
//!        \                                  |
//!         `-----------> event queue <-------'<--- ResourceMonitor
//!                            |
//!                        projector tick
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dcim_av::Prober;
use dcim_core::config::Config;
use dcim_core::{DiscoveredFile, PipelineEvent};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::LruCache;
use crate::conversion::{ConversionCoordinator, ConversionSummary, CoordinatorOptions};
use crate::monitor::{PressureSignal, ProcSampler, ResourceMonitor, ResourceSampler};
use crate::projector::{drain_events, EventProjector};
use crate::queue::BoundedQueue;
use crate::scanner::{ProbeCache, ScanOptions, ScanSummary, Scanner};

/// Totals for a convert run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub scan: ScanSummary,
    pub conversion: ConversionSummary,
    /// Discoveries lost to a full discovery queue.
    pub dropped_discoveries: u64,
    /// Events lost to a full event queue.
    pub dropped_events: u64,
}

impl RunSummary {
    /// Whether every created job succeeded.
    pub fn is_clean(&self) -> bool {
        self.conversion.failed == 0 && self.conversion.timed_out == 0
    }
}

/// Shared state for one run, built from a [`Config`].
pub struct Pipeline {
    config: Config,
    ffmpeg: Option<PathBuf>,
    prober: Option<Arc<dyn Prober>>,
    sampler: Option<Box<dyn ResourceSampler>>,
    discovered: Arc<BoundedQueue<DiscoveredFile>>,
    events: Arc<BoundedQueue<PipelineEvent>>,
    cache: Arc<ProbeCache>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            discovered: Arc::new(BoundedQueue::new(config.queues.discovery_capacity)),
            events: Arc::new(BoundedQueue::new(config.queues.event_capacity)),
            cache: Arc::new(LruCache::new("probe", config.cache.capacity)),
            config,
            ffmpeg: None,
            prober: None,
            sampler: None,
        }
    }

    /// Converter binary. Required by [`convert`](Self::convert).
    pub fn with_ffmpeg(mut self, path: PathBuf) -> Self {
        self.ffmpeg = Some(path);
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Replace the OS sampler used by the resource monitor.
    pub fn with_sampler(mut self, sampler: Box<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Queue the projector drains.
    pub fn events(&self) -> Arc<BoundedQueue<PipelineEvent>> {
        Arc::clone(&self.events)
    }

    /// Scan the configured source and convert everything found.
    ///
    /// Startup problems (no converter, missing source) are errors; per-file
    /// problems are reported through events and the summary.
    pub async fn convert(
        mut self,
        cancel: CancellationToken,
        projector: &mut dyn EventProjector,
    ) -> Result<RunSummary> {
        let ffmpeg = self
            .ffmpeg
            .take()
            .context("ffmpeg not found; install it or set tools.ffmpeg_path")?;
        let source = self.config.paths.source.clone();
        let output = self.config.paths.output.clone();
        check_source(&source)?;

        tracing::info!(
            source = %source.display(),
            output = %output.display(),
            quality = %self.config.conversion.quality,
            "Starting conversion run"
        );

        let (monitor_stop, monitor_handle, pressure) = self.start_monitor(&cancel);

        let producer_done = Arc::new(AtomicBool::new(false));
        let scanner = self.scanner(pressure);
        let scan_handle = {
            let cancel = cancel.clone();
            let done = Arc::clone(&producer_done);
            let source = source.clone();
            tokio::task::spawn_blocking(move || {
                let _done = ProducerDone(done);
                scanner.scan(&source, &cancel)
            })
        };

        let coordinator = ConversionCoordinator::new(
            CoordinatorOptions::from_config(&self.config.conversion, output),
            ffmpeg,
            Arc::clone(&self.discovered),
            Arc::clone(&self.events),
            producer_done,
        );
        let convert_handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.run(cancel).await })
        };

        let projector_stop = CancellationToken::new();
        let work = {
            let events = Arc::clone(&self.events);
            let projector_stop = projector_stop.clone();
            async move {
                let scan = scan_handle.await;
                let conversion = convert_handle.await;
                if let Ok(summary) = &conversion {
                    events.push(summary.to_event());
                }
                projector_stop.cancel();
                (scan, conversion)
            }
        };
        let ((scan, conversion), ()) = tokio::join!(
            work,
            drain_events(
                Arc::clone(&self.events),
                projector,
                self.config.queues.drain_interval(),
                self.config.queues.drain_batch,
                projector_stop,
            )
        );

        monitor_stop.cancel();
        if let Some(handle) = monitor_handle {
            let _ = handle.await;
        }

        let scan = scan.context("Scan task failed")??;
        let conversion = conversion.context("Conversion task failed")?;

        let summary = RunSummary {
            scan,
            conversion,
            dropped_discoveries: self.discovered.dropped_count(),
            dropped_events: self.events.dropped_count(),
        };
        tracing::info!(
            discovered = summary.scan.discovered,
            succeeded = summary.conversion.succeeded,
            failed = summary.conversion.failed,
            timed_out = summary.conversion.timed_out,
            skipped = summary.conversion.skipped,
            dropped_discoveries = summary.dropped_discoveries,
            "Run finished"
        );
        Ok(summary)
    }

    /// Scan the configured source without converting.
    ///
    /// Returns the scan totals and the discovered files in discovery order
    /// (bounded by the discovery queue capacity).
    pub async fn scan(
        self,
        cancel: CancellationToken,
        projector: &mut dyn EventProjector,
    ) -> Result<(ScanSummary, Vec<DiscoveredFile>)> {
        let source = self.config.paths.source.clone();
        check_source(&source)?;

        let scanner = self.scanner(PressureSignal::new());
        let projector_stop = CancellationToken::new();
        let work = {
            let projector_stop = projector_stop.clone();
            async move {
                let result = tokio::task::spawn_blocking(move || scanner.scan(&source, &cancel)).await;
                projector_stop.cancel();
                result
            }
        };

        let (result, ()) = tokio::join!(
            work,
            drain_events(
                Arc::clone(&self.events),
                projector,
                self.config.queues.drain_interval(),
                self.config.queues.drain_batch,
                projector_stop,
            )
        );

        let summary = result.context("Scan task failed")??;
        Ok((summary, self.discovered.pop_batch(usize::MAX)))
    }

    fn scanner(&self, pressure: PressureSignal) -> Scanner {
        let scanner = Scanner::new(
            ScanOptions::from(&self.config.scan),
            Arc::clone(&self.cache),
            Arc::clone(&self.discovered),
            Arc::clone(&self.events),
        )
        .with_pressure_signal(pressure);

        match &self.prober {
            Some(prober) => scanner.with_prober(Arc::clone(prober)),
            None => scanner,
        }
    }

    fn start_monitor(
        &mut self,
        cancel: &CancellationToken,
    ) -> (
        CancellationToken,
        Option<tokio::task::JoinHandle<()>>,
        PressureSignal,
    ) {
        let stop = cancel.child_token();
        if !self.config.monitor.enabled {
            return (stop, None, PressureSignal::new());
        }

        let sampler = self
            .sampler
            .take()
            .unwrap_or_else(|| Box::new(ProcSampler::new()));
        let mut monitor =
            ResourceMonitor::new(self.config.monitor.clone(), sampler, Arc::clone(&self.events));
        monitor.register(self.cache.clone());
        let pressure = monitor.pressure_signal();

        let handle = tokio::spawn(monitor.run(stop.clone()));
        (stop, Some(handle), pressure)
    }
}

/// Marks the discovery producer finished when dropped, including on unwind,
/// so the coordinator never waits on a scan that panicked.
struct ProducerDone(Arc<AtomicBool>);

impl Drop for ProducerDone {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

fn check_source(source: &Path) -> Result<()> {
    if !source.is_dir() {
        anyhow::bail!(
            "Source folder does not exist or is not a directory: {:?}",
            source
        );
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::projector::RecordingProjector;
    use dcim_core::JobState;
    use std::os::unix::fs::PermissionsExt;

    fn fake_ffmpeg(dir: &Path) -> PathBuf {
        let path = dir.join("ffmpeg");
        std::fs::write(
            &path,
            "#!/bin/sh\nfor last; do :; done\necho converted > \"$last\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.paths.source = root.join("DCIM");
        config.paths.output = root.join("Converted");
        config.monitor.enabled = false;
        config.queues.drain_interval_ms = 5;
        config.conversion.poll_interval_ms = 5;
        config
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"video").unwrap();
    }

    #[tokio::test]
    async fn converts_a_dcim_tree() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        touch(&config.paths.source.join("100APPLE/IMG_0001.MOV"));
        touch(&config.paths.source.join("100APPLE/IMG_0002.mp4"));
        touch(&config.paths.source.join("100APPLE/IMG_0003.HEIC"));
        touch(&config.paths.source.join("101APPLE/IMG_0101.MOV"));
        let output = config.paths.output.clone();

        let mut projector = RecordingProjector::default();
        let summary = Pipeline::new(config)
            .with_ffmpeg(fake_ffmpeg(dir.path()))
            .convert(CancellationToken::new(), &mut projector)
            .await
            .unwrap();

        assert_eq!(summary.scan.discovered, 3);
        assert_eq!(summary.conversion.succeeded, 3);
        assert!(summary.is_clean());
        assert!(output.join("100APPLE/IMG_0001.mp4").is_file());
        assert!(output.join("100APPLE/IMG_0002.mp4").is_file());
        assert!(output.join("101APPLE/IMG_0101.mp4").is_file());
        assert!(!output.join("100APPLE/IMG_0003.mp4").exists());

        assert!(matches!(
            projector.events.last(),
            Some(PipelineEvent::RunFinished { succeeded: 3, .. })
        ));
        let finished = projector
            .events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    PipelineEvent::JobFinished {
                        state: JobState::Succeeded,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(finished, 3);
    }

    #[tokio::test]
    async fn second_run_skips_converted_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        touch(&config.paths.source.join("IMG_0001.MOV"));
        let ffmpeg = fake_ffmpeg(dir.path());

        let mut projector = RecordingProjector::default();
        Pipeline::new(config.clone())
            .with_ffmpeg(ffmpeg.clone())
            .convert(CancellationToken::new(), &mut projector)
            .await
            .unwrap();
        let summary = Pipeline::new(config)
            .with_ffmpeg(ffmpeg)
            .convert(CancellationToken::new(), &mut projector)
            .await
            .unwrap();

        assert_eq!(summary.conversion.skipped, 1);
        assert_eq!(summary.conversion.succeeded, 0);
    }

    struct PanickingProber;

    impl Prober for PanickingProber {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn probe(&self, _path: &Path) -> dcim_core::Result<dcim_core::VideoInfo> {
            panic!("prober bug");
        }
    }

    #[tokio::test]
    async fn scan_panic_ends_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        touch(&config.paths.source.join("IMG_0001.MOV"));

        let mut projector = RecordingProjector::default();
        let run = Pipeline::new(config)
            .with_ffmpeg(fake_ffmpeg(dir.path()))
            .with_prober(Arc::new(PanickingProber))
            .convert(CancellationToken::new(), &mut projector);
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), run)
            .await
            .expect("convert returned after the scan panicked");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Scan task failed"));
    }

    #[tokio::test]
    async fn missing_converter_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.paths.source).unwrap();

        let err = Pipeline::new(config)
            .convert(CancellationToken::new(), &mut RecordingProjector::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ffmpeg not found"));
    }

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Pipeline::new(config(dir.path()))
            .with_ffmpeg(fake_ffmpeg(dir.path()))
            .convert(CancellationToken::new(), &mut RecordingProjector::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Source folder does not exist"));
    }

    #[tokio::test]
    async fn scan_lists_without_converting() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        touch(&config.paths.source.join("a/IMG_0001.MOV"));
        touch(&config.paths.source.join("b/IMG_0002.MOV"));
        let output = config.paths.output.clone();

        let mut projector = RecordingProjector::default();
        let (summary, files) = Pipeline::new(config)
            .scan(CancellationToken::new(), &mut projector)
            .await
            .unwrap();

        assert_eq!(summary.discovered, 2);
        assert_eq!(files.len(), 2);
        assert!(!output.exists());
        assert!(projector
            .events
            .iter()
            .any(|e| matches!(e, PipelineEvent::ScanFinished { discovered: 2, .. })));
    }
}
