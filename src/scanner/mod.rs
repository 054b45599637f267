//! Concurrent DCIM folder scanner.
//!
//! Walks a source tree with a bounded rayon pool: each task lists one
//! directory's immediate entries and spawns a new task per subdirectory.
//! Recognized video files are probed through the shared [`ProbeCache`] and
//! pushed onto the discovery queue as [`DiscoveredFile`]s.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use dcim_av::Prober;
use dcim_core::config::ScanConfig;
use dcim_core::{has_extension, DiscoveredFile, PipelineEvent, VideoInfo};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::LruCache;
use crate::monitor::PressureSignal;
use crate::queue::BoundedQueue;

/// A `ScanProgress` event is queued every this many directories.
const PROGRESS_EVERY: u64 = 16;

/// Probe result remembered together with the file's modification time.
///
/// A cached entry is only used while the file's mtime still matches.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedProbe {
    pub mtime: SystemTime,
    pub info: VideoInfo,
}

/// Probe metadata keyed by absolute path.
pub type ProbeCache = LruCache<PathBuf, CachedProbe>;

/// Tunables for a scan, usually taken from [`ScanConfig`].
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_workers: usize,
    /// Lowercase extensions without the dot.
    pub extensions: Vec<String>,
    /// Files larger than this are discovered without probing.
    pub large_file_threshold_bytes: u64,
    pub probe: bool,
}

impl ScanOptions {
    /// Number of pool threads: `min(max_workers, cpus)`, at least one.
    pub fn worker_count(&self) -> usize {
        self.max_workers.min(num_cpus::get()).max(1)
    }
}

impl From<&ScanConfig> for ScanOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            large_file_threshold_bytes: config.large_file_threshold_bytes(),
            probe: config.probe,
        }
    }
}

/// Totals for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub directories: u64,
    pub files_seen: u64,
    pub discovered: u64,
    /// Discovered files above the large-file threshold (not probed).
    pub unprobed_large: u64,
    pub cache_hits: u64,
    pub probe_failures: u64,
    pub errors: u64,
    pub cancelled: bool,
}

#[derive(Default)]
struct Counters {
    directories: AtomicU64,
    files_seen: AtomicU64,
    discovered: AtomicU64,
    unprobed_large: AtomicU64,
    cache_hits: AtomicU64,
    probe_failures: AtomicU64,
    errors: AtomicU64,
    cancelled: AtomicBool,
}

impl Counters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn summary(&self) -> ScanSummary {
        ScanSummary {
            directories: self.directories.load(Ordering::Relaxed),
            files_seen: self.files_seen.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            unprobed_large: self.unprobed_large.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Scanner for discovering convertible video files.
pub struct Scanner {
    options: ScanOptions,
    prober: Option<Arc<dyn Prober>>,
    cache: Arc<ProbeCache>,
    discovered: Arc<BoundedQueue<DiscoveredFile>>,
    events: Arc<BoundedQueue<PipelineEvent>>,
    pressure: PressureSignal,
}

impl Scanner {
    pub fn new(
        options: ScanOptions,
        cache: Arc<ProbeCache>,
        discovered: Arc<BoundedQueue<DiscoveredFile>>,
        events: Arc<BoundedQueue<PipelineEvent>>,
    ) -> Self {
        Self {
            options,
            prober: None,
            cache,
            discovered,
            events,
            pressure: PressureSignal::new(),
        }
    }

    /// Probe discovered files with `prober`.
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Skip probing while `pressure` is raised.
    pub fn with_pressure_signal(mut self, pressure: PressureSignal) -> Self {
        self.pressure = pressure;
        self
    }

    /// Walk `root` and push every recognized video onto the discovery queue.
    ///
    /// Blocks until the walk finishes or `cancel` fires. Per-entry failures
    /// are counted and reported as [`PipelineEvent::ScanError`]; only a
    /// missing or non-directory root is an error.
    pub fn scan(&self, root: &Path, cancel: &CancellationToken) -> dcim_core::Result<ScanSummary> {
        if !root.exists() {
            return Err(dcim_core::Error::not_found("source folder", root.display()));
        }
        if !root.is_dir() {
            return Err(dcim_core::Error::scan(root, "not a directory"));
        }
        let root = root
            .canonicalize()
            .map_err(|e| dcim_core::Error::scan(root, e))?;

        let workers = self.options.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dcim-scan-{i}"))
            .build()
            .map_err(|e| dcim_core::Error::scan(&root, format!("failed to start scan pool: {e}")))?;

        info!(root = %root.display(), workers, "Scanning");
        self.events.push(PipelineEvent::ScanStarted {
            root: root.clone(),
            workers,
        });

        let counters = Counters::default();
        pool.scope(|scope| self.walk_dir(scope, root.clone(), &root, cancel, &counters));

        if cancel.is_cancelled() {
            counters.cancelled.store(true, Ordering::Relaxed);
        }
        let summary = counters.summary();

        info!(
            directories = summary.directories,
            files_seen = summary.files_seen,
            discovered = summary.discovered,
            unprobed_large = summary.unprobed_large,
            cache_hits = summary.cache_hits,
            errors = summary.errors,
            cancelled = summary.cancelled,
            "Scan finished"
        );
        self.events.push(PipelineEvent::ScanFinished {
            discovered: summary.discovered,
            errors: summary.errors,
            cancelled: summary.cancelled,
        });

        Ok(summary)
    }

    fn walk_dir<'s>(
        &'s self,
        scope: &rayon::Scope<'s>,
        dir: PathBuf,
        root: &'s Path,
        cancel: &'s CancellationToken,
        counters: &'s Counters,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        let visited = Counters::bump(&counters.directories);
        if visited % PROGRESS_EVERY == 0 {
            self.events.push(PipelineEvent::ScanProgress {
                directories: visited,
                files_seen: counters.files_seen.load(Ordering::Relaxed),
                discovered: counters.discovered.load(Ordering::Relaxed),
            });
        }

        let entries = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in entries {
            if cancel.is_cancelled() {
                return;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(dir.as_path()).to_path_buf();
                    self.report_error(dcim_core::Error::scan(path, e), counters);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                let subdir = entry.into_path();
                scope.spawn(move |scope| self.walk_dir(scope, subdir, root, cancel, counters));
                continue;
            }
            // Symlinks are neither followed nor treated as files.
            if !file_type.is_file() {
                continue;
            }

            Counters::bump(&counters.files_seen);
            if !has_extension(entry.path(), self.options.extensions.as_slice()) {
                continue;
            }

            let file = match self.discover(&entry, root, counters) {
                Ok(file) => file,
                Err(e) => {
                    self.report_error(e, counters);
                    continue;
                }
            };

            if cancel.is_cancelled() {
                return;
            }
            self.publish(file, counters);
        }
    }

    fn discover(
        &self,
        entry: &walkdir::DirEntry,
        root: &Path,
        counters: &Counters,
    ) -> dcim_core::Result<DiscoveredFile> {
        let path = entry.path();
        let metadata = entry
            .metadata()
            .map_err(|e| dcim_core::Error::scan(path, e))?;
        let size_bytes = metadata.len();
        let modified = metadata
            .modified()
            .map_err(|e| dcim_core::Error::scan(path, e))?;

        let relative_path = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(entry.file_name()));

        let info = if size_bytes > self.options.large_file_threshold_bytes {
            Counters::bump(&counters.unprobed_large);
            debug!(path = %path.display(), size_bytes, "Large file, deferring probe");
            None
        } else {
            self.probe_cached(path, modified, counters)
        };

        Ok(DiscoveredFile {
            path: path.to_path_buf(),
            relative_path,
            size_bytes,
            modified,
            info,
        })
    }

    fn probe_cached(
        &self,
        path: &Path,
        modified: SystemTime,
        counters: &Counters,
    ) -> Option<VideoInfo> {
        if !self.options.probe {
            return None;
        }
        let prober = self.prober.as_ref()?;

        let key = path.to_path_buf();
        if let Some(cached) = self.cache.get(&key) {
            if cached.mtime == modified {
                Counters::bump(&counters.cache_hits);
                return Some(cached.info);
            }
            debug!(path = %path.display(), "File changed since it was probed");
        }

        if self.pressure.is_raised() {
            debug!(path = %path.display(), "Memory pressure, skipping probe");
            return None;
        }

        match prober.probe(path) {
            Ok(info) => {
                self.cache.put(
                    key,
                    CachedProbe {
                        mtime: modified,
                        info: info.clone(),
                    },
                );
                Some(info)
            }
            Err(e) => {
                Counters::bump(&counters.probe_failures);
                debug!(path = %path.display(), error = %e, "Probe failed, metadata unknown");
                None
            }
        }
    }

    fn publish(&self, file: DiscoveredFile, counters: &Counters) {
        Counters::bump(&counters.discovered);
        let event = PipelineEvent::FileDiscovered {
            path: file.path.clone(),
            relative_path: file.relative_path.clone(),
            size_bytes: file.size_bytes,
            format: file.format_label(),
        };

        if self.discovered.push(file) {
            debug!(dropped = self.discovered.dropped_count(), "Discovery queue full, dropped oldest");
        }
        self.events.push(event);
    }

    fn report_error(&self, error: dcim_core::Error, counters: &Counters) {
        Counters::bump(&counters.errors);
        warn!(error = %error, "Scan error");
        let (path, message) = match error {
            dcim_core::Error::Scan { path, message } => (path, message),
            other => (PathBuf::new(), other.to_string()),
        };
        self.events.push(PipelineEvent::ScanError { path, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use std::sync::atomic::AtomicUsize;

    struct CountingProber {
        calls: AtomicUsize,
    }

    impl CountingProber {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Prober for CountingProber {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn probe(&self, path: &Path) -> dcim_core::Result<VideoInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.to_string_lossy().contains("corrupt") {
                return Err(dcim_core::Error::probe(path, "moov atom not found"));
            }
            Ok(VideoInfo {
                duration: None,
                width: Some(1920),
                height: Some(1080),
                codec: Some("hevc".into()),
                format: Some("mov".into()),
                probed_at: Utc::now(),
            })
        }
    }

    struct Fixture {
        discovered: Arc<BoundedQueue<DiscoveredFile>>,
        events: Arc<BoundedQueue<PipelineEvent>>,
        cache: Arc<ProbeCache>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                discovered: Arc::new(BoundedQueue::new(1_000)),
                events: Arc::new(BoundedQueue::new(1_000)),
                cache: Arc::new(LruCache::new("probe", 64)),
            }
        }

        fn scanner(&self, options: ScanOptions) -> Scanner {
            Scanner::new(
                options,
                Arc::clone(&self.cache),
                Arc::clone(&self.discovered),
                Arc::clone(&self.events),
            )
        }

        fn relative_paths(&self) -> Vec<PathBuf> {
            let mut paths: Vec<PathBuf> = self
                .discovered
                .pop_batch(usize::MAX)
                .into_iter()
                .map(|f| f.relative_path)
                .collect();
            paths.sort();
            paths
        }
    }

    fn options() -> ScanOptions {
        ScanOptions::from(&ScanConfig::default())
    }

    fn touch(path: &Path, bytes: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn finds_videos_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("IMG_0001.MOV"), 10);
        touch(&dir.path().join("IMG_0002.mp4"), 10);
        touch(&dir.path().join("IMG_0003.Mkv"), 10);
        touch(&dir.path().join("IMG_0004.HEIC"), 10);
        touch(&dir.path().join("notes.txt"), 10);

        let fx = Fixture::new();
        let summary = fx
            .scanner(options())
            .scan(dir.path(), &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.files_seen, 5);
        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.errors, 0);
        assert!(!summary.cancelled);
        assert_eq!(
            fx.relative_paths(),
            vec![
                PathBuf::from("IMG_0001.MOV"),
                PathBuf::from("IMG_0002.mp4"),
                PathBuf::from("IMG_0003.Mkv"),
            ]
        );
    }

    #[test]
    fn walks_nested_folders() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("100APPLE/IMG_0001.MOV"), 10);
        touch(&dir.path().join("101APPLE/IMG_0101.MOV"), 10);
        touch(&dir.path().join("101APPLE/deep/er/clip.webm"), 10);

        let fx = Fixture::new();
        let summary = fx
            .scanner(ScanOptions {
                max_workers: 3,
                ..options()
            })
            .scan(dir.path(), &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.directories, 5);
        assert_eq!(
            fx.relative_paths(),
            vec![
                PathBuf::from("100APPLE/IMG_0001.MOV"),
                PathBuf::from("101APPLE/IMG_0101.MOV"),
                PathBuf::from("101APPLE/deep/er/clip.webm"),
            ]
        );
    }

    #[test]
    fn discovered_paths_are_absolute() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/IMG_0001.MOV"), 10);

        let fx = Fixture::new();
        fx.scanner(options())
            .scan(dir.path(), &CancellationToken::new())
            .unwrap();

        let files = fx.discovered.pop_batch(10);
        assert_eq!(files.len(), 1);
        assert!(files[0].path.is_absolute());
        assert!(files[0].path.ends_with("a/IMG_0001.MOV"));
        assert_eq!(files[0].size_bytes, 10);
    }

    #[test]
    fn cache_prevents_second_probe() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("IMG_0001.MOV"), 10);
        touch(&dir.path().join("IMG_0002.MOV"), 10);

        let fx = Fixture::new();
        let prober = CountingProber::new();
        let scanner = fx.scanner(options()).with_prober(prober.clone());

        let first = scanner.scan(dir.path(), &CancellationToken::new()).unwrap();
        assert_eq!(prober.calls(), 2);
        assert_eq!(first.cache_hits, 0);

        let second = scanner.scan(dir.path(), &CancellationToken::new()).unwrap();
        assert_eq!(prober.calls(), 2);
        assert_eq!(second.cache_hits, 2);

        let files = fx.discovered.pop_batch(10);
        assert!(files.iter().all(|f| f.format_label() == "MOV"));
    }

    #[test]
    fn changed_file_is_probed_again() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("IMG_0001.MOV");
        touch(&clip, 10);

        let fx = Fixture::new();
        let prober = CountingProber::new();
        let scanner = fx.scanner(options()).with_prober(prober.clone());
        scanner.scan(dir.path(), &CancellationToken::new()).unwrap();

        let key = clip.canonicalize().unwrap();
        let mut stale = fx.cache.get(&key).unwrap();
        stale.mtime = SystemTime::UNIX_EPOCH;
        fx.cache.put(key, stale);

        scanner.scan(dir.path(), &CancellationToken::new()).unwrap();
        assert_eq!(prober.calls(), 2);
    }

    #[test]
    fn large_files_are_not_probed() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("small.mov"), 10);
        touch(&dir.path().join("huge.mov"), 200);

        let fx = Fixture::new();
        let prober = CountingProber::new();
        let summary = fx
            .scanner(ScanOptions {
                large_file_threshold_bytes: 100,
                ..options()
            })
            .with_prober(prober.clone())
            .scan(dir.path(), &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.unprobed_large, 1);
        assert_eq!(prober.calls(), 1);

        let huge = fx
            .discovered
            .pop_batch(10)
            .into_iter()
            .find(|f| f.relative_path == Path::new("huge.mov"))
            .unwrap();
        assert!(huge.info.is_none());
    }

    #[test]
    fn probe_failure_still_discovers_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("corrupt.mov"), 10);

        let fx = Fixture::new();
        let summary = fx
            .scanner(options())
            .with_prober(CountingProber::new())
            .scan(dir.path(), &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.probe_failures, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(fx.discovered.pop_batch(1)[0].format_label(), "UNKNOWN");
    }

    #[test]
    fn memory_pressure_skips_probing() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("IMG_0001.MOV"), 10);

        let fx = Fixture::new();
        let prober = CountingProber::new();
        let pressure = PressureSignal::new();
        pressure.set(true);

        let summary = fx
            .scanner(options())
            .with_prober(prober.clone())
            .with_pressure_signal(pressure)
            .scan(dir.path(), &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.discovered, 1);
        assert_eq!(prober.calls(), 0);
    }

    #[test]
    fn cancelled_scan_pushes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            touch(&dir.path().join(format!("d{i}/IMG_{i:04}.MOV")), 10);
        }

        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = fx.scanner(options()).scan(dir.path(), &cancel).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.discovered, 0);
        assert!(fx.discovered.is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fx = Fixture::new();
        let err = fx
            .scanner(options())
            .scan(&dir.path().join("nope"), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(fx.events.is_empty());
    }

    #[test]
    fn file_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("IMG_0001.MOV");
        touch(&file, 1);
        let fx = Fixture::new();
        let err = fx
            .scanner(options())
            .scan(&file, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), "scan");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        touch(&outside.path().join("IMG_9999.MOV"), 10);
        touch(&dir.path().join("IMG_0001.MOV"), 10);
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("IMG_9999.MOV"),
            dir.path().join("IMG_link.MOV"),
        )
        .unwrap();

        let fx = Fixture::new();
        let summary = fx
            .scanner(options())
            .scan(dir.path(), &CancellationToken::new())
            .unwrap();
        assert_eq!(summary.discovered, 1);
    }

    #[test]
    fn emits_scan_lifecycle_events() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("IMG_0001.MOV"), 10);

        let fx = Fixture::new();
        fx.scanner(options())
            .scan(dir.path(), &CancellationToken::new())
            .unwrap();

        let events = fx.events.pop_batch(usize::MAX);
        assert!(matches!(events.first(), Some(PipelineEvent::ScanStarted { .. })));
        assert!(matches!(events.get(1), Some(PipelineEvent::FileDiscovered { .. })));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::ScanFinished {
                discovered: 1,
                errors: 0,
                cancelled: false
            })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_folder_is_reported_and_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("100APPLE/IMG_0001.MOV"), 10);
        touch(&dir.path().join("101APPLE/IMG_0101.MOV"), 10);
        let locked = dir.path().join("101APPLE");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Permission bits are not enforced for this user (root).
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let fx = Fixture::new();
        let result = fx
            .scanner(options())
            .scan(dir.path(), &CancellationToken::new());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let summary = result.unwrap();

        assert_eq!(summary.errors, 1);
        assert_eq!(summary.discovered, 1);
        assert_eq!(fx.relative_paths(), vec![PathBuf::from("100APPLE/IMG_0001.MOV")]);

        let events = fx.events.pop_batch(usize::MAX);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::ScanError { path, .. } if path.ends_with("101APPLE")
        )));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::ScanFinished { errors: 1, .. })
        ));
    }
}
