//! Application configuration types.
//!
//! The top-level [`Config`] is deserialized from TOML. Every section
//! defaults sensibly, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::media::{Quality, Resolution, VIDEO_EXTENSIONS};
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub scan: ScanConfig,
    pub conversion: ConversionConfig,
    pub cache: CacheConfig,
    pub queues: QueueConfig,
    pub monitor: MonitorConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("parse error: {e}")))
    }

    /// Return a list of validation warnings (non-fatal issues).
    ///
    /// Zero-sized pools, batches and capacities are clamped to one at
    /// construction time; they are reported here so the user notices.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.scan.max_workers == 0 {
            warnings.push("scan.max_workers is 0; one worker will be used".into());
        }
        if self.scan.extensions.is_empty() {
            warnings.push("scan.extensions is empty; no files will be discovered".into());
        }
        if self.conversion.workers == 0 {
            warnings.push("conversion.workers is 0; one worker will be used".into());
        }
        if self.conversion.batch_size == 0 {
            warnings.push("conversion.batch_size is 0; batches of one will be used".into());
        }
        if self.conversion.timeout_secs == 0 {
            warnings.push("conversion.timeout_secs is 0; every conversion will time out".into());
        }
        if self.cache.capacity == 0 {
            warnings.push("cache.capacity is 0; a capacity of one will be used".into());
        }
        if self.queues.discovery_capacity == 0 || self.queues.event_capacity == 0 {
            warnings.push("queue capacities must be positive; a capacity of one will be used".into());
        }
        if self.monitor.enabled && self.monitor.memory_threshold_mb == 0 {
            warnings.push(
                "monitor.memory_threshold_mb is 0; caches will be cleared on every tick".into(),
            );
        }
        if self.paths.source == self.paths.output {
            warnings.push("paths.source and paths.output are the same folder".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Source and destination folders. A leading `~` is expanded when loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source: PathBuf,
    pub output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("~/OneDrive/Pictures/DCIM"),
            output: PathBuf::from("~/Desktop/Converted_Videos"),
        }
    }
}

/// Directory walk settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Upper bound on walker threads; the CPU count caps it further.
    pub max_workers: usize,
    /// Recognized extensions, matched case-insensitively.
    pub extensions: Vec<String>,
    /// Files larger than this are discovered without probing.
    pub large_file_threshold_mb: u64,
    /// Probe metadata during the scan.
    pub probe: bool,
    /// ffprobe is killed after this many seconds.
    pub probe_timeout_secs: u64,
}

impl ScanConfig {
    pub fn large_file_threshold_bytes(&self) -> u64 {
        self.large_file_threshold_mb.saturating_mul(1024 * 1024)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            large_file_threshold_mb: 4096,
            probe: true,
            probe_timeout_secs: 30,
        }
    }
}

/// Conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub quality: Quality,
    /// Bounding box for the output; `"original"` disables scaling.
    #[serde(with = "resolution_cap")]
    pub max_resolution: Option<Resolution>,
    /// Number of concurrent converter processes.
    pub workers: usize,
    /// Maximum discoveries taken from the queue per scheduling pass.
    pub batch_size: usize,
    /// Wall-clock budget for one converter invocation.
    pub timeout_secs: u64,
    /// Re-convert files whose output already exists.
    pub overwrite: bool,
    /// Sleep between polls of an empty discovery queue.
    pub poll_interval_ms: u64,
}

impl ConversionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            quality: Quality::Medium,
            max_resolution: Some(Resolution::FULL_HD),
            workers: 2,
            batch_size: 16,
            timeout_secs: 300,
            overwrite: false,
            poll_interval_ms: 200,
        }
    }
}

/// Probe metadata cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Queue capacities and the presentation drain cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub discovery_capacity: usize,
    pub event_capacity: usize,
    pub drain_interval_ms: u64,
    pub drain_batch: usize,
}

impl QueueConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            discovery_capacity: 10_000,
            event_capacity: 1_000,
            drain_interval_ms: 100,
            drain_batch: 256,
        }
    }
}

/// Resource monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Resident memory above which caches are cleared.
    pub memory_threshold_mb: u64,
    /// Number of samples kept in the rolling window.
    pub window: usize,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn memory_threshold_bytes(&self) -> u64 {
        self.memory_threshold_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2_000,
            memory_threshold_mb: 1_024,
            window: 30,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Log file location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append-only log file; `None` disables file logging.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("~/.dcim-converter/dcim-converter.log")),
        }
    }
}

/// Serde helpers for `Option<Resolution>` where `"original"` means `None`.
mod resolution_cap {
    use super::Resolution;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(cap: &Option<Resolution>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match cap {
            Some(r) => serializer.collect_str(r),
            None => serializer.serialize_str("original"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Resolution>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Resolution::parse_cap(&s).map_err(serde::de::Error::custom)
    }
}
