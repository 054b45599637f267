//! Metadata probing.

mod ffprobe;

pub use ffprobe::{parse_ffprobe_json, FfprobeProber};

use std::path::Path;

use dcim_core::VideoInfo;

/// A prober capable of extracting metadata from video files.
///
/// Probing runs on scanner worker threads, so implementations are
/// synchronous and must be safe to share across threads.
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    /// Probe the file at `path`.
    ///
    /// Callers treat an error as "metadata unknown" and carry on.
    fn probe(&self, path: &Path) -> dcim_core::Result<VideoInfo>;
}
