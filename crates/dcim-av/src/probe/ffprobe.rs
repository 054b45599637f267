//! FFprobe-based [`Prober`] implementation.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON output into [`VideoInfo`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use dcim_core::VideoInfo;
use serde::Deserialize;

use super::Prober;
use crate::command::ToolCommand;

/// Default wall-clock limit for one ffprobe run.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    /// Path to the ffprobe binary.
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    /// Create a new prober using the given ffprobe path.
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self {
            ffprobe_path,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Kill ffprobe when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn probe_async(&self, path: &Path) -> dcim_core::Result<VideoInfo> {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]);
        cmd.arg(path.to_string_lossy().as_ref());
        cmd.timeout(self.timeout);

        let output = cmd.execute().await.map_err(|e| match e {
            dcim_core::Error::ToolTimeout { timeout, .. } => {
                dcim_core::Error::probe(path, format!("ffprobe timed out after {timeout:?}"))
            }
            other => dcim_core::Error::probe(path, other),
        })?;

        parse_ffprobe_json(&output.stdout).map_err(|e| dcim_core::Error::probe(path, e))
    }
}

impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    fn probe(&self, path: &Path) -> dcim_core::Result<VideoInfo> {
        // Scanner threads sit outside any runtime and get a small
        // single-threaded one per call.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => tokio::task::block_in_place(|| handle.block_on(self.probe_async(path))),
            Err(_) => {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| {
                        dcim_core::Error::tool("ffprobe", format!("failed to create tokio runtime: {e}"))
                    })?;
                rt.block_on(self.probe_async(path))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse ffprobe's JSON output into a [`VideoInfo`].
///
/// The first video stream provides codec and dimensions. Duration comes
/// from the format section, falling back to the video stream.
pub fn parse_ffprobe_json(json: &str) -> Result<VideoInfo, String> {
    let output: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| format!("ffprobe JSON parse error: {e}"))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let format_duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(parse_seconds);
    let stream_duration = video
        .and_then(|v| v.duration.as_deref())
        .and_then(parse_seconds);

    // ffprobe reports e.g. "mov,mp4,m4a,3gp,3g2,mj2"; the first name is the
    // most specific one.
    let format = output
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .and_then(|name| name.split(',').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Ok(VideoInfo {
        duration: format_duration.or(stream_duration),
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        codec: video.and_then(|v| v.codec_name.clone()),
        format,
        probed_at: Utc::now(),
    })
}

fn parse_seconds(s: &str) -> Option<Duration> {
    s.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
