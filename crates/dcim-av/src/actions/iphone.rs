//! iPhone-compatible MP4 encoding (H.264 High@4.0 / AAC) using ffmpeg.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dcim_core::{Quality, Resolution};

use crate::command::{ToolCommand, ToolOutput};

/// Everything needed to build one ffmpeg invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionParams {
    pub input: PathBuf,
    pub output: PathBuf,
    pub quality: Quality,
    /// Maximum output resolution; `None` keeps the source size.
    pub max_resolution: Option<Resolution>,
}

impl ConversionParams {
    /// The ffmpeg argument list, without the program name.
    ///
    /// The scale filter only ever shrinks: `min(W,iw)` keeps smaller
    /// sources untouched and the aspect ratio is preserved. Dimensions are
    /// rounded to even values, which `yuv420p` requires.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            self.input.to_string_lossy().into_owned(),
        ];

        args.extend(
            [
                "-c:v", "libx264", "-profile:v", "high", "-level", "4.0", "-pix_fmt", "yuv420p",
                "-crf",
            ]
            .map(String::from),
        );
        args.push(self.quality.crf().to_string());

        if let Some(cap) = self.max_resolution {
            args.push("-vf".into());
            args.push(format!(
                "scale='min({},iw)':'min({},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2",
                cap.width, cap.height
            ));
        }

        args.extend(
            [
                "-c:a", "aac", "-ar", "44100", "-b:a", "128k", "-movflags", "+faststart", "-f",
                "mp4",
            ]
            .map(String::from),
        );
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// Convert `params.input` to an iPhone-compatible MP4 at `params.output`.
///
/// The output's parent directory must already exist.
///
/// # Errors
///
/// - [`dcim_core::Error::ConversionTimeout`] if ffmpeg runs past `timeout`;
///   the process has been killed by the time this returns.
/// - [`dcim_core::Error::ConversionFailed`] for a non-zero exit or a spawn
///   failure, carrying the tail of ffmpeg's stderr.
pub async fn convert_for_iphone(
    ffmpeg: &Path,
    params: &ConversionParams,
    timeout: Duration,
) -> dcim_core::Result<ToolOutput> {
    tracing::info!(
        input = %params.input.display(),
        output = %params.output.display(),
        quality = %params.quality,
        crf = params.quality.crf(),
        max_resolution = ?params.max_resolution.map(|r| r.to_string()),
        "iPhone encode"
    );

    let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
    cmd.timeout(timeout);
    cmd.args(params.ffmpeg_args());

    cmd.execute().await.map_err(|e| match e {
        dcim_core::Error::ToolTimeout { timeout, .. } => dcim_core::Error::ConversionTimeout {
            path: params.input.clone(),
            timeout,
        },
        dcim_core::Error::Tool { message, .. } => dcim_core::Error::ConversionFailed {
            path: params.input.clone(),
            message,
        },
        other => other,
    })
}
