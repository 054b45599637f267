//! Media-domain types: discovered files, probe results, quality profiles
//! and resolution caps.
//!
//! Enums serialize in lowercase and implement `Display`/`FromStr` so the
//! same spelling works in the config file, on the command line and in logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// Extensions recognized as video files by default (lowercase, no dot).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v", "3gp",
];

/// Check whether `path` has one of `extensions` (case-insensitive).
///
/// `extensions` are expected in lowercase without the leading dot.
///
/// ```
/// use std::path::Path;
/// use dcim_core::{has_extension, VIDEO_EXTENSIONS};
///
/// assert!(has_extension(Path::new("IMG_0001.MOV"), VIDEO_EXTENSIONS));
/// assert!(!has_extension(Path::new("IMG_0001.HEIC"), VIDEO_EXTENSIONS));
/// ```
pub fn has_extension<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            extensions.iter().any(|e| e.as_ref() == ext)
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Quality
// ---------------------------------------------------------------------------

/// Encoder quality profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    #[default]
    Medium,
    Low,
}

impl Quality {
    /// Constant-rate-factor passed to the encoder. Lower is better quality.
    pub fn crf(self) -> u8 {
        match self {
            Self::High => 18,
            Self::Medium => 23,
            Self::Low => 28,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!(
                "unknown quality '{other}' (expected high, medium or low)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A `WIDTHxHEIGHT` bounding box used to cap output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const UHD: Resolution = Resolution::new(3840, 2160);
    pub const FULL_HD: Resolution = Resolution::new(1920, 1080);
    pub const HD: Resolution = Resolution::new(1280, 720);
    pub const SD: Resolution = Resolution::new(854, 480);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a resolution cap, where `original` (or `none`) means no cap.
    pub fn parse_cap(s: &str) -> std::result::Result<Option<Self>, String> {
        match s.trim().to_lowercase().as_str() {
            "original" | "none" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (w, h) = lower
            .split_once('x')
            .ok_or_else(|| format!("invalid resolution '{s}' (expected WIDTHxHEIGHT)"))?;
        let width: u32 = w
            .parse()
            .map_err(|_| format!("invalid resolution width in '{s}'"))?;
        let height: u32 = h
            .parse()
            .map_err(|_| format!("invalid resolution height in '{s}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("resolution '{s}' must be non-zero"));
        }
        Ok(Self { width, height })
    }
}

impl Serialize for Resolution {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// VideoInfo
// ---------------------------------------------------------------------------

/// Technical metadata returned by the probe collaborator.
///
/// Every field is optional: probing is best-effort and callers treat
/// missing data as unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub duration: Option<Duration>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    /// Container format name (first entry of ffprobe's `format_name`).
    pub format: Option<String>,
    pub probed_at: DateTime<Utc>,
}

impl VideoInfo {
    /// Resolution of the primary video stream, if known.
    pub fn resolution(&self) -> Option<Resolution> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(Resolution::new(w, h)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DiscoveredFile
// ---------------------------------------------------------------------------

/// A video file found by the scanner.
///
/// Not `Clone`: each discovery is moved from the scanner into the discovery
/// queue and from there into exactly one conversion job.
#[derive(Debug, Serialize)]
pub struct DiscoveredFile {
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Path relative to the scanned root.
    pub relative_path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
    /// Probe result, absent when probing was skipped or failed.
    pub info: Option<VideoInfo>,
}

impl DiscoveredFile {
    /// Size in mebibytes, for display.
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Container format label, `UNKNOWN` when not probed.
    pub fn format_label(&self) -> String {
        self.info
            .as_ref()
            .and_then(|i| i.format.as_deref())
            .map(|f| f.to_uppercase())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_maps_to_crf() {
        assert_eq!(Quality::High.crf(), 18);
        assert_eq!(Quality::Medium.crf(), 23);
        assert_eq!(Quality::Low.crf(), 28);
        assert_eq!(Quality::default(), Quality::Medium);
    }

    #[test]
    fn quality_from_str() {
        assert_eq!("HIGH".parse::<Quality>().unwrap(), Quality::High);
        assert_eq!(" low ".parse::<Quality>().unwrap(), Quality::Low);
        assert!("ultra".parse::<Quality>().is_err());
    }

    #[test]
    fn resolution_parse_and_display() {
        let r: Resolution = "1920x1080".parse().unwrap();
        assert_eq!(r, Resolution::FULL_HD);
        assert_eq!(r.to_string(), "1920x1080");
        assert_eq!("1280X720".parse::<Resolution>().unwrap(), Resolution::HD);
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x1080".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn resolution_cap_original_is_none() {
        assert_eq!(Resolution::parse_cap("Original").unwrap(), None);
        assert_eq!(
            Resolution::parse_cap("854x480").unwrap(),
            Some(Resolution::SD)
        );
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(has_extension(Path::new("a/b/clip.MP4"), VIDEO_EXTENSIONS));
        assert!(has_extension(Path::new("clip.3gp"), VIDEO_EXTENSIONS));
        assert!(!has_extension(Path::new("photo.jpg"), VIDEO_EXTENSIONS));
        assert!(!has_extension(Path::new("no_extension"), VIDEO_EXTENSIONS));
        assert!(!has_extension(Path::new(""), VIDEO_EXTENSIONS));
    }

    #[test]
    fn video_info_resolution() {
        let info = VideoInfo {
            duration: Some(Duration::from_secs(12)),
            width: Some(1920),
            height: Some(1080),
            codec: Some("hevc".into()),
            format: Some("mov".into()),
            probed_at: Utc::now(),
        };
        assert_eq!(info.resolution(), Some(Resolution::FULL_HD));

        let unknown = VideoInfo {
            width: None,
            ..info
        };
        assert_eq!(unknown.resolution(), None);
    }
}
