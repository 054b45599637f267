//! Configuration loading.
//!
//! The schema lives in [`dcim_core::config`]; this module finds the file,
//! rejects configurations that cannot work, expands `~` in paths, and
//! layers command-line overrides on top. Non-fatal problems come from
//! [`Config::validate`] and are logged by the caller once logging is up.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub use dcim_core::config::*;
use dcim_core::{Quality, Resolution};

/// Locations tried, in order, when no config path is given.
const DEFAULT_LOCATIONS: &[&str] = &[
    "./config.toml",
    "./dcim-converter.toml",
    "~/.config/dcim-converter/config.toml",
];

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config = Config::from_toml(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;
    expand_paths(&mut config);
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_LOCATIONS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!(config = %path.display(), "Using config file");
            return load_config(path);
        }
    }

    let mut config = Config::default();
    expand_paths(&mut config);
    Ok(config)
}

/// Reject configurations no run could succeed with.
fn validate_config(config: &Config) -> Result<()> {
    if config.paths.source.as_os_str().is_empty() {
        anyhow::bail!("paths.source cannot be empty");
    }
    if config.paths.output.as_os_str().is_empty() {
        anyhow::bail!("paths.output cannot be empty");
    }
    if let Some(ext) = config
        .scan
        .extensions
        .iter()
        .find(|e| e.trim_start_matches('.').trim().is_empty())
    {
        anyhow::bail!("scan.extensions contains an empty extension: {:?}", ext);
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

fn expand_paths(config: &mut Config) {
    config.paths.source = expand_path(&config.paths.source);
    config.paths.output = expand_path(&config.paths.output);
    config.logging.file = config.logging.file.as_deref().map(expand_path);
    config.tools.ffmpeg_path = config.tools.ffmpeg_path.as_deref().map(expand_path);
    config.tools.ffprobe_path = config.tools.ffprobe_path.as_deref().map(expand_path);
}

/// Values given on the command line, which win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub quality: Option<Quality>,
    /// `Some(None)` removes the cap.
    pub max_resolution: Option<Option<Resolution>>,
    pub threads: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub overwrite: bool,
    pub log_file: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(source) = self.source {
            config.paths.source = expand_path(&source);
        }
        if let Some(output) = self.output {
            config.paths.output = expand_path(&output);
        }
        if let Some(quality) = self.quality {
            config.conversion.quality = quality;
        }
        if let Some(cap) = self.max_resolution {
            config.conversion.max_resolution = cap;
        }
        if let Some(threads) = self.threads {
            config.scan.max_workers = threads;
        }
        if let Some(timeout) = self.timeout_secs {
            config.conversion.timeout_secs = timeout;
        }
        if self.overwrite {
            config.conversion.overwrite = true;
        }
        if let Some(log_file) = self.log_file {
            config.logging.file = Some(expand_path(&log_file));
        }
    }
}
