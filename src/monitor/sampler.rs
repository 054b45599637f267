//! Process resource sampling backends.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dcim_core::SampleFailure;
use serde::Serialize;

/// One observation of this process's resource usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// CPU usage since the previous sample, in percent of one core.
    /// Zero for the first sample.
    pub cpu_percent: f64,
}

/// Source of [`ResourceSample`]s.
pub trait ResourceSampler: Send {
    fn sample(&mut self) -> dcim_core::Result<ResourceSample>;
}

/// Samples the current process through the operating system.
///
/// - Linux: `VmRSS` from `/proc/self/status`, CPU time from `getrusage`.
/// - Other Unix: peak RSS and CPU time from `getrusage`.
/// - Elsewhere: every sample fails with [`SampleFailure::Unsupported`].
#[derive(Debug, Default)]
pub struct ProcSampler {
    last_cpu: Option<(Instant, Duration)>,
}

impl ProcSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn cpu_percent(&mut self, cpu_time: Duration) -> f64 {
        let now = Instant::now();
        let percent = match self.last_cpu {
            Some((at, prev)) => {
                let wall = now.duration_since(at).as_secs_f64();
                if wall > 0.0 {
                    cpu_time.saturating_sub(prev).as_secs_f64() / wall * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last_cpu = Some((now, cpu_time));
        percent
    }
}

impl ResourceSampler for ProcSampler {
    #[cfg(unix)]
    fn sample(&mut self) -> dcim_core::Result<ResourceSample> {
        let usage = unix::rusage()?;
        let rss_bytes = unix::rss_bytes(&usage)?;
        let cpu_percent = self.cpu_percent(unix::cpu_time(&usage));
        Ok(ResourceSample {
            timestamp: Utc::now(),
            rss_bytes,
            cpu_percent,
        })
    }

    #[cfg(not(unix))]
    fn sample(&mut self) -> dcim_core::Result<ResourceSample> {
        let _ = self.cpu_percent(Duration::ZERO);
        Err(dcim_core::Error::sample(
            SampleFailure::Unsupported,
            "resource sampling is not available on this platform",
        ))
    }
}

/// Extract `VmRSS` (reported in kB) from the contents of `/proc/<pid>/status`.
pub fn parse_vm_rss(status: &str) -> dcim_core::Result<u64> {
    let line = status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))
        .ok_or_else(|| dcim_core::Error::sample(SampleFailure::Parse, "no VmRSS line"))?;

    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            dcim_core::Error::sample(SampleFailure::Parse, format!("malformed line: {line}"))
        })?;

    Ok(kb.saturating_mul(1024))
}

#[cfg(unix)]
mod unix {
    use std::time::Duration;

    use dcim_core::SampleFailure;
    use nix::sys::resource::{getrusage, Usage, UsageWho};
    use nix::sys::time::TimeValLike;

    pub(super) fn rusage() -> dcim_core::Result<Usage> {
        getrusage(UsageWho::RUSAGE_SELF)
            .map_err(|e| dcim_core::Error::sample(SampleFailure::Io, format!("getrusage: {e}")))
    }

    pub(super) fn cpu_time(usage: &Usage) -> Duration {
        let micros = usage.user_time().num_microseconds() + usage.system_time().num_microseconds();
        Duration::from_micros(u64::try_from(micros).unwrap_or(0))
    }

    #[cfg(target_os = "linux")]
    pub(super) fn rss_bytes(_usage: &Usage) -> dcim_core::Result<u64> {
        let status = std::fs::read_to_string("/proc/self/status").map_err(|e| {
            dcim_core::Error::sample(SampleFailure::Io, format!("/proc/self/status: {e}"))
        })?;
        super::parse_vm_rss(&status)
    }

    // Without procfs only the peak is available. macOS reports bytes, the
    // BSDs report kilobytes.
    #[cfg(not(target_os = "linux"))]
    pub(super) fn rss_bytes(usage: &Usage) -> dcim_core::Result<u64> {
        let raw = u64::try_from(usage.max_rss()).unwrap_or(0);
        if cfg!(target_os = "macos") {
            Ok(raw)
        } else {
            Ok(raw.saturating_mul(1024))
        }
    }
}
