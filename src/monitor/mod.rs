//! Periodic resource monitor.
//!
//! Samples process memory and CPU on a fixed interval, independent of the
//! scan and conversion pools. When resident memory crosses the configured
//! threshold every registered cache is cleared and shrunk, a
//! [`PipelineEvent::MemoryPressure`] is queued, and the shared
//! [`PressureSignal`] is raised so the scanner stops probing. Conversion
//! jobs are never paused or cancelled.

mod sampler;

pub use sampler::{parse_vm_rss, ProcSampler, ResourceSample, ResourceSampler};

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dcim_core::config::MonitorConfig;
use dcim_core::{PipelineEvent, SampleFailure};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::MemoryPressureTarget;
use crate::queue::BoundedQueue;

/// Shared flag raised while memory is above threshold.
#[derive(Debug, Clone, Default)]
pub struct PressureSignal(Arc<AtomicBool>);

impl PressureSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, raised: bool) {
        self.0.store(raised, Ordering::Relaxed);
    }
}

/// What a single [`ResourceMonitor::tick`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Memory below threshold.
    Normal,
    /// Memory at or above threshold; caches were cleared.
    Pressure { caches_cleared: usize },
    /// Sampling failed; nothing else happened.
    SampleFailed(SampleFailure),
}

pub struct ResourceMonitor {
    config: MonitorConfig,
    sampler: Box<dyn ResourceSampler>,
    targets: Vec<Arc<dyn MemoryPressureTarget>>,
    events: Arc<BoundedQueue<PipelineEvent>>,
    window: VecDeque<ResourceSample>,
    logged_failures: HashSet<SampleFailure>,
    pressure: PressureSignal,
}

impl ResourceMonitor {
    pub fn new(
        config: MonitorConfig,
        sampler: Box<dyn ResourceSampler>,
        events: Arc<BoundedQueue<PipelineEvent>>,
    ) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window.max(1)),
            config,
            sampler,
            targets: Vec::new(),
            events,
            logged_failures: HashSet::new(),
            pressure: PressureSignal::new(),
        }
    }

    /// Register a cache to be cleared under memory pressure.
    pub fn register(&mut self, target: Arc<dyn MemoryPressureTarget>) {
        self.targets.push(target);
    }

    /// Handle to the pressure flag, for the scanner.
    pub fn pressure_signal(&self) -> PressureSignal {
        self.pressure.clone()
    }

    /// Most recent successful sample.
    pub fn latest(&self) -> Option<&ResourceSample> {
        self.window.back()
    }

    /// Rolling window of recent samples, oldest first.
    pub fn window(&self) -> impl Iterator<Item = &ResourceSample> {
        self.window.iter()
    }

    /// Take one sample and react to it.
    pub fn tick(&mut self) -> TickOutcome {
        let sample = match self.sampler.sample() {
            Ok(sample) => sample,
            Err(e) => {
                let kind = match &e {
                    dcim_core::Error::ResourceSample { kind, .. } => *kind,
                    _ => SampleFailure::Io,
                };
                if self.logged_failures.insert(kind) {
                    tracing::warn!(kind = %kind, error = %e, "Resource sampling failed; further failures of this kind are not logged");
                }
                return TickOutcome::SampleFailed(kind);
            }
        };

        let rss_bytes = sample.rss_bytes;
        tracing::trace!(rss_bytes, cpu_percent = sample.cpu_percent, "Resource sample");

        if self.window.len() >= self.config.window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        let threshold_bytes = self.config.memory_threshold_bytes();
        if rss_bytes < threshold_bytes {
            if self.pressure.is_raised() {
                tracing::info!(rss_bytes, threshold_bytes, "Memory back below threshold");
            }
            self.pressure.set(false);
            return TickOutcome::Normal;
        }

        self.pressure.set(true);
        for target in &self.targets {
            target.clear();
            target.shrink();
            tracing::debug!(cache = target.name(), "Cleared cache under memory pressure");
        }
        let caches_cleared = self.targets.len();

        tracing::warn!(rss_bytes, threshold_bytes, caches_cleared, "Memory pressure");
        self.events.push(PipelineEvent::MemoryPressure {
            rss_bytes,
            threshold_bytes,
            caches_cleared,
        });

        TickOutcome::Pressure { caches_cleared }
    }

    /// Tick on the configured interval until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(interval = ?self.config.interval(), "Resource monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
        tracing::debug!("Resource monitor stopped");
    }
}
