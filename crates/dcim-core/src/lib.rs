//! dcim-core: shared types, errors, configuration, and pipeline events.
//!
//! This crate is the foundational dependency of the converter. It provides
//! the unified error type, the media-domain model (discovered files, probe
//! results, quality profiles, resolution caps), conversion job identity and
//! states, the event payloads consumed by the presentation layer, and the
//! TOML configuration tree.

pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result, SampleFailure};
pub use events::PipelineEvent;
pub use job::{JobId, JobState};
pub use media::*;
