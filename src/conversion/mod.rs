//! Video conversion.
//!
//! [`ConversionCoordinator`] drains the discovery queue in capped batches and
//! runs each [`ConversionJob`] on a semaphore-bounded pool of tokio tasks.
//! Each job invokes ffmpeg with the iPhone parameter set under a wall-clock
//! timeout; its terminal state is reported as a `JobFinished` event.

mod coordinator;
mod job;

pub use coordinator::{ConversionCoordinator, ConversionSummary, CoordinatorOptions};
pub use job::{output_path_for, ConversionJob};
