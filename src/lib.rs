//! DCIM converter: scans camera folders for videos and converts them to
//! iPhone-compatible MP4 through ffmpeg.
//!
//! This library crate exposes the pipeline components for the binary and
//! for integration testing.

pub mod cache;
pub mod config;
pub mod conversion;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod projector;
pub mod queue;
pub mod scanner;
