//! # dcim-av
//!
//! External tool plumbing for the DCIM converter.
//!
//! - **Tool discovery** ([`ToolRegistry`]) finds `ffmpeg` and `ffprobe`.
//! - **Command execution** ([`ToolCommand`]) runs a subprocess with a
//!   wall-clock timeout and kills it when the timeout fires.
//! - **Probing** ([`Prober`], [`FfprobeProber`]) turns `ffprobe` JSON into
//!   [`dcim_core::VideoInfo`].
//! - **Actions** ([`actions`]) build the iPhone-compatible encode.

pub mod actions;
pub mod command;
pub mod probe;
pub mod tools;

pub use actions::{convert_for_iphone, ConversionParams};
pub use command::{ToolCommand, ToolOutput};
pub use probe::{FfprobeProber, Prober};
pub use tools::{ToolInfo, ToolRegistry, FFMPEG, FFPROBE};
