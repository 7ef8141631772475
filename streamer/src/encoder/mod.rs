//! Encoder processes: launching, owning, and describing them.

pub mod ffmpeg;
pub mod playlist;
pub mod process;
pub mod profile;

pub use ffmpeg::FfmpegLauncher;
pub use process::{
    ChildProcess, EncoderHandle, EncoderInfo, EncoderLauncher, EncoderProcess, LaunchRequest,
};
pub use profile::{OutputFormat, QualityProfile};
