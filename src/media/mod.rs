//! Local camera/microphone capture and the remote video sink
//!
//! - `MediaCaptureSession`: bounded acquisition with audio-only fallback,
//!   track toggles, idempotent release
//! - `WavFileDevices`: WAV-backed microphone for headless runs
//! - `g711`: PCMU encoding for the outgoing microphone track
//! - `FrameSlot`: latest decoded remote frame, read by the emotion sampler

mod capture;
mod file;
pub mod g711;
mod track;
mod video;

pub use capture::{Capability, MediaCaptureSession, MediaConstraints, MediaDevices};
pub use file::{AudioFile, WavFileDevices};
pub use track::{AudioFrame, LocalStream, MediaTrack, TrackKind};
pub use video::{FrameSlot, VideoFrame, VideoSink};
