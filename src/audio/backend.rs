//! Hardware abstraction used by the device manager
//!
//! The device manager only talks to audio hardware through these traits.
//! [`crate::audio::device::CpalBackend`] implements them on top of cpal; tests
//! substitute scripted fakes.

use crate::error::AudioError;

/// Identifier of the system default device
pub const DEFAULT_DEVICE: &str = "default";

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Capture,
    Playback,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Capture => write!(f, "microphone"),
            Direction::Playback => write!(f, "speaker"),
        }
    }
}

/// What the intercom asks the hardware for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per read/write
    pub period_size: usize,
}

/// What the hardware actually granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub period_size: usize,
}

/// Hardware volume control, when the device exposes one
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct VolumeInfo {
    pub volume: u32,
    pub min: u32,
    pub max: u32,
}

/// Result of a single blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` interleaved frames were written to the buffer
    Frames(usize),
    /// The driver lost data; the buffer content is invalid
    Overrun,
}

/// An open capture handle
pub trait CaptureStream: Send {
    /// Negotiated stream parameters
    fn params(&self) -> StreamParams;

    /// Human-readable device name
    fn device_name(&self) -> String;

    /// Block until one period is available and copy it into `buf`
    ///
    /// `buf` is cleared and refilled with interleaved 16-bit samples.
    fn read(&mut self, buf: &mut Vec<i16>) -> Result<ReadStatus, AudioError>;

    /// Stop delivering data
    fn pause(&mut self) -> Result<(), AudioError>;

    /// Release the hardware
    fn close(&mut self) -> Result<(), AudioError>;
}

/// An open playback handle
pub trait PlaybackStream: Send {
    /// Negotiated stream parameters
    fn params(&self) -> StreamParams;

    /// Human-readable device name
    fn device_name(&self) -> String;

    /// Block until the interleaved 16-bit samples are queued for output
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError>;

    /// Hardware volume control, if any
    fn volume(&self) -> Option<VolumeInfo> {
        None
    }

    /// Stop consuming data
    fn pause(&mut self) -> Result<(), AudioError>;

    /// Release the hardware
    fn close(&mut self) -> Result<(), AudioError>;
}

/// Source of audio devices
pub trait AudioBackend: Send + Sync {
    /// Identifiers of every device the host reports for a direction
    fn devices(&self, direction: Direction) -> Result<Vec<String>, AudioError>;

    fn open_capture(
        &self,
        device: &str,
        request: StreamRequest,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;

    fn open_playback(
        &self,
        device: &str,
        request: StreamRequest,
    ) -> Result<Box<dyn PlaybackStream>, AudioError>;
}
