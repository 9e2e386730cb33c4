//! Always-on intercom endpoint
//!
//! Bridges one microphone and one speaker to a voice-chat network. Sound
//! devices are opened, watched and reopened in the background, so unplugging
//! a USB headset or a flaky driver only costs a few seconds of audio.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          DeviceManager                               │
//! │   health check worker: resolve, open, reset, reopen every 5 s        │
//! │                                                                      │
//! │   Microphone ──► downmix ──► resample ──► VAD gate                   │
//! │   Speaker    ◄── upmix   ◄── resample ◄──────────────────┐           │
//! └───────────────────────────────┬──────────────────────────┼───────────┘
//!                                 │ 48kHz mono i16           │ 48kHz mono f32
//!                                 ▼                          │
//! ┌───────────────────────────────────────┐   ┌──────────────┴──────────┐
//! │ Transmitter                           │   │ AudioEngine mixer       │
//! │ drop silence, bounded queue,          │   │ one JitterSpeaker per   │
//! │ trim network backlog                  │   │ remote participant      │
//! └───────────────────┬───────────────────┘   └──────────────▲──────────┘
//!                     │ send_frame                           │ NetworkEvent
//!                     ▼                                      │
//! ┌──────────────────────────────────────────────────────────┴──────────┐
//! │                 VoiceNetwork (reconnects until shutdown)             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod intercom;
pub mod network;
pub mod shutdown;
pub mod ui;
pub mod worker;

pub use error::{Error, Result};
pub use intercom::Intercom;

/// Application-wide constants
pub mod constants {
    /// Sample rate of audio exchanged with the voice network
    pub const NETWORK_SAMPLE_RATE: u32 = 48000;

    /// Channel count of audio exchanged with the voice network
    pub const NETWORK_CHANNELS: u16 = 1;
}
