//! Per-participant playback buffer
//!
//! Each remote participant gets a [`JitterSpeaker`] that absorbs network
//! jitter before playback. A speaker stays silent until it has buffered
//! `ideal` samples (it is then *primed*), plays until its buffer runs dry,
//! and then has to fill up to `ideal` again before it resumes.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::audio::buffer::RingBuffer;
use crate::audio::mixer::pcm_to_float;

/// Buffer capacity, in chunks
pub const MAX_BUFFER_CHUNKS: usize = 10;

/// Fill level required before playback starts, in chunks
pub const IDEAL_BUFFER_CHUNKS: usize = 5;

struct SpeakerState {
    buffer: RingBuffer,
    primed: bool,
    talking: bool,
    last_activity: Instant,
}

/// Jitter buffer for one remote participant
///
/// Written by the inbound router and read by the playback loop; the lock is
/// held only for the duration of a single buffer or unbuffer call.
pub struct JitterSpeaker {
    name: String,
    ideal_samples: usize,
    state: Mutex<SpeakerState>,
}

impl JitterSpeaker {
    /// Create a speaker with explicit buffer sizes (in samples)
    pub fn new(name: impl Into<String>, max_samples: usize, ideal_samples: usize) -> Self {
        Self {
            name: name.into(),
            ideal_samples: ideal_samples.min(max_samples),
            state: Mutex::new(SpeakerState {
                buffer: RingBuffer::new(max_samples),
                primed: false,
                talking: false,
                last_activity: Instant::now(),
            }),
        }
    }

    /// Create a speaker sized in device chunks
    pub fn with_chunk_size(name: impl Into<String>, chunk_size: usize) -> Self {
        Self::new(
            name,
            chunk_size * MAX_BUFFER_CHUNKS,
            chunk_size * IDEAL_BUFFER_CHUNKS,
        )
    }

    /// Participant this speaker belongs to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer a frame of 16-bit PCM received from the network
    pub fn buffer(&self, pcm: &[i16]) {
        let samples = pcm_to_float(pcm);
        let mut state = self.state.lock();
        state.buffer.push(&samples);
        state.last_activity = Instant::now();
        if state.buffer.len() >= self.ideal_samples {
            state.primed = true;
        }
    }

    /// Take `size` samples for playback
    ///
    /// Returns `None` while the speaker is not primed. A primed speaker that
    /// runs dry mid-read pads the frame with silence.
    pub fn read(&self, size: usize) -> Option<Vec<f32>> {
        let mut state = self.state.lock();

        if state.primed && !state.buffer.is_empty() {
            if !state.talking {
                tracing::info!("{} started talking", self.name);
                state.talking = true;
            }
            let mut frame = state.buffer.pop(size);
            frame.resize(size, 0.0);
            return Some(frame);
        }

        if state.primed {
            tracing::info!("{} stopped talking", self.name);
        }
        state.primed = false;
        state.talking = false;
        None
    }

    /// Whether the speaker is currently allowed to play
    pub fn is_primed(&self) -> bool {
        self.state.lock().primed
    }

    /// Number of samples waiting for playback
    pub fn buffered(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Whether the speaker has been silent and empty for longer than `ttl`
    pub fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        let state = self.state.lock();
        !state.primed
            && state.buffer.is_empty()
            && now.saturating_duration_since(state.last_activity) > ttl
    }
}
