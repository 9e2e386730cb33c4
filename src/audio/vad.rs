//! Voice-activity detection for the microphone path
//!
//! Energy is the mean absolute amplitude of a frame scaled to a 0..50 range.
//! Detection opens as soon as a frame exceeds the minimum energy and stays
//! open for a hang time after the last such frame.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default minimum energy that counts as voice
pub const DEFAULT_VAD_MINIMUM: f32 = 0.5;

/// Default time detection stays open after the last loud frame
pub const DEFAULT_VAD_HANG: Duration = Duration::from_millis(500);

/// Number of readings kept for the reported level
pub const VAD_WINDOW: usize = 10;

/// Energy of a mono frame
pub fn frame_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32;
    round_to(mean * 0.5 * 100.0, 2)
}

fn round_to(value: f32, places: i32) -> f32 {
    let factor = 10f32.powi(places);
    (value * factor).round() / factor
}

/// Hysteresis voice detector with a rolling level window
#[derive(Debug)]
pub struct VoiceActivity {
    minimum: f32,
    hang: Duration,
    last_activated: Option<Instant>,
    active: bool,
    window: VecDeque<f32>,
}

impl VoiceActivity {
    pub fn new(minimum: f32, hang: Duration) -> Self {
        Self {
            minimum,
            hang,
            last_activated: None,
            active: false,
            window: VecDeque::with_capacity(VAD_WINDOW),
        }
    }

    /// Feed one frame's energy and report whether voice is present
    pub fn update(&mut self, energy: f32, now: Instant) -> bool {
        self.record(energy);

        if energy > self.minimum {
            self.last_activated = Some(now);
        }

        let active = self
            .last_activated
            .is_some_and(|at| now.saturating_duration_since(at) < self.hang);

        if active != self.active {
            self.active = active;
            if active {
                tracing::info!("Sound detected");
            } else {
                tracing::info!("No sound detected");
            }
        }

        active
    }

    /// Record a reading without evaluating detection (e.g. a failed read)
    pub fn record(&mut self, energy: f32) {
        if self.window.len() == VAD_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(energy);
    }

    /// Highest recent energy, rounded to one decimal place
    pub fn level(&self) -> f32 {
        let max = self.window.iter().copied().fold(0.0f32, f32::max);
        round_to(max, 1)
    }

    /// Whether detection is currently open
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for VoiceActivity {
    fn default() -> Self {
        Self::new(DEFAULT_VAD_MINIMUM, DEFAULT_VAD_HANG)
    }
}
