//! Sample-rate conversion between the network rate and device rates
//!
//! Wraps rubato's synchronous FFT resampler. Input is accumulated until a
//! full chunk is available, so a call may return fewer samples than it was
//! given (or none at all) while the resampler fills its first chunk.

use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Resampler as _};

use crate::error::AudioError;

/// Resampler channel count; channel mixing happens outside the resampler
const MONO: usize = 1;

/// Number of sub-chunks for the FFT resampler (1 = lowest latency)
const SUB_CHUNKS: usize = 1;

/// Check if resampling is needed between two rates
pub fn needs_resampling(from_rate: u32, to_rate: u32) -> bool {
    from_rate != to_rate
}

/// Mono resampler from one fixed rate to another
pub struct Resampler {
    resampler: Fft<f32>,
    from_rate: u32,
    to_rate: u32,
    /// Input waiting for a complete chunk
    pending: Vec<f32>,
    work_in: Vec<Vec<f32>>,
    work_out: Vec<Vec<f32>>,
}

impl Resampler {
    /// Create a resampler consuming `chunk_size` input frames per pass
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self, AudioError> {
        let resampler = Fft::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            chunk_size,
            SUB_CHUNKS,
            MONO,
            FixedSync::Input,
        )
        .map_err(|e| {
            AudioError::Resampler(format!(
                "Failed to create {}Hz -> {}Hz resampler: {}",
                from_rate, to_rate, e
            ))
        })?;

        let input_frames_max = resampler.input_frames_max();
        let output_frames_max = resampler.output_frames_max();

        Ok(Self {
            resampler,
            from_rate,
            to_rate,
            pending: Vec::with_capacity(input_frames_max * 2),
            work_in: vec![vec![0.0; input_frames_max]],
            work_out: vec![vec![0.0; output_frames_max]],
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Resample mono samples, returning whatever output is ready
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, AudioError> {
        self.pending.extend_from_slice(samples);
        let mut output = Vec::new();

        while self.pending.len() >= self.resampler.input_frames_next() {
            let frames_needed = self.resampler.input_frames_next();
            self.work_in[0][..frames_needed].copy_from_slice(&self.pending[..frames_needed]);
            self.pending.drain(..frames_needed);

            let input = SequentialSliceOfVecs::new(&self.work_in[..], MONO, frames_needed)
                .map_err(|e| AudioError::Resampler(format!("Input adapter error: {}", e)))?;

            let output_frames = self.resampler.output_frames_next();
            let mut out = SequentialSliceOfVecs::new_mut(&mut self.work_out[..], MONO, output_frames)
                .map_err(|e| AudioError::Resampler(format!("Output adapter error: {}", e)))?;

            let (_, frames_written) = self
                .resampler
                .process_into_buffer(&input, &mut out, None)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;

            output.extend_from_slice(&self.work_out[0][..frames_written]);
        }

        Ok(output)
    }
}
