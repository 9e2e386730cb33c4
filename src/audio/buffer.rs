//! Fixed-capacity ring buffer for audio samples
//!
//! Samples are pushed and popped in chunks. Pushing more than the free space
//! evicts the oldest samples, so the buffer always holds the most recent
//! `capacity` samples. Every operation copies at most two contiguous slices,
//! so cost is linear in the amount of data moved rather than in capacity.
//!
//! The buffer is single-owner; callers that share it across threads wrap it
//! in a lock (see [`crate::audio::speaker::JitterSpeaker`]).

/// Circular store of normalized (-1.0..1.0) samples
#[derive(Debug, Clone)]
pub struct RingBuffer {
    /// Backing storage, always `capacity` long
    samples: Vec<f32>,
    /// Index of the oldest sample
    start: usize,
    /// Number of occupied samples
    length: usize,
}

impl RingBuffer {
    /// Create an empty buffer holding at most `capacity` samples
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be non-zero");
        Self {
            samples: vec![0.0; capacity],
            start: 0,
            length: 0,
        }
    }

    /// Append samples, evicting the oldest ones if there is not enough room
    pub fn push(&mut self, data: &[f32]) {
        let capacity = self.capacity();

        if data.len() >= capacity {
            // Only the tail survives; lay it out from index 0
            self.samples.copy_from_slice(&data[data.len() - capacity..]);
            self.start = 0;
            self.length = capacity;
            return;
        }

        let overflow = (self.length + data.len()).saturating_sub(capacity);
        if overflow > 0 {
            self.start = (self.start + overflow) % capacity;
            self.length -= overflow;
        }

        let write_at = (self.start + self.length) % capacity;
        let first = data.len().min(capacity - write_at);
        self.samples[write_at..write_at + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            let rest = data.len() - first;
            self.samples[..rest].copy_from_slice(&data[first..]);
        }

        self.length += data.len();
    }

    /// Copy out up to `amount` of the oldest samples without consuming them
    pub fn read(&self, amount: usize) -> Vec<f32> {
        let amount = amount.min(self.length);
        let mut out = Vec::with_capacity(amount);

        let first = amount.min(self.capacity() - self.start);
        out.extend_from_slice(&self.samples[self.start..self.start + first]);
        out.extend_from_slice(&self.samples[..amount - first]);

        out
    }

    /// Remove and return up to `amount` of the oldest samples
    pub fn pop(&mut self, amount: usize) -> Vec<f32> {
        let out = self.read(amount);

        if out.len() == self.length {
            self.start = 0;
            self.length = 0;
        } else {
            self.start = (self.start + out.len()) % self.capacity();
            self.length -= out.len();
        }

        out
    }

    /// Drop all buffered samples
    pub fn clear(&mut self) {
        self.start = 0;
        self.length = 0;
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.length
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.length == self.capacity()
    }

    /// Maximum number of samples the buffer can hold
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.length as f32 / self.capacity() as f32
    }
}
