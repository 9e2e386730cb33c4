//! Real-time audio loops
//!
//! ```text
//!  microphone ──► DeviceManager::microphone_read ──► Transmitter ──► network
//!
//!  network ──► NetworkEvent channel ──► router ──► JitterSpeaker (per participant)
//!                                                        │
//!  speaker ◄── DeviceManager::speaker_write ◄── mix ◄────┘
//! ```
//!
//! Three threads run for the lifetime of the engine: capture, playback and
//! the inbound router. None of them terminates on an audio error; every
//! failed iteration degrades to silence and the loop carries on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::audio::manager::DeviceManager;
use crate::audio::mixer::mix;
use crate::audio::speaker::JitterSpeaker;
use crate::constants::NETWORK_SAMPLE_RATE;
use crate::control::Control;
use crate::error::AudioError;
use crate::network::{NetworkEvent, Transmitter};
use crate::shutdown::Shutdown;

/// How long the router waits for an event before re-checking shutdown
const EVENT_POLL: Duration = Duration::from_millis(500);

/// How often idle speakers are looked for
const EVICTION_INTERVAL: Duration = Duration::from_secs(1);

/// Buffer state of one remote participant
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SpeakerStatus {
    pub name: String,
    pub primed: bool,
    pub buffered: usize,
}

struct EngineInner {
    devices: Arc<DeviceManager>,
    transmitter: Arc<Transmitter>,
    control: Arc<Control>,
    shutdown: Shutdown,
    events: Receiver<NetworkEvent>,
    speakers: Mutex<HashMap<String, Arc<JitterSpeaker>>>,
    speaker_ttl: Duration,
    running: AtomicBool,
}

/// Owner of the capture, playback and routing loops
pub struct AudioEngine {
    inner: Arc<EngineInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl AudioEngine {
    pub fn new(
        devices: Arc<DeviceManager>,
        transmitter: Arc<Transmitter>,
        control: Arc<Control>,
        events: Receiver<NetworkEvent>,
        shutdown: Shutdown,
        speaker_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                devices,
                transmitter,
                control,
                shutdown,
                events,
                speakers: Mutex::new(HashMap::new()),
                speaker_ttl,
                running: AtomicBool::new(false),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Start the capture, playback and router threads
    pub fn start(&self) -> std::io::Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut threads = self.threads.lock();

        let inner = self.inner.clone();
        threads.push(
            thread::Builder::new()
                .name("microphone".into())
                .spawn(move || inner.capture_loop())?,
        );

        let inner = self.inner.clone();
        threads.push(
            thread::Builder::new()
                .name("speaker".into())
                .spawn(move || inner.playback_loop())?,
        );

        let inner = self.inner.clone();
        threads.push(
            thread::Builder::new()
                .name("router".into())
                .spawn(move || inner.router_loop())?,
        );

        Ok(())
    }

    /// Stop all loops and wait for them to exit
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }

    /// Handle one event from the network
    pub fn handle_event(&self, event: NetworkEvent) {
        self.inner.handle_event(event);
    }

    /// Produce the next frame for the speaker and update `receiving`
    pub fn next_output(&self) -> Vec<f32> {
        self.inner.next_output()
    }

    pub fn speakers(&self) -> Vec<SpeakerStatus> {
        let mut speakers: Vec<SpeakerStatus> = self
            .inner
            .speakers
            .lock()
            .values()
            .map(|speaker| SpeakerStatus {
                name: speaker.name().to_string(),
                primed: speaker.is_primed(),
                buffered: speaker.buffered(),
            })
            .collect();
        speakers.sort_by(|a, b| a.name.cmp(&b.name));
        speakers
    }

    /// Forget speakers that have been idle longer than the TTL
    pub fn evict_idle_speakers(&self, now: Instant) -> usize {
        self.inner.evict_idle_speakers(now)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl EngineInner {
    fn active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.is_requested()
    }

    fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.devices.chunk_size() as f64 / NETWORK_SAMPLE_RATE as f64)
    }

    fn capture_loop(&self) {
        let idle = self.chunk_duration();
        while self.active() {
            match self.devices.microphone_read() {
                Some(frame) => {
                    self.transmitter.transmit(frame);
                }
                // No microphone: don't spin while the health check reopens it
                None => thread::sleep(idle),
            }
        }
        tracing::debug!("Microphone loop stopped");
    }

    fn playback_loop(&self) {
        let idle = self.chunk_duration();
        let mut last_eviction = Instant::now();

        while self.active() {
            let frame = self.next_output();
            if !self.devices.speaker_write(&frame) {
                thread::sleep(idle);
            }

            let now = Instant::now();
            if now.duration_since(last_eviction) >= EVICTION_INTERVAL {
                self.evict_idle_speakers(now);
                last_eviction = now;
            }
        }
        self.control.set_receiving(false);
        tracing::debug!("Speaker loop stopped");
    }

    fn router_loop(&self) {
        while self.active() {
            match self.events.recv_timeout(EVENT_POLL) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!("Router stopped");
    }

    fn handle_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connected => {
                self.control.set_connected(true);
            }
            NetworkEvent::Disconnected => {
                self.control.set_connected(false);
            }
            NetworkEvent::FrameReceived { participant, pcm } => self.route(participant, &pcm),
        }
    }

    /// Append a remote frame to its participant's jitter buffer
    fn route(&self, participant: String, pcm: &[i16]) {
        if self.control.deafened() {
            return;
        }

        // Buffer under the map lock so eviction never sees a new, empty speaker
        let mut speakers = self.speakers.lock();
        speakers
            .entry(participant)
            .or_insert_with_key(|name| {
                tracing::debug!("New speaker {}", name);
                Arc::new(JitterSpeaker::with_chunk_size(
                    name.clone(),
                    self.devices.chunk_size(),
                ))
            })
            .buffer(pcm);
    }

    fn next_output(&self) -> Vec<f32> {
        let chunk = self.devices.chunk_size();
        match self.mix_ready(chunk) {
            Ok(Some(frame)) => {
                self.control.set_receiving(true);
                frame
            }
            Ok(None) => {
                self.control.set_receiving(false);
                vec![0.0; chunk]
            }
            Err(e) => {
                if !self.shutdown.is_requested() {
                    tracing::error!("Failed to mix speaker audio: {}", e);
                }
                self.control.set_receiving(false);
                vec![0.0; chunk]
            }
        }
    }

    /// One frame from every primed speaker, combined
    fn mix_ready(&self, chunk: usize) -> Result<Option<Vec<f32>>, AudioError> {
        let speakers: Vec<Arc<JitterSpeaker>> = self.speakers.lock().values().cloned().collect();
        let mut ready: Vec<Vec<f32>> = speakers
            .iter()
            .filter_map(|speaker| speaker.read(chunk))
            .collect();

        if ready.is_empty() || self.control.deafened() {
            return Ok(None);
        }
        if ready.len() == 1 {
            return Ok(ready.pop());
        }
        mix(&ready).map(Some)
    }

    fn evict_idle_speakers(&self, now: Instant) -> usize {
        let mut speakers = self.speakers.lock();
        let before = speakers.len();
        speakers.retain(|name, speaker| {
            let idle = speaker.is_idle(now, self.speaker_ttl);
            if idle {
                tracing::debug!("Forgetting idle speaker {}", name);
            }
            !idle
        });
        before - speakers.len()
    }
}
