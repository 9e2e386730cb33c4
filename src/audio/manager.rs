//! Sound device ownership and recovery
//!
//! The [`DeviceManager`] keeps one capture and one playback stream open,
//! converting between whatever the hardware granted and the 48kHz mono the
//! network speaks. Failures never reach the audio loops: a failed read or
//! write flags the device for reset, and the health check running on the
//! manager's [`Worker`] closes and reopens it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::audio::backend::{
    AudioBackend, CaptureStream, Direction, PlaybackStream, ReadStatus, StreamParams,
    StreamRequest, VolumeInfo,
};
use crate::audio::device::{list_raw, list_recommended, resolve_device, DeviceListing};
use crate::audio::mixer::{downmix, float_to_pcm, pcm_to_float, peak, upmix};
use crate::audio::resample::{needs_resampling, Resampler};
use crate::audio::vad::{frame_energy, VoiceActivity};
use crate::config::AudioConfig;
use crate::constants::{NETWORK_CHANNELS, NETWORK_SAMPLE_RATE};
use crate::error::AudioError;
use crate::shutdown::Shutdown;
use crate::worker::{Worker, WorkerHandle};

struct CaptureSlot {
    stream: Box<dyn CaptureStream>,
    resampler: Option<Resampler>,
    params: StreamParams,
    name: String,
}

struct PlaybackSlot {
    stream: Box<dyn PlaybackStream>,
    resampler: Option<Resampler>,
    params: StreamParams,
    name: String,
    volume: Option<VolumeInfo>,
}

/// An open device as reported by [`DeviceManager::status`]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OpenDevice {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
}

/// Device state snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceStatus {
    pub microphone: Option<OpenDevice>,
    pub speaker: Option<OpenDevice>,
    pub vad_level: f32,
    pub chunk_size: usize,
}

struct Inner {
    config: AudioConfig,
    chunk_size: usize,
    backend: Arc<dyn AudioBackend>,
    shutdown: Shutdown,
    worker: WorkerHandle,
    running: AtomicBool,

    microphone: Mutex<Option<CaptureSlot>>,
    speaker: Mutex<Option<PlaybackSlot>>,
    reset_microphone: AtomicBool,
    reset_speaker: AtomicBool,

    vad: Mutex<VoiceActivity>,
}

/// Owner of the microphone and speaker
pub struct DeviceManager {
    inner: Arc<Inner>,
    worker: Mutex<Worker>,
}

impl DeviceManager {
    pub fn new(config: AudioConfig, backend: Arc<dyn AudioBackend>, shutdown: Shutdown) -> Self {
        let worker = Worker::new("device-check");
        let chunk_size = config.resolved_chunk_size();
        let vad = VoiceActivity::new(config.vad_minimum, config.vad_hang());

        Self {
            inner: Arc::new(Inner {
                config,
                chunk_size,
                backend,
                shutdown,
                worker: worker.handle(),
                running: AtomicBool::new(false),
                microphone: Mutex::new(None),
                speaker: Mutex::new(None),
                reset_microphone: AtomicBool::new(false),
                reset_speaker: AtomicBool::new(false),
                vad: Mutex::new(vad),
            }),
            worker: Mutex::new(worker),
        }
    }

    /// Validate the configured devices and start the health check
    ///
    /// An unknown device is fatal here; once running, a device that
    /// disappears is treated as absent and retried.
    pub fn start(&self) -> crate::Result<()> {
        let inner = &self.inner;
        resolve_device(&*inner.backend, Direction::Capture, &inner.config.microphone)?;
        resolve_device(&*inner.backend, Direction::Playback, &inner.config.speaker)?;

        self.worker.lock().start()?;
        inner.running.store(true, Ordering::SeqCst);
        tracing::info!("Using a device chunk size of {} frames", inner.chunk_size);

        let task_inner = inner.clone();
        inner
            .worker
            .submit(Duration::ZERO, move || run_health_check(task_inner));
        Ok(())
    }

    /// Stop the health check and release both devices
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.worker.lock().stop();

        if let Some(slot) = self.inner.speaker.lock().take() {
            close_playback(slot);
            tracing::info!("Closed speaker");
        }
        if let Some(slot) = self.inner.microphone.lock().take() {
            close_capture(slot);
            tracing::info!("Closed microphone");
        }
    }

    /// Close and reopen the microphone on the next health check
    pub fn reset_microphone(&self) {
        self.inner.request_reset(Direction::Capture);
    }

    /// Close and reopen the speaker on the next health check
    pub fn reset_speaker(&self) {
        self.inner.request_reset(Direction::Playback);
    }

    /// Frames per device read, at the network rate
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// Recent voice level for display
    pub fn vad_level(&self) -> f32 {
        self.inner.vad.lock().level()
    }

    pub fn microphone_open(&self) -> bool {
        self.inner.microphone.lock().is_some()
    }

    pub fn speaker_open(&self) -> bool {
        self.inner.speaker.lock().is_some()
    }

    pub fn status(&self) -> DeviceStatus {
        let microphone = self.inner.microphone.lock().as_ref().map(|slot| OpenDevice {
            name: slot.name.clone(),
            sample_rate: slot.params.sample_rate,
            channels: slot.params.channels,
            volume: None,
        });
        let speaker = self.inner.speaker.lock().as_ref().map(|slot| OpenDevice {
            name: slot.name.clone(),
            sample_rate: slot.params.sample_rate,
            channels: slot.params.channels,
            volume: slot.volume,
        });

        DeviceStatus {
            microphone,
            speaker,
            vad_level: self.vad_level(),
            chunk_size: self.inner.chunk_size,
        }
    }

    /// Recommended devices, as printed by `list-devices`
    pub fn listing(&self) -> Result<DeviceListing, AudioError> {
        list_recommended(&*self.inner.backend)
    }

    /// Every device the host reports
    pub fn raw_listing(&self) -> Result<DeviceListing, AudioError> {
        list_raw(&*self.inner.backend)
    }

    /// Read one frame of 48kHz mono audio from the microphone
    ///
    /// Returns `None` when no microphone is available or the read failed.
    /// Frames without voice come back as silence.
    pub fn microphone_read(&self) -> Option<Vec<i16>> {
        let inner = &self.inner;
        match inner.read_microphone() {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                inner.vad.lock().record(0.0);
                None
            }
            Err(e) => {
                if !inner.shutdown.is_requested() {
                    tracing::error!("Microphone reported an error: {}", e);
                    inner.request_reset(Direction::Capture);
                }
                inner.vad.lock().record(0.0);
                None
            }
        }
    }

    /// Play one frame of 48kHz mono audio
    ///
    /// Returns `false` if there was no speaker to write to.
    pub fn speaker_write(&self, samples: &[f32]) -> bool {
        let inner = &self.inner;
        if inner.shutdown.is_requested() || inner.reset_speaker.load(Ordering::SeqCst) {
            return false;
        }

        let result = {
            let mut guard = inner.speaker.lock();
            let Some(slot) = guard.as_mut() else {
                return false;
            };
            write_speaker(slot, samples)
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                if !inner.shutdown.is_requested() {
                    tracing::error!("Speaker reported an error: {}", e);
                    inner.request_reset(Direction::Playback);
                }
                false
            }
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }
}

fn run_health_check(inner: Arc<Inner>) -> anyhow::Result<()> {
    let mut delay = inner.config.health_check_interval();
    let capture = inner.check_microphone(&mut delay);
    let playback = inner.check_speaker(&mut delay);

    if inner.running.load(Ordering::SeqCst) {
        let next = inner.clone();
        inner.worker.submit(delay, move || run_health_check(next));
    }

    capture?;
    playback?;
    Ok(())
}

impl Inner {
    fn request_reset(&self, direction: Direction) {
        match direction {
            Direction::Capture => self.reset_microphone.store(true, Ordering::SeqCst),
            Direction::Playback => self.reset_speaker.store(true, Ordering::SeqCst),
        }
        self.worker.trigger();
    }

    fn request(&self) -> StreamRequest {
        StreamRequest {
            sample_rate: NETWORK_SAMPLE_RATE,
            channels: NETWORK_CHANNELS,
            period_size: self.chunk_size,
        }
    }

    fn check_microphone(&self, delay: &mut Duration) -> Result<(), AudioError> {
        // Devices come and go after boot, so resolve on every tick
        let target = resolve_device(&*self.backend, Direction::Capture, &self.config.microphone);

        if self.reset_microphone.swap(false, Ordering::SeqCst) {
            let slot = self.microphone.lock().take();
            if let Some(slot) = slot {
                tracing::info!("Closing microphone {}", slot.name);
                close_capture(slot);
                tracing::info!("Closed microphone");
                *delay = Duration::ZERO;
                return Ok(());
            }
        }

        let Some(id) = target? else {
            return Ok(());
        };
        if self.microphone.lock().is_some() || self.shutdown.is_requested() {
            return Ok(());
        }

        tracing::info!("Connecting to the microphone:");
        let stream = self.backend.open_capture(&id, self.request())?;
        let params = stream.params();
        let name = stream.device_name();
        let resampler = if needs_resampling(params.sample_rate, NETWORK_SAMPLE_RATE) {
            Some(Resampler::new(
                params.sample_rate,
                NETWORK_SAMPLE_RATE,
                params.period_size,
            )?)
        } else {
            None
        };

        tracing::info!("  Device name: {}", name);
        tracing::info!("  Channels:    {}", params.channels);
        tracing::info!("  Sample rate: {} Hz", params.sample_rate);

        *self.microphone.lock() = Some(CaptureSlot {
            stream,
            resampler,
            params,
            name,
        });
        Ok(())
    }

    fn check_speaker(&self, delay: &mut Duration) -> Result<(), AudioError> {
        let target = resolve_device(&*self.backend, Direction::Playback, &self.config.speaker);

        if self.reset_speaker.swap(false, Ordering::SeqCst) {
            let slot = self.speaker.lock().take();
            if let Some(slot) = slot {
                tracing::info!("Closing speaker {}", slot.name);
                close_playback(slot);
                tracing::info!("Closed speaker");
                *delay = Duration::ZERO;
                return Ok(());
            }
        }

        let Some(id) = target? else {
            return Ok(());
        };
        if self.speaker.lock().is_some() || self.shutdown.is_requested() {
            return Ok(());
        }

        tracing::info!("Connecting to the speaker:");
        let stream = self.backend.open_playback(&id, self.request())?;
        let params = stream.params();
        let name = stream.device_name();
        let resampler = if needs_resampling(NETWORK_SAMPLE_RATE, params.sample_rate) {
            Some(Resampler::new(
                NETWORK_SAMPLE_RATE,
                params.sample_rate,
                self.chunk_size,
            )?)
        } else {
            None
        };

        tracing::info!("  Device name:  {}", name);
        tracing::info!("  Channels:     {}", params.channels);
        tracing::info!("  Sample rate:  {} Hz", params.sample_rate);

        let volume = stream.volume();
        match volume {
            Some(v) => {
                tracing::info!("  Volume:       {}", v.volume);
                tracing::info!("  Volume Range: {}-{}", v.min, v.max);
            }
            None => tracing::warn!(
                "Unable to find a mixer device for this speaker. Volume control will be unavailable."
            ),
        }

        *self.speaker.lock() = Some(PlaybackSlot {
            stream,
            resampler,
            params,
            name,
            volume,
        });
        Ok(())
    }

    fn read_microphone(&self) -> Result<Option<Vec<i16>>, AudioError> {
        let overrun_timeout = self.config.overrun_timeout();
        let started = Instant::now();
        let mut buf = Vec::new();

        loop {
            if self.shutdown.is_requested() || self.reset_microphone.load(Ordering::SeqCst) {
                return Ok(None);
            }

            // The lock is held per attempt so a reset can get in between retries
            let mut guard = self.microphone.lock();
            let Some(slot) = guard.as_mut() else {
                return Ok(None);
            };

            let attempt = Instant::now();
            let status = slot.stream.read(&mut buf)?;
            let elapsed = attempt.elapsed();

            let frames = match status {
                ReadStatus::Frames(frames) if frames > 0 => frames,
                _ => {
                    if started.elapsed() > overrun_timeout {
                        tracing::warn!("Buffer overrun from the microphone");
                        return Ok(None);
                    }
                    continue;
                }
            };

            let expected = frames as f64 / slot.params.sample_rate as f64;
            if elapsed.as_secs_f64() < expected * self.config.stale_read_ratio {
                tracing::debug!(
                    "Expected microphone read to take {} us, but it took {} us",
                    (expected * 1_000_000.0) as u64,
                    elapsed.as_micros()
                );
                if started.elapsed() > overrun_timeout {
                    tracing::warn!("Buffer overrun from the microphone");
                    return Ok(None);
                }
                continue;
            }

            let channels = slot.params.channels as usize;
            if channels == 0 || buf.len() != frames * channels {
                tracing::error!(
                    "Reading from the soundcard got an invalid channel count. frames: {} samples: {}",
                    frames,
                    buf.len()
                );
                return Ok(None);
            }

            let mut mono = downmix(&pcm_to_float(&buf), channels);
            if let Some(resampler) = slot.resampler.as_mut() {
                mono = resampler.process(&mono)?;
            }
            drop(guard);

            return Ok(Some(self.gate(mono)));
        }
    }

    /// Apply voice detection and the corruption guard to a mono frame
    fn gate(&self, mono: Vec<f32>) -> Vec<i16> {
        let energy = frame_energy(&mono);
        let voice = self.vad.lock().update(energy, Instant::now());

        // Out-of-range samples mean garbage from the driver, not clipping
        if peak(&mono) > 1.0 || !voice {
            vec![0; mono.len()]
        } else {
            float_to_pcm(&mono)
        }
    }
}

fn write_speaker(slot: &mut PlaybackSlot, samples: &[f32]) -> Result<(), AudioError> {
    let resampled = match slot.resampler.as_mut() {
        Some(resampler) => resampler.process(samples)?,
        None => samples.to_vec(),
    };
    if resampled.is_empty() {
        return Ok(());
    }

    let output = upmix(&resampled, slot.params.channels as usize);
    slot.stream.write(&float_to_pcm(&output))
}

fn close_capture(mut slot: CaptureSlot) {
    tracing::debug!("Pausing");
    if let Err(e) = slot.stream.pause() {
        tracing::debug!("{}", e);
    }
    tracing::debug!("Closing");
    if let Err(e) = slot.stream.close() {
        tracing::debug!("{}", e);
    }
}

fn close_playback(mut slot: PlaybackSlot) {
    tracing::debug!("Pausing");
    if let Err(e) = slot.stream.pause() {
        tracing::debug!("{}", e);
    }
    tracing::debug!("Closing");
    if let Err(e) = slot.stream.close() {
        tracing::debug!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSelector;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// One scripted microphone read: delay, then result
    type Step = (Duration, Result<(ReadStatus, Vec<i16>), String>);

    #[derive(Default)]
    struct Shared {
        script: Mutex<VecDeque<Step>>,
        reads: AtomicUsize,
        capture_opens: AtomicUsize,
        written: Mutex<Vec<Vec<i16>>>,
    }

    struct FakeBackend {
        shared: Arc<Shared>,
        sample_rate: u32,
        channels: u16,
    }

    impl FakeBackend {
        fn new(sample_rate: u32, channels: u16) -> Self {
            Self {
                shared: Arc::new(Shared::default()),
                sample_rate,
                channels,
            }
        }

        fn params(&self, request: StreamRequest) -> StreamParams {
            StreamParams {
                sample_rate: self.sample_rate,
                channels: self.channels,
                period_size: request.period_size,
            }
        }
    }

    struct FakeCapture {
        shared: Arc<Shared>,
        params: StreamParams,
    }

    impl CaptureStream for FakeCapture {
        fn params(&self) -> StreamParams {
            self.params
        }

        fn device_name(&self) -> String {
            "Fake Microphone".into()
        }

        fn read(&mut self, buf: &mut Vec<i16>) -> Result<ReadStatus, AudioError> {
            self.shared.reads.fetch_add(1, Ordering::SeqCst);
            let step = self.shared.script.lock().pop_front();
            let period = self.params.period_size;
            let (delay, result) = step.unwrap_or_else(|| {
                let duration = Duration::from_secs_f64(period as f64 / self.params.sample_rate as f64);
                let silence = vec![0; period * self.params.channels as usize];
                (duration, Ok((ReadStatus::Frames(period), silence)))
            });

            thread::sleep(delay);
            let (status, data) = result.map_err(AudioError::StreamError)?;
            *buf = data;
            Ok(status)
        }

        fn pause(&mut self) -> Result<(), AudioError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), AudioError> {
            Ok(())
        }
    }

    struct FakePlayback {
        shared: Arc<Shared>,
        params: StreamParams,
    }

    impl PlaybackStream for FakePlayback {
        fn params(&self) -> StreamParams {
            self.params
        }

        fn device_name(&self) -> String {
            "Fake Speaker".into()
        }

        fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
            self.shared.written.lock().push(samples.to_vec());
            Ok(())
        }

        fn pause(&mut self) -> Result<(), AudioError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), AudioError> {
            Ok(())
        }
    }

    impl AudioBackend for FakeBackend {
        fn devices(&self, _: Direction) -> Result<Vec<String>, AudioError> {
            Ok(vec!["default".into(), "sysdefault:CARD=Fake".into()])
        }

        fn open_capture(
            &self,
            _: &str,
            request: StreamRequest,
        ) -> Result<Box<dyn CaptureStream>, AudioError> {
            self.shared.capture_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeCapture {
                shared: self.shared.clone(),
                params: self.params(request),
            }))
        }

        fn open_playback(
            &self,
            _: &str,
            request: StreamRequest,
        ) -> Result<Box<dyn PlaybackStream>, AudioError> {
            Ok(Box::new(FakePlayback {
                shared: self.shared.clone(),
                params: self.params(request),
            }))
        }
    }

    const PERIOD: usize = 512;

    fn real_time() -> Duration {
        Duration::from_secs_f64(PERIOD as f64 / 48_000.0) + Duration::from_millis(1)
    }

    fn started(config: AudioConfig, backend: FakeBackend) -> (DeviceManager, Arc<Shared>) {
        started_with(config, backend, Shutdown::new())
    }

    fn started_with(
        config: AudioConfig,
        backend: FakeBackend,
        shutdown: Shutdown,
    ) -> (DeviceManager, Arc<Shared>) {
        let shared = backend.shared.clone();
        let manager = DeviceManager::new(config, Arc::new(backend), shutdown);
        manager.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !(manager.microphone_open() && manager.speaker_open()) {
            assert!(Instant::now() < deadline, "devices never opened");
            thread::sleep(Duration::from_millis(5));
        }
        (manager, shared)
    }

    fn config() -> AudioConfig {
        AudioConfig {
            chunk_size: PERIOD,
            health_check_secs: 60.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_stale_read_is_rejected() {
        let (manager, shared) = started(config(), FakeBackend::new(48_000, 1));
        shared.script.lock().extend([
            // Returns instantly: stale buffer
            (Duration::ZERO, Ok((ReadStatus::Frames(PERIOD), vec![8000; PERIOD]))),
            (real_time(), Ok((ReadStatus::Frames(PERIOD), vec![16384; PERIOD]))),
        ]);

        let frame = manager.microphone_read().unwrap();
        assert_eq!(frame, vec![16384; PERIOD]);
        assert_eq!(shared.reads.load(Ordering::SeqCst), 2);
        manager.stop();
    }

    #[test]
    fn test_quiet_frame_is_silenced() {
        let (manager, shared) = started(config(), FakeBackend::new(48_000, 1));
        shared
            .script
            .lock()
            .push_back((real_time(), Ok((ReadStatus::Frames(PERIOD), vec![10; PERIOD]))));

        assert_eq!(manager.microphone_read().unwrap(), vec![0; PERIOD]);
        manager.stop();
    }

    #[test]
    fn test_stereo_capture_is_downmixed() {
        let (manager, shared) = started(config(), FakeBackend::new(48_000, 2));
        let interleaved: Vec<i16> = (0..PERIOD).flat_map(|_| [16384, 0]).collect();
        shared
            .script
            .lock()
            .push_back((real_time(), Ok((ReadStatus::Frames(PERIOD), interleaved))));

        assert_eq!(manager.microphone_read().unwrap(), vec![16384; PERIOD]);
        manager.stop();
    }

    #[test]
    fn test_overrun_gives_up_after_timeout() {
        let config = AudioConfig {
            overrun_timeout_secs: 0.05,
            ..config()
        };
        let (manager, shared) = started(config, FakeBackend::new(48_000, 1));
        {
            let mut script = shared.script.lock();
            for _ in 0..50 {
                script.push_back((Duration::from_millis(10), Ok((ReadStatus::Overrun, Vec::new()))));
            }
        }

        let began = Instant::now();
        assert!(manager.microphone_read().is_none());
        assert!(began.elapsed() < Duration::from_secs(1));
        // An overrun is not a device failure
        assert_eq!(shared.capture_opens.load(Ordering::SeqCst), 1);
        manager.stop();
    }

    #[test]
    fn test_read_error_reopens_device() {
        let (manager, shared) = started(config(), FakeBackend::new(48_000, 1));
        shared
            .script
            .lock()
            .push_back((Duration::ZERO, Err("device unplugged".into())));

        assert!(manager.microphone_read().is_none());

        // The reset wakes the health check instead of waiting out its interval
        let deadline = Instant::now() + Duration::from_secs(2);
        while shared.capture_opens.load(Ordering::SeqCst) < 2 {
            assert!(Instant::now() < deadline, "microphone was not reopened");
            thread::sleep(Duration::from_millis(5));
        }
        manager.stop();
    }

    #[test]
    fn test_speaker_write_upmixes() {
        let (manager, shared) = started(config(), FakeBackend::new(48_000, 2));
        assert!(manager.speaker_write(&[0.5, -0.5]));

        let written = shared.written.lock();
        assert_eq!(written[0], vec![16384, 16384, -16384, -16384]);
    }

    #[test]
    fn test_unknown_device_is_fatal_at_startup() {
        let config = AudioConfig {
            microphone: DeviceSelector::Name("Missing".into()),
            ..config()
        };
        let manager = DeviceManager::new(config, Arc::new(FakeBackend::new(48_000, 1)), Shutdown::new());

        let err = manager.start().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Audio(AudioError::DeviceNotFound(name)) if name == "Missing"
        ));
    }

    #[test]
    fn test_disabled_direction_stays_closed() {
        let config = AudioConfig {
            speaker: DeviceSelector::Disabled,
            ..config()
        };
        let manager = DeviceManager::new(config, Arc::new(FakeBackend::new(48_000, 1)), Shutdown::new());
        manager.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !manager.microphone_open() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!manager.speaker_open());
        assert!(!manager.speaker_write(&[0.0; 4]));
        manager.stop();
    }

    #[test]
    fn test_out_of_range_frame_is_silenced() {
        let (manager, _) = started(config(), FakeBackend::new(48_000, 1));

        assert_eq!(manager.inner.gate(vec![0.5; PERIOD]), vec![16384; PERIOD]);

        // Loud enough to count as voice, but not valid audio
        let mut corrupt = vec![0.5; PERIOD];
        corrupt[7] = 1.2;
        assert_eq!(manager.inner.gate(corrupt), vec![0; PERIOD]);
        assert!(manager.vad_level() > 0.0);
        manager.stop();
    }

    #[test]
    fn test_microphone_at_44_1khz_is_resampled() {
        let (manager, _) = started(config(), FakeBackend::new(44_100, 1));

        const READS: usize = 20;
        let total: usize = (0..READS)
            .map(|_| manager.microphone_read().map_or(0, |frame| frame.len()))
            .sum();

        // The resampler hands out whole internal chunks, so allow for one
        // or two still being filled
        let expected = READS * PERIOD * 48_000 / 44_100;
        assert!(
            total + 2 * 640 >= expected && total <= expected + 640,
            "got {} samples, expected about {}",
            total,
            expected
        );
        manager.stop();
    }

    #[test]
    fn test_speaker_at_44_1khz_is_resampled() {
        let (manager, shared) = started(config(), FakeBackend::new(44_100, 1));

        const WRITES: usize = 20;
        for _ in 0..WRITES {
            assert!(manager.speaker_write(&[0.25; PERIOD]));
        }

        let written = shared.written.lock();
        let total: usize = written.iter().map(Vec::len).sum();
        let expected = WRITES * PERIOD * 44_100 / 48_000;
        assert!(!written.is_empty());
        assert!(
            total + 2 * 588 >= expected && total <= expected + 588,
            "got {} samples, expected about {}",
            total,
            expected
        );
        manager.stop();
    }

    #[test]
    fn test_read_error_during_shutdown_is_not_a_reset() {
        let shutdown = Shutdown::new();
        let (manager, shared) = started_with(config(), FakeBackend::new(48_000, 1), shutdown.clone());
        shared
            .script
            .lock()
            .push_back((Duration::from_millis(100), Err("device going away".into())));

        let requester = shutdown.clone();
        let waiter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            requester.request();
        });

        assert!(manager.microphone_read().is_none());
        waiter.join().unwrap();

        assert!(!manager.inner.reset_microphone.load(Ordering::SeqCst));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(shared.capture_opens.load(Ordering::SeqCst), 1);
        manager.stop();
    }

    #[test]
    fn test_no_reopen_or_write_after_shutdown() {
        let shutdown = Shutdown::new();
        let (manager, shared) = started_with(config(), FakeBackend::new(48_000, 1), shutdown.clone());
        shutdown.request();

        // The reset still closes the microphone, but nothing reopens it
        manager.reset_microphone();
        let deadline = Instant::now() + Duration::from_secs(2);
        while manager.microphone_open() {
            assert!(Instant::now() < deadline, "microphone was not closed");
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(100));
        assert!(!manager.microphone_open());
        assert_eq!(shared.capture_opens.load(Ordering::SeqCst), 1);

        assert!(!manager.speaker_write(&[0.5; PERIOD]));
        assert!(shared.written.lock().is_empty());
        assert!(!manager.inner.reset_speaker.load(Ordering::SeqCst));
        manager.stop();
    }
}
