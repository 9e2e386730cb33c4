//! End-to-end tests of the intercom with scripted hardware

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use proptest::prelude::*;

use rpi_intercom::audio::backend::{
    AudioBackend, CaptureStream, Direction, PlaybackStream, ReadStatus, StreamParams,
    StreamRequest,
};
use rpi_intercom::audio::mixer::{mix_pair, pcm_to_float};
use rpi_intercom::audio::speaker::IDEAL_BUFFER_CHUNKS;
use rpi_intercom::audio::DeviceManager;
use rpi_intercom::config::{AppConfig, AudioConfig, DeviceSelector};
use rpi_intercom::control::Control;
use rpi_intercom::engine::AudioEngine;
use rpi_intercom::error::AudioError;
use rpi_intercom::network::{EchoNetwork, NetworkEvent, Transmitter};
use rpi_intercom::shutdown::Shutdown;
use rpi_intercom::{Error, Intercom};

const CHUNK: usize = 128;
const TONE: i16 = 8192;

/// Microphone producing a constant tone at roughly real-time pace
struct ToneCapture;

impl CaptureStream for ToneCapture {
    fn params(&self) -> StreamParams {
        StreamParams {
            sample_rate: 48000,
            channels: 1,
            period_size: CHUNK,
        }
    }

    fn device_name(&self) -> String {
        "Tone".into()
    }

    fn read(&mut self, buf: &mut Vec<i16>) -> Result<ReadStatus, AudioError> {
        thread::sleep(Duration::from_millis(3));
        buf.clear();
        buf.resize(CHUNK, TONE);
        Ok(ReadStatus::Frames(CHUNK))
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Speaker that records everything written to it
struct RecordingPlayback {
    played: Arc<Mutex<Vec<i16>>>,
}

impl PlaybackStream for RecordingPlayback {
    fn params(&self) -> StreamParams {
        StreamParams {
            sample_rate: 48000,
            channels: 1,
            period_size: CHUNK,
        }
    }

    fn device_name(&self) -> String {
        "Recorder".into()
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        thread::sleep(Duration::from_millis(1));
        self.played.lock().extend_from_slice(samples);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeBackend {
    played: Arc<Mutex<Vec<i16>>>,
}

impl AudioBackend for FakeBackend {
    fn devices(&self, _: Direction) -> Result<Vec<String>, AudioError> {
        Ok(vec!["default".into(), "sysdefault:CARD=Fake".into()])
    }

    fn open_capture(
        &self,
        _: &str,
        _: StreamRequest,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        Ok(Box::new(ToneCapture))
    }

    fn open_playback(
        &self,
        _: &str,
        _: StreamRequest,
    ) -> Result<Box<dyn PlaybackStream>, AudioError> {
        Ok(Box::new(RecordingPlayback {
            played: self.played.clone(),
        }))
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.chunk_size = CHUNK;
    config.ui.enabled = false;
    config.shutdown_grace_secs = 10.0;
    config
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_microphone_is_heard_through_echo() {
    let backend = Arc::new(FakeBackend::default());
    let played = backend.played.clone();
    let intercom = Intercom::new(
        config(),
        backend,
        Arc::new(EchoNetwork::new()),
        Shutdown::new(),
    );

    intercom.start().unwrap();

    let control = intercom.controller();
    assert!(wait_for(Duration::from_secs(5), || control.connected()));
    assert!(wait_for(Duration::from_secs(5), || {
        played.lock().contains(&TONE)
    }));
    assert!(intercom.devices().microphone_open());
    assert!(intercom.devices().speaker_open());
    assert!(intercom.devices().vad_level() > 0.5);

    intercom.stop();
    assert!(!control.connected());

    // Nothing but silence or the tone ever reaches the speaker
    assert!(played.lock().iter().all(|&s| s == 0 || s == TONE));
}

#[test]
fn test_muted_microphone_sends_nothing() {
    let backend = Arc::new(FakeBackend::default());
    let played = backend.played.clone();
    let intercom = Intercom::new(
        config(),
        backend,
        Arc::new(EchoNetwork::new()),
        Shutdown::new(),
    );
    intercom.controller().set_transmitting(false);

    intercom.start().unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        played.lock().len() >= CHUNK * 20
    }));
    intercom.stop();

    assert!(played.lock().iter().all(|&s| s == 0));
    assert!(intercom.engine().speakers().is_empty());
}

#[test]
fn test_unknown_microphone_stops_startup() {
    let mut config = config();
    config.audio.microphone = DeviceSelector::Name("Nonexistent".into());
    let intercom = Intercom::new(
        config,
        Arc::new(FakeBackend::default()),
        Arc::new(EchoNetwork::new()),
        Shutdown::new(),
    );

    let result = intercom.start();
    assert!(matches!(
        result,
        Err(Error::Audio(AudioError::DeviceNotFound(ref name))) if name == "Nonexistent"
    ));
    intercom.stop();
}

#[test]
fn test_card_name_selects_device() {
    let mut config = config();
    config.audio.speaker = DeviceSelector::Name("Fake".into());
    config.audio.microphone = DeviceSelector::Disabled;
    let intercom = Intercom::new(
        config,
        Arc::new(FakeBackend::default()),
        Arc::new(EchoNetwork::new()),
        Shutdown::new(),
    );

    intercom.start().unwrap();
    let devices = intercom.devices();
    assert!(wait_for(Duration::from_secs(5), || devices.speaker_open()));
    assert!(!devices.microphone_open());
    intercom.stop();
}

#[test]
fn test_restart_timer_ends_run() {
    let mut config = config();
    config.restart_seconds = 1;
    config.audio.speaker = DeviceSelector::Disabled;
    config.audio.microphone = DeviceSelector::Disabled;
    let shutdown = Shutdown::new();
    let intercom = Intercom::new(
        config,
        Arc::new(FakeBackend::default()),
        Arc::new(EchoNetwork::new()),
        shutdown.clone(),
    );

    let started = Instant::now();
    intercom.run().unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(shutdown.is_requested());
    assert!(shutdown.is_complete());
}

fn idle_engine() -> AudioEngine {
    let shutdown = Shutdown::new();
    let config = AudioConfig {
        chunk_size: CHUNK,
        speaker: DeviceSelector::Disabled,
        microphone: DeviceSelector::Disabled,
        ..Default::default()
    };
    let devices = Arc::new(DeviceManager::new(
        config,
        Arc::new(FakeBackend::default()),
        shutdown.clone(),
    ));
    let control = Arc::new(Control::new());
    let transmitter = Arc::new(Transmitter::new(
        Arc::new(EchoNetwork::new()),
        control.clone(),
        5,
        Duration::from_millis(500),
    ));
    let (_tx, rx) = crossbeam_channel::unbounded();
    AudioEngine::new(
        devices,
        transmitter,
        control,
        rx,
        shutdown,
        Duration::from_secs(300),
    )
}

fn mixed_output(a: i16, b: i16) -> Vec<f32> {
    let engine = idle_engine();
    for _ in 0..IDEAL_BUFFER_CHUNKS {
        for (participant, value) in [("alice", a), ("bob", b)] {
            engine.handle_event(NetworkEvent::FrameReceived {
                participant: participant.into(),
                pcm: vec![value; CHUNK],
            });
        }
    }
    engine.next_output()
}

#[test]
fn test_two_participants_fold_not_sum() {
    // 0.25 + 0.5 - 0.25 * 0.5
    assert_eq!(mixed_output(8192, 16384), vec![0.625; CHUNK]);
    // Both negative: mirrored, -0.5 - 0.5 + 0.25
    assert_eq!(mixed_output(-16384, -16384), vec![-0.75; CHUNK]);
    // Opposite signs add
    assert_eq!(mixed_output(16384, -8192), vec![0.25; CHUNK]);
    assert_eq!(mixed_output(0, 0), vec![0.0; CHUNK]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_two_participants_mix_sample_by_sample(
        a in prop::collection::vec(any::<i16>(), CHUNK),
        b in prop::collection::vec(any::<i16>(), CHUNK),
    ) {
        let engine = idle_engine();
        for _ in 0..IDEAL_BUFFER_CHUNKS {
            engine.handle_event(NetworkEvent::FrameReceived {
                participant: "alice".into(),
                pcm: a.clone(),
            });
            engine.handle_event(NetworkEvent::FrameReceived {
                participant: "bob".into(),
                pcm: b.clone(),
            });
        }

        let output = engine.next_output();
        let (fa, fb) = (pcm_to_float(&a), pcm_to_float(&b));
        prop_assert_eq!(output.len(), CHUNK);
        for i in 0..CHUNK {
            prop_assert_eq!(output[i], mix_pair(fa[i], fb[i]));
            prop_assert!((-1.0..=1.0).contains(&output[i]));
        }
    }
}
