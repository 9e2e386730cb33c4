//! Audio device enumeration, resolution and the cpal backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::bounded;

use crate::audio::backend::{
    AudioBackend, CaptureStream, Direction, PlaybackStream, StreamParams, StreamRequest,
    DEFAULT_DEVICE,
};
use crate::audio::capture::CpalCapture;
use crate::audio::playback::CpalPlayback;
use crate::config::DeviceSelector;
use crate::error::AudioError;

/// Device ID prefixes of PCMs that resample and mix in software.
/// Other devices may reject 48kHz mono and distort the audio.
pub const RECOMMENDED_PREFIXES: [&str; 2] = ["sysdefault:CARD=", "default:CARD="];

/// Sample formats the streams know how to convert
const SUPPORTED_FORMATS: [SampleFormat; 3] = [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16];

/// How long to wait for a stream thread to report that the device opened
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Device identifiers grouped by direction
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceListing {
    pub playback: Vec<String>,
    pub capture: Vec<String>,
}

/// Strip a recommended prefix, returning the short card name
pub fn recommended_name(id: &str) -> Option<&str> {
    RECOMMENDED_PREFIXES
        .iter()
        .find_map(|prefix| id.strip_prefix(prefix))
}

/// List recommended devices, short names only, with `default` first
pub fn list_recommended(backend: &dyn AudioBackend) -> Result<DeviceListing, AudioError> {
    let filter = |ids: Vec<String>| {
        let mut names = vec![DEFAULT_DEVICE.to_string()];
        for id in &ids {
            if let Some(name) = recommended_name(id) {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    };

    Ok(DeviceListing {
        playback: filter(backend.devices(Direction::Playback)?),
        capture: filter(backend.devices(Direction::Capture)?),
    })
}

/// List every device the host reports, with `default` first
pub fn list_raw(backend: &dyn AudioBackend) -> Result<DeviceListing, AudioError> {
    let with_default = |ids: Vec<String>| {
        let mut all = vec![DEFAULT_DEVICE.to_string()];
        all.extend(ids.into_iter().filter(|id| id != DEFAULT_DEVICE));
        all
    };

    Ok(DeviceListing {
        playback: with_default(backend.devices(Direction::Playback)?),
        capture: with_default(backend.devices(Direction::Capture)?),
    })
}

/// Map a configured selector to a hardware identifier
///
/// Returns `Ok(None)` when the direction is disabled. A name matches either
/// the full identifier or the card name of a recommended identifier; an index
/// selects from the raw enumeration order.
pub fn resolve_device(
    backend: &dyn AudioBackend,
    direction: Direction,
    selector: &DeviceSelector,
) -> Result<Option<String>, AudioError> {
    match selector {
        DeviceSelector::Disabled => Ok(None),
        DeviceSelector::Default => Ok(Some(DEFAULT_DEVICE.to_string())),
        DeviceSelector::Name(name) if name == DEFAULT_DEVICE => {
            Ok(Some(DEFAULT_DEVICE.to_string()))
        }
        DeviceSelector::Name(name) => {
            let devices = backend.devices(direction)?;
            devices
                .iter()
                .find(|id| *id == name)
                .or_else(|| {
                    devices
                        .iter()
                        .find(|id| recommended_name(id) == Some(name.as_str()))
                })
                .cloned()
                .map(Some)
                .ok_or_else(|| AudioError::DeviceNotFound(name.clone()))
        }
        DeviceSelector::Index(index) => backend
            .devices(direction)?
            .into_iter()
            .nth(*index)
            .map(Some)
            .ok_or_else(|| AudioError::DeviceNotFound(index.to_string())),
    }
}

/// cpal-backed hardware access
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn devices(&self, direction: Direction) -> Result<Vec<String>, AudioError> {
        let host = cpal::default_host();
        let devices = match direction {
            Direction::Capture => host.input_devices(),
            Direction::Playback => host.output_devices(),
        }
        .map_err(|e| AudioError::CpalError(e.to_string()))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }

    fn open_capture(
        &self,
        device: &str,
        request: StreamRequest,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        Ok(Box::new(CpalCapture::open(device, request)?))
    }

    fn open_playback(
        &self,
        device: &str,
        request: StreamRequest,
    ) -> Result<Box<dyn PlaybackStream>, AudioError> {
        Ok(Box::new(CpalPlayback::open(device, request)?))
    }
}

/// Look up a cpal device by identifier
pub(crate) fn find_device(direction: Direction, id: &str) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    if id == DEFAULT_DEVICE {
        let device = match direction {
            Direction::Capture => host.default_input_device(),
            Direction::Playback => host.default_output_device(),
        };
        return device.ok_or_else(|| AudioError::DeviceNotFound(id.to_string()));
    }

    let devices = match direction {
        Direction::Capture => host.input_devices(),
        Direction::Playback => host.output_devices(),
    }
    .map_err(|e| AudioError::CpalError(e.to_string()))?;

    for device in devices {
        if device.name().is_ok_and(|name| name == id) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Pick the closest stream configuration the device supports
///
/// Preference order: the requested channel count at the requested rate, any
/// channel count at the requested rate (fewest channels first), then the
/// device default, in which case the caller resamples.
pub(crate) fn negotiate(
    device: &cpal::Device,
    direction: Direction,
    request: StreamRequest,
) -> Result<(StreamConfig, SampleFormat, StreamParams), AudioError> {
    let configs: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Capture => device.supported_input_configs().map(|c| c.collect()),
        Direction::Playback => device.supported_output_configs().map(|c| c.collect()),
    }
    .map_err(|e| AudioError::CpalError(e.to_string()))?;

    let rate = cpal::SampleRate(request.sample_rate);
    let covers_rate = |c: &&cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= rate
            && c.max_sample_rate() >= rate
            && SUPPORTED_FORMATS.contains(&c.sample_format())
    };

    let exact = configs
        .iter()
        .filter(covers_rate)
        .find(|c| c.channels() == request.channels);
    let any_channels = || {
        configs
            .iter()
            .filter(covers_rate)
            .min_by_key(|c| c.channels())
    };

    let supported = match exact.or_else(any_channels) {
        Some(range) => range.clone().with_sample_rate(rate),
        None => match direction {
            Direction::Capture => device.default_input_config(),
            Direction::Playback => device.default_output_config(),
        }
        .map_err(|e| AudioError::CpalError(e.to_string()))?,
    };

    let format = supported.sample_format();
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(AudioError::UnsupportedFormat(format!("{:?}", format)));
    }

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(request.period_size as u32),
    };
    let params = StreamParams {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
        period_size: request.period_size,
    };

    Ok((config, format, params))
}

/// Run a cpal stream on a dedicated thread until `running` is cleared
///
/// cpal streams are not `Send`, so the stream is built, started and dropped
/// on the same thread. Returns once the stream is playing (or failed to).
pub(crate) fn spawn_stream_thread<F>(
    thread_name: String,
    running: Arc<AtomicBool>,
    build: F,
) -> Result<(JoinHandle<()>, StreamParams, String), AudioError>
where
    F: FnOnce() -> Result<(cpal::Stream, StreamParams, String), AudioError> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<Result<(StreamParams, String), AudioError>>(1);
    let running_for_loop = running.clone();

    let handle = thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let stream = match build() {
                Ok((stream, params, name)) => {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok((params, name)));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while running_for_loop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }

            drop(stream);
        })
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    match ready_rx.recv_timeout(STREAM_OPEN_TIMEOUT) {
        Ok(Ok((params, name))) => Ok((handle, params, name)),
        Ok(Err(e)) => {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            // The thread exits on its own once the driver returns
            running.store(false, Ordering::SeqCst);
            Err(AudioError::StreamError("Timed out opening device".into()))
        }
    }
}
