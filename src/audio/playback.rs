//! Audio playback to output devices
//!
//! Writes are queued on a short channel that the cpal output callback drains.
//! The queue depth bounds latency and a full queue blocks the writer, which
//! paces the playback loop at the device's rate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::DeviceTrait;
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

use crate::audio::backend::{Direction, PlaybackStream, StreamParams, StreamRequest};
use crate::audio::device::{find_device, negotiate, spawn_stream_thread};
use crate::error::AudioError;

/// Periods queued ahead of the device
const PLAYBACK_QUEUE_DEPTH: usize = 2;

/// Longest a single write waits for queue space
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Playback handle for one output device
pub struct CpalPlayback {
    device_name: String,
    params: StreamParams,
    running: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    data_tx: Sender<Vec<i16>>,
    error_rx: Receiver<AudioError>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    /// Open and start playing to a device
    pub fn open(device_id: &str, request: StreamRequest) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let active = Arc::new(AtomicBool::new(true));
        let (data_tx, data_rx) = bounded::<Vec<i16>>(PLAYBACK_QUEUE_DEPTH);
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let id = device_id.to_string();
        let active_cb = active.clone();

        let (handle, params, device_name) = spawn_stream_thread(
            format!("playback-{}", device_id),
            running.clone(),
            move || {
                let device = find_device(Direction::Playback, &id)?;
                let name = device.name().unwrap_or_else(|_| id.clone());
                let (config, format, params) = negotiate(&device, Direction::Playback, request)?;

                let stream = match format {
                    SampleFormat::I16 => {
                        build_output_stream::<i16>(&device, &config, data_rx, active_cb, error_tx)
                    }
                    SampleFormat::F32 => {
                        build_output_stream::<f32>(&device, &config, data_rx, active_cb, error_tx)
                    }
                    SampleFormat::U16 => {
                        build_output_stream::<u16>(&device, &config, data_rx, active_cb, error_tx)
                    }
                    other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                }?;

                Ok((stream, params, name))
            },
        )?;

        Ok(Self {
            device_name,
            params,
            running,
            active,
            data_tx,
            error_rx,
            thread_handle: Some(handle),
        })
    }
}

impl PlaybackStream for CpalPlayback {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }

        match self.data_tx.send_timeout(samples.to_vec(), WRITE_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(AudioError::StreamError(format!(
                "{} stopped consuming audio",
                self.device_name
            ))),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(AudioError::StreamError("Playback stream closed".into()))
            }
        }
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            handle
                .join()
                .map_err(|_| AudioError::StreamError("Playback thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    data_rx: Receiver<Vec<i16>>,
    active: Arc<AtomicBool>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let mut leftover: VecDeque<i16> = VecDeque::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !active.load(Ordering::Relaxed) {
                    data.fill(T::EQUILIBRIUM);
                    return;
                }

                for sample in data.iter_mut() {
                    if leftover.is_empty() {
                        if let Ok(chunk) = data_rx.try_recv() {
                            leftover.extend(chunk);
                        }
                    }
                    // Underrun plays silence
                    *sample = match leftover.pop_front() {
                        Some(s) => T::from_sample(s),
                        None => T::EQUILIBRIUM,
                    };
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}
