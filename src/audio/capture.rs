//! Audio capture from input devices
//!
//! cpal delivers audio through a callback on its own thread. [`CpalCapture`]
//! forwards each callback buffer over a channel so the device manager can
//! perform blocking, period-sized reads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::DeviceTrait;
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::audio::backend::{CaptureStream, Direction, ReadStatus, StreamParams, StreamRequest};
use crate::audio::device::{find_device, negotiate, spawn_stream_thread};
use crate::error::AudioError;

/// Callback buffers held before the capture counts as overrun
const CAPTURE_QUEUE_DEPTH: usize = 32;

/// Longest a single read waits for the driver
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Capture handle for one input device
pub struct CpalCapture {
    device_name: String,
    params: StreamParams,

    /// Keeps the stream thread alive
    running: Arc<AtomicBool>,

    /// Cleared by `pause` to stop forwarding callback data
    active: Arc<AtomicBool>,

    /// Set by the callback when the queue was full and data was dropped
    overrun: Arc<AtomicBool>,

    data_rx: Receiver<Vec<i16>>,
    error_rx: Receiver<AudioError>,

    /// Samples received but not yet returned by `read`
    pending: VecDeque<i16>,

    thread_handle: Option<JoinHandle<()>>,
}

impl CpalCapture {
    /// Open and start capturing from a device
    pub fn open(device_id: &str, request: StreamRequest) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let active = Arc::new(AtomicBool::new(true));
        let overrun = Arc::new(AtomicBool::new(false));
        let (data_tx, data_rx) = bounded::<Vec<i16>>(CAPTURE_QUEUE_DEPTH);
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let id = device_id.to_string();
        let active_cb = active.clone();
        let overrun_cb = overrun.clone();

        let (handle, params, device_name) = spawn_stream_thread(
            format!("capture-{}", device_id),
            running.clone(),
            move || {
                let device = find_device(Direction::Capture, &id)?;
                let name = device.name().unwrap_or_else(|_| id.clone());
                let (config, format, params) = negotiate(&device, Direction::Capture, request)?;

                let stream = match format {
                    SampleFormat::I16 => build_input_stream::<i16>(
                        &device, &config, data_tx, active_cb, overrun_cb, error_tx,
                    ),
                    SampleFormat::F32 => build_input_stream::<f32>(
                        &device, &config, data_tx, active_cb, overrun_cb, error_tx,
                    ),
                    SampleFormat::U16 => build_input_stream::<u16>(
                        &device, &config, data_tx, active_cb, overrun_cb, error_tx,
                    ),
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
            overrun,
            data_rx,
            error_rx,
            pending: VecDeque::new(),
            thread_handle: Some(handle),
        })
    }
}

impl CaptureStream for CpalCapture {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn read(&mut self, buf: &mut Vec<i16>) -> Result<ReadStatus, AudioError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }

        if self.overrun.swap(false, Ordering::SeqCst) {
            self.pending.clear();
            buf.clear();
            return Ok(ReadStatus::Overrun);
        }

        let wanted = self.params.period_size * self.params.channels as usize;
        let deadline = Instant::now() + READ_TIMEOUT;

        while self.pending.len() < wanted {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.data_rx.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AudioError::StreamError(format!(
                        "No audio from {} for {:?}",
                        self.device_name, READ_TIMEOUT
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::StreamError("Capture stream closed".into()));
                }
            }
        }

        buf.clear();
        buf.extend(self.pending.drain(..wanted));
        Ok(ReadStatus::Frames(self.params.period_size))
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
                .map_err(|_| AudioError::StreamError("Capture thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    data_tx: Sender<Vec<i16>>,
    active: Arc<AtomicBool>,
    overrun: Arc<AtomicBool>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !active.load(Ordering::Relaxed) {
                    return;
                }

                let chunk: Vec<i16> = data.iter().map(|s| i16::from_sample(*s)).collect();
                if data_tx.try_send(chunk).is_err() {
                    overrun.store(true, Ordering::Relaxed);
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}
