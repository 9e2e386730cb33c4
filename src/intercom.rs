//! Top-level intercom
//!
//! Builds the device manager, the audio engine and the network sender from
//! one configuration and runs them until shutdown. [`Intercom::run`] blocks
//! like a service would; [`Intercom::start`] and [`Intercom::stop`] run the
//! intercom in the background instead.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::audio::backend::AudioBackend;
use crate::audio::manager::DeviceManager;
use crate::config::AppConfig;
use crate::control::Control;
use crate::engine::AudioEngine;
use crate::network::{self, NetworkEvent, Transmitter, VoiceNetwork};
use crate::shutdown::Shutdown;
use crate::ui::AppState;

pub struct Intercom {
    config: AppConfig,
    shutdown: Shutdown,
    control: Arc<Control>,
    devices: Arc<DeviceManager>,
    network: Arc<dyn VoiceNetwork>,
    transmitter: Arc<Transmitter>,
    engine: Arc<AudioEngine>,
    events_tx: Sender<NetworkEvent>,
    network_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Intercom {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn AudioBackend>,
        network: Arc<dyn VoiceNetwork>,
        shutdown: Shutdown,
    ) -> Self {
        let control = Arc::new(Control::new());
        let devices = Arc::new(DeviceManager::new(
            config.audio.clone(),
            backend,
            shutdown.clone(),
        ));
        let transmitter = Arc::new(Transmitter::new(
            network.clone(),
            control.clone(),
            config.network.transmit_queue_len,
            config.network.send_buffer_latency(),
        ));

        let (events_tx, events_rx) = unbounded();
        let engine = Arc::new(AudioEngine::new(
            devices.clone(),
            transmitter.clone(),
            control.clone(),
            events_rx,
            shutdown.clone(),
            config.audio.speaker_ttl(),
        ));

        Self {
            config,
            shutdown,
            control,
            devices,
            network,
            transmitter,
            engine,
            events_tx,
            network_thread: Mutex::new(None),
        }
    }

    /// Indicators for buttons, LEDs and the status server
    pub fn controller(&self) -> Arc<Control> {
        self.control.clone()
    }

    pub fn devices(&self) -> Arc<DeviceManager> {
        self.devices.clone()
    }

    pub fn engine(&self) -> Arc<AudioEngine> {
        self.engine.clone()
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// State for the status server
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            control: self.control.clone(),
            devices: self.devices.clone(),
            engine: self.engine.clone(),
            shutdown: self.shutdown.clone(),
            started: Instant::now(),
        })
    }

    /// Start everything in the background
    ///
    /// Fails if a configured sound device does not exist.
    pub fn start(&self) -> crate::Result<()> {
        self.devices.start()?;
        self.network.connect(self.events_tx.clone())?;
        *self.network_thread.lock() = Some(network::supervise(
            self.network.clone(),
            self.shutdown.clone(),
        )?);
        self.transmitter.start()?;
        self.engine.start()?;
        Ok(())
    }

    /// Stop everything; the intercom cannot be started again
    pub fn stop(&self) {
        self.shutdown.request();
        self.network.stop();
        self.transmitter.stop();
        self.engine.stop();
        self.devices.stop();

        if let Some(handle) = self.network_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Run until shutdown is requested or the restart timer fires
    pub fn run(&self) -> crate::Result<()> {
        tracing::info!("Starting up");
        let grace = Duration::try_from_secs_f64(self.config.shutdown_grace_secs).unwrap_or_default();
        self.shutdown.spawn_watchdog(grace)?;

        if let Err(e) = self.start() {
            self.stop();
            self.shutdown.complete();
            return Err(e);
        }

        if self.config.restart_seconds > 0 {
            tracing::info!("I will shut down in {} seconds", self.config.restart_seconds);
            if !self
                .shutdown
                .wait_timeout(Duration::from_secs(self.config.restart_seconds))
            {
                tracing::info!("Shutting down due to the configured timeout");
            }
        } else {
            self.shutdown.wait();
        }

        tracing::info!("Shutting down");
        self.stop();
        self.shutdown.complete();
        Ok(())
    }
}
