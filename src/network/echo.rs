//! Loopback network for hardware testing
//!
//! Every frame sent is delivered straight back as audio from a remote
//! participant named `echo`, so the microphone is heard on the speaker
//! without a voice server.

use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::error::NetworkError;
use crate::network::{NetworkEvent, VoiceNetwork};

/// Participant name the echoed audio arrives under
pub const ECHO_PARTICIPANT: &str = "echo";

#[derive(Default)]
struct State {
    events: Option<Sender<NetworkEvent>>,
    connected: bool,
    stop_requested: bool,
}

/// Voice network that plays transmitted audio back locally
#[derive(Default)]
pub struct EchoNetwork {
    state: Mutex<State>,
    condvar: Condvar,
}

impl EchoNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, event: NetworkEvent) -> Result<(), NetworkError> {
        let state = self.state.lock();
        let events = state.events.as_ref().ok_or(NetworkError::NotConnected)?;
        events
            .send(event)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))
    }
}

impl VoiceNetwork for EchoNetwork {
    fn connect(&self, events: Sender<NetworkEvent>) -> Result<(), NetworkError> {
        self.state.lock().events = Some(events);
        Ok(())
    }

    fn run(&self) -> Result<(), NetworkError> {
        {
            let mut state = self.state.lock();
            if state.events.is_none() {
                return Err(NetworkError::ConnectionFailed(
                    "connect() was not called".into(),
                ));
            }
            if state.stop_requested {
                return Ok(());
            }
            state.connected = true;
        }
        self.emit(NetworkEvent::Connected)?;
        tracing::info!("Echo test running, transmitted audio will be played back");

        let mut state = self.state.lock();
        while !state.stop_requested {
            self.condvar.wait(&mut state);
        }
        state.connected = false;
        drop(state);

        self.emit(NetworkEvent::Disconnected)
    }

    fn stop(&self) {
        self.state.lock().stop_requested = true;
        self.condvar.notify_all();
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn send_frame(&self, pcm: &[i16]) -> Result<(), NetworkError> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        self.emit(NetworkEvent::FrameReceived {
            participant: ECHO_PARTICIPANT.to_string(),
            pcm: pcm.to_vec(),
        })
    }

    fn outbound_backlog(&self) -> Duration {
        Duration::ZERO
    }

    fn clear_outbound_backlog(&self) {}
}
