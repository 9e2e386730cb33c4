//! Voice network boundary
//!
//! The intercom does not speak any voice-chat protocol itself. A network
//! client implements [`VoiceNetwork`] and reports what happens on the wire as
//! [`NetworkEvent`]s over a channel, which keeps per-participant ordering and
//! keeps the client's threads out of the audio state.

pub mod echo;
pub mod transmit;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::NetworkError;
use crate::shutdown::Shutdown;

pub use echo::EchoNetwork;
pub use transmit::Transmitter;

/// Wait before reconnecting after a connection ended cleanly
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Wait before reconnecting after a connection failed
pub const RECONNECT_DELAY_ERROR: Duration = Duration::from_secs(10);

/// Wait before reconnecting after the server refused our login, so it does
/// not start throttling us
pub const RECONNECT_DELAY_REJECTED: Duration = Duration::from_secs(30);

/// Something the network client observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected,
    Disconnected,
    /// 48kHz mono PCM from a remote participant
    FrameReceived { participant: String, pcm: Vec<i16> },
}

/// A voice-chat client
pub trait VoiceNetwork: Send + Sync {
    /// Register the channel events are delivered on
    fn connect(&self, events: Sender<NetworkEvent>) -> Result<(), NetworkError>;

    /// Run one connection until it ends or [`VoiceNetwork::stop`] is called
    fn run(&self) -> Result<(), NetworkError>;

    /// Ask a running connection to end
    fn stop(&self);

    fn is_connected(&self) -> bool;

    /// Queue 48kHz mono PCM for transmission
    fn send_frame(&self, pcm: &[i16]) -> Result<(), NetworkError>;

    /// Audio queued for sending but not yet on the wire
    fn outbound_backlog(&self) -> Duration;

    /// Drop everything queued for sending
    fn clear_outbound_backlog(&self);
}

/// Keep a network connection running until shutdown
///
/// Each time [`VoiceNetwork::run`] returns, the connection is retried after
/// a delay that is cut short by a shutdown request.
pub fn supervise(network: Arc<dyn VoiceNetwork>, shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("network".into())
        .spawn(move || loop {
            tracing::info!("Connecting to the voice network");
            let result = network.run();
            match &result {
                Ok(()) => {}
                Err(NetworkError::Rejected(reason)) => {
                    tracing::error!("Voice server rejected login: {}", reason)
                }
                Err(e) => tracing::error!("Voice network failed: {}", e),
            }
            let delay = reconnect_delay(&result);

            if shutdown.is_requested() {
                return;
            }
            tracing::info!("I'll retry in {} seconds", delay.as_secs());
            if shutdown.wait_timeout(delay) {
                return;
            }
        })
}

/// How long to wait before the next connection attempt
pub fn reconnect_delay(result: &Result<(), NetworkError>) -> Duration {
    match result {
        Ok(()) => RECONNECT_DELAY,
        Err(NetworkError::Rejected(_)) => RECONNECT_DELAY_REJECTED,
        Err(_) => RECONNECT_DELAY_ERROR,
    }
}
