//! Outbound flow control
//!
//! Captured frames go through a short queue to a dedicated sender thread so a
//! slow network never blocks the microphone. The sender bounds end-to-end
//! delay by flushing the network's outbound backlog whenever it grows past
//! the configured latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::audio::mixer::is_silent;
use crate::control::Control;
use crate::network::VoiceNetwork;

/// How long the sender waits for a frame before re-checking its state
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// Microphone-to-network frame queue
pub struct Transmitter {
    queue_tx: Sender<Vec<i16>>,
    queue_rx: Receiver<Vec<i16>>,
    network: Arc<dyn VoiceNetwork>,
    control: Arc<Control>,
    latency: Duration,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Transmitter {
    pub fn new(
        network: Arc<dyn VoiceNetwork>,
        control: Arc<Control>,
        queue_len: usize,
        latency: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = bounded(queue_len.max(1));
        Self {
            queue_tx,
            queue_rx,
            network,
            control,
            latency,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
        }
    }

    /// Offer a captured frame for sending
    ///
    /// Silent frames and frames arriving while the queue is full are dropped.
    /// Returns whether the frame was queued.
    pub fn transmit(&self, pcm: Vec<i16>) -> bool {
        if is_silent(&pcm) {
            return false;
        }
        match self.queue_tx.try_send(pcm) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Start the sender thread
    pub fn start(&self) -> std::io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let rx = self.queue_rx.clone();
        let network = self.network.clone();
        let control = self.control.clone();
        let latency = self.latency;
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("transmit".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match rx.recv_timeout(DEQUEUE_TIMEOUT) {
                        Ok(frame) => send_frame(&*network, &control, latency, &frame),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        *self.thread_handle.lock() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Frames waiting for the sender
    pub fn queued(&self) -> usize {
        self.queue_rx.len()
    }
}

/// Hand one frame to the network, flushing a stale backlog first
///
/// Frames are discarded while disconnected or while transmission is muted.
pub fn send_frame(network: &dyn VoiceNetwork, control: &Control, latency: Duration, frame: &[i16]) {
    if !network.is_connected() || !control.transmitting() {
        return;
    }

    let backlog = network.outbound_backlog();
    if backlog > latency {
        network.clear_outbound_backlog();
        tracing::warn!(
            "Clearing audio send buffer due to latency. Backlog: {:.3}s",
            backlog.as_secs_f64()
        );
    }

    if let Err(e) = network.send_frame(frame) {
        tracing::warn!("Failed to send audio: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::network::NetworkEvent;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Clear,
        Send(usize),
    }

    struct RecordingNetwork {
        connected: AtomicBool,
        backlog: Mutex<Duration>,
        ops: Mutex<Vec<Op>>,
    }

    impl RecordingNetwork {
        fn new(backlog: Duration) -> Self {
            Self {
                connected: AtomicBool::new(true),
                backlog: Mutex::new(backlog),
                ops: Mutex::new(Vec::new()),
            }
        }
    }

    impl VoiceNetwork for RecordingNetwork {
        fn connect(&self, _: Sender<NetworkEvent>) -> Result<(), NetworkError> {
            Ok(())
        }

        fn run(&self) -> Result<(), NetworkError> {
            Ok(())
        }

        fn stop(&self) {}

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send_frame(&self, pcm: &[i16]) -> Result<(), NetworkError> {
            self.ops.lock().push(Op::Send(pcm.len()));
            Ok(())
        }

        fn outbound_backlog(&self) -> Duration {
            *self.backlog.lock()
        }

        fn clear_outbound_backlog(&self) {
            *self.backlog.lock() = Duration::ZERO;
            self.ops.lock().push(Op::Clear);
        }
    }

    const LATENCY: Duration = Duration::from_millis(500);

    #[test]
    fn test_backlog_cleared_before_send() {
        let network = RecordingNetwork::new(Duration::from_millis(800));
        let control = Control::new();

        send_frame(&network, &control, LATENCY, &[1; 4]);
        send_frame(&network, &control, LATENCY, &[1; 4]);

        assert_eq!(*network.ops.lock(), vec![Op::Clear, Op::Send(4), Op::Send(4)]);
    }

    #[test]
    fn test_backlog_within_latency_is_kept() {
        let network = RecordingNetwork::new(Duration::from_millis(200));
        send_frame(&network, &Control::new(), LATENCY, &[1; 4]);
        assert_eq!(*network.ops.lock(), vec![Op::Send(4)]);
    }

    #[test]
    fn test_discard_when_muted_or_disconnected() {
        let network = RecordingNetwork::new(Duration::ZERO);
        let control = Control::new();

        control.set_transmitting(false);
        send_frame(&network, &control, LATENCY, &[1; 4]);

        control.set_transmitting(true);
        network.connected.store(false, Ordering::SeqCst);
        send_frame(&network, &control, LATENCY, &[1; 4]);

        assert!(network.ops.lock().is_empty());
    }

    #[test]
    fn test_silence_and_overflow_are_dropped() {
        let network = Arc::new(RecordingNetwork::new(Duration::ZERO));
        let transmitter = Transmitter::new(network, Arc::new(Control::new()), 2, LATENCY);

        assert!(!transmitter.transmit(vec![0; 4]));
        assert!(transmitter.transmit(vec![-1, 0, 0, 0]));
        assert!(transmitter.transmit(vec![5; 4]));
        // Queue full and nobody draining it
        assert!(!transmitter.transmit(vec![5; 4]));
        assert_eq!(transmitter.queued(), 2);
    }

    #[test]
    fn test_sender_thread_delivers() {
        let network = Arc::new(RecordingNetwork::new(Duration::ZERO));
        let transmitter = Transmitter::new(network.clone(), Arc::new(Control::new()), 5, LATENCY);
        transmitter.start().unwrap();

        transmitter.transmit(vec![7; 16]);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while network.ops.lock().is_empty() {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*network.ops.lock(), vec![Op::Send(16)]);
        transmitter.stop();
    }
}
