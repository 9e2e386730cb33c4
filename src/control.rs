//! User-facing intercom state
//!
//! Four boolean indicators shared by the audio loops, the network and the
//! status server. Setters only act on a real transition: a redundant set does
//! not log and does not notify listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// One of the intercom's status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    /// Microphone audio is sent to the network
    Transmitting,
    /// Network audio is ignored
    Deafened,
    /// Remote audio is being played
    Receiving,
    /// The network is connected
    Connected,
}

impl Indicator {
    fn transition_message(self, on: bool) -> &'static str {
        match (self, on) {
            (Indicator::Transmitting, true) => "Started transmitting",
            (Indicator::Transmitting, false) => "Stopped transmitting",
            (Indicator::Deafened, true) => "Started deafening",
            (Indicator::Deafened, false) => "Stopped deafening",
            (Indicator::Receiving, true) => "Started receiving",
            (Indicator::Receiving, false) => "Stopped receiving",
            (Indicator::Connected, true) => "Connected",
            (Indicator::Connected, false) => "Disconnected",
        }
    }
}

/// Receives indicator transitions (status LEDs, UI push, ...)
pub trait IndicatorListener: Send + Sync {
    fn indicator_changed(&self, indicator: Indicator, on: bool);
}

/// Snapshot of all indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ControlStatus {
    pub transmitting: bool,
    pub deafened: bool,
    pub receiving: bool,
    pub connected: bool,
}

/// Shared intercom state
pub struct Control {
    transmitting: AtomicBool,
    deafened: AtomicBool,
    receiving: AtomicBool,
    connected: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn IndicatorListener>>>,
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

impl Control {
    /// Transmitting starts on; everything else starts off
    pub fn new() -> Self {
        Self {
            transmitting: AtomicBool::new(true),
            deafened: AtomicBool::new(false),
            receiving: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn IndicatorListener>) {
        self.listeners.write().push(listener);
    }

    fn flag(&self, indicator: Indicator) -> &AtomicBool {
        match indicator {
            Indicator::Transmitting => &self.transmitting,
            Indicator::Deafened => &self.deafened,
            Indicator::Receiving => &self.receiving,
            Indicator::Connected => &self.connected,
        }
    }

    pub fn get(&self, indicator: Indicator) -> bool {
        self.flag(indicator).load(Ordering::SeqCst)
    }

    /// Set an indicator, returning whether it changed
    pub fn set(&self, indicator: Indicator, on: bool) -> bool {
        if self.flag(indicator).swap(on, Ordering::SeqCst) == on {
            return false;
        }

        tracing::info!("{}", indicator.transition_message(on));
        for listener in self.listeners.read().iter() {
            listener.indicator_changed(indicator, on);
        }
        true
    }

    pub fn transmitting(&self) -> bool {
        self.get(Indicator::Transmitting)
    }

    pub fn set_transmitting(&self, on: bool) -> bool {
        self.set(Indicator::Transmitting, on)
    }

    pub fn deafened(&self) -> bool {
        self.get(Indicator::Deafened)
    }

    pub fn set_deafened(&self, on: bool) -> bool {
        self.set(Indicator::Deafened, on)
    }

    pub fn receiving(&self) -> bool {
        self.get(Indicator::Receiving)
    }

    pub fn set_receiving(&self, on: bool) -> bool {
        self.set(Indicator::Receiving, on)
    }

    pub fn connected(&self) -> bool {
        self.get(Indicator::Connected)
    }

    pub fn set_connected(&self, on: bool) -> bool {
        self.set(Indicator::Connected, on)
    }

    pub fn status(&self) -> ControlStatus {
        ControlStatus {
            transmitting: self.transmitting(),
            deafened: self.deafened(),
            receiving: self.receiving(),
            connected: self.connected(),
        }
    }
}
