//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod manager;
pub mod mixer;
pub mod playback;
pub mod resample;
pub mod speaker;
pub mod vad;

pub use backend::{AudioBackend, Direction};
pub use buffer::RingBuffer;
pub use device::{list_raw, list_recommended, CpalBackend, DeviceListing};
pub use manager::DeviceManager;
pub use speaker::JitterSpeaker;
