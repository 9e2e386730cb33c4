//! Intercom configuration
//!
//! Loaded from a TOML file. Every field has a default, so the intercom runs
//! without a configuration file at all.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest device chunk size, in frames
pub const MIN_CHUNK_SIZE: usize = 128;

/// Default device chunk size, in frames
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Selects a sound device for one direction
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawSelector", into = "RawSelector")]
pub enum DeviceSelector {
    /// The system default device
    #[default]
    Default,
    /// A device identifier or recommended card name
    Name(String),
    /// Position in the device enumeration
    Index(usize),
    /// Do not open a device in this direction
    Disabled,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Index(usize),
    Name(String),
}

impl From<RawSelector> for DeviceSelector {
    fn from(raw: RawSelector) -> Self {
        match raw {
            RawSelector::Index(index) => DeviceSelector::Index(index),
            RawSelector::Name(name) => DeviceSelector::from_name(name),
        }
    }
}

impl From<DeviceSelector> for RawSelector {
    fn from(selector: DeviceSelector) -> Self {
        match selector {
            DeviceSelector::Index(index) => RawSelector::Index(index),
            other => RawSelector::Name(other.to_string()),
        }
    }
}

impl DeviceSelector {
    fn from_name(name: String) -> Self {
        match name.as_str() {
            "default" => DeviceSelector::Default,
            "none" | "" => DeviceSelector::Disabled,
            _ => DeviceSelector::Name(name),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, DeviceSelector::Disabled)
    }
}

impl FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<usize>() {
            Ok(index) => DeviceSelector::Index(index),
            Err(_) => DeviceSelector::from_name(s.to_string()),
        })
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Default => write!(f, "default"),
            DeviceSelector::Name(name) => write!(f, "{}", name),
            DeviceSelector::Index(index) => write!(f, "{}", index),
            DeviceSelector::Disabled => write!(f, "none"),
        }
    }
}

/// Complete intercom configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub ui: UiConfig,
    /// Exit after this many seconds so the service manager restarts us (0 = never)
    pub restart_seconds: u64,
    /// Time allowed for a clean shutdown before the process is killed
    pub shutdown_grace_secs: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            network: NetworkConfig::default(),
            ui: UiConfig::default(),
            restart_seconds: 0,
            shutdown_grace_secs: 3.0,
        }
    }
}

/// Sound device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Frames per device read/write; rounded down to a power of two
    pub chunk_size: usize,
    pub speaker: DeviceSelector,
    pub microphone: DeviceSelector,
    /// Give up on a microphone read that keeps overrunning for this long
    pub overrun_timeout_secs: f64,
    /// Reads faster than this fraction of real time are discarded (0 disables)
    pub stale_read_ratio: f64,
    /// Energy above which the microphone counts as hearing voice
    pub vad_minimum: f32,
    /// How long the microphone stays open after the last voice
    pub vad_hang_secs: f64,
    /// Interval between device health checks
    pub health_check_secs: f64,
    /// Forget remote speakers that have been silent this long
    pub speaker_ttl_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            speaker: DeviceSelector::Default,
            microphone: DeviceSelector::Default,
            overrun_timeout_secs: 10.0,
            stale_read_ratio: 0.5,
            vad_minimum: 0.5,
            vad_hang_secs: 0.5,
            health_check_secs: 5.0,
            speaker_ttl_secs: 300,
        }
    }
}

impl AudioConfig {
    /// Largest power of two not above the configured chunk size, at least 128
    pub fn resolved_chunk_size(&self) -> usize {
        let size = self.chunk_size.max(MIN_CHUNK_SIZE);
        1 << (usize::BITS - 1 - size.leading_zeros())
    }

    pub fn overrun_timeout(&self) -> Duration {
        seconds(self.overrun_timeout_secs)
    }

    pub fn vad_hang(&self) -> Duration {
        seconds(self.vad_hang_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        seconds(self.health_check_secs)
    }

    pub fn speaker_ttl(&self) -> Duration {
        Duration::from_secs(self.speaker_ttl_secs)
    }
}

/// Voice network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Outbound audio older than this is dropped to bound latency
    pub send_buffer_latency: f64,
    /// Frames waiting for the network sender
    pub transmit_queue_len: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            send_buffer_latency: 0.5,
            transmit_queue_len: 5,
        }
    }
}

impl NetworkConfig {
    pub fn send_buffer_latency(&self) -> Duration {
        seconds(self.send_buffer_latency)
    }
}

/// Status server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8000".into(),
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

impl AppConfig {
    /// Load a configuration file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "rpi-intercom")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject values the audio loops cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = |field: &'static str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} is not a non-negative number", value),
                })
            }
        };

        non_negative("audio.overrun_timeout_secs", self.audio.overrun_timeout_secs)?;
        non_negative("audio.vad_hang_secs", self.audio.vad_hang_secs)?;
        non_negative("audio.health_check_secs", self.audio.health_check_secs)?;
        non_negative("network.send_buffer_latency", self.network.send_buffer_latency)?;
        non_negative("shutdown_grace_secs", self.shutdown_grace_secs)?;

        if !(0.0..=1.0).contains(&self.audio.stale_read_ratio) {
            return Err(ConfigError::Invalid {
                field: "audio.stale_read_ratio",
                reason: format!("{} is outside 0..=1", self.audio.stale_read_ratio),
            });
        }

        if self.network.transmit_queue_len == 0 {
            return Err(ConfigError::Invalid {
                field: "network.transmit_queue_len",
                reason: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.audio.chunk_size, 512);
        assert_eq!(cfg.audio.speaker, DeviceSelector::Default);
        assert_eq!(cfg.network.send_buffer_latency(), Duration::from_millis(500));
        assert_eq!(cfg.network.transmit_queue_len, 5);
        assert_eq!(cfg.restart_seconds, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_chunk_size_resolution() {
        let resolve = |chunk_size| AudioConfig { chunk_size, ..Default::default() }.resolved_chunk_size();
        assert_eq!(resolve(512), 512);
        assert_eq!(resolve(1000), 512);
        assert_eq!(resolve(1024), 1024);
        assert_eq!(resolve(100), 128);
        assert_eq!(resolve(0), 128);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            restart_seconds = 3600

            [audio]
            chunk_size = 256
            speaker = "Headphones"
            microphone = 2

            [network]
            send_buffer_latency = 0.25
        "#;
        let cfg: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.restart_seconds, 3600);
        assert_eq!(cfg.audio.chunk_size, 256);
        assert_eq!(cfg.audio.speaker, DeviceSelector::Name("Headphones".into()));
        assert_eq!(cfg.audio.microphone, DeviceSelector::Index(2));
        assert_eq!(cfg.network.send_buffer_latency, 0.25);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.network.transmit_queue_len, 5);
        assert!(cfg.ui.enabled);
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("default".parse::<DeviceSelector>().unwrap(), DeviceSelector::Default);
        assert_eq!("none".parse::<DeviceSelector>().unwrap(), DeviceSelector::Disabled);
        assert_eq!("3".parse::<DeviceSelector>().unwrap(), DeviceSelector::Index(3));
        assert_eq!(
            "sysdefault:CARD=Device".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Name("sysdefault:CARD=Device".into())
        );
    }

    #[test]
    fn test_validation() {
        let mut cfg = AppConfig::default();
        cfg.audio.stale_read_ratio = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "audio.stale_read_ratio", .. })
        ));

        let mut cfg = AppConfig::default();
        cfg.network.send_buffer_latency = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = AppConfig::load(Path::new("/nonexistent/rpi-intercom.toml")).unwrap();
        assert_eq!(cfg.audio.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
