//! Application configuration.
//!
//! Loaded once at startup from a JSON file (`config.json` by default). Every
//! field that has a safe default is defaulted, so a minimal file only needs
//! the link list; an unreadable or syntactically broken file is the one
//! configuration state that aborts startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio_serial::{DataBits, Parity, StopBits};
use tracing::warn;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial links to acquire from.
    pub links: Vec<LinkConfig>,

    /// Global retry policy, overridable per link.
    pub retry: RetryConfig,

    /// Disabled-link resurrection loop.
    pub supervisor: SupervisorConfig,

    /// Metric delivery through the external sender tool.
    pub delivery: DeliveryConfig,

    /// Local TSV archive.
    pub storage: StorageConfig,

    /// Frame header offsets for the deployed firmware revision.
    pub frame: FrameLayout,

    /// Decoded field name to backend metric key mapping.
    pub keys: KeyMap,
}

impl AppConfig {
    /// Load and parse the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

/// One serial link.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub path: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// 5 to 8.
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// `N`, `E` or `O`.
    #[serde(default = "default_parity")]
    pub parity: char,

    /// 1 or 2.
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Per-read timeout in milliseconds. A timeout with no data is a quiet
    /// sensor, not a link failure.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Overrides the global retry policy for this link.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl LinkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn data_bits(&self) -> DataBits {
        match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    pub fn parity(&self) -> Parity {
        match self.parity.to_ascii_uppercase() {
            'E' => Parity::Even,
            'O' => Parity::Odd,
            _ => Parity::None,
        }
    }

    pub fn stop_bits(&self) -> StopBits {
        match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        }
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> char {
    'N'
}

fn default_stop_bits() -> u8 {
    1
}

fn default_read_timeout_ms() -> u64 {
    1000
}

/// Link failure retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failures before `on_exhaustion` applies. 0 means
    /// unbounded.
    pub max_attempts: u32,

    /// Wait between reopen attempts, in milliseconds.
    pub delay_ms: u64,

    pub on_exhaustion: OnExhaustion,
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            delay_ms: 5000,
            on_exhaustion: OnExhaustion::KeepRetrying,
        }
    }
}

/// What a link worker does once its retry budget is exhausted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OnExhaustion {
    /// Log and keep reopening forever.
    #[default]
    KeepRetrying,
    /// Hand the link to the supervisor and stop this worker.
    Disable,
    /// Cancel the whole process.
    StopApp,
}

impl<'de> Deserialize<'de> for OnExhaustion {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_else(|_| {
            warn!(policy = %raw, "unrecognized on_exhaustion policy, using keep_retrying");
            OnExhaustion::KeepRetrying
        }))
    }
}

/// Disabled-link probe loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// When false, disabled links stay disabled for the process lifetime.
    pub enabled: bool,

    pub probe_interval_secs: u64,
}

impl SupervisorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_secs: 30,
        }
    }
}

/// External sender tool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Trapper server address.
    pub server: String,

    /// Trapper port.
    pub port: u16,

    /// Sender executable, resolved through PATH when not absolute.
    pub sender_path: String,

    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,

    /// Retries after the first failed attempt, before spooling.
    pub retry_count: u32,

    /// First backoff delay in milliseconds; doubles per retry.
    pub backoff_initial_ms: u64,

    /// Directory for staged and spooled batch files.
    pub spool_dir: PathBuf,

    /// Log the sender tool's stdout on success.
    pub log_sender_output: bool,
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: 10051,
            sender_path: "zabbix_sender".to_string(),
            timeout_secs: 10,
            retry_count: 5,
            backoff_initial_ms: 1000,
            spool_dir: PathBuf::from("spool"),
            log_sender_output: false,
        }
    }
}

/// TSV archive settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./DTA"),
        }
    }
}

/// Byte offsets of the binary header fields within a frame.
///
/// The header widths shifted across station firmware revisions, so they are
/// deployment configuration rather than constants. Offsets are counted from
/// the start of each sub-frame; the pluviometer sub-frame loses its leading
/// marker to the separator, hence its smaller ASCII offset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrameLayout {
    pub station_type_offset: usize,
    pub station_number_offset: usize,
    pub network_id_offset: usize,

    /// First ASCII payload byte of the inclinometer sub-frame.
    pub incl_ascii_offset: usize,

    /// First ASCII payload byte of the pluviometer sub-frame.
    pub pluvio_ascii_offset: usize,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            station_type_offset: 1,
            station_number_offset: 7,
            network_id_offset: 9,
            incl_ascii_offset: 11,
            pluvio_ascii_offset: 10,
        }
    }
}

/// Backend metric keys and host suffixes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeyMap {
    pub inclinometer_host_suffix: String,
    pub pluviometer_host_suffix: String,

    pub radial: String,
    pub tangential: String,
    pub temperature: String,
    pub incl_voltage: String,

    pub rain_level: String,
    pub pluvio_voltage: String,
}

impl Default for KeyMap {
    fn default() -> Self {
        Self {
            inclinometer_host_suffix: "_IN".to_string(),
            pluviometer_host_suffix: "_PL".to_string(),
            radial: "axis.radial".to_string(),
            tangential: "axis.tangential".to_string(),
            temperature: "incl.temp".to_string(),
            incl_voltage: "incl.vbat".to_string(),
            rain_level: "rain.level".to_string(),
            pluvio_voltage: "pluvio.vbat".to_string(),
        }
    }
}
