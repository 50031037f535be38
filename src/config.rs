// src/config.rs
//
// Driver configuration: instrument address, voltage bounds, serial line
// settings and protocol timing. Loadable from TOML; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::MIN_STEP;
use crate::error::{DacError, Result};

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control setting for serial port configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    #[default]
    Software,
    Hardware,
}

/// Serial line settings. The SP1060 expects 8N1 with XON/XOFF.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            flow_control: FlowControl::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DacConfig {
    /// Instrument address, see [`Endpoint::parse`]
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_min_val")]
    pub min_val: f64,
    #[serde(default = "default_max_val")]
    pub max_val: f64,
    #[serde(default)]
    pub serial: SerialSettings,
    /// Read timeout for a single reply line
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Largest voltage change sent in one command (V)
    #[serde(default = "default_step")]
    pub step: f64,
    /// Minimum time between two voltage updates of the same channel
    #[serde(default = "default_inter_delay_ms")]
    pub inter_delay_ms: u64,
    /// Wait before draining the tail of a multi-line reply (HARD?/SOFT?)
    #[serde(default = "default_multiline_grace_ms")]
    pub multiline_grace_ms: u64,
    /// Pause between the commands of a waveform programming sequence
    #[serde(default = "default_awg_step_delay_ms")]
    pub awg_step_delay_ms: u64,
    /// Read back every channel's voltage while connecting
    #[serde(default = "default_sync_on_connect")]
    pub sync_on_connect: bool,
}

fn default_address() -> String {
    "TCPIP0::192.168.0.5::23::SOCKET".to_string()
}
fn default_min_val() -> f64 {
    -10.0
}
fn default_max_val() -> f64 {
    10.0
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_step() -> f64 {
    0.01
}
fn default_inter_delay_ms() -> u64 {
    20
}
fn default_multiline_grace_ms() -> u64 {
    10
}
fn default_awg_step_delay_ms() -> u64 {
    10
}
fn default_sync_on_connect() -> bool {
    true
}

impl Default for DacConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            min_val: default_min_val(),
            max_val: default_max_val(),
            serial: SerialSettings::default(),
            timeout_ms: default_timeout_ms(),
            step: default_step(),
            inter_delay_ms: default_inter_delay_ms(),
            multiline_grace_ms: default_multiline_grace_ms(),
            awg_step_delay_ms: default_awg_step_delay_ms(),
            sync_on_connect: default_sync_on_connect(),
        }
    }
}

impl DacConfig {
    /// Config for the given address with every other field at its default.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// `<config dir>/sp1060/config.toml`, e.g. `~/.config/sp1060/config.toml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sp1060")
            .join("config.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DacError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DacConfig = toml::from_str(content)
            .map_err(|e| DacError::configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise only fail once the instrument is talking.
    pub fn validate(&self) -> Result<()> {
        if !self.min_val.is_finite() || !self.max_val.is_finite() {
            return Err(DacError::configuration("voltage bounds must be finite"));
        }
        let (lo, hi) = self.bounds();
        if lo < -10.0 || hi > 10.0 {
            return Err(DacError::configuration(format!(
                "voltage bounds [{}, {}] exceed the DAC span [-10, 10]",
                lo, hi
            )));
        }
        if !(self.step.is_finite() && self.step >= MIN_STEP) {
            return Err(DacError::configuration(format!(
                "ramp step must be at least one DAC code ({} V), got {}",
                MIN_STEP, self.step
            )));
        }
        if self.timeout_ms == 0 {
            return Err(DacError::configuration("timeout_ms must be non-zero"));
        }
        Endpoint::parse(&self.address)?;
        Ok(())
    }

    /// Bounds ordered as (min, max), regardless of how they were written.
    pub fn bounds(&self) -> (f64, f64) {
        (self.min_val.min(self.max_val), self.min_val.max(self.max_val))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn inter_delay(&self) -> Duration {
        Duration::from_millis(self.inter_delay_ms)
    }

    pub fn multiline_grace(&self) -> Duration {
        Duration::from_millis(self.multiline_grace_ms)
    }

    pub fn awg_step_delay(&self) -> Duration {
        Duration::from_millis(self.awg_step_delay_ms)
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.address)
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Where the instrument lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Serial { port: String },
}

impl Endpoint {
    /// Parse an instrument address.
    ///
    /// Accepted forms:
    ///   `TCPIP0::192.168.0.5::23::SOCKET`  VISA raw socket
    ///   `tcp://192.168.0.5:23`
    ///   `ASRL3::INSTR`                     VISA serial by number
    ///   `ASRL/dev/ttyUSB0::INSTR`          VISA serial by path
    ///   `/dev/ttyUSB0`, `COM3`             plain serial port name
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(DacError::configuration("empty instrument address"));
        }

        if let Some(rest) = address.strip_prefix("tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| DacError::configuration(format!("missing port in {}", address)))?;
            return Ok(Endpoint::Tcp {
                host: host.to_string(),
                port: parse_port(port, address)?,
            });
        }

        let upper = address.to_ascii_uppercase();
        if upper.starts_with("TCPIP") {
            let parts: Vec<&str> = address.split("::").collect();
            return match parts.as_slice() {
                [_, host, port, kind] if kind.eq_ignore_ascii_case("SOCKET") => Ok(Endpoint::Tcp {
                    host: host.to_string(),
                    port: parse_port(port, address)?,
                }),
                _ => Err(DacError::configuration(format!(
                    "unsupported VISA TCP/IP address {} (expected TCPIP::<host>::<port>::SOCKET)",
                    address
                ))),
            };
        }

        if upper.starts_with("ASRL") {
            let resource = address[4..]
                .split("::")
                .next()
                .unwrap_or_default();
            if resource.is_empty() {
                return Err(DacError::configuration(format!(
                    "missing serial resource in {}",
                    address
                )));
            }
            let port = match resource.parse::<u32>() {
                Ok(n) => serial_port_for_number(n)?,
                Err(_) => resource.to_string(),
            };
            return Ok(Endpoint::Serial { port });
        }

        Ok(Endpoint::Serial {
            port: address.to_string(),
        })
    }

    /// Short description used in log lines and errors, e.g. `sp1060(192.168.0.5:23)`.
    pub fn describe(&self) -> String {
        match self {
            Endpoint::Tcp { host, port } => format!("sp1060({}:{})", host, port),
            Endpoint::Serial { port } => format!("sp1060({})", port),
        }
    }
}

fn parse_port(port: &str, address: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| DacError::configuration(format!("invalid port {:?} in {}", port, address)))
}

/// VISA numbers serial ports from 1: ASRL1 is COM1 or /dev/ttyS0.
fn serial_port_for_number(n: u32) -> Result<String> {
    if n == 0 {
        return Err(DacError::configuration("VISA serial ports are numbered from 1"));
    }
    if cfg!(target_os = "windows") {
        Ok(format!("COM{}", n))
    } else {
        Ok(format!("/dev/ttyS{}", n - 1))
    }
}

// ============================================================================
// Tests
// ============================================================================
