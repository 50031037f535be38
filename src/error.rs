// src/error.rs
//
// Typed errors for the SP1060 driver.
//
// Transport failures carry the device description (e.g. "sp1060(192.168.0.5:23)")
// so a log line is enough to tell which instrument misbehaved.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DacError>;

#[derive(Debug, Error)]
pub enum DacError {
    /// Requested voltage lies outside the channel's configured bounds.
    #[error("channel {channel}: {value} V is outside the allowed range [{min}, {max}] V")]
    Range {
        channel: u8,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid channel {0}, must be 1..=24")]
    InvalidChannel(u8),

    #[error("invalid wave-memory bank selector {0}, must be 0..=3")]
    InvalidBank(u8),

    #[error("{0}")]
    Validation(String),

    /// Value cannot be represented as a DAC code (NaN, infinite or beyond the 24-bit span).
    #[error("cannot convert {0} V to a DAC code")]
    Conversion(f64),

    #[error("{device}: protocol error: {message}")]
    Protocol { device: String, message: String },

    #[error("{device}: timed out waiting for reply to {operation}")]
    Timeout { device: String, operation: String },

    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialport(#[from] serialport::Error),
}

impl DacError {
    pub fn protocol(device: impl Into<String>, message: impl Into<String>) -> Self {
        DacError::Protocol {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn timeout(device: impl Into<String>, operation: impl Into<String>) -> Self {
        DacError::Timeout {
            device: device.into(),
            operation: operation.into(),
        }
    }

    pub fn connection(device: impl Into<String>, message: impl Into<String>) -> Self {
        DacError::Connection {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        DacError::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DacError::Validation(message.into())
    }

    /// True for errors raised at the call boundary, before any command was written.
    pub fn is_rejected_input(&self) -> bool {
        matches!(
            self,
            DacError::Range { .. }
                | DacError::InvalidChannel(_)
                | DacError::InvalidBank(_)
                | DacError::Validation(_)
                | DacError::Conversion(_)
        )
    }
}

impl From<DacError> for String {
    fn from(e: DacError) -> Self {
        e.to_string()
    }
}
