// Driver for the BasPI SP1060 24-channel low-noise high-resolution DAC.
//
// `Sp1060` is the entry point: open it from a `DacConfig`, then ramp channel
// voltages, query channel state and identity, and program the onboard AWGs.

#[macro_use]
pub mod logging;

pub mod channel;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod io;
pub mod waveform;

#[cfg(test)]
mod testing;

pub use channel::{Channel, RampLimiter, NUM_CHANNELS};
pub use codec::DacCodec;
pub use config::{DacConfig, Endpoint};
pub use device::{ChannelRef, Identity, Sp1060};
pub use error::{DacError, Result};
pub use io::{Link, Transport};
pub use waveform::{WaveBank, Waveform, WaveformSpec};
