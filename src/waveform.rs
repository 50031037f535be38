// src/waveform.rs
//
// Standard waveform generator (SWG) programming for the onboard AWG.
//
// The instrument synthesises the waveform itself; the host only selects shape,
// frequency and amplitude, copies the result into one of four wave memories
// (WAV-A..D), binds the matching AWG to a DAC channel and starts it.
// AWG-A/B can only drive channels 1..12, AWG-C/D only 13..24.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::channel::validate_channel;
use crate::error::{DacError, Result};

pub const MIN_AMPLITUDE: f64 = -50.0;
pub const MAX_AMPLITUDE: f64 = 50.0;

/// AWG frequency range in Hz; `C SWG DF` takes at most 3 decimals.
pub const MIN_FREQUENCY: f64 = 0.001;
pub const MAX_FREQUENCY: f64 = 10_000.0;

// ============================================================================
// Waveform shape
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    /// For a cosine select a phase of 90 degrees on the instrument
    Sine,
    Triangle,
    Sawtooth,
    Ramp,
    /// Uses the instrument's duty-cycle setting
    Pulse,
    /// Same noise seed every time
    GaussianNoiseFixed,
    /// Fresh noise seed every time
    GaussianNoiseRandom,
    /// Fixed DC level only
    DcVoltage,
}

impl Waveform {
    pub const ALL: [Waveform; 8] = [
        Waveform::Sine,
        Waveform::Triangle,
        Waveform::Sawtooth,
        Waveform::Ramp,
        Waveform::Pulse,
        Waveform::GaussianNoiseFixed,
        Waveform::GaussianNoiseRandom,
        Waveform::DcVoltage,
    ];

    /// Number used by `C SWG WF <n>`
    pub fn code(self) -> u8 {
        match self {
            Waveform::Sine => 0,
            Waveform::Triangle => 1,
            Waveform::Sawtooth => 2,
            Waveform::Ramp => 3,
            Waveform::Pulse => 4,
            Waveform::GaussianNoiseFixed => 5,
            Waveform::GaussianNoiseRandom => 6,
            Waveform::DcVoltage => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Triangle => "triangle",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Ramp => "ramp",
            Waveform::Pulse => "pulse",
            Waveform::GaussianNoiseFixed => "noise_fixed",
            Waveform::GaussianNoiseRandom => "noise_random",
            Waveform::DcVoltage => "dc",
        }
    }
}

impl TryFrom<u8> for Waveform {
    type Error = DacError;

    fn try_from(code: u8) -> Result<Self> {
        Waveform::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| DacError::validation(format!("unknown waveform {}, must be 0..=7", code)))
    }
}

impl FromStr for Waveform {
    type Err = DacError;

    /// Accepts the wire number (`"0"`) or the name (`"sine"`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Waveform::try_from(code);
        }
        let lower = s.to_ascii_lowercase();
        Waveform::ALL
            .iter()
            .copied()
            .find(|w| w.name() == lower)
            .ok_or_else(|| DacError::validation(format!("unknown waveform {:?}", s)))
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Wave-memory bank
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaveBank {
    A,
    B,
    C,
    D,
}

impl WaveBank {
    /// Selector used by `C SWG WMEM <n>`
    pub fn selector(self) -> u8 {
        match self {
            WaveBank::A => 0,
            WaveBank::B => 1,
            WaveBank::C => 2,
            WaveBank::D => 3,
        }
    }

    pub fn letter(self) -> char {
        match self {
            WaveBank::A => 'A',
            WaveBank::B => 'B',
            WaveBank::C => 'C',
            WaveBank::D => 'D',
        }
    }

    /// DAC channels this bank's AWG can drive.
    pub fn channels(self) -> RangeInclusive<u8> {
        match self {
            WaveBank::A | WaveBank::B => 1..=12,
            WaveBank::C | WaveBank::D => 13..=24,
        }
    }

    /// `WAV-A` etc.
    pub fn wave_memory(self) -> String {
        format!("WAV-{}", self.letter())
    }

    /// `AWG-A` etc.
    pub fn awg(self) -> String {
        format!("AWG-{}", self.letter())
    }
}

impl TryFrom<u8> for WaveBank {
    type Error = DacError;

    fn try_from(selector: u8) -> Result<Self> {
        match selector {
            0 => Ok(WaveBank::A),
            1 => Ok(WaveBank::B),
            2 => Ok(WaveBank::C),
            3 => Ok(WaveBank::D),
            n => Err(DacError::InvalidBank(n)),
        }
    }
}

impl FromStr for WaveBank {
    type Err = DacError;

    /// Accepts the selector (`"0"`..`"3"`) or the letter (`"A"`..`"D"`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return WaveBank::try_from(n);
        }
        match s.to_ascii_uppercase().as_str() {
            "A" | "WAV-A" | "AWG-A" => Ok(WaveBank::A),
            "B" | "WAV-B" | "AWG-B" => Ok(WaveBank::B),
            "C" | "WAV-C" | "AWG-C" => Ok(WaveBank::C),
            "D" | "WAV-D" | "AWG-D" => Ok(WaveBank::D),
            _ => Err(DacError::validation(format!("unknown wave-memory bank {:?}", s))),
        }
    }
}

// ============================================================================
// Programming sequence
// ============================================================================

/// One waveform programming request. Only lives for the duration of the call
/// that sends it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveformSpec {
    pub channel: u8,
    pub waveform: Waveform,
    /// AWG frequency as understood by `C SWG DF`
    pub frequency: f64,
    /// Peak amplitude in volts
    pub amplitude: f64,
    pub bank: WaveBank,
}

impl WaveformSpec {
    pub fn new(
        channel: u8,
        waveform: Waveform,
        frequency: f64,
        amplitude: f64,
        bank: WaveBank,
    ) -> Result<Self> {
        let spec = Self {
            channel,
            waveform,
            frequency,
            amplitude,
            bank,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Same as `new`, with the bank given as its numeric selector.
    pub fn with_bank_selector(
        channel: u8,
        waveform: Waveform,
        frequency: f64,
        amplitude: f64,
        bank: u8,
    ) -> Result<Self> {
        Self::new(channel, waveform, frequency, amplitude, WaveBank::try_from(bank)?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_channel(self.channel)?;
        if !self.bank.channels().contains(&self.channel) {
            let range = self.bank.channels();
            return Err(DacError::validation(format!(
                "{} can only drive channels {}..={}, not {}",
                self.bank.awg(),
                range.start(),
                range.end(),
                self.channel
            )));
        }
        if !(self.frequency.is_finite()
            && (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&self.frequency))
        {
            return Err(DacError::validation(format!(
                "frequency {} Hz outside [{}, {}] Hz",
                self.frequency, MIN_FREQUENCY, MAX_FREQUENCY
            )));
        }
        let millihertz = (self.frequency * 1000.0).round();
        if (millihertz / 1000.0 - self.frequency).abs() > 1e-9 {
            return Err(DacError::validation(format!(
                "frequency {} Hz has a finer resolution than 0.001 Hz",
                self.frequency
            )));
        }
        if !self.amplitude.is_finite()
            || self.amplitude < MIN_AMPLITUDE
            || self.amplitude > MAX_AMPLITUDE
        {
            return Err(DacError::validation(format!(
                "amplitude {} V outside [{}, {}] V",
                self.amplitude, MIN_AMPLITUDE, MAX_AMPLITUDE
            )));
        }
        Ok(())
    }

    /// The full command sequence, in the order the instrument requires.
    pub fn commands(&self) -> Vec<String> {
        let wav = self.bank.wave_memory();
        let awg = self.bank.awg();
        vec![
            // clear the target wave memory
            format!("C {} CLR", wav),
            // generate a new waveform
            "C SWG MODE 0".to_string(),
            format!("C SWG WF {}", self.waveform.code()),
            format!("C SWG DF {:.3}", self.frequency),
            format!("C SWG AMP {:.6}", self.amplitude),
            format!("C SWG WMEM {}", self.bank.selector()),
            // copy to wave memory: overwrite
            "C SWG WFUN 0".to_string(),
            format!("C SWG LIN {}", self.channel),
            format!("C {} CH {}", awg, self.channel),
            "C SWG APPLY".to_string(),
            // wave memory -> volatile memory, then -> AWG memory
            format!("C {} SAVE", wav),
            format!("C {} WRITE", wav),
            format!("C {} START", awg),
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================
