// src/channel.rs
//
// One DAC output line: bounds checking, slew-rate limited voltage updates and
// read-back, all routed through the shared transport.

use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use crate::codec::{DacCodec, CODES_PER_VOLT};
use crate::error::{DacError, Result};
use crate::io::{Link, Transport};

pub const NUM_CHANNELS: u8 = 24;

/// Full output span of the DAC in volts.
pub const DAC_MIN_VOLTS: f64 = -10.0;
pub const DAC_MAX_VOLTS: f64 = 10.0;

pub const DEFAULT_STEP: f64 = 0.01;
pub const DEFAULT_INTER_DELAY: Duration = Duration::from_millis(20);

pub fn channel_ids() -> RangeInclusive<u8> {
    1..=NUM_CHANNELS
}

pub fn validate_channel(id: u8) -> Result<u8> {
    if channel_ids().contains(&id) {
        Ok(id)
    } else {
        Err(DacError::InvalidChannel(id))
    }
}

// ============================================================================
// Ramping
// ============================================================================

/// Smallest usable ramp step: one DAC code.
pub const MIN_STEP: f64 = 1.0 / CODES_PER_VOLT;

/// Number of set commands needed to go from `from` to `to` in steps of at most `step`.
pub fn ramp_len(from: f64, to: f64, step: f64) -> usize {
    let delta = (to - from).abs();
    if delta <= step {
        return 1;
    }
    // The epsilon keeps an exact multiple (1.0 / 0.01) from rounding up to an extra step.
    ((delta / step - 1e-9).ceil() as usize).max(1)
}

/// Intermediate set points from `from` to `to`, each at most `step` away from the
/// previous one. The last element is always exactly `to`. Points are produced on
/// demand, so a long ramp costs no memory.
pub fn ramp_steps(from: f64, to: f64, step: f64) -> impl Iterator<Item = f64> {
    let count = ramp_len(from, to, step);
    let direction = (to - from).signum();
    (1..=count).map(move |k| {
        if k == count {
            to
        } else {
            from + direction * step * k as f64
        }
    })
}

/// Step size and pacing applied to every voltage update of one channel.
#[derive(Clone, Debug)]
pub struct RampLimiter {
    step: f64,
    inter_delay: Duration,
    last_update: Option<Instant>,
}

impl RampLimiter {
    pub fn new(step: f64, inter_delay: Duration) -> Result<Self> {
        if !(step.is_finite() && step >= MIN_STEP) {
            return Err(DacError::validation(format!(
                "ramp step must be at least one DAC code ({} V), got {}",
                MIN_STEP, step
            )));
        }
        Ok(Self {
            step,
            inter_delay,
            last_update: None,
        })
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn inter_delay(&self) -> Duration {
        self.inter_delay
    }

    pub fn plan(&self, from: f64, to: f64) -> impl Iterator<Item = f64> {
        ramp_steps(from, to, self.step)
    }

    /// Block until at least `inter_delay` has passed since the previous update.
    fn pace(&mut self) {
        if let Some(last) = self.last_update {
            let elapsed = last.elapsed();
            if elapsed < self.inter_delay {
                std::thread::sleep(self.inter_delay - elapsed);
            }
        }
        self.last_update = Some(Instant::now());
    }
}

impl Default for RampLimiter {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            inter_delay: DEFAULT_INTER_DELAY,
            last_update: None,
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

#[derive(Clone, Debug)]
pub struct Channel {
    id: u8,
    min_val: f64,
    max_val: f64,
    /// Last voltage written to or read from the instrument
    last_value: Option<f64>,
    ramp: RampLimiter,
    codec: DacCodec,
}

impl Channel {
    pub fn new(id: u8, min_val: f64, max_val: f64, ramp: RampLimiter) -> Result<Self> {
        let id = validate_channel(id)?;
        let (min_val, max_val) = checked_bounds(min_val, max_val)?;
        Ok(Self {
            id,
            min_val,
            max_val,
            last_value: None,
            ramp,
            codec: DacCodec,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min_val, self.max_val)
    }

    /// Bounds may be given in either order; they must lie within the DAC span.
    pub fn set_bounds(&mut self, min_val: f64, max_val: f64) -> Result<()> {
        let (lo, hi) = checked_bounds(min_val, max_val)?;
        self.min_val = lo;
        self.max_val = hi;
        Ok(())
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    pub fn ramp(&self) -> &RampLimiter {
        &self.ramp
    }

    pub fn set_ramp(&mut self, step: f64, inter_delay: Duration) -> Result<()> {
        self.ramp = RampLimiter::new(step, inter_delay)?;
        Ok(())
    }

    /// Reject a set point before anything is sent.
    pub fn validate(&self, volts: f64) -> Result<()> {
        if !volts.is_finite() {
            return Err(DacError::Conversion(volts));
        }
        if volts < self.min_val || volts > self.max_val {
            return Err(DacError::Range {
                channel: self.id,
                value: volts,
                min: self.min_val,
                max: self.max_val,
            });
        }
        Ok(())
    }

    /// Move the output to `volts`, in steps of at most the ramp step.
    ///
    /// Without a known starting point the current output is read first. Returns
    /// the number of set commands written. A failure part-way leaves the output
    /// at the last step that was acknowledged.
    pub fn set_voltage<L: Link>(&mut self, transport: &mut Transport<L>, volts: f64) -> Result<usize> {
        self.validate(volts)?;
        self.codec.encode(volts)?;

        let start = match self.last_value {
            Some(v) => v,
            None => self.get_voltage(transport)?,
        };

        let count = ramp_len(start, volts, self.ramp.step());
        if count > 1 {
            tlog!(
                "[sp1060] Ramping channel {} from {} V to {} V in {} steps",
                self.id,
                start,
                volts,
                count
            );
        }

        for target in self.ramp.plan(start, volts) {
            let code = self.codec.encode(target)?;
            self.ramp.pace();
            transport.send_command(&format!("{} {}", self.id, self.codec.format_code(code)))?;
            self.last_value = Some(target);
        }
        Ok(count)
    }

    /// Read the output voltage back and resynchronise the ramp start point.
    pub fn get_voltage<L: Link>(&mut self, transport: &mut Transport<L>) -> Result<f64> {
        let query = format!("{} V?", self.id);
        let reply = transport.send_command(&query)?;
        let volts = self.codec.decode(&reply).map_err(|_| {
            DacError::protocol(
                transport.describe(),
                format!("unexpected reply to {}: {:?}", query, reply),
            )
        })?;
        self.last_value = Some(volts);
        Ok(volts)
    }
}

fn checked_bounds(a: f64, b: f64) -> Result<(f64, f64)> {
    let (lo, hi) = (a.min(b), a.max(b));
    if !(a.is_finite() && b.is_finite()) || lo < DAC_MIN_VOLTS || hi > DAC_MAX_VOLTS {
        return Err(DacError::validation(format!(
            "voltage bounds [{}, {}] must lie within [{}, {}] V",
            lo, hi, DAC_MIN_VOLTS, DAC_MAX_VOLTS
        )));
    }
    Ok((lo, hi))
}

// ============================================================================
// Tests
// ============================================================================
