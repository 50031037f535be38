// src/testing.rs
//
// In-memory SP1060 for unit tests: answers the instrument's command set over a
// LoopbackLink and keeps per-channel codes and on/off state.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::channel::NUM_CHANNELS;
use crate::codec::{DacCodec, MAX_CODE};
use crate::config::DacConfig;
use crate::io::{LoopbackHandle, LoopbackLink, Transport};

pub const SIM_HARD_REPLY: [&str; 3] = ["HARDWARE INFO", "SN:1060-0042", "DAC BOARD REV 2"];
pub const SIM_SOFT_REPLY: [&str; 3] = ["SOFTWARE INFO", "Firmware Version 3.4.9", "BUILD 2019"];

struct SimState {
    codes: [u32; NUM_CHANNELS as usize],
    on: [bool; NUM_CHANNELS as usize],
}

#[derive(Clone)]
pub struct SimulatedDac {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDac {
    /// All channels on at 0 V.
    pub fn new() -> Self {
        let zero = DacCodec.encode(0.0).unwrap();
        Self {
            state: Arc::new(Mutex::new(SimState {
                codes: [zero; NUM_CHANNELS as usize],
                on: [true; NUM_CHANNELS as usize],
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn set_voltage(&self, channel: u8, volts: f64) {
        self.lock().codes[channel as usize - 1] = DacCodec.encode(volts).unwrap();
    }

    /// Output voltage as the instrument would report it.
    pub fn voltage(&self, channel: u8) -> f64 {
        let code = self.lock().codes[channel as usize - 1];
        self.voltage_for_code(code)
    }

    pub fn voltage_for_code(&self, code: u32) -> f64 {
        DacCodec.decode(&DacCodec.format_code(code)).unwrap()
    }

    pub fn set_on(&self, channel: u8, on: bool) {
        self.lock().on[channel as usize - 1] = on;
    }

    pub fn is_on(&self, channel: u8) -> bool {
        self.lock().on[channel as usize - 1]
    }

    /// A transport whose link is answered by this simulator.
    pub fn transport(&self) -> (Transport<LoopbackLink>, LoopbackHandle) {
        let sim = self.clone();
        let (link, handle) = LoopbackLink::new(move |cmd| sim.respond(cmd));
        (Transport::new(link).with_multiline_grace(std::time::Duration::ZERO), handle)
    }

    fn respond(&self, cmd: &str) -> Vec<String> {
        let mut state = self.lock();
        let lines = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        match cmd {
            "All S?" => {
                let tokens: Vec<&str> = state.on.iter().map(|&on| if on { "ON" } else { "OFF" }).collect();
                vec![tokens.join(";")]
            }
            "ALL ON" => {
                state.on = [true; NUM_CHANNELS as usize];
                vec!["0".to_string()]
            }
            "ALL OFF" => {
                state.on = [false; NUM_CHANNELS as usize];
                vec!["0".to_string()]
            }
            "HARD?" => lines(&SIM_HARD_REPLY),
            "SOFT?" => lines(&SIM_SOFT_REPLY),
            _ if cmd.starts_with("C ") => vec!["0".to_string()],
            _ => {
                let Some((chan, arg)) = cmd.split_once(' ') else {
                    return vec!["1".to_string()];
                };
                let idx = match chan.parse::<usize>() {
                    Ok(n) if (1..=NUM_CHANNELS as usize).contains(&n) => n - 1,
                    _ => return vec!["1".to_string()],
                };
                if arg == "V?" {
                    return vec![DacCodec.format_code(state.codes[idx])];
                }
                match u32::from_str_radix(arg, 16) {
                    Ok(code) if code <= MAX_CODE => {
                        state.codes[idx] = code;
                        vec!["0".to_string()]
                    }
                    _ => vec!["1".to_string()],
                }
            }
        }
    }
}

/// Defaults with every delay set to zero.
pub fn fast_config() -> DacConfig {
    DacConfig {
        inter_delay_ms: 0,
        multiline_grace_ms: 0,
        awg_step_delay_ms: 0,
        ..DacConfig::default()
    }
}
