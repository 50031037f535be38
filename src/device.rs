// src/device.rs
//
// The SP1060 instrument: 24 channels behind one transport, aggregate commands,
// identity queries and AWG programming.
//
// Wire protocol (ASCII, CR+LF both ways, one reply line per command):
//   <ch> <HEX>      set channel code          <ch> V?    read channel code
//   All S?          24 ';'-separated states   ALL ON / ALL OFF
//   HARD? / SOFT?   multi-line identity replies
//   C ...           AWG / SWG commands

use serde::Serialize;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::channel::{channel_ids, validate_channel, Channel, RampLimiter, NUM_CHANNELS};
use crate::config::DacConfig;
use crate::error::{DacError, Result};
use crate::io::{self, Link, Transport};
use crate::waveform::{WaveBank, Waveform, WaveformSpec};

pub const VENDOR: &str = "BasPI";
pub const MODEL: &str = "LNHR DAC SP1060";

const STATUS_OFF: &str = "OFF";

/// Serial number starts after this many characters of the trimmed `HARD?` line.
const SERIAL_OFFSET: usize = 3;
/// Firmware version is the last this many characters of the trimmed `SOFT?` line.
const FIRMWARE_LEN: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

pub struct Sp1060<L: Link = Box<dyn Link>> {
    transport: Transport<L>,
    /// Exactly NUM_CHANNELS entries, channel n at index n - 1
    channels: Vec<Channel>,
    awg_step_delay: Duration,
}

impl Sp1060<Box<dyn Link>> {
    /// Open the instrument named in `config` and bring it to a known state.
    pub fn open(config: &DacConfig) -> Result<Self> {
        config.validate()?;
        let transport = io::open_transport(config)?;
        Self::connect(transport, config)
    }
}

impl<L: Link> Sp1060<L> {
    /// Attach to an instrument over an existing transport.
    ///
    /// Queries the channel states and switches everything on if any channel
    /// reports OFF. With `sync_on_connect` every channel's voltage is read back
    /// so the first ramp starts from the real output.
    pub fn connect(transport: Transport<L>, config: &DacConfig) -> Result<Self> {
        let (min_val, max_val) = config.bounds();
        let ramp = RampLimiter::new(config.step, config.inter_delay())?;
        let channels = channel_ids()
            .map(|id| Channel::new(id, min_val, max_val, ramp.clone()))
            .collect::<Result<Vec<_>>>()?;

        let mut dac = Self {
            transport,
            channels,
            awg_step_delay: config.awg_step_delay(),
        };

        tlog!("[sp1060] Connected to {}", dac.transport.describe());

        let status = dac.query_all()?;
        if status.iter().any(|s| s == STATUS_OFF) {
            tlog!("[sp1060] Channels reported OFF, switching all channels on");
            dac.all_on()?;
        }

        if config.sync_on_connect {
            let volts = dac.read_all()?;
            tlog!("[sp1060] Current DAC output: {:?}", volts);
        }

        Ok(dac)
    }

    pub fn describe(&self) -> &str {
        self.transport.describe()
    }

    pub fn transport_mut(&mut self) -> &mut Transport<L> {
        &mut self.transport
    }

    /// Give up the instrument and hand back the transport (dropping it closes the link).
    pub fn into_transport(self) -> Transport<L> {
        self.transport
    }

    // ------------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------------

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_ids(&self) -> RangeInclusive<u8> {
        channel_ids()
    }

    /// Borrow one channel together with the transport.
    pub fn channel(&mut self, id: u8) -> Result<ChannelRef<'_, L>> {
        let idx = validate_channel(id)? as usize - 1;
        Ok(ChannelRef {
            channel: &mut self.channels[idx],
            transport: &mut self.transport,
        })
    }

    pub fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<()> {
        self.channel(channel)?.set_voltage(volts)
    }

    pub fn get_voltage(&mut self, channel: u8) -> Result<f64> {
        self.channel(channel)?.get_voltage()
    }

    /// Ramp every channel to `volts`, one channel after the other in ascending order.
    ///
    /// The value is checked against every channel's bounds before anything is sent.
    pub fn set_all(&mut self, volts: f64) -> Result<()> {
        for channel in &self.channels {
            channel.validate(volts)?;
        }
        for channel in self.channels.iter_mut() {
            channel.set_voltage(&mut self.transport, volts)?;
        }
        Ok(())
    }

    /// Read back all 24 output voltages, channel 1 first.
    pub fn read_all(&mut self) -> Result<Vec<f64>> {
        let mut volts = Vec::with_capacity(NUM_CHANNELS as usize);
        for channel in self.channels.iter_mut() {
            volts.push(channel.get_voltage(&mut self.transport)?);
        }
        Ok(volts)
    }

    /// Apply the same bounds to every channel.
    pub fn set_bounds(&mut self, min_val: f64, max_val: f64) -> Result<()> {
        for channel in self.channels.iter_mut() {
            channel.set_bounds(min_val, max_val)?;
        }
        Ok(())
    }

    /// Per-channel state tokens (`ON`/`OFF`), channel 1 first, exactly as reported.
    pub fn query_all(&mut self) -> Result<Vec<String>> {
        let reply = self.transport.send_command("All S?")?;
        parse_status(self.transport.describe(), &reply)
    }

    pub fn all_on(&mut self) -> Result<()> {
        self.transport.send_command("ALL ON")?;
        Ok(())
    }

    pub fn all_off(&mut self) -> Result<()> {
        self.transport.send_command("ALL OFF")?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    pub fn get_serial(&mut self) -> Result<String> {
        let reply = self.transport.query_multiline("HARD?")?;
        let trimmed = reply.trim();
        let serial: String = trimmed.chars().skip(SERIAL_OFFSET).collect();
        if serial.is_empty() {
            return Err(DacError::protocol(
                self.transport.describe(),
                format!("HARD? reply too short for a serial number: {:?}", reply),
            ));
        }
        Ok(serial)
    }

    pub fn get_firmware(&mut self) -> Result<String> {
        let reply = self.transport.query_multiline("SOFT?")?;
        let trimmed: Vec<char> = reply.trim().chars().collect();
        if trimmed.len() < FIRMWARE_LEN {
            return Err(DacError::protocol(
                self.transport.describe(),
                format!("SOFT? reply too short for a firmware version: {:?}", reply),
            ));
        }
        Ok(trimmed[trimmed.len() - FIRMWARE_LEN..].iter().collect())
    }

    /// Vendor, model, serial number and firmware, queried live.
    pub fn get_identity(&mut self) -> Result<Identity> {
        let serial = self.get_serial()?;
        let firmware = self.get_firmware()?;
        Ok(Identity {
            vendor: VENDOR.to_string(),
            model: MODEL.to_string(),
            serial,
            firmware,
        })
    }

    // ------------------------------------------------------------------------
    // AWG
    // ------------------------------------------------------------------------

    /// Program a standard waveform into a wave memory and start its AWG.
    ///
    /// Every command waits for its reply and is followed by the AWG step delay.
    /// The sequence is not rolled back if a command fails part-way.
    pub fn program_waveform(&mut self, spec: &WaveformSpec) -> Result<()> {
        spec.validate()?;
        let commands = spec.commands();

        tlog!(
            "[awg] Programming {} on channel {} via {} ({} @ {}, amplitude {} V)",
            spec.waveform,
            spec.channel,
            spec.bank.awg(),
            spec.waveform.code(),
            spec.frequency,
            spec.amplitude
        );

        for (i, cmd) in commands.iter().enumerate() {
            if i > 0 {
                std::thread::sleep(self.awg_step_delay);
            }
            self.transport.send_command(cmd)?;
        }

        tlog!("[awg] {} started", spec.bank.awg());
        Ok(())
    }

    /// `program_waveform` with the bank given as its 0..=3 selector.
    pub fn set_new_waveform(
        &mut self,
        channel: u8,
        waveform: Waveform,
        frequency: f64,
        amplitude: f64,
        bank: u8,
    ) -> Result<()> {
        let spec = WaveformSpec::new(channel, waveform, frequency, amplitude, WaveBank::try_from(bank)?)?;
        self.program_waveform(&spec)
    }
}

/// One channel borrowed together with the transport it talks through.
pub struct ChannelRef<'a, L: Link> {
    channel: &'a mut Channel,
    transport: &'a mut Transport<L>,
}

impl<L: Link> ChannelRef<'_, L> {
    pub fn id(&self) -> u8 {
        self.channel.id()
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.channel.bounds()
    }

    pub fn set_bounds(&mut self, min_val: f64, max_val: f64) -> Result<()> {
        self.channel.set_bounds(min_val, max_val)
    }

    pub fn set_ramp(&mut self, step: f64, inter_delay: Duration) -> Result<()> {
        self.channel.set_ramp(step, inter_delay)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.channel.last_value()
    }

    pub fn set_voltage(&mut self, volts: f64) -> Result<()> {
        self.channel.set_voltage(self.transport, volts).map(|_| ())
    }

    pub fn get_voltage(&mut self) -> Result<f64> {
        self.channel.get_voltage(self.transport)
    }
}

fn parse_status(device: &str, reply: &str) -> Result<Vec<String>> {
    let body = reply.replace("\r\n", "");
    let body = body.trim();
    let body = body.strip_suffix(';').unwrap_or(body);
    let tokens: Vec<String> = body.split(';').map(str::to_string).collect();
    if tokens.len() != NUM_CHANNELS as usize {
        return Err(DacError::protocol(
            device,
            format!(
                "All S? returned {} states, expected {}: {:?}",
                tokens.len(),
                NUM_CHANNELS,
                reply
            ),
        ));
    }
    Ok(tokens)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_config, SimulatedDac};

    fn count(commands: &[String], cmd: &str) -> usize {
        commands.iter().filter(|c| c.as_str() == cmd).count()
    }

    #[test]
    fn test_parse_status() {
        let reply = vec!["ON"; 23].join(";") + ";OFF";
        let tokens = parse_status("dev", &reply).unwrap();
        assert_eq!(tokens.len(), 24);
        assert_eq!(tokens[0], "ON");
        assert_eq!(tokens[23], "OFF");

        assert_eq!(parse_status("dev", &format!("{};", reply)).unwrap(), tokens);
        assert!(matches!(
            parse_status("dev", "ON;OFF"),
            Err(DacError::Protocol { .. })
        ));
    }

    #[test]
    fn test_connect_switches_on_when_any_off() {
        let sim = SimulatedDac::new();
        sim.set_on(17, false);
        let (transport, handle) = sim.transport();

        let _dac = Sp1060::connect(transport, &fast_config()).unwrap();

        let commands = handle.commands();
        assert_eq!(commands[0], "All S?");
        assert_eq!(count(&commands, "ALL ON"), 1);
        assert!(sim.is_on(17));
    }

    #[test]
    fn test_connect_leaves_enabled_device_alone() {
        let sim = SimulatedDac::new();
        let (transport, handle) = sim.transport();

        let _dac = Sp1060::connect(transport, &fast_config()).unwrap();

        let commands = handle.commands();
        assert_eq!(count(&commands, "ALL ON"), 0);
        // status query then one read-back per channel
        assert_eq!(commands.len(), 1 + 24);
        assert_eq!(commands[1], "1 V?");
        assert_eq!(commands[24], "24 V?");
    }

    #[test]
    fn test_connect_without_sync() {
        let sim = SimulatedDac::new();
        let (transport, handle) = sim.transport();
        let config = DacConfig {
            sync_on_connect: false,
            ..fast_config()
        };
        let dac = Sp1060::connect(transport, &config).unwrap();
        assert_eq!(handle.commands(), vec!["All S?"]);
        assert!(dac.channels().iter().all(|c| c.last_value().is_none()));
    }

    #[test]
    fn test_query_all_returns_tokens_in_order() {
        let sim = SimulatedDac::new();
        sim.set_on(24, false);
        let (transport, _handle) = sim.transport();
        let config = DacConfig {
            sync_on_connect: false,
            ..fast_config()
        };
        let mut dac = Sp1060::connect(transport, &config).unwrap();
        dac.all_off().unwrap();
        sim.set_on(1, true);

        let status = dac.query_all().unwrap();
        assert_eq!(status.len(), 24);
        assert_eq!(status[0], "ON");
        assert!(status[1..].iter().all(|s| s == "OFF"));
    }

    #[test]
    fn test_set_all_ascending_and_rejects_before_io() {
        let sim = SimulatedDac::new();
        let (transport, handle) = sim.transport();
        let mut dac = Sp1060::connect(transport, &fast_config()).unwrap();
        handle.clear_commands();

        dac.set_all(0.005).unwrap();
        let chans: Vec<u8> = handle
            .commands()
            .iter()
            .map(|c| c.split(' ').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(chans, (1..=24).collect::<Vec<u8>>());
        for ch in 1..=24 {
            assert!((sim.voltage(ch) - 0.005).abs() <= 2e-6);
        }

        handle.clear_commands();
        dac.channel(5).unwrap().set_bounds(-1.0, 0.0).unwrap();
        assert!(matches!(dac.set_all(0.004), Err(DacError::Range { channel: 5, .. })));
        assert_eq!(handle.command_count(), 0);
    }

    #[test]
    fn test_channel_access_validates_id() {
        let sim = SimulatedDac::new();
        let (transport, handle) = sim.transport();
        let mut dac = Sp1060::connect(transport, &fast_config()).unwrap();
        handle.clear_commands();

        assert!(matches!(dac.set_voltage(0, 1.0), Err(DacError::InvalidChannel(0))));
        assert!(matches!(dac.get_voltage(25), Err(DacError::InvalidChannel(25))));
        assert_eq!(handle.command_count(), 0);

        dac.set_voltage(3, 0.02).unwrap();
        assert!((dac.get_voltage(3).unwrap() - 0.02).abs() <= 2e-6);
    }

    #[test]
    fn test_set_voltage_outside_bounds_writes_nothing() {
        let sim = SimulatedDac::new();
        let (transport, handle) = sim.transport();
        let config = DacConfig {
            min_val: -1.0,
            max_val: 1.0,
            ..fast_config()
        };
        let mut dac = Sp1060::connect(transport, &config).unwrap();
        handle.clear_commands();
        let clears = handle.clears();

        let err = dac.set_voltage(8, 1.01).unwrap_err();
        assert!(matches!(err, DacError::Range { channel: 8, .. }));
        assert_eq!(handle.command_count(), 0);
        assert_eq!(handle.clears(), clears);
    }

    #[test]
    fn test_identity() {
        let sim = SimulatedDac::new();
        let (transport, _handle) = sim.transport();
        let mut dac = Sp1060::connect(transport, &fast_config()).unwrap();

        let idn = dac.get_identity().unwrap();
        assert_eq!(
            idn,
            Identity {
                vendor: "BasPI".to_string(),
                model: "LNHR DAC SP1060".to_string(),
                serial: "1060-0042".to_string(),
                firmware: "3.4.9".to_string(),
            }
        );
        // Leftover identity lines must not confuse the next command
        assert_eq!(dac.query_all().unwrap().len(), 24);
    }

    #[test]
    fn test_short_identity_reply_is_protocol_error() {
        let (link, _handle) = crate::io::LoopbackLink::new(|cmd| match cmd {
            "All S?" => vec![vec!["ON"; 24].join(";")],
            _ => vec!["0".to_string(), "SN".to_string()],
        });
        let config = DacConfig {
            sync_on_connect: false,
            ..fast_config()
        };
        let mut dac = Sp1060::connect(Transport::new(link), &config).unwrap();
        assert!(matches!(dac.get_serial(), Err(DacError::Protocol { .. })));
        assert!(matches!(dac.get_firmware(), Err(DacError::Protocol { .. })));
    }

    #[test]
    fn test_program_waveform_bank_a() {
        let sim = SimulatedDac::new();
        let (transport, handle) = sim.transport();
        let mut dac = Sp1060::connect(transport, &fast_config()).unwrap();
        handle.clear_commands();

        dac.set_new_waveform(12, Waveform::Sine, 100.0, 5.0, 0).unwrap();

        let commands = handle.commands();
        assert_eq!(commands.len(), 13);
        assert_eq!(commands.first().unwrap(), "C WAV-A CLR");
        assert_eq!(commands.last().unwrap(), "C AWG-A START");
        for cmd in &commands {
            for other in ["B", "C", "D"] {
                assert!(!cmd.contains(&format!("WAV-{}", other)));
                assert!(!cmd.contains(&format!("AWG-{}", other)));
            }
        }
        assert!(commands.contains(&"C AWG-A CH 12".to_string()));
    }

    #[test]
    fn test_invalid_bank_sends_nothing() {
        let sim = SimulatedDac::new();
        let (transport, handle) = sim.transport();
        let mut dac = Sp1060::connect(transport, &fast_config()).unwrap();
        handle.clear_commands();

        let err = dac.set_new_waveform(12, Waveform::Sine, 100.0, 5.0, 4).unwrap_err();
        assert!(matches!(err, DacError::InvalidBank(4)));
        assert_eq!(handle.command_count(), 0);
    }

    #[test]
    fn test_waveform_failure_aborts_sequence() {
        let (link, handle) = crate::io::LoopbackLink::new(|cmd| match cmd {
            "All S?" => vec![vec!["ON"; 24].join(";")],
            // instrument stops answering half-way
            "C SWG APPLY" => Vec::new(),
            _ => vec!["0".to_string()],
        });
        let config = DacConfig {
            sync_on_connect: false,
            ..fast_config()
        };
        let mut dac = Sp1060::connect(Transport::new(link), &config).unwrap();
        handle.clear_commands();

        let spec = WaveformSpec::new(2, Waveform::Ramp, 10.0, 1.0, WaveBank::B).unwrap();
        assert!(matches!(
            dac.program_waveform(&spec),
            Err(DacError::Timeout { .. })
        ));
        let commands = handle.commands();
        assert_eq!(commands.last().unwrap(), "C SWG APPLY");
        assert_eq!(commands.len(), 10);
    }

    #[test]
    fn test_instrument_hangup_is_connection_error() {
        let (link, handle) = crate::io::LoopbackLink::new(|cmd| match cmd {
            "All S?" => vec![vec!["ON"; 24].join(";")],
            _ => Vec::new(),
        });
        let config = DacConfig {
            sync_on_connect: false,
            ..fast_config()
        };
        let mut dac = Sp1060::connect(Transport::new(link), &config).unwrap();
        handle.close();

        assert!(matches!(dac.get_voltage(4), Err(DacError::Connection { .. })));
        assert!(matches!(dac.query_all(), Err(DacError::Connection { .. })));
    }

    #[test]
    fn test_connect_propagates_transport_failure() {
        let (link, _handle) = crate::io::LoopbackLink::new(|_| Vec::new());
        let result = Sp1060::connect(Transport::new(link), &fast_config());
        assert!(matches!(result, Err(DacError::Timeout { .. })));
    }
}
