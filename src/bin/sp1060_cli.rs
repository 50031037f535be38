// sp1060_cli - command-line access to an SP1060 DAC
//
// Usage:
//   sp1060_cli --address TCPIP0::192.168.0.5::23::SOCKET idn
//   sp1060_cli --address /dev/ttyUSB0 set 3 1.25
//   sp1060_cli wave --channel 12 --kind sine --frequency 100 --amplitude 5 --bank A

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use sp1060::io::list_serial_ports;
use sp1060::{logging, tlog, DacConfig, DacError, Sp1060, WaveBank, Waveform, WaveformSpec};

#[derive(Parser)]
#[command(name = "sp1060_cli", about = "Control a BasPI SP1060 LNHR DAC")]
struct Cli {
    /// Instrument address (VISA socket/serial address, tcp://host:port or a serial device)
    #[arg(short, long)]
    address: Option<String>,

    /// TOML config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Also write the log to a timestamped file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports
    Ports,
    /// Vendor, model, serial number and firmware
    Idn,
    /// ON/OFF state of every channel
    Status,
    /// Read one channel's output voltage
    Get { channel: u8 },
    /// Read every channel's output voltage
    GetAll,
    /// Ramp one channel to a voltage
    Set {
        channel: u8,
        #[arg(allow_hyphen_values = true)]
        volts: f64,
    },
    /// Ramp every channel to the same voltage
    SetAll {
        #[arg(allow_hyphen_values = true)]
        volts: f64,
    },
    /// Switch all channels on
    On,
    /// Switch all channels off
    Off,
    /// Program and start a standard waveform on the AWG
    Wave {
        #[arg(long)]
        channel: u8,
        /// Name (sine, triangle, ...) or number 0..7
        #[arg(long)]
        kind: Waveform,
        /// Hz
        #[arg(long)]
        frequency: f64,
        /// Volts, -50..50
        #[arg(long, allow_hyphen_values = true)]
        amplitude: f64,
        /// A..D or 0..3
        #[arg(long)]
        bank: WaveBank,
    },
}

#[derive(Serialize)]
struct ChannelVoltage {
    channel: u8,
    volts: f64,
}

fn load_config(cli: &Cli) -> Result<DacConfig, DacError> {
    let mut config = match &cli.config {
        Some(path) => DacConfig::load(path)?,
        None => {
            let path = DacConfig::default_path();
            if path.exists() {
                DacConfig::load(&path)?
            } else {
                DacConfig::default()
            }
        }
    };
    if let Some(address) = &cli.address {
        config.address = address.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), DacError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DacError::validation(format!("failed to serialise output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn run(cli: &Cli) -> Result<(), DacError> {
    if let Command::Ports = cli.command {
        let ports = list_serial_ports()?;
        if cli.json {
            print_json(&ports)?;
        } else {
            for p in &ports {
                println!(
                    "{:<24} {:<9} {}",
                    p.port_name,
                    p.port_type,
                    p.product.as_deref().unwrap_or("")
                );
            }
        }
        return Ok(());
    }

    let config = load_config(cli)?;
    let mut dac = Sp1060::open(&config)?;

    match &cli.command {
        Command::Ports => {}
        Command::Idn => {
            let idn = dac.get_identity()?;
            if cli.json {
                print_json(&idn)?;
            } else {
                println!("{} {} SN {} FW {}", idn.vendor, idn.model, idn.serial, idn.firmware);
            }
        }
        Command::Status => {
            let status = dac.query_all()?;
            if cli.json {
                print_json(&status)?;
            } else {
                for (id, state) in dac.channel_ids().zip(&status) {
                    println!("{:>2}  {}", id, state);
                }
            }
        }
        Command::Get { channel } => {
            let volts = dac.get_voltage(*channel)?;
            if cli.json {
                print_json(&ChannelVoltage { channel: *channel, volts })?;
            } else {
                println!("{:.6}", volts);
            }
        }
        Command::GetAll => {
            let volts = dac.read_all()?;
            if cli.json {
                let rows: Vec<ChannelVoltage> = dac
                    .channel_ids()
                    .zip(volts)
                    .map(|(channel, volts)| ChannelVoltage { channel, volts })
                    .collect();
                print_json(&rows)?;
            } else {
                for (id, v) in dac.channel_ids().zip(volts) {
                    println!("{:>2}  {:>10.6}", id, v);
                }
            }
        }
        Command::Set { channel, volts } => dac.set_voltage(*channel, *volts)?,
        Command::SetAll { volts } => dac.set_all(*volts)?,
        Command::On => dac.all_on()?,
        Command::Off => dac.all_off()?,
        Command::Wave {
            channel,
            kind,
            frequency,
            amplitude,
            bank,
        } => {
            let spec = WaveformSpec::new(*channel, *kind, *frequency, *amplitude, *bank)?;
            if cli.json {
                print_json(&spec.commands())?;
            }
            dac.program_waveform(&spec)?;
        }
    }

    drop(dac.into_transport());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(dir) = &cli.log_dir {
        if let Err(e) = logging::init_file_logging(dir) {
            eprintln!("{}", e);
        }
    }

    let result = run(&cli);
    if let Err(e) = &result {
        tlog!("[cli] {}", e);
    }
    logging::stop_file_logging();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_rejected_input() => ExitCode::from(2),
        Err(_) => ExitCode::FAILURE,
    }
}
