// src/io/serial/mod.rs
//
// RS-232 / USB-serial link to the SP1060.

pub(crate) mod utils;

use serde::Serialize;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::Link;
use crate::config::SerialSettings;
use crate::error::{DacError, Result};

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// Blocking serial link configured once at open time.
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialLink {
    pub fn open(port_name: &str, settings: &SerialSettings, timeout: Duration) -> Result<Self> {
        let name = format!("sp1060({})", port_name);

        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(utils::to_serialport_data_bits(settings.data_bits))
            .stop_bits(utils::to_serialport_stop_bits(settings.stop_bits))
            .parity(utils::to_serialport_parity(settings.parity))
            .flow_control(utils::to_serialport_flow_control(settings.flow_control))
            .timeout(timeout)
            .open()
            .map_err(|e| DacError::connection(&name, e.to_string()))?;

        tlog!(
            "[serial] Opened {} ({} baud, {}{}{}, flow: {:?})",
            port_name,
            settings.baud_rate,
            settings.data_bits,
            match settings.parity {
                crate::config::Parity::None => 'N',
                crate::config::Parity::Odd => 'O',
                crate::config::Parity::Even => 'E',
            },
            settings.stop_bits,
            settings.flow_control
        );

        Ok(Self { port, name })
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Link for SerialLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// List serial ports that could host an SP1060.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        // On macOS, only show /dev/cu.* (calling unit), not /dev/tty.*
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => {
                    ("PCI".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}
