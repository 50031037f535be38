// src/io/mod.rs
//
// Byte links to the instrument and the request/reply transport built on them.
//
// A `Link` is anything that moves bytes to and from the SP1060: a serial port,
// a TCP socket, or the in-memory loopback used for testing. `Transport` adds
// the line protocol on top and is the only thing the rest of the crate talks to.

mod loopback;
pub mod serial;
mod tcp;
mod transport;

use std::io::{self, Read, Write};

pub use loopback::{LoopbackHandle, LoopbackLink, Responder};
pub use serial::{list_serial_ports, SerialLink, SerialPortInfo};
pub use tcp::TcpLink;
pub use transport::{Transport, DEFAULT_MULTILINE_GRACE, TERMINATOR};

use crate::config::{DacConfig, Endpoint};
use crate::error::Result;

/// Bidirectional byte stream with an input-buffer purge.
pub trait Link: Read + Write + Send {
    /// Discard any bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Short name for logs and errors, e.g. `sp1060(/dev/ttyUSB0)`.
    fn describe(&self) -> String;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Open the link named by the config's address.
pub fn open_link(config: &DacConfig) -> Result<Box<dyn Link>> {
    let endpoint = config.endpoint()?;
    tlog!("[sp1060] Opening {}", endpoint.describe());
    let link: Box<dyn Link> = match endpoint {
        Endpoint::Tcp { host, port } => Box::new(TcpLink::connect(&host, port, config.timeout())?),
        Endpoint::Serial { port } => {
            Box::new(SerialLink::open(&port, &config.serial, config.timeout())?)
        }
    };
    Ok(link)
}

/// Open the configured link and wrap it in a transport with the configured grace period.
pub fn open_transport(config: &DacConfig) -> Result<Transport<Box<dyn Link>>> {
    Ok(Transport::new(open_link(config)?).with_multiline_grace(config.multiline_grace()))
}
