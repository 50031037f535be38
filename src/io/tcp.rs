// src/io/tcp.rs
//
// TCP link for SP1060 units reached over Ethernet (raw socket, port 23).

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::Link;
use crate::error::{DacError, Result};

#[derive(Debug)]
pub struct TcpLink {
    stream: TcpStream,
    name: String,
}

impl TcpLink {
    /// Connect with `timeout` applied to the connect itself and to every read/write.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let name = format!("sp1060({}:{})", host, port);

        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| DacError::connection(&name, format!("resolve: {}", e)))?
            .collect();

        let mut last_err = None;
        let mut stream = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }

        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(DacError::timeout(&name, "connect"));
            }
            (None, Some(e)) => return Err(DacError::connection(&name, e.to_string())),
            (None, None) => return Err(DacError::connection(&name, "no address resolved")),
        };

        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        tlog!("[tcp] Connected to {}:{}", host, port);

        Ok(Self { stream, name })
    }
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Link for TcpLink {
    /// Sockets have no input-buffer purge, so read whatever is queued without blocking.
    fn clear_input(&mut self) -> io::Result<()> {
        self.stream.set_nonblocking(true)?;
        let mut scratch = [0u8; 512];
        let result = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by instrument",
                    ))
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_exchange_and_clear() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            // Stray bytes the client must be able to discard
            sock.write_all(b"stale\r\n").unwrap();
            let mut buf = [0u8; 16];
            let n = sock.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"ping\r\n");
            sock.write_all(b"pong\r\n").unwrap();
            // Hold the socket open until the client has read the reply
            let _ = sock.read(&mut buf);
        });

        let mut link = TcpLink::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        assert_eq!(link.describe(), format!("sp1060(127.0.0.1:{})", port));

        std::thread::sleep(Duration::from_millis(100));
        link.clear_input().unwrap();

        link.write_all(b"ping\r\n").unwrap();
        let mut buf = [0u8; 16];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong\r\n");

        drop(link);
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = TcpLink::connect("127.0.0.1", port, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(
            err,
            DacError::Connection { .. } | DacError::Timeout { .. }
        ));
    }
}
