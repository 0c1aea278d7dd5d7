//! Gateway Transport
//!
//! Line-oriented transports for talking to an OpenTherm Gateway. The
//! [`Transport`] trait abstracts the link so the engine can run over TCP
//! (serial-to-network bridges, the gateway's own ethernet interface) or a
//! test double. [`TcpTransport`] handles connection setup with keepalive,
//! buffers partial lines, and reports a stalled link: a healthy gateway
//! relays OpenTherm traffic continuously, so a long silence means the
//! connection is dead even if TCP has not noticed.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;

/// No traffic for this long means the link is dead
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// TCP connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("no data received for {}s", IDLE_TIMEOUT.as_secs())]
    Idle,
    #[error("connection closed by peer")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A line-oriented link to a gateway
pub trait Transport: Send {
    /// Send one command line. The transport appends the terminator.
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Wait up to `wait` for a complete line. Returns `Ok(None)` when no
    /// full line arrived in time.
    fn poll_line(&mut self, wait: Duration) -> Result<Option<String>>;

    /// Peer description for logging and events
    fn peer(&self) -> String;
}

/// TCP transport to a serial bridge or networked gateway
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
    buffer: Vec<u8>,
    last_rx: Instant,
}

impl TcpTransport {
    /// Connect to `ip:port` with keepalive enabled
    pub fn connect(ip: &str, port: u16) -> Result<Self> {
        let peer = format!("{ip}:{port}");
        let addr = peer
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::InvalidAddress(peer.clone()))?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        log::info!("connected to gateway at {peer}");
        Ok(TcpTransport {
            stream,
            peer,
            buffer: Vec::new(),
            last_rx: Instant::now(),
        })
    }

    /// Take the first complete line out of the buffer
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Transport for TcpTransport {
    fn send_line(&mut self, line: &str) -> Result<()> {
        log::debug!("-> {line}");
        // One write keeps the command and its terminator in a single segment
        self.stream.write_all(format!("{line}\r").as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    fn poll_line(&mut self, wait: Duration) -> Result<Option<String>> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }
        self.stream.set_read_timeout(Some(wait))?;
        let mut chunk = [0u8; 512];
        match self.stream.read(&mut chunk) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => {
                self.last_rx = Instant::now();
                self.buffer.extend_from_slice(&chunk[..n]);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                if self.last_rx.elapsed() > IDLE_TIMEOUT {
                    return Err(TransportError::Idle);
                }
            }
            Err(e) => return Err(e.into()),
        }
        Ok(self.take_line())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_receives_lines_and_strips_terminators() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"B40194000\r\nT80190000\r\n").unwrap();
            // Read until the terminator; the command may arrive in pieces
            let mut received = Vec::new();
            let mut buf = [0u8; 32];
            while !received.ends_with(b"\r") {
                let n = stream.read(&mut buf).unwrap();
                assert!(n > 0, "peer closed before sending a full command");
                received.extend_from_slice(&buf[..n]);
            }
            String::from_utf8_lossy(&received).to_string()
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).unwrap();
        let first = transport.poll_line(Duration::from_secs(1)).unwrap();
        assert_eq!(first.as_deref(), Some("B40194000"));
        let second = transport.poll_line(Duration::from_secs(1)).unwrap();
        assert_eq!(second.as_deref(), Some("T80190000"));

        transport.send_line("PR=A").unwrap();
        assert_eq!(server.join().unwrap(), "PR=A\r");
    }

    #[test]
    fn test_closed_peer_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).unwrap();
        server.join().unwrap();
        let mut saw_closed = false;
        for _ in 0..10 {
            match transport.poll_line(Duration::from_millis(50)) {
                Err(TransportError::Closed) => {
                    saw_closed = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(saw_closed);
    }
}
