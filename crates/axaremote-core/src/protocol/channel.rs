//! Communication channels
//!
//! Abstraction over the byte stream between the library and the window
//! opener: a local serial port, or a TCP serial bridge presenting the same
//! bytes. The protocol layer only ever needs line-buffered reads with a
//! deadline, so that is what the trait provides on top of raw I/O.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use serialport::SerialPort;

use super::error::TransportError;

/// Per-syscall timeout; the deadline loop in `read_line` polls at this
/// granularity.
const POLL_TIMEOUT: Duration = Duration::from_millis(25);

/// Abstraction for communication channels (serial or TCP bridge).
pub trait Channel: Read + Write + Send {
    /// Set the timeout for individual read syscalls.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard any unread input.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Read one CR/LF terminated line, waiting at most `timeout`.
    ///
    /// Returns the line without its terminator; a blank line on the wire
    /// yields an empty string. Expiry is [`TransportError::Timeout`], which
    /// is not fatal to the channel.
    fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.read(&mut byte) {
                Ok(0) => {
                    return Err(TransportError::ConnectionFailed(
                        "connection closed by peer".to_string(),
                    ))
                }
                Ok(_) => {
                    if byte[0] == b'\n' {
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        return Ok(String::from_utf8_lossy(&line).into_owned());
                    }
                    line.push(byte[0]);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    // In-memory channels return immediately; avoid spinning.
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
        }
    }
}

impl Channel for Box<dyn Channel> {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        (**self).read_line(timeout)
    }
}

/// Serial port wrapper implementing [`Channel`].
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an already-opened serial port. The port's own timeout is set
    /// short so `read_line` can enforce its deadline.
    pub fn new(mut port: Box<dyn SerialPort>) -> Self {
        let _ = port.set_timeout(POLL_TIMEOUT);
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Channel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// TCP stream wrapper implementing [`Channel`], for serial-to-network
/// bridges (ser2net and friends).
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Connect to a bridge at `host:port`.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?
            .next()
            .ok_or_else(|| {
                TransportError::ConnectionFailed(format!("{host}:{port} did not resolve"))
            })?;
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        stream
            .set_read_timeout(Some(POLL_TIMEOUT))
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self { stream })
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Channel for TcpChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        // TCP has no buffer-clear syscall; drain with nonblocking reads.
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    let _ = self.stream.set_nonblocking(false);
                    return Err(e);
                }
            }
        }
        self.stream.set_nonblocking(false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FixedInput {
        bytes: VecDeque<u8>,
    }

    impl Read for FixedInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.bytes.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(io::Error::new(io::ErrorKind::WouldBlock, "drained")),
            }
        }
    }

    impl Write for FixedInput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Channel for FixedInput {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.bytes.clear();
            Ok(())
        }
    }

    fn channel(bytes: &[u8]) -> FixedInput {
        FixedInput {
            bytes: bytes.iter().copied().collect(),
        }
    }

    #[test]
    fn test_read_line_strips_crlf() {
        let mut ch = channel(b"210 Unlocked\r\n");
        let line = ch.read_line(Duration::from_millis(50)).unwrap();
        assert_eq!(line, "210 Unlocked");
    }

    #[test]
    fn test_read_line_yields_blank_lines() {
        let mut ch = channel(b"\r\nSTATUS:OPEN\r\n");
        assert_eq!(ch.read_line(Duration::from_millis(50)).unwrap(), "");
        assert_eq!(
            ch.read_line(Duration::from_millis(50)).unwrap(),
            "STATUS:OPEN"
        );
    }

    #[test]
    fn test_read_line_times_out() {
        let mut ch = channel(b"");
        match ch.read_line(Duration::from_millis(20)) {
            Err(TransportError::Timeout) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_line_times_out() {
        // No terminator ever arrives.
        let mut ch = channel(b"210 Unlo");
        match ch.read_line(Duration::from_millis(20)) {
            Err(TransportError::Timeout) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
