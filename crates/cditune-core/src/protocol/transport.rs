//! Byte transport
//!
//! [`Transport`] abstracts the duplex byte channel (a real serial port, the
//! simulated controller, or a test double). [`Link`] owns one transport for
//! the lifetime of a session and adds timed reads on top of it. Nothing here
//! retries; retry policy lives with the callers.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use super::serial::{open_port, BaudRate};
use super::ProtocolError;

/// Poll interval while waiting for bytes
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Abstraction for the byte channel to the controller
pub trait Transport: Send {
    /// Read whatever is available into `buf`, waiting at most `timeout` for
    /// the first byte. Returns `Ok(0)` when nothing arrived in time.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Write all bytes to the channel
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Drop any unread input
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an opened, configured port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    // bytes_to_read() polling keeps the timeout honest on adapters where a
    // blocking read() ignores the configured port timeout
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let start = Instant::now();
        loop {
            let available = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
            if available > 0 {
                let to_read = available.min(buf.len());
                match self.port.read(&mut buf[..to_read]) {
                    Ok(n) => return Ok(n),
                    Err(ref e)
                        if e.kind() == io::ErrorKind::TimedOut
                            || e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
            if start.elapsed() >= timeout {
                return Ok(0);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

/// An open, exclusively owned channel to one controller.
///
/// Dropping the link releases the underlying handle, so every exit path
/// (including a failed handshake) closes the port.
pub struct Link {
    transport: Box<dyn Transport>,
    name: String,
    baud: BaudRate,
    tx_bytes: u64,
    rx_bytes: u64,
}

impl Link {
    /// Open a serial port at one of the supported baud rates
    pub fn open(port: &str, baud: u32) -> Result<Self, ProtocolError> {
        let baud = BaudRate::try_from(baud)?;
        let serial = open_port(port, baud)?;
        tracing::info!("opened {} at {} baud", port, baud);
        Ok(Self::from_transport(port, baud, Box::new(SerialTransport::new(serial))))
    }

    /// Wrap an already open transport
    pub fn from_transport(
        name: impl Into<String>,
        baud: BaudRate,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            transport,
            name: name.into(),
            baud,
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Port name this link was opened on
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured baud rate
    pub fn baud(&self) -> BaudRate {
        self.baud
    }

    /// Cumulative (tx, rx) byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// Read exactly `n` bytes or fail with [`ProtocolError::Timeout`]
    pub fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let start = Instant::now();
        let mut buf = vec![0u8; n];
        let mut offset = 0;

        while offset < n {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                tracing::debug!("read_exact: timed out after {} of {} bytes", offset, n);
                return Err(ProtocolError::Timeout);
            }
            let read = self.transport.read_timeout(&mut buf[offset..], remaining)?;
            offset += read;
        }

        self.rx_bytes = self.rx_bytes.saturating_add(n as u64);
        tracing::trace!("read_exact: {:02x?}", buf);
        Ok(buf)
    }

    /// Read whatever arrives within `timeout`; an empty result is not an error
    pub fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = [0u8; 256];
        let n = self.transport.read_timeout(&mut buf, timeout)?;
        self.rx_bytes = self.rx_bytes.saturating_add(n as u64);
        if n > 0 {
            tracing::trace!("read_available: {:02x?}", &buf[..n]);
        }
        Ok(buf[..n].to_vec())
    }

    /// Write bytes to the controller
    pub fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        tracing::trace!("write: {:02x?}", data);
        self.transport.write_all(data)?;
        self.tx_bytes = self.tx_bytes.saturating_add(data.len() as u64);
        Ok(())
    }

    /// Discard unread input
    pub fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.transport.clear_input()?;
        Ok(())
    }

    /// Close the link, releasing the port
    pub fn close(self) {
        tracing::info!(
            "closing {} (tx {} bytes, rx {} bytes)",
            self.name,
            self.tx_bytes,
            self.rx_bytes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serves queued chunks, one chunk per read
    struct Chunks {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Transport for Chunks {
        fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None => {
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(0)
                }
            }
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.chunks.clear();
            Ok(())
        }
    }

    fn link(chunks: Vec<Vec<u8>>) -> Link {
        Link::from_transport(
            "test",
            BaudRate::B19200,
            Box::new(Chunks {
                chunks: chunks.into(),
                written: Vec::new(),
            }),
        )
    }

    #[test]
    fn test_read_exact_gathers_chunks() {
        let mut link = link(vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
        let bytes = link.read_exact(5, Duration::from_millis(100)).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5]);
        // The leftover byte stays available
        let rest = link.read_available(Duration::from_millis(10)).unwrap();
        assert_eq!(rest, vec![6]);
        assert_eq!(link.counters(), (0, 6));
    }

    #[test]
    fn test_read_exact_times_out() {
        let mut link = link(vec![vec![1, 2]]);
        let result = link.read_exact(4, Duration::from_millis(20));
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[test]
    fn test_read_available_empty_is_ok() {
        let mut link = link(vec![]);
        let bytes = link.read_available(Duration::from_millis(5)).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_write_counts_bytes() {
        let mut link = link(vec![]);
        link.write(&[0x01, 0xAB, 0xAC, 0xA1]).unwrap();
        assert_eq!(link.counters(), (4, 0));
        assert_eq!(link.name(), "test");
        assert_eq!(link.baud(), BaudRate::B19200);
    }

    #[test]
    fn test_open_unsupported_baud() {
        let result = Link::open("/dev/does-not-exist", 14400);
        assert!(matches!(result, Err(ProtocolError::UnsupportedBaud(14400))));
    }

    #[test]
    fn test_open_missing_port() {
        let result = Link::open("/dev/cditune-no-such-port", 19200);
        assert!(matches!(result, Err(ProtocolError::PortUnavailable(_))));
    }
}
