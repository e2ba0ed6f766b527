//! # Port Capabilities
//!
//! The link worker talks to hardware through two small capability traits so
//! its sequencing logic can run against a fake port in tests: a byte
//! transport with bounded-wait reads, and the reset signal line.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

/// Byte transport with bounded-wait read semantics.
///
/// `read_chunk` returns `Ok(0)` only when the peer is gone; an elapsed wait
/// with no data surfaces as `ErrorKind::TimedOut`, which callers treat as
/// "poll again".
pub trait ByteSource: Send {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send one fully-formed line back to the device (the echo path).
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// Throw away everything the OS has buffered that we have not read.
    fn clear_input(&mut self) -> io::Result<()>;
}

/// The hardware reset line. Asserting holds the device in reset; releasing
/// lets it boot.
pub trait ResetSignal: Send {
    fn assert_reset(&mut self) -> io::Result<()>;
    fn release_reset(&mut self) -> io::Result<()>;
}

/// The real thing: a serial port with RTS wired to the device's reset pin.
pub struct SerialGripPort {
    port: Box<dyn SerialPort>,
}

impl SerialGripPort {
    /// Open `path` at `baud`. The read timeout doubles as the worker's poll
    /// interval: a quiet line hands control back this often.
    pub fn open(path: &str, baud: u32, poll_interval: Duration) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud).timeout(poll_interval).open()?;
        Ok(Self { port })
    }
}

fn to_io(err: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

impl ByteSource for SerialGripPort {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(to_io)
    }
}

impl ResetSignal for SerialGripPort {
    fn assert_reset(&mut self) -> io::Result<()> {
        self.port.write_request_to_send(true).map_err(to_io)
    }

    fn release_reset(&mut self) -> io::Result<()> {
        self.port.write_request_to_send(false).map_err(to_io)
    }
}
