//! Byte channel to the instrument's USB serial bridge

use std::{
    io::{self, Read, Write},
    time::{Duration, Instant},
};

use serialport::{ClearBuffer, FlowControl, SerialPort};
use tracing::{debug, info};

/// Blocking byte channel with a bounded read time
pub trait Transport: Send {
    /// Write all of `bytes`
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Read up to `n` bytes, returning fewer if the read timeout expires first
    fn read(&mut self, n: usize) -> io::Result<Vec<u8>>;
    /// Discard everything buffered in both directions
    fn purge(&mut self) -> io::Result<()>;
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> io::Result<()>;
}

/// Transport over a serial port (the FTDI bridge enumerates as one)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Open the port with hardware flow control and DTR/RTS asserted
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> serialport::Result<Self> {
        let mut port = serialport::new(path, baud_rate)
            .flow_control(FlowControl::Hardware)
            .timeout(timeout)
            .open()?;
        port.write_data_terminal_ready(true)?;
        port.write_request_to_send(true)?;
        port.clear(ClearBuffer::All)?;
        info!(path, baud_rate, ?timeout, "Opened instrument serial port");
        Ok(Self {
            port,
            read_timeout: timeout,
        })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        // The whole read shares one deadline, like the bridge driver's own timeout
        let deadline = Instant::now() + self.read_timeout;
        while filled < n && Instant::now() < deadline {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(k) => filled += k,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn purge(&mut self) -> io::Result<()> {
        debug!("Purging serial buffers");
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> io::Result<()> {
        // A serial port carries one timeout for both directions
        self.port.set_timeout(read.max(write))?;
        self.read_timeout = read;
        Ok(())
    }
}

/// Names of the serial ports currently present on the system
pub fn available_ports() -> serialport::Result<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}
