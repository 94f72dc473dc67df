//! Serial port transport backed by the `serialport` crate
//!
//! Reads use the configured timeout so the caller regains control regularly.
//! Bytes received before a timeout stay in the line buffer and are completed
//! by the next read, so a line split across two reads is delivered whole.

use super::{CommandSink, Connector, ReadStatus, Transport};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, BufRead, BufReader, Write};
use std::time::Duration;

/// Line terminator used by the device
const LINE_TERMINATOR: u8 = b'\n';

/// Opens serial ports
#[derive(Debug, Clone)]
pub struct SerialConnector {
    read_timeout: Duration,
}

impl SerialConnector {
    /// Create a connector whose ports use `read_timeout` for reads
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    /// List serial ports present on the system
    pub fn available_ports() -> Vec<String> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }
}

impl Connector for SerialConnector {
    fn open(&mut self, address: &str, baud_rate: u32) -> io::Result<Box<dyn Transport>> {
        let port = serialport::new(address, baud_rate)
            .timeout(self.read_timeout)
            .open()?;
        Ok(Box::new(SerialTransport::new(port)))
    }
}

/// Line-oriented reader/writer over an open serial port
pub struct SerialTransport {
    reader: BufReader<Box<dyn SerialPort>>,
    partial: Vec<u8>,
}

impl SerialTransport {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            reader: BufReader::new(port),
            partial: Vec::with_capacity(64),
        }
    }
}

impl Transport for SerialTransport {
    fn read_line(&mut self) -> io::Result<ReadStatus> {
        match self.reader.read_until(LINE_TERMINATOR, &mut self.partial) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial port returned end of stream",
            )),
            Ok(_) if self.partial.last() == Some(&LINE_TERMINATOR) => {
                Ok(ReadStatus::Line(std::mem::take(&mut self.partial)))
            }
            Ok(_) => Ok(ReadStatus::Pending),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(ReadStatus::Pending)
            }
            Err(e) => Err(e),
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let buffered = self.reader.buffer().len();
        self.reader.consume(buffered);
        self.partial.clear();
        self.reader.get_mut().clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn command_sink(&self) -> io::Result<Box<dyn CommandSink>> {
        let port = self.reader.get_ref().try_clone()?;
        Ok(Box::new(SerialCommandSink { port }))
    }
}

/// Cloned port handle used for commands
struct SerialCommandSink {
    port: Box<dyn SerialPort>,
}

impl CommandSink for SerialCommandSink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}
