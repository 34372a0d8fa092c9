use crate::{Result, SerialLink, TransportError};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// [`SerialLink`] over a host serial port (USB-UART adapters and the like).
pub struct SerialPortLink {
    _port_path: String,
    port: Box<dyn SerialPort>,
}

impl SerialPortLink {
    /// Open a port with the given baud rate and read timeout.
    ///
    /// The sensors served here are slow: the SenseAir S8 wants 9600 baud and
    /// a timeout of at least 200 ms, the PMS7003 9600 baud and up to 2.3 s
    /// between active-mode frames.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(timeout)
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        debug!(path, baud, "serial port open");
        Ok(Self {
            _port_path: path.to_string(),
            port,
        })
    }

    fn map_io(e: std::io::Error) -> TransportError {
        if e.kind() == std::io::ErrorKind::TimedOut {
            TransportError::Timeout
        } else {
            TransportError::Io(e.to_string())
        }
    }
}

impl SerialLink for SerialPortLink {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.port.write_all(payload).map_err(Self::map_io)
    }

    fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.port.read_exact(&mut buf).map_err(Self::map_io)?;
        Ok(buf)
    }

    fn recv_until(&mut self, delimiter: &[u8], max: usize) -> Result<()> {
        let mut acc: Vec<u8> = Vec::with_capacity(delimiter.len());
        let mut byte = [0u8; 1];
        for _ in 0..max {
            self.port.read_exact(&mut byte).map_err(Self::map_io)?;
            acc.push(byte[0]);
            if acc.ends_with(delimiter) {
                return Ok(());
            }
        }
        Err(TransportError::InvalidFrame("delimiter not found"))
    }

    fn flush_input(&mut self) -> Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}
