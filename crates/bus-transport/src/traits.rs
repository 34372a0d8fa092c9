use crate::{Result, TransportError};

/// A minimal blocking register-addressed bus interface (I2C-style).
///
/// One transaction per call; no retries. Callers that want retry/backoff
/// wrap these calls themselves.
pub trait RegisterBus {
    /// Read `len` bytes starting at a register address.
    fn read_bytes(&mut self, register_address: u8, len: usize) -> Result<Vec<u8>>;

    /// Write a payload to a register address.
    fn write_bytes(&mut self, register_address: u8, payload: &[u8]) -> Result<()>;

    /// Set the device's register pointer without reading.
    ///
    /// Some parts (HDC1080) require a conversion delay between addressing a
    /// register and reading it, which a combined write-then-read transaction
    /// cannot express. Backends that can split the transaction implement
    /// this together with [`RegisterBus::read_raw`].
    fn write_pointer(&mut self, _register_address: u8) -> Result<()> {
        Err(TransportError::Unsupported("pointer writes not supported"))
    }

    /// Read `len` bytes from the current register pointer.
    fn read_raw(&mut self, _len: usize) -> Result<Vec<u8>> {
        Err(TransportError::Unsupported("raw reads not supported"))
    }
}

/// A blocking byte-stream link for serial sensors (Modbus RTU, framed UART).
pub trait SerialLink {
    /// Transmit a payload.
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Receive exactly `len` bytes, honoring the link's configured timeout.
    fn recv(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Consume input until `delimiter` has been seen, scanning at most `max`
    /// bytes. Returns nothing; the next [`SerialLink::recv`] starts right
    /// after the delimiter.
    fn recv_until(&mut self, delimiter: &[u8], max: usize) -> Result<()>;

    /// Discard any pending input.
    fn flush_input(&mut self) -> Result<()>;
}
