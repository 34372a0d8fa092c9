use crate::{RegisterBus, Result, SerialLink, TransportError};
use std::collections::HashMap;

/// One recorded bus transaction. Tests assert against these to prove that
/// a code path did (or did not) touch the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BusOp {
    Read { address: u8, len: usize },
    Write { address: u8, payload: Vec<u8> },
    Pointer { address: u8 },
    Raw { len: usize },
}

/// In-process register space standing in for an I2C device.
///
/// Registers are plain byte vectors keyed by address. Every operation is
/// recorded in order. `fail_next` makes the next operation fail once, for
/// exercising retry and cache-invalidation paths.
#[derive(Debug, Default)]
pub struct MockRegisterBus {
    space: HashMap<u8, Vec<u8>>,
    pointer: Option<u8>,
    ops: Vec<BusOp>,
    fail_next: Option<TransportError>,
}

impl MockRegisterBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a register with raw bytes.
    pub fn set_register(&mut self, address: u8, bytes: &[u8]) {
        self.space.insert(address, bytes.to_vec());
    }

    /// Raw bytes currently held at a register address.
    pub fn register(&self, address: u8) -> Option<&[u8]> {
        self.space.get(&address).map(Vec::as_slice)
    }

    /// All transactions recorded so far, in order.
    pub fn ops(&self) -> &[BusOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn read_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, BusOp::Read { .. } | BusOp::Raw { .. }))
            .count()
    }

    pub fn write_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, BusOp::Write { .. }))
            .count()
    }

    /// Make the next transaction fail with `err`, once.
    pub fn fail_next(&mut self, err: TransportError) {
        self.fail_next = Some(err);
    }

    fn take_failure(&mut self) -> Result<()> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl RegisterBus for MockRegisterBus {
    fn read_bytes(&mut self, register_address: u8, len: usize) -> Result<Vec<u8>> {
        self.ops.push(BusOp::Read {
            address: register_address,
            len,
        });
        self.take_failure()?;
        let bytes = self
            .space
            .get(&register_address)
            .ok_or(TransportError::Nack {
                address: register_address,
            })?;
        if bytes.len() < len {
            return Err(TransportError::InvalidFrame("register shorter than read"));
        }
        Ok(bytes[..len].to_vec())
    }

    fn write_bytes(&mut self, register_address: u8, payload: &[u8]) -> Result<()> {
        self.ops.push(BusOp::Write {
            address: register_address,
            payload: payload.to_vec(),
        });
        self.take_failure()?;
        self.space.insert(register_address, payload.to_vec());
        Ok(())
    }

    fn write_pointer(&mut self, register_address: u8) -> Result<()> {
        self.ops.push(BusOp::Pointer {
            address: register_address,
        });
        self.take_failure()?;
        self.pointer = Some(register_address);
        Ok(())
    }

    fn read_raw(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ops.push(BusOp::Raw { len });
        self.take_failure()?;
        let address = self
            .pointer
            .ok_or(TransportError::InvalidFrame("pointer not set"))?;
        let bytes = self
            .space
            .get(&address)
            .ok_or(TransportError::Nack { address })?;
        if bytes.len() < len {
            return Err(TransportError::InvalidFrame("register shorter than read"));
        }
        Ok(bytes[..len].to_vec())
    }
}

/// Scripted serial link: inbound bytes come from a pre-loaded stream,
/// outbound payloads are recorded for assertions.
#[derive(Debug, Default)]
pub struct MockSerialLink {
    inbound: Vec<u8>,
    cursor: usize,
    sent: Vec<Vec<u8>>,
}

impl MockSerialLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the inbound stream.
    pub fn push_response(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// Everything the driver has transmitted, in order.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }
}

impl SerialLink for MockSerialLink {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.sent.push(payload.to_vec());
        Ok(())
    }

    fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
        let end = self.cursor + len;
        if end > self.inbound.len() {
            return Err(TransportError::Timeout);
        }
        let out = self.inbound[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(out)
    }

    fn recv_until(&mut self, delimiter: &[u8], max: usize) -> Result<()> {
        let limit = self.inbound.len().min(self.cursor + max);
        let window = &self.inbound[self.cursor..limit];
        match window
            .windows(delimiter.len())
            .position(|w| w == delimiter)
        {
            Some(pos) => {
                self.cursor += pos + delimiter.len();
                Ok(())
            }
            None => Err(TransportError::Timeout),
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        // The scripted stream stands for bytes that arrive after the flush,
        // so there is nothing to discard.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_bus_records_ops() {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0xF4, &[0xAB]);
        let got = bus.read_bytes(0xF4, 1).unwrap();
        assert_eq!(got, vec![0xAB]);
        bus.write_bytes(0xF4, &[0x57]).unwrap();
        assert_eq!(bus.read_count(), 1);
        assert_eq!(bus.write_count(), 1);
        assert_eq!(bus.register(0xF4), Some(&[0x57][..]));
    }

    #[test]
    fn test_mock_bus_nack_on_unknown_register() {
        let mut bus = MockRegisterBus::new();
        let err = bus.read_bytes(0x10, 1).unwrap_err();
        assert!(matches!(err, TransportError::Nack { address: 0x10 }));
    }

    #[test]
    fn test_mock_bus_fail_next_fails_once() {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0x00, &[0x01]);
        bus.fail_next(TransportError::Timeout);
        assert!(bus.read_bytes(0x00, 1).is_err());
        assert!(bus.read_bytes(0x00, 1).is_ok());
    }

    #[test]
    fn test_mock_serial_recv_until_skips_to_delimiter() {
        let mut link = MockSerialLink::new();
        link.push_response(&[0x00, 0x42, 0x4D, 0xAA, 0xBB]);
        link.recv_until(&[0x42, 0x4D], 16).unwrap();
        assert_eq!(link.recv(2).unwrap(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_mock_serial_short_read_times_out() {
        let mut link = MockSerialLink::new();
        link.push_response(&[0x01]);
        assert!(matches!(link.recv(4), Err(TransportError::Timeout)));
    }
}
