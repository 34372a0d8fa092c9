use crate::error::{CodecError, Result};
use crate::register::{Register, RegisterBuilder};
use std::collections::BTreeMap;

/// Static description of one hardware device model: chip identifier,
/// selectable bus addresses, and its named registers.
///
/// Built once per model (drivers keep theirs in a `OnceLock`) and shared by
/// reference across every instance of that model; nothing here is mutated
/// by reads or writes. Build-time checks catch descriptor bugs before any
/// bus traffic: duplicate register names, an empty address map, and every
/// field-level configuration error.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    name: &'static str,
    chip_id: u64,
    addresses: BTreeMap<u8, u8>,
    registers: Vec<Register>,
    word_size: u32,
}

impl Device {
    /// Start describing a device. Word size defaults to 8 bits.
    pub fn new(name: &'static str, chip_id: u64) -> DeviceBuilder {
        DeviceBuilder {
            name,
            chip_id,
            addresses: BTreeMap::new(),
            registers: Vec::new(),
            word_size: 8,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The chip-identifier constant expected from the identity register.
    pub fn chip_id(&self) -> u64 {
        self.chip_id
    }

    pub fn word_size(&self) -> u32 {
        self.word_size
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    pub fn register(&self, name: &str) -> Result<&Register> {
        self.registers
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| CodecError::NoSuchRegister {
                device: self.name.to_string(),
                register: name.to_string(),
            })
    }

    /// Bus address for a strap-pin logic level (0 or 1).
    pub fn address(&self, level: u8) -> Result<u8> {
        self.addresses
            .get(&level)
            .copied()
            .ok_or(CodecError::UnknownAddressLevel {
                device: self.name.to_string(),
                level,
            })
    }
}

#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    name: &'static str,
    chip_id: u64,
    addresses: BTreeMap<u8, u8>,
    registers: Vec<RegisterBuilder>,
    word_size: u32,
}

impl DeviceBuilder {
    /// Map a strap-pin logic level to a bus address.
    pub fn address(mut self, level: u8, bus_address: u8) -> Self {
        self.addresses.insert(level, bus_address);
        self
    }

    pub fn register(mut self, register: RegisterBuilder) -> Self {
        self.registers.push(register);
        self
    }

    pub fn word_size(mut self, bits: u32) -> Self {
        self.word_size = bits;
        self
    }

    pub fn build(self) -> Result<Device> {
        if self.addresses.is_empty() {
            return Err(CodecError::EmptyAddressMap {
                device: self.name.to_string(),
            });
        }
        let mut registers = Vec::with_capacity(self.registers.len());
        for builder in self.registers {
            let register = builder.build()?;
            if registers.iter().any(|r: &Register| r.name() == register.name()) {
                return Err(CodecError::DuplicateRegister {
                    device: self.name.to_string(),
                    register: register.name().to_string(),
                });
            }
            registers.push(register);
        }
        Ok(Device {
            name: self.name,
            chip_id: self.chip_id,
            addresses: self.addresses,
            registers,
            word_size: self.word_size,
        })
    }
}
