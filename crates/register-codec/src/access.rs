use crate::device::Device;
use crate::error::{CodecError, Result};
use crate::register::{Access, Register};
use crate::value::FieldValue;
use bus_transport::RegisterBus;
use std::collections::BTreeMap;
use tracing::trace;

/// What to do with the cache after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Record the written values as the register's current contents, so a
    /// following read of a non-volatile or slow register can be skipped.
    Optimistic,
    /// Leave the cache alone; the hardware state changes asynchronously
    /// (e.g. a triggered measurement) and only a real read may refresh it.
    Deferred,
}

/// Per-register read/write facade with a last-known-value cache.
///
/// One instance per physical register per device instance. The transport
/// is supplied on each call, so the device driver keeps sole ownership of
/// its bus. The cache is either unpopulated (`None`, before the first
/// successful read or after [`RegisterAccess::invalidate`]) or holds the
/// full field map of the last successful read; it is replaced wholesale,
/// never partially updated by a read.
#[derive(Debug)]
pub struct RegisterAccess {
    reg: &'static Register,
    n_bytes: usize,
    cache: Option<BTreeMap<&'static str, FieldValue>>,
}

impl RegisterAccess {
    pub fn new(device: &'static Device, register: &str) -> Result<Self> {
        let reg = device.register(register)?;
        Ok(Self {
            reg,
            n_bytes: (reg.n_bits() / device.word_size()) as usize,
            cache: None,
        })
    }

    pub fn register(&self) -> &'static Register {
        self.reg
    }

    /// Last successfully read values, if any.
    pub fn cached(&self) -> Option<&BTreeMap<&'static str, FieldValue>> {
        self.cache.as_ref()
    }

    /// Read the register's current field values.
    ///
    /// Non-volatile registers that have been read at least once are served
    /// from the cache without touching the transport unless `ignore_cache`
    /// is set. A decode failure leaves the previous cache contents intact.
    pub fn read<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        ignore_cache: bool,
    ) -> Result<BTreeMap<&'static str, FieldValue>> {
        if self.reg.access() == Access::WriteOnly {
            return Err(CodecError::WriteOnly {
                target: format!("register {}", self.reg.name()),
            });
        }
        if self.reg.non_volatile() && !ignore_cache {
            if let Some(cached) = &self.cache {
                trace!(register = self.reg.name(), "cache hit, skipping bus read");
                return Ok(cached.clone());
            }
        }
        let raw = bus.read_bytes(self.reg.address(), self.n_bytes)?;
        let decoded = self.reg.decode_fields(&raw)?;
        self.cache = Some(decoded.clone());
        Ok(decoded)
    }

    /// Encode and write field values.
    ///
    /// Validation and encoding happen before any bus traffic: an unknown
    /// field, a read-only field, or an encode failure aborts with nothing
    /// written. Write-only registers never cache, whatever the policy.
    pub fn write<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        values: &[(&'static str, FieldValue)],
        policy: CachePolicy,
    ) -> Result<()> {
        if self.reg.access() == Access::ReadOnly {
            return Err(CodecError::ReadOnly {
                target: format!("register {}", self.reg.name()),
            });
        }
        for (name, _) in values {
            if self.reg.field(name)?.read_only() {
                return Err(CodecError::ReadOnly {
                    target: format!("field {name}"),
                });
            }
        }
        let payload = self.reg.encode_fields(values)?;
        bus.write_bytes(self.reg.address(), &payload)?;
        if policy == CachePolicy::Optimistic && self.reg.access() != Access::WriteOnly {
            let cache = self.cache.get_or_insert_with(BTreeMap::new);
            for (name, value) in values {
                cache.insert(*name, value.clone());
            }
        }
        Ok(())
    }

    /// Reset the cache to all-unknown. Called by the orchestration layer
    /// when its bounded retries are exhausted, so stale values are never
    /// reported as fresh.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, LookupTable};
    use crate::field::Field;
    use bus_transport::{MockRegisterBus, TransportError};
    use std::sync::OnceLock;

    fn test_device() -> &'static Device {
        static DEVICE: OnceLock<Device> = OnceLock::new();
        if let Some(d) = DEVICE.get() {
            return d;
        }
        let built = Device::new("testchip", 0xAB)
            .address(0, 0x76)
            .register(
                Register::new("chip_id", 0xD0)
                    .read_only()
                    .non_volatile()
                    .field(Field::new("id")),
            )
            .register(
                Register::new("ctrl", 0xF4)
                    .field(Field::new("hi").mask(0xF0))
                    .field(Field::new("locked").read_only().mask(0x08))
                    .field(
                        Field::new("mode")
                            .mask(0x03)
                            .encoder(Encoder::Lookup(LookupTable::of_text(&[
                                ("sleep", 0b00),
                                ("normal", 0b11),
                            ]))),
                    ),
            )
            .register(
                Register::new("status", 0xF3)
                    .read_only()
                    .field(Field::new("busy").mask(0x08))
                    .field(Field::new("flag").read_only().mask(0x01)),
            )
            .register(Register::new("reset", 0xE0).write_only().field(Field::new("reset")))
            .build()
            .unwrap();
        DEVICE.get_or_init(|| built)
    }

    #[test]
    fn test_cache_hit_avoids_io_for_non_volatile() {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0xD0, &[0xAB]);
        let mut access = RegisterAccess::new(test_device(), "chip_id").unwrap();

        let first = access.read(&mut bus, false).unwrap();
        assert_eq!(first["id"], FieldValue::U64(0xAB));
        assert_eq!(bus.read_count(), 1);

        let second = access.read(&mut bus, false).unwrap();
        assert_eq!(second["id"], FieldValue::U64(0xAB));
        assert_eq!(bus.read_count(), 1, "second read must be a cache hit");

        access.read(&mut bus, true).unwrap();
        assert_eq!(bus.read_count(), 2, "ignore_cache must hit the bus");
    }

    #[test]
    fn test_volatile_register_always_reads() {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0xF3, &[0x08]);
        let mut access = RegisterAccess::new(test_device(), "status").unwrap();
        access.read(&mut bus, false).unwrap();
        access.read(&mut bus, false).unwrap();
        assert_eq!(bus.read_count(), 2);
    }

    #[test]
    fn test_write_then_optimistic_cache() {
        let mut bus = MockRegisterBus::new();
        let mut access = RegisterAccess::new(test_device(), "ctrl").unwrap();
        access
            .write(
                &mut bus,
                &[
                    ("hi", FieldValue::U64(0b0001)),
                    ("mode", FieldValue::text("normal")),
                ],
                CachePolicy::Optimistic,
            )
            .unwrap();
        assert_eq!(bus.register(0xF4), Some(&[0b0001_0011][..]));
        let cached = access.cached().unwrap();
        assert_eq!(cached["mode"], FieldValue::text("normal"));
    }

    #[test]
    fn test_write_deferred_leaves_cache_unknown() {
        let mut bus = MockRegisterBus::new();
        let mut access = RegisterAccess::new(test_device(), "ctrl").unwrap();
        access
            .write(
                &mut bus,
                &[("mode", FieldValue::text("sleep"))],
                CachePolicy::Deferred,
            )
            .unwrap();
        assert!(access.cached().is_none());
    }

    #[test]
    fn test_validation_rejects_before_io() {
        let mut bus = MockRegisterBus::new();
        let mut access = RegisterAccess::new(test_device(), "ctrl").unwrap();
        let err = access
            .write(
                &mut bus,
                &[("mode", FieldValue::text("turbo"))],
                CachePolicy::Optimistic,
            )
            .unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange { .. }));
        assert_eq!(bus.write_count(), 0, "no bus traffic on invalid input");
    }

    #[test]
    fn test_read_only_register_rejects_write() {
        let mut bus = MockRegisterBus::new();
        let mut access = RegisterAccess::new(test_device(), "status").unwrap();
        let err = access
            .write(&mut bus, &[("busy", FieldValue::U64(1))], CachePolicy::Deferred)
            .unwrap_err();
        assert!(matches!(err, CodecError::ReadOnly { .. }));
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn test_read_only_field_rejects_write() {
        let mut bus = MockRegisterBus::new();
        let mut access = RegisterAccess::new(test_device(), "ctrl").unwrap();
        let err = access
            .write(
                &mut bus,
                &[("locked", FieldValue::U64(1))],
                CachePolicy::Deferred,
            )
            .unwrap_err();
        assert!(matches!(err, CodecError::ReadOnly { .. }));
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn test_unknown_field_rejects_write() {
        let mut bus = MockRegisterBus::new();
        let mut access = RegisterAccess::new(test_device(), "ctrl").unwrap();
        let err = access
            .write(&mut bus, &[("flag", FieldValue::U64(1))], CachePolicy::Deferred)
            .unwrap_err();
        assert!(matches!(err, CodecError::NoSuchField { .. }));
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn test_write_only_register_rejects_read_and_never_caches() {
        let mut bus = MockRegisterBus::new();
        let mut access = RegisterAccess::new(test_device(), "reset").unwrap();
        let err = access.read(&mut bus, false).unwrap_err();
        assert!(matches!(err, CodecError::WriteOnly { .. }));
        assert_eq!(bus.read_count(), 0);

        access
            .write(
                &mut bus,
                &[("reset", FieldValue::U64(0xB6))],
                CachePolicy::Optimistic,
            )
            .unwrap();
        assert!(access.cached().is_none());
    }

    #[test]
    fn test_decode_failure_leaves_cache_intact() {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0xF4, &[0b0000_0011]);
        let mut access = RegisterAccess::new(test_device(), "ctrl").unwrap();
        let good = access.read(&mut bus, false).unwrap();
        assert_eq!(good["mode"], FieldValue::text("normal"));

        // 0b01 has no lookup entry
        bus.set_register(0xF4, &[0b0000_0001]);
        assert!(access.read(&mut bus, false).is_err());
        let cached = access.cached().unwrap();
        assert_eq!(cached["mode"], FieldValue::text("normal"));
    }

    #[test]
    fn test_transport_error_propagates_and_invalidate_resets() {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0xD0, &[0xAB]);
        let mut access = RegisterAccess::new(test_device(), "chip_id").unwrap();
        access.read(&mut bus, false).unwrap();
        assert!(access.cached().is_some());

        bus.fail_next(TransportError::Timeout);
        let err = access.read(&mut bus, true).unwrap_err();
        assert!(matches!(err, CodecError::Transport(_)));
        assert!(access.cached().is_some(), "framework does not auto-reset");

        access.invalidate();
        assert!(access.cached().is_none());
    }
}
