//! Driver for the Texas Instruments HDC1080 humidity/temperature sensor.
//!
//! The part cannot be read in one combined transaction: a conversion must
//! be triggered by addressing the measurement register, and the result can
//! only be read after the conversion time has elapsed. The driver uses the
//! transport's pointer-write/raw-read split for that path; configuration
//! and identity registers go through the normal register access machinery.

use crate::fields::require_u64;
use crate::{AddressPin, Result, SensorError};
use bus_transport::RegisterBus;
use register_codec::{
    CachePolicy, CodecError, Device, Encoder, Field, FieldValue, LinearTransfer, LookupTable,
    Register, RegisterAccess,
};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;

pub const DEVICE_ID: u64 = 0x1050;
pub const MANUFACTURER_ID: u64 = 0x5449;

/// Worst-case conversion time, used before the resolution is known.
const DEFAULT_MEASUREMENT: Duration = Duration::from_millis(15);
/// Max startup time after a soft reset, per datasheet.
const RESET_SETTLE: Duration = Duration::from_millis(15);
const RETRY_PAUSE: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureResolution {
    Bits11,
    Bits14,
}

impl TemperatureResolution {
    fn bits(self) -> u64 {
        match self {
            TemperatureResolution::Bits11 => 11,
            TemperatureResolution::Bits14 => 14,
        }
    }

    fn conversion_ms(self) -> f64 {
        match self {
            TemperatureResolution::Bits11 => 3.65,
            TemperatureResolution::Bits14 => 6.35,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumidityResolution {
    Bits8,
    Bits11,
    Bits14,
}

impl HumidityResolution {
    fn bits(self) -> u64 {
        match self {
            HumidityResolution::Bits8 => 8,
            HumidityResolution::Bits11 => 11,
            HumidityResolution::Bits14 => 14,
        }
    }

    fn conversion_ms(self) -> f64 {
        match self {
            HumidityResolution::Bits8 => 2.5,
            HumidityResolution::Bits11 => 3.85,
            HumidityResolution::Bits14 => 6.5,
        }
    }
}

/// Which quantities a triggered conversion covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    Both,
    TemperatureOnly,
    HumidityOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
}

fn build_descriptor() -> Result<Device, CodecError> {
    // T = raw * 165 / 2^16 - 40; RH = raw * 100 / 2^16
    let temperature_transfer = || LinearTransfer::new(65536.0 / 165.0, 40.0).decode_only();
    let humidity_transfer = || LinearTransfer::new(65536.0 / 100.0, 0.0).decode_only();
    Device::new("hdc1080", DEVICE_ID)
        // single fixed address, both pin levels map to it
        .address(0, 0x40)
        .address(1, 0x40)
        .register(
            Register::new("device_id", 0xFF)
                .width_bits(16)
                .read_only()
                .non_volatile()
                .field(Field::new("device_id").bytes(0..=1)),
        )
        .register(
            Register::new("manufacturer_id", 0xFE)
                .width_bits(16)
                .read_only()
                .non_volatile()
                .field(Field::new("manufacturer_id").bytes(0..=1)),
        )
        .register(
            Register::new("serial_id", 0xFB)
                .width_bits(48)
                .read_only()
                .non_volatile()
                .field(Field::new("serial_id").byte_index(&[0, 1, 2, 3, 4])),
        )
        .register(
            Register::new("config", 0x02)
                .width_bits(16)
                .field(Field::new("reset").mask(0b1000_0000))
                .field(Field::new("heater_on").mask(0b0010_0000))
                .field(Field::new("measure_both").mask(0b0001_0000))
                .field(Field::new("battery_low").read_only().mask(0b0000_1000))
                .field(
                    Field::new("temp_res_bits")
                        .mask(0b0000_0100)
                        .encoder(Encoder::Lookup(LookupTable::of_u64(&[(14, 0), (11, 1)]))),
                )
                .field(
                    Field::new("rh_res_bits")
                        .mask(0b0000_0011)
                        .encoder(Encoder::Lookup(LookupTable::of_u64(&[
                            (14, 0b00),
                            (11, 0b01),
                            (8, 0b10),
                        ]))),
                )
                // second byte must be null
                .field(Field::new("reserved").bytes(1..=1)),
        )
        .register(
            Register::new("temperature", 0x00)
                .width_bits(16)
                .read_only()
                .field(
                    Field::new("temperature")
                        .bytes(0..=1)
                        .encoder(Encoder::Linear(temperature_transfer())),
                ),
        )
        .register(
            Register::new("humidity", 0x01)
                .width_bits(16)
                .read_only()
                .field(
                    Field::new("humidity")
                        .bytes(0..=1)
                        .encoder(Encoder::Linear(humidity_transfer())),
                ),
        )
        // both quantities in one burst when measure_both is set
        .register(
            Register::new("data", 0x00)
                .width_bits(32)
                .read_only()
                .field(
                    Field::new("temperature")
                        .bytes(0..=1)
                        .encoder(Encoder::Linear(temperature_transfer())),
                )
                .field(
                    Field::new("humidity")
                        .bytes(2..=3)
                        .encoder(Encoder::Linear(humidity_transfer())),
                ),
        )
        .build()
}

/// Shared descriptor for every HDC1080 instance.
pub fn descriptor() -> Result<&'static Device, CodecError> {
    static DESCRIPTOR: OnceLock<Device> = OnceLock::new();
    if let Some(d) = DESCRIPTOR.get() {
        return Ok(d);
    }
    let built = build_descriptor()?;
    Ok(DESCRIPTOR.get_or_init(|| built))
}

pub struct Hdc1080<B: RegisterBus> {
    bus: B,
    config: RegisterAccess,
    device_id: RegisterAccess,
    manufacturer_id: RegisterAccess,
    serial_id: RegisterAccess,
    data: &'static Register,
    temperature: &'static Register,
    humidity: &'static Register,
}

impl<B: RegisterBus> Hdc1080<B> {
    pub fn new(bus: B, pin: AddressPin) -> Result<Self> {
        let device = descriptor()?;
        device.address(pin.level())?;
        Ok(Self {
            bus,
            config: RegisterAccess::new(device, "config")?,
            device_id: RegisterAccess::new(device, "device_id")?,
            manufacturer_id: RegisterAccess::new(device, "manufacturer_id")?,
            serial_id: RegisterAccess::new(device, "serial_id")?,
            data: device.register("data")?,
            temperature: device.register("temperature")?,
            humidity: device.register("humidity")?,
        })
    }

    pub fn probe(&mut self) -> Result<()> {
        let map = self.device_id.read(&mut self.bus, false)?;
        let got = require_u64(&map, "device_id")?;
        if got != DEVICE_ID {
            return Err(SensorError::ChipIdMismatch {
                expected: DEVICE_ID,
                got,
            });
        }
        Ok(())
    }

    pub fn device_id(&mut self) -> Result<u64> {
        let map = self.device_id.read(&mut self.bus, false)?;
        require_u64(&map, "device_id")
    }

    pub fn manufacturer_id(&mut self) -> Result<u64> {
        let map = self.manufacturer_id.read(&mut self.bus, false)?;
        require_u64(&map, "manufacturer_id")
    }

    pub fn serial_id(&mut self) -> Result<u64> {
        let map = self.serial_id.read(&mut self.bus, false)?;
        require_u64(&map, "serial_id")
    }

    /// Configure heater, measurement resolutions, and acquisition mode.
    ///
    /// Lower resolutions trade precision for conversion time: 14-bit
    /// temperature resolves about 0.01 degC, 11-bit about 0.08 degC; 14-bit
    /// humidity about 0.006 %RH, 8-bit about 0.4 %RH.
    pub fn set_config(
        &mut self,
        heater_on: bool,
        temperature_resolution: TemperatureResolution,
        humidity_resolution: HumidityResolution,
        measure_both: bool,
        soft_reset: bool,
    ) -> Result<()> {
        self.config.write(
            &mut self.bus,
            &[
                ("reset", FieldValue::U64(u64::from(soft_reset))),
                ("heater_on", FieldValue::U64(u64::from(heater_on))),
                ("measure_both", FieldValue::U64(u64::from(measure_both))),
                (
                    "temp_res_bits",
                    FieldValue::U64(temperature_resolution.bits()),
                ),
                ("rh_res_bits", FieldValue::U64(humidity_resolution.bits())),
                ("reserved", FieldValue::U64(0)),
            ],
            CachePolicy::Optimistic,
        )?;
        if soft_reset {
            std::thread::sleep(RESET_SETTLE);
        }
        Ok(())
    }

    /// Conversion time implied by the configured resolutions; the
    /// worst-case default until the config register has been seen.
    pub fn measurement_duration(&self) -> Duration {
        let cached = match self.config.cached() {
            Some(cached) => cached,
            None => return DEFAULT_MEASUREMENT,
        };
        let temp_ms = match cached.get("temp_res_bits").and_then(FieldValue::as_u64) {
            Some(11) => TemperatureResolution::Bits11.conversion_ms(),
            Some(14) => TemperatureResolution::Bits14.conversion_ms(),
            _ => return DEFAULT_MEASUREMENT,
        };
        let rh_ms = match cached.get("rh_res_bits").and_then(FieldValue::as_u64) {
            Some(8) => HumidityResolution::Bits8.conversion_ms(),
            Some(11) => HumidityResolution::Bits11.conversion_ms(),
            Some(14) => HumidityResolution::Bits14.conversion_ms(),
            _ => return DEFAULT_MEASUREMENT,
        };
        let both = cached
            .get("measure_both")
            .map(FieldValue::is_set)
            .unwrap_or(false);
        let ms = if both { temp_ms + rh_ms } else { temp_ms.max(rh_ms) };
        Duration::from_secs_f64(ms / 1000.0 + 0.001)
    }

    /// Reset every register cache to all-unknown after retry exhaustion.
    pub fn invalidate_caches(&mut self) {
        self.config.invalidate();
        self.device_id.invalidate();
        self.manufacturer_id.invalidate();
        self.serial_id.invalidate();
    }

    fn trigger_register(&self, which: Measurement) -> &'static Register {
        match which {
            Measurement::Both => self.data,
            Measurement::TemperatureOnly => self.temperature,
            Measurement::HumidityOnly => self.humidity,
        }
    }

    /// Begin a conversion without waiting for the result.
    pub fn trigger_measurement(&mut self, which: Measurement) -> Result<()> {
        self.bus
            .write_pointer(self.trigger_register(which).address())?;
        Ok(())
    }

    /// Trigger a conversion, wait it out, and decode the result.
    pub fn read_measurement(&mut self, which: Measurement) -> Result<Reading> {
        let register = self.trigger_register(which);
        self.trigger_measurement(which)?;
        std::thread::sleep(self.measurement_duration());
        let raw = match self.bus.read_raw(register.width_bytes()) {
            Ok(raw) => raw,
            Err(_) => {
                std::thread::sleep(RETRY_PAUSE);
                self.bus.read_raw(register.width_bytes())?
            }
        };
        let map = register.decode_fields(&raw)?;
        Ok(Reading {
            temperature_c: map.get("temperature").and_then(FieldValue::as_f64),
            humidity_pct: map.get("humidity").and_then(FieldValue::as_f64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_transport::{BusOp, MockRegisterBus};

    fn mocked_bus() -> MockRegisterBus {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0xFF, &[0x10, 0x50]);
        bus.set_register(0xFE, &[0x54, 0x49]);
        bus.set_register(0xFB, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x00]);
        // temperature 0x6666 -> 26.0 C, humidity 0x8000 -> 50.0 %RH
        bus.set_register(0x00, &[0x66, 0x66, 0x80, 0x00]);
        bus.set_register(0x01, &[0x80, 0x00]);
        bus
    }

    #[test]
    fn test_probe_and_ids() {
        let mut hdc = Hdc1080::new(mocked_bus(), AddressPin::Low).unwrap();
        hdc.probe().unwrap();
        assert_eq!(hdc.manufacturer_id().unwrap(), MANUFACTURER_ID);
        assert_eq!(hdc.serial_id().unwrap(), 0x0102030405);
    }

    #[test]
    fn test_set_config_packs_two_bytes() {
        let mut hdc = Hdc1080::new(mocked_bus(), AddressPin::Low).unwrap();
        hdc.set_config(
            false,
            TemperatureResolution::Bits14,
            HumidityResolution::Bits14,
            true,
            false,
        )
        .unwrap();
        assert_eq!(hdc.bus.register(0x02), Some(&[0x10, 0x00][..]));
    }

    #[test]
    fn test_battery_low_is_not_writable() {
        let mut hdc = Hdc1080::new(mocked_bus(), AddressPin::Low).unwrap();
        let err = hdc
            .config
            .write(
                &mut hdc.bus,
                &[("battery_low", FieldValue::U64(0))],
                CachePolicy::Deferred,
            )
            .unwrap_err();
        assert!(matches!(err, CodecError::ReadOnly { .. }));
    }

    #[test]
    fn test_measurement_duration_defaults_before_config() {
        let hdc = Hdc1080::new(mocked_bus(), AddressPin::Low).unwrap();
        assert_eq!(hdc.measurement_duration(), DEFAULT_MEASUREMENT);
    }

    #[test]
    fn test_measurement_duration_from_cached_config() {
        let mut hdc = Hdc1080::new(mocked_bus(), AddressPin::Low).unwrap();
        hdc.set_config(
            false,
            TemperatureResolution::Bits14,
            HumidityResolution::Bits14,
            true,
            false,
        )
        .unwrap();
        let d = hdc.measurement_duration().as_secs_f64();
        assert!((d - 0.01385).abs() < 1e-6);

        hdc.set_config(
            false,
            TemperatureResolution::Bits11,
            HumidityResolution::Bits8,
            false,
            false,
        )
        .unwrap();
        let d = hdc.measurement_duration().as_secs_f64();
        assert!((d - 0.00465).abs() < 1e-6);
    }

    #[test]
    fn test_read_measurement_uses_pointer_then_raw_read() {
        let mut hdc = Hdc1080::new(mocked_bus(), AddressPin::Low).unwrap();
        let reading = hdc.read_measurement(Measurement::Both).unwrap();
        let t = reading.temperature_c.unwrap();
        let rh = reading.humidity_pct.unwrap();
        assert!((t - 26.0).abs() < 0.01);
        assert!((rh - 50.0).abs() < 0.01);
        let ops = hdc.bus.ops();
        assert!(matches!(ops[0], BusOp::Pointer { address: 0x00 }));
        assert!(matches!(ops[1], BusOp::Raw { len: 4 }));
    }

    #[test]
    fn test_humidity_only_measurement() {
        let mut hdc = Hdc1080::new(mocked_bus(), AddressPin::Low).unwrap();
        let reading = hdc.read_measurement(Measurement::HumidityOnly).unwrap();
        assert!(reading.temperature_c.is_none());
        assert!((reading.humidity_pct.unwrap() - 50.0).abs() < 0.01);
        assert!(matches!(
            hdc.bus.ops()[0],
            BusOp::Pointer { address: 0x01 }
        ));
    }

    #[test]
    fn test_measurement_registers_are_decode_only() {
        let dev = descriptor().unwrap();
        let field = dev.register("temperature").unwrap().field("temperature").unwrap();
        let err = field.encode(&FieldValue::F64(20.0)).unwrap_err();
        assert!(matches!(err, CodecError::ReadOnly { .. }));
    }
}
