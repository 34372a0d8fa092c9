//! Driver for the ScioSense CCS811 eTVOC/eCO2 sensor.

use crate::fields::{flag, require_f64, require_u64};
use crate::{AddressPin, Result, SensorError};
use bus_transport::RegisterBus;
use register_codec::{
    CachePolicy, CodecError, Device, Encoder, Field, FieldValue, LinearTransfer, LookupTable,
    Register, RegisterAccess,
};
use serde::Serialize;
use std::sync::OnceLock;
use tracing::debug;

pub const CHIP_ID: u64 = 0x81;

/// Mailbox address that transitions the part from boot to application mode.
const APP_START: u8 = 0xF4;
/// Reset register magic, per datasheet.
const RESET_MAGIC: [u8; 4] = [0x11, 0xE5, 0x72, 0x8A];
/// 10-bit ADC referenced to 1.65 V.
const VOLTS_PER_LSB: f64 = 1.65 / 1023.0;

/// Measurement drive mode: how often the sensor runs a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePeriod {
    Idle,
    EverySecond,
    Every10Seconds,
    EveryMinute,
    Every250Ms,
}

impl SamplePeriod {
    fn seconds(self) -> f64 {
        match self {
            SamplePeriod::Idle => 0.0,
            SamplePeriod::EverySecond => 1.0,
            SamplePeriod::Every10Seconds => 10.0,
            SamplePeriod::EveryMinute => 60.0,
            SamplePeriod::Every250Ms => 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub app_on: bool,
    pub app_erase: bool,
    pub app_verify: bool,
    pub app_valid: bool,
    pub data_ready: bool,
    pub error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorFlags {
    pub invalid_write: bool,
    pub invalid_read: bool,
    pub invalid_mode: bool,
    pub max_resistance: bool,
    pub heater_fault: bool,
    pub heater_supply: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AirQuality {
    pub eco2_ppm: u64,
    pub tvoc_ppb: u64,
}

/// Raw sense-resistor ADC values; read-only on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawAdc {
    pub current_ua: f64,
    pub voltage_v: f64,
}

fn build_descriptor() -> Result<Device, CodecError> {
    Device::new("ccs811", CHIP_ID)
        .address(0, 0x5A)
        .address(1, 0x5B)
        .register(
            Register::new("status", 0x00)
                .read_only()
                .field(Field::new("app_on").mask(0b1000_0000))
                .field(Field::new("app_erase").mask(0b0100_0000))
                .field(Field::new("app_verify").mask(0b0010_0000))
                .field(Field::new("app_valid").mask(0b0001_0000))
                .field(Field::new("data_ready").mask(0b0000_1000))
                .field(Field::new("error").read_only().mask(0b0000_0001)),
        )
        .register(
            Register::new("meas_mode", 0x01)
                .field(
                    Field::new("sample_period")
                        .mask(0b0111_0000)
                        .encoder(Encoder::Lookup(LookupTable::of_f64(&[
                            (0.0, 0b000),
                            (1.0, 0b001),
                            (10.0, 0b010),
                            (60.0, 0b011),
                            (0.25, 0b100),
                        ]))),
                )
                .field(Field::new("interrupts_on").mask(0b0000_1000))
                .field(Field::new("interrupt_on_thresh").mask(0b0000_0100)),
        )
        .register(
            Register::new("data", 0x02)
                .width_bits(32)
                .read_only()
                .field(Field::new("eco2").bytes(0..=1))
                .field(Field::new("tvoc").bytes(2..=3)),
        )
        .register(
            Register::new("raw_data", 0x03)
                .width_bits(16)
                .read_only()
                .field(
                    Field::new("current")
                        .mask(0b1111_1100)
                        .encoder(Encoder::Linear(LinearTransfer::new(1.0, 0.0).decode_only())),
                )
                .field(
                    Field::new("voltage")
                        .bytes(0..=1)
                        .mask(0x03FF)
                        .encoder(Encoder::Linear(
                            LinearTransfer::new(1.0 / VOLTS_PER_LSB, 0.0).decode_only(),
                        )),
                ),
        )
        .register(
            Register::new("env_data", 0x05)
                .width_bits(32)
                .field(
                    Field::new("humidity")
                        .bytes(0..=1)
                        .encoder(Encoder::Linear(LinearTransfer::new(512.0, 0.0))),
                )
                .field(
                    Field::new("temperature")
                        .bytes(2..=3)
                        .encoder(Encoder::Linear(
                            LinearTransfer::new(512.0, 25.0).with_floor(0.0),
                        )),
                ),
        )
        .register(
            Register::new("baseline", 0x11)
                .width_bits(16)
                .field(Field::new("baseline").bytes(0..=1)),
        )
        .register(
            Register::new("chip_id", 0x20)
                .read_only()
                .non_volatile()
                .field(Field::new("chip_id")),
        )
        .register(
            Register::new("error_id", 0xE0)
                .read_only()
                .field(Field::new("invalid_write").mask(0b1000_0000))
                .field(Field::new("invalid_read").mask(0b0100_0000))
                .field(Field::new("invalid_mode").mask(0b0010_0000))
                .field(Field::new("max_resistance").mask(0b0001_0000))
                .field(Field::new("heater_fault").mask(0b0000_1000))
                .field(Field::new("heater_supply").mask(0b0000_0100)),
        )
        .register(
            Register::new("reset", 0xFF)
                .width_bits(32)
                .write_only()
                .field(Field::new("reset").bytes(0..=3).encoder(Encoder::Bytes)),
        )
        .build()
}

/// Shared descriptor for every CCS811 instance.
pub fn descriptor() -> Result<&'static Device, CodecError> {
    static DESCRIPTOR: OnceLock<Device> = OnceLock::new();
    if let Some(d) = DESCRIPTOR.get() {
        return Ok(d);
    }
    let built = build_descriptor()?;
    Ok(DESCRIPTOR.get_or_init(|| built))
}

pub struct Ccs811<B: RegisterBus> {
    bus: B,
    bus_address: u8,
    status: RegisterAccess,
    meas_mode: RegisterAccess,
    data: RegisterAccess,
    raw_data: RegisterAccess,
    env_data: RegisterAccess,
    baseline: RegisterAccess,
    chip_id: RegisterAccess,
    error_id: RegisterAccess,
    reset: RegisterAccess,
}

impl<B: RegisterBus> Ccs811<B> {
    pub fn new(bus: B, pin: AddressPin) -> Result<Self> {
        let device = descriptor()?;
        let bus_address = device.address(pin.level())?;
        Ok(Self {
            bus,
            bus_address,
            status: RegisterAccess::new(device, "status")?,
            meas_mode: RegisterAccess::new(device, "meas_mode")?,
            data: RegisterAccess::new(device, "data")?,
            raw_data: RegisterAccess::new(device, "raw_data")?,
            env_data: RegisterAccess::new(device, "env_data")?,
            baseline: RegisterAccess::new(device, "baseline")?,
            chip_id: RegisterAccess::new(device, "chip_id")?,
            error_id: RegisterAccess::new(device, "error_id")?,
            reset: RegisterAccess::new(device, "reset")?,
        })
    }

    pub fn bus_address(&self) -> u8 {
        self.bus_address
    }

    pub fn probe(&mut self) -> Result<()> {
        let map = self.chip_id.read(&mut self.bus, false)?;
        let got = require_u64(&map, "chip_id")?;
        if got != CHIP_ID {
            return Err(SensorError::ChipIdMismatch {
                expected: CHIP_ID,
                got,
            });
        }
        Ok(())
    }

    /// Verify the application image and switch from boot to application
    /// mode. Must run before any measurement.
    pub fn start_app(&mut self) -> Result<()> {
        let status = self.status()?;
        if !status.app_valid {
            return Err(SensorError::Device(
                "ccs811 application image is not valid".to_string(),
            ));
        }
        self.bus.write_pointer(APP_START)?;
        debug!(address = self.bus_address, "ccs811 application started");
        Ok(())
    }

    pub fn status(&mut self) -> Result<Status> {
        let map = self.status.read(&mut self.bus, false)?;
        Ok(Status {
            app_on: flag(&map, "app_on")?,
            app_erase: flag(&map, "app_erase")?,
            app_verify: flag(&map, "app_verify")?,
            app_valid: flag(&map, "app_valid")?,
            data_ready: flag(&map, "data_ready")?,
            error: flag(&map, "error")?,
        })
    }

    pub fn set_drive_mode(
        &mut self,
        period: SamplePeriod,
        interrupts: bool,
        interrupt_on_threshold: bool,
    ) -> Result<()> {
        self.meas_mode.write(
            &mut self.bus,
            &[
                ("sample_period", FieldValue::F64(period.seconds())),
                ("interrupts_on", FieldValue::U64(u64::from(interrupts))),
                (
                    "interrupt_on_thresh",
                    FieldValue::U64(u64::from(interrupt_on_threshold)),
                ),
            ],
            CachePolicy::Optimistic,
        )?;
        Ok(())
    }

    pub fn read_air_quality(&mut self) -> Result<AirQuality> {
        let map = self.data.read(&mut self.bus, false)?;
        Ok(AirQuality {
            eco2_ppm: require_u64(&map, "eco2")?,
            tvoc_ppb: require_u64(&map, "tvoc")?,
        })
    }

    pub fn read_raw_adc(&mut self) -> Result<RawAdc> {
        let map = self.raw_data.read(&mut self.bus, false)?;
        Ok(RawAdc {
            current_ua: require_f64(&map, "current")?,
            voltage_v: require_f64(&map, "voltage")?,
        })
    }

    /// Feed ambient humidity and temperature into the gas-compensation
    /// algorithm. Values come from a companion sensor (e.g. HDC1080).
    pub fn set_environment(&mut self, humidity_pct: f64, temperature_c: f64) -> Result<()> {
        self.env_data.write(
            &mut self.bus,
            &[
                ("humidity", FieldValue::F64(humidity_pct)),
                ("temperature", FieldValue::F64(temperature_c)),
            ],
            CachePolicy::Optimistic,
        )?;
        Ok(())
    }

    /// Current baseline word for the gas-resistance correction algorithm.
    pub fn baseline(&mut self) -> Result<u64> {
        let map = self.baseline.read(&mut self.bus, false)?;
        require_u64(&map, "baseline")
    }

    /// Restore a previously saved baseline word.
    pub fn set_baseline(&mut self, baseline: u16) -> Result<()> {
        self.baseline.write(
            &mut self.bus,
            &[("baseline", FieldValue::U64(u64::from(baseline)))],
            CachePolicy::Optimistic,
        )?;
        Ok(())
    }

    pub fn error_flags(&mut self) -> Result<ErrorFlags> {
        let map = self.error_id.read(&mut self.bus, false)?;
        Ok(ErrorFlags {
            invalid_write: flag(&map, "invalid_write")?,
            invalid_read: flag(&map, "invalid_read")?,
            invalid_mode: flag(&map, "invalid_mode")?,
            max_resistance: flag(&map, "max_resistance")?,
            heater_fault: flag(&map, "heater_fault")?,
            heater_supply: flag(&map, "heater_supply")?,
        })
    }

    /// Reset every register cache to all-unknown after retry exhaustion.
    pub fn invalidate_caches(&mut self) {
        self.status.invalidate();
        self.meas_mode.invalidate();
        self.data.invalidate();
        self.raw_data.invalidate();
        self.env_data.invalidate();
        self.baseline.invalidate();
        self.chip_id.invalidate();
        self.error_id.invalidate();
    }

    /// Soft reset back to boot mode.
    pub fn reset(&mut self) -> Result<()> {
        self.reset.write(
            &mut self.bus,
            &[("reset", FieldValue::Bytes(RESET_MAGIC.to_vec()))],
            CachePolicy::Deferred,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_transport::{BusOp, MockRegisterBus};

    fn mocked_bus() -> MockRegisterBus {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0x00, &[0b1011_1000]);
        bus.set_register(0x01, &[0b0001_1100]);
        bus.set_register(0x02, &[0x00, 0x80, 0x01, 0x00]);
        bus.set_register(0x03, &[0x82, 0x00]);
        bus.set_register(0x05, &[0x00, 0x00, 0x00, 0x00]);
        bus.set_register(0x11, &[0x00, 0xFF]);
        bus.set_register(0x20, &[0x81]);
        bus.set_register(0xE0, &[0b1010_1000]);
        bus
    }

    #[test]
    fn test_status_flags() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        let status = ccs.status().unwrap();
        assert!(status.app_on);
        assert!(!status.app_erase);
        assert!(status.app_verify);
        assert!(status.app_valid);
        assert!(status.data_ready);
        assert!(!status.error);
    }

    #[test]
    fn test_air_quality_words() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        let aq = ccs.read_air_quality().unwrap();
        assert_eq!(aq.eco2_ppm, 128);
        assert_eq!(aq.tvoc_ppb, 256);
    }

    #[test]
    fn test_raw_adc_transfer_functions() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        let raw = ccs.read_raw_adc().unwrap();
        assert!((raw.current_ua - 32.0).abs() < f64::EPSILON);
        assert!((raw.voltage_v - 0.825).abs() <= VOLTS_PER_LSB);
    }

    #[test]
    fn test_env_data_decodes_intercepts() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        let map = ccs.env_data.read(&mut ccs.bus, false).unwrap();
        assert_eq!(map["humidity"], FieldValue::F64(0.0));
        assert_eq!(map["temperature"], FieldValue::F64(-25.0));
    }

    #[test]
    fn test_set_environment_packs_fixed_point() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        ccs.set_environment(48.5, 25.0).unwrap();
        // 48.5 * 512 = 24832 = 0x6100; (25 + 25) * 512 = 25600 = 0x6400
        assert_eq!(
            ccs.bus.register(0x05),
            Some(&[0x61, 0x00, 0x64, 0x00][..])
        );
    }

    #[test]
    fn test_raw_adc_is_read_only() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        let err = ccs
            .raw_data
            .write(
                &mut ccs.bus,
                &[("current", FieldValue::F64(1.0))],
                CachePolicy::Deferred,
            )
            .unwrap_err();
        assert!(matches!(err, CodecError::ReadOnly { .. }));
    }

    #[test]
    fn test_start_app_requires_valid_image() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        ccs.start_app().unwrap();
        assert!(ccs
            .bus
            .ops()
            .iter()
            .any(|op| matches!(op, BusOp::Pointer { address: APP_START })));

        let mut bus = mocked_bus();
        bus.set_register(0x00, &[0b0000_0000]);
        let mut ccs = Ccs811::new(bus, AddressPin::Low).unwrap();
        let err = ccs.start_app().unwrap_err();
        assert!(matches!(err, SensorError::Device(_)));
        assert!(!ccs
            .bus
            .ops()
            .iter()
            .any(|op| matches!(op, BusOp::Pointer { .. })));
    }

    #[test]
    fn test_set_drive_mode_packs_one_byte() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        ccs.set_drive_mode(SamplePeriod::Every10Seconds, false, false)
            .unwrap();
        assert_eq!(ccs.bus.register(0x01), Some(&[0b0010_0000][..]));
    }

    #[test]
    fn test_baseline_round_trip() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        assert_eq!(ccs.baseline().unwrap(), 0xFF);
        ccs.set_baseline(0x1234).unwrap();
        assert_eq!(ccs.bus.register(0x11), Some(&[0x12, 0x34][..]));
    }

    #[test]
    fn test_error_flags() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        let flags = ccs.error_flags().unwrap();
        assert!(flags.invalid_write);
        assert!(!flags.invalid_read);
        assert!(flags.invalid_mode);
        assert!(!flags.max_resistance);
        assert!(flags.heater_fault);
        assert!(!flags.heater_supply);
    }

    #[test]
    fn test_reset_writes_magic_sequence() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::Low).unwrap();
        ccs.reset().unwrap();
        assert_eq!(
            ccs.bus.register(0xFF),
            Some(&[0x11, 0xE5, 0x72, 0x8A][..])
        );
    }

    #[test]
    fn test_probe() {
        let mut ccs = Ccs811::new(mocked_bus(), AddressPin::High).unwrap();
        assert_eq!(ccs.bus_address(), 0x5B);
        ccs.probe().unwrap();
    }
}
