//! Driver for the Bosch BMP280 pressure/temperature sensor.

use crate::fields::{flag, require_i64, require_u64};
use crate::{AddressPin, Result, SensorError};
use bus_transport::RegisterBus;
use register_codec::{
    CachePolicy, CodecError, Device, Encoder, Field, FieldValue, LookupTable, Register,
    RegisterAccess,
};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

pub const CHIP_ID: u64 = 0x58;

const RESET_MAGIC: u64 = 0xB6;
const MEASUREMENT_POLL: Duration = Duration::from_millis(1);
const MEASUREMENT_POLL_LIMIT: u32 = 200;

/// Number of measurements aggregated per sample. `Skip` disables that
/// channel entirely; its output reads as 0x80000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    Skip,
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl Oversampling {
    fn samples(self) -> u64 {
        match self {
            Oversampling::Skip => 0,
            Oversampling::X1 => 1,
            Oversampling::X2 => 2,
            Oversampling::X4 => 4,
            Oversampling::X8 => 8,
            Oversampling::X16 => 16,
        }
    }
}

/// Power mode. `Trigger` takes one measurement when written and drops back
/// to sleep; `Interval` free-runs at the configured standby period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementMode {
    Sleep,
    Trigger,
    Interval,
}

impl MeasurementMode {
    fn register_value(self) -> &'static str {
        match self {
            MeasurementMode::Sleep => "sleep",
            MeasurementMode::Trigger => "forced",
            MeasurementMode::Interval => "normal",
        }
    }
}

/// Milliseconds between measurements in interval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyPeriod {
    Ms0_5,
    Ms62_5,
    Ms125,
    Ms250,
    Ms500,
    Ms1000,
    Ms2000,
    Ms4000,
}

impl StandbyPeriod {
    fn millis(self) -> f64 {
        match self {
            StandbyPeriod::Ms0_5 => 0.5,
            StandbyPeriod::Ms62_5 => 62.5,
            StandbyPeriod::Ms125 => 125.0,
            StandbyPeriod::Ms250 => 250.0,
            StandbyPeriod::Ms500 => 500.0,
            StandbyPeriod::Ms1000 => 1000.0,
            StandbyPeriod::Ms2000 => 2000.0,
            StandbyPeriod::Ms4000 => 4000.0,
        }
    }
}

/// IIR smoothing filter coefficient; higher is smoother.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterConstant {
    Off,
    X2,
    X4,
    X8,
    X16,
}

impl FilterConstant {
    fn coefficient(self) -> u64 {
        match self {
            FilterConstant::Off => 0,
            FilterConstant::X2 => 2,
            FilterConstant::X4 => 4,
            FilterConstant::X8 => 8,
            FilterConstant::X16 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Set while a conversion is running.
    pub measuring: bool,
    /// Set while NVM data is being copied to registers.
    pub im_update: bool,
}

/// Raw 20-bit ADC readings; compensation is the consumer's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawMeasurement {
    pub pressure: u64,
    pub temperature: u64,
}

/// Factory calibration words, little-endian in register space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Calibration {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,
    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,
}

fn oversampling_table() -> LookupTable {
    LookupTable::of_u64(&[
        (0, 0b000),
        (1, 0b001),
        (2, 0b010),
        (4, 0b011),
        (8, 0b100),
        (16, 0b101),
    ])
}

fn build_descriptor() -> Result<Device, CodecError> {
    Device::new("bmp280", CHIP_ID)
        .address(0, 0x76)
        .address(1, 0x77)
        .register(
            Register::new("chip_id", 0xD0)
                .read_only()
                .non_volatile()
                .field(Field::new("id")),
        )
        .register(Register::new("reset", 0xE0).write_only().field(Field::new("reset")))
        .register(
            Register::new("status", 0xF3)
                .read_only()
                .field(Field::new("measuring").mask(0b0000_1000))
                .field(Field::new("im_update").mask(0b0000_0001)),
        )
        .register(
            Register::new("ctrl_meas", 0xF4)
                .field(
                    Field::new("osrs_t")
                        .mask(0b1110_0000)
                        .encoder(Encoder::Lookup(oversampling_table())),
                )
                .field(
                    Field::new("osrs_p")
                        .mask(0b0001_1100)
                        .encoder(Encoder::Lookup(oversampling_table())),
                )
                .field(
                    Field::new("mode")
                        .mask(0b0000_0011)
                        .encoder(Encoder::Lookup(LookupTable::of_text(&[
                            ("sleep", 0b00),
                            ("forced", 0b10),
                            ("normal", 0b11),
                        ]))),
                ),
        )
        .register(
            Register::new("config", 0xF5)
                .field(
                    Field::new("t_sb")
                        .mask(0b1110_0000)
                        .encoder(Encoder::Lookup(LookupTable::of_f64(&[
                            (0.5, 0b000),
                            (62.5, 0b001),
                            (125.0, 0b010),
                            (250.0, 0b011),
                            (500.0, 0b100),
                            (1000.0, 0b101),
                            (2000.0, 0b110),
                            (4000.0, 0b111),
                        ]))),
                )
                .field(
                    Field::new("filter")
                        .mask(0b0001_1100)
                        .encoder(Encoder::Lookup(LookupTable::of_u64(&[
                            (0, 0b000),
                            (2, 0b001),
                            (4, 0b010),
                            (8, 0b011),
                            (16, 0b100),
                        ]))),
                )
                .field(Field::new("spi3w_en").mask(0b0000_0001)),
        )
        .register(
            Register::new("data", 0xF7)
                .width_bits(48)
                .read_only()
                .field(Field::new("pressure").bytes(0..=2).mask(0xFF_FF_F0))
                .field(Field::new("temperature").bytes(3..=5).mask(0xFF_FF_F0)),
        )
        .register(
            Register::new("calibration", 0x88)
                .width_bits(192)
                .read_only()
                .non_volatile()
                .field(Field::new("dig_t1").bytes(0..=1).little_endian())
                .field(Field::new("dig_t2").bytes(2..=3).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_t3").bytes(4..=5).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_p1").bytes(6..=7).little_endian())
                .field(Field::new("dig_p2").bytes(8..=9).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_p3").bytes(10..=11).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_p4").bytes(12..=13).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_p5").bytes(14..=15).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_p6").bytes(16..=17).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_p7").bytes(18..=19).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_p8").bytes(20..=21).encoder(Encoder::Int).little_endian())
                .field(Field::new("dig_p9").bytes(22..=23).encoder(Encoder::Int).little_endian()),
        )
        .build()
}

/// Shared descriptor for every BMP280 instance.
pub fn descriptor() -> Result<&'static Device, CodecError> {
    static DESCRIPTOR: OnceLock<Device> = OnceLock::new();
    if let Some(d) = DESCRIPTOR.get() {
        return Ok(d);
    }
    let built = build_descriptor()?;
    Ok(DESCRIPTOR.get_or_init(|| built))
}

pub struct Bmp280<B: RegisterBus> {
    bus: B,
    bus_address: u8,
    chip_id: RegisterAccess,
    reset: RegisterAccess,
    status: RegisterAccess,
    ctrl_meas: RegisterAccess,
    config: RegisterAccess,
    data: RegisterAccess,
    calibration: RegisterAccess,
}

impl<B: RegisterBus> Bmp280<B> {
    pub fn new(bus: B, pin: AddressPin) -> Result<Self> {
        let device = descriptor()?;
        let bus_address = device.address(pin.level())?;
        Ok(Self {
            bus,
            bus_address,
            chip_id: RegisterAccess::new(device, "chip_id")?,
            reset: RegisterAccess::new(device, "reset")?,
            status: RegisterAccess::new(device, "status")?,
            ctrl_meas: RegisterAccess::new(device, "ctrl_meas")?,
            config: RegisterAccess::new(device, "config")?,
            data: RegisterAccess::new(device, "data")?,
            calibration: RegisterAccess::new(device, "calibration")?,
        })
    }

    pub fn bus_address(&self) -> u8 {
        self.bus_address
    }

    /// Read the identity register and confirm the expected chip id.
    pub fn probe(&mut self) -> Result<()> {
        let got = self.chip_id()?;
        if got != CHIP_ID {
            return Err(SensorError::ChipIdMismatch {
                expected: CHIP_ID,
                got,
            });
        }
        debug!(address = self.bus_address, "bmp280 present");
        Ok(())
    }

    pub fn chip_id(&mut self) -> Result<u64> {
        let map = self.chip_id.read(&mut self.bus, false)?;
        require_u64(&map, "id")
    }

    /// Soft reset: logic circuitry and register values return to defaults
    /// and the sensor enters sleep mode.
    pub fn reset(&mut self) -> Result<()> {
        self.reset.write(
            &mut self.bus,
            &[("reset", FieldValue::U64(RESET_MAGIC))],
            CachePolicy::Deferred,
        )?;
        Ok(())
    }

    pub fn status(&mut self) -> Result<Status> {
        let map = self.status.read(&mut self.bus, false)?;
        Ok(Status {
            measuring: flag(&map, "measuring")?,
            im_update: flag(&map, "im_update")?,
        })
    }

    /// Set oversampling and power mode.
    ///
    /// Per the datasheet, temperature oversampling beyond x2 adds nothing
    /// to pressure resolution even at x16 pressure oversampling.
    pub fn set_sampling(
        &mut self,
        temperature: Oversampling,
        pressure: Oversampling,
        mode: MeasurementMode,
    ) -> Result<()> {
        // A forced-mode write self-clears back to sleep once the conversion
        // finishes, so the cache must not claim to know the mode.
        self.ctrl_meas.write(
            &mut self.bus,
            &[
                ("osrs_t", FieldValue::U64(temperature.samples())),
                ("osrs_p", FieldValue::U64(pressure.samples())),
                ("mode", FieldValue::text(mode.register_value())),
            ],
            CachePolicy::Deferred,
        )?;
        Ok(())
    }

    /// Configure standby period, IIR filter, and the SPI interface bit.
    /// Writes may be ignored while a measurement is running; set sleep mode
    /// first to guarantee they land.
    pub fn set_config(
        &mut self,
        period: StandbyPeriod,
        filter: FilterConstant,
        spi3w: bool,
    ) -> Result<()> {
        self.config.write(
            &mut self.bus,
            &[
                ("t_sb", FieldValue::F64(period.millis())),
                ("filter", FieldValue::U64(filter.coefficient())),
                ("spi3w_en", FieldValue::U64(u64::from(spi3w))),
            ],
            CachePolicy::Optimistic,
        )?;
        Ok(())
    }

    /// Raw ADC readings from the burst-read data register.
    pub fn read_data(&mut self) -> Result<RawMeasurement> {
        let map = self.data.read(&mut self.bus, false)?;
        Ok(RawMeasurement {
            pressure: require_u64(&map, "pressure")?,
            temperature: require_u64(&map, "temperature")?,
        })
    }

    /// Factory calibration constants; served from cache after first read.
    pub fn calibration(&mut self) -> Result<Calibration> {
        let map = self.calibration.read(&mut self.bus, false)?;
        Ok(Calibration {
            dig_t1: require_u64(&map, "dig_t1")? as u16,
            dig_t2: require_i64(&map, "dig_t2")? as i16,
            dig_t3: require_i64(&map, "dig_t3")? as i16,
            dig_p1: require_u64(&map, "dig_p1")? as u16,
            dig_p2: require_i64(&map, "dig_p2")? as i16,
            dig_p3: require_i64(&map, "dig_p3")? as i16,
            dig_p4: require_i64(&map, "dig_p4")? as i16,
            dig_p5: require_i64(&map, "dig_p5")? as i16,
            dig_p6: require_i64(&map, "dig_p6")? as i16,
            dig_p7: require_i64(&map, "dig_p7")? as i16,
            dig_p8: require_i64(&map, "dig_p8")? as i16,
            dig_p9: require_i64(&map, "dig_p9")? as i16,
        })
    }

    /// Reset every register cache to all-unknown. The sampling layer calls
    /// this when its bounded retries are exhausted, so stale values are
    /// never reported as fresh.
    pub fn invalidate_caches(&mut self) {
        self.chip_id.invalidate();
        self.status.invalidate();
        self.ctrl_meas.invalidate();
        self.config.invalidate();
        self.data.invalidate();
        self.calibration.invalidate();
    }

    /// Trigger one forced measurement, wait for the conversion to finish,
    /// and return the raw readings.
    pub fn measure(
        &mut self,
        temperature: Oversampling,
        pressure: Oversampling,
    ) -> Result<RawMeasurement> {
        self.set_sampling(temperature, pressure, MeasurementMode::Trigger)?;
        for _ in 0..MEASUREMENT_POLL_LIMIT {
            if !self.status()?.measuring {
                return self.read_data();
            }
            std::thread::sleep(MEASUREMENT_POLL);
        }
        Err(SensorError::WaitTimeout("bmp280 conversion"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_transport::{BusOp, MockRegisterBus};

    fn mocked_bus() -> MockRegisterBus {
        let mut bus = MockRegisterBus::new();
        bus.set_register(0xD0, &[0x58]);
        bus.set_register(0xF3, &[0b0000_0000]);
        bus.set_register(0xF7, &[0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00]);
        bus.set_register(
            0x88,
            &[
                0x70, 0x6B, // dig_t1 = 27504
                0x43, 0x67, // dig_t2 = 26435
                0x18, 0xFC, // dig_t3 = -1000
                0x7D, 0x8E, // dig_p1 = 36477
                0x43, 0xD6, // dig_p2 = -10685
                0xD0, 0x0B, // dig_p3 = 3024
                0x27, 0x0B, // dig_p4 = 2855
                0x8C, 0x00, // dig_p5 = 140
                0xF9, 0xFF, // dig_p6 = -7
                0x8C, 0x3C, // dig_p7 = 15500
                0xF8, 0xC6, // dig_p8 = -14600
                0x70, 0x17, // dig_p9 = 6000
            ],
        );
        bus
    }

    #[test]
    fn test_descriptor_builds() {
        let dev = descriptor().unwrap();
        assert_eq!(dev.chip_id(), 0x58);
        assert_eq!(dev.register("data").unwrap().width_bytes(), 6);
    }

    #[test]
    fn test_probe_matches_chip_id() {
        let mut bmp = Bmp280::new(mocked_bus(), AddressPin::Low).unwrap();
        assert_eq!(bmp.bus_address(), 0x76);
        bmp.probe().unwrap();
    }

    #[test]
    fn test_probe_rejects_wrong_chip() {
        let mut bus = mocked_bus();
        bus.set_register(0xD0, &[0x60]);
        let mut bmp = Bmp280::new(bus, AddressPin::High).unwrap();
        let err = bmp.probe().unwrap_err();
        assert!(matches!(
            err,
            SensorError::ChipIdMismatch { got: 0x60, .. }
        ));
    }

    #[test]
    fn test_set_sampling_packs_one_byte() {
        let mut bmp = Bmp280::new(mocked_bus(), AddressPin::Low).unwrap();
        bmp.set_sampling(
            Oversampling::X2,
            Oversampling::X16,
            MeasurementMode::Trigger,
        )
        .unwrap();
        // osrs_t=010, osrs_p=101, mode=10
        assert_eq!(bmp.bus.register(0xF4), Some(&[0b0101_0110][..]));
    }

    #[test]
    fn test_set_config_packs_one_byte() {
        let mut bmp = Bmp280::new(mocked_bus(), AddressPin::Low).unwrap();
        bmp.set_config(StandbyPeriod::Ms500, FilterConstant::X2, false)
            .unwrap();
        // t_sb=100, filter=001, spi3w_en=0
        assert_eq!(bmp.bus.register(0xF5), Some(&[0b1000_0100][..]));
    }

    #[test]
    fn test_read_data_unpacks_20_bit_values() {
        let mut bmp = Bmp280::new(mocked_bus(), AddressPin::Low).unwrap();
        let data = bmp.read_data().unwrap();
        assert_eq!(data.pressure, 415148);
        assert_eq!(data.temperature, 519888);
    }

    #[test]
    fn test_calibration_words_little_endian() {
        let mut bmp = Bmp280::new(mocked_bus(), AddressPin::Low).unwrap();
        let cal = bmp.calibration().unwrap();
        assert_eq!(cal.dig_t1, 27504);
        assert_eq!(cal.dig_t2, 26435);
        assert_eq!(cal.dig_t3, -1000);
        assert_eq!(cal.dig_p1, 36477);
        assert_eq!(cal.dig_p2, -10685);
        assert_eq!(cal.dig_p9, 6000);
    }

    #[test]
    fn test_calibration_cached_after_first_read() {
        let mut bmp = Bmp280::new(mocked_bus(), AddressPin::Low).unwrap();
        bmp.calibration().unwrap();
        let reads_before = bmp.bus.read_count();
        bmp.calibration().unwrap();
        assert_eq!(bmp.bus.read_count(), reads_before);
    }

    #[test]
    fn test_reset_is_write_only() {
        let mut bmp = Bmp280::new(mocked_bus(), AddressPin::Low).unwrap();
        bmp.reset().unwrap();
        assert_eq!(bmp.bus.register(0xE0), Some(&[0xB6][..]));
        let err = bmp.reset.read(&mut bmp.bus, false).unwrap_err();
        assert!(matches!(err, CodecError::WriteOnly { .. }));
    }

    #[test]
    fn test_measure_triggers_polls_and_reads() {
        let mut bmp = Bmp280::new(mocked_bus(), AddressPin::Low).unwrap();
        let data = bmp.measure(Oversampling::X2, Oversampling::X16).unwrap();
        assert_eq!(data.temperature, 519888);
        let ops = bmp.bus.ops();
        assert!(matches!(ops[0], BusOp::Write { address: 0xF4, .. }));
        assert!(matches!(ops[1], BusOp::Read { address: 0xF3, .. }));
        assert!(matches!(ops[2], BusOp::Read { address: 0xF7, .. }));
    }
}
