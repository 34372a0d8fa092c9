//! aq-sensors: drivers for assorted air-quality sensors
//!
//! Each I2C driver pairs a static device descriptor (the register tables
//! from the part's datasheet, expressed with `register-codec`) with a thin
//! typed API; enumerated parameters make invalid configurations
//! unrepresentable, and validation happens before any bus traffic. The
//! serial sensors (SenseAir S8, Plantower PMS7003) speak their own framed
//! protocols over the `SerialLink` trait.

mod error;
pub use error::{Result, SensorError};

mod fields;

pub mod bmp280;
pub use bmp280::Bmp280;

pub mod ccs811;
pub use ccs811::Ccs811;

pub mod hdc1080;
pub use hdc1080::Hdc1080;

pub mod s8;
pub use s8::SenseairS8;

pub mod pms7003;
pub use pms7003::Pms7003;

mod metrics;
pub use metrics::{MetricsHub, SamplerMetrics};

/// Logic level of a device's address-select strap pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPin {
    Low,
    High,
}

impl AddressPin {
    pub fn level(self) -> u8 {
        match self {
            AddressPin::Low => 0,
            AddressPin::High => 1,
        }
    }
}
