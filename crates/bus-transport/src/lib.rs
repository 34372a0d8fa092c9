//! bus-transport: byte-level transport abstractions for sensor buses
//!
//! This crate provides the traits the register codec framework and the
//! serial drivers talk through, with feature-gated backends. The default
//! build enables a `mock` backend so that binaries and tests compile and
//! run on any host without bus hardware. Real I2C backends are supplied by
//! the integrating platform; the `serial` feature adds a `serialport`-based
//! link for the UART sensors.
//!
//! The traits carry no retry logic. A failed transaction surfaces as a
//! [`TransportError`] and the caller decides whether to retry.

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{RegisterBus, SerialLink};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{BusOp, MockRegisterBus, MockSerialLink};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialPortLink;
