//! register-codec: declarative model of bit-packed hardware registers
//!
//! A device descriptor names its registers, each register names its fields,
//! and each field carries a byte span, an optional bit mask, and an encoder
//! that converts between human-readable values and raw bits. On top of the
//! static description, [`RegisterAccess`] gives each register instance a
//! read/write facade with a last-known-value cache, talking to hardware
//! through the `bus-transport` traits supplied by the caller.
//!
//! The model is single-threaded and blocking: one logical caller drives a
//! device instance at a time, operations either complete or return an
//! error, and retry policy lives with the caller, not here.

mod value;
pub use value::FieldValue;

mod error;
pub use error::{CodecError, Result};

mod encoder;
pub use encoder::{Encoder, LinearTransfer, LookupTable};

mod field;
pub use field::{ByteOrder, Field, FieldBuilder};

mod register;
pub use register::{Access, Register, RegisterBuilder};

mod device;
pub use device::{Device, DeviceBuilder};

mod access;
pub use access::{CachePolicy, RegisterAccess};
