use bus_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = CodecError> = core::result::Result<T, E>;

/// Failures of the register codec framework.
///
/// Configuration variants indicate a bug in a static hardware description
/// and are raised while building a device descriptor; they never occur at
/// runtime against a valid descriptor. The remaining variants are runtime
/// conditions: bad caller input, undecodable hardware responses, attempts
/// against the wrong register direction, or transport failures passed
/// through unchanged.
#[derive(Debug, Error)]
pub enum CodecError {
    // configuration
    #[error("field {field}: bit mask is all zeros")]
    ZeroMask { field: String },
    #[error("field {field}: bit mask 0x{mask:X} exceeds the field's {bits}-bit span")]
    MaskTooWide { field: String, mask: u64, bits: u32 },
    #[error("field {field}: byte index is empty")]
    EmptyByteIndex { field: String },
    #[error("field {field}: byte index must be strictly increasing")]
    UnorderedByteIndex { field: String },
    #[error("field {field}: masked fields may span at most 8 bytes")]
    MaskedSpanTooLong { field: String },
    #[error("register {register}: field {field} exceeds the register's {bits}-bit width")]
    FieldOutOfRange {
        register: String,
        field: String,
        bits: u32,
    },
    #[error("register {register}: width must be a positive multiple of 8 bits, got {bits}")]
    BadRegisterWidth { register: String, bits: u32 },
    #[error("register {register}: duplicate field name {field}")]
    DuplicateField { register: String, field: String },
    #[error("device {device}: duplicate register name {register}")]
    DuplicateRegister { device: String, register: String },
    #[error("device {device}: address map is empty")]
    EmptyAddressMap { device: String },
    #[error("field {field}: bad lookup table: {reason}")]
    BadLookupTable { field: String, reason: String },

    // validation / codec
    #[error("register {register} has no field named {field}")]
    NoSuchField { register: String, field: String },
    #[error("device {device} has no register named {register}")]
    NoSuchRegister { device: String, register: String },
    #[error("field {field}: value out of range: {detail}")]
    ValueOutOfRange { field: String, detail: String },
    #[error("field {field}: raw value 0x{raw:X} has no lookup table entry")]
    NoLookupMatch { field: String, raw: u64 },
    #[error("{target}: expected {expected} bytes, got {got}")]
    WidthMismatch {
        target: String,
        expected: usize,
        got: usize,
    },
    #[error("field {field}: expected a {expected} value")]
    WrongValueType {
        field: String,
        expected: &'static str,
    },

    // unsupported operation
    #[error("{target} is read only")]
    ReadOnly { target: String },
    #[error("{target} is write only")]
    WriteOnly { target: String },
    #[error("device {device}: no bus address for pin level {level}")]
    UnknownAddressLevel { device: String, level: u8 },

    // transport passthrough
    #[error(transparent)]
    Transport(#[from] TransportError),
}
