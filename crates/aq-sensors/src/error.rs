use bus_transport::TransportError;
use register_codec::CodecError;
use thiserror::Error;

pub type Result<T, E = SensorError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("unexpected chip id: expected 0x{expected:X}, got 0x{got:X}")]
    ChipIdMismatch { expected: u64, got: u64 },
    #[error("{action} requires {required} mode, device is in {current} mode")]
    WrongMode {
        action: &'static str,
        required: &'static str,
        current: &'static str,
    },
    #[error("device error: {0}")]
    Device(String),
    #[error("timed out waiting for {0}")]
    WaitTimeout(&'static str),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
