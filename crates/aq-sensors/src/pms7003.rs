//! Driver for the Plantower PMS7003 particulate matter sensor.
//!
//! Data arrives as 32-byte frames: a 2-byte start delimiter, thirteen
//! big-endian data words, a version byte, an error byte, and an additive
//! 16-bit checksum over everything before it (start bytes included). The
//! sensor either pushes frames on its own schedule (active mode) or
//! answers explicit requests (passive mode).

use crate::{Result, SensorError};
use bus_transport::{SerialLink, TransportError};
use register_codec::FieldValue;
use serde::Serialize;
use std::collections::BTreeMap;

const START: [u8; 2] = [0x42, 0x4D];
const FRAME_BODY_LEN: usize = 30;
const FRAME_LEN: usize = 32;
/// Bytes to scan for a start delimiter before giving up on resync.
const RESYNC_WINDOW: usize = 2 * FRAME_LEN;

// Command frames: start bytes, command, 2-byte argument, additive checksum.
const CMD_SET_PASSIVE: [u8; 7] = [0x42, 0x4D, 0xE1, 0x00, 0x00, 0x01, 0x70];
const CMD_SET_ACTIVE: [u8; 7] = [0x42, 0x4D, 0xE1, 0x00, 0x01, 0x01, 0x71];
const CMD_SLEEP: [u8; 7] = [0x42, 0x4D, 0xE4, 0x00, 0x00, 0x01, 0x73];
const CMD_WAKE: [u8; 7] = [0x42, 0x4D, 0xE4, 0x00, 0x01, 0x01, 0x74];
const CMD_TAKE_MEASUREMENT: [u8; 7] = [0x42, 0x4D, 0xE2, 0x00, 0x00, 0x01, 0x71];

/// Synchronization mode: who decides when a frame is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Device-paced: the sensor streams frames every 0.2 to 2.3 seconds.
    Active,
    /// Host-paced: the sensor answers explicit measurement requests.
    Passive,
    /// Standby, fan off.
    Sleep,
}

impl SyncMode {
    fn name(self) -> &'static str {
        match self {
            SyncMode::Active => "active",
            SyncMode::Passive => "passive",
            SyncMode::Sleep => "sleep",
        }
    }
}

/// One parsed measurement frame.
///
/// Concentrations are ug/m3; `_atm` values use the "atmospheric
/// environment" correction, the plain ones the "standard particle"
/// (factory) correction. Counts are particles per 0.1 L of air at or above
/// the named size in microns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParticulateFrame {
    pub frame_length: u16,
    pub pm1_0: u16,
    pub pm2_5: u16,
    pub pm10_0: u16,
    pub pm1_0_atm: u16,
    pub pm2_5_atm: u16,
    pub pm10_0_atm: u16,
    pub count_0_3: u16,
    pub count_0_5: u16,
    pub count_1_0: u16,
    pub count_2_5: u16,
    pub count_5_0: u16,
    pub count_10_0: u16,
    pub version: u8,
    pub error: u8,
}

impl ParticulateFrame {
    /// Concentrations and counts as a field-value map, in the shape the
    /// register-backed sensors produce. Frame bookkeeping (length, version,
    /// error byte) is left out.
    pub fn data_values(&self) -> BTreeMap<&'static str, FieldValue> {
        BTreeMap::from([
            ("pm1_0", FieldValue::U64(u64::from(self.pm1_0))),
            ("pm2_5", FieldValue::U64(u64::from(self.pm2_5))),
            ("pm10_0", FieldValue::U64(u64::from(self.pm10_0))),
            ("pm1_0_atm", FieldValue::U64(u64::from(self.pm1_0_atm))),
            ("pm2_5_atm", FieldValue::U64(u64::from(self.pm2_5_atm))),
            ("pm10_0_atm", FieldValue::U64(u64::from(self.pm10_0_atm))),
            ("count_0_3", FieldValue::U64(u64::from(self.count_0_3))),
            ("count_0_5", FieldValue::U64(u64::from(self.count_0_5))),
            ("count_1_0", FieldValue::U64(u64::from(self.count_1_0))),
            ("count_2_5", FieldValue::U64(u64::from(self.count_2_5))),
            ("count_5_0", FieldValue::U64(u64::from(self.count_5_0))),
            ("count_10_0", FieldValue::U64(u64::from(self.count_10_0))),
        ])
    }
}

fn word(body: &[u8], index: usize) -> u16 {
    u16::from_be_bytes([body[2 * index], body[2 * index + 1]])
}

/// Parse the 30 bytes following the start delimiter, checking the additive
/// checksum (which covers the start bytes too).
fn parse_frame(body: &[u8]) -> Result<ParticulateFrame> {
    if body.len() != FRAME_BODY_LEN {
        return Err(SensorError::Transport(TransportError::InvalidFrame(
            "expected 30 byte frame body",
        )));
    }
    let received: u16 = word(body, 14);
    let calculated = body[..FRAME_BODY_LEN - 2]
        .iter()
        .chain(START.iter())
        .map(|b| u16::from(*b))
        .fold(0u16, u16::wrapping_add);
    if received != calculated {
        return Err(SensorError::Transport(TransportError::InvalidFrame(
            "checksum mismatch",
        )));
    }
    Ok(ParticulateFrame {
        frame_length: word(body, 0),
        pm1_0: word(body, 1),
        pm2_5: word(body, 2),
        pm10_0: word(body, 3),
        pm1_0_atm: word(body, 4),
        pm2_5_atm: word(body, 5),
        pm10_0_atm: word(body, 6),
        count_0_3: word(body, 7),
        count_0_5: word(body, 8),
        count_1_0: word(body, 9),
        count_2_5: word(body, 10),
        count_5_0: word(body, 11),
        count_10_0: word(body, 12),
        version: body[26],
        error: body[27],
    })
}

pub struct Pms7003<L: SerialLink> {
    link: L,
    mode: SyncMode,
    last: Option<ParticulateFrame>,
}

impl<L: SerialLink> Pms7003<L> {
    /// Open the driver: wake the sensor and put it in passive mode.
    pub fn new(mut link: L) -> Result<Self> {
        link.flush_input()?;
        link.send(&CMD_WAKE)?;
        link.send(&CMD_SET_PASSIVE)?;
        Ok(Self {
            link,
            mode: SyncMode::Passive,
            last: None,
        })
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Most recent parsed frame, if any.
    pub fn last_frame(&self) -> Option<&ParticulateFrame> {
        self.last.as_ref()
    }

    /// Drop the last-known frame after retry exhaustion.
    pub fn clear_last(&mut self) {
        self.last = None;
    }

    fn require_mode(&self, action: &'static str, required: SyncMode) -> Result<()> {
        if self.mode != required {
            return Err(SensorError::WrongMode {
                action,
                required: required.name(),
                current: self.mode.name(),
            });
        }
        Ok(())
    }

    /// Request and read one measurement (passive mode only).
    pub fn read(&mut self) -> Result<ParticulateFrame> {
        self.require_mode("read", SyncMode::Passive)?;
        self.link.flush_input()?;
        self.link.send(&CMD_TAKE_MEASUREMENT)?;
        let frame = self.link.recv(FRAME_LEN)?;
        if frame[..2] != START {
            return Err(SensorError::Transport(TransportError::InvalidFrame(
                "missing start delimiter",
            )));
        }
        let parsed = parse_frame(&frame[2..])?;
        self.last = Some(parsed);
        Ok(parsed)
    }

    /// Wait for the next device-paced frame (active mode only), resyncing
    /// on the start delimiter.
    pub fn listen(&mut self) -> Result<ParticulateFrame> {
        self.require_mode("listen", SyncMode::Active)?;
        self.link.recv_until(&START, RESYNC_WINDOW)?;
        let body = self.link.recv(FRAME_BODY_LEN)?;
        let parsed = parse_frame(&body)?;
        self.last = Some(parsed);
        Ok(parsed)
    }

    /// Stop measuring and turn the fan off.
    pub fn sleep(&mut self) -> Result<()> {
        self.link.send(&CMD_SLEEP)?;
        self.mode = SyncMode::Sleep;
        Ok(())
    }

    /// Wake into passive mode.
    pub fn wake(&mut self) -> Result<()> {
        self.link.send(&CMD_WAKE)?;
        self.mode = SyncMode::Passive;
        Ok(())
    }

    /// Host-paced synchronization.
    pub fn set_passive(&mut self) -> Result<()> {
        self.link.send(&CMD_SET_PASSIVE)?;
        self.mode = SyncMode::Passive;
        Ok(())
    }

    /// Device-paced synchronization.
    pub fn set_active(&mut self) -> Result<()> {
        self.link.send(&CMD_SET_ACTIVE)?;
        self.mode = SyncMode::Active;
        Ok(())
    }
}
