//! Driver for the SenseAir S8 Low Power 004-0-0053 CO2 sensor.
//!
//! The S8 speaks Modbus RTU at 9600 baud over a 3.3 V UART. All commands
//! here use the any-address byte 0xFE, so a single sensor per link is
//! assumed. Read responses are `addr, func, count, payload..., crc_lo,
//! crc_hi` with a little-endian CRC-16 trailer.

use crate::{Result, SensorError};
use bus_transport::{SerialLink, TransportError};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// CRC-16/Modbus: reflected polynomial 0xA001, initial value 0xFFFF.
const fn crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = crc_table();

/// CRC-16 of a message body, little-endian as it appears on the wire.
pub fn crc(message: &[u8]) -> [u8; 2] {
    let mut crc = 0xFFFFu16;
    for byte in message {
        crc = (crc >> 8) ^ CRC_TABLE[usize::from((crc ^ u16::from(*byte)) & 0xFF)];
    }
    crc.to_le_bytes()
}

/// True when a frame's trailing checksum matches its body.
pub fn crc_ok(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    crc(body) == trailer
}

// Fixed command frames, CRCs included, from the Modbus register map:
// address, function, register hi/lo, count or value hi/lo, crc lo/hi.
const CMD_READ_CO2: [u8; 8] = [0xFE, 0x04, 0x00, 0x03, 0x00, 0x01, 0xD5, 0xC5];
const CMD_READ_TYPE_ID: [u8; 8] = [0xFE, 0x04, 0x00, 0x19, 0x00, 0x02, 0xB4, 0x03];
const CMD_READ_FW_VER: [u8; 8] = [0xFE, 0x04, 0x00, 0x1C, 0x00, 0x01, 0xE4, 0x03];
const CMD_READ_SERIAL_ID: [u8; 8] = [0xFE, 0x04, 0x00, 0x1D, 0x00, 0x02, 0xF5, 0xC2];
const CMD_READ_ERROR_CODE: [u8; 8] = [0xFE, 0x04, 0x00, 0x00, 0x00, 0x01, 0x25, 0xC5];
const CMD_READ_ABC_PERIOD: [u8; 8] = [0xFE, 0x03, 0x00, 0x1F, 0x00, 0x01, 0xA1, 0xC3];
const CMD_CLEAR_ACK: [u8; 8] = [0xFE, 0x06, 0x00, 0x00, 0x00, 0x00, 0x9D, 0xC5];
const CMD_READ_ACK: [u8; 8] = [0xFE, 0x03, 0x00, 0x00, 0x00, 0x01, 0x90, 0x05];
const CMD_FORCE_ABC: [u8; 8] = [0xFE, 0x06, 0x00, 0x01, 0x7C, 0x06, 0x6C, 0xC7];
const CMD_DISABLE_ABC: [u8; 8] = [0xFE, 0x06, 0x00, 0x1F, 0x00, 0x00, 0xAC, 0x03];
const ABC_PERIOD_PREFIX: [u8; 4] = [0xFE, 0x06, 0x00, 0x1F];

/// Background-calibration acknowledgement bit in the ack register.
const ACK_BIT: u16 = 1 << 5;

const CLEAR_ACK_SETTLE: Duration = Duration::from_millis(180);
/// A bit more than one full measurement cycle.
const CALIBRATION_CYCLE: Duration = Duration::from_millis(4500);

/// Last-known values, refreshed by the read methods.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct S8Values {
    pub co2_ppm: Option<u64>,
    pub type_id: Option<u32>,
    pub firmware_version: Option<(u8, u8)>,
    pub serial_id: Option<u32>,
    pub error_code: Option<u64>,
    pub abc_period_hours: Option<u64>,
}

pub struct SenseairS8<L: SerialLink> {
    link: L,
    values: S8Values,
    clear_ack_settle: Duration,
    calibration_cycle: Duration,
}

impl<L: SerialLink> SenseairS8<L> {
    pub fn new(mut link: L) -> Result<Self> {
        link.flush_input()?;
        Ok(Self {
            link,
            values: S8Values::default(),
            clear_ack_settle: CLEAR_ACK_SETTLE,
            calibration_cycle: CALIBRATION_CYCLE,
        })
    }

    pub fn values(&self) -> &S8Values {
        &self.values
    }

    /// Drop all last-known values after retry exhaustion.
    pub fn clear_values(&mut self) {
        self.values = S8Values::default();
    }

    /// Send a fixed command and return the payload bytes of a
    /// `response_len`-byte response after checking its CRC.
    fn request(&mut self, command: &[u8], response_len: usize) -> Result<Vec<u8>> {
        self.link.flush_input()?;
        self.link.send(command)?;
        let response = self.link.recv(response_len)?;
        if !crc_ok(&response) {
            return Err(SensorError::Transport(TransportError::InvalidFrame(
                "modbus crc mismatch",
            )));
        }
        // addr, func, count prefix; 2-byte CRC trailer
        Ok(response[3..response_len - 2].to_vec())
    }

    fn be_u64(payload: &[u8]) -> u64 {
        payload.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// Current CO2 concentration in ppm.
    pub fn read_co2(&mut self) -> Result<u64> {
        let payload = self.request(&CMD_READ_CO2, 7)?;
        let ppm = Self::be_u64(&payload);
        self.values.co2_ppm = Some(ppm);
        Ok(ppm)
    }

    /// Device model number.
    pub fn read_type_id(&mut self) -> Result<u32> {
        let payload = self.request(&CMD_READ_TYPE_ID, 9)?;
        let id = Self::be_u64(&payload) as u32;
        self.values.type_id = Some(id);
        Ok(id)
    }

    /// Operating firmware version as (major, minor).
    pub fn read_firmware_version(&mut self) -> Result<(u8, u8)> {
        let payload = self.request(&CMD_READ_FW_VER, 7)?;
        if payload.len() != 2 {
            return Err(SensorError::Transport(TransportError::InvalidFrame(
                "short firmware payload",
            )));
        }
        let version = (payload[0], payload[1]);
        self.values.firmware_version = Some(version);
        Ok(version)
    }

    /// Device serial number.
    pub fn read_serial_id(&mut self) -> Result<u32> {
        let payload = self.request(&CMD_READ_SERIAL_ID, 9)?;
        let id = Self::be_u64(&payload) as u32;
        self.values.serial_id = Some(id);
        Ok(id)
    }

    /// Device error bit flags; see the datasheet for interpretation.
    pub fn read_error_code(&mut self) -> Result<u64> {
        let payload = self.request(&CMD_READ_ERROR_CODE, 7)?;
        let code = Self::be_u64(&payload);
        self.values.error_code = Some(code);
        Ok(code)
    }

    /// Automatic Baseline Correction period in hours.
    pub fn read_abc_period(&mut self) -> Result<u64> {
        let payload = self.request(&CMD_READ_ABC_PERIOD, 7)?;
        let hours = Self::be_u64(&payload);
        self.values.abc_period_hours = Some(hours);
        Ok(hours)
    }

    /// Set the maximum time between automatic recalibrations. The device
    /// default is 192 hours (8 days).
    pub fn set_abc_period(&mut self, period_hours: u16) -> Result<()> {
        let mut frame = ABC_PERIOD_PREFIX.to_vec();
        frame.extend_from_slice(&period_hours.to_be_bytes());
        let trailer = crc(&frame);
        frame.extend_from_slice(&trailer);
        self.link.send(&frame)?;
        self.values.abc_period_hours = Some(u64::from(period_hours));
        Ok(())
    }

    /// Disable automatic baseline correction entirely.
    pub fn disable_abc(&mut self) -> Result<()> {
        self.link.send(&CMD_DISABLE_ABC)?;
        self.values.abc_period_hours = Some(0);
        Ok(())
    }

    /// Force a background recalibration and confirm it via the
    /// acknowledgement register.
    ///
    /// Blocks for a little over one measurement cycle. Fails if the device
    /// did not acknowledge, which usually means the CO2 concentration was
    /// not stable enough; trying again is reasonable.
    pub fn force_recalibration(&mut self) -> Result<()> {
        self.link.send(&CMD_CLEAR_ACK)?;
        std::thread::sleep(self.clear_ack_settle);
        self.link.send(&CMD_FORCE_ABC)?;
        std::thread::sleep(self.calibration_cycle);
        let payload = self.request(&CMD_READ_ACK, 7)?;
        if payload.len() != 2 {
            return Err(SensorError::Transport(TransportError::InvalidFrame(
                "short ack payload",
            )));
        }
        let ack = u16::from_be_bytes([payload[0], payload[1]]);
        if ack & ACK_BIT == 0 {
            return Err(SensorError::Device(
                "recalibration not acknowledged, CO2 concentration may be unstable".to_string(),
            ));
        }
        debug!("s8 background recalibration acknowledged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_transport::MockSerialLink;

    /// Build a `fe 04/03` style read response around a payload.
    fn response(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xFE, 0x04, payload.len() as u8];
        frame.extend_from_slice(payload);
        let trailer = crc(&frame);
        frame.extend_from_slice(&trailer);
        frame
    }

    #[test]
    fn test_crc_known_vector_from_datasheet() {
        // read-co2 command with its published checksum
        let body = &CMD_READ_CO2[..6];
        assert_eq!(crc(body), [0xD5, 0xC5]);
        assert!(crc_ok(&CMD_READ_CO2));
    }

    #[test]
    fn test_all_hardcoded_commands_have_valid_checksums() {
        for cmd in [
            CMD_READ_CO2,
            CMD_READ_TYPE_ID,
            CMD_READ_FW_VER,
            CMD_READ_SERIAL_ID,
            CMD_READ_ERROR_CODE,
            CMD_READ_ABC_PERIOD,
            CMD_CLEAR_ACK,
            CMD_READ_ACK,
            CMD_FORCE_ABC,
            CMD_DISABLE_ABC,
        ] {
            assert!(crc_ok(&cmd), "bad checksum in {cmd:02X?}");
        }
    }

    #[test]
    fn test_crc_table_matches_reference_entries() {
        assert_eq!(CRC_TABLE[0], 0x0000);
        assert_eq!(CRC_TABLE[1], 0xC0C1);
        assert_eq!(CRC_TABLE[2], 0xC181);
        assert_eq!(CRC_TABLE[3], 0x0140);
        assert_eq!(CRC_TABLE[255], 0x4040);
    }

    #[test]
    fn test_read_co2() {
        let mut link = MockSerialLink::new();
        link.push_response(&response(&500u16.to_be_bytes()));
        let mut s8 = SenseairS8::new(link).unwrap();
        assert_eq!(s8.read_co2().unwrap(), 500);
        assert_eq!(s8.values().co2_ppm, Some(500));
        assert_eq!(s8.link.sent()[0], CMD_READ_CO2.to_vec());
    }

    #[test]
    fn test_read_ids_and_firmware() {
        let mut link = MockSerialLink::new();
        link.push_response(&response(&[0x00, 0x01, 0x02, 0x03]));
        link.push_response(&response(&[0xFF, 0x01, 0x02, 0x03]));
        link.push_response(&response(&[0x00, 0x01]));
        let mut s8 = SenseairS8::new(link).unwrap();
        assert_eq!(s8.read_type_id().unwrap(), 0x00010203);
        assert_eq!(s8.read_serial_id().unwrap(), 0xFF010203);
        assert_eq!(s8.read_firmware_version().unwrap(), (0, 1));
    }

    #[test]
    fn test_crc_mismatch_is_an_error() {
        let mut link = MockSerialLink::new();
        let mut bad = response(&500u16.to_be_bytes());
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        link.push_response(&bad);
        let mut s8 = SenseairS8::new(link).unwrap();
        let err = s8.read_co2().unwrap_err();
        assert!(matches!(
            err,
            SensorError::Transport(TransportError::InvalidFrame(_))
        ));
        assert_eq!(s8.values().co2_ppm, None);
    }

    #[test]
    fn test_set_abc_period_appends_crc() {
        let mut s8 = SenseairS8::new(MockSerialLink::new()).unwrap();
        s8.set_abc_period(5).unwrap();
        let sent = &s8.link.sent()[0];
        assert_eq!(&sent[..6], &[0xFE, 0x06, 0x00, 0x1F, 0x00, 0x05]);
        assert!(crc_ok(sent));
        assert_eq!(s8.values().abc_period_hours, Some(5));
    }

    #[test]
    fn test_disable_abc() {
        let mut s8 = SenseairS8::new(MockSerialLink::new()).unwrap();
        s8.disable_abc().unwrap();
        assert_eq!(s8.link.sent()[0], CMD_DISABLE_ABC.to_vec());
        assert_eq!(s8.values().abc_period_hours, Some(0));
    }

    #[test]
    fn test_force_recalibration_checks_ack_bit() {
        let mut link = MockSerialLink::new();
        link.push_response(&response(&(ACK_BIT).to_be_bytes()));
        let mut s8 = SenseairS8::new(link).unwrap();
        s8.clear_ack_settle = Duration::ZERO;
        s8.calibration_cycle = Duration::ZERO;
        s8.force_recalibration().unwrap();
        assert_eq!(s8.link.sent()[0], CMD_CLEAR_ACK.to_vec());
        assert_eq!(s8.link.sent()[1], CMD_FORCE_ABC.to_vec());
        assert_eq!(s8.link.sent()[2], CMD_READ_ACK.to_vec());
    }

    #[test]
    fn test_force_recalibration_fails_without_ack() {
        let mut link = MockSerialLink::new();
        link.push_response(&response(&[0x00, 0x00]));
        let mut s8 = SenseairS8::new(link).unwrap();
        s8.clear_ack_settle = Duration::ZERO;
        s8.calibration_cycle = Duration::ZERO;
        let err = s8.force_recalibration().unwrap_err();
        assert!(matches!(err, SensorError::Device(_)));
    }
}
