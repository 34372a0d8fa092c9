use crate::error::{CodecError, Result};
use crate::field::{ByteOrder, Field};
use crate::value::FieldValue;

/// Value transform between human-readable values and raw register bytes.
///
/// A closed set of variants: every field in a device descriptor picks one.
/// Encoders are stateless apart from their fixed parameters, so a single
/// instance can be shared by any number of fields. Both directions always
/// produce or consume exactly the field's byte span; overflow is an error,
/// never a truncation.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoder {
    /// Plain unsigned integer in the field's byte order.
    Uint,
    /// Two's-complement signed integer in the field's byte order.
    Int,
    /// Bidirectional map between human keys and fixed-width codes.
    Lookup(LookupTable),
    /// Fixed-point linear transfer function for scaled physical quantities.
    Linear(LinearTransfer),
    /// Opaque byte span, passed through unchanged.
    Bytes,
}

impl Encoder {
    pub(crate) fn validate(&self, field: &str) -> Result<()> {
        match self {
            Encoder::Lookup(table) => table.validate(field),
            _ => Ok(()),
        }
    }

    pub(crate) fn encode(&self, value: &FieldValue, field: &Field) -> Result<Vec<u8>> {
        let span = field.span();
        let order = field.byte_order();
        match self {
            Encoder::Uint => {
                let v = match value {
                    FieldValue::U64(v) => *v,
                    FieldValue::Bool(b) => u64::from(*b),
                    _ => {
                        return Err(CodecError::WrongValueType {
                            field: field.name().to_string(),
                            expected: "unsigned integer",
                        })
                    }
                };
                pack_unsigned(v, span, order).ok_or_else(|| CodecError::ValueOutOfRange {
                    field: field.name().to_string(),
                    detail: format!("{v} does not fit in {span} bytes"),
                })
            }
            Encoder::Int => {
                let v = value.as_i64().ok_or(CodecError::WrongValueType {
                    field: field.name().to_string(),
                    expected: "signed integer",
                })?;
                pack_signed(v, span, order).ok_or_else(|| CodecError::ValueOutOfRange {
                    field: field.name().to_string(),
                    detail: format!("{v} does not fit in {span} signed bytes"),
                })
            }
            Encoder::Lookup(table) => {
                let code = table.encode(value, field)?;
                pack_unsigned(code, span, order).ok_or_else(|| CodecError::ValueOutOfRange {
                    field: field.name().to_string(),
                    detail: format!("lookup code {code} does not fit in {span} bytes"),
                })
            }
            Encoder::Linear(transfer) => transfer.encode(value, field),
            Encoder::Bytes => {
                let bytes = value.as_bytes().ok_or(CodecError::WrongValueType {
                    field: field.name().to_string(),
                    expected: "byte string",
                })?;
                if bytes.len() != span {
                    return Err(CodecError::WidthMismatch {
                        target: format!("field {}", field.name()),
                        expected: span,
                        got: bytes.len(),
                    });
                }
                Ok(bytes.to_vec())
            }
        }
    }

    pub(crate) fn decode(&self, raw: &[u8], field: &Field) -> Result<FieldValue> {
        let order = field.byte_order();
        match self {
            Encoder::Uint => {
                let v = unpack_unsigned(raw, order).ok_or_else(|| CodecError::WidthMismatch {
                    target: format!("field {}", field.name()),
                    expected: 8,
                    got: raw.len(),
                })?;
                Ok(FieldValue::U64(v))
            }
            Encoder::Int => {
                let v = unpack_signed(raw, order).ok_or_else(|| CodecError::WidthMismatch {
                    target: format!("field {}", field.name()),
                    expected: 8,
                    got: raw.len(),
                })?;
                Ok(FieldValue::I64(v))
            }
            Encoder::Lookup(table) => {
                let raw_code =
                    unpack_unsigned(raw, order).ok_or_else(|| CodecError::WidthMismatch {
                        target: format!("field {}", field.name()),
                        expected: 8,
                        got: raw.len(),
                    })?;
                table.decode(raw_code, field)
            }
            Encoder::Linear(transfer) => transfer.decode(raw, field),
            Encoder::Bytes => Ok(FieldValue::Bytes(raw.to_vec())),
        }
    }
}

/// Bidirectional mapping between human-readable keys and register codes.
///
/// Keys may be integers, floats, or text. Decoding a code that is absent
/// from the table is a codec error, never a silent nearest match: an
/// unknown code means a corrupt or unsupported hardware response.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    entries: Vec<(FieldValue, u64)>,
}

impl LookupTable {
    pub fn new(entries: Vec<(FieldValue, u64)>) -> Self {
        Self { entries }
    }

    /// Table with unsigned-integer keys.
    pub fn of_u64(pairs: &[(u64, u64)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(k, v)| (FieldValue::U64(*k), *v))
                .collect(),
        )
    }

    /// Table with float keys (mixed-unit tables like millisecond periods).
    pub fn of_f64(pairs: &[(f64, u64)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(k, v)| (FieldValue::F64(*k), *v))
                .collect(),
        )
    }

    /// Table with text keys (named modes).
    pub fn of_text(pairs: &[(&str, u64)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(k, v)| (FieldValue::text(k), *v))
                .collect(),
        )
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.entries.is_empty() {
            return Err(CodecError::BadLookupTable {
                field: field.to_string(),
                reason: "table is empty".to_string(),
            });
        }
        for (i, (key, _)) in self.entries.iter().enumerate() {
            if self.entries[..i].iter().any(|(k, _)| k == key) {
                return Err(CodecError::BadLookupTable {
                    field: field.to_string(),
                    reason: format!("duplicate key {key:?}"),
                });
            }
        }
        Ok(())
    }

    fn encode(&self, value: &FieldValue, field: &Field) -> Result<u64> {
        self.entries
            .iter()
            .find(|(key, _)| key == value)
            .map(|(_, code)| *code)
            .ok_or_else(|| CodecError::ValueOutOfRange {
                field: field.name().to_string(),
                detail: format!("{value:?} is not in the lookup table"),
            })
    }

    fn decode(&self, raw: u64, field: &Field) -> Result<FieldValue> {
        // First match wins; duplicate codes are the descriptor author's
        // guarantee that the decode direction stays a partial function.
        self.entries
            .iter()
            .find(|(_, code)| *code == raw)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| CodecError::NoLookupMatch {
                field: field.name().to_string(),
                raw,
            })
    }
}

/// Fixed-point linear transfer function.
///
/// `encode(h) = round((h + offset) * scale)`, optionally clamped to a raw
/// floor, packed into the field's byte span; `decode(raw) = raw / scale -
/// offset`. Each physical quantity bakes its own constants into one value
/// of this type; clamping is part of that per-encoder contract, not a
/// framework default. Round trips are exact to one least-significant raw
/// unit, i.e. `1 / scale` in the human domain.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearTransfer {
    scale: f64,
    offset: f64,
    floor: Option<f64>,
    decode_only: bool,
}

impl LinearTransfer {
    pub fn new(scale: f64, offset: f64) -> Self {
        Self {
            scale,
            offset,
            floor: None,
            decode_only: false,
        }
    }

    /// Clamp encoded raw values at `floor` instead of failing.
    pub fn with_floor(mut self, floor: f64) -> Self {
        self.floor = Some(floor);
        self
    }

    /// Make `encode` fail: the quantity can only be read from hardware.
    pub fn decode_only(mut self) -> Self {
        self.decode_only = true;
        self
    }

    fn encode(&self, value: &FieldValue, field: &Field) -> Result<Vec<u8>> {
        if self.decode_only {
            return Err(CodecError::ReadOnly {
                target: format!("field {}", field.name()),
            });
        }
        let v = match value {
            FieldValue::F64(v) => *v,
            FieldValue::I64(v) => *v as f64,
            FieldValue::U64(v) => *v as f64,
            _ => {
                return Err(CodecError::WrongValueType {
                    field: field.name().to_string(),
                    expected: "number",
                })
            }
        };
        let mut raw = ((v + self.offset) * self.scale).round();
        if let Some(floor) = self.floor {
            if raw < floor {
                raw = floor;
            }
        }
        if !(0.0..=u64::MAX as f64).contains(&raw) {
            return Err(CodecError::ValueOutOfRange {
                field: field.name().to_string(),
                detail: format!("{v} scales to negative or non-finite raw value"),
            });
        }
        pack_unsigned(raw as u64, field.span(), field.byte_order()).ok_or_else(|| {
            CodecError::ValueOutOfRange {
                field: field.name().to_string(),
                detail: format!("{v} does not fit in {} bytes after scaling", field.span()),
            }
        })
    }

    fn decode(&self, raw: &[u8], field: &Field) -> Result<FieldValue> {
        let n = unpack_unsigned(raw, field.byte_order()).ok_or_else(|| {
            CodecError::WidthMismatch {
                target: format!("field {}", field.name()),
                expected: 8,
                got: raw.len(),
            }
        })?;
        Ok(FieldValue::F64(n as f64 / self.scale - self.offset))
    }
}

/// Pack an unsigned integer into `n` bytes, or `None` on overflow.
pub(crate) fn pack_unsigned(value: u64, n: usize, order: ByteOrder) -> Option<Vec<u8>> {
    if n == 0 {
        return None;
    }
    if n < 8 && value >= 1u64 << (8 * n as u32) {
        return None;
    }
    let wide = value.to_be_bytes();
    let mut out = if n <= 8 {
        wide[8 - n..].to_vec()
    } else {
        let mut padded = vec![0u8; n - 8];
        padded.extend_from_slice(&wide);
        padded
    };
    if order == ByteOrder::Little {
        out.reverse();
    }
    Some(out)
}

/// Unpack an unsigned integer, or `None` if the value exceeds 64 bits.
pub(crate) fn unpack_unsigned(bytes: &[u8], order: ByteOrder) -> Option<u64> {
    let mut buf = bytes.to_vec();
    if order == ByteOrder::Little {
        buf.reverse();
    }
    let significant = match buf.iter().position(|b| *b != 0) {
        Some(i) => &buf[i..],
        None => return Some(0),
    };
    if significant.len() > 8 {
        return None;
    }
    Some(
        significant
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
    )
}

/// Pack a two's-complement signed integer into `n` bytes, or `None` on
/// overflow.
pub(crate) fn pack_signed(value: i64, n: usize, order: ByteOrder) -> Option<Vec<u8>> {
    if n == 0 {
        return None;
    }
    if n < 8 {
        let bits = 8 * n as u32;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if value < min || value > max {
            return None;
        }
    }
    let wide = value.to_be_bytes();
    let mut out = if n <= 8 {
        wide[8 - n..].to_vec()
    } else {
        let fill = if value < 0 { 0xFF } else { 0x00 };
        let mut padded = vec![fill; n - 8];
        padded.extend_from_slice(&wide);
        padded
    };
    if order == ByteOrder::Little {
        out.reverse();
    }
    Some(out)
}

/// Unpack a two's-complement signed integer, sign-extending from the span's
/// top bit; `None` if the magnitude exceeds 64 bits.
pub(crate) fn unpack_signed(bytes: &[u8], order: ByteOrder) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    let mut buf = bytes.to_vec();
    if order == ByteOrder::Little {
        buf.reverse();
    }
    let negative = buf[0] & 0x80 != 0;
    if buf.len() > 8 {
        let fill = if negative { 0xFF } else { 0x00 };
        if buf[..buf.len() - 8].iter().any(|b| *b != fill) {
            return None;
        }
        buf = buf[buf.len() - 8..].to_vec();
    }
    let mut acc: i64 = if negative { -1 } else { 0 };
    for b in &buf {
        acc = (acc << 8) | i64::from(*b);
    }
    Some(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;

    fn plain_field(span: usize, encoder: Encoder) -> Field {
        Field::new("f")
            .bytes(0..=span - 1)
            .encoder(encoder)
            .build()
            .unwrap()
    }

    #[test]
    fn test_uint_round_trip_boundaries() {
        let f = plain_field(2, Encoder::Uint);
        for v in [0u64, 1, 0x7FFF, 0xFFFF] {
            let raw = f.encode(&FieldValue::U64(v)).unwrap();
            assert_eq!(f.decode(&raw).unwrap(), FieldValue::U64(v));
        }
    }

    #[test]
    fn test_uint_overflow_is_error_not_truncation() {
        let f = plain_field(1, Encoder::Uint);
        let err = f.encode(&FieldValue::U64(256)).unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange { .. }));
    }

    #[test]
    fn test_sint_round_trip_boundaries() {
        let f = plain_field(2, Encoder::Int);
        for v in [-32768i64, -1000, -1, 0, 1, 32767] {
            let raw = f.encode(&FieldValue::I64(v)).unwrap();
            assert_eq!(f.decode(&raw).unwrap(), FieldValue::I64(v));
        }
    }

    #[test]
    fn test_sint_big_endian_two_complement() {
        let f = plain_field(2, Encoder::Int);
        assert_eq!(f.decode(&[0xFC, 0x18]).unwrap(), FieldValue::I64(-1000));
    }

    #[test]
    fn test_sint_little_endian_calibration_word() {
        // 0x18 0xFC on the wire, least significant byte first
        let f = Field::new("dig_t2")
            .bytes(0..=1)
            .encoder(Encoder::Int)
            .little_endian()
            .build()
            .unwrap();
        assert_eq!(f.decode(&[0x18, 0xFC]).unwrap(), FieldValue::I64(-1000));
    }

    #[test]
    fn test_sint_overflow_rejected() {
        let f = plain_field(1, Encoder::Int);
        assert!(f.encode(&FieldValue::I64(128)).is_err());
        assert!(f.encode(&FieldValue::I64(-129)).is_err());
        assert!(f.encode(&FieldValue::I64(-128)).is_ok());
    }

    #[test]
    fn test_lookup_power_modes() {
        let table = LookupTable::of_text(&[("sleep", 0b00), ("forced", 0b10), ("normal", 0b11)]);
        let f = plain_field(1, Encoder::Lookup(table));
        assert_eq!(f.encode(&FieldValue::text("forced")).unwrap(), vec![0b10]);
        assert_eq!(f.decode(&[0b11]).unwrap(), FieldValue::text("normal"));
        let err = f.decode(&[0b01]).unwrap_err();
        assert!(matches!(err, CodecError::NoLookupMatch { raw: 0b01, .. }));
    }

    #[test]
    fn test_lookup_unknown_key_rejected_before_io() {
        let table = LookupTable::of_u64(&[(0, 0), (1, 1), (2, 0b010)]);
        let f = plain_field(1, Encoder::Lookup(table));
        assert!(f.encode(&FieldValue::U64(3)).is_err());
    }

    #[test]
    fn test_lookup_duplicate_keys_rejected_at_build() {
        let table = LookupTable::of_u64(&[(1, 0), (1, 1)]);
        let err = Field::new("f")
            .encoder(Encoder::Lookup(table))
            .build()
            .unwrap_err();
        assert!(matches!(err, CodecError::BadLookupTable { .. }));
    }

    #[test]
    fn test_linear_temperature_offset_scale_floor() {
        // (T + 25) * 512, clamped at raw zero
        let enc = Encoder::Linear(LinearTransfer::new(512.0, 25.0).with_floor(0.0));
        let f = plain_field(2, enc);
        assert_eq!(f.encode(&FieldValue::F64(-25.0)).unwrap(), vec![0, 0]);
        assert_eq!(
            f.encode(&FieldValue::F64(0.0)).unwrap(),
            12800u16.to_be_bytes().to_vec()
        );
        // below the domain floor still clamps instead of going negative
        assert_eq!(f.encode(&FieldValue::F64(-40.0)).unwrap(), vec![0, 0]);
        let back = f.decode(&[0x00, 0x00]).unwrap().as_f64().unwrap();
        assert!((back - -25.0).abs() < 1.0 / 512.0);
        let back = f
            .decode(&12800u16.to_be_bytes())
            .unwrap()
            .as_f64()
            .unwrap();
        assert!(back.abs() < 1.0 / 512.0);
    }

    #[test]
    fn test_linear_humidity_round_trip_within_quantization() {
        let enc = Encoder::Linear(LinearTransfer::new(512.0, 0.0));
        let f = plain_field(2, enc);
        for rh in [0.0, 54.3, 100.0] {
            let raw = f.encode(&FieldValue::F64(rh)).unwrap();
            let back = f.decode(&raw).unwrap().as_f64().unwrap();
            assert!((back - rh).abs() <= 1.0 / 512.0, "rh {rh} -> {back}");
        }
    }

    #[test]
    fn test_linear_decode_only_fails_encode_loudly() {
        // T = raw * 165 / 2^16 - 40
        let enc = Encoder::Linear(LinearTransfer::new(65536.0 / 165.0, 40.0).decode_only());
        let f = plain_field(2, enc);
        let err = f.encode(&FieldValue::F64(20.0)).unwrap_err();
        assert!(matches!(err, CodecError::ReadOnly { .. }));
        let mid = f.decode(&[0x80, 0x00]).unwrap().as_f64().unwrap();
        assert!((mid - 42.5).abs() < 0.01);
    }

    #[test]
    fn test_bytes_width_checked() {
        let f = plain_field(4, Encoder::Bytes);
        assert!(f
            .encode(&FieldValue::Bytes(vec![0x11, 0xE5, 0x72, 0x8A]))
            .is_ok());
        let err = f.encode(&FieldValue::Bytes(vec![0x11])).unwrap_err();
        assert!(matches!(err, CodecError::WidthMismatch { .. }));
    }

    #[test]
    fn test_unpack_unsigned_long_span() {
        // five byte serial number fits a u64
        let v = unpack_unsigned(&[0x01, 0x02, 0x03, 0x04, 0x05], ByteOrder::Big).unwrap();
        assert_eq!(v, 0x0102030405);
    }
}
