use crate::{Result, SensorError};
use register_codec::FieldValue;
use std::collections::BTreeMap;

// Decoded register maps are produced by our own descriptors, so a missing
// or mistyped entry means the descriptor and the accessor disagree.

pub(crate) fn require_u64(
    map: &BTreeMap<&'static str, FieldValue>,
    name: &'static str,
) -> Result<u64> {
    map.get(name)
        .and_then(FieldValue::as_u64)
        .ok_or_else(|| SensorError::Device(format!("missing unsigned field {name}")))
}

pub(crate) fn require_i64(
    map: &BTreeMap<&'static str, FieldValue>,
    name: &'static str,
) -> Result<i64> {
    map.get(name)
        .and_then(FieldValue::as_i64)
        .ok_or_else(|| SensorError::Device(format!("missing signed field {name}")))
}

pub(crate) fn require_f64(
    map: &BTreeMap<&'static str, FieldValue>,
    name: &'static str,
) -> Result<f64> {
    map.get(name)
        .and_then(FieldValue::as_f64)
        .ok_or_else(|| SensorError::Device(format!("missing float field {name}")))
}

pub(crate) fn flag(map: &BTreeMap<&'static str, FieldValue>, name: &'static str) -> Result<bool> {
    Ok(require_u64(map, name)? != 0)
}
