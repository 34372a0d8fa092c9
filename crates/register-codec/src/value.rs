use serde::{Deserialize, Serialize};

/// A decoded field value.
///
/// This is the sole interchange type between the codec framework and its
/// callers: register reads produce maps of these, register writes consume
/// them. The untagged representation serializes to plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn text(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// 1 for a set flag, 0 for a clear one. Single-bit fields decode as
    /// `U64`, so this is the usual way to test them.
    pub fn is_set(&self) -> bool {
        matches!(self, FieldValue::U64(v) if *v != 0) || matches!(self, FieldValue::Bool(true))
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_serialization() {
        let vals = vec![
            FieldValue::U64(1013),
            FieldValue::F64(25.5),
            FieldValue::Text("normal".to_string()),
        ];
        let json = serde_json::to_string(&vals).unwrap();
        assert_eq!(json, r#"[1013,25.5,"normal"]"#);
    }

    #[test]
    fn test_accessors_are_strict() {
        assert_eq!(FieldValue::U64(7).as_u64(), Some(7));
        assert_eq!(FieldValue::U64(7).as_i64(), None);
        assert_eq!(FieldValue::Text("x".into()).as_u64(), None);
    }

    #[test]
    fn test_is_set() {
        assert!(FieldValue::U64(1).is_set());
        assert!(!FieldValue::U64(0).is_set());
        assert!(FieldValue::Bool(true).is_set());
    }
}
