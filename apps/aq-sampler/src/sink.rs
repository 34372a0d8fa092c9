use anyhow::Context;
use register_codec::FieldValue;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One sensor poll, flattened for a JSON-lines file.
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    pub sensor: &'static str,
    pub ts: String,
    pub fields: BTreeMap<&'static str, FieldValue>,
}

impl SampleRecord {
    pub fn now(sensor: &'static str, fields: BTreeMap<&'static str, FieldValue>) -> Self {
        let ts = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self { sensor, ts, fields }
    }
}

/// Append-only JSON-lines writer; one record per line, flushed per record
/// so a crash loses at most the line being written.
pub struct JsonlSink {
    writer: BufWriter<std::fs::File>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening output: {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, record: &SampleRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record).context("serializing sample record")?;
        writeln!(self.writer, "{line}").context("writing sample record")?;
        self.writer.flush().context("flushing sample record")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_flat_values() {
        let mut fields = BTreeMap::new();
        fields.insert("co2_ppm", FieldValue::U64(500));
        fields.insert("temperature_c", FieldValue::F64(25.5));
        let record = SampleRecord {
            sensor: "s8",
            ts: "2021-06-01T00:00:00Z".to_string(),
            fields,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"sensor":"s8","ts":"2021-06-01T00:00:00Z","fields":{"co2_ppm":500,"temperature_c":25.5}}"#
        );
    }
}
