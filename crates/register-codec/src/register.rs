use crate::error::{CodecError, Result};
use crate::field::{Field, FieldBuilder};
use crate::value::FieldValue;
use std::collections::BTreeMap;

/// Read/write direction of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
    /// Reset and trigger mailboxes: writable, never readable, never cached.
    WriteOnly,
}

/// A named, address-tagged collection of fields that share the device's
/// register space at one base address.
///
/// Fields may overlap in byte range only if their bit masks are disjoint;
/// the framework merges such fields on write but does not police mask
/// disjointness, which is the descriptor author's responsibility.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    name: &'static str,
    address: u8,
    fields: Vec<Field>,
    n_bits: u32,
    access: Access,
    non_volatile: bool,
}

impl Register {
    /// Start describing a register. Defaults: 8 bits wide, read/write,
    /// volatile.
    pub fn new(name: &'static str, address: u8) -> RegisterBuilder {
        RegisterBuilder {
            name,
            address,
            fields: Vec::new(),
            n_bits: 8,
            access: Access::ReadWrite,
            non_volatile: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn n_bits(&self) -> u32 {
        self.n_bits
    }

    pub fn width_bytes(&self) -> usize {
        (self.n_bits / 8) as usize
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// True when the contents cannot change without a device reset (chip
    /// ids, factory calibration). Governs the read cache, not transport
    /// behavior.
    pub fn non_volatile(&self) -> bool {
        self.non_volatile
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| CodecError::NoSuchField {
                register: self.name.to_string(),
                field: name.to_string(),
            })
    }

    /// Decode a full register read into a field-value map.
    ///
    /// All-or-nothing: if any field fails to decode, the whole read fails
    /// and nothing is returned.
    pub fn decode_fields(&self, raw: &[u8]) -> Result<BTreeMap<&'static str, FieldValue>> {
        if raw.len() != self.width_bytes() {
            return Err(CodecError::WidthMismatch {
                target: format!("register {}", self.name),
                expected: self.width_bytes(),
                got: raw.len(),
            });
        }
        let mut out = BTreeMap::new();
        for field in &self.fields {
            let slice = &raw[field.first_byte()..=field.last_byte()];
            out.insert(field.name(), field.decode(slice)?);
        }
        Ok(out)
    }

    /// Encode field values into the raw payload to write.
    ///
    /// Encoded values are grouped by byte span; fields packed into the same
    /// span via disjoint bit masks are merged by bitwise OR (each fragment
    /// arrives already shifted into its final position). Groups are then
    /// concatenated in order of increasing start offset.
    ///
    /// Bytes not touched by any supplied field are absent from the output,
    /// not zero-filled: the caller must supply enough fields to cover the
    /// payload the device expects, or arrange a read-modify-write at the
    /// transport. The result does not depend on the order of `values`.
    pub fn encode_fields(&self, values: &[(&str, FieldValue)]) -> Result<Vec<u8>> {
        let mut groups: BTreeMap<&[usize], Vec<Vec<u8>>> = BTreeMap::new();
        for (name, value) in values {
            let field = self.field(name)?;
            groups
                .entry(field.byte_index())
                .or_default()
                .push(field.encode(value)?);
        }
        let mut out = Vec::with_capacity(self.width_bytes());
        for (index, fragments) in groups {
            out.extend(merge_fragments(self.name, index, fragments)?);
        }
        Ok(out)
    }
}

/// OR-merge same-span fragments into one byte group.
fn merge_fragments(
    register: &'static str,
    index: &[usize],
    mut fragments: Vec<Vec<u8>>,
) -> Result<Vec<u8>> {
    let mut merged = match fragments.pop() {
        Some(f) => f,
        None => return Ok(Vec::new()),
    };
    for fragment in fragments {
        if fragment.len() != merged.len() {
            return Err(CodecError::WidthMismatch {
                target: format!("register {register} byte group at {}", index[0]),
                expected: merged.len(),
                got: fragment.len(),
            });
        }
        for (byte, other) in merged.iter_mut().zip(&fragment) {
            *byte |= other;
        }
    }
    Ok(merged)
}

#[derive(Debug, Clone)]
pub struct RegisterBuilder {
    name: &'static str,
    address: u8,
    fields: Vec<FieldBuilder>,
    n_bits: u32,
    access: Access,
    non_volatile: bool,
}

impl RegisterBuilder {
    pub fn field(mut self, field: FieldBuilder) -> Self {
        self.fields.push(field);
        self
    }

    pub fn width_bits(mut self, n_bits: u32) -> Self {
        self.n_bits = n_bits;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.access = Access::WriteOnly;
        self
    }

    pub fn non_volatile(mut self) -> Self {
        self.non_volatile = true;
        self
    }

    pub fn build(self) -> Result<Register> {
        if self.n_bits == 0 || self.n_bits % 8 != 0 {
            return Err(CodecError::BadRegisterWidth {
                register: self.name.to_string(),
                bits: self.n_bits,
            });
        }
        let width_bytes = (self.n_bits / 8) as usize;
        let mut fields = Vec::with_capacity(self.fields.len());
        for builder in self.fields {
            let field = builder.build()?;
            if fields.iter().any(|f: &Field| f.name() == field.name()) {
                return Err(CodecError::DuplicateField {
                    register: self.name.to_string(),
                    field: field.name().to_string(),
                });
            }
            if field.last_byte() >= width_bytes {
                return Err(CodecError::FieldOutOfRange {
                    register: self.name.to_string(),
                    field: field.name().to_string(),
                    bits: self.n_bits,
                });
            }
            fields.push(field);
        }
        Ok(Register {
            name: self.name,
            address: self.address,
            fields,
            n_bits: self.n_bits,
            access: self.access,
            non_volatile: self.non_volatile,
        })
    }
}
