//! Header descriptors bound to a live byte range: [`HeaderInstance`].

use crate::config::{HeaderDescriptor, WidthConfig};
use crate::expr::eval_expr;
use crate::field::{extract_bits, extract_bytes, insert_bits, insert_bytes, FieldValue};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

fn resolve_width(width: &WidthConfig, known: &HashMap<String, i64>) -> Result<u32> {
    let raw = match width {
        WidthConfig::Fixed(n) => *n,
        WidthConfig::Expr(expr) => eval_expr(expr, known)?,
    };
    Ok(raw.max(0) as u32)
}

/// A header descriptor bound to a live byte buffer: field values, a
/// modified flag, and the byte/bit length implied by its fields.
#[derive(Debug, Clone)]
pub struct HeaderInstance {
    descriptor: Arc<HeaderDescriptor>,
    bytes: Vec<u8>,
    fields: HashMap<String, FieldValue>,
    modified: bool,
    bit_length: u32,
}

impl HeaderInstance {
    /// Parse a field-structured header out of `buf`, starting at its front.
    ///
    /// Field widths may reference earlier sibling fields by name; those
    /// fields must therefore be resolvable to an integer.
    pub fn parse(descriptor: Arc<HeaderDescriptor>, buf: &[u8]) -> Result<Self> {
        if descriptor.opaque {
            return Err(Error::Configuration(format!(
                "header {:?} is opaque; use HeaderInstance::parse_opaque",
                descriptor.name
            )));
        }
        let mut fields = HashMap::new();
        let mut known: HashMap<String, i64> = HashMap::new();
        let mut bit_offset: u32 = 0;
        for field in &descriptor.fields {
            let width = resolve_width(&field.width, &known)?;
            let value = if width == 0 {
                FieldValue::Int(0)
            } else if width <= 64 {
                FieldValue::Int(extract_bits(buf, bit_offset, width)?)
            } else {
                FieldValue::Bytes(extract_bytes(buf, bit_offset, width)?)
            };
            known.insert(field.name.clone(), value.as_int() as i64);
            fields.insert(field.name.clone(), value);
            bit_offset += width;
        }
        let byte_length = bit_offset.div_ceil(8) as usize;
        if byte_length > buf.len() {
            return Err(Error::Assertion(format!(
                "header {:?} needs {byte_length} bytes but only {} are available",
                descriptor.name,
                buf.len()
            )));
        }
        Ok(Self {
            descriptor,
            bytes: buf[..byte_length].to_vec(),
            fields,
            modified: false,
            bit_length: bit_offset,
        })
    }

    /// Parse an opaque (field-less) header of externally supplied `length` bytes.
    pub fn parse_opaque(descriptor: Arc<HeaderDescriptor>, buf: &[u8], length: usize) -> Result<Self> {
        if length > buf.len() {
            return Err(Error::Assertion(format!(
                "opaque header {:?} needs {length} bytes but only {} are available",
                descriptor.name,
                buf.len()
            )));
        }
        Ok(Self {
            descriptor,
            bytes: buf[..length].to_vec(),
            fields: HashMap::new(),
            modified: false,
            bit_length: (length * 8) as u32,
        })
    }

    /// Construct a fresh, zero-filled header instance for insertion into a
    /// packet. Every field width must be statically resolvable (no
    /// expressions referencing not-yet-known siblings), since there is no
    /// source buffer to parse from.
    pub fn new_empty(descriptor: Arc<HeaderDescriptor>) -> Result<Self> {
        if descriptor.opaque {
            return Err(Error::Configuration(format!(
                "header {:?} is opaque; use HeaderInstance::new_empty_opaque",
                descriptor.name
            )));
        }
        let known: HashMap<String, i64> = HashMap::new();
        let mut total_bits = 0u32;
        let mut fields = HashMap::new();
        for field in &descriptor.fields {
            let width = resolve_width(&field.width, &known)?;
            fields.insert(field.name.clone(), FieldValue::Int(0));
            total_bits += width;
        }
        let byte_length = total_bits.div_ceil(8) as usize;
        Ok(Self {
            descriptor,
            bytes: vec![0u8; byte_length],
            fields,
            modified: false,
            bit_length: total_bits,
        })
    }

    /// Construct a fresh, zero-filled opaque header of `length` bytes.
    pub fn new_empty_opaque(descriptor: Arc<HeaderDescriptor>, length: usize) -> Self {
        Self {
            descriptor,
            bytes: vec![0u8; length],
            fields: HashMap::new(),
            modified: false,
            bit_length: (length * 8) as u32,
        }
    }

    /// Header descriptor name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Byte length of this header instance.
    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    /// Bit length of this header instance.
    pub fn bit_length(&self) -> u32 {
        self.bit_length
    }

    /// Get a field's value. Returns `Int(0)` for an absent field, so that
    /// action evaluation can tolerate a missing field without erroring.
    pub fn get_field(&self, name: &str) -> FieldValue {
        self.fields.get(name).cloned().unwrap_or(FieldValue::Int(0))
    }

    /// Whether `name` names a field on this header.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Set a field's value. Returns `None` if the field is not present on
    /// this header.
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Option<()> {
        let slot = self.fields.get_mut(name)?;
        *slot = value;
        self.modified = true;
        Some(())
    }

    /// Serialize this header's bytes. Returns the original bytes verbatim
    /// if unmodified; otherwise re-emits every field via the codec.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if !self.modified {
            return Ok(self.bytes.clone());
        }
        let mut out = vec![0u8; self.bytes.len()];
        let mut bit_offset = 0u32;
        let mut known: HashMap<String, i64> = HashMap::new();
        for field in &self.descriptor.fields {
            let value = self.fields.get(&field.name).cloned().unwrap_or(FieldValue::Int(0));
            let width = resolve_width(&field.width, &known)?;
            known.insert(field.name.clone(), value.as_int() as i64);
            if width == 0 {
                continue;
            }
            match &value {
                FieldValue::Int(v) => insert_bits(&mut out, bit_offset, width, *v)?,
                FieldValue::Bytes(b) => insert_bytes(&mut out, bit_offset, b)?,
            }
            bit_offset += width;
        }
        Ok(out)
    }
}
