//! The mutable packet state that flows through the processor chain:
//! [`ParsedPacket`].

use crate::config::HeaderDescriptor;
use crate::field::FieldValue;
use crate::header::HeaderInstance;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Insertion-ordered header map, mirroring the original's `ListDict`: header
/// wire order is exactly insertion order, with `insert_before`/`insert_after`
/// support for splicing a new header next to an existing anchor.
#[derive(Debug, Clone, Default)]
struct OrderedHeaderMap {
    order: Vec<String>,
    by_name: HashMap<String, HeaderInstance>,
}

impl OrderedHeaderMap {
    fn push_back(&mut self, name: String, inst: HeaderInstance) -> Result<()> {
        if self.by_name.contains_key(&name) {
            return Err(Error::PacketModification(format!("header {name:?} already present")));
        }
        self.order.push(name.clone());
        self.by_name.insert(name, inst);
        Ok(())
    }

    fn insert_after(&mut self, anchor: &str, name: String, inst: HeaderInstance) -> Result<()> {
        if self.by_name.contains_key(&name) {
            return Err(Error::PacketModification(format!("header {name:?} already present")));
        }
        let pos = self
            .order
            .iter()
            .position(|n| n == anchor)
            .ok_or_else(|| Error::PacketModification(format!("anchor header {anchor:?} not found")))?;
        self.order.insert(pos + 1, name.clone());
        self.by_name.insert(name, inst);
        Ok(())
    }

    fn insert_before(&mut self, anchor: &str, name: String, inst: HeaderInstance) -> Result<()> {
        if self.by_name.contains_key(&name) {
            return Err(Error::PacketModification(format!("header {name:?} already present")));
        }
        let pos = self
            .order
            .iter()
            .position(|n| n == anchor)
            .ok_or_else(|| Error::PacketModification(format!("anchor header {anchor:?} not found")))?;
        self.order.insert(pos, name.clone());
        self.by_name.insert(name, inst);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Option<HeaderInstance> {
        let pos = self.order.iter().position(|n| n == name)?;
        self.order.remove(pos);
        self.by_name.remove(name)
    }

    fn get(&self, name: &str) -> Option<&HeaderInstance> {
        self.by_name.get(name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut HeaderInstance> {
        self.by_name.get_mut(name)
    }

    fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn last_name(&self) -> Option<&str> {
        self.order.last().map(|s| s.as_str())
    }

    fn total_length(&self) -> usize {
        self.order.iter().filter_map(|n| self.by_name.get(n)).map(|h| h.length()).sum()
    }

    fn iter(&self) -> impl Iterator<Item = &HeaderInstance> {
        self.order.iter().filter_map(|n| self.by_name.get(n))
    }
}

/// The mutable packet object flowing through the processor chain: an
/// insertion-ordered header map, metadata (logical fields that never
/// serialize), a payload window into the original buffer, and a unique id.
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    id: u64,
    parent_id: Option<u64>,
    original: Arc<Vec<u8>>,
    headers: OrderedHeaderMap,
    metadata: HashMap<String, FieldValue>,
    payload_offset: usize,
    payload_length: usize,
    parse_error: Option<String>,
}

impl ParsedPacket {
    /// Construct a fresh packet from raw ingress bytes.
    pub fn new(original: Vec<u8>) -> Self {
        let len = original.len();
        Self {
            id: next_id(),
            parent_id: None,
            original: Arc::new(original),
            headers: OrderedHeaderMap::default(),
            metadata: HashMap::new(),
            payload_offset: 0,
            payload_length: len,
            parse_error: None,
        }
    }

    /// This packet's unique, process-wide id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The id of the packet this one was replicated from, if any.
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// Bytes of the original ingress packet remaining unparsed.
    fn remaining(&self) -> &[u8] {
        &self.original[self.payload_offset..self.payload_offset + self.payload_length]
    }

    /// Parse the next header off the front of the remaining payload.
    pub fn parse_header(&mut self, name: &str, descriptor: Arc<HeaderDescriptor>) -> Result<()> {
        let inst = HeaderInstance::parse(descriptor, self.remaining())?;
        let len = inst.length();
        self.headers.push_back(name.to_string(), inst)?;
        self.payload_offset += len;
        self.payload_length -= len;
        Ok(())
    }

    /// Consume `n` bytes off the front of the payload as an anonymous,
    /// field-less header, recorded under `name`.
    pub fn parse_skip_byte_block(&mut self, name: &str, descriptor: Arc<HeaderDescriptor>, n: usize) -> Result<()> {
        let inst = HeaderInstance::parse_opaque(descriptor, self.remaining(), n)?;
        self.headers.push_back(name.to_string(), inst)?;
        self.payload_offset += n;
        self.payload_length -= n;
        Ok(())
    }

    fn split_reference(reference: &str) -> (&str, &str) {
        match reference.split_once('.') {
            Some((head, tail)) => (head, tail),
            None => (reference, ""),
        }
    }

    /// Read a field by dotted `header.field` reference, or a metadata key.
    /// Returns `Int(0)` when the reference cannot be resolved, so action
    /// evaluation can tolerate a missing field.
    pub fn get_field(&self, reference: &str) -> FieldValue {
        let (head, tail) = Self::split_reference(reference);
        if !tail.is_empty() {
            if let Some(h) = self.headers.get(head) {
                return h.get_field(tail);
            }
        }
        self.metadata.get(reference).cloned().unwrap_or(FieldValue::Int(0))
    }

    /// Write a field by dotted `header.field` reference, or a metadata key.
    /// Returns `None` if the header is absent or the header has no such
    /// field; metadata keys are always writable.
    pub fn set_field(&mut self, reference: &str, value: FieldValue) -> Option<()> {
        let (head, tail) = Self::split_reference(reference);
        if !tail.is_empty() {
            if let Some(h) = self.headers.get_mut(head) {
                return h.set_field(tail, value);
            }
        }
        self.metadata.insert(reference.to_string(), value);
        Some(())
    }

    /// True iff `name` is a header present on this packet.
    pub fn header_valid(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Sum of all parsed headers' byte lengths.
    pub fn header_length(&self) -> usize {
        self.headers.total_length()
    }

    /// Insert a fresh, zeroed header immediately after `anchor`. Returns the
    /// new header's byte length.
    pub fn add_header_after(&mut self, name: &str, descriptor: Arc<HeaderDescriptor>) -> Result<usize> {
        let anchor = self
            .headers
            .last_name()
            .ok_or_else(|| Error::PacketModification("cannot add header: packet has no headers yet".to_string()))?
            .to_string();
        self.add_header_after_anchor(name, descriptor, &anchor)
    }

    /// Insert a fresh, zeroed header immediately after the named `anchor`.
    pub fn add_header_after_anchor(
        &mut self,
        name: &str,
        descriptor: Arc<HeaderDescriptor>,
        anchor: &str,
    ) -> Result<usize> {
        let inst = HeaderInstance::new_empty(descriptor)?;
        let len = inst.length();
        self.headers.insert_after(anchor, name.to_string(), inst)?;
        Ok(len)
    }

    /// Insert a fresh, zeroed header immediately before the named `anchor`.
    pub fn add_header_before(&mut self, name: &str, descriptor: Arc<HeaderDescriptor>, anchor: &str) -> Result<usize> {
        let inst = HeaderInstance::new_empty(descriptor)?;
        let len = inst.length();
        self.headers.insert_before(anchor, name.to_string(), inst)?;
        Ok(len)
    }

    /// Append a fresh, zeroed header at the very end of the header list.
    pub fn append_header(&mut self, name: &str, descriptor: Arc<HeaderDescriptor>) -> Result<usize> {
        let inst = HeaderInstance::new_empty(descriptor)?;
        let len = inst.length();
        self.headers.push_back(name.to_string(), inst)?;
        Ok(len)
    }

    /// Remove a header by name. Returns its byte length, or `None` if absent.
    pub fn remove_header(&mut self, name: &str) -> Option<usize> {
        self.headers.remove(name).map(|h| h.length())
    }

    /// Concatenate every header's serialization in wire order, followed by
    /// the untouched payload window.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.header_length() + self.payload_length);
        for h in self.headers.iter() {
            out.extend(h.serialize()?);
        }
        out.extend_from_slice(self.remaining());
        Ok(out)
    }

    /// Produce an independent replica: fresh id, shared original buffer,
    /// deep-copied headers and metadata.
    pub fn replicate(&self) -> Self {
        Self {
            id: next_id(),
            parent_id: Some(self.id),
            original: Arc::clone(&self.original),
            headers: self.headers.clone(),
            metadata: self.metadata.clone(),
            payload_offset: self.payload_offset,
            payload_length: self.payload_length,
            parse_error: self.parse_error.clone(),
        }
    }

    /// Mark this packet as having hit a parser soft-fail, recording the reason.
    pub fn set_parse_error(&mut self, reason: String) {
        self.parse_error = Some(reason);
    }

    /// The parser soft-fail reason, if any.
    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }
}
