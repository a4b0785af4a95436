//! Match+action table: exact and ternary entries, a default entry, and
//! hit/byte counters, all guarded by a single mutex.

use crate::action::Action;
use crate::config::{TableDescriptor, TableEntryConfig};
use crate::packet::ParsedPacket;
use crate::{Error, Result};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A single table entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TableEntry {
    /// Matches iff every field in `match_values` equals the packet's value.
    Exact {
        /// Dotted field reference -> required value.
        match_values: HashMap<String, i64>,
        /// Action to run on a hit.
        action: String,
        /// Parameter bindings for the action.
        action_params: HashMap<String, String>,
    },
    /// Matches iff every field, masked, equals the masked required value.
    /// A field absent from `match_masks` is matched exactly.
    Ternary {
        /// Dotted field reference -> required value.
        match_values: HashMap<String, i64>,
        /// Dotted field reference -> mask applied to both sides.
        match_masks: HashMap<String, i64>,
        /// Priority; higher wins among multiple ternary matches.
        priority: i64,
        /// Action to run on a hit.
        action: String,
        /// Parameter bindings for the action.
        action_params: HashMap<String, String>,
    },
}

impl TableEntry {
    fn check_match(&self, packet: &ParsedPacket) -> bool {
        match self {
            TableEntry::Exact { match_values, .. } => match_values
                .iter()
                .all(|(field, want)| packet.get_field(field).as_int() as i64 == *want),
            TableEntry::Ternary { match_values, match_masks, .. } => match_values.iter().all(|(field, want)| {
                let actual = packet.get_field(field).as_int() as i64;
                match match_masks.get(field) {
                    Some(mask) => (actual & mask) == (want & mask),
                    None => actual == *want,
                }
            }),
        }
    }

    fn action_and_params(&self) -> (&str, &HashMap<String, String>) {
        match self {
            TableEntry::Exact { action, action_params, .. } => (action, action_params),
            TableEntry::Ternary { action, action_params, .. } => (action, action_params),
        }
    }

    fn from_config(c: &TableEntryConfig) -> Self {
        if c.match_masks.is_empty() {
            TableEntry::Exact {
                match_values: c.match_values.clone(),
                action: c.action.clone(),
                action_params: c.action_params.clone(),
            }
        } else {
            TableEntry::Ternary {
                match_values: c.match_values.clone(),
                match_masks: c.match_masks.clone(),
                priority: c.priority,
                action: c.action.clone(),
                action_params: c.action_params.clone(),
            }
        }
    }
}

struct Inner {
    exact: Vec<TableEntry>,
    ternary: Vec<TableEntry>,
    default: Option<(String, HashMap<String, String>)>,
    packet_count: u64,
    byte_count: u64,
}

/// An ordered set of match entries plus an optional default entry, with
/// hit/byte counters. Exact entries are always checked before ternary
/// entries; ternary entries are checked in descending priority order
/// (ties broken by insertion order).
pub struct Table {
    name: String,
    actions: HashMap<String, Arc<Action>>,
    inner: Mutex<Inner>,
}

impl Table {
    /// Build an empty table bound to an action registry.
    pub fn new(name: impl Into<String>, actions: HashMap<String, Arc<Action>>) -> Self {
        Self {
            name: name.into(),
            actions,
            inner: Mutex::new(Inner {
                exact: Vec::new(),
                ternary: Vec::new(),
                default: None,
                packet_count: 0,
                byte_count: 0,
            }),
        }
    }

    /// Build a table from its descriptor, installing any pre-configured entries.
    pub fn from_descriptor(descriptor: &TableDescriptor, actions: HashMap<String, Arc<Action>>) -> Result<Self> {
        let table = Self::new(descriptor.name.clone(), actions);
        for entry in &descriptor.entries {
            table.add_entry(TableEntry::from_config(entry))?;
        }
        if let Some(action) = &descriptor.default_action {
            table.set_default_entry(action.clone(), descriptor.default_action_params.clone())?;
        }
        Ok(table)
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an entry. A `Default`-shaped call should use
    /// [`Table::set_default_entry`] instead.
    pub fn add_entry(&self, entry: TableEntry) -> Result<()> {
        let (action_name, _) = entry.action_and_params();
        if !self.actions.contains_key(action_name) {
            return Err(Error::Configuration(format!(
                "table {:?}: unknown action {action_name:?}",
                self.name
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        match entry {
            TableEntry::Exact { .. } => inner.exact.push(entry),
            TableEntry::Ternary { priority, .. } => {
                let pos = inner.ternary.iter().position(|e| match e {
                    TableEntry::Ternary { priority: p, .. } => *p < priority,
                    _ => false,
                });
                match pos {
                    Some(i) => inner.ternary.insert(i, entry),
                    None => inner.ternary.push(entry),
                }
            }
        }
        Ok(())
    }

    /// Install (or replace) the default entry.
    pub fn set_default_entry(&self, action: String, action_params: HashMap<String, String>) -> Result<()> {
        if !self.actions.contains_key(&action) {
            return Err(Error::Configuration(format!(
                "table {:?}: unknown default action {action:?}",
                self.name
            )));
        }
        self.inner.lock().unwrap().default = Some((action, action_params));
        Ok(())
    }

    /// Remove the first entry equal to `entry`. Returns whether one was removed.
    pub fn remove_entry(&self, entry: &TableEntry) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.exact.iter().position(|e| e == entry) {
            inner.exact.remove(pos);
            return true;
        }
        if let Some(pos) = inner.ternary.iter().position(|e| e == entry) {
            inner.ternary.remove(pos);
            return true;
        }
        false
    }

    /// Clear entries and, independently, counters and/or the default entry.
    pub fn clear(&self, clear_stats: bool, clear_default: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.exact.clear();
        inner.ternary.clear();
        if clear_stats {
            inner.packet_count = 0;
            inner.byte_count = 0;
        }
        if clear_default {
            inner.default = None;
        }
    }

    /// Total packets that have hit a non-default entry.
    pub fn packet_count(&self) -> u64 {
        self.inner.lock().unwrap().packet_count
    }

    /// Total serialized bytes of packets that have hit a non-default entry.
    pub fn byte_count(&self) -> u64 {
        self.inner.lock().unwrap().byte_count
    }

    /// Scan for a match, evaluate its action, and return `(hit, action_name)`.
    ///
    /// The default entry (if any) supplies an action on a miss, but counters
    /// only increment on an explicit hit.
    pub fn process_packet(&self, packet: &mut ParsedPacket) -> Result<(bool, Option<String>)> {
        let mut inner = self.inner.lock().unwrap();
        let hit_entry = inner
            .exact
            .iter()
            .chain(inner.ternary.iter())
            .find(|e| e.check_match(packet))
            .cloned();

        let (hit, action) = if let Some(entry) = hit_entry {
            let (name, params) = entry.action_and_params();
            let len = packet.serialize()?.len() as u64;
            inner.packet_count += 1;
            inner.byte_count += len;
            trace!("table {:?} hit, action {name:?}", self.name);
            (true, Some((name.to_string(), params.clone())))
        } else if let Some((name, params)) = inner.default.clone() {
            debug!("table {:?} miss, default action {name:?}", self.name);
            (false, Some((name, params)))
        } else {
            debug!("table {:?} miss, no default", self.name);
            (false, None)
        };
        drop(inner);

        let action_name = if let Some((name, params)) = action {
            let a = self
                .actions
                .get(&name)
                .ok_or_else(|| Error::Configuration(format!("table {:?}: unknown action {name:?}", self.name)))?;
            a.eval(packet, &params)?;
            Some(name)
        } else {
            None
        };
        Ok((hit, action_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::config::ActionDescriptor;
    use crate::field::FieldValue;

    fn no_op_actions() -> HashMap<String, Arc<Action>> {
        let descr = ActionDescriptor { name: "no_op".to_string(), params: vec![], implementation: "no_op()".to_string() };
        let mut m = HashMap::new();
        m.insert("no_op".to_string(), Arc::new(Action::from_descriptor(&descr, HashMap::new()).unwrap()));
        m
    }

    fn packet_with(ethertype: u64) -> ParsedPacket {
        let mut p = ParsedPacket::new(vec![0u8; 20]);
        p.set_field("ethernet.ethertype", FieldValue::Int(ethertype)).unwrap();
        p
    }

    #[test]
    fn exact_hit_increments_counters() {
        let table = Table::new("t", no_op_actions());
        table
            .add_entry(TableEntry::Exact {
                match_values: HashMap::from([("ethernet.ethertype".to_string(), 0x0800)]),
                action: "no_op".to_string(),
                action_params: HashMap::new(),
            })
            .unwrap();
        let mut p = packet_with(0x0800);
        let (hit, action) = table.process_packet(&mut p).unwrap();
        assert!(hit);
        assert_eq!(action.as_deref(), Some("no_op"));
        assert_eq!(table.packet_count(), 1);
    }

    #[test]
    fn ternary_mask_semantics_scenario() {
        let table = Table::new("t", no_op_actions());
        table
            .add_entry(TableEntry::Ternary {
                match_values: HashMap::from([("ethernet.ethertype".to_string(), 0x07)]),
                match_masks: HashMap::from([("ethernet.ethertype".to_string(), 0x07)]),
                priority: 1,
                action: "no_op".to_string(),
                action_params: HashMap::new(),
            })
            .unwrap();

        let mut hit_packet = packet_with(0x17);
        let (hit, _) = table.process_packet(&mut hit_packet).unwrap();
        assert!(hit);

        let mut miss_packet = packet_with(0x08);
        let (hit, _) = table.process_packet(&mut miss_packet).unwrap();
        assert!(!hit);
    }

    #[test]
    fn default_entry_is_a_miss_and_does_not_increment_counters() {
        let table = Table::new("t", no_op_actions());
        table.set_default_entry("no_op".to_string(), HashMap::new()).unwrap();
        let mut p = packet_with(0x9999);
        let (hit, action) = table.process_packet(&mut p).unwrap();
        assert!(!hit);
        assert_eq!(action.as_deref(), Some("no_op"));
        assert_eq!(table.packet_count(), 0);
    }

    #[test]
    fn exact_checked_before_ternary() {
        let table = Table::new("t", no_op_actions());
        table
            .add_entry(TableEntry::Ternary {
                match_values: HashMap::from([("ethernet.ethertype".to_string(), 0)]),
                match_masks: HashMap::from([("ethernet.ethertype".to_string(), 0)]),
                priority: 100,
                action: "no_op".to_string(),
                action_params: HashMap::new(),
            })
            .unwrap();
        table
            .add_entry(TableEntry::Exact {
                match_values: HashMap::from([("ethernet.ethertype".to_string(), 0x0800)]),
                action: "no_op".to_string(),
                action_params: HashMap::new(),
            })
            .unwrap();
        let mut p = packet_with(0x0800);
        let (hit, _) = table.process_packet(&mut p).unwrap();
        assert!(hit);
        assert_eq!(table.packet_count(), 1);
    }

    #[test]
    fn unknown_action_rejected_at_add_entry() {
        let table = Table::new("t", HashMap::new());
        let res = table.add_entry(TableEntry::Exact {
            match_values: HashMap::new(),
            action: "missing".to_string(),
            action_params: HashMap::new(),
        });
        assert!(matches!(res, Err(Error::Configuration(_))));
    }
}
