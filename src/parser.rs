//! Graph-driven parser state machine.

use crate::config::{HeaderDescriptor, ParserDescriptor};
use crate::graphtext::parse_edges;
use crate::packet::ParsedPacket;
use crate::processor::Processor;
use crate::valueset::ValueSets;
use crate::{Error, Result};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// The flattened outgoing-edge set for one parser state, built once at
/// construction time from the embedded edge-list text.
#[derive(Debug, Clone, Default)]
struct StateTransition {
    by_value: HashMap<i64, String>,
    by_value_set: Vec<(String, String)>,
    by_not_value_set: Vec<(String, String)>,
    default_next: Option<String>,
}

impl StateTransition {
    /// Resolve the next state for a selector value, per the priority order:
    /// specific value match, then positive value-set membership, then
    /// negated value-set membership, then the default edge.
    fn next_state(&self, select_value: Option<i64>, value_sets: &ValueSets) -> Result<Option<String>> {
        let Some(value) = select_value else {
            return Ok(self.default_next.clone());
        };
        if let Some(next) = self.by_value.get(&value) {
            return Ok(Some(next.clone()));
        }
        for (set_name, next) in &self.by_value_set {
            if value_sets.contains(set_name, value)? {
                return Ok(Some(next.clone()));
            }
        }
        for (set_name, next) in &self.by_not_value_set {
            if !value_sets.contains(set_name, value)? {
                return Ok(Some(next.clone()));
            }
        }
        Ok(self.default_next.clone())
    }
}

fn parse_literal(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).map_err(|_| Error::Configuration(format!("bad hex literal {s:?}")))
    } else {
        s.parse().map_err(|_| Error::Configuration(format!("bad integer literal {s:?}")))
    }
}

/// A directed-graph-driven state machine that extracts headers in sequence.
pub struct Parser {
    start_state: String,
    states: HashMap<String, StateTransition>,
    extracts: HashMap<String, Vec<String>>,
    select: HashMap<String, String>,
    headers: HashMap<String, Arc<HeaderDescriptor>>,
    value_sets: ValueSets,
    next: OnceLock<Arc<dyn Processor>>,
}

impl Parser {
    /// Build a parser from its descriptor, flattening the embedded edge-list
    /// text into per-state [`StateTransition`] records up front.
    pub fn from_descriptor(
        descriptor: &ParserDescriptor,
        headers: HashMap<String, Arc<HeaderDescriptor>>,
        value_sets: ValueSets,
    ) -> Result<Self> {
        let edges = parse_edges(&descriptor.graph)?;
        let mut states: HashMap<String, StateTransition> = HashMap::new();
        for edge in edges {
            let entry = states.entry(edge.src.clone()).or_default();
            if let Some(v) = edge.attrs.get("value") {
                entry.by_value.insert(parse_literal(v)?, edge.dst.clone());
            } else if let Some(set_name) = edge.attrs.get("in_value_set") {
                if !value_sets.known(set_name) {
                    return Err(Error::Configuration(format!("unknown value set {set_name:?}")));
                }
                entry.by_value_set.push((set_name.clone(), edge.dst.clone()));
            } else if let Some(set_name) = edge.attrs.get("not_in_value_set") {
                if !value_sets.known(set_name) {
                    return Err(Error::Configuration(format!("unknown value set {set_name:?}")));
                }
                entry.by_not_value_set.push((set_name.clone(), edge.dst.clone()));
            } else {
                if entry.default_next.is_some() {
                    return Err(Error::Configuration(format!(
                        "state {:?} has more than one default edge",
                        edge.src
                    )));
                }
                entry.default_next = Some(edge.dst.clone());
            }
        }
        if !states.contains_key(&descriptor.start_state) {
            states.entry(descriptor.start_state.clone()).or_default();
        }
        Ok(Self {
            start_state: descriptor.start_state.clone(),
            states,
            extracts: descriptor.extracts.clone(),
            select: descriptor.select.clone(),
            headers,
            value_sets,
            next: OnceLock::new(),
        })
    }

    /// Drive a packet through the parser state machine, extracting headers
    /// along the way, then hand it to the next processor.
    fn run(&self, packet: &mut ParsedPacket) -> Result<()> {
        let mut current = Some(self.start_state.clone());
        while let Some(state) = current {
            trace!("parser entering state {state:?}");
            if let Some(names) = self.extracts.get(&state) {
                for name in names {
                    let descr = self
                        .headers
                        .get(name)
                        .ok_or_else(|| Error::Configuration(format!("unknown header {name:?}")))?;
                    if let Err(e) = packet.parse_header(name, Arc::clone(descr)) {
                        debug!("parser soft-fail extracting {name:?}: {e}");
                        packet.set_parse_error(format!("{e}"));
                        return Ok(());
                    }
                }
            }
            let select_value = self.select.get(&state).map(|r| packet.get_field(r).as_int() as i64);
            let transition = self.states.get(&state).cloned().unwrap_or_default();
            current = transition.next_state(select_value, &self.value_sets)?;
        }
        Ok(())
    }
}

impl Processor for Parser {
    fn process(&self, mut packet: ParsedPacket) -> Result<()> {
        self.run(&mut packet)?;
        if let Some(next) = self.next.get() {
            next.process(packet)?;
        }
        Ok(())
    }

    fn set_next(&self, next: Arc<dyn Processor>) -> Result<()> {
        self.next
            .set(next)
            .map_err(|_| Error::Configuration("Parser::set_next called more than once".to_string()))
    }
}
