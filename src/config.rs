//! Typed IR configuration structures.
//!
//! These mirror the shapes a YAML loader (out of scope for this crate) is
//! expected to produce. Everything here derives [`serde::Deserialize`] so a
//! host can hand this crate an already-parsed document; this crate never
//! reads YAML text itself, with the single exception of the small embedded
//! graph grammar carried inside [`ParserDescriptor::graph`] and
//! [`PipelineDescriptor::graph`] (see [`crate::graphtext`]).

use serde::Deserialize;
use std::collections::HashMap;

/// Width of a field: either a fixed bit count, or an expression evaluated
/// against the integer values of previously parsed sibling fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WidthConfig {
    /// A constant bit width.
    Fixed(i64),
    /// An arithmetic expression, e.g. `"ihl * 32 - 160"`.
    Expr(String),
}

/// A single field within a header.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, unique within its header.
    pub name: String,
    /// Bit width source.
    pub width: WidthConfig,
}

/// A named, ordered sequence of fields bound to a contiguous byte range, or
/// an opaque block with no field structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HeaderDescriptor {
    /// Header name.
    pub name: String,
    /// Ordered fields. Empty for an opaque header.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// True for a header with no field structure, whose length is supplied
    /// externally at parse time.
    #[serde(default)]
    pub opaque: bool,
}

/// Parser configuration: the state to enter first, and the embedded
/// transition graph text (see [`crate::graphtext`]).
#[derive(Debug, Clone, Deserialize)]
pub struct ParserDescriptor {
    /// Name of the state the parser starts in.
    pub start_state: String,
    /// Embedded edge-list graph describing state transitions.
    pub graph: String,
    /// For each state, the ordered header names to extract upon entry.
    #[serde(default)]
    pub extracts: HashMap<String, Vec<String>>,
    /// For each state, the field reference driving its outgoing transition.
    #[serde(default)]
    pub select: HashMap<String, String>,
}

/// A named set of integers, referenced from parser transitions via
/// `in_value_set` / `not_in_value_set` edge attributes.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ValueSetDescriptor {
    /// Value set name.
    pub name: String,
    /// Member integers.
    pub values: Vec<i64>,
}

/// A pre-installed table entry, for tables whose contents are fully known
/// at load time rather than populated by a separate control-plane API.
#[derive(Debug, Clone, Deserialize)]
pub struct TableEntryConfig {
    /// Exact match values, keyed by dotted field reference.
    #[serde(default)]
    pub match_values: HashMap<String, i64>,
    /// Ternary match masks, keyed by dotted field reference. Absence of a
    /// mask for a key present in `match_values` means an exact match on
    /// that field.
    #[serde(default)]
    pub match_masks: HashMap<String, i64>,
    /// Ternary priority; higher wins among entries that both match.
    #[serde(default)]
    pub priority: i64,
    /// Name of the action this entry installs.
    pub action: String,
    /// Parameter bindings handed to the action at eval time.
    #[serde(default)]
    pub action_params: HashMap<String, String>,
}

/// A match+action table's static shape.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,
    /// Pre-installed entries, if any.
    #[serde(default)]
    pub entries: Vec<TableEntryConfig>,
    /// Default entry action, if any.
    pub default_action: Option<String>,
    /// Default entry parameter bindings.
    #[serde(default)]
    pub default_action_params: HashMap<String, String>,
}

/// A control-flow graph of tables, as an embedded edge-list graph.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDescriptor {
    /// Pipeline name.
    pub name: String,
    /// Embedded edge-list graph; node names are table names plus the
    /// reserved sentinel `exit_control_flow`.
    pub graph: String,
}

/// A named, ordered sequence of primitive mutations.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionDescriptor {
    /// Action name.
    pub name: String,
    /// Declared formal parameter names.
    #[serde(default)]
    pub params: Vec<String>,
    /// Semicolon-separated primitive calls, e.g.
    /// `"modify_field(eth.dst_mac, new_mac); add_to_field(ttl, -1)"`.
    pub implementation: String,
}

/// Traffic manager shape: port/queue counts, multicast fan-out table, and
/// dequeue discipline.
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficManagerDescriptor {
    /// Number of egress ports.
    pub port_count: u32,
    /// Number of priority queues per port.
    pub queues_per_port: u32,
    /// Multicast group index to `(port, queue)` fan-out list.
    #[serde(default)]
    pub multicast_map: HashMap<u32, Vec<(u32, u32)>>,
    /// Dequeue discipline name. Only `"strict"` is currently supported.
    #[serde(default = "default_discipline")]
    pub discipline: String,
}

fn default_discipline() -> String {
    "strict".to_string()
}
