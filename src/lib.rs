#![warn(missing_docs)]
/*! A software packet-processing data plane, driven by a declarative,
already-typed intermediate representation (see [`config`]).

# Architecture overview

An engine instance is a linear chain of processors, each implementing
[`processor::Processor`]:

```text
[ Parser ] -> [ Pipeline ] -> ... -> [ Pipeline ] -> [ TrafficManager ] -> [ TransmitProcessor ]
```

The parser drives a directed-graph state machine ([`parser::Parser`]) that
extracts headers from ingress bytes into a [`packet::ParsedPacket`]. Each
pipeline ([`pipeline::Pipeline`]) walks packets through a control-flow graph
of match+action tables ([`table::Table`]), applying actions
([`action::Action`]) along the way. The traffic manager
([`trafficmanager::TrafficManager`]) schedules packets onto per-`(port,
queue)` FIFOs from a dedicated worker thread, with multicast fan-out. A
terminal [`processor::TransmitProcessor`] hands finished packets to a host
`send(port, bytes)` hook.

Processors are built in two phases: every processor in the chain is
allocated first, then [`processor::Processor::set_next`] wires each one to
its successor. This avoids constructor-time circular dependencies between
stages that otherwise need to refer to each other.

# Example

```
use packetplane::config::{FieldDescriptor, HeaderDescriptor, WidthConfig};
use packetplane::packet::ParsedPacket;
use std::sync::Arc;

let ethernet = Arc::new(HeaderDescriptor {
    name: "ethernet".to_string(),
    opaque: false,
    fields: vec![
        FieldDescriptor { name: "dst_mac".to_string(), width: WidthConfig::Fixed(48) },
        FieldDescriptor { name: "src_mac".to_string(), width: WidthConfig::Fixed(48) },
        FieldDescriptor { name: "ethertype".to_string(), width: WidthConfig::Fixed(16) },
    ],
});

let mut packet = ParsedPacket::new((0..100u32).map(|v| v as u8).collect());
packet.parse_header("ethernet", ethernet).unwrap();
assert_eq!(packet.get_field("ethernet.ethertype").as_int(), 0x0C0D);
```
*/

pub mod action;
pub mod config;
pub mod expr;
pub mod field;
pub mod graphtext;
pub mod header;
pub mod packet;
pub mod parser;
pub mod pipeline;
pub mod processor;
pub mod table;
pub mod trafficmanager;
pub mod valueset;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error taxonomy for this crate.
///
/// `Configuration` and `Assertion` errors are fatal: they indicate the IR or
/// an invariant is broken and the caller should abort. `Reference` errors
/// are surfaced from the specific call that needed a value it couldn't
/// resolve, so a caller may recover. `PacketModification` errors cover
/// non-fatal header add/remove conflicts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The IR itself is invalid: unknown object type, malformed graph,
    /// unresolved value-set reference, a pipeline with more than one entry
    /// table, and the like.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A dotted field reference or width expression could not be resolved.
    #[error("reference error: {0}")]
    Reference(String),

    /// Adding a header that already exists, or removing one that isn't
    /// present.
    #[error("packet modification error: {0}")]
    PacketModification(String),

    /// A runtime invariant (buffer bounds, non-negative width, etc.) was
    /// violated.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A host I/O hook failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_format_with_their_message() {
        assert_eq!(format!("{}", Error::Configuration("bad".to_string())), "configuration error: bad");
        assert_eq!(format!("{}", Error::Reference("bad".to_string())), "reference error: bad");
    }
}
