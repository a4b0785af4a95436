//! Parser for the small embedded edge-list grammar carried inside
//! [`crate::config::ParserDescriptor::graph`] and
//! [`crate::config::PipelineDescriptor::graph`].
//!
//! This is not YAML. It's a DOT-like edge list, one edge per statement:
//!
//! ```text
//! ethernet -> vlan_tag_outer [value=0x8100];
//! ethernet -> ipv4 [in_value_set="ip_ethertypes"];
//! vlan_tag_outer -> exit_control_flow;
//! ```
//!
//! The graph itself is discarded once parsed; callers flatten it into typed
//! transition records at construction time (see [`crate::parser`] and
//! [`crate::pipeline`]).

use crate::{Error, Result};
use std::collections::HashMap;

/// A single edge with its attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Source node name.
    pub src: String,
    /// Destination node name.
    pub dst: String,
    /// Edge attributes, e.g. `value`, `in_value_set`, `not_in_value_set`, `action`.
    pub attrs: HashMap<String, String>,
}

/// Parse the embedded edge-list text into a flat list of edges.
pub fn parse_edges(text: &str) -> Result<Vec<Edge>> {
    let mut edges = Vec::new();
    for raw_stmt in text.split(';') {
        let stmt = raw_stmt.trim();
        if stmt.is_empty() || stmt.starts_with('#') {
            continue;
        }
        let arrow = stmt.find("->").ok_or_else(|| {
            Error::Configuration(format!("graph statement missing '->': {stmt:?}"))
        })?;
        let src = stmt[..arrow].trim().to_string();
        let rest = stmt[arrow + 2..].trim();

        let (dst, attrs) = match rest.find('[') {
            Some(bracket_start) => {
                let dst = rest[..bracket_start].trim().to_string();
                let bracket_end = rest.rfind(']').ok_or_else(|| {
                    Error::Configuration(format!("unbalanced '[' in graph statement: {stmt:?}"))
                })?;
                let attrs = parse_attrs(&rest[bracket_start + 1..bracket_end])?;
                (dst, attrs)
            }
            None => (rest.to_string(), HashMap::new()),
        };
        if src.is_empty() || dst.is_empty() {
            return Err(Error::Configuration(format!(
                "empty node name in graph statement: {stmt:?}"
            )));
        }
        edges.push(Edge { src, dst, attrs });
    }
    Ok(edges)
}

fn parse_attrs(text: &str) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for pair in split_respecting_quotes(text, ',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let eq = pair
            .find('=')
            .ok_or_else(|| Error::Configuration(format!("malformed edge attribute: {pair:?}")))?;
        let key = pair[..eq].trim().to_string();
        let mut value = pair[eq + 1..].trim().to_string();
        if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            value = value[1..value.len() - 1].to_string();
        }
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn split_respecting_quotes(text: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            c if c == sep && !in_quotes => {
                out.push(std::mem::take(&mut cur));
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// The reserved sentinel node terminating a pipeline's control flow.
pub const EXIT_CONTROL_FLOW: &str = "exit_control_flow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_edge() {
        let edges = parse_edges("ethernet -> ipv4;").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].src, "ethernet");
        assert_eq!(edges[0].dst, "ipv4");
        assert!(edges[0].attrs.is_empty());
    }

    #[test]
    fn parses_edge_with_attrs() {
        let edges = parse_edges(r#"ethernet -> vlan_tag_outer [value=0x8100];"#).unwrap();
        assert_eq!(edges[0].attrs.get("value").unwrap(), "0x8100");
    }

    #[test]
    fn parses_quoted_value_set_attr() {
        let edges = parse_edges(r#"ethernet -> ipv4 [in_value_set="ip_ethertypes"];"#).unwrap();
        assert_eq!(edges[0].attrs.get("in_value_set").unwrap(), "ip_ethertypes");
    }

    #[test]
    fn parses_multiple_statements() {
        let edges = parse_edges(
            "a -> b [action=\"hit\"];\nb -> exit_control_flow [action=\"miss\"];",
        )
        .unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1].dst, EXIT_CONTROL_FLOW);
    }

    #[test]
    fn missing_arrow_is_configuration_error() {
        assert!(matches!(parse_edges("a b;"), Err(Error::Configuration(_))));
    }
}
