//! Table-to-table control-flow dispatch.

use crate::config::PipelineDescriptor;
use crate::graphtext::{parse_edges, EXIT_CONTROL_FLOW};
use crate::packet::ParsedPacket;
use crate::processor::Processor;
use crate::table::Table;
use crate::{Error, Result};
use log::trace;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// A control-flow graph of tables, flattened at construction time into a
/// per-table outcome-tag -> next-table map.
pub struct Pipeline {
    name: String,
    tables: HashMap<String, Arc<Table>>,
    outcomes: HashMap<String, HashMap<String, String>>,
    first_table: String,
    next: OnceLock<Arc<dyn Processor>>,
}

impl Pipeline {
    /// Build a pipeline from its descriptor and the tables it references.
    /// Exactly one table must have no incoming edge; that table is the
    /// pipeline's entry point.
    pub fn from_descriptor(descriptor: &PipelineDescriptor, tables: HashMap<String, Arc<Table>>) -> Result<Self> {
        let edges = parse_edges(&descriptor.graph)?;
        let mut outcomes: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut has_incoming: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut sources: std::collections::HashSet<String> = std::collections::HashSet::new();

        for edge in &edges {
            if let Some(tag) = edge.attrs.get("action").cloned() {
                outcomes.entry(edge.src.clone()).or_default().insert(tag, edge.dst.clone());
            }
            sources.insert(edge.src.clone());
            if edge.dst != EXIT_CONTROL_FLOW {
                has_incoming.insert(edge.dst.clone());
            }
        }

        let mut first_candidates: Vec<&String> = sources.difference(&has_incoming).collect();
        first_candidates.sort();
        let first_table = match first_candidates.as_slice() {
            [only] => (*only).clone(),
            [] => {
                return Err(Error::Configuration(format!(
                    "pipeline {:?}: no table without an incoming edge",
                    descriptor.name
                )))
            }
            _ => {
                return Err(Error::Configuration(format!(
                    "pipeline {:?}: more than one table without an incoming edge: {first_candidates:?}",
                    descriptor.name
                )))
            }
        };

        for table_name in outcomes.keys() {
            if table_name != EXIT_CONTROL_FLOW && !tables.contains_key(table_name) {
                return Err(Error::Configuration(format!("pipeline references unknown table {table_name:?}")));
            }
        }

        Ok(Self {
            name: descriptor.name.clone(),
            tables,
            outcomes,
            first_table,
            next: OnceLock::new(),
        })
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a table this pipeline owns, for control-plane entry installs.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    fn run(&self, packet: &mut ParsedPacket) -> Result<()> {
        let mut current = self.first_table.clone();
        while current != EXIT_CONTROL_FLOW {
            let table = self
                .tables
                .get(&current)
                .ok_or_else(|| Error::Configuration(format!("unknown table {current:?} in pipeline {:?}", self.name)))?;
            let (hit, action) = table.process_packet(packet)?;
            trace!("pipeline {:?}: table {current:?} hit={hit} action={action:?}", self.name);

            let edges = self.outcomes.get(&current);
            let next = edges.and_then(|e| e.get("always")).cloned().or_else(|| {
                if !hit {
                    edges
                        .and_then(|e| e.get("miss"))
                        .or_else(|| edges.and_then(|e| action.as_ref().and_then(|a| e.get(a))))
                        .cloned()
                } else {
                    edges
                        .and_then(|e| action.as_ref().and_then(|a| e.get(a)))
                        .or_else(|| edges.and_then(|e| e.get("hit")))
                        .or_else(|| edges.and_then(|e| e.get("default")))
                        .cloned()
                }
            });
            current = next.unwrap_or_else(|| EXIT_CONTROL_FLOW.to_string());
        }
        Ok(())
    }
}

impl Processor for Pipeline {
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
            .map_err(|_| Error::Configuration("Pipeline::set_next called more than once".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::config::ActionDescriptor;
    use crate::field::FieldValue;
    use crate::table::TableEntry;
    use std::sync::Mutex;

    fn no_op_actions() -> HashMap<String, Arc<Action>> {
        let descr = ActionDescriptor { name: "no_op".to_string(), params: vec![], implementation: "no_op()".to_string() };
        let mut m = HashMap::new();
        m.insert("no_op".to_string(), Arc::new(Action::from_descriptor(&descr, HashMap::new()).unwrap()));
        m
    }

    struct Capture(Mutex<Vec<ParsedPacket>>);
    impl Processor for Capture {
        fn process(&self, packet: ParsedPacket) -> Result<()> {
            self.0.lock().unwrap().push(packet);
            Ok(())
        }
        fn set_next(&self, _n: Arc<dyn Processor>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn single_table_always_forwards() {
        let t1 = Arc::new(Table::new("t1", no_op_actions()));
        t1.set_default_entry("no_op".to_string(), HashMap::new()).unwrap();
        let descriptor = PipelineDescriptor {
            name: "pipe".to_string(),
            graph: "t1 -> exit_control_flow;".to_string(),
        };
        let pipeline = Pipeline::from_descriptor(&descriptor, HashMap::from([("t1".to_string(), t1)])).unwrap();
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        pipeline.set_next(capture.clone()).unwrap();
        pipeline.process(ParsedPacket::new(vec![1, 2, 3])).unwrap();
        assert_eq!(capture.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn hit_miss_precedence_routes_to_named_table() {
        let t1 = Arc::new(Table::new("t1", no_op_actions()));
        t1.add_entry(TableEntry::Exact {
            match_values: HashMap::from([("m.v".to_string(), 1)]),
            action: "no_op".to_string(),
            action_params: HashMap::new(),
        })
        .unwrap();
        let t2 = Arc::new(Table::new("t2", no_op_actions()));
        t2.set_default_entry("no_op".to_string(), HashMap::new()).unwrap();

        let descriptor = PipelineDescriptor {
            name: "pipe".to_string(),
            graph: "t1 -> t2 [action=\"hit\"];\nt1 -> exit_control_flow [action=\"miss\"];\nt2 -> exit_control_flow;"
                .to_string(),
        };
        let pipeline = Pipeline::from_descriptor(
            &descriptor,
            HashMap::from([("t1".to_string(), t1), ("t2".to_string(), t2.clone())]),
        )
        .unwrap();
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        pipeline.set_next(capture.clone()).unwrap();

        let mut p = ParsedPacket::new(vec![1]);
        p.set_field("m.v", FieldValue::Int(1)).unwrap();
        pipeline.process(p).unwrap();
        assert_eq!(t2.packet_count() + t2.byte_count(), 0);

        let mut miss_p = ParsedPacket::new(vec![1]);
        miss_p.set_field("m.v", FieldValue::Int(2)).unwrap();
        pipeline.process(miss_p).unwrap();
        assert_eq!(capture.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn bare_untagged_edge_does_not_shadow_labeled_edges() {
        let t1 = Arc::new(Table::new("t1", no_op_actions()));
        t1.add_entry(TableEntry::Exact {
            match_values: HashMap::from([("m.v".to_string(), 1)]),
            action: "no_op".to_string(),
            action_params: HashMap::new(),
        })
        .unwrap();
        let t2 = Arc::new(Table::new("t2", no_op_actions()));
        t2.set_default_entry("no_op".to_string(), HashMap::new()).unwrap();

        let descriptor = PipelineDescriptor {
            name: "pipe".to_string(),
            graph: "t1 -> nonexistent_table;\nt1 -> t2 [action=\"hit\"];\nt2 -> exit_control_flow;".to_string(),
        };
        let pipeline = Pipeline::from_descriptor(
            &descriptor,
            HashMap::from([("t1".to_string(), t1), ("t2".to_string(), t2)]),
        )
        .unwrap();
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        pipeline.set_next(capture.clone()).unwrap();

        let mut p = ParsedPacket::new(vec![1]);
        p.set_field("m.v", FieldValue::Int(1)).unwrap();
        // If the bare edge wrongly shadowed the labeled "hit" edge, this would
        // route to "nonexistent_table" and fail with a configuration error.
        pipeline.process(p).unwrap();
        assert_eq!(capture.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn miss_tag_is_checked_before_an_action_named_edge() {
        let t_wrong = Arc::new(Table::new("t_wrong", no_op_actions()));
        t_wrong.set_default_entry("no_op".to_string(), HashMap::new()).unwrap();
        let t_right = Arc::new(Table::new("t_right", no_op_actions()));
        t_right.set_default_entry("no_op".to_string(), HashMap::new()).unwrap();

        let mut t1_actions = no_op_actions();
        let named = ActionDescriptor {
            name: "named_action".to_string(),
            params: vec![],
            implementation: "no_op()".to_string(),
        };
        t1_actions.insert(
            "named_action".to_string(),
            Arc::new(Action::from_descriptor(&named, HashMap::new()).unwrap()),
        );
        let t1 = Arc::new(Table::new("t1", t1_actions));
        t1.set_default_entry("named_action".to_string(), HashMap::new()).unwrap();

        let descriptor = PipelineDescriptor {
            name: "pipe".to_string(),
            graph: "t1 -> t_wrong [action=\"named_action\"];\nt1 -> t_right [action=\"miss\"];\n\
                    t_wrong -> exit_control_flow;\nt_right -> exit_control_flow;"
                .to_string(),
        };
        let pipeline = Pipeline::from_descriptor(
            &descriptor,
            HashMap::from([
                ("t1".to_string(), t1),
                ("t_wrong".to_string(), t_wrong.clone()),
                ("t_right".to_string(), t_right.clone()),
            ]),
        )
        .unwrap();
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        pipeline.set_next(capture.clone()).unwrap();

        // t1's only entry is its default, so every packet misses with action
        // "named_action" — which also labels an edge. "miss" must win.
        pipeline.process(ParsedPacket::new(vec![1])).unwrap();
        assert_eq!(t_wrong.packet_count(), 0);
        assert_eq!(capture.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn more_than_one_entry_table_is_configuration_error() {
        let t1 = Arc::new(Table::new("t1", no_op_actions()));
        let t2 = Arc::new(Table::new("t2", no_op_actions()));
        let descriptor = PipelineDescriptor {
            name: "pipe".to_string(),
            graph: "t1 -> exit_control_flow;\nt2 -> exit_control_flow;".to_string(),
        };
        let res = Pipeline::from_descriptor(
            &descriptor,
            HashMap::from([("t1".to_string(), t1), ("t2".to_string(), t2)]),
        );
        assert!(matches!(res, Err(Error::Configuration(_))));
    }
}
