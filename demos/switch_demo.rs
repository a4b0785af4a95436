//! Builds a tiny hardcoded ethernet+VLAN data plane, feeds it one packet,
//! and prints what comes out the transmit side.
//!
//! This is a demonstration of wiring the processor chain together by hand;
//! the real IR loader and host dataplane polling loop are out of scope for
//! this crate.

use clap::Parser as ClapParser;
use packetplane::action::Action;
use packetplane::config::{ActionDescriptor, FieldDescriptor, HeaderDescriptor, PipelineDescriptor, TableDescriptor, TrafficManagerDescriptor, WidthConfig};
use packetplane::field::FieldValue;
use packetplane::packet::ParsedPacket;
use packetplane::parser::Parser as IrParser;
use packetplane::pipeline::Pipeline;
use packetplane::processor::{Processor, TransmitProcessor};
use packetplane::table::Table;
use packetplane::trafficmanager::TrafficManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Tiny ethernet-only data plane demonstration.
#[derive(ClapParser, Debug)]
struct Opt {
    /// Log verbosity level.
    #[clap(short, long, default_value = "2")]
    verbose: usize,
}

fn ethernet_descriptor() -> Arc<HeaderDescriptor> {
    Arc::new(HeaderDescriptor {
        name: "ethernet".to_string(),
        opaque: false,
        fields: vec![
            FieldDescriptor { name: "dst_mac".to_string(), width: WidthConfig::Fixed(48) },
            FieldDescriptor { name: "src_mac".to_string(), width: WidthConfig::Fixed(48) },
            FieldDescriptor { name: "ethertype".to_string(), width: WidthConfig::Fixed(16) },
        ],
    })
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    stderrlog::new().verbosity(opt.verbose).init()?;

    let headers = HashMap::from([("ethernet".to_string(), ethernet_descriptor())]);

    let forward_descr = ActionDescriptor {
        name: "forward".to_string(),
        params: vec![],
        implementation: "no_op()".to_string(),
    };
    let actions: HashMap<String, Arc<Action>> = HashMap::from([(
        "forward".to_string(),
        Arc::new(Action::from_descriptor(&forward_descr, HashMap::new())?),
    )]);

    let table_descr = TableDescriptor {
        name: "forwarding".to_string(),
        entries: vec![],
        default_action: Some("forward".to_string()),
        default_action_params: HashMap::new(),
    };
    let table = Arc::new(Table::from_descriptor(&table_descr, actions)?);

    let pipeline_descr = PipelineDescriptor {
        name: "main".to_string(),
        graph: "forwarding -> exit_control_flow;".to_string(),
    };
    let pipeline: Arc<dyn Processor> = Arc::new(Pipeline::from_descriptor(
        &pipeline_descr,
        HashMap::from([("forwarding".to_string(), table)]),
    )?);

    let tm_descr = TrafficManagerDescriptor {
        port_count: 2,
        queues_per_port: 1,
        multicast_map: HashMap::new(),
        discipline: "strict".to_string(),
    };
    let tm = TrafficManager::from_descriptor(&tm_descr);

    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = Arc::clone(&received);
    let transmit: Arc<dyn Processor> = Arc::new(TransmitProcessor::new(move |port, bytes| {
        received2.lock().unwrap().push((port, bytes));
    }));

    tm.set_next(transmit)?;
    pipeline.set_next(tm.clone())?;
    TrafficManager::start(&tm);

    let parser_descr = packetplane::config::ParserDescriptor {
        start_state: "parse_ethernet".to_string(),
        graph: "parse_ethernet -> exit_control_flow;".to_string(),
        extracts: HashMap::from([("parse_ethernet".to_string(), vec!["ethernet".to_string()])]),
        select: HashMap::new(),
    };
    let parser = IrParser::from_descriptor(&parser_descr, headers, Default::default())?;
    parser.set_next(pipeline)?;

    let mut packet = ParsedPacket::new((0..64u32).map(|v| v as u8).collect());
    packet
        .set_field("intrinsic_metadata.egress_specification", FieldValue::Int(0))
        .unwrap();
    parser.process(packet)?;

    std::thread::sleep(std::time::Duration::from_millis(100));
    tm.kill();

    for (port, bytes) in received.lock().unwrap().iter() {
        println!("received on port {port}: {} bytes", bytes.len());
    }
    Ok(())
}
