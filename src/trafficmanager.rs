//! Priority-queued, multi-threaded traffic manager with multicast fan-out.

use crate::config::TrafficManagerDescriptor;
use crate::field::FieldValue;
use crate::packet::ParsedPacket;
use crate::processor::Processor;
use crate::{Error, Result};
use log::{debug, error, trace};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;

/// 32-bit egress-specification sentinel meaning "drop".
pub const EGRESS_DROP: u32 = 0xFFFF_FFFF;
const MULTICAST_BIT: u32 = 1 << 28;

fn decode_egress_spec(spec: u32, multicast_map: &HashMap<u32, Vec<(u32, u32)>>) -> Vec<(u32, u32)> {
    if spec == EGRESS_DROP {
        return Vec::new();
    }
    if spec & MULTICAST_BIT != 0 {
        let index = spec & 0xFFFF;
        multicast_map.get(&index).cloned().unwrap_or_default()
    } else {
        let port = spec & 0xFFFF;
        let queue = (spec >> 16) & 0x7FFF;
        vec![(port, queue)]
    }
}

struct Inner {
    queues: Vec<Vec<VecDeque<ParsedPacket>>>,
    next_port: usize,
}

/// Priority-queued scheduler: one FIFO per `(port, queue)`, a dedicated
/// dequeue worker thread draining by `strict` discipline (highest queue
/// index first, round-robin across ports), and multicast replication.
pub struct TrafficManager {
    port_count: u32,
    queues_per_port: u32,
    multicast_map: HashMap<u32, Vec<(u32, u32)>>,
    discipline: Mutex<String>,
    inner: Mutex<Inner>,
    cond: Condvar,
    running: std::sync::atomic::AtomicBool,
    next: OnceLock<Arc<dyn Processor>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TrafficManager {
    /// Build a (not yet started) traffic manager from its descriptor.
    pub fn from_descriptor(descriptor: &TrafficManagerDescriptor) -> Arc<Self> {
        let queues = (0..descriptor.port_count)
            .map(|_| (0..descriptor.queues_per_port).map(|_| VecDeque::new()).collect())
            .collect();
        Arc::new(Self {
            port_count: descriptor.port_count,
            queues_per_port: descriptor.queues_per_port,
            multicast_map: descriptor.multicast_map.clone(),
            discipline: Mutex::new(descriptor.discipline.clone()),
            inner: Mutex::new(Inner { queues, next_port: 0 }),
            cond: Condvar::new(),
            running: std::sync::atomic::AtomicBool::new(true),
            next: OnceLock::new(),
            worker: Mutex::new(None),
        })
    }

    /// Change the dequeue discipline. Only `"strict"` is currently
    /// supported; anything else is logged and leaves the discipline
    /// unchanged.
    pub fn set_discipline(&self, name: &str) {
        if name == "strict" {
            *self.discipline.lock().unwrap() = name.to_string();
        } else {
            error!("traffic manager: unsupported discipline {name:?}, keeping current");
        }
    }

    /// Start the dequeue worker thread. Must be called after `set_next`.
    pub fn start(tm: &Arc<Self>) {
        let worker_tm = Arc::clone(tm);
        let handle = std::thread::spawn(move || worker_tm.worker_loop());
        *tm.worker.lock().unwrap() = Some(handle);
    }

    /// Stop the worker thread and wait for it to exit.
    pub fn kill(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
        self.cond.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn dequeue_one(&self, inner: &mut Inner) -> Option<(u32, ParsedPacket)> {
        for offset in 0..self.port_count {
            let port = (inner.next_port + offset as usize) % self.port_count as usize;
            for queue in (0..self.queues_per_port).rev() {
                if let Some(packet) = inner.queues[port][queue as usize].pop_front() {
                    inner.next_port = (port + 1) % self.port_count as usize;
                    return Some((port as u32, packet));
                }
            }
        }
        None
    }

    fn worker_loop(&self) {
        loop {
            let mut inner = self.inner.lock().unwrap();
            loop {
                if !self.running.load(std::sync::atomic::Ordering::SeqCst) {
                    return;
                }
                if inner.queues.iter().any(|port| port.iter().any(|q| !q.is_empty())) {
                    break;
                }
                inner = self.cond.wait(inner).unwrap();
            }
            let Some((port, mut packet)) = self.dequeue_one(&mut inner) else {
                continue;
            };
            packet.set_field("intrinsic_metadata.egress_port", FieldValue::Int(port as u64));
            drop(inner);
            trace!("traffic manager dequeued packet {} for port {port}", packet.id());
            if let Some(next) = self.next.get() {
                if let Err(e) = next.process(packet) {
                    error!("traffic manager: downstream processor failed: {e}");
                }
            }
        }
    }
}

impl Processor for TrafficManager {
    fn process(&self, packet: ParsedPacket) -> Result<()> {
        let spec = packet.get_field("intrinsic_metadata.egress_specification").as_int() as u32;
        let destinations = decode_egress_spec(spec, &self.multicast_map);
        if destinations.is_empty() {
            debug!("traffic manager: dropping packet {}", packet.id());
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        let last = destinations.len() - 1;
        for (i, (port, queue)) in destinations.iter().enumerate() {
            if *port >= self.port_count || *queue >= self.queues_per_port {
                return Err(Error::Reference(format!(
                    "egress destination (port={port}, queue={queue}) out of range"
                )));
            }
            let p = if i == last { packet.clone() } else { packet.replicate() };
            inner.queues[*port as usize][*queue as usize].push_back(p);
        }
        self.cond.notify_all();
        Ok(())
    }

    fn set_next(&self, next: Arc<dyn Processor>) -> Result<()> {
        self.next
            .set(next)
            .map_err(|_| Error::Configuration("TrafficManager::set_next called more than once".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct Capture(StdMutex<Vec<(u32, ParsedPacket)>>, Condvar);
    impl Processor for Capture {
        fn process(&self, packet: ParsedPacket) -> Result<()> {
            let port = packet.get_field("intrinsic_metadata.egress_port").as_int() as u32;
            self.0.lock().unwrap().push((port, packet));
            self.1.notify_all();
            Ok(())
        }
        fn set_next(&self, _n: Arc<dyn Processor>) -> Result<()> {
            Ok(())
        }
    }

    fn wait_for(capture: &Capture, n: usize) {
        let mut guard = capture.0.lock().unwrap();
        for _ in 0..200 {
            if guard.len() >= n {
                return;
            }
            let (g, _) = capture.1.wait_timeout(guard, Duration::from_millis(50)).unwrap();
            guard = g;
        }
        panic!("timed out waiting for {n} packets, got {}", guard.len());
    }

    #[test]
    fn fifo_within_a_single_queue() {
        let descr = TrafficManagerDescriptor {
            port_count: 1,
            queues_per_port: 1,
            multicast_map: HashMap::new(),
            discipline: "strict".to_string(),
        };
        let tm = TrafficManager::from_descriptor(&descr);
        let capture = Arc::new(Capture(StdMutex::new(Vec::new()), Condvar::new()));
        tm.set_next(capture.clone()).unwrap();
        TrafficManager::start(&tm);

        for payload in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
            let mut p = ParsedPacket::new(payload);
            p.set_field("intrinsic_metadata.egress_specification", FieldValue::Int(0))
                .unwrap();
            tm.process(p).unwrap();
        }
        wait_for(&capture, 3);
        tm.kill();

        let got = capture.0.lock().unwrap();
        let payloads: Vec<Vec<u8>> = got.iter().map(|(_, p)| p.serialize().unwrap()).collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn multicast_fans_out_to_every_destination() {
        let mut multicast_map = HashMap::new();
        multicast_map.insert(5, vec![(0, 0), (1, 0), (2, 0)]);
        let descr = TrafficManagerDescriptor {
            port_count: 3,
            queues_per_port: 1,
            multicast_map,
            discipline: "strict".to_string(),
        };
        let tm = TrafficManager::from_descriptor(&descr);
        let capture = Arc::new(Capture(StdMutex::new(Vec::new()), Condvar::new()));
        tm.set_next(capture.clone()).unwrap();
        TrafficManager::start(&tm);

        let mut p = ParsedPacket::new(vec![9, 9, 9]);
        let multicast_spec = MULTICAST_BIT | 5;
        p.set_field("intrinsic_metadata.egress_specification", FieldValue::Int(multicast_spec as u64))
            .unwrap();
        tm.process(p).unwrap();
        wait_for(&capture, 3);
        tm.kill();

        let got = capture.0.lock().unwrap();
        let mut ports: Vec<u32> = got.iter().map(|(port, _)| *port).collect();
        ports.sort();
        assert_eq!(ports, vec![0, 1, 2]);
        for (_, packet) in got.iter() {
            assert_eq!(packet.serialize().unwrap(), vec![9, 9, 9]);
        }
    }

    #[test]
    fn drop_sentinel_drops_packet() {
        let descr = TrafficManagerDescriptor {
            port_count: 1,
            queues_per_port: 1,
            multicast_map: HashMap::new(),
            discipline: "strict".to_string(),
        };
        let tm = TrafficManager::from_descriptor(&descr);
        let capture = Arc::new(Capture(StdMutex::new(Vec::new()), Condvar::new()));
        tm.set_next(capture.clone()).unwrap();
        TrafficManager::start(&tm);

        let mut p = ParsedPacket::new(vec![1]);
        p.set_field("intrinsic_metadata.egress_specification", FieldValue::Int(EGRESS_DROP as u64))
            .unwrap();
        tm.process(p).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        tm.kill();
        assert!(capture.0.lock().unwrap().is_empty());
    }

    #[test]
    fn set_discipline_rejects_unsupported_value() {
        let descr = TrafficManagerDescriptor {
            port_count: 1,
            queues_per_port: 1,
            multicast_map: HashMap::new(),
            discipline: "strict".to_string(),
        };
        let tm = TrafficManager::from_descriptor(&descr);
        tm.set_discipline("weighted_fair");
        assert_eq!(*tm.discipline.lock().unwrap(), "strict");
    }
}
