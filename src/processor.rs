//! The uniform processor contract tying every stage of the chain together.
//!
//! Processors are allocated in one phase, then wired in a second phase by
//! calling [`Processor::set_next`] once construction of the whole chain is
//! complete (see the design note on two-phase construction). This keeps
//! `Parser`, `Pipeline`, and `TrafficManager` free of constructor-time
//! circular dependencies.

use crate::packet::ParsedPacket;
use crate::{Error, Result};
use std::sync::Arc;

/// Anything with a `process(packet)` operation and a successor.
///
/// A processor takes ownership of the packet it is given. It may mutate it,
/// replicate it, queue it for another thread, drop it, or hand it to its
/// successor — `process` itself is not expected to return the packet; the
/// successor call (synchronous or, for `TrafficManager`, deferred to a
/// worker thread) is what moves it onward.
pub trait Processor: Send + Sync {
    /// Process one packet, taking ownership of it.
    fn process(&self, packet: ParsedPacket) -> Result<()>;

    /// Wire this processor's successor. Must be called exactly once, after
    /// every processor in the chain has been allocated.
    fn set_next(&self, next: Arc<dyn Processor>) -> Result<()>;
}

/// The terminal processor: hands a packet's serialized bytes and its
/// stamped egress port to a host transmit callback.
pub struct TransmitProcessor {
    send: Box<dyn Fn(u32, Vec<u8>) + Send + Sync>,
}

impl TransmitProcessor {
    /// Build a transmit processor around a host `send(port, bytes)` hook.
    pub fn new(send: impl Fn(u32, Vec<u8>) + Send + Sync + 'static) -> Self {
        Self { send: Box::new(send) }
    }
}

impl Processor for TransmitProcessor {
    fn process(&self, packet: ParsedPacket) -> Result<()> {
        let port = packet.get_field("intrinsic_metadata.egress_port").as_int() as u32;
        let bytes = packet.serialize()?;
        (self.send)(port, bytes);
        Ok(())
    }

    fn set_next(&self, _next: Arc<dyn Processor>) -> Result<()> {
        Err(Error::Configuration(
            "TransmitProcessor is terminal and cannot have a successor".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn transmit_processor_invokes_send_with_serialized_bytes() {
        let seen: Arc<Mutex<Vec<(u32, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let tp = TransmitProcessor::new(move |port, bytes| seen2.lock().unwrap().push((port, bytes)));
        let mut p = ParsedPacket::new(vec![1, 2, 3]);
        p.set_field("intrinsic_metadata.egress_port", crate::field::FieldValue::Int(3))
            .unwrap();
        tp.process(p).unwrap();
        let got = seen.lock().unwrap();
        assert_eq!(got[0], (3, vec![1, 2, 3]));
    }

    #[test]
    fn transmit_processor_rejects_set_next() {
        let tp = TransmitProcessor::new(|_, _| {});
        struct Noop;
        impl Processor for Noop {
            fn process(&self, _p: ParsedPacket) -> Result<()> {
                Ok(())
            }
            fn set_next(&self, _n: Arc<dyn Processor>) -> Result<()> {
                Ok(())
            }
        }
        assert!(tp.set_next(Arc::new(Noop)).is_err());
    }
}
