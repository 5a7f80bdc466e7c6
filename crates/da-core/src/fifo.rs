//! FIFO ordering (C6): buffers out-of-order per-author deliveries and
//! releases them in author-seq order.
//!
//! The ordering core (`FifoLayer`) doesn't care whether the envelopes below
//! it came from Best-Effort or Uniform-Reliable Broadcast — `ReliableFifo`
//! wires it under BEB and `UniformFifo` wires it under URB. Two distinct
//! compositions over one core, not two subclasses.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use da_wire::envelope::BroadcastEnvelope;

use crate::beb::{BestEffortBroadcast, LayerAbove};
use crate::urb::UrbDeliverSink;
use crate::ProcessId;

pub trait FifoDeliverSink: Send + Sync {
    fn on_fifo_deliver(&self, author: ProcessId, seq: u32, payload: Bytes);
}

#[derive(Default)]
struct AuthorState {
    next_expected: u32,
    buffered: BTreeMap<u32, Bytes>,
}

/// Per-author reordering core, independent of which broadcast primitive
/// feeds it.
struct FifoLayer {
    per_author: Mutex<HashMap<ProcessId, AuthorState>>,
    sinks: Mutex<Vec<Arc<dyn FifoDeliverSink>>>,
}

impl FifoLayer {
    fn new() -> Self {
        FifoLayer {
            per_author: Mutex::new(HashMap::new()),
            sinks: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self, sink: Arc<dyn FifoDeliverSink>) {
        self.sinks.lock().unwrap().push(sink);
    }

    fn accept(&self, author: ProcessId, seq: u32, payload: Bytes) {
        // First author-seq is 1 by convention (see BestEffortBroadcast).
        let mut ready = Vec::new();
        {
            let mut per_author = self.per_author.lock().unwrap();
            let state = per_author.entry(author).or_insert_with(|| AuthorState {
                next_expected: 1,
                buffered: BTreeMap::new(),
            });
            if seq < state.next_expected {
                return; // stale duplicate
            }
            state.buffered.insert(seq, payload);
            while let Some(payload) = state.buffered.remove(&state.next_expected) {
                ready.push((state.next_expected, payload));
                state.next_expected += 1;
            }
        }
        if ready.is_empty() {
            return;
        }
        let sinks = self.sinks.lock().unwrap();
        for (seq, payload) in ready {
            for sink in sinks.iter() {
                sink.on_fifo_deliver(author, seq, payload.clone());
            }
        }
    }
}

/// FIFO broadcast over Best-Effort Broadcast: `broadcast`-once delivery, no
/// uniformity guarantee.
pub struct ReliableFifo {
    beb: Arc<BestEffortBroadcast>,
    layer: FifoLayer,
}

impl ReliableFifo {
    pub fn new(beb: Arc<BestEffortBroadcast>) -> Arc<Self> {
        Arc::new(ReliableFifo {
            beb,
            layer: FifoLayer::new(),
        })
    }

    pub fn subscribe(&self, sink: Arc<dyn FifoDeliverSink>) {
        self.layer.subscribe(sink);
    }

    pub fn broadcast(&self, payload: Bytes) -> u32 {
        self.beb.broadcast(payload)
    }
}

impl LayerAbove for ReliableFifo {
    fn on_beb_deliver(&self, _from: ProcessId, env: BroadcastEnvelope) {
        self.layer.accept(env.author, env.author_seq, env.payload);
    }
}

/// FIFO broadcast over Uniform Reliable Broadcast: every correct process
/// delivers the same author-seq prefix, in order.
pub struct UniformFifo {
    urb: Arc<crate::urb::UniformReliableBroadcast>,
    layer: FifoLayer,
}

impl UniformFifo {
    pub fn new(urb: Arc<crate::urb::UniformReliableBroadcast>) -> Arc<Self> {
        Arc::new(UniformFifo {
            urb,
            layer: FifoLayer::new(),
        })
    }

    pub fn subscribe(&self, sink: Arc<dyn FifoDeliverSink>) {
        self.layer.subscribe(sink);
    }

    pub fn broadcast(&self, payload: Bytes) {
        self.urb.broadcast(payload);
    }
}

impl UrbDeliverSink for UniformFifo {
    fn on_urb_deliver(&self, author: ProcessId, author_seq: u32, payload: Bytes) {
        self.layer.accept(author, author_seq, payload);
    }
}
