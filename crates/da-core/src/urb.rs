//! Uniform Reliable Broadcast (C5), built over Best-Effort Broadcast by
//! relaying every envelope on first sight and delivering once a majority of
//! processes have been observed relaying it.
//!
//! Self-authored broadcasts are rate-limited (`own_cap`) so one process
//! can't flood `pending_for_delivery` across the whole group while peers are
//! still catching up — `own_cap := max(1, FLOW_BUDGET / N^2)` in-flight
//! broadcasts at a time, queuing the rest in `own_pending_for_broadcast`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use da_wire::envelope::BroadcastEnvelope;

use crate::beb::{BestEffortBroadcast, LayerAbove};
use crate::compact_set::CompactDeliveredSet;
use crate::{BroadcastId, ProcessId};

/// Self-flow-control budget shared across the whole group.
pub const FLOW_BUDGET: u32 = 1 << 14;

/// Reference delivery/refill-check interval.
pub const DELIVER_TICK_MS: u64 = 100;

/// Upward observer of uniform-reliable deliveries — FIFO's uniform
/// composition sits here.
pub trait UrbDeliverSink: Send + Sync {
    fn on_urb_deliver(&self, author: ProcessId, author_seq: u32, payload: Bytes);
}

struct Inner {
    pending_for_delivery: HashMap<BroadcastId, Bytes>,
    acks: HashMap<BroadcastId, HashSet<ProcessId>>,
    /// Per-author sparse delivered set — §3's URB state table names this
    /// field `delivered: CompactDeliveredSet` explicitly, one instance per
    /// author rather than one flat set of `BroadcastId`.
    delivered: HashMap<ProcessId, CompactDeliveredSet>,
    own_pending_for_broadcast: VecDeque<Bytes>,
}

impl Inner {
    fn is_delivered(&self, id: BroadcastId) -> bool {
        self.delivered.get(&id.author).is_some_and(|set| set.contains(id.author_seq))
    }

    fn mark_delivered(&mut self, id: BroadcastId) {
        self.delivered.entry(id.author).or_default().insert(id.author_seq);
    }
}

pub struct UniformReliableBroadcast {
    self_id: ProcessId,
    n: usize,
    beb: Arc<BestEffortBroadcast>,
    own_in_flight: AtomicU32,
    own_cap: u32,
    above: Mutex<Vec<Arc<dyn UrbDeliverSink>>>,
    inner: Mutex<Inner>,
}

impl UniformReliableBroadcast {
    pub fn new(self_id: ProcessId, n: usize, beb: Arc<BestEffortBroadcast>) -> Arc<Self> {
        let own_cap = std::cmp::max(1, FLOW_BUDGET / (n as u32 * n as u32).max(1));
        Arc::new(UniformReliableBroadcast {
            self_id,
            n,
            beb,
            own_in_flight: AtomicU32::new(0),
            own_cap,
            above: Mutex::new(Vec::new()),
            inner: Mutex::new(Inner {
                pending_for_delivery: HashMap::new(),
                acks: HashMap::new(),
                delivered: HashMap::new(),
                own_pending_for_broadcast: VecDeque::new(),
            }),
        })
    }

    pub fn subscribe(&self, sink: Arc<dyn UrbDeliverSink>) {
        self.above.lock().unwrap().push(sink);
    }

    fn majority(&self) -> usize {
        self.n / 2 + 1
    }

    /// Queues `payload` for uniform broadcast, respecting `own_cap`. Returns
    /// immediately; `tick` drains the queue as capacity frees up.
    pub fn broadcast(&self, payload: Bytes) {
        let mut inner = self.inner.lock().unwrap();
        inner.own_pending_for_broadcast.push_back(payload);
        drop(inner);
        self.refill();
    }

    fn refill(&self) {
        loop {
            let in_flight = self.own_in_flight.load(Ordering::Relaxed);
            if in_flight >= self.own_cap {
                return;
            }
            let payload = {
                let mut inner = self.inner.lock().unwrap();
                match inner.own_pending_for_broadcast.pop_front() {
                    Some(p) => p,
                    None => return,
                }
            };
            if self
                .own_in_flight
                .compare_exchange(in_flight, in_flight + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                // Lost the race; put it back and retry.
                self.inner.lock().unwrap().own_pending_for_broadcast.push_front(payload);
                continue;
            }
            self.beb.broadcast(payload);
        }
    }

    /// Call periodically (or after every delivery) to top up in-flight
    /// self-authored broadcasts once earlier ones have been delivered.
    pub fn tick(&self) {
        self.refill();
    }

    fn deliver(&self, id: BroadcastId, payload: Bytes) {
        let sinks = self.above.lock().unwrap();
        for sink in sinks.iter() {
            sink.on_urb_deliver(id.author, id.author_seq, payload.clone());
        }
    }
}

impl LayerAbove for UniformReliableBroadcast {
    fn on_beb_deliver(&self, from: ProcessId, env: BroadcastEnvelope) {
        let id = BroadcastId {
            author: env.author,
            author_seq: env.author_seq,
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.is_delivered(id) {
            return;
        }

        let first_sight = !inner.pending_for_delivery.contains_key(&id);
        if first_sight {
            inner.pending_for_delivery.insert(id, env.payload.clone());
        }
        let ack_set = inner.acks.entry(id).or_default();
        ack_set.insert(from);
        if first_sight {
            // Holding a copy in pending_for_delivery counts as this
            // process's own vote, whether it's the author (already true via
            // self-dispatch) or a relayer seeing the envelope for the first
            // time.
            ack_set.insert(self.self_id);
        }
        let acked = ack_set.len();
        let majority = self.majority();
        drop(inner);

        if first_sight {
            self.beb.relay(&env);
        }

        if acked >= majority {
            let payload = {
                let mut inner = self.inner.lock().unwrap();
                if inner.is_delivered(id) {
                    return;
                }
                inner.mark_delivered(id);
                inner.acks.remove(&id);
                inner.pending_for_delivery.remove(&id)
            };
            if let Some(payload) = payload {
                self.deliver(id, payload);
                if id.author == self.self_id {
                    self.own_in_flight.fetch_sub(1, Ordering::SeqCst);
                    self.refill();
                }
            }
        }
    }
}
