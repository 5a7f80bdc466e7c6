//! Best-Effort Broadcast (C4): fan a payload out to every peer over Perfect
//! Links, tag it with an author/seq so URB and FIFO can reason about it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use da_common::log::LogWriter;
use da_wire::envelope::BroadcastEnvelope;

use crate::pl::{Notifyable, PerfectLinkManager};
use crate::ProcessId;

/// Upward observer of best-effort deliveries — URB, FIFO and LA all sit
/// above a `BestEffortBroadcast` and implement this to receive envelopes.
pub trait LayerAbove: Send + Sync {
    fn on_beb_deliver(&self, from: ProcessId, env: BroadcastEnvelope);
}

/// Broadcasts over a [`PerfectLinkManager`], assigning each locally authored
/// message a sequence number shared between `broadcast` and `send_directed`
/// (the latter used by lattice agreement to reply to a single peer without
/// going through the broadcast fan-out).
pub struct BestEffortBroadcast {
    self_id: ProcessId,
    pl: Arc<PerfectLinkManager>,
    n_authored: AtomicU32,
    log: Option<Arc<LogWriter>>,
    above: RwLock<Vec<Arc<dyn LayerAbove>>>,
}

impl BestEffortBroadcast {
    pub fn new(self_id: ProcessId, pl: Arc<PerfectLinkManager>, log: Option<Arc<LogWriter>>) -> Arc<Self> {
        Arc::new(BestEffortBroadcast {
            self_id,
            pl,
            n_authored: AtomicU32::new(0),
            log,
            above: RwLock::new(Vec::new()),
        })
    }

    pub fn subscribe(&self, observer: Arc<dyn LayerAbove>) {
        self.above.write().unwrap().push(observer);
    }

    /// Broadcasts `payload` to every peer, logging `b <seq>` if a log is
    /// attached. Returns the assigned author seq.
    pub fn broadcast(&self, payload: Bytes) -> u32 {
        let seq = self.n_authored.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(log) = &self.log {
            log.log_broadcast(seq);
        }
        self.fan_out(seq, payload);
        seq
    }

    /// Sends a single message to one peer under a freshly allocated author
    /// seq, without logging or broadcasting — lattice agreement uses this to
    /// send Ack/Nack replies.
    pub fn send_directed(&self, peer: ProcessId, payload: Bytes) -> u32 {
        let seq = self.n_authored.fetch_add(1, Ordering::Relaxed) + 1;
        let env = BroadcastEnvelope {
            author: self.self_id,
            author_seq: seq,
            payload,
        };
        self.pl.send(peer, env.encode());
        seq
    }

    /// Re-broadcasts an envelope authored by someone else, preserving its
    /// id — used by URB's first-sight relay.
    pub fn relay(&self, env: &BroadcastEnvelope) {
        let bytes = env.encode();
        for peer in self.pl.peers() {
            self.pl.send(peer, bytes.clone());
        }
    }

    fn fan_out(&self, seq: u32, payload: Bytes) {
        let env = BroadcastEnvelope {
            author: self.self_id,
            author_seq: seq,
            payload,
        };
        let bytes = env.encode();
        for peer in self.pl.peers() {
            self.pl.send(peer, bytes.clone());
        }
        // Deliver to ourselves too: a broadcaster is a recipient of its own
        // broadcast per the uniform-reliable and FIFO delivery properties.
        self.dispatch(self.self_id, env);
    }

    fn dispatch(&self, from: ProcessId, env: BroadcastEnvelope) {
        let observers = self.above.read().unwrap();
        for obs in observers.iter() {
            obs.on_beb_deliver(from, env.clone());
        }
    }
}

impl Notifyable for BestEffortBroadcast {
    fn notify(&self, from: ProcessId, _seq: u32, payload: Bytes) {
        match BroadcastEnvelope::decode(payload) {
            Ok(env) => self.dispatch(from, env),
            Err(err) => {
                tracing::debug!(from, error = %err, "malformed broadcast envelope, dropping");
            }
        }
    }
}
