//! Perfect Link (C2): one instance per ordered (self → peer), plus a
//! [`PerfectLinkManager`] that owns one per peer and runs the shared
//! stubborn-send / ack-flush / ack-GC cycle the background tasks drive.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use da_wire::pl::PlPacket;

use crate::ProcessId;

/// Every flush cycle reference interval, per §4.2.
pub const FLUSH_MSGS_MS: u64 = 250;
pub const FLUSH_ACKS_MS: u64 = 250;
/// `STOP_ACK_TIMEOUT := FLUSH_MSGS_MS + RTT_BUDGET`, reference ~0.6s total.
pub const STOP_ACK_TIMEOUT: Duration = Duration::from_millis(600);

/// Upward observer of first-time Perfect Link deliveries. Multiple managers
/// may subscribe to the same link (e.g. a driver layering Broadcast on PL).
pub trait Notifyable: Send + Sync {
    fn notify(&self, from: ProcessId, seq: u32, payload: Bytes);
}

/// Per-(self, peer) state machine. No knowledge of sockets: callers hand it
/// inbound bytes and pull outbound bytes to actually send.
pub struct PerfectLink {
    peer: ProcessId,
    next_send_seq: AtomicU32,
    to_send: Mutex<HashMap<u32, Bytes>>,
    to_ack: Mutex<HashSet<u32>>,
    delivered: Mutex<HashMap<u32, Instant>>,
}

impl PerfectLink {
    pub fn new(peer: ProcessId) -> Self {
        PerfectLink {
            peer,
            next_send_seq: AtomicU32::new(1),
            to_send: Mutex::new(HashMap::new()),
            to_ack: Mutex::new(HashSet::new()),
            delivered: Mutex::new(HashMap::new()),
        }
    }

    pub fn peer(&self) -> ProcessId {
        self.peer
    }

    /// Allocates the next seq, stores the payload pending ack. Non-blocking.
    pub fn send(&self, payload: Bytes) -> u32 {
        let seq = self.next_send_seq.fetch_add(1, Ordering::Relaxed);
        self.to_send.lock().unwrap().insert(seq, payload);
        seq
    }

    /// Classifies an inbound packet. Returns `Some((seq, payload))` the
    /// first time a given `Msg` seq is seen — the caller should notify
    /// subscribers with it.
    pub fn on_inbound(&self, pkt: PlPacket) -> Option<(u32, Bytes)> {
        match pkt {
            PlPacket::Ack { seq } => {
                self.to_send.lock().unwrap().remove(&seq);
                None
            }
            PlPacket::Msg { seq, payload } => {
                let first_time = {
                    let mut delivered = self.delivered.lock().unwrap();
                    let first = !delivered.contains_key(&seq);
                    delivered.insert(seq, Instant::now());
                    first
                };
                self.to_ack.lock().unwrap().insert(seq);
                if first_time {
                    Some((seq, payload))
                } else {
                    None
                }
            }
        }
    }

    /// Snapshot of `to_send`, encoded as `Msg` datagrams, for the stubborn
    /// retransmit cycle.
    pub fn drain_stubborn(&self) -> Vec<Bytes> {
        self.to_send
            .lock()
            .unwrap()
            .iter()
            .map(|(&seq, payload)| {
                PlPacket::Msg {
                    seq,
                    payload: payload.clone(),
                }
                .encode()
            })
            .collect()
    }

    /// Snapshot of `to_ack`, encoded as `Ack` datagrams, then runs ack GC.
    pub fn drain_acks(&self) -> Vec<Bytes> {
        let acks: Vec<Bytes> = self
            .to_ack
            .lock()
            .unwrap()
            .iter()
            .map(|&seq| PlPacket::Ack { seq }.encode())
            .collect();
        self.gc();
        acks
    }

    /// Ack GC: once a delivered seq is old enough that the peer can no
    /// longer be retransmitting it, stop acking it and forget it.
    fn gc(&self) {
        let now = Instant::now();
        let mut to_remove = Vec::new();
        {
            let delivered = self.delivered.lock().unwrap();
            for (&seq, &t) in delivered.iter() {
                if now.duration_since(t) >= STOP_ACK_TIMEOUT {
                    to_remove.push(seq);
                }
            }
        }
        if to_remove.is_empty() {
            return;
        }
        let mut delivered = self.delivered.lock().unwrap();
        let mut to_ack = self.to_ack.lock().unwrap();
        for seq in to_remove {
            delivered.remove(&seq);
            to_ack.remove(&seq);
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.to_send.lock().unwrap().len()
    }
}

/// Something that can push an encoded datagram out to a peer. `da-transport`
/// implements this over a real UDP socket.
pub trait PlSender: Send + Sync {
    fn send_to(&self, peer: ProcessId, payload: Bytes);
}

/// Owns one [`PerfectLink`] per peer and the subscriber list every link
/// notifies on first-time delivery — the direct analogue of the reference
/// implementation's threaded PL manager, minus the threads themselves (those
/// live in `da-transport`, which calls `stubborn_tick`/`ack_tick` on a timer).
pub struct PerfectLinkManager {
    links: RwLock<HashMap<ProcessId, Arc<PerfectLink>>>,
    subscribers: RwLock<Vec<Arc<dyn Notifyable>>>,
}

impl Default for PerfectLinkManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfectLinkManager {
    pub fn new() -> Self {
        PerfectLinkManager {
            links: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_peer(&self, peer: ProcessId) {
        self.links
            .write()
            .unwrap()
            .entry(peer)
            .or_insert_with(|| Arc::new(PerfectLink::new(peer)));
    }

    pub fn subscribe(&self, observer: Arc<dyn Notifyable>) {
        self.subscribers.write().unwrap().push(observer);
    }

    pub fn send(&self, peer: ProcessId, payload: Bytes) -> Option<u32> {
        let link = self.links.read().unwrap().get(&peer).cloned()?;
        Some(link.send(payload))
    }

    pub fn send_all(&self, payload: Bytes) {
        let links: Vec<_> = self.links.read().unwrap().values().cloned().collect();
        for link in links {
            link.send(payload.clone());
        }
    }

    /// Dispatches one inbound datagram from `peer`: parses it, updates the
    /// link, and fans first-time deliveries out to subscribers.
    pub fn on_datagram(&self, peer: ProcessId, bytes: Bytes) {
        let link = match self.links.read().unwrap().get(&peer).cloned() {
            Some(link) => link,
            None => {
                tracing::debug!(peer, "datagram from unattached peer, dropping");
                return;
            }
        };
        let pkt = match PlPacket::decode(bytes) {
            Ok(pkt) => pkt,
            Err(err) => {
                tracing::debug!(peer, error = %err, "malformed PL datagram, dropping");
                return;
            }
        };
        if let Some((seq, payload)) = link.on_inbound(pkt) {
            let subs = self.subscribers.read().unwrap();
            for sub in subs.iter() {
                sub.notify(peer, seq, payload.clone());
            }
        }
    }

    /// Stubborn-send tick: every peer's unacked messages, for the caller to
    /// actually transmit.
    pub fn stubborn_tick(&self) -> Vec<(ProcessId, Bytes)> {
        let links: Vec<_> = self.links.read().unwrap().values().cloned().collect();
        links
            .iter()
            .flat_map(|link| {
                let peer = link.peer();
                link.drain_stubborn().into_iter().map(move |b| (peer, b))
            })
            .collect()
    }

    /// Ack-flush tick (runs ack GC internally per link).
    pub fn ack_tick(&self) -> Vec<(ProcessId, Bytes)> {
        let links: Vec<_> = self.links.read().unwrap().values().cloned().collect();
        links
            .iter()
            .flat_map(|link| {
                let peer = link.peer();
                link.drain_acks().into_iter().map(move |b| (peer, b))
            })
            .collect()
    }

    pub fn peers(&self) -> Vec<ProcessId> {
        self.links.read().unwrap().keys().copied().collect()
    }
}

impl PlSender for PerfectLinkManager {
    fn send_to(&self, peer: ProcessId, payload: Bytes) {
        self.send(peer, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_allocates_monotonic_seqs() {
        let link = PerfectLink::new(2);
        assert_eq!(link.send(Bytes::from_static(b"a")), 1);
        assert_eq!(link.send(Bytes::from_static(b"b")), 2);
        assert_eq!(link.in_flight(), 2);
    }

    #[test]
    fn ack_removes_from_to_send() {
        let link = PerfectLink::new(2);
        link.send(Bytes::from_static(b"a"));
        link.on_inbound(PlPacket::Ack { seq: 1 });
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn duplicate_ack_is_idempotent() {
        let link = PerfectLink::new(2);
        link.send(Bytes::from_static(b"a"));
        link.on_inbound(PlPacket::Ack { seq: 1 });
        link.on_inbound(PlPacket::Ack { seq: 1 });
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn first_delivery_notifies_duplicate_does_not() {
        let link = PerfectLink::new(2);
        let first = link.on_inbound(PlPacket::Msg {
            seq: 1,
            payload: Bytes::from_static(b"x"),
        });
        let second = link.on_inbound(PlPacket::Msg {
            seq: 1,
            payload: Bytes::from_static(b"x"),
        });
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn inbound_msg_is_always_added_to_ack_queue() {
        let link = PerfectLink::new(2);
        link.on_inbound(PlPacket::Msg {
            seq: 5,
            payload: Bytes::from_static(b"x"),
        });
        let acks = link.drain_acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(PlPacket::decode(acks[0].clone()).unwrap(), PlPacket::Ack { seq: 5 });
    }

    #[test]
    fn stubborn_send_reuses_unacked_entries() {
        let link = PerfectLink::new(2);
        link.send(Bytes::from_static(b"a"));
        let first = link.drain_stubborn();
        let second = link.drain_stubborn();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    struct Collector(Mutex<Vec<(ProcessId, u32, Bytes)>>);
    impl Notifyable for Collector {
        fn notify(&self, from: ProcessId, seq: u32, payload: Bytes) {
            self.0.lock().unwrap().push((from, seq, payload));
        }
    }

    #[test]
    fn manager_dispatches_first_time_delivery_to_subscribers() {
        let mgr = PerfectLinkManager::new();
        mgr.add_peer(1);
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        mgr.subscribe(collector.clone());

        let pkt = PlPacket::Msg {
            seq: 1,
            payload: Bytes::from_static(b"hi"),
        }
        .encode();
        mgr.on_datagram(1, pkt.clone());
        mgr.on_datagram(1, pkt); // duplicate

        let seen = collector.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 1);
    }

    #[test]
    fn manager_drops_datagram_from_unattached_peer() {
        let mgr = PerfectLinkManager::new();
        let pkt = PlPacket::Ack { seq: 1 }.encode();
        // Should not panic.
        mgr.on_datagram(99, pkt);
    }

    #[test]
    fn malformed_datagram_is_dropped_silently() {
        let mgr = PerfectLinkManager::new();
        mgr.add_peer(1);
        mgr.on_datagram(1, Bytes::from_static(&[0xFF]));
    }
}
