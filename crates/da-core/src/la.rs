//! Multi-shot Lattice Agreement (C7): one proposal round active at a time,
//! with later `propose` calls queued until the current round decides.
//!
//! State transitions here mirror the reference protocol's evaluate-then-
//! mutate order exactly — in particular `handle_message`'s Proposal branch
//! computes whether the locally accumulated `accepted` set is already a
//! subset of the incoming proposal *before* merging the incoming values in,
//! since the merge changes the answer.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use da_common::log::LogWriter;
use da_wire::envelope::BroadcastEnvelope;
use da_wire::la::{LaMessage, LaType};

use crate::beb::{BestEffortBroadcast, LayerAbove};
use crate::ProcessId;

/// Background check interval, per the reference implementation.
pub const CHECK_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone)]
struct Proposal {
    number: u32,
    values: BTreeSet<u32>,
}

#[derive(Debug, Clone)]
struct ProposalState {
    proposal: Proposal,
    active: bool,
    ack_count: u32,
    nack_count: u32,
    accepted: BTreeSet<u32>,
}

impl ProposalState {
    fn fresh(values: BTreeSet<u32>) -> Self {
        ProposalState {
            proposal: Proposal { number: 0, values },
            active: true,
            ack_count: 1,
            nack_count: 0,
            accepted: BTreeSet::new(),
        }
    }
}

/// Evaluates one inbound message against `state`, mutating it and returning
/// the reply to send back to the sender, if any. Shared by the live-round
/// path, the cached-old-round path, and the ahead-of-time replay path.
fn handle_message(msg: &LaMessage, state: &mut ProposalState) -> Option<LaMessage> {
    match msg.ty {
        LaType::Ack if state.proposal.number == msg.number => {
            state.ack_count += 1;
            None
        }
        LaType::Nack if state.proposal.number == msg.number => {
            state.proposal.values.extend(msg.values.iter().copied());
            state.nack_count += 1;
            None
        }
        LaType::Proposal => {
            let accepted_in_proposed = state.accepted.iter().all(|v| msg.values.contains(v));
            state.accepted.extend(msg.values.iter().copied());
            if accepted_in_proposed {
                Some(LaMessage {
                    ty: LaType::Ack,
                    round: msg.round,
                    number: msg.number,
                    values: Vec::new(),
                })
            } else {
                Some(LaMessage {
                    ty: LaType::Nack,
                    round: msg.round,
                    number: msg.number,
                    values: state.accepted.iter().copied().collect(),
                })
            }
        }
        _ => None,
    }
}

/// Receives decided value sets, one per round, in round order.
pub trait LaDecideSink: Send + Sync {
    fn on_decide(&self, round: u32, values: Vec<u32>);
}

pub struct LatticeAgreement {
    n: usize,
    beb: Arc<BestEffortBroadcast>,
    log: Option<Arc<LogWriter>>,
    current_round: AtomicU32,
    current: Mutex<ProposalState>,
    to_propose: Mutex<VecDeque<BTreeSet<u32>>>,
    ahead: Mutex<HashMap<u32, Vec<(ProcessId, LaMessage)>>>,
    agreed: Mutex<BTreeMap<u32, ProposalState>>,
    sinks: Mutex<Vec<Arc<dyn LaDecideSink>>>,
}

impl LatticeAgreement {
    pub fn new(n: usize, beb: Arc<BestEffortBroadcast>, log: Option<Arc<LogWriter>>) -> Arc<Self> {
        Arc::new(LatticeAgreement {
            n,
            beb,
            log,
            current_round: AtomicU32::new(0),
            current: Mutex::new(ProposalState::fresh(BTreeSet::new())),
            to_propose: Mutex::new(VecDeque::new()),
            ahead: Mutex::new(HashMap::new()),
            agreed: Mutex::new(BTreeMap::new()),
            sinks: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe(&self, sink: Arc<dyn LaDecideSink>) {
        self.sinks.lock().unwrap().push(sink);
    }

    /// Proposes `values` for the next round this process hasn't already
    /// decided. If a round is already in flight the proposal is queued and
    /// started automatically once that round decides.
    pub fn propose(&self, values: BTreeSet<u32>) {
        let is_active = self.current.lock().unwrap().active;
        if is_active {
            self.to_propose.lock().unwrap().push_back(values);
            return;
        }
        if self.current_round.load(Ordering::SeqCst) != 0 {
            self.current_round.fetch_add(1, Ordering::SeqCst);
        }
        let round = self.current_round.load(Ordering::SeqCst);
        let state = ProposalState::fresh(values);
        let proposal = LaMessage {
            ty: LaType::Proposal,
            round,
            number: state.proposal.number,
            values: state.proposal.values.iter().copied().collect(),
        };
        *self.current.lock().unwrap() = state;
        self.beb.broadcast(proposal.encode());
    }

    fn decide_values(&self, round: u32, values: &BTreeSet<u32>) {
        let out: Vec<u32> = values.iter().copied().collect();
        if let Some(log) = &self.log {
            log.log_decision(&out);
        }
        let sinks = self.sinks.lock().unwrap();
        for sink in sinks.iter() {
            sink.on_decide(round, out.clone());
        }
    }

    /// Background check, run on a fixed interval: decides the current round
    /// once a majority has acked, or bumps the proposal number and retries
    /// once a majority of replies include a nack.
    pub fn tick(&self) {
        self.gc_agreed();

        let f = self.n / 2;
        let (decide, reset_and_broadcast) = {
            let current = self.current.lock().unwrap();
            (
                current.ack_count as usize > f && current.active,
                current.nack_count > 0
                    && (current.ack_count + current.nack_count) as usize > f
                    && current.active,
            )
        };

        if decide {
            self.do_decide();
        } else if reset_and_broadcast {
            self.do_reset_and_broadcast();
        }
    }

    fn gc_agreed(&self) {
        let n = self.n as u32;
        let mut agreed = self.agreed.lock().unwrap();
        let last_fully_acked = agreed
            .iter()
            .filter(|(_, state)| state.ack_count == n)
            .map(|(&round, _)| round)
            .max();
        if let Some(last_round) = last_fully_acked {
            agreed.retain(|&round, _| round >= last_round);
        }
    }

    fn do_decide(&self) {
        let new_proposal = {
            let mut queue = self.to_propose.lock().unwrap();
            queue.pop_front()
        };

        let round = self.current_round.fetch_add(1, Ordering::SeqCst) + 1;
        let decided_round = round - 1;

        let decided_state = {
            let mut current = self.current.lock().unwrap();
            current.active = false;
            let copy = current.clone();
            if let Some(values) = &new_proposal {
                *current = ProposalState::fresh(values.clone());
            }
            copy
        };

        let ahead_for_round: Vec<(ProcessId, LaMessage)> =
            self.ahead.lock().unwrap().remove(&round).unwrap_or_default();
        for (author, msg) in ahead_for_round {
            let reply = {
                let mut current = self.current.lock().unwrap();
                handle_message(&msg, &mut current)
            };
            if let Some(reply) = reply {
                self.beb.send_directed(author, reply.encode());
            }
        }

        if new_proposal.is_some() {
            let snapshot = self.current.lock().unwrap().clone();
            let proposal = LaMessage {
                ty: LaType::Proposal,
                round,
                number: snapshot.proposal.number,
                values: snapshot.proposal.values.iter().copied().collect(),
            };
            self.beb.broadcast(proposal.encode());
        }

        if decided_state.ack_count < self.n as u32 {
            self.agreed.lock().unwrap().insert(decided_round, decided_state.clone());
        }

        self.decide_values(decided_round, &decided_state.proposal.values);
    }

    fn do_reset_and_broadcast(&self) {
        let round = self.current_round.load(Ordering::SeqCst);
        let proposal = {
            let mut current = self.current.lock().unwrap();
            current.ack_count = 1;
            current.nack_count = 0;
            current.proposal.number += 1;
            LaMessage {
                ty: LaType::Proposal,
                round,
                number: current.proposal.number,
                values: current.proposal.values.iter().copied().collect(),
            }
        };
        self.beb.broadcast(proposal.encode());
    }
}

impl LayerAbove for LatticeAgreement {
    fn on_beb_deliver(&self, from: ProcessId, env: BroadcastEnvelope) {
        let msg = match LaMessage::decode(env.payload) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(from, error = %err, "malformed lattice-agreement message, dropping");
                return;
            }
        };

        let round = self.current_round.load(Ordering::SeqCst);
        let reply = if msg.round == round {
            let active = self.current.lock().unwrap().active;
            if active {
                let mut current = self.current.lock().unwrap();
                handle_message(&msg, &mut current)
            } else {
                self.ahead.lock().unwrap().entry(msg.round).or_default().push((from, msg));
                None
            }
        } else if msg.round > round {
            self.ahead.lock().unwrap().entry(msg.round).or_default().push((from, msg));
            None
        } else {
            let mut agreed = self.agreed.lock().unwrap();
            match agreed.get_mut(&msg.round) {
                Some(state) => handle_message(&msg, state),
                None => None,
            }
        };

        if let Some(reply) = reply {
            self.beb.send_directed(from, reply.encode());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pl::PerfectLinkManager;
    use da_wire::pl::PlPacket;
    use std::sync::Mutex as StdMutex;

    struct Node {
        pl: Arc<PerfectLinkManager>,
        la: Arc<LatticeAgreement>,
    }

    struct Collector(StdMutex<Vec<(u32, Vec<u32>)>>);
    impl LaDecideSink for Collector {
        fn on_decide(&self, round: u32, values: Vec<u32>) {
            self.0.lock().unwrap().push((round, values));
        }
    }

    fn build_group(n: usize) -> (Vec<Node>, Vec<Arc<Collector>>) {
        let ids: Vec<ProcessId> = (1..=n as u16).collect();
        let mut nodes = Vec::new();
        let mut collectors = Vec::new();
        for &id in &ids {
            let pl = Arc::new(PerfectLinkManager::new());
            for &peer in &ids {
                if peer != id {
                    pl.add_peer(peer);
                }
            }
            let beb = BestEffortBroadcast::new(id, pl.clone(), None);
            let la = LatticeAgreement::new(n, beb.clone(), None);
            pl.subscribe(beb.clone());
            beb.subscribe(la.clone());
            let collector = Arc::new(Collector(StdMutex::new(Vec::new())));
            la.subscribe(collector.clone());
            nodes.push(Node { pl, la });
            collectors.push(collector);
        }
        (nodes, collectors)
    }

    fn flush_all(nodes: &[Node]) {
        loop {
            let mut any = false;
            for i in 0..nodes.len() {
                let from_id = (i + 1) as u16;
                let outbound = nodes[i].pl.stubborn_tick();
                for (peer, bytes) in outbound {
                    any = true;
                    let to_idx = (peer - 1) as usize;
                    nodes[to_idx].pl.on_datagram(from_id, bytes.clone());
                    if let Ok(PlPacket::Msg { seq, .. }) = PlPacket::decode(bytes) {
                        let ack = PlPacket::Ack { seq }.encode();
                        nodes[i].pl.on_datagram(peer, ack);
                    }
                }
            }
            if !any {
                break;
            }
        }
    }

    #[test]
    fn handle_message_ack_matches_on_number_only() {
        let mut state = ProposalState::fresh([1, 2].into_iter().collect());
        let ack = LaMessage { ty: LaType::Ack, round: 0, number: 0, values: vec![] };
        assert!(handle_message(&ack, &mut state).is_none());
        assert_eq!(state.ack_count, 2);

        let stale_ack = LaMessage { ty: LaType::Ack, round: 0, number: 7, values: vec![] };
        handle_message(&stale_ack, &mut state);
        assert_eq!(state.ack_count, 2);
    }

    #[test]
    fn handle_message_nack_merges_values_and_counts() {
        let mut state = ProposalState::fresh([1].into_iter().collect());
        let nack = LaMessage { ty: LaType::Nack, round: 0, number: 0, values: vec![2, 3] };
        handle_message(&nack, &mut state);
        assert_eq!(state.proposal.values, [1, 2, 3].into_iter().collect());
        assert_eq!(state.nack_count, 1);
    }

    #[test]
    fn handle_message_proposal_acks_when_accepted_is_subset() {
        let mut state = ProposalState::fresh(BTreeSet::new());
        let proposal = LaMessage { ty: LaType::Proposal, round: 0, number: 0, values: vec![1, 2] };
        let reply = handle_message(&proposal, &mut state).unwrap();
        assert_eq!(reply.ty, LaType::Ack);
        assert_eq!(state.accepted, [1, 2].into_iter().collect());
    }

    #[test]
    fn handle_message_proposal_nacks_when_accepted_has_extra_values() {
        let mut state = ProposalState::fresh(BTreeSet::new());
        state.accepted = [1, 2, 9].into_iter().collect();
        let proposal = LaMessage { ty: LaType::Proposal, round: 0, number: 0, values: vec![1, 2] };
        let reply = handle_message(&proposal, &mut state).unwrap();
        assert_eq!(reply.ty, LaType::Nack);
        assert_eq!(reply.values.iter().copied().collect::<BTreeSet<_>>(), [1, 2, 9].into_iter().collect());
    }

    #[test]
    fn three_process_group_decides_uniform_values_with_no_contention() {
        let (nodes, collectors) = build_group(3);
        nodes[0].la.propose([10, 20].into_iter().collect());
        nodes[1].la.propose([30].into_iter().collect());
        nodes[2].la.propose([40].into_iter().collect());

        flush_all(&nodes);
        flush_all(&nodes); // ack round-trip

        for node in &nodes {
            node.la.tick();
        }

        for (i, collector) in collectors.iter().enumerate() {
            let decided = collector.0.lock().unwrap();
            assert_eq!(decided.len(), 1, "process {} should have decided exactly once", i + 1);
            assert_eq!(decided[0].0, 0);
        }
    }

    #[test]
    fn decided_value_is_a_superset_of_the_local_proposal() {
        let (nodes, collectors) = build_group(3);
        let own = vec![10, 20];
        nodes[0].la.propose(own.iter().copied().collect());
        flush_all(&nodes);
        flush_all(&nodes);
        nodes[0].la.tick();

        let decided = &collectors[0].0.lock().unwrap()[0].1;
        for v in &own {
            assert!(decided.contains(v));
        }
    }

    #[test]
    fn queued_proposal_starts_automatically_after_decide() {
        let (nodes, collectors) = build_group(3);
        nodes[0].la.propose([1].into_iter().collect());
        nodes[0].la.propose([2].into_iter().collect()); // queued, round still active

        flush_all(&nodes);
        flush_all(&nodes);
        for node in &nodes {
            node.la.tick();
        }
        flush_all(&nodes);
        flush_all(&nodes);
        for node in &nodes {
            node.la.tick();
        }

        let decided = collectors[0].0.lock().unwrap();
        assert_eq!(decided.len(), 2);
        assert_eq!(decided[0].0, 0);
        assert_eq!(decided[1].0, 1);
    }
}
