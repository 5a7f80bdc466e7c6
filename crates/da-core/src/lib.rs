//! Pure-logic state machines for the reliable-communication stack.
//!
//! Every type in this crate is I/O-free: a [`pl::PerfectLink`] doesn't know
//! about sockets, a [`la::LatticeAgreement`] doesn't know about threads. Each
//! takes a capability interface for the layer below it (`da-transport`
//! supplies the socket) and exposes one for the layer above, wired together
//! once at construction time — there is no inheritance between layers, only
//! composition through the `Notifyable` / `LayerAbove` / `UrbDeliverSink`
//! interfaces below.

pub mod beb;
pub mod compact_set;
pub mod fifo;
pub mod la;
pub mod pl;
pub mod urb;

pub use da_common::ProcessId;

/// A broadcast id: totally ordered by `(author_seq, author)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BroadcastId {
    pub author_seq: u32,
    pub author: ProcessId,
}
