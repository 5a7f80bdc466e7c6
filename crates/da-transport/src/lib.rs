//! UDP socket plumbing for the reliable-communication stack.
//!
//! Everything in `da-core` is I/O-free; this crate is where sockets and
//! threads actually live. [`DatagramEndpoint`] owns the one UDP socket a
//! process binds, pumps inbound datagrams into a [`PerfectLinkManager`], and
//! runs the stubborn-send / ack-flush background cycles the reference
//! implementation's PL manager runs on a timer. [`spawn_periodic`] is the
//! same timer pattern, reused by the driver to tick URB's self-flow-control
//! refill and LA's round-check.

pub mod endpoint;
pub mod periodic;

pub use endpoint::DatagramEndpoint;
pub use periodic::spawn_periodic;
