//! Binary wire codec.
//!
//! Every datagram on the wire is, outermost first: a [`pl::PlPacket`], whose
//! `Msg` payload is a [`envelope::BroadcastEnvelope`], whose payload is in
//! turn a [`la::LaMessage`] when the upper layer is lattice agreement. All
//! integers are little-endian, fixed-width, unpadded — see the field table
//! this module's encoders implement.

pub mod envelope;
pub mod la;
pub mod pl;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet shorter than the {expected}-byte header (got {got})")]
    TooShort { expected: usize, got: usize },
    #[error("unknown tag byte {0}")]
    UnknownTag(u8),
    #[error("trailing value bytes ({0}) not a multiple of 4")]
    MisalignedValues(usize),
}
