//! Lattice-agreement message: one-byte type, round, proposal number, then
//! the values packed as fixed-width u32s filling the remaining bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::CodecError;

const TYPE_PROPOSAL: u8 = 0;
const TYPE_ACK: u8 = 1;
const TYPE_NACK: u8 = 2;
const HEADER_LEN: usize = 1 + 4 + 4;
const VALUE_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaType {
    Proposal,
    Ack,
    Nack,
}

impl LaType {
    fn to_byte(self) -> u8 {
        match self {
            LaType::Proposal => TYPE_PROPOSAL,
            LaType::Ack => TYPE_ACK,
            LaType::Nack => TYPE_NACK,
        }
    }

    fn from_byte(b: u8) -> Result<Self, CodecError> {
        match b {
            TYPE_PROPOSAL => Ok(LaType::Proposal),
            TYPE_ACK => Ok(LaType::Ack),
            TYPE_NACK => Ok(LaType::Nack),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaMessage {
    pub ty: LaType,
    pub round: u32,
    pub number: u32,
    pub values: Vec<u32>,
}

impl LaMessage {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.values.len() * VALUE_LEN);
        buf.put_u8(self.ty.to_byte());
        buf.put_u32_le(self.round);
        buf.put_u32_le(self.number);
        for v in &self.values {
            buf.put_u32_le(*v);
        }
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::TooShort {
                expected: HEADER_LEN,
                got: bytes.len(),
            });
        }
        let ty = LaType::from_byte(bytes.get_u8())?;
        let round = bytes.get_u32_le();
        let number = bytes.get_u32_le();

        let remaining = bytes.remaining();
        if remaining % VALUE_LEN != 0 {
            return Err(CodecError::MisalignedValues(remaining));
        }
        let mut values = Vec::with_capacity(remaining / VALUE_LEN);
        while bytes.has_remaining() {
            values.push(bytes.get_u32_le());
        }

        Ok(LaMessage { ty, round, number, values })
    }
}
