//! Perfect-Link packet: one-byte tag, then a fixed-width seq, then (for
//! `Msg`) the payload running to the end of the datagram.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::CodecError;

const TAG_ACK: u8 = 0;
const TAG_MSG: u8 = 1;
const HEADER_LEN: usize = 1 + 4; // tag + seq

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlPacket {
    Ack { seq: u32 },
    Msg { seq: u32, payload: Bytes },
}

impl PlPacket {
    pub fn seq(&self) -> u32 {
        match self {
            PlPacket::Ack { seq } | PlPacket::Msg { seq, .. } => *seq,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            PlPacket::Ack { seq } => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN);
                buf.put_u8(TAG_ACK);
                buf.put_u32_le(*seq);
                buf.freeze()
            }
            PlPacket::Msg { seq, payload } => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
                buf.put_u8(TAG_MSG);
                buf.put_u32_le(*seq);
                buf.extend_from_slice(payload);
                buf.freeze()
            }
        }
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::TooShort {
                expected: HEADER_LEN,
                got: bytes.len(),
            });
        }
        let tag = bytes.get_u8();
        let seq = bytes.get_u32_le();
        match tag {
            TAG_ACK => Ok(PlPacket::Ack { seq }),
            TAG_MSG => Ok(PlPacket::Msg { seq, payload: bytes }),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}
