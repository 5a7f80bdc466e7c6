//! Broadcast envelope: author id (2 bytes), author seq (4 bytes), payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use da_common::ProcessId;

use crate::CodecError;

const HEADER_LEN: usize = 2 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEnvelope {
    pub author: ProcessId,
    pub author_seq: u32,
    pub payload: Bytes,
}

impl BroadcastEnvelope {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u16_le(self.author);
        buf.put_u32_le(self.author_seq);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::TooShort {
                expected: HEADER_LEN,
                got: bytes.len(),
            });
        }
        let author = bytes.get_u16_le();
        let author_seq = bytes.get_u32_le();
        Ok(BroadcastEnvelope {
            author,
            author_seq,
            payload: bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips() {
        let env = BroadcastEnvelope {
            author: 3,
            author_seq: 17,
            payload: Bytes::from_static(b"payload"),
        };
        assert_eq!(BroadcastEnvelope::decode(env.encode()).unwrap(), env);
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(matches!(
            BroadcastEnvelope::decode(Bytes::from_static(&[1, 2])),
            Err(CodecError::TooShort { .. })
        ));
    }

    proptest! {
        #[test]
        fn round_trip_prop(author: u16, author_seq: u32, payload in proptest::collection::vec(any::<u8>(), 0..128)) {
            let env = BroadcastEnvelope { author, author_seq, payload: Bytes::from(payload) };
            prop_assert_eq!(BroadcastEnvelope::decode(env.encode()).unwrap(), env);
        }
    }
}
