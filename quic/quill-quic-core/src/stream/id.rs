// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
//# The least significant bit (0x01) of the stream ID identifies the
//# initiator of the stream.

//= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
//# The second least significant bit (0x02) of the stream ID
//# distinguishes between bidirectional streams (with the bit set to 0)
//# and unidirectional streams (with the bit set to 1).

/// Which endpoint opened the stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Initiator {
    Client,
    Server,
}

impl Initiator {
    /// The peer of this initiator
    #[inline]
    pub fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    Bidirectional,
    Unidirectional,
}

/// A 62-bit stream identifier with the initiator and type encoded in the
/// low two bits
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(VarInt);

impl StreamId {
    /// The first stream ID for the given initiator and type
    #[inline]
    pub fn initial(initiator: Initiator, stream_type: StreamType) -> Self {
        let mut bits = 0u64;
        if matches!(initiator, Initiator::Server) {
            bits |= 0x01;
        }
        if matches!(stream_type, StreamType::Unidirectional) {
            bits |= 0x02;
        }
        Self(VarInt::from_u8(bits as u8))
    }

    /// The `n`th stream ID (0-based) for the given initiator and type
    #[inline]
    pub fn nth(initiator: Initiator, stream_type: StreamType, n: u64) -> Option<Self> {
        let initial = Self::initial(initiator, stream_type);
        let id = initial.0.checked_add(VarInt::new(n.checked_mul(4)?).ok()?)?;
        Some(Self(id))
    }

    /// The next stream ID of the same initiator and type
    #[inline]
    pub fn next_of_kind(self) -> Option<Self> {
        Some(Self(self.0.checked_add(VarInt::from_u8(4))?))
    }

    #[inline]
    pub fn initiator(self) -> Initiator {
        if *self.0 & 0x01 == 0 {
            Initiator::Client
        } else {
            Initiator::Server
        }
    }

    #[inline]
    pub fn stream_type(self) -> StreamType {
        if *self.0 & 0x02 == 0 {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        }
    }

    #[inline]
    pub fn as_varint(self) -> VarInt {
        self.0
    }
}

impl From<VarInt> for StreamId {
    #[inline]
    fn from(id: VarInt) -> Self {
        Self(id)
    }
}

impl From<StreamId> for VarInt {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_bits_encode_kind() {
        for (initiator, stream_type, expected) in [
            (Initiator::Client, StreamType::Bidirectional, 0u64),
            (Initiator::Server, StreamType::Bidirectional, 1),
            (Initiator::Client, StreamType::Unidirectional, 2),
            (Initiator::Server, StreamType::Unidirectional, 3),
        ] {
            let id = StreamId::initial(initiator, stream_type);
            assert_eq!(*id.as_varint(), expected);
            assert_eq!(id.initiator(), initiator);
            assert_eq!(id.stream_type(), stream_type);
        }
    }

    #[test]
    fn nth_strides_by_four() {
        let id = StreamId::nth(Initiator::Client, StreamType::Bidirectional, 3).unwrap();
        assert_eq!(*id.as_varint(), 12);
        assert_eq!(*id.next_of_kind().unwrap().as_varint(), 16);
    }
}
