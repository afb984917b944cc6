// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection identifiers and stateless reset tokens.

use core::fmt;
use quill_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# In QUIC version 1, this value MUST NOT exceed 20 bytes.

/// The maximum size of a connection ID
pub const MAX_ID_LEN: usize = 20;

/// A connection ID of 0..=20 bytes, stored inline
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    bytes: [u8; MAX_ID_LEN],
    len: u8,
}

impl Id {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_ID_LEN],
        len: 0,
    };

    /// Creates a connection ID from a byte slice
    ///
    /// Returns `None` if the slice exceeds the 20-byte limit of QUIC v1.
    #[inline]
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::try_from(bytes).ok()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection::Id({:?})", self.as_bytes())
    }
}

impl TryFrom<&[u8]> for Id {
    type Error = DecoderError;

    #[inline]
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        if slice.len() > MAX_ID_LEN {
            return Err(DecoderError::InvariantViolation("connection id too long"));
        }
        let mut bytes = [0; MAX_ID_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            bytes,
            len: slice.len() as u8,
        })
    }
}

impl AsRef<[u8]> for Id {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl<'a> DecoderValue<'a> for Id {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (len, buffer) = buffer.decode::<u8>()?;
        let (slice, buffer) = buffer.decode_slice(len as usize)?;
        let id = Id::try_from(slice.into_less_safe_slice())?;
        Ok((id, buffer))
    }
}

impl EncoderValue for Id {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.len);
        encoder.write_slice(self.as_bytes());
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        1 + self.len()
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3
//# A stateless reset token is specific to a connection ID.

pub const STATELESS_RESET_TOKEN_LEN: usize = 16;

/// A 16-byte stateless reset token paired with an issued connection ID
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct StatelessResetToken([u8; STATELESS_RESET_TOKEN_LEN]);

impl StatelessResetToken {
    pub const ZEROED: Self = Self([0; STATELESS_RESET_TOKEN_LEN]);

    #[inline]
    pub fn into_inner(self) -> [u8; STATELESS_RESET_TOKEN_LEN] {
        self.0
    }
}

impl fmt::Debug for StatelessResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatelessResetToken({:?})", self.0)
    }
}

impl From<[u8; STATELESS_RESET_TOKEN_LEN]> for StatelessResetToken {
    #[inline]
    fn from(bytes: [u8; STATELESS_RESET_TOKEN_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for StatelessResetToken {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for StatelessResetToken {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl<'a> DecoderValue<'a> for StatelessResetToken {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (bytes, buffer) = buffer.decode::<[u8; STATELESS_RESET_TOKEN_LEN]>()?;
        Ok((Self(bytes), buffer))
    }
}

impl EncoderValue for StatelessResetToken {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.0);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        STATELESS_RESET_TOKEN_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_length_bounds() {
        assert!(Id::try_from_bytes(&[0u8; 21]).is_none());
        let id = Id::try_from_bytes(&[0xab; 20]).unwrap();
        assert_eq!(id.len(), 20);
        let empty = Id::try_from_bytes(&[]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn id_codec_carries_length_prefix() {
        let id = Id::try_from_bytes(&[1, 2, 3, 4, 5]).unwrap();
        let bytes = quill_codec::testing::encode(&id);
        assert_eq!(bytes, vec![5, 1, 2, 3, 4, 5]);
        let (decoded, _) = DecoderBuffer::new(&bytes).decode::<Id>().unwrap();
        assert_eq!(decoded, id);
    }
}
