// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

/// An error while decoding a buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    /// The buffer did not contain enough bytes for the requested value
    UnexpectedEof { expected: usize, actual: usize },
    /// The bytes were well-formed but violated an invariant of the value
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof { expected, actual } => {
                write!(f, "unexpected eof: expected {expected} bytes, got {actual}")
            }
            Self::InvariantViolation(reason) => write!(f, "{reason}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderError {}

pub type DecoderBufferResult<'a, T> = Result<(T, DecoderBuffer<'a>), DecoderError>;

/// A value which can be decoded from a borrowed buffer
pub trait DecoderValue<'a>: Sized {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self>;
}

/// An immutable cursor over a byte slice
///
/// Every read consumes the buffer and returns the remaining suffix, so
/// partially-applied decoders cannot accidentally re-read bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> DecoderBuffer<'a> {
    #[inline]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn ensure_len(&self, len: usize) -> Result<(), DecoderError> {
        if self.bytes.len() < len {
            return Err(DecoderError::UnexpectedEof {
                expected: len,
                actual: self.bytes.len(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn ensure_empty(self) -> Result<(), DecoderError> {
        if !self.is_empty() {
            return Err(DecoderError::InvariantViolation("expected empty buffer"));
        }
        Ok(())
    }

    /// Reads the byte at `index` without consuming any input
    #[inline]
    pub fn peek_byte(&self, index: usize) -> Result<u8, DecoderError> {
        self.ensure_len(index + 1)?;
        Ok(self.bytes[index])
    }

    #[inline]
    pub fn skip(self, len: usize) -> Result<DecoderBuffer<'a>, DecoderError> {
        self.ensure_len(len)?;
        Ok(Self::new(&self.bytes[len..]))
    }

    #[inline]
    pub fn decode<T: DecoderValue<'a>>(self) -> DecoderBufferResult<'a, T> {
        T::decode(self)
    }

    /// Splits off a sub-buffer of `len` bytes
    #[inline]
    pub fn decode_slice(self, len: usize) -> DecoderBufferResult<'a, DecoderBuffer<'a>> {
        self.ensure_len(len)?;
        let (slice, remaining) = self.bytes.split_at(len);
        Ok((Self::new(slice), Self::new(remaining)))
    }

    /// Decodes a `Len`-prefixed value
    #[inline]
    pub fn decode_with_len_prefix<Len, T>(self) -> DecoderBufferResult<'a, T>
    where
        Len: DecoderValue<'a> + TryInto<usize>,
        T: DecoderValue<'a>,
    {
        let (len, buffer) = self.decode::<Len>()?;
        let len = len
            .try_into()
            .map_err(|_| DecoderError::InvariantViolation("invalid length prefix"))?;
        let (slice, buffer) = buffer.decode_slice(len)?;
        let (value, slice) = slice.decode::<T>()?;
        slice.ensure_empty()?;
        Ok((value, buffer))
    }

    /// Returns the entire buffer as a slice
    ///
    /// Named "less safe" as the returned slice escapes the consuming
    /// cursor discipline of the buffer.
    #[inline]
    pub fn into_less_safe_slice(self) -> &'a [u8] {
        self.bytes
    }
}

impl<'a> DecoderValue<'a> for DecoderBuffer<'a> {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let len = buffer.len();
        buffer.decode_slice(len)
    }
}

impl<'a> DecoderValue<'a> for &'a [u8] {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let len = buffer.len();
        let (slice, buffer) = buffer.decode_slice(len)?;
        Ok((slice.into_less_safe_slice(), buffer))
    }
}

impl<'a> DecoderValue<'a> for u8 {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let value = buffer.peek_byte(0)?;
        let buffer = buffer.skip(1)?;
        Ok((value, buffer))
    }
}

macro_rules! decoder_uint {
    ($ty:ident, $read:ident, $size:expr) => {
        impl<'a> DecoderValue<'a> for $ty {
            #[inline]
            fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
                let (slice, buffer) = buffer.decode_slice($size)?;
                let value = NetworkEndian::$read(slice.into_less_safe_slice());
                Ok((value, buffer))
            }
        }
    };
}

decoder_uint!(u16, read_u16, 2);
decoder_uint!(u32, read_u32, 4);
decoder_uint!(u64, read_u64, 8);

impl<'a, const N: usize> DecoderValue<'a> for [u8; N] {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.decode_slice(N)?;
        let mut value = [0u8; N];
        value.copy_from_slice(slice.into_less_safe_slice());
        Ok((value, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consuming_reads() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05];
        let buffer = DecoderBuffer::new(&bytes);
        let (a, buffer) = buffer.decode::<u8>().unwrap();
        assert_eq!(a, 0x01);
        let (b, buffer) = buffer.decode::<u16>().unwrap();
        assert_eq!(b, 0x0203);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.decode::<u32>().is_err());
    }

    #[test]
    fn len_prefix() {
        let bytes = [0x03, b'a', b'b', b'c', 0xff];
        let buffer = DecoderBuffer::new(&bytes);
        let (value, buffer) = buffer.decode_with_len_prefix::<u8, &[u8]>().unwrap();
        assert_eq!(value, b"abc");
        assert_eq!(buffer.len(), 1);
    }
}
