// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The 9-byte HTTP/2 frame header and low-level frame emission.

use bytes::{BufMut, BytesMut};
use quill_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9113#section-4.1
//# All frames begin with a fixed 9-octet header followed by a variable-
//# length frame payload.

pub const HEADER_LEN: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    Goaway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::Goaway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl FrameType {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0x0,
            Self::Headers => 0x1,
            Self::Priority => 0x2,
            Self::RstStream => 0x3,
            Self::Settings => 0x4,
            Self::PushPromise => 0x5,
            Self::Ping => 0x6,
            Self::Goaway => 0x7,
            Self::WindowUpdate => 0x8,
            Self::Continuation => 0x9,
            Self::Unknown(other) => other,
        }
    }
}

/// Frame flag bits
pub mod flags {
    /// END_STREAM on DATA / HEADERS; ACK on SETTINGS / PING
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// 24-bit length, 8-bit type, 8-bit flags, 1 reserved + 31-bit stream ID
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

impl EncoderValue for FrameHeader {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        debug_assert!(self.length < 1 << 24);
        encoder.write_sized(3, |bytes| {
            bytes.copy_from_slice(&self.length.to_be_bytes()[1..]);
        });
        encoder.encode(&self.frame_type.as_u8());
        encoder.encode(&self.flags);
        encoder.encode(&(self.stream_id & 0x7fff_ffff));
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        HEADER_LEN
    }
}

impl<'a> DecoderValue<'a> for FrameHeader {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (length_bytes, buffer) = buffer.decode::<[u8; 3]>()?;
        let length = u32::from_be_bytes([0, length_bytes[0], length_bytes[1], length_bytes[2]]);
        let (frame_type, buffer) = buffer.decode::<u8>()?;
        let (frame_flags, buffer) = buffer.decode::<u8>()?;
        let (stream_id, buffer) = buffer.decode::<u32>()?;
        Ok((
            Self {
                length,
                frame_type: frame_type.into(),
                flags: frame_flags,
                stream_id: stream_id & 0x7fff_ffff,
            },
            buffer,
        ))
    }
}

/// Appends a complete frame (header + payload) to `out`
pub fn write_frame(
    out: &mut BytesMut,
    frame_type: FrameType,
    frame_flags: u8,
    stream_id: u32,
    payload: &[u8],
) {
    let header = FrameHeader {
        length: payload.len() as u32,
        frame_type,
        flags: frame_flags,
        stream_id,
    };
    let mut bytes = [0u8; HEADER_LEN];
    let mut encoder = quill_codec::EncoderBuffer::new(&mut bytes);
    encoder.encode(&header);
    out.put_slice(&bytes);
    out.put_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_codec::assert_codec_round_trip_value;

    #[test]
    fn header_round_trips_for_every_type_and_flag() {
        for frame_type in [
            FrameType::Data,
            FrameType::Headers,
            FrameType::Priority,
            FrameType::RstStream,
            FrameType::Settings,
            FrameType::PushPromise,
            FrameType::Ping,
            FrameType::Goaway,
            FrameType::WindowUpdate,
            FrameType::Continuation,
            FrameType::Unknown(0x42),
        ] {
            for frame_flags in [0x0, 0x1, 0x4, 0x5, 0x8, 0x20, 0xff] {
                let header = FrameHeader {
                    length: 0x00ab_cdef,
                    frame_type,
                    flags: frame_flags,
                    stream_id: 0x7fff_fffe,
                };
                let bytes = assert_codec_round_trip_value!(FrameHeader, header);
                assert_eq!(bytes.len(), HEADER_LEN);
            }
        }
    }

    #[test]
    fn reserved_bit_is_masked() {
        let bytes = [0, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];
        let (header, _) = DecoderBuffer::new(&bytes).decode::<FrameHeader>().unwrap();
        assert_eq!(header.stream_id, 0x7fff_ffff);
    }

    #[test]
    fn write_frame_prefixes_the_header() {
        let mut out = BytesMut::new();
        write_frame(&mut out, FrameType::Ping, flags::ACK, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(out.len(), HEADER_LEN + 8);
        assert_eq!(&out[..5], &[0, 0, 8, 0x6, 0x1]);
    }
}
