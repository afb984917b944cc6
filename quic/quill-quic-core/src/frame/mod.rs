// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! RFC 9000 §19 frame codec.
//!
//! Every frame implements `EncoderValue` plus a parameterized
//! `decode(tag, buffer)`; the `Frame` enum dispatches on the leading tag
//! byte. `decode(encode(f)) == f` holds for every valid frame.

use quill_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

pub mod ack;
pub mod close;
pub mod conn_id;
pub mod crypto;
pub mod flow;
pub mod path;
pub mod stream;

pub use ack::{Ack, AckRange, EcnCounts};
pub use close::ConnectionClose;
pub use conn_id::{NewConnectionId, RetireConnectionId};
pub use crypto::{Crypto, NewToken};
pub use flow::{DataBlocked, MaxData, MaxStreams, StreamsBlocked};
pub use path::{PathChallenge, PathResponse};
pub use stream::{MaxStreamData, ResetStream, StopSending, Stream, StreamDataBlocked};

pub type Tag = u8;

/// Single-byte frame type tags
pub mod tag {
    pub const PADDING: u8 = 0x00;
    pub const PING: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const ACK_ECN: u8 = 0x03;
    pub const RESET_STREAM: u8 = 0x04;
    pub const STOP_SENDING: u8 = 0x05;
    pub const CRYPTO: u8 = 0x06;
    pub const NEW_TOKEN: u8 = 0x07;
    pub const STREAM_BASE: u8 = 0x08;
    pub const STREAM_MAX: u8 = 0x0f;
    pub const MAX_DATA: u8 = 0x10;
    pub const MAX_STREAM_DATA: u8 = 0x11;
    pub const MAX_STREAMS_BIDI: u8 = 0x12;
    pub const MAX_STREAMS_UNI: u8 = 0x13;
    pub const DATA_BLOCKED: u8 = 0x14;
    pub const STREAM_DATA_BLOCKED: u8 = 0x15;
    pub const STREAMS_BLOCKED_BIDI: u8 = 0x16;
    pub const STREAMS_BLOCKED_UNI: u8 = 0x17;
    pub const NEW_CONNECTION_ID: u8 = 0x18;
    pub const RETIRE_CONNECTION_ID: u8 = 0x19;
    pub const PATH_CHALLENGE: u8 = 0x1a;
    pub const PATH_RESPONSE: u8 = 0x1b;
    pub const CONNECTION_CLOSE: u8 = 0x1c;
    pub const CONNECTION_CLOSE_APP: u8 = 0x1d;
    pub const HANDSHAKE_DONE: u8 = 0x1e;
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-2
//# Packets that contain ack-eliciting frames elicit an ACK from the
//# receiver within the maximum acknowledgment delay.

/// True if receipt of a frame with this tag causes the peer to schedule an
/// ACK
#[inline]
pub const fn is_ack_eliciting(tag: Tag) -> bool {
    !matches!(
        tag,
        tag::PADDING | tag::ACK | tag::ACK_ECN | tag::CONNECTION_CLOSE | tag::CONNECTION_CLOSE_APP
    )
}

/// True if the frame payload counts against connection-level flow control
#[inline]
pub const fn is_byte_counted(tag: Tag) -> bool {
    tag >= tag::STREAM_BASE && tag <= tag::STREAM_MAX
}

/// Ack-eliciting / byte-counted flags accumulated over one packet build
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketStatus {
    pub is_ack_eliciting: bool,
    pub is_byte_counted: bool,
}

impl PacketStatus {
    #[inline]
    pub fn apply(&mut self, tag: Tag) {
        self.is_ack_eliciting |= is_ack_eliciting(tag);
        self.is_byte_counted |= is_byte_counted(tag);
    }
}

/// A run of PADDING bytes, treated as a single frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Padding {
    pub length: usize,
}

impl Padding {
    pub const fn tag(&self) -> Tag {
        tag::PADDING
    }
}

impl EncoderValue for Padding {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_repeated(self.length, 0);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.length
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ping;

impl Ping {
    pub const fn tag(&self) -> Tag {
        tag::PING
    }
}

impl EncoderValue for Ping {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        1
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandshakeDone;

impl HandshakeDone {
    pub const fn tag(&self) -> Tag {
        tag::HANDSHAKE_DONE
    }
}

impl EncoderValue for HandshakeDone {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        1
    }
}

macro_rules! frames {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Any RFC 9000 frame
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Frame<'a> {
            $(
                $variant($ty),
            )*
        }

        impl<'a> Frame<'a> {
            #[inline]
            pub fn tag(&self) -> Tag {
                match self {
                    $(
                        Frame::$variant(frame) => frame.tag(),
                    )*
                }
            }
        }

        impl<'a> EncoderValue for Frame<'a> {
            #[inline]
            fn encode<E: Encoder>(&self, encoder: &mut E) {
                match self {
                    $(
                        Frame::$variant(frame) => encoder.encode(frame),
                    )*
                }
            }
        }

        $(
            impl<'a> From<$ty> for Frame<'a> {
                #[inline]
                fn from(frame: $ty) -> Self {
                    Frame::$variant(frame)
                }
            }
        )*
    };
}

frames!(
    Padding(Padding),
    Ping(Ping),
    Ack(Ack),
    ResetStream(ResetStream),
    StopSending(StopSending),
    Crypto(Crypto<'a>),
    NewToken(NewToken<'a>),
    Stream(Stream<'a>),
    MaxData(MaxData),
    MaxStreamData(MaxStreamData),
    MaxStreams(MaxStreams),
    DataBlocked(DataBlocked),
    StreamDataBlocked(StreamDataBlocked),
    StreamsBlocked(StreamsBlocked),
    NewConnectionId(NewConnectionId),
    RetireConnectionId(RetireConnectionId),
    PathChallenge(PathChallenge),
    PathResponse(PathResponse),
    ConnectionClose(ConnectionClose<'a>),
    HandshakeDone(HandshakeDone),
);

impl<'a> Frame<'a> {
    #[inline]
    pub fn is_ack_eliciting(&self) -> bool {
        is_ack_eliciting(self.tag())
    }

    #[inline]
    pub fn is_byte_counted(&self) -> bool {
        is_byte_counted(self.tag())
    }
}

impl<'a> DecoderValue<'a> for Frame<'a> {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let first = buffer.peek_byte(0)?;

        // a PADDING run is folded into a single frame
        if first == tag::PADDING {
            let mut length = 0;
            let mut buffer = buffer;
            while !buffer.is_empty() && buffer.peek_byte(0)? == tag::PADDING {
                buffer = buffer.skip(1)?;
                length += 1;
            }
            return Ok((Frame::Padding(Padding { length }), buffer));
        }

        // every defined frame type fits in a single-byte varint; larger
        // tags are extension frames this endpoint does not speak
        if first >= 0b0100_0000 {
            return Err(DecoderError::InvariantViolation("unknown frame type"));
        }

        let buffer = buffer.skip(1)?;
        let (frame, buffer) = match first {
            tag::PING => (Frame::Ping(Ping), buffer),
            tag::ACK | tag::ACK_ECN => {
                let (frame, buffer) = Ack::decode(first, buffer)?;
                (Frame::Ack(frame), buffer)
            }
            tag::RESET_STREAM => {
                let (frame, buffer) = ResetStream::decode(first, buffer)?;
                (Frame::ResetStream(frame), buffer)
            }
            tag::STOP_SENDING => {
                let (frame, buffer) = StopSending::decode(first, buffer)?;
                (Frame::StopSending(frame), buffer)
            }
            tag::CRYPTO => {
                let (frame, buffer) = Crypto::decode(first, buffer)?;
                (Frame::Crypto(frame), buffer)
            }
            tag::NEW_TOKEN => {
                let (frame, buffer) = NewToken::decode(first, buffer)?;
                (Frame::NewToken(frame), buffer)
            }
            tag::STREAM_BASE..=tag::STREAM_MAX => {
                let (frame, buffer) = Stream::decode(first, buffer)?;
                (Frame::Stream(frame), buffer)
            }
            tag::MAX_DATA => {
                let (frame, buffer) = MaxData::decode(first, buffer)?;
                (Frame::MaxData(frame), buffer)
            }
            tag::MAX_STREAM_DATA => {
                let (frame, buffer) = MaxStreamData::decode(first, buffer)?;
                (Frame::MaxStreamData(frame), buffer)
            }
            tag::MAX_STREAMS_BIDI | tag::MAX_STREAMS_UNI => {
                let (frame, buffer) = MaxStreams::decode(first, buffer)?;
                (Frame::MaxStreams(frame), buffer)
            }
            tag::DATA_BLOCKED => {
                let (frame, buffer) = DataBlocked::decode(first, buffer)?;
                (Frame::DataBlocked(frame), buffer)
            }
            tag::STREAM_DATA_BLOCKED => {
                let (frame, buffer) = StreamDataBlocked::decode(first, buffer)?;
                (Frame::StreamDataBlocked(frame), buffer)
            }
            tag::STREAMS_BLOCKED_BIDI | tag::STREAMS_BLOCKED_UNI => {
                let (frame, buffer) = StreamsBlocked::decode(first, buffer)?;
                (Frame::StreamsBlocked(frame), buffer)
            }
            tag::NEW_CONNECTION_ID => {
                let (frame, buffer) = NewConnectionId::decode(first, buffer)?;
                (Frame::NewConnectionId(frame), buffer)
            }
            tag::RETIRE_CONNECTION_ID => {
                let (frame, buffer) = RetireConnectionId::decode(first, buffer)?;
                (Frame::RetireConnectionId(frame), buffer)
            }
            tag::PATH_CHALLENGE => {
                let (frame, buffer) = PathChallenge::decode(first, buffer)?;
                (Frame::PathChallenge(frame), buffer)
            }
            tag::PATH_RESPONSE => {
                let (frame, buffer) = PathResponse::decode(first, buffer)?;
                (Frame::PathResponse(frame), buffer)
            }
            tag::CONNECTION_CLOSE | tag::CONNECTION_CLOSE_APP => {
                let (frame, buffer) = ConnectionClose::decode(first, buffer)?;
                (Frame::ConnectionClose(frame), buffer)
            }
            tag::HANDSHAKE_DONE => (Frame::HandshakeDone(HandshakeDone), buffer),
            _ => return Err(DecoderError::InvariantViolation("unknown frame type")),
        };

        Ok((frame, buffer))
    }
}

/// Implements the codec for frames whose payload is a plain field sequence
macro_rules! simple_frame_codec {
    ($name:ident { $($field:ident),* $(,)? }, $tag:expr) => {
        impl $name {
            pub const fn tag(&self) -> $crate::frame::Tag {
                $tag
            }

            pub(crate) fn decode<'a>(
                _tag: $crate::frame::Tag,
                buffer: quill_codec::DecoderBuffer<'a>,
            ) -> quill_codec::DecoderBufferResult<'a, Self> {
                $(
                    let ($field, buffer) = buffer.decode()?;
                )*
                Ok(($name { $($field),* }, buffer))
            }
        }

        impl quill_codec::EncoderValue for $name {
            #[inline]
            fn encode<E: quill_codec::Encoder>(&self, encoder: &mut E) {
                encoder.encode(&self.tag());
                $(
                    encoder.encode(&self.$field);
                )*
            }
        }
    };
}

pub(crate) use simple_frame_codec;
