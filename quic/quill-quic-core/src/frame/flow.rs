// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection-level flow control frames.

use crate::{
    frame::{simple_frame_codec, tag, Tag},
    stream::StreamType,
    varint::VarInt,
};
use quill_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.9
//# A MAX_DATA frame (type=0x10) is used in flow control to inform the
//# peer of the maximum amount of data that can be sent on the connection
//# as a whole.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxData {
    pub maximum_data: VarInt,
}

simple_frame_codec!(MaxData { maximum_data }, tag::MAX_DATA);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.12
//# A sender SHOULD send a DATA_BLOCKED frame (type=0x14) when it wishes
//# to send data but is unable to do so due to connection-level flow
//# control.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataBlocked {
    /// The connection-level limit at which blocking occurred
    pub data_limit: VarInt,
}

simple_frame_codec!(DataBlocked { data_limit }, tag::DATA_BLOCKED);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.11
//# A MAX_STREAMS frame (type=0x12 or 0x13) informs the peer of the
//# cumulative number of streams of a given type it is permitted to open.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxStreams {
    pub stream_type: StreamType,
    pub maximum_streams: VarInt,
}

impl MaxStreams {
    #[inline]
    pub const fn tag(&self) -> Tag {
        match self.stream_type {
            StreamType::Bidirectional => tag::MAX_STREAMS_BIDI,
            StreamType::Unidirectional => tag::MAX_STREAMS_UNI,
        }
    }

    pub(crate) fn decode<'a>(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let stream_type = if tag == tag::MAX_STREAMS_BIDI {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        };
        let (maximum_streams, buffer) = buffer.decode()?;
        Ok((
            Self {
                stream_type,
                maximum_streams,
            },
            buffer,
        ))
    }
}

impl EncoderValue for MaxStreams {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.maximum_streams);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.14
//# A sender SHOULD send a STREAMS_BLOCKED frame (type=0x16 or 0x17) when
//# it wishes to open a stream but is unable to do so due to the maximum
//# stream limit set by its peer.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamsBlocked {
    pub stream_type: StreamType,
    /// The stream limit at which blocking occurred
    pub stream_limit: VarInt,
}

impl StreamsBlocked {
    #[inline]
    pub const fn tag(&self) -> Tag {
        match self.stream_type {
            StreamType::Bidirectional => tag::STREAMS_BLOCKED_BIDI,
            StreamType::Unidirectional => tag::STREAMS_BLOCKED_UNI,
        }
    }

    pub(crate) fn decode<'a>(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let stream_type = if tag == tag::STREAMS_BLOCKED_BIDI {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        };
        let (stream_limit, buffer) = buffer.decode()?;
        Ok((
            Self {
                stream_type,
                stream_limit,
            },
            buffer,
        ))
    }
}

impl EncoderValue for StreamsBlocked {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.stream_limit);
    }
}
