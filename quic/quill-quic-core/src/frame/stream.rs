// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! STREAM and the stream-management frames.

use crate::{
    frame::{simple_frame_codec, tag, Tag},
    varint::VarInt,
};
use quill_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The OFF bit (0x04) in the frame type is set to indicate that there
//#    is an Offset field present.
const OFF_BIT: u8 = 0x04;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The LEN bit (0x02) in the frame type is set to indicate that there
//#    is a Length field present.
const LEN_BIT: u8 = 0x02;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# *  The FIN bit (0x01) indicates that the frame marks the end of the
//#    stream.
const FIN_BIT: u8 = 0x01;

/// STREAM frame carrying a contiguous run of stream bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stream<'a> {
    pub stream_id: VarInt,
    pub offset: VarInt,
    /// Emit a Length field; without it the data extends to the packet end
    pub with_length: bool,
    pub is_fin: bool,
    pub data: &'a [u8],
}

impl<'a> Stream<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        let mut tag = tag::STREAM_BASE;
        if *self.offset != 0 {
            tag |= OFF_BIT;
        }
        if self.with_length {
            tag |= LEN_BIT;
        }
        if self.is_fin {
            tag |= FIN_BIT;
        }
        tag
    }

    pub(crate) fn decode(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let has_offset = tag & OFF_BIT == OFF_BIT;
        let with_length = tag & LEN_BIT == LEN_BIT;
        let is_fin = tag & FIN_BIT == FIN_BIT;

        let (stream_id, buffer) = buffer.decode()?;
        let (offset, buffer) = if has_offset {
            buffer.decode()?
        } else {
            (VarInt::ZERO, buffer)
        };
        let (data, buffer) = if with_length {
            buffer.decode_with_len_prefix::<VarInt, &[u8]>()?
        } else {
            buffer.decode::<&[u8]>()?
        };

        let frame = Self {
            stream_id,
            offset,
            with_length,
            is_fin,
            data,
        };
        Ok((frame, buffer))
    }

    /// Wire bytes consumed by everything except the data and length fields
    #[inline]
    pub fn overhead(stream_id: VarInt, offset: VarInt, has_offset: bool) -> usize {
        let mut len = 1 + stream_id.encoding_len();
        if has_offset {
            len += offset.encoding_len();
        }
        len
    }

    /// Builds a frame carrying as much of `data` as fits into `capacity`
    ///
    /// Returns `None` when the frame overhead alone exceeds the budget; the
    /// caller should wait for more writer capacity. With `with_length` set
    /// the worst-case length prefix is reserved before sizing the payload.
    pub fn make_fit(
        capacity: usize,
        stream_id: VarInt,
        offset: VarInt,
        data: &'a [u8],
        is_fin: bool,
        with_length: bool,
    ) -> Option<Self> {
        let fixed = Self::overhead(stream_id, offset, *offset != 0);
        let remaining = capacity.checked_sub(fixed)?;

        let payload_len = if with_length {
            let max_len = remaining.min(data.len());
            let prefix = VarInt::try_from(max_len).ok()?.encoding_len();
            remaining.checked_sub(prefix)?.min(data.len())
        } else {
            remaining.min(data.len())
        };

        if payload_len == 0 && !is_fin {
            return None;
        }

        Some(Self {
            stream_id,
            offset,
            with_length,
            // the FIN only travels with the final byte of the stream
            is_fin: is_fin && payload_len == data.len(),
            data: &data[..payload_len],
        })
    }
}

impl EncoderValue for Stream<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.stream_id);
        if *self.offset != 0 {
            encoder.encode(&self.offset);
        }
        if self.with_length {
            encoder.encode_with_len_prefix::<VarInt, _>(&self.data);
        } else {
            encoder.encode(&self.data);
        }
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        let mut len = Self::overhead(self.stream_id, self.offset, *self.offset != 0);
        if self.with_length {
            len += VarInt::try_from(self.data.len())
                .unwrap_or(VarInt::MAX)
                .encoding_len();
        }
        len + self.data.len()
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
//# An endpoint uses a RESET_STREAM frame (type=0x04) to abruptly
//# terminate the sending part of a stream.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetStream {
    pub stream_id: VarInt,
    pub application_error_code: VarInt,
    /// Final size of the stream as committed by the sender
    pub final_size: VarInt,
}

simple_frame_codec!(
    ResetStream {
        stream_id,
        application_error_code,
        final_size
    },
    tag::RESET_STREAM
);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
//# An endpoint uses a STOP_SENDING frame (type=0x05) to communicate that
//# incoming data is being discarded on receipt per application request.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopSending {
    pub stream_id: VarInt,
    pub application_error_code: VarInt,
}

simple_frame_codec!(
    StopSending {
        stream_id,
        application_error_code
    },
    tag::STOP_SENDING
);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.10
//# A MAX_STREAM_DATA frame (type=0x11) is used in flow control to inform
//# a peer of the maximum amount of data that can be sent on a stream.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxStreamData {
    pub stream_id: VarInt,
    pub maximum_stream_data: VarInt,
}

simple_frame_codec!(
    MaxStreamData {
        stream_id,
        maximum_stream_data
    },
    tag::MAX_STREAM_DATA
);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.13
//# A sender SHOULD send a STREAM_DATA_BLOCKED frame (type=0x15) when it
//# wishes to send data but is unable to do so due to stream-level flow
//# control.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDataBlocked {
    pub stream_id: VarInt,
    /// The stream-level limit at which blocking occurred
    pub stream_data_limit: VarInt,
}

simple_frame_codec!(
    StreamDataBlocked {
        stream_id,
        stream_data_limit
    },
    tag::STREAM_DATA_BLOCKED
);
