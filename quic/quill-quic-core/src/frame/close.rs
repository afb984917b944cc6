// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CONNECTION_CLOSE frames.

use crate::{
    frame::{tag, Tag},
    transport,
    varint::VarInt,
};
use quill_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.  The
//# CONNECTION_CLOSE frame with a type of 0x1c is used to signal errors
//# at only the QUIC layer, or the absence of errors (with the NO_ERROR
//# code).  The CONNECTION_CLOSE frame with a type of 0x1d is used to
//# signal an error with the application that uses QUIC.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionClose<'a> {
    pub error_code: VarInt,
    /// The frame type which triggered the error; `None` for the
    /// application-level variant (type 0x1d)
    pub frame_type: Option<VarInt>,
    pub reason: &'a [u8],
}

impl<'a> ConnectionClose<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            tag::CONNECTION_CLOSE
        } else {
            tag::CONNECTION_CLOSE_APP
        }
    }

    pub(crate) fn decode(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (error_code, buffer) = buffer.decode()?;
        let (frame_type, buffer) = if tag == tag::CONNECTION_CLOSE {
            let (frame_type, buffer) = buffer.decode()?;
            (Some(frame_type), buffer)
        } else {
            (None, buffer)
        };
        let (reason, buffer) = buffer.decode_with_len_prefix::<VarInt, &[u8]>()?;
        Ok((
            Self {
                error_code,
                frame_type,
                reason,
            },
            buffer,
        ))
    }
}

impl EncoderValue for ConnectionClose<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.error_code);
        if let Some(frame_type) = self.frame_type {
            encoder.encode(&frame_type);
        }
        encoder.encode_with_len_prefix::<VarInt, _>(&self.reason);
    }
}

impl From<transport::Error> for ConnectionClose<'static> {
    fn from(error: transport::Error) -> Self {
        Self {
            error_code: error.code,
            frame_type: Some(error.frame_type.unwrap_or(VarInt::ZERO)),
            reason: error.reason.as_bytes(),
        }
    }
}
