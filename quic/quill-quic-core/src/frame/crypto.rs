// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CRYPTO and NEW_TOKEN frames.

use crate::{
    frame::{tag, Tag},
    varint::VarInt,
};
use quill_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crypto<'a> {
    pub offset: VarInt,
    pub data: &'a [u8],
}

impl<'a> Crypto<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        tag::CRYPTO
    }

    pub(crate) fn decode(_tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (offset, buffer) = buffer.decode()?;
        let (data, buffer) = buffer.decode_with_len_prefix::<VarInt, &[u8]>()?;
        Ok((Self { offset, data }, buffer))
    }
}

impl EncoderValue for Crypto<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.offset);
        encoder.encode_with_len_prefix::<VarInt, _>(&self.data);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
//# A server sends a NEW_TOKEN frame (type=0x07) to provide the client
//# with a token to send in the header of an Initial packet for a future
//# connection.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewToken<'a> {
    pub token: &'a [u8],
}

impl<'a> NewToken<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        tag::NEW_TOKEN
    }

    pub(crate) fn decode(_tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (token, buffer) = buffer.decode_with_len_prefix::<VarInt, &[u8]>()?;
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
        //# A client MUST treat receipt of a NEW_TOKEN frame with an empty
        //# Token field as a connection error of type FRAME_ENCODING_ERROR.
        if token.is_empty() {
            return Err(DecoderError::InvariantViolation("empty NEW_TOKEN token"));
        }
        Ok((Self { token }, buffer))
    }
}

impl EncoderValue for NewToken<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode_with_len_prefix::<VarInt, _>(&self.token);
    }
}
