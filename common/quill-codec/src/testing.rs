// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub use crate::{
    DecoderBuffer, DecoderError, DecoderValue, Encoder, EncoderBuffer, EncoderLenEstimator,
    EncoderValue,
};

pub type Error = DecoderError;

/// Encodes a value into a freshly-allocated buffer
pub fn encode<T: EncoderValue>(value: &T) -> Vec<u8> {
    let len = value.encoding_size();
    let mut bytes = vec![0u8; len];
    let mut encoder = EncoderBuffer::new(&mut bytes);
    encoder.encode(value);
    assert_eq!(
        encoder.len(),
        len,
        "encoding_size disagreed with the encoded length"
    );
    bytes
}

/// Asserts that a value encodes and decodes back to itself, returning the
/// encoded bytes for further inspection
#[macro_export]
macro_rules! assert_codec_round_trip_value {
    ($ty:ty, $value:expr) => {{
        let expected = $value;
        let bytes = $crate::testing::encode(&expected);
        let buffer = $crate::DecoderBuffer::new(&bytes);
        let (actual, remaining) = buffer.decode::<$ty>().expect("decoding failed");
        remaining.ensure_empty().expect("trailing bytes after decode");
        assert_eq!(expected, actual);
        bytes
    }};
}

/// Asserts that every value decoded from a byte sequence re-encodes and
/// re-decodes to itself, returning the number of values seen
#[macro_export]
macro_rules! assert_codec_round_trip_bytes {
    ($ty:ty, $bytes:expr) => {{
        let mut buffer = $crate::DecoderBuffer::new($bytes);
        let mut count = 0usize;

        while let Ok((value, remaining)) = buffer.decode::<$ty>() {
            $crate::assert_codec_round_trip_value!($ty, value);
            count += 1;
            buffer = remaining;

            // handle zero-sized encoded types, otherwise we loop forever
            if buffer.is_empty() {
                break;
            }
        }

        count
    }};
}
