// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! ACK frames.

use crate::{
    frame::{tag, Tag},
    transport,
    transport_error,
    varint::VarInt,
};
use core::ops::RangeInclusive;
use quill_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.

/// A `{gap, length}` pair describing one additional ACK range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckRange {
    pub gap: VarInt,
    pub len: VarInt,
}

/// ECN counts carried by the 0x03 variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect0: VarInt,
    pub ect1: VarInt,
    pub ce: VarInt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub largest: VarInt,
    pub delay: VarInt,
    /// Number of packets acknowledged contiguously below `largest`
    pub first_range: VarInt,
    pub ranges: Vec<AckRange>,
    pub ecn: Option<EcnCounts>,
}

impl Ack {
    #[inline]
    pub const fn tag(&self) -> Tag {
        if self.ecn.is_some() {
            tag::ACK_ECN
        } else {
            tag::ACK
        }
    }

    pub(crate) fn decode<'a>(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (largest, buffer) = buffer.decode()?;
        let (delay, buffer) = buffer.decode()?;
        let (range_count, buffer) = buffer.decode::<VarInt>()?;
        let (first_range, mut buffer) = buffer.decode()?;

        let mut ranges = Vec::with_capacity((*range_count).min(64) as usize);
        for _ in 0..*range_count {
            let (gap, remaining) = buffer.decode()?;
            let (len, remaining) = remaining.decode()?;
            ranges.push(AckRange { gap, len });
            buffer = remaining;
        }

        let (ecn, buffer) = if tag == tag::ACK_ECN {
            let (ect0, buffer) = buffer.decode()?;
            let (ect1, buffer) = buffer.decode()?;
            let (ce, buffer) = buffer.decode()?;
            (Some(EcnCounts { ect0, ect1, ce }), buffer)
        } else {
            (None, buffer)
        };

        Ok((
            Self {
                largest,
                delay,
                first_range,
                ranges,
                ecn,
            },
            buffer,
        ))
    }

    /// Expands the wire representation into descending packet-number ranges
    ///
    /// Fails with `FRAME_ENCODING_ERROR` if any range underflows below
    /// packet number zero.
    pub fn acked_ranges(&self) -> Result<Vec<RangeInclusive<u64>>, transport::Error> {
        let overflow =
            || transport_error!(FRAME_ENCODING_ERROR, "ACK range underflows packet number 0");

        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        let largest = self.largest.as_u64();
        let mut smallest = largest
            .checked_sub(self.first_range.as_u64())
            .ok_or_else(overflow)?;
        result.push(smallest..=largest);

        for range in &self.ranges {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
            //# The value of the Gap field establishes the largest packet
            //# number value for the subsequent ACK Range using the following
            //# formula:
            //#    largest = previous_smallest - gap - 2
            let largest = smallest
                .checked_sub(range.gap.as_u64())
                .and_then(|v| v.checked_sub(2))
                .ok_or_else(overflow)?;
            smallest = largest.checked_sub(range.len.as_u64()).ok_or_else(overflow)?;
            result.push(smallest..=largest);
        }

        Ok(result)
    }
}

impl EncoderValue for Ack {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.largest);
        encoder.encode(&self.delay);
        encoder.encode(&VarInt::try_from(self.ranges.len()).unwrap_or(VarInt::MAX));
        encoder.encode(&self.first_range);
        for range in &self.ranges {
            encoder.encode(&range.gap);
            encoder.encode(&range.len);
        }
        if let Some(ecn) = &self.ecn {
            encoder.encode(&ecn.ect0);
            encoder.encode(&ecn.ect1);
            encoder.encode(&ecn.ce);
        }
    }
}
