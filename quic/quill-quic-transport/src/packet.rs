// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Frame-level packet assembly.

use quill_codec::{Encoder, EncoderBuffer, EncoderValue};
use quill_quic_core::frame::{Frame, PacketStatus};

/// Identity of the packet currently being built or parsed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketSummary {
    pub packet_number: u64,
}

/// Appends frames to a packet under construction, accumulating the
/// packet's ack-eliciting / byte-counted status
#[derive(Debug)]
pub struct FrameWriter<'a, 'b> {
    encoder: &'a mut EncoderBuffer<'b>,
    pub status: PacketStatus,
}

impl<'a, 'b> FrameWriter<'a, 'b> {
    #[inline]
    pub fn new(encoder: &'a mut EncoderBuffer<'b>) -> Self {
        Self {
            encoder,
            status: PacketStatus::default(),
        }
    }

    /// Bytes still available in the packet
    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.encoder.remaining_capacity()
    }

    /// Writes a frame if it fits, returning `false` otherwise
    #[inline]
    pub fn write<'f>(&mut self, frame: impl Into<Frame<'f>>) -> bool {
        let frame = frame.into();
        if frame.encoding_size() > self.remaining_capacity() {
            return false;
        }
        self.encoder.encode(&frame);
        self.status.apply(frame.tag());
        true
    }
}
