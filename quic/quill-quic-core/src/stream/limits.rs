// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    stream::{Initiator, StreamId, StreamType},
    varint::VarInt,
};

/// Flow-control limits exchanged in transport parameters
#[derive(Clone, Copy, Debug)]
pub struct InitialLimits {
    pub connection_data_limit: VarInt,
    pub uni_stream_data_limit: VarInt,
    /// Limit for bidi streams opened by the local endpoint
    pub bidi_stream_data_local_limit: VarInt,
    /// Limit for bidi streams opened by the peer
    pub bidi_stream_data_remote_limit: VarInt,
    pub uni_stream_limit: VarInt,
    pub bidi_stream_limit: VarInt,
}

impl Default for InitialLimits {
    fn default() -> Self {
        Self {
            connection_data_limit: VarInt::ZERO,
            uni_stream_data_limit: VarInt::ZERO,
            bidi_stream_data_local_limit: VarInt::ZERO,
            bidi_stream_data_remote_limit: VarInt::ZERO,
            uni_stream_limit: VarInt::ZERO,
            bidi_stream_limit: VarInt::ZERO,
        }
    }
}

impl InitialLimits {
    /// The send-side data limit a stream starts with, as advertised by the
    /// peer's transport parameters
    pub fn initial_send_limit(&self, id: StreamId, local: Initiator) -> VarInt {
        match id.stream_type() {
            StreamType::Unidirectional => self.uni_stream_data_limit,
            StreamType::Bidirectional => {
                if id.initiator() == local {
                    self.bidi_stream_data_remote_limit
                } else {
                    self.bidi_stream_data_local_limit
                }
            }
        }
    }

    /// The receive-side data limit a stream starts with, as advertised by
    /// the local transport parameters
    pub fn initial_recv_limit(&self, id: StreamId, local: Initiator) -> VarInt {
        match id.stream_type() {
            StreamType::Unidirectional => self.uni_stream_data_limit,
            StreamType::Bidirectional => {
                if id.initiator() == local {
                    self.bidi_stream_data_local_limit
                } else {
                    self.bidi_stream_data_remote_limit
                }
            }
        }
    }
}
