// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection ID lifecycle frames.

use crate::{
    connection::{Id, StatelessResetToken},
    frame::{simple_frame_codec, tag},
    varint::VarInt,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
//# An endpoint sends a NEW_CONNECTION_ID frame (type=0x18) to provide
//# its peer with alternative connection IDs that can be used to break
//# linkability when migrating connections.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewConnectionId {
    /// Monotonically increasing sequence assigned by the issuer
    pub sequence_number: VarInt,
    /// Connection IDs with a sequence below this value are retired
    pub retire_prior_to: VarInt,
    pub connection_id: Id,
    pub stateless_reset_token: StatelessResetToken,
}

simple_frame_codec!(
    NewConnectionId {
        sequence_number,
        retire_prior_to,
        connection_id,
        stateless_reset_token
    },
    tag::NEW_CONNECTION_ID
);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.16
//# An endpoint sends a RETIRE_CONNECTION_ID frame (type=0x19) to
//# indicate that it will no longer use a connection ID that was issued
//# by its peer.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetireConnectionId {
    pub sequence_number: VarInt,
}

simple_frame_codec!(RetireConnectionId { sequence_number }, tag::RETIRE_CONNECTION_ID);
