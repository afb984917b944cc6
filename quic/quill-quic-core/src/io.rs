// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Outcome of a single emission or delivery attempt
///
/// Blocking and capacity outcomes are signals to the caller, not errors;
/// only `Fatal` and `InvalidData` abort the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoResult {
    /// Operation succeeded
    Ok,
    /// The id does not match the struct it was routed to
    IdMismatch,
    /// The stream state does not permit the operation
    NotInIoState,
    /// There is no data to send
    NoData,
    /// Blocked by the stream-level flow control limit
    BlockByStream,
    /// Blocked by the connection-level flow control limit
    BlockByConn,
    /// The writer does not have enough remaining capacity
    NoCapacity,
    /// The operation was canceled
    Cancel,
    /// The input is inconsistent with recorded state
    InvalidData,
    /// Unrecoverable error
    Fatal,
}

impl IoResult {
    #[inline]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// True for outcomes which abort the connection
    #[inline]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal | Self::InvalidData)
    }
}
