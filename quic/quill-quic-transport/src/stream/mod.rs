// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stream-layer state: per-stream send/recv machines with retransmission,
//! connection-level flow control and the open-stream registry.
//!
//! Lock order is stream lock first, then the connection flow lock; the
//! reverse order never occurs.

pub mod flow;
pub mod recv;
pub mod registry;
pub mod send;

#[cfg(test)]
mod tests;

pub use flow::FlowController;
pub use recv::{Fragment, RecvStream};
pub use registry::{BidiStream, Registry};
pub use send::SendStream;
