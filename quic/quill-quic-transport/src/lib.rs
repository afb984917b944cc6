// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stateful QUIC connection machinery: connection ID lifecycle, path MTU
//! discovery and validation, stream state machines with retransmission,
//! connection-level flow control and per-kind event dispatch.

pub mod ack;
pub mod connection;
pub mod context;
pub mod event;
pub mod packet;
pub mod path;
pub mod stream;
