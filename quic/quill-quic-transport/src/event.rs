// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-kind frame event dispatch.
//!
//! Connection components register under one of four kinds. On transmit
//! every kind runs once per packet build and may append frames; on
//! receive the owning kind runs for each decoded frame. Handlers are held
//! weakly; a dropped handler is skipped.

use crate::packet::{FrameWriter, PacketSummary};
use quill_quic_core::{ack::Waiters, frame::Frame, transport};
use std::sync::Weak;

/// The four event groups a connection dispatches over
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Ack,
    Crypto,
    ConnId,
    Streams,
}

impl Kind {
    pub const COUNT: usize = 4;

    #[inline]
    const fn index(self) -> usize {
        match self {
            Kind::Ack => 0,
            Kind::Crypto => 1,
            Kind::ConnId => 2,
            Kind::Streams => 3,
        }
    }
}

/// Outcome of one handler invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Nothing fatal; the scheduler may try this kind again later
    Reorder,
    /// The connection cannot continue
    Fatal,
}

/// A component which appends frames while a packet is built
pub trait OnTransmit: Send + Sync {
    fn on_transmit(
        &self,
        packet: &PacketSummary,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> Result<Status, transport::Error>;
}

/// A component which consumes decoded frames
pub trait OnFrame: Send + Sync {
    fn on_frame(&self, packet: &PacketSummary, frame: &Frame)
        -> Result<Status, transport::Error>;
}

/// The registered handlers of a connection, grouped by kind
#[derive(Default)]
pub struct Events {
    transmit: [Vec<Weak<dyn OnTransmit>>; Kind::COUNT],
    receive: [Vec<Weak<dyn OnFrame>>; Kind::COUNT],
}

impl Events {
    pub fn register_transmit(&mut self, kind: Kind, handler: Weak<dyn OnTransmit>) {
        self.transmit[kind.index()].push(handler);
    }

    pub fn register_receive(&mut self, kind: Kind, handler: Weak<dyn OnFrame>) {
        self.receive[kind.index()].push(handler);
    }

    /// Runs every live transmit handler once for this packet, kind by kind
    pub fn on_transmit(
        &self,
        packet: &PacketSummary,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> Result<(), transport::Error> {
        for slot in self.transmit.iter().flatten() {
            let Some(handler) = slot.upgrade() else {
                continue;
            };
            match handler.on_transmit(packet, writer, waiters)? {
                Status::Reorder => {}
                Status::Fatal => {
                    return Err(transport::Error::new(
                        transport::Error::INTERNAL_ERROR,
                        "event handler reported an unrecoverable failure",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Routes a decoded frame through every live receive handler
    pub fn on_frame(
        &self,
        packet: &PacketSummary,
        frame: &Frame,
    ) -> Result<(), transport::Error> {
        for slot in self.receive.iter().flatten() {
            let Some(handler) = slot.upgrade() else {
                continue;
            };
            match handler.on_frame(packet, frame)? {
                Status::Reorder => {}
                Status::Fatal => {
                    return Err(transport::Error::new(
                        transport::Error::INTERNAL_ERROR,
                        "event handler reported an unrecoverable failure",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use quill_codec::EncoderBuffer;
    use quill_quic_core::frame::Ping;
    use std::sync::Arc;

    #[derive(Default)]
    struct PingEmitter {
        calls: Mutex<usize>,
    }

    impl OnTransmit for PingEmitter {
        fn on_transmit(
            &self,
            _packet: &PacketSummary,
            writer: &mut FrameWriter,
            _waiters: &mut Waiters,
        ) -> Result<Status, transport::Error> {
            *self.calls.lock() += 1;
            writer.write(Ping);
            Ok(Status::Reorder)
        }
    }

    #[test]
    fn each_kind_runs_once_and_dead_handlers_are_skipped() {
        let live = Arc::new(PingEmitter::default());
        let dead = Arc::new(PingEmitter::default());

        let mut events = Events::default();
        events.register_transmit(Kind::Ack, Arc::downgrade(&live) as Weak<dyn OnTransmit>);
        events.register_transmit(Kind::Streams, Arc::downgrade(&dead) as Weak<dyn OnTransmit>);
        drop(dead);

        let mut storage = [0u8; 16];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let mut waiters = Waiters::new();
        {
            let mut writer = FrameWriter::new(&mut encoder);
            events
                .on_transmit(&PacketSummary::default(), &mut writer, &mut waiters)
                .unwrap();
        }
        assert_eq!(*live.calls.lock(), 1);
        assert_eq!(encoder.as_slice(), &[0x01]);
    }
}
