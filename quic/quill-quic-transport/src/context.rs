// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-connection glue: wires the connection ID manager, path state,
//! stream registry and ack tracker into the four-kind event dispatch.

use crate::{
    ack::Tracker,
    connection::Manager,
    event::{Events, Kind, OnFrame, OnTransmit, Status},
    packet::{FrameWriter, PacketSummary},
    path::{MtuProber, Verifier},
    stream::{FlowController, Registry},
};
use core::ops::RangeInclusive;
use parking_lot::Mutex;
use quill_codec::{DecoderBuffer, EncoderBuffer};
use quill_quic_core::{
    ack::Waiters,
    frame::{Frame, PacketStatus},
    io::IoResult,
    path::Config,
    stream::{InitialLimits, Initiator},
    transport,
};
use std::sync::{Arc, Weak};

fn status_of(result: IoResult) -> Result<Status, transport::Error> {
    if result.is_fatal() {
        return Ok(Status::Fatal);
    }
    Ok(Status::Reorder)
}

struct IdEvents {
    manager: Mutex<Manager>,
}

impl OnTransmit for IdEvents {
    fn on_transmit(
        &self,
        _packet: &PacketSummary,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> Result<Status, transport::Error> {
        status_of(self.manager.lock().on_transmit(writer, waiters))
    }
}

impl OnFrame for IdEvents {
    fn on_frame(
        &self,
        _packet: &PacketSummary,
        frame: &Frame,
    ) -> Result<Status, transport::Error> {
        match frame {
            Frame::NewConnectionId(frame) => {
                self.manager.lock().on_new_connection_id(frame)?;
            }
            Frame::RetireConnectionId(frame) => {
                self.manager.lock().on_retire_connection_id(frame);
            }
            _ => {}
        }
        Ok(Status::Reorder)
    }
}

struct PathEvents {
    verifier: Mutex<Verifier>,
}

impl OnTransmit for PathEvents {
    fn on_transmit(
        &self,
        _packet: &PacketSummary,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> Result<Status, transport::Error> {
        let mut verifier = self.verifier.lock();
        let result = verifier.send_challenge(writer, waiters);
        if result.is_fatal() {
            return Ok(Status::Fatal);
        }
        status_of(verifier.send_response(writer))
    }
}

impl OnFrame for PathEvents {
    fn on_frame(
        &self,
        _packet: &PacketSummary,
        frame: &Frame,
    ) -> Result<Status, transport::Error> {
        match frame {
            Frame::PathChallenge(frame) => self.verifier.lock().on_path_challenge(frame),
            Frame::PathResponse(frame) => self.verifier.lock().on_path_response(frame)?,
            _ => {}
        }
        Ok(Status::Reorder)
    }
}

struct StreamEvents {
    registry: Arc<Registry>,
}

impl OnTransmit for StreamEvents {
    fn on_transmit(
        &self,
        _packet: &PacketSummary,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> Result<Status, transport::Error> {
        status_of(self.registry.on_transmit(writer, waiters))
    }
}

impl OnFrame for StreamEvents {
    fn on_frame(
        &self,
        _packet: &PacketSummary,
        frame: &Frame,
    ) -> Result<Status, transport::Error> {
        match frame {
            Frame::Stream(_)
            | Frame::ResetStream(_)
            | Frame::StopSending(_)
            | Frame::MaxStreamData(_)
            | Frame::MaxData(_)
            | Frame::MaxStreams(_)
            | Frame::DataBlocked(_)
            | Frame::StreamDataBlocked(_)
            | Frame::StreamsBlocked(_) => {
                self.registry.on_frame(frame)?;
            }
            _ => {}
        }
        Ok(Status::Reorder)
    }
}

struct AckEvents {
    tracker: Mutex<Tracker>,
}

impl OnFrame for AckEvents {
    fn on_frame(
        &self,
        _packet: &PacketSummary,
        frame: &Frame,
    ) -> Result<Status, transport::Error> {
        if let Frame::Ack(frame) = frame {
            self.tracker.lock().on_ack_frame(frame)?;
        }
        Ok(Status::Reorder)
    }
}

/// A single QUIC connection's component set
pub struct Connection {
    ids: Arc<IdEvents>,
    path: Arc<PathEvents>,
    streams: Arc<StreamEvents>,
    acks: Arc<AckEvents>,
    prober: Mutex<MtuProber>,
    events: Events,
}

impl Connection {
    pub fn new(
        local: Initiator,
        send_limits: InitialLimits,
        recv_limits: InitialLimits,
        mtu_config: Config,
    ) -> Self {
        let flow = Arc::new(FlowController::new(
            send_limits.connection_data_limit,
            recv_limits.connection_data_limit,
        ));
        let registry = Arc::new(Registry::new(local, flow, send_limits, recv_limits));

        let ids = Arc::new(IdEvents {
            manager: Mutex::new(Manager::default()),
        });
        let path = Arc::new(PathEvents {
            verifier: Mutex::new(Verifier::default()),
        });
        let streams = Arc::new(StreamEvents { registry });
        let acks = Arc::new(AckEvents {
            tracker: Mutex::new(Tracker::default()),
        });

        let mut events = Events::default();
        events.register_transmit(Kind::ConnId, Arc::downgrade(&ids) as Weak<dyn OnTransmit>);
        events.register_receive(Kind::ConnId, Arc::downgrade(&ids) as Weak<dyn OnFrame>);
        // path maintenance frames ride with the connection-level kind
        events.register_transmit(Kind::ConnId, Arc::downgrade(&path) as Weak<dyn OnTransmit>);
        events.register_receive(Kind::ConnId, Arc::downgrade(&path) as Weak<dyn OnFrame>);
        events.register_transmit(
            Kind::Streams,
            Arc::downgrade(&streams) as Weak<dyn OnTransmit>,
        );
        events.register_receive(Kind::Streams, Arc::downgrade(&streams) as Weak<dyn OnFrame>);
        events.register_receive(Kind::Ack, Arc::downgrade(&acks) as Weak<dyn OnFrame>);

        Self {
            ids,
            path,
            streams,
            acks,
            prober: Mutex::new(MtuProber::new(mtu_config)),
            events,
        }
    }

    /// The open-stream registry
    #[inline]
    pub fn streams(&self) -> &Arc<Registry> {
        &self.streams.registry
    }

    /// Runs `f` against the connection ID manager
    pub fn with_ids<R>(&self, f: impl FnOnce(&mut Manager) -> R) -> R {
        f(&mut self.ids.manager.lock())
    }

    /// Runs `f` against the path verifier
    pub fn with_verifier<R>(&self, f: impl FnOnce(&mut Verifier) -> R) -> R {
        f(&mut self.path.verifier.lock())
    }

    /// Runs `f` against the MTU prober
    pub fn with_prober<R>(&self, f: impl FnOnce(&mut MtuProber) -> R) -> R {
        f(&mut self.prober.lock())
    }

    /// Builds the frame payload of one outgoing packet
    ///
    /// Every event kind runs once; the waiters registered along the way
    /// are filed against `packet_number` for ack/loss tracking.
    pub fn on_transmit(
        &self,
        packet_number: u64,
        encoder: &mut EncoderBuffer<'_>,
    ) -> Result<PacketStatus, transport::Error> {
        let packet = PacketSummary { packet_number };
        let mut waiters = Waiters::new();
        let status = {
            let mut writer = FrameWriter::new(encoder);
            self.events.on_transmit(&packet, &mut writer, &mut waiters)?;
            writer.status
        };
        self.acks.tracker.lock().on_packet_sent(packet_number, waiters);
        Ok(status)
    }

    /// Decodes and dispatches the frame payload of one received packet
    pub fn on_packet_received(
        &self,
        packet_number: u64,
        payload: &[u8],
    ) -> Result<PacketStatus, transport::Error> {
        let packet = PacketSummary { packet_number };
        let mut status = PacketStatus::default();
        let mut buffer = DecoderBuffer::new(payload);
        while !buffer.is_empty() {
            let (frame, remaining) = buffer.decode::<Frame>()?;
            status.apply(frame.tag());
            self.events.on_frame(&packet, &frame)?;
            buffer = remaining;
        }
        Ok(status)
    }

    /// Marks sent packets acknowledged outside of ACK frame receipt
    pub fn on_ack_ranges(&self, ranges: &[RangeInclusive<u64>]) {
        self.acks.tracker.lock().on_ack_ranges(ranges);
    }

    /// Declares a sent packet lost
    pub fn on_packet_loss(&self, packet_number: u64) {
        self.acks.tracker.lock().on_packet_loss(packet_number);
    }

    /// Returns the size of the next MTU probe to transmit, if one is due
    ///
    /// The caller builds a padded packet of exactly this size and files
    /// the returned waiters against its packet number.
    pub fn poll_mtu_probe(&self, packet_number: u64) -> Option<u16> {
        let mut waiters = Waiters::new();
        let size = self.prober.lock().poll_probe(&mut waiters)?;
        self.acks.tracker.lock().on_packet_sent(packet_number, waiters);
        Some(size)
    }

    /// Datagram budget currently usable on the path
    pub fn current_datagram_size(&self) -> u16 {
        self.prober.lock().current_datagram_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_quic_core::{
        stream::state::{Receiver, Sender},
        varint::VarInt,
    };

    fn vi(value: u64) -> VarInt {
        VarInt::new(value).unwrap()
    }

    fn limits(value: u64) -> InitialLimits {
        InitialLimits {
            connection_data_limit: vi(value),
            uni_stream_data_limit: vi(value),
            bidi_stream_data_local_limit: vi(value),
            bidi_stream_data_remote_limit: vi(value),
            uni_stream_limit: vi(4),
            bidi_stream_limit: vi(4),
        }
    }

    fn pair() -> (Connection, Connection) {
        let client = Connection::new(
            Initiator::Client,
            limits(10_000),
            limits(10_000),
            Config::default(),
        );
        let server = Connection::new(
            Initiator::Server,
            limits(10_000),
            limits(10_000),
            Config::default(),
        );
        (client, server)
    }

    #[test]
    fn client_stream_reaches_the_server_registry() {
        let (client, server) = pair();

        let stream = client.streams().open_bidi().unwrap();
        stream.sender.write(b"hello quic", true);

        let mut storage = [0u8; 1200];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let status = client.on_transmit(0, &mut encoder).unwrap();
        assert!(status.is_ack_eliciting);
        assert!(status.is_byte_counted);

        let payload = encoder.as_slice().to_vec();
        let status = server.on_packet_received(0, &payload).unwrap();
        assert!(status.is_ack_eliciting);

        let accepted = server.streams().accept_bidi().unwrap();
        assert_eq!(accepted.receiver.receiver_state(), Receiver::SizeKnown);

        // acknowledging the packet completes the client's send side
        client.on_ack_ranges(&[0..=0]);
        stream.sender.poll_progress();
        assert_eq!(stream.sender.sender_state(), Sender::DataRecvd);
    }

    #[test]
    fn path_challenge_is_answered_fifo() {
        let (client, server) = pair();

        client.with_verifier(|verifier| {
            assert!(verifier.request_verification([7; 8]));
        });

        let mut storage = [0u8; 1200];
        let mut encoder = EncoderBuffer::new(&mut storage);
        client.on_transmit(1, &mut encoder).unwrap();
        let payload = encoder.as_slice().to_vec();
        server.on_packet_received(1, &payload).unwrap();

        let mut storage = [0u8; 1200];
        let mut encoder = EncoderBuffer::new(&mut storage);
        server.on_transmit(1, &mut encoder).unwrap();
        let payload = encoder.as_slice().to_vec();
        client.on_packet_received(2, &payload).unwrap();

        client.with_verifier(|verifier| assert!(!verifier.is_verifying()));
    }
}
