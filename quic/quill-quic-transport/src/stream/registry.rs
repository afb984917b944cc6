// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The open-stream registry: local stream creation against peer
//! MAX_STREAMS limits, implicit creation of peer-initiated streams,
//! accept queues and frame routing.

use crate::{
    packet::FrameWriter,
    stream::{FlowController, RecvStream, SendStream},
};
use hashbrown::HashMap;
use parking_lot::Mutex;
use quill_quic_core::{
    ack::Waiters,
    frame::{Frame, MaxStreams, StreamsBlocked},
    io::IoResult,
    stream::{InitialLimits, Initiator, StreamId, StreamType},
    transport,
    transport_error,
    varint::VarInt,
};
use std::{collections::VecDeque, sync::Arc};

/// Both halves of a bidirectional stream
#[derive(Debug)]
pub struct BidiStream {
    pub sender: Arc<SendStream>,
    pub receiver: Arc<RecvStream>,
}

#[derive(Debug, Clone)]
enum Entry {
    Bidi(Arc<BidiStream>),
    Send(Arc<SendStream>),
    Recv(Arc<RecvStream>),
}

#[derive(Debug)]
struct Counts {
    /// Streams this endpoint has opened, per type
    local_bidi: u64,
    local_uni: u64,
    /// Peer-granted open budgets (MAX_STREAMS)
    peer_bidi_limit: u64,
    peer_uni_limit: u64,
    /// Budgets granted to the peer
    local_bidi_limit: u64,
    local_uni_limit: u64,
    /// STREAMS_BLOCKED emissions owed
    blocked_bidi: bool,
    blocked_uni: bool,
}

/// Owns every open stream of a connection
#[derive(Debug)]
pub struct Registry {
    local: Initiator,
    flow: Arc<FlowController>,
    /// Peer-advertised limits applied to the send side
    send_limits: InitialLimits,
    /// Locally-advertised limits applied to the receive side
    recv_limits: InitialLimits,
    streams: Mutex<HashMap<u64, Entry>>,
    accept_bidi: Mutex<VecDeque<Arc<BidiStream>>>,
    accept_uni: Mutex<VecDeque<Arc<RecvStream>>>,
    counts: Mutex<Counts>,
}

impl Registry {
    pub fn new(
        local: Initiator,
        flow: Arc<FlowController>,
        send_limits: InitialLimits,
        recv_limits: InitialLimits,
    ) -> Self {
        Self {
            local,
            flow,
            counts: Mutex::new(Counts {
                local_bidi: 0,
                local_uni: 0,
                peer_bidi_limit: send_limits.bidi_stream_limit.as_u64(),
                peer_uni_limit: send_limits.uni_stream_limit.as_u64(),
                local_bidi_limit: recv_limits.bidi_stream_limit.as_u64(),
                local_uni_limit: recv_limits.uni_stream_limit.as_u64(),
                blocked_bidi: false,
                blocked_uni: false,
            }),
            send_limits,
            recv_limits,
            streams: Mutex::new(HashMap::new()),
            accept_bidi: Mutex::new(VecDeque::new()),
            accept_uni: Mutex::new(VecDeque::new()),
        }
    }

    #[inline]
    pub fn flow(&self) -> &Arc<FlowController> {
        &self.flow
    }

    /// Opens a locally-initiated bidirectional stream
    ///
    /// Fails with `BlockByConn` at the peer's MAX_STREAMS limit, arming a
    /// STREAMS_BLOCKED emission.
    pub fn open_bidi(&self) -> Result<Arc<BidiStream>, IoResult> {
        let mut counts = self.counts.lock();
        if counts.local_bidi >= counts.peer_bidi_limit {
            counts.blocked_bidi = true;
            return Err(IoResult::BlockByConn);
        }
        let id = StreamId::nth(self.local, StreamType::Bidirectional, counts.local_bidi)
            .ok_or(IoResult::Fatal)?;
        counts.local_bidi += 1;
        drop(counts);

        let stream = Arc::new(BidiStream {
            sender: Arc::new(SendStream::new(
                id,
                &self.flow,
                self.send_limits.initial_send_limit(id, self.local),
            )),
            receiver: Arc::new(RecvStream::new(
                id,
                &self.flow,
                self.recv_limits.initial_recv_limit(id, self.local),
            )),
        });
        self.streams
            .lock()
            .insert(id.as_varint().as_u64(), Entry::Bidi(stream.clone()));
        Ok(stream)
    }

    /// Opens a locally-initiated unidirectional stream
    pub fn open_uni(&self) -> Result<Arc<SendStream>, IoResult> {
        let mut counts = self.counts.lock();
        if counts.local_uni >= counts.peer_uni_limit {
            counts.blocked_uni = true;
            return Err(IoResult::BlockByConn);
        }
        let id = StreamId::nth(self.local, StreamType::Unidirectional, counts.local_uni)
            .ok_or(IoResult::Fatal)?;
        counts.local_uni += 1;
        drop(counts);

        let stream = Arc::new(SendStream::new(
            id,
            &self.flow,
            self.send_limits.initial_send_limit(id, self.local),
        ));
        self.streams
            .lock()
            .insert(id.as_varint().as_u64(), Entry::Send(stream.clone()));
        Ok(stream)
    }

    /// Pops the next peer-initiated bidirectional stream
    pub fn accept_bidi(&self) -> Option<Arc<BidiStream>> {
        self.accept_bidi.lock().pop_front()
    }

    /// Pops the next peer-initiated unidirectional stream
    pub fn accept_uni(&self) -> Option<Arc<RecvStream>> {
        self.accept_uni.lock().pop_front()
    }

    /// Applies a peer MAX_STREAMS frame
    pub fn on_max_streams(&self, frame: &MaxStreams) {
        let mut counts = self.counts.lock();
        let limit = frame.maximum_streams.as_u64();
        match frame.stream_type {
            StreamType::Bidirectional => {
                if limit > counts.peer_bidi_limit {
                    counts.peer_bidi_limit = limit;
                }
            }
            StreamType::Unidirectional => {
                if limit > counts.peer_uni_limit {
                    counts.peer_uni_limit = limit;
                }
            }
        }
    }

    /// Routes a stream-kind frame to the owning stream
    pub fn on_frame(&self, frame: &Frame) -> Result<(), transport::Error> {
        match frame {
            Frame::Stream(frame) => {
                let stream = self.recv_half(StreamId::from(frame.stream_id))?;
                stream.on_stream(frame)
            }
            Frame::ResetStream(frame) => {
                let stream = self.recv_half(StreamId::from(frame.stream_id))?;
                stream.on_reset(frame)
            }
            Frame::StopSending(frame) => {
                let stream = self.send_half(StreamId::from(frame.stream_id))?;
                stream.on_stop_sending(frame);
                Ok(())
            }
            Frame::MaxStreamData(frame) => {
                let stream = self.send_half(StreamId::from(frame.stream_id))?;
                stream.on_max_stream_data(frame);
                Ok(())
            }
            Frame::MaxData(frame) => {
                self.flow.on_max_data(frame);
                Ok(())
            }
            Frame::MaxStreams(frame) => {
                self.on_max_streams(frame);
                Ok(())
            }
            // blocked signals are informational for a receiver
            Frame::DataBlocked(_) | Frame::StreamDataBlocked(_) | Frame::StreamsBlocked(_) => {
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Emits everything the stream layer owes the packet: connection-level
    /// MAX_DATA, pending STREAMS_BLOCKED signals, then per-stream frames
    pub fn on_transmit(&self, writer: &mut FrameWriter, waiters: &mut Waiters) -> IoResult {
        let result = self.flow.on_transmit(writer, waiters);
        if result.is_fatal() {
            return result;
        }

        {
            let mut counts = self.counts.lock();
            if counts.blocked_bidi {
                let frame = StreamsBlocked {
                    stream_type: StreamType::Bidirectional,
                    stream_limit: VarInt::new(counts.peer_bidi_limit).unwrap_or(VarInt::MAX),
                };
                if writer.write(frame) {
                    counts.blocked_bidi = false;
                }
            }
            if counts.blocked_uni {
                let frame = StreamsBlocked {
                    stream_type: StreamType::Unidirectional,
                    stream_limit: VarInt::new(counts.peer_uni_limit).unwrap_or(VarInt::MAX),
                };
                if writer.write(frame) {
                    counts.blocked_uni = false;
                }
            }
        }

        let entries: Vec<Entry> = self.streams.lock().values().cloned().collect();
        for entry in &entries {
            let result = match entry {
                Entry::Bidi(stream) => {
                    let result = stream.receiver.on_transmit(writer, waiters);
                    if result.is_fatal() {
                        return result;
                    }
                    stream.sender.on_transmit(writer, waiters)
                }
                Entry::Send(stream) => stream.on_transmit(writer, waiters),
                Entry::Recv(stream) => stream.on_transmit(writer, waiters),
            };
            if result.is_fatal() {
                return result;
            }
        }

        // drop streams which reached a terminal state in both directions
        self.streams.lock().retain(|_, entry| match entry {
            Entry::Bidi(stream) => {
                !(stream.sender.is_terminal() && stream.receiver.is_terminal())
            }
            Entry::Send(stream) => !stream.is_terminal(),
            Entry::Recv(stream) => !stream.is_terminal(),
        });

        IoResult::Ok
    }

    /// Finds (or implicitly creates) the receive half addressed by a
    /// STREAM / RESET_STREAM frame
    fn recv_half(&self, id: StreamId) -> Result<Arc<RecvStream>, transport::Error> {
        if let Some(entry) = self.streams.lock().get(&id.as_varint().as_u64()) {
            return match entry {
                Entry::Bidi(stream) => Ok(stream.receiver.clone()),
                Entry::Recv(stream) => Ok(stream.clone()),
                Entry::Send(_) => Err(transport_error!(
                    STREAM_STATE_ERROR,
                    "receive-direction frame for a send-only stream"
                )),
            };
        }

        if id.initiator() == self.local {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
            //# An endpoint MUST terminate the connection with error
            //# STREAM_STATE_ERROR if it receives a STREAM frame for a
            //# locally initiated stream that has not yet been created
            return Err(transport_error!(
                STREAM_STATE_ERROR,
                "frame for a local stream which was never opened"
            ));
        }
        self.create_peer_stream(id)
    }

    /// Finds the send half addressed by a STOP_SENDING / MAX_STREAM_DATA
    /// frame
    fn send_half(&self, id: StreamId) -> Result<Arc<SendStream>, transport::Error> {
        if let Some(entry) = self.streams.lock().get(&id.as_varint().as_u64()) {
            return match entry {
                Entry::Bidi(stream) => Ok(stream.sender.clone()),
                Entry::Send(stream) => Ok(stream.clone()),
                Entry::Recv(_) => Err(transport_error!(
                    STREAM_STATE_ERROR,
                    "send-direction frame for a receive-only stream"
                )),
            };
        }

        if id.initiator() == self.local {
            return Err(transport_error!(
                STREAM_STATE_ERROR,
                "frame for a local stream which was never opened"
            ));
        }
        // a send-direction frame can also implicitly create a peer bidi
        // stream; our send half faces the peer's receive half
        match id.stream_type() {
            StreamType::Bidirectional => {
                self.create_peer_stream(id)?;
                match self.streams.lock().get(&id.as_varint().as_u64()) {
                    Some(Entry::Bidi(stream)) => Ok(stream.sender.clone()),
                    _ => Err(transport_error!(INTERNAL_ERROR, "stream registry out of sync")),
                }
            }
            StreamType::Unidirectional => Err(transport_error!(
                STREAM_STATE_ERROR,
                "send-direction frame for a peer unidirectional stream"
            )),
        }
    }

    /// Creates a peer-initiated stream, enforcing our MAX_STREAMS grant
    fn create_peer_stream(&self, id: StreamId) -> Result<Arc<RecvStream>, transport::Error> {
        let index = id.as_varint().as_u64() >> 2;
        let counts = self.counts.lock();
        let allowed = match id.stream_type() {
            StreamType::Bidirectional => index < counts.local_bidi_limit,
            StreamType::Unidirectional => index < counts.local_uni_limit,
        };
        drop(counts);
        if !allowed {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
            //# An endpoint that receives a frame with a stream ID exceeding
            //# the limit it has sent MUST treat this as a connection error
            //# of type STREAM_LIMIT_ERROR
            return Err(transport_error!(
                STREAM_LIMIT_ERROR,
                "peer exceeded its stream limit"
            ));
        }

        match id.stream_type() {
            StreamType::Bidirectional => {
                let stream = Arc::new(BidiStream {
                    sender: Arc::new(SendStream::new(
                        id,
                        &self.flow,
                        self.send_limits.initial_send_limit(id, self.local),
                    )),
                    receiver: Arc::new(RecvStream::new(
                        id,
                        &self.flow,
                        self.recv_limits.initial_recv_limit(id, self.local),
                    )),
                });
                self.streams
                    .lock()
                    .insert(id.as_varint().as_u64(), Entry::Bidi(stream.clone()));
                self.accept_bidi.lock().push_back(stream.clone());
                Ok(stream.receiver.clone())
            }
            StreamType::Unidirectional => {
                let stream = Arc::new(RecvStream::new(
                    id,
                    &self.flow,
                    self.recv_limits.initial_recv_limit(id, self.local),
                ));
                self.streams
                    .lock()
                    .insert(id.as_varint().as_u64(), Entry::Recv(stream.clone()));
                self.accept_uni.lock().push_back(stream.clone());
                Ok(stream)
            }
        }
    }
}
