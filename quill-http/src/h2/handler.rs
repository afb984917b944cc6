// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client-side HTTP/2 connection handler: stream table, flow control,
//! settings and GOAWAY.
//!
//! Incoming bytes are fed through `add_input`, which parses frames,
//! updates stream state and queues protocol replies (SETTINGS/PING acks,
//! WINDOW_UPDATE replenishment) into the output buffer. The client pump
//! drains that buffer onto the wire.

use crate::h2::{
    frame::{flags, write_frame, FrameHeader, FrameType, HEADER_LEN},
    hpack, settings, H2Error, CONNECTION_PREFACE, DEFAULT_HEADER_TABLE_SIZE,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE,
};
use bytes::{Bytes, BytesMut};
use quill_codec::DecoderBuffer;
use std::collections::{HashMap, VecDeque};

//= https://www.rfc-editor.org/rfc/rfc9113#section-5.1
//# idle → open → half-closed → closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Something the peer did that the client pump must react to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Response headers arrived for the stream
    Headers(u32),
    /// Response body bytes arrived for the stream
    Data(u32),
    /// The peer half-closed the stream; the response is complete
    End(u32),
    /// The peer reset the stream with the given error code
    Reset(u32, u32),
    /// The peer is shutting the connection down
    GoAway(H2Error),
}

#[derive(Debug)]
struct StreamEntry {
    state: StreamState,
    send_window: i64,
    recv_window: i64,
    headers: Option<Vec<(String, String)>>,
    body: BytesMut,
    end_received: bool,
    reset: Option<u32>,
    /// Data waiting for send-window capacity, with its END_STREAM flag
    pending_data: VecDeque<(Bytes, bool)>,
}

impl StreamEntry {
    fn new(send_window: i64) -> Self {
        Self {
            state: StreamState::Idle,
            send_window,
            recv_window: DEFAULT_WINDOW_SIZE,
            headers: None,
            body: BytesMut::new(),
            end_received: false,
            reset: None,
            pending_data: VecDeque::new(),
        }
    }
}

/// One HTTP/2 connection in the client role
#[derive(Debug)]
pub struct FrameHandler {
    streams: HashMap<u32, StreamEntry>,
    next_stream_id: u32,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    send_window: i64,
    recv_window: i64,
    peer_initial_window: i64,
    peer_max_frame_size: usize,
    local_max_frame_size: usize,
    out: BytesMut,
    input: BytesMut,
    /// An unterminated header block: `(stream, end_stream, fragment)`
    continuation: Option<(u32, bool, BytesMut)>,
    highest_peer_stream: u32,
    goaway_sent: bool,
    goaway_received: Option<H2Error>,
}

impl FrameHandler {
    /// Starts a client connection: emits the preface and the initial
    /// SETTINGS, which always disables server push
    pub fn new_client() -> Self {
        let mut out = BytesMut::with_capacity(CONNECTION_PREFACE.len() + HEADER_LEN + 6);
        out.extend_from_slice(CONNECTION_PREFACE);
        let mut payload = [0u8; 6];
        payload[..2].copy_from_slice(&settings::ENABLE_PUSH.to_be_bytes());
        // ENABLE_PUSH=0
        write_frame(&mut out, FrameType::Settings, 0, 0, &payload);

        Self {
            streams: HashMap::new(),
            next_stream_id: 1,
            encoder: hpack::Encoder::new(DEFAULT_HEADER_TABLE_SIZE),
            decoder: hpack::Decoder::new(DEFAULT_HEADER_TABLE_SIZE),
            send_window: DEFAULT_WINDOW_SIZE,
            recv_window: DEFAULT_WINDOW_SIZE,
            peer_initial_window: DEFAULT_WINDOW_SIZE,
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            local_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            out,
            input: BytesMut::new(),
            continuation: None,
            highest_peer_stream: 0,
            goaway_sent: false,
            goaway_received: None,
        }
    }

    /// Opens a new client-initiated stream
    pub fn open(&mut self) -> Option<u32> {
        if self.goaway_received.is_some() || self.goaway_sent {
            return None;
        }
        let id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.checked_add(2)?;
        self.streams
            .insert(id, StreamEntry::new(self.peer_initial_window));
        Some(id)
    }

    /// Sends the request header block, splitting into CONTINUATION frames
    /// at the peer's max frame size
    pub fn send_headers(
        &mut self,
        stream_id: u32,
        headers: &[(String, String)],
        end_stream: bool,
    ) -> Result<(), H2Error> {
        let entry = self.streams.get_mut(&stream_id).ok_or(H2Error::Internal)?;

        let mut block = BytesMut::new();
        self.encoder.encode(headers, &mut block);

        let mut first = true;
        loop {
            let take = block.len().min(self.peer_max_frame_size);
            let chunk = block.split_to(take);
            let last = block.is_empty();
            let frame_type = if first {
                FrameType::Headers
            } else {
                FrameType::Continuation
            };
            let mut frame_flags = 0;
            if first && end_stream {
                frame_flags |= flags::END_STREAM;
            }
            if last {
                frame_flags |= flags::END_HEADERS;
            }
            write_frame(&mut self.out, frame_type, frame_flags, stream_id, &chunk);
            first = false;
            if last {
                break;
            }
        }

        entry.state = match (entry.state, end_stream) {
            (StreamState::Idle, false) => StreamState::Open,
            (StreamState::Idle, true) => StreamState::HalfClosedLocal,
            (state, _) => state,
        };
        Ok(())
    }

    /// Queues request body bytes, emitting as much as flow control allows
    pub fn send_data(
        &mut self,
        stream_id: u32,
        data: &[u8],
        end_stream: bool,
    ) -> Result<(), H2Error> {
        let entry = self.streams.get_mut(&stream_id).ok_or(H2Error::Internal)?;
        if !matches!(entry.state, StreamState::Open | StreamState::HalfClosedRemote) {
            return Err(H2Error::StreamClosed);
        }
        entry
            .pending_data
            .push_back((Bytes::copy_from_slice(data), end_stream));
        self.flush_stream(stream_id);
        Ok(())
    }

    /// Emits queued DATA within the connection and stream send windows
    fn flush_stream(&mut self, stream_id: u32) {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return;
        };
        while let Some((data, end_stream)) = entry.pending_data.front_mut() {
            let budget = self
                .send_window
                .min(entry.send_window)
                .min(self.peer_max_frame_size as i64);
            if data.is_empty() {
                // bare END_STREAM
                let end = *end_stream;
                write_frame(
                    &mut self.out,
                    FrameType::Data,
                    if end { flags::END_STREAM } else { 0 },
                    stream_id,
                    &[],
                );
                entry.pending_data.pop_front();
                if end {
                    entry.state = match entry.state {
                        StreamState::HalfClosedRemote => StreamState::Closed,
                        _ => StreamState::HalfClosedLocal,
                    };
                }
                continue;
            }
            if budget <= 0 {
                return;
            }
            let take = (budget as usize).min(data.len());
            let chunk = data.split_to(take);
            let drained = data.is_empty();
            let end = drained && *end_stream;
            write_frame(
                &mut self.out,
                FrameType::Data,
                if end { flags::END_STREAM } else { 0 },
                stream_id,
                &chunk,
            );
            self.send_window -= take as i64;
            entry.send_window -= take as i64;
            if drained {
                entry.pending_data.pop_front();
                if end {
                    entry.state = match entry.state {
                        StreamState::HalfClosedRemote => StreamState::Closed,
                        _ => StreamState::HalfClosedLocal,
                    };
                }
            }
        }
    }

    fn flush_all_streams(&mut self) {
        let ids: Vec<u32> = self.streams.keys().copied().collect();
        for id in ids {
            self.flush_stream(id);
        }
    }

    /// Emits a GOAWAY carrying the last peer-initiated stream processed
    pub fn send_goaway(&mut self, error: H2Error) {
        if self.goaway_sent {
            return;
        }
        self.goaway_sent = true;
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&self.highest_peer_stream.to_be_bytes());
        payload[4..].copy_from_slice(&error.code().to_be_bytes());
        write_frame(&mut self.out, FrameType::Goaway, 0, 0, &payload);
    }

    /// Bytes queued for the wire
    #[inline]
    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }

    pub fn take_output(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    pub fn stream_headers(&self, stream_id: u32) -> Option<&[(String, String)]> {
        self.streams
            .get(&stream_id)
            .and_then(|entry| entry.headers.as_deref())
    }

    pub fn take_stream_body(&mut self, stream_id: u32) -> Option<BytesMut> {
        self.streams
            .get_mut(&stream_id)
            .map(|entry| core::mem::take(&mut entry.body))
    }

    pub fn stream_ended(&self, stream_id: u32) -> bool {
        self.streams
            .get(&stream_id)
            .map(|entry| entry.end_received)
            .unwrap_or(false)
    }

    pub fn stream_reset(&self, stream_id: u32) -> Option<u32> {
        self.streams.get(&stream_id).and_then(|entry| entry.reset)
    }

    pub fn goaway_received(&self) -> Option<H2Error> {
        self.goaway_received
    }

    pub fn remove_stream(&mut self, stream_id: u32) {
        self.streams.remove(&stream_id);
    }

    /// Feeds connection bytes, returning the events they produced
    pub fn add_input(&mut self, data: &[u8]) -> Result<Vec<Event>, H2Error> {
        self.input.extend_from_slice(data);
        let mut events = Vec::new();

        loop {
            if self.input.len() < HEADER_LEN {
                break;
            }
            let buffer = DecoderBuffer::new(&self.input[..HEADER_LEN]);
            let (header, _) = buffer
                .decode::<FrameHeader>()
                .map_err(|_| H2Error::Protocol)?;
            let length = header.length as usize;
            //= https://www.rfc-editor.org/rfc/rfc9113#section-4.2
            //# An endpoint MUST send an error code of FRAME_SIZE_ERROR if a
            //# frame exceeds the size defined in SETTINGS_MAX_FRAME_SIZE
            if length > self.local_max_frame_size {
                return Err(H2Error::FrameSize);
            }
            if self.input.len() < HEADER_LEN + length {
                break;
            }
            let _ = self.input.split_to(HEADER_LEN);
            let payload = self.input.split_to(length).freeze();
            self.dispatch(header, payload, &mut events)?;
        }

        Ok(events)
    }

    fn dispatch(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        //= https://www.rfc-editor.org/rfc/rfc9113#section-6.10
        //# A receiver MUST treat the receipt of any other type of frame or
        //# a frame on a different stream as a connection error of type
        //# PROTOCOL_ERROR.
        if let Some((stream_id, _, _)) = &self.continuation {
            let matches = header.frame_type == FrameType::Continuation
                && header.stream_id == *stream_id;
            if !matches {
                return Err(H2Error::Protocol);
            }
        }

        match header.frame_type {
            FrameType::Data => self.on_data(header, payload, events),
            FrameType::Headers => self.on_headers(header, payload, events),
            FrameType::Continuation => self.on_continuation(header, payload, events),
            FrameType::RstStream => self.on_rst_stream(header, payload, events),
            FrameType::Settings => self.on_settings(header, payload),
            FrameType::Ping => self.on_ping(header, payload),
            FrameType::Goaway => self.on_goaway(header, payload, events),
            FrameType::WindowUpdate => self.on_window_update(header, payload),
            //= https://www.rfc-editor.org/rfc/rfc9113#section-8.4
            //# A client that receives a PUSH_PROMISE frame with push disabled
            //# MUST treat it as a connection error of type PROTOCOL_ERROR.
            FrameType::PushPromise => Err(H2Error::Protocol),
            FrameType::Priority => {
                if payload.len() != 5 {
                    return Err(H2Error::FrameSize);
                }
                Ok(())
            }
            FrameType::Unknown(_) => Ok(()),
        }
    }

    fn on_data(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        if header.stream_id == 0 {
            return Err(H2Error::Protocol);
        }
        let length = payload.len() as i64;
        let data = strip_padding(&header, payload)?;

        // the whole frame counts against flow control, padding included
        self.recv_window -= length;
        if self.recv_window < 0 {
            return Err(H2Error::FlowControl);
        }

        let entry = self
            .streams
            .get_mut(&header.stream_id)
            .ok_or(H2Error::Protocol)?;
        if !matches!(
            entry.state,
            StreamState::Open | StreamState::HalfClosedLocal
        ) {
            return Err(H2Error::StreamClosed);
        }
        entry.recv_window -= length;
        if entry.recv_window < 0 {
            return Err(H2Error::FlowControl);
        }

        entry.body.extend_from_slice(&data);
        if !data.is_empty() {
            events.push(Event::Data(header.stream_id));
        }
        if header.has_flag(flags::END_STREAM) {
            entry.end_received = true;
            entry.state = match entry.state {
                StreamState::HalfClosedLocal => StreamState::Closed,
                _ => StreamState::HalfClosedRemote,
            };
            events.push(Event::End(header.stream_id));
        }

        // replenish both windows for what was just consumed
        if length > 0 {
            entry.recv_window += length;
            self.recv_window += length;
            let increment = (length as u32).to_be_bytes();
            write_frame(&mut self.out, FrameType::WindowUpdate, 0, 0, &increment);
            write_frame(
                &mut self.out,
                FrameType::WindowUpdate,
                0,
                header.stream_id,
                &increment,
            );
        }
        Ok(())
    }

    fn on_headers(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        if header.stream_id == 0 {
            return Err(H2Error::Protocol);
        }
        let mut data = strip_padding(&header, payload)?;
        if header.has_flag(flags::PRIORITY) {
            if data.len() < 5 {
                return Err(H2Error::FrameSize);
            }
            data = data.slice(5..);
        }
        let end_stream = header.has_flag(flags::END_STREAM);
        if header.has_flag(flags::END_HEADERS) {
            self.finish_header_block(header.stream_id, end_stream, &data, events)
        } else {
            let mut fragment = BytesMut::new();
            fragment.extend_from_slice(&data);
            self.continuation = Some((header.stream_id, end_stream, fragment));
            Ok(())
        }
    }

    fn on_continuation(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        let Some((stream_id, end_stream, mut fragment)) = self.continuation.take() else {
            return Err(H2Error::Protocol);
        };
        fragment.extend_from_slice(&payload);
        if header.has_flag(flags::END_HEADERS) {
            let fragment = fragment.freeze();
            self.finish_header_block(stream_id, end_stream, &fragment, events)
        } else {
            self.continuation = Some((stream_id, end_stream, fragment));
            Ok(())
        }
    }

    fn finish_header_block(
        &mut self,
        stream_id: u32,
        end_stream: bool,
        fragment: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        let headers = self
            .decoder
            .decode(fragment)
            .map_err(|_| H2Error::Compression)?;
        let entry = self.streams.get_mut(&stream_id).ok_or(H2Error::Protocol)?;
        entry.headers = Some(headers);
        events.push(Event::Headers(stream_id));
        if end_stream {
            entry.end_received = true;
            entry.state = match entry.state {
                StreamState::HalfClosedLocal => StreamState::Closed,
                _ => StreamState::HalfClosedRemote,
            };
            events.push(Event::End(stream_id));
        }
        Ok(())
    }

    fn on_rst_stream(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        if payload.len() != 4 {
            return Err(H2Error::FrameSize);
        }
        if header.stream_id == 0 {
            return Err(H2Error::Protocol);
        }
        let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if let Some(entry) = self.streams.get_mut(&header.stream_id) {
            entry.state = StreamState::Closed;
            entry.reset = Some(code);
        }
        events.push(Event::Reset(header.stream_id, code));
        Ok(())
    }

    fn on_settings(&mut self, header: FrameHeader, payload: Bytes) -> Result<(), H2Error> {
        if header.stream_id != 0 {
            return Err(H2Error::Protocol);
        }
        if header.has_flag(flags::ACK) {
            if !payload.is_empty() {
                return Err(H2Error::FrameSize);
            }
            return Ok(());
        }
        if payload.len() % 6 != 0 {
            return Err(H2Error::FrameSize);
        }

        for pair in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([pair[0], pair[1]]);
            let value = u32::from_be_bytes([pair[2], pair[3], pair[4], pair[5]]);
            match id {
                settings::HEADER_TABLE_SIZE => {
                    self.encoder.set_max_table_size(value as usize);
                }
                settings::ENABLE_PUSH => {
                    if value > 1 {
                        return Err(H2Error::Protocol);
                    }
                }
                settings::INITIAL_WINDOW_SIZE => {
                    if i64::from(value) > MAX_WINDOW_SIZE {
                        return Err(H2Error::FlowControl);
                    }
                    let delta = i64::from(value) - self.peer_initial_window;
                    self.peer_initial_window = i64::from(value);
                    for entry in self.streams.values_mut() {
                        entry.send_window += delta;
                    }
                }
                settings::MAX_FRAME_SIZE => {
                    if !(16_384..=(1 << 24) - 1).contains(&value) {
                        return Err(H2Error::Protocol);
                    }
                    self.peer_max_frame_size = value as usize;
                }
                settings::MAX_CONCURRENT_STREAMS | settings::MAX_HEADER_LIST_SIZE => {}
                _ => {}
            }
        }

        write_frame(&mut self.out, FrameType::Settings, flags::ACK, 0, &[]);
        self.flush_all_streams();
        Ok(())
    }

    fn on_ping(&mut self, header: FrameHeader, payload: Bytes) -> Result<(), H2Error> {
        if header.stream_id != 0 {
            return Err(H2Error::Protocol);
        }
        if payload.len() != 8 {
            return Err(H2Error::FrameSize);
        }
        if !header.has_flag(flags::ACK) {
            write_frame(&mut self.out, FrameType::Ping, flags::ACK, 0, &payload);
        }
        Ok(())
    }

    fn on_goaway(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        if header.stream_id != 0 || payload.len() < 8 {
            return Err(H2Error::Protocol);
        }
        let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let error = H2Error::from_code(code);
        self.goaway_received = Some(error);
        events.push(Event::GoAway(error));
        Ok(())
    }

    fn on_window_update(&mut self, header: FrameHeader, payload: Bytes) -> Result<(), H2Error> {
        if payload.len() != 4 {
            return Err(H2Error::FrameSize);
        }
        let increment =
            i64::from(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
                & 0x7fff_ffff;
        if increment == 0 {
            return Err(H2Error::Protocol);
        }
        if header.stream_id == 0 {
            self.send_window += increment;
            if self.send_window > MAX_WINDOW_SIZE {
                return Err(H2Error::FlowControl);
            }
        } else if let Some(entry) = self.streams.get_mut(&header.stream_id) {
            entry.send_window += increment;
            if entry.send_window > MAX_WINDOW_SIZE {
                return Err(H2Error::FlowControl);
            }
        }
        self.flush_all_streams();
        Ok(())
    }
}

/// Removes the PADDED prologue and trailing padding from a payload
fn strip_padding(header: &FrameHeader, payload: Bytes) -> Result<Bytes, H2Error> {
    if !header.has_flag(flags::PADDED) {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(H2Error::Protocol);
    }
    let pad_length = payload[0] as usize;
    if pad_length + 1 > payload.len() {
        return Err(H2Error::Protocol);
    }
    Ok(payload.slice(1..payload.len() - pad_length))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_frames(mut bytes: &[u8]) -> Vec<(FrameHeader, Vec<u8>)> {
        let mut frames = Vec::new();
        while !bytes.is_empty() {
            let (header, _) = DecoderBuffer::new(&bytes[..HEADER_LEN])
                .decode::<FrameHeader>()
                .unwrap();
            let length = header.length as usize;
            frames.push((header, bytes[HEADER_LEN..HEADER_LEN + length].to_vec()));
            bytes = &bytes[HEADER_LEN + length..];
        }
        frames
    }

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn client_preface_and_push_disabled() {
        let mut handler = FrameHandler::new_client();
        let out = handler.take_output();
        assert!(out.starts_with(CONNECTION_PREFACE));

        let frames = parse_frames(&out[CONNECTION_PREFACE.len()..]);
        assert_eq!(frames.len(), 1);
        let (header, payload) = &frames[0];
        assert_eq!(header.frame_type, FrameType::Settings);
        assert_eq!(header.stream_id, 0);
        // SETTINGS_ENABLE_PUSH = 0
        assert_eq!(payload.as_slice(), &[0x00, 0x02, 0, 0, 0, 0]);
    }

    #[test]
    fn request_round_trip_frames() {
        let mut handler = FrameHandler::new_client();
        handler.take_output();

        let stream = handler.open().unwrap();
        assert_eq!(stream, 1);
        handler
            .send_headers(
                stream,
                &headers(&[
                    (":method", "POST"),
                    (":scheme", "https"),
                    (":authority", "example.com"),
                    (":path", "/"),
                ]),
                false,
            )
            .unwrap();
        handler.send_data(stream, b"body bytes", true).unwrap();

        let out = handler.take_output();
        let frames = parse_frames(&out);
        assert_eq!(frames[0].0.frame_type, FrameType::Headers);
        assert!(frames[0].0.has_flag(flags::END_HEADERS));
        assert!(!frames[0].0.has_flag(flags::END_STREAM));
        assert_eq!(frames[1].0.frame_type, FrameType::Data);
        assert!(frames[1].0.has_flag(flags::END_STREAM));
        assert_eq!(frames[1].1, b"body bytes");
    }

    #[test]
    fn settings_are_acked_and_applied() {
        let mut handler = FrameHandler::new_client();
        handler.take_output();

        // INITIAL_WINDOW_SIZE=8, MAX_FRAME_SIZE=16385
        let mut frame = BytesMut::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&settings::INITIAL_WINDOW_SIZE.to_be_bytes());
        payload.extend_from_slice(&8u32.to_be_bytes());
        payload.extend_from_slice(&settings::MAX_FRAME_SIZE.to_be_bytes());
        payload.extend_from_slice(&16_385u32.to_be_bytes());
        write_frame(&mut frame, FrameType::Settings, 0, 0, &payload);

        let events = handler.add_input(&frame).unwrap();
        assert!(events.is_empty());
        assert_eq!(handler.peer_initial_window, 8);
        assert_eq!(handler.peer_max_frame_size, 16_385);

        let out = handler.take_output();
        let frames = parse_frames(&out);
        assert_eq!(frames[0].0.frame_type, FrameType::Settings);
        assert!(frames[0].0.has_flag(flags::ACK));
        assert!(frames[0].1.is_empty());
    }

    #[test]
    fn ping_is_answered_with_the_same_payload() {
        let mut handler = FrameHandler::new_client();
        handler.take_output();

        let mut frame = BytesMut::new();
        write_frame(&mut frame, FrameType::Ping, 0, 0, &[9, 8, 7, 6, 5, 4, 3, 2]);
        handler.add_input(&frame).unwrap();

        let out = handler.take_output();
        let frames = parse_frames(&out);
        assert_eq!(frames[0].0.frame_type, FrameType::Ping);
        assert!(frames[0].0.has_flag(flags::ACK));
        assert_eq!(frames[0].1, &[9, 8, 7, 6, 5, 4, 3, 2]);

        // an ack is not answered
        let mut frame = BytesMut::new();
        write_frame(&mut frame, FrameType::Ping, flags::ACK, 0, &[0; 8]);
        handler.add_input(&frame).unwrap();
        assert!(!handler.has_output());
    }

    #[test]
    fn response_data_replenishes_windows() {
        let mut handler = FrameHandler::new_client();
        handler.take_output();
        let stream = handler.open().unwrap();
        handler
            .send_headers(stream, &headers(&[(":method", "GET")]), true)
            .unwrap();
        handler.take_output();

        // fabricate a response: headers then data with END_STREAM
        let mut block = BytesMut::new();
        let mut peer_encoder = hpack::Encoder::default();
        peer_encoder.encode(&headers(&[(":status", "200")]), &mut block);
        let mut frame = BytesMut::new();
        write_frame(&mut frame, FrameType::Headers, flags::END_HEADERS, stream, &block);
        write_frame(
            &mut frame,
            FrameType::Data,
            flags::END_STREAM,
            stream,
            b"hello h2",
        );

        let events = handler.add_input(&frame).unwrap();
        assert_eq!(
            events,
            vec![
                Event::Headers(stream),
                Event::Data(stream),
                Event::End(stream)
            ]
        );
        assert_eq!(
            handler.stream_headers(stream).unwrap(),
            &headers(&[(":status", "200")])[..]
        );
        assert_eq!(&handler.take_stream_body(stream).unwrap()[..], b"hello h2");
        assert!(handler.stream_ended(stream));

        // both window updates cover the consumed bytes
        let out = handler.take_output();
        let frames = parse_frames(&out);
        let updates: Vec<_> = frames
            .iter()
            .filter(|(header, _)| header.frame_type == FrameType::WindowUpdate)
            .collect();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].0.stream_id, 0);
        assert_eq!(updates[1].0.stream_id, stream);
        assert_eq!(updates[0].1, 8u32.to_be_bytes());
    }

    #[test]
    fn send_data_respects_flow_control() {
        let mut handler = FrameHandler::new_client();
        handler.take_output();

        // shrink the peer's advertised window to 4 bytes
        let mut frame = BytesMut::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&settings::INITIAL_WINDOW_SIZE.to_be_bytes());
        payload.extend_from_slice(&4u32.to_be_bytes());
        write_frame(&mut frame, FrameType::Settings, 0, 0, &payload);
        handler.add_input(&frame).unwrap();
        handler.take_output();

        let stream = handler.open().unwrap();
        handler
            .send_headers(stream, &headers(&[(":method", "POST")]), false)
            .unwrap();
        handler.send_data(stream, b"abcdefgh", true).unwrap();

        let out = handler.take_output();
        let frames = parse_frames(&out);
        let data: Vec<_> = frames
            .iter()
            .filter(|(header, _)| header.frame_type == FrameType::Data)
            .collect();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].1, b"abcd");
        assert!(!data[0].0.has_flag(flags::END_STREAM));

        // a WINDOW_UPDATE releases the rest
        let mut frame = BytesMut::new();
        write_frame(
            &mut frame,
            FrameType::WindowUpdate,
            0,
            stream,
            &8u32.to_be_bytes(),
        );
        handler.add_input(&frame).unwrap();
        let out = handler.take_output();
        let frames = parse_frames(&out);
        assert_eq!(frames[0].0.frame_type, FrameType::Data);
        assert_eq!(frames[0].1, b"efgh");
        assert!(frames[0].0.has_flag(flags::END_STREAM));
    }

    #[test]
    fn push_promise_is_a_protocol_error() {
        let mut handler = FrameHandler::new_client();
        handler.take_output();
        let mut frame = BytesMut::new();
        write_frame(&mut frame, FrameType::PushPromise, 0, 2, &[0, 0, 0, 2]);
        assert_eq!(handler.add_input(&frame).unwrap_err(), H2Error::Protocol);
    }

    #[test]
    fn goaway_round_trip() {
        let mut handler = FrameHandler::new_client();
        handler.take_output();

        let mut frame = BytesMut::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&H2Error::EnhanceYourCalm.code().to_be_bytes());
        write_frame(&mut frame, FrameType::Goaway, 0, 0, &payload);
        let events = handler.add_input(&frame).unwrap();
        assert_eq!(events, vec![Event::GoAway(H2Error::EnhanceYourCalm)]);
        assert!(handler.open().is_none());

        handler.send_goaway(H2Error::NoError);
        handler.send_goaway(H2Error::NoError);
        let out = handler.take_output();
        let frames = parse_frames(&out);
        assert_eq!(frames.len(), 1, "goaway is sent at most once");
        assert_eq!(frames[0].0.frame_type, FrameType::Goaway);
    }

    #[test]
    fn continuation_reassembles_header_blocks() {
        let mut handler = FrameHandler::new_client();
        handler.take_output();
        let stream = handler.open().unwrap();
        handler
            .send_headers(stream, &headers(&[(":method", "GET")]), true)
            .unwrap();
        handler.take_output();

        let mut block = BytesMut::new();
        let mut peer_encoder = hpack::Encoder::default();
        peer_encoder.encode(
            &headers(&[(":status", "200"), ("server", "quill-test")]),
            &mut block,
        );
        let split = block.len() / 2;

        let mut frame = BytesMut::new();
        write_frame(&mut frame, FrameType::Headers, 0, stream, &block[..split]);
        write_frame(
            &mut frame,
            FrameType::Continuation,
            flags::END_HEADERS,
            stream,
            &block[split..],
        );
        let events = handler.add_input(&frame).unwrap();
        assert_eq!(events, vec![Event::Headers(stream)]);
        assert_eq!(
            handler.stream_headers(stream).unwrap()[1],
            ("server".to_string(), "quill-test".to_string())
        );
    }
}
