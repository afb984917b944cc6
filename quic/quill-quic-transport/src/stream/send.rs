// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Send side of a stream: queued user data, flow-controlled STREAM
//! emission, fragment retransmission and the RESET_STREAM handshake.

use crate::{packet::FrameWriter, stream::FlowController};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use quill_quic_core::{
    ack::{self, Record, Waiters},
    flow::Window,
    frame::{MaxStreamData, ResetStream, StopSending, Stream, StreamDataBlocked},
    io::IoResult,
    stream::{state::Sender, StreamId},
    varint::VarInt,
};
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct SentFragment {
    offset: u64,
    data: Bytes,
    is_fin: bool,
    /// Weak observer; the ack processor owns the record itself
    waiter: Weak<Record>,
}

impl SentFragment {
    fn is_acked(&self) -> bool {
        self.waiter
            .upgrade()
            .map_or(false, |record| record.is_acked())
    }

    /// A fragment whose record was dropped is treated as lost
    fn is_lost(&self) -> bool {
        self.waiter
            .upgrade()
            .map_or(true, |record| record.is_lost())
    }
}

#[derive(Debug)]
struct SendInner {
    state: Sender,
    /// Stream-level send window; `used` is the written offset high-water
    limit: Window,
    /// Bytes accepted from the application but not yet transmitted
    src: BytesMut,
    written_offset: u64,
    fin_requested: bool,
    fin_written: bool,
    reset_code: Option<VarInt>,
    reset_wait: Option<Weak<Record>>,
    fragments: Vec<SentFragment>,
}

impl SendInner {
    /// DataSent moves to DataRecvd once every fragment is acknowledged
    fn maybe_send_done(&mut self) {
        if self.state.is_data_sent() && self.fragments.is_empty() {
            let _ = self.state.on_recv_all_acks();
        }
    }
}

/// The sending half of a stream
#[derive(Debug)]
pub struct SendStream {
    id: StreamId,
    conn: Weak<FlowController>,
    inner: Mutex<SendInner>,
}

impl SendStream {
    pub fn new(id: StreamId, conn: &Arc<FlowController>, initial_limit: VarInt) -> Self {
        Self {
            id,
            conn: Arc::downgrade(conn),
            inner: Mutex::new(SendInner {
                state: Sender::default(),
                limit: Window::new(initial_limit),
                src: BytesMut::new(),
                written_offset: 0,
                fin_requested: false,
                fin_written: false,
                reset_code: None,
                reset_wait: None,
                fragments: Vec::new(),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.inner.lock().state.is_terminal()
    }

    /// Appends application data, optionally marking the end of the stream
    pub fn write(&self, data: &[u8], fin: bool) -> IoResult {
        let mut inner = self.inner.lock();
        if inner.fin_requested || !matches!(inner.state, Sender::Ready | Sender::Send) {
            return IoResult::Cancel;
        }
        inner.src.extend_from_slice(data);
        inner.fin_requested = fin;
        IoResult::Ok
    }

    /// Requests an abrupt local termination with the given code
    pub fn request_reset(&self, code: VarInt) -> IoResult {
        let mut inner = self.inner.lock();
        if inner.state.on_queue_reset().is_err() {
            return IoResult::NotInIoState;
        }
        inner.reset_code = Some(code);
        IoResult::Ok
    }

    /// A peer STOP_SENDING queues a reset carrying the peer's code
    pub fn on_stop_sending(&self, frame: &StopSending) {
        if frame.stream_id != self.id.as_varint() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.state.on_queue_reset().is_ok() {
            inner.reset_code = Some(frame.application_error_code);
        }
    }

    pub fn on_max_stream_data(&self, frame: &MaxStreamData) {
        if frame.stream_id != self.id.as_varint() {
            return;
        }
        self.inner.lock().limit.update_limit(frame.maximum_stream_data);
    }

    /// Sweeps fragment acks; true while the stream still has work
    pub fn poll_progress(&self) -> bool {
        let mut inner = self.inner.lock();
        if let Some(observer) = inner.reset_wait.clone() {
            if observer
                .upgrade()
                .map_or(false, |record| record.is_acked())
            {
                let _ = inner.state.on_recv_reset_ack();
            }
            return !inner.state.is_terminal();
        }
        inner.fragments.retain(|fragment| !fragment.is_acked());
        inner.maybe_send_done();
        !inner.state.is_terminal()
    }

    /// Emits every frame this stream owes the packet under construction:
    /// the reset handshake first, then lost-fragment retransmissions, then
    /// fresh data with its blocked signals.
    pub fn on_transmit(&self, writer: &mut FrameWriter, waiters: &mut Waiters) -> IoResult {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return IoResult::Ok;
        }

        let reset = self.transmit_reset(&mut inner, writer, waiters);
        if reset != IoResult::NotInIoState {
            return reset;
        }

        let retransmit = self.transmit_retransmissions(&mut inner, writer, waiters);
        if retransmit.is_fatal() {
            return retransmit;
        }

        self.transmit_fresh(&mut inner, writer, waiters)
    }

    /// RESET_STREAM emission and retransmission
    fn transmit_reset(
        &self,
        inner: &mut SendInner,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> IoResult {
        let frame = ResetStream {
            stream_id: self.id.as_varint(),
            application_error_code: inner.reset_code.unwrap_or(VarInt::ZERO),
            final_size: inner.limit.used(),
        };

        if let Some(observer) = inner.reset_wait.clone() {
            match observer.upgrade() {
                Some(record) if record.is_acked() => {
                    let _ = inner.state.on_recv_reset_ack();
                }
                Some(record) if record.is_waiting() => {}
                // lost, or no longer of interest to the ack processor
                _ => {
                    if !writer.write(frame) {
                        return IoResult::NoCapacity;
                    }
                    inner.reset_wait = Some(ack::register(waiters));
                }
            }
            return IoResult::Ok;
        }

        if !inner.state.is_reset_queued() {
            return IoResult::NotInIoState;
        }
        if !writer.write(frame) {
            return IoResult::NoCapacity;
        }
        if inner.state.on_send_reset().is_err() {
            return IoResult::Fatal;
        }
        inner.reset_wait = Some(ack::register(waiters));
        IoResult::Ok
    }

    /// Walks the fragment list, re-emitting lost fragments
    ///
    /// A fragment which only partially fits is split: the transmitted
    /// prefix becomes a new fragment with a fresh waiter, the suffix stays
    /// in place awaiting the next packet.
    fn transmit_retransmissions(
        &self,
        inner: &mut SendInner,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> IoResult {
        if !inner.state.can_retransmit() {
            return IoResult::NotInIoState;
        }

        let id = self.id.as_varint();
        let mut appended: Vec<SentFragment> = Vec::new();
        let mut sent_any = false;
        let mut index = 0;

        while index < inner.fragments.len() {
            if inner.fragments[index].is_acked() {
                inner.fragments.remove(index);
                continue;
            }
            if !inner.fragments[index].is_lost() {
                index += 1;
                continue;
            }

            let fragment = &mut inner.fragments[index];
            let offset = match VarInt::new(fragment.offset) {
                Ok(offset) => offset,
                Err(_) => return IoResult::Fatal,
            };
            let Some(frame) = Stream::make_fit(
                writer.remaining_capacity(),
                id,
                offset,
                &fragment.data,
                fragment.is_fin,
                fragment.is_fin,
            ) else {
                // not enough capacity in this packet; keep for the next
                index += 1;
                continue;
            };
            let payload = frame.data.len();
            let frame_fin = frame.is_fin;
            if !writer.write(frame) {
                return IoResult::Fatal;
            }
            sent_any = true;

            let sent = fragment.data.split_to(payload);
            appended.push(SentFragment {
                offset: fragment.offset,
                data: sent,
                is_fin: frame_fin,
                waiter: ack::register(waiters),
            });

            if fragment.data.is_empty() {
                inner.fragments.remove(index);
            } else {
                fragment.offset += payload as u64;
                index += 1;
            }
        }

        inner.fragments.append(&mut appended);
        inner.maybe_send_done();
        if sent_any {
            IoResult::Ok
        } else {
            IoResult::NoData
        }
    }

    /// Flow-controlled emission of fresh data, in the order: state check,
    /// overhead check, data check, stream limit, connection limit (under
    /// the connection flow lock), frame fit, state advance.
    fn transmit_fresh(
        &self,
        inner: &mut SendInner,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> IoResult {
        let Some(conn) = self.conn.upgrade() else {
            return IoResult::Fatal;
        };
        let id = self.id.as_varint();

        let SendInner {
            state,
            limit,
            src,
            written_offset,
            fin_requested,
            fin_written,
            fragments,
            ..
        } = inner;

        if !state.can_send() {
            return IoResult::NotInIoState;
        }

        let offset = *written_offset;
        let Ok(offset_vi) = VarInt::new(offset) else {
            return IoResult::Fatal;
        };
        if writer.remaining_capacity() < Stream::overhead(id, offset_vi, offset != 0) {
            return IoResult::NoCapacity;
        }

        let data_remain = src.len() as u64;
        let should_fin = *fin_requested && !*fin_written;
        if data_remain == 0 && !should_fin {
            return IoResult::NoData;
        }

        let stream_avail = limit.available();
        let payload_limit = data_remain.min(stream_avail);
        if payload_limit == 0 && !should_fin {
            let blocked = StreamDataBlocked {
                stream_id: id,
                stream_data_limit: limit.limit(),
            };
            if !writer.write(blocked) {
                return IoResult::NoCapacity;
            }
            return IoResult::BlockByStream;
        }

        let capacity = writer.remaining_capacity();
        let full: &[u8] = &src[..];
        let mut conn_blocked_limit = None;
        let frame = conn.with_send(|window| {
            let flow = window.available().min(payload_limit);
            if flow == 0 {
                conn_blocked_limit = Some(window.limit());
                return None;
            }
            let data = &full[..flow.min(data_remain) as usize];
            let fin = should_fin && flow >= data_remain;
            let frame = Stream::make_fit(capacity, id, offset_vi, data, fin, fin)?;
            window.consume(frame.data.len() as u64).ok()?;
            Some(frame)
        });

        let frame = match frame {
            Some(frame) => frame,
            None => {
                if let Some(conn_limit) = conn_blocked_limit {
                    let result = conn.send_data_blocked(writer, conn_limit);
                    if result != IoResult::Ok {
                        return result;
                    }
                    return IoResult::BlockByConn;
                }
                return IoResult::NoCapacity;
            }
        };

        let payload = frame.data.len();
        let is_fin = frame.is_fin;
        if !writer.write(frame) {
            return IoResult::Fatal;
        }

        let Ok(new_offset) = VarInt::new(offset + payload as u64) else {
            return IoResult::Fatal;
        };
        if limit.advance_to(new_offset).is_err() {
            return IoResult::Fatal;
        }
        let _ = state.on_send_stream();
        if is_fin {
            if state.on_send_fin().is_err() {
                return IoResult::Fatal;
            }
            *fin_written = true;
        }

        let sent = src.split_to(payload).freeze();
        fragments.push(SentFragment {
            offset,
            data: sent,
            is_fin,
            waiter: ack::register(waiters),
        });
        *written_offset = offset + payload as u64;

        IoResult::Ok
    }

    #[cfg(test)]
    pub(crate) fn written_offset(&self) -> u64 {
        self.inner.lock().written_offset
    }

    #[cfg(test)]
    pub(crate) fn outstanding_bytes(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .fragments
            .iter()
            .map(|fragment| fragment.data.len() as u64)
            .sum()
    }

    #[cfg(test)]
    pub(crate) fn sender_state(&self) -> Sender {
        self.inner.lock().state.clone()
    }
}
