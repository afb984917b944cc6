// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Receive side of a stream: flow-control enforcement, final-size
//! bookkeeping, fragment delivery and the STOP_SENDING / MAX_STREAM_DATA
//! emission loops.

use crate::{packet::FrameWriter, stream::FlowController};
use parking_lot::Mutex;
use quill_quic_core::{
    ack::{self, Record, Waiters},
    flow::Window,
    frame,
    frame::{MaxStreamData, ResetStream, StopSending},
    io::IoResult,
    stream::{state::Receiver, StreamId},
    transport,
    transport_error,
    varint::VarInt,
};
use std::sync::{Arc, Weak};

/// A received run of stream bytes, delivered with its offset
///
/// Frames may arrive out of order; re-assembly is the receiver's job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub offset: u64,
    pub data: &'a [u8],
    pub is_fin: bool,
}

/// Receives fragments; returning `Ok(true)` signals that every byte up to
/// the final size has been delivered
pub type DeliverFn = Box<dyn FnMut(Fragment<'_>) -> Result<bool, transport::Error> + Send>;

struct RecvInner {
    state: Receiver,
    /// Advertised receive window; `used` is the largest observed offset
    limit: Window,
    final_size: Option<u64>,
    reset_code: Option<VarInt>,
    stop_code: VarInt,
    stop_requested: bool,
    /// Weak observers; the ack processor owns the records themselves
    stop_wait: Option<Weak<Record>>,
    limit_update_pending: bool,
    max_data_wait: Option<Weak<Record>>,
    deliver: Option<DeliverFn>,
}

impl core::fmt::Debug for RecvInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecvInner")
            .field("state", &self.state)
            .field("limit", &self.limit)
            .field("final_size", &self.final_size)
            .finish_non_exhaustive()
    }
}

/// The receiving half of a stream
#[derive(Debug)]
pub struct RecvStream {
    id: StreamId,
    conn: Weak<FlowController>,
    inner: Mutex<RecvInner>,
}

impl RecvStream {
    pub fn new(id: StreamId, conn: &Arc<FlowController>, initial_limit: VarInt) -> Self {
        Self {
            id,
            conn: Arc::downgrade(conn),
            inner: Mutex::new(RecvInner {
                state: Receiver::default(),
                limit: Window::new(initial_limit),
                final_size: None,
                reset_code: None,
                stop_code: VarInt::ZERO,
                stop_requested: false,
                stop_wait: None,
                limit_update_pending: false,
                max_data_wait: None,
                deliver: None,
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

    /// The application error code carried by a peer RESET_STREAM, if any
    pub fn reset_code(&self) -> Option<VarInt> {
        self.inner.lock().reset_code
    }

    /// Installs the fragment receiver; only possible before the first
    /// STREAM frame arrives
    pub fn set_receiver(&self, deliver: DeliverFn) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.is_pre_recv() {
            return false;
        }
        inner.deliver = Some(deliver);
        true
    }

    /// Applies a received STREAM frame
    pub fn on_stream(&self, frame: &frame::Stream) -> Result<(), transport::Error> {
        debug_assert_eq!(frame.stream_id, self.id.as_varint());
        let Some(conn) = self.conn.upgrade() else {
            return Err(transport_error!(INTERNAL_ERROR, "connection flow state dropped"));
        };

        let mut inner = self.inner.lock();
        if !inner.state.can_recv() {
            // terminal or reset: late frames are ignored
            return Ok(());
        }

        let offset = frame.offset.as_u64();
        let end = offset
            .checked_add(frame.data.len() as u64)
            .filter(|end| VarInt::new(*end).is_ok())
            .ok_or_else(|| {
                transport_error!(FLOW_CONTROL_ERROR, "stream offset exceeds the varint range")
            })?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
        //# Once a final size for a stream is known, it cannot change.  If a
        //# RESET_STREAM or STREAM frame is received indicating a change in
        //# the final size for the stream, an endpoint MUST respond with an
        //# error of type FINAL_SIZE_ERROR.
        if let Some(final_size) = inner.final_size {
            if end > final_size || (frame.is_fin && end != final_size) {
                return Err(transport_error!(
                    FINAL_SIZE_ERROR,
                    "stream data beyond the committed final size"
                ));
            }
        } else if frame.is_fin && end < inner.limit.used().as_u64() {
            return Err(transport_error!(
                FINAL_SIZE_ERROR,
                "final size below data already received"
            ));
        }

        let prev_used = inner.limit.used().as_u64();
        let end_vi = VarInt::new(end).map_err(|_| {
            transport_error!(FLOW_CONTROL_ERROR, "stream offset exceeds the varint range")
        })?;
        inner.limit.advance_to(end_vi).map_err(|_| {
            transport_error!(FLOW_CONTROL_ERROR, "stream flow control limit exceeded")
        })?;

        let delta = inner.limit.used().as_u64() - prev_used;
        if delta > 0 {
            conn.on_recv(delta)?;
        }

        if frame.is_fin {
            inner.final_size = Some(end);
            if inner.state.on_receive_fin().is_err() {
                return Err(transport_error!(INTERNAL_ERROR, "receive state out of sync"));
            }
        } else {
            let _ = inner.state.on_receive_stream();
        }

        // hand the fragment to the application
        let fragment = Fragment {
            offset,
            data: frame.data,
            is_fin: frame.is_fin,
        };
        let mut all_delivered = false;
        if let Some(deliver) = inner.deliver.as_mut() {
            all_delivered = deliver(fragment)?;
        }
        if all_delivered && inner.state.is_size_known() {
            let _ = inner.state.on_receive_all_data();
        }

        Ok(())
    }

    /// Applies a received RESET_STREAM frame
    pub fn on_reset(&self, frame: &ResetStream) -> Result<(), transport::Error> {
        debug_assert_eq!(frame.stream_id, self.id.as_varint());
        let Some(conn) = self.conn.upgrade() else {
            return Err(transport_error!(INTERNAL_ERROR, "connection flow state dropped"));
        };

        let mut inner = self.inner.lock();
        if !inner.state.can_recv() {
            return Ok(());
        }

        let final_size = frame.final_size;
        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
        //# An endpoint SHOULD treat receipt of data at or beyond the final
        //# size as an error of type FINAL_SIZE_ERROR.
        if final_size < inner.limit.used() {
            return Err(transport_error!(
                FINAL_SIZE_ERROR,
                "reset final size below data already received"
            ));
        }
        if let Some(known) = inner.final_size {
            if known != final_size.as_u64() {
                return Err(transport_error!(
                    FINAL_SIZE_ERROR,
                    "reset final size conflicts with the committed final size"
                ));
            }
        }

        let prev_used = inner.limit.used().as_u64();
        inner.limit.advance_to(final_size).map_err(|_| {
            transport_error!(FLOW_CONTROL_ERROR, "stream flow control limit exceeded")
        })?;
        let delta = final_size.as_u64() - prev_used;
        if delta > 0 {
            conn.on_recv(delta)?;
        }

        inner.final_size = Some(final_size.as_u64());
        inner.reset_code = Some(frame.application_error_code);
        let _ = inner.state.on_reset();
        Ok(())
    }

    /// Lets the application raise the stream receive limit
    ///
    /// `decide` sees the current window and returns the new limit plus
    /// whether to emit; only strictly larger limits are transmitted.
    pub fn update_recv_limit(&self, decide: impl FnOnce(&Window) -> (VarInt, bool)) -> IoResult {
        let mut inner = self.inner.lock();
        let (new_limit, emit) = decide(&inner.limit);
        if !emit {
            return IoResult::Cancel;
        }
        if inner.limit.update_limit(new_limit) {
            inner.limit_update_pending = true;
        }
        IoResult::Ok
    }

    /// Arms a STOP_SENDING emission; sent at most once per state
    pub fn request_stop_sending(&self, code: VarInt) -> bool {
        let mut inner = self.inner.lock();
        if inner.stop_requested || !inner.state.can_stop_sending() {
            return false;
        }
        inner.stop_requested = true;
        inner.stop_code = code;
        true
    }

    /// Emits STOP_SENDING and MAX_STREAM_DATA as required
    pub fn on_transmit(&self, writer: &mut FrameWriter, waiters: &mut Waiters) -> IoResult {
        let mut inner = self.inner.lock();
        let stop = Self::transmit_stop_sending(self.id, &mut inner, writer, waiters);
        if stop == IoResult::Fatal {
            return stop;
        }
        Self::transmit_max_stream_data(self.id, &mut inner, writer, waiters)
    }

    fn transmit_stop_sending(
        id: StreamId,
        inner: &mut RecvInner,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> IoResult {
        if !inner.stop_requested {
            return IoResult::NotInIoState;
        }
        let frame = StopSending {
            stream_id: id.as_varint(),
            application_error_code: inner.stop_code,
        };

        if let Some(observer) = inner.stop_wait.clone() {
            let outstanding = observer
                .upgrade()
                .map_or(false, |record| record.is_waiting() || record.is_acked());
            // retransmit when lost or no longer of interest
            if !outstanding && inner.state.can_stop_sending() {
                if !writer.write(frame) {
                    return IoResult::NoCapacity;
                }
                inner.stop_wait = Some(ack::register(waiters));
            }
            return IoResult::Ok;
        }

        if !inner.state.can_stop_sending() {
            return IoResult::NotInIoState;
        }
        if !writer.write(frame) {
            return IoResult::NoCapacity;
        }
        inner.stop_wait = Some(ack::register(waiters));
        IoResult::Ok
    }

    fn transmit_max_stream_data(
        id: StreamId,
        inner: &mut RecvInner,
        writer: &mut FrameWriter,
        waiters: &mut Waiters,
    ) -> IoResult {
        let frame = MaxStreamData {
            stream_id: id.as_varint(),
            maximum_stream_data: inner.limit.limit(),
        };

        if inner.limit_update_pending {
            if !inner.state.can_recv() {
                inner.limit_update_pending = false;
                return IoResult::NotInIoState;
            }
            if !writer.write(frame) {
                return IoResult::NoCapacity;
            }
            inner.limit_update_pending = false;
            // a fresh record supersedes any older retransmission interest
            inner.max_data_wait = Some(ack::register(waiters));
            return IoResult::Ok;
        }

        match inner.max_data_wait.as_ref().map(Weak::upgrade) {
            Some(Some(record)) if record.is_acked() => {
                inner.max_data_wait = None;
                IoResult::Ok
            }
            Some(Some(record)) if record.is_waiting() => IoResult::Ok,
            // lost, or no longer of interest to the ack processor
            Some(_) => {
                if !inner.state.can_recv() {
                    inner.max_data_wait = None;
                    return IoResult::NotInIoState;
                }
                if !writer.write(frame) {
                    return IoResult::NoCapacity;
                }
                inner.max_data_wait = Some(ack::register(waiters));
                IoResult::Ok
            }
            None => IoResult::Ok,
        }
    }

    /// The application observed every delivered byte
    pub fn user_read_all(&self) -> bool {
        self.inner.lock().state.on_app_read_all_data().is_ok()
    }

    /// The application observed the reset
    pub fn user_read_reset(&self) -> bool {
        self.inner.lock().state.on_app_read_reset().is_ok()
    }

    #[cfg(test)]
    pub(crate) fn receiver_state(&self) -> Receiver {
        self.inner.lock().state.clone()
    }

    #[cfg(test)]
    pub(crate) fn recv_window(&self) -> (VarInt, VarInt) {
        let inner = self.inner.lock();
        (inner.limit.used(), inner.limit.limit())
    }
}
