// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection-level flow control shared by every stream.

use crate::packet::FrameWriter;
use parking_lot::Mutex;
use quill_quic_core::{
    ack::{self, Record, Waiters},
    flow::Window,
    frame::{MaxData, DataBlocked},
    io::IoResult,
    transport,
    transport_error,
    varint::VarInt,
};
use std::sync::Weak;

#[derive(Debug, Default)]
struct MaxDataState {
    /// Weak observer; the ack processor owns the record itself
    waiter: Option<Weak<Record>>,
    update_pending: bool,
}

/// Send and receive byte budgets for the whole connection
///
/// The send window is consulted (and consumed) by stream transmission
/// under a dedicated lock nested inside the stream lock; the receive
/// window is charged by stream receipt.
#[derive(Debug)]
pub struct FlowController {
    send: Mutex<Window>,
    recv: Mutex<Window>,
    max_data: Mutex<MaxDataState>,
}

impl FlowController {
    pub fn new(send_limit: VarInt, recv_limit: VarInt) -> Self {
        Self {
            send: Mutex::new(Window::new(send_limit)),
            recv: Mutex::new(Window::new(recv_limit)),
            max_data: Mutex::new(MaxDataState::default()),
        }
    }

    /// Runs `f` under the connection send-flow lock
    ///
    /// Callers must keep the critical section short: every sending stream
    /// serializes on this lock.
    #[inline]
    pub fn with_send<R>(&self, f: impl FnOnce(&mut Window) -> R) -> R {
        f(&mut self.send.lock())
    }

    /// Applies a peer MAX_DATA frame
    pub fn on_max_data(&self, frame: &MaxData) -> bool {
        self.send.lock().update_limit(frame.maximum_data)
    }

    /// Charges `delta` newly received bytes against the receive window
    pub fn on_recv(&self, delta: u64) -> Result<(), transport::Error> {
        self.recv.lock().consume(delta).map_err(|_| {
            transport_error!(
                FLOW_CONTROL_ERROR,
                "connection flow control limit exceeded"
            )
        })
    }

    /// Lets the application raise the connection receive limit
    ///
    /// `decide` sees the current window and returns the new limit plus
    /// whether to emit; only strictly larger limits are transmitted.
    pub fn update_recv_limit(&self, decide: impl FnOnce(&Window) -> (VarInt, bool)) -> IoResult {
        let mut recv = self.recv.lock();
        let (new_limit, emit) = decide(&recv);
        if !emit {
            return IoResult::Cancel;
        }
        if recv.update_limit(new_limit) {
            self.max_data.lock().update_pending = true;
        }
        IoResult::Ok
    }

    /// Emits MAX_DATA when the limit was raised, retransmitting when the
    /// previous emission was lost or its record dropped
    pub fn on_transmit(&self, writer: &mut FrameWriter, waiters: &mut Waiters) -> IoResult {
        let limit = self.recv.lock().limit();
        let mut state = self.max_data.lock();

        if state.update_pending {
            let frame = MaxData { maximum_data: limit };
            if !writer.write(frame) {
                return IoResult::NoCapacity;
            }
            state.update_pending = false;
            state.waiter = Some(ack::register(waiters));
            return IoResult::Ok;
        }

        match state.waiter.as_ref().map(Weak::upgrade) {
            Some(Some(record)) if record.is_acked() => {
                state.waiter = None;
                IoResult::Ok
            }
            Some(Some(record)) if record.is_waiting() => IoResult::Ok,
            // lost, or no longer of interest to the ack processor
            Some(_) => {
                let frame = MaxData { maximum_data: limit };
                if !writer.write(frame) {
                    return IoResult::NoCapacity;
                }
                state.waiter = Some(ack::register(waiters));
                IoResult::Ok
            }
            None => IoResult::Ok,
        }
    }

    /// Emits DATA_BLOCKED at the current connection limit
    pub fn send_data_blocked(&self, writer: &mut FrameWriter, limit: VarInt) -> IoResult {
        let frame = DataBlocked { data_limit: limit };
        if !writer.write(frame) {
            return IoResult::NoCapacity;
        }
        IoResult::Ok
    }

    #[cfg(test)]
    pub(crate) fn send_window(&self) -> (VarInt, VarInt) {
        let window = self.send.lock();
        (window.used(), window.limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_codec::EncoderBuffer;

    #[test]
    fn recv_limit_updates_are_monotonic_and_emitted_once() {
        let flow = FlowController::new(VarInt::from_u32(1000), VarInt::from_u32(1000));

        // shrinking or refusing yields no emission
        assert_eq!(
            flow.update_recv_limit(|window| (window.limit(), false)),
            IoResult::Cancel
        );
        assert_eq!(
            flow.update_recv_limit(|window| (window.limit(), true)),
            IoResult::Ok
        );
        assert!(!flow.max_data.lock().update_pending);

        flow.update_recv_limit(|_| (VarInt::from_u32(2000), true));
        assert!(flow.max_data.lock().update_pending);

        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let mut waiters = Waiters::new();
        {
            let mut writer = FrameWriter::new(&mut encoder);
            assert_eq!(flow.on_transmit(&mut writer, &mut waiters), IoResult::Ok);
            // second call has nothing new to say
            assert_eq!(flow.on_transmit(&mut writer, &mut waiters), IoResult::Ok);
        }
        assert_eq!(waiters.len(), 1);
    }

    #[test]
    fn recv_overflow_is_flow_control_error() {
        let flow = FlowController::new(VarInt::from_u32(1000), VarInt::from_u32(10));
        flow.on_recv(10).unwrap();
        let error = flow.on_recv(1).unwrap_err();
        assert_eq!(error.code, transport::Error::FLOW_CONTROL_ERROR);
    }
}
