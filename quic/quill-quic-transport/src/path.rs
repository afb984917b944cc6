// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-path state: DPLPMTUD probing and path validation.

use crate::packet::FrameWriter;
use quill_quic_core::{
    ack::{self, Record, Waiters},
    frame::{path::DATA_LEN, PathChallenge, PathResponse},
    io::IoResult,
    path::{path_rejects_quic, BinarySearcher, Config},
    transport,
    transport_error,
};
use std::{collections::VecDeque, sync::Weak};

//= https://www.rfc-editor.org/rfc/rfc8899#section-5.2
//# The DISABLED state is the initial state before probing has started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Disabled,
    Base,
    Searching,
    SearchComplete,
    Error,
}

/// DPLPMTUD probe scheduling over a single path
#[derive(Debug)]
pub struct MtuProber {
    state: State,
    config: Config,
    searcher: Option<BinarySearcher>,
    probe_count: u8,
    /// Weak observer on the outstanding probe; the ack processor owns it
    waiter: Option<Weak<Record>>,
    /// Largest datagram size confirmed on this path
    path_datagram_size: u16,
    /// Peer `max_udp_payload_size` transport parameter, once seen
    peer_max_udp_payload: Option<u16>,
}

impl MtuProber {
    pub fn new(config: Config) -> Self {
        Self {
            state: State::Disabled,
            path_datagram_size: config.base_plpmtu,
            config,
            searcher: None,
            probe_count: 0,
            waiter: None,
            peer_max_udp_payload: None,
        }
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Applies the peer's `max_udp_payload_size` transport parameter
    pub fn apply_peer_max_udp_payload(&mut self, value: u64) -> Result<(), transport::Error> {
        let value = u16::try_from(value).unwrap_or(u16::MAX);
        if path_rejects_quic(value) {
            return Err(transport_error!(
                TRANSPORT_PARAMETER_ERROR,
                "max_udp_payload_size below the QUIC minimum of 1200"
            ));
        }
        self.peer_max_udp_payload = Some(value);
        Ok(())
    }

    /// Datagram size currently usable on this path
    #[inline]
    pub fn current_datagram_size(&self) -> u16 {
        match self.peer_max_udp_payload {
            Some(peer) => peer.min(self.path_datagram_size),
            None => self.path_datagram_size,
        }
    }

    /// Starts searching once the handshake is confirmed
    pub fn on_handshake_confirmed(&mut self) {
        if !matches!(self.state, State::Disabled | State::Base) {
            return;
        }
        match BinarySearcher::new(self.config.base_plpmtu, self.config.max_plpmtu) {
            Some(searcher) => {
                self.searcher = Some(searcher);
                self.state = State::Searching;
            }
            None => self.state = State::Error,
        }
    }

    /// Returns the size of the next probe to send, if one is due
    ///
    /// Consumes the outcome of the previous probe first: an acked probe
    /// raises the confirmed floor, `max_probes` consecutive losses lower
    /// the search ceiling. Registers a fresh record for the returned
    /// probe; a record the ack processor dropped counts as a loss.
    pub fn poll_probe(&mut self, waiters: &mut Waiters) -> Option<u16> {
        if self.state != State::Searching {
            return None;
        }
        let searcher = self.searcher.as_mut()?;

        if let Some(observer) = &self.waiter {
            match observer.upgrade() {
                Some(record) if record.is_acked() => {
                    searcher.on_probe_acked();
                    self.path_datagram_size = searcher.confirmed().max(self.path_datagram_size);
                    self.probe_count = 0;
                }
                Some(record) if record.is_waiting() => {
                    // previous probe still in flight
                    return None;
                }
                _ => {
                    self.probe_count += 1;
                    if self.probe_count == self.config.max_probes {
                        searcher.on_probe_lost();
                        self.probe_count = 0;
                    }
                }
            }
        }

        if searcher.complete() {
            self.path_datagram_size = searcher.confirmed().max(self.path_datagram_size);
            self.waiter = None;
            self.state = State::SearchComplete;
            return None;
        }

        self.waiter = Some(ack::register(waiters));
        Some(searcher.next_probe_size())
    }
}

/// Path validation: a single outstanding PATH_CHALLENGE plus a FIFO of
/// responses owed to the peer
#[derive(Debug, Default)]
pub struct Verifier {
    challenge_data: [u8; DATA_LEN],
    verify_required: bool,
    /// Weak observer on the outstanding challenge
    waiter: Option<Weak<Record>>,
    pending_responses: VecDeque<[u8; DATA_LEN]>,
}

impl Verifier {
    /// Requests verification of the current path
    ///
    /// Returns `false` if a verification is already in flight.
    pub fn request_verification(&mut self, data: [u8; DATA_LEN]) -> bool {
        if self.verify_required {
            return false;
        }
        self.challenge_data = data;
        self.verify_required = true;
        true
    }

    #[inline]
    pub fn is_verifying(&self) -> bool {
        self.verify_required
    }

    /// Queues a response for a received PATH_CHALLENGE
    pub fn on_path_challenge(&mut self, frame: &PathChallenge) {
        self.pending_responses.push_back(frame.data);
    }

    /// Emits one queued PATH_RESPONSE, FIFO
    pub fn send_response(&mut self, writer: &mut FrameWriter) -> IoResult {
        let Some(&data) = self.pending_responses.front() else {
            return IoResult::NoData;
        };
        if !writer.write(PathResponse { data }) {
            return IoResult::NoCapacity;
        }
        self.pending_responses.pop_front();
        IoResult::Ok
    }

    /// Emits the pending PATH_CHALLENGE, retransmitting on loss (or when
    /// the ack processor dropped the record)
    pub fn send_challenge(&mut self, writer: &mut FrameWriter, waiters: &mut Waiters) -> IoResult {
        if !self.verify_required {
            return IoResult::NoData;
        }
        if let Some(observer) = &self.waiter {
            if let Some(record) = observer.upgrade() {
                if !record.is_lost() {
                    // acked or still in flight
                    return IoResult::Ok;
                }
            }
        }
        let frame = PathChallenge {
            data: self.challenge_data,
        };
        if !writer.write(frame) {
            return IoResult::NoCapacity;
        }
        self.waiter = Some(ack::register(waiters));
        IoResult::Ok
    }

    /// Applies a received PATH_RESPONSE
    pub fn on_path_response(&mut self, frame: &PathResponse) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.3
        //# A PATH_RESPONSE frame received on any network path validates the
        //# path on which the PATH_CHALLENGE was sent.
        if !self.verify_required {
            return Err(transport_error!(
                PROTOCOL_VIOLATION,
                "PATH_RESPONSE received without a pending PATH_CHALLENGE"
            ));
        }
        if self.challenge_data != frame.data {
            return Err(transport_error!(
                PROTOCOL_VIOLATION,
                "PATH_RESPONSE data does not match the sent PATH_CHALLENGE"
            ));
        }
        self.waiter = None;
        self.verify_required = false;
        Ok(())
    }
}
