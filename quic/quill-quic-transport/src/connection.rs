// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection ID lifecycle: local issuance, peer acceptance, retirement
//! and the NEW_CONNECTION_ID / RETIRE_CONNECTION_ID emission loops.

use crate::packet::FrameWriter;
use quill_quic_core::{
    ack::{self, Record, Waiters},
    connection::{Id, StatelessResetToken, MAX_ID_LEN},
    frame::{NewConnectionId, RetireConnectionId},
    io::IoResult,
    random,
    transport,
    transport_error,
    varint::VarInt,
};
use smallvec::SmallVec;
use std::sync::Weak;

/// A locally issued connection ID handed out to the peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IssuedId {
    pub sequence_number: VarInt,
    pub id: Id,
    pub stateless_reset_token: StatelessResetToken,
}

#[derive(Debug)]
struct IssuedEntry {
    issued: IssuedId,
    retire_prior_to: VarInt,
    /// Weak observer; the ack processor owns the record itself
    waiter: Option<Weak<Record>>,
    /// Set once the peer has acknowledged the NEW_CONNECTION_ID frame
    needless_ack: bool,
}

/// Issues fresh connection IDs with strictly increasing sequence numbers
#[derive(Debug, Default)]
pub struct Issuer {
    next_sequence: u64,
    entries: SmallVec<[IssuedEntry; 4]>,
    pub use_zero_length: bool,
}

impl Issuer {
    /// Generates a fresh random connection ID and reset token
    ///
    /// Returns `None` when zero-length mode is active, `len` is out of
    /// range, or the random source fails.
    pub fn issue(
        &mut self,
        len: usize,
        needless_ack: bool,
        random: &mut dyn random::Generator,
    ) -> Option<IssuedId> {
        if self.use_zero_length || len == 0 || len > MAX_ID_LEN {
            return None;
        }

        let mut bytes = [0u8; MAX_ID_LEN];
        if !random.fill(&mut bytes[..len]) {
            return None;
        }
        let mut token = StatelessResetToken::ZEROED;
        if !random.fill(token.as_mut()) {
            return None;
        }

        let issued = IssuedId {
            sequence_number: VarInt::new(self.next_sequence).ok()?,
            id: Id::try_from_bytes(&bytes[..len])?,
            stateless_reset_token: token,
        };
        self.next_sequence += 1;
        self.entries.push(IssuedEntry {
            issued,
            retire_prior_to: VarInt::ZERO,
            waiter: None,
            needless_ack,
        });
        Some(issued)
    }

    /// Removes an issued ID the peer has retired; unknown sequences are
    /// silently ignored
    pub fn on_retire_connection_id(&mut self, frame: &RetireConnectionId) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.issued.sequence_number != frame.sequence_number);
        before != self.entries.len()
    }

    /// Any issued ID usable for routing incoming datagrams
    pub fn pick_id(&self) -> Option<Id> {
        self.entries.first().map(|entry| entry.issued.id)
    }

    /// Emits NEW_CONNECTION_ID for every issued ID still awaiting an ack
    ///
    /// A frame goes out when no emission is outstanding or the previous
    /// one was lost (or its record was dropped by the ack processor); an
    /// acked record clears and marks the entry `needless_ack`.
    pub fn on_transmit(&mut self, writer: &mut FrameWriter, waiters: &mut Waiters) -> IoResult {
        for entry in &mut self.entries {
            if entry.needless_ack {
                continue;
            }
            match entry.waiter.as_ref().map(Weak::upgrade) {
                Some(Some(record)) if record.is_acked() => {
                    entry.waiter = None;
                    entry.needless_ack = true;
                }
                // still in flight
                Some(Some(record)) if record.is_waiting() => {}
                // never sent, lost, or no longer of interest
                _ => {
                    let frame = NewConnectionId {
                        sequence_number: entry.issued.sequence_number,
                        retire_prior_to: entry.retire_prior_to,
                        connection_id: entry.issued.id,
                        stateless_reset_token: entry.issued.stateless_reset_token,
                    };
                    if !writer.write(frame) {
                        return IoResult::NoCapacity;
                    }
                    entry.waiter = Some(ack::register(waiters));
                }
            }
        }
        IoResult::Ok
    }
}

#[derive(Debug)]
struct AcceptedEntry {
    sequence_number: VarInt,
    id: Id,
    stateless_reset_token: StatelessResetToken,
}

#[derive(Debug)]
struct RetireEntry {
    sequence_number: VarInt,
    waiter: Option<Weak<Record>>,
}

/// Tracks connection IDs issued by the peer
#[derive(Debug, Default)]
pub struct Acceptor {
    max_sequence: Option<VarInt>,
    entries: SmallVec<[AcceptedEntry; 4]>,
    retire_queue: SmallVec<[RetireEntry; 2]>,
    pub use_zero_length: bool,
}

impl Acceptor {
    /// Stores a peer-issued connection ID
    pub fn accept(
        &mut self,
        sequence_number: VarInt,
        id: Id,
        stateless_reset_token: StatelessResetToken,
    ) -> bool {
        if self
            .entries
            .iter()
            .any(|entry| entry.sequence_number == sequence_number)
        {
            return true;
        }
        self.entries.push(AcceptedEntry {
            sequence_number,
            id,
            stateless_reset_token,
        });
        if self.max_sequence.map_or(true, |max| sequence_number > max) {
            self.max_sequence = Some(sequence_number);
        }
        true
    }

    /// Retires a single sequence, queueing a RETIRE_CONNECTION_ID emission
    pub fn retire(&mut self, sequence_number: VarInt) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.sequence_number != sequence_number);
        if before == self.entries.len() {
            return false;
        }
        self.retire_queue.push(RetireEntry {
            sequence_number,
            waiter: None,
        });
        true
    }

    /// Retires every sequence below `sequence_number`
    pub fn retire_prior_to(&mut self, sequence_number: VarInt) {
        let retired: SmallVec<[VarInt; 4]> = self
            .entries
            .iter()
            .filter(|entry| entry.sequence_number < sequence_number)
            .map(|entry| entry.sequence_number)
            .collect();
        for sequence in retired {
            self.retire(sequence);
        }
    }

    /// Any peer-issued ID usable as a destination connection ID
    pub fn pick_id(&self) -> Option<Id> {
        self.entries.first().map(|entry| entry.id)
    }

    pub fn stateless_reset_token_for(&self, id: &Id) -> Option<StatelessResetToken> {
        self.entries
            .iter()
            .find(|entry| entry.id == *id)
            .map(|entry| entry.stateless_reset_token)
    }

    /// Emits RETIRE_CONNECTION_ID for queued retirements, with the same
    /// record lifecycle as NEW_CONNECTION_ID
    pub fn on_transmit(&mut self, writer: &mut FrameWriter, waiters: &mut Waiters) -> IoResult {
        let mut index = 0;
        while index < self.retire_queue.len() {
            let entry = &mut self.retire_queue[index];
            match entry.waiter.as_ref().map(Weak::upgrade) {
                Some(Some(record)) if record.is_acked() => {
                    self.retire_queue.remove(index);
                    continue;
                }
                Some(Some(record)) if record.is_waiting() => {}
                _ => {
                    let frame = RetireConnectionId {
                        sequence_number: entry.sequence_number,
                    };
                    if !writer.write(frame) {
                        return IoResult::NoCapacity;
                    }
                    entry.waiter = Some(ack::register(waiters));
                }
            }
            index += 1;
        }
        IoResult::Ok
    }
}

/// Owns both directions of the connection ID lifecycle
#[derive(Debug, Default)]
pub struct Manager {
    pub issuer: Issuer,
    pub acceptor: Acceptor,
}

impl Manager {
    /// Applies a received NEW_CONNECTION_ID frame
    pub fn on_new_connection_id(&mut self, frame: &NewConnectionId) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# An endpoint that is sending packets with a zero-length
        //# Destination Connection ID MUST treat receipt of a
        //# NEW_CONNECTION_ID frame as a connection error of type
        //# PROTOCOL_VIOLATION.
        if self.acceptor.use_zero_length {
            return Err(transport_error!(
                PROTOCOL_VIOLATION,
                "NEW_CONNECTION_ID received while using zero-length connection IDs"
            ));
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# Values less than 1 and greater than 20 are invalid and MUST be
        //# treated as a connection error of type FRAME_ENCODING_ERROR.
        if frame.connection_id.is_empty() {
            return Err(transport_error!(
                FRAME_ENCODING_ERROR,
                "invalid connection ID length for QUIC version 1"
            ));
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# Receiving a value in the Retire Prior To field that is greater
        //# than that in the Sequence Number field MUST be treated as a
        //# connection error of type FRAME_ENCODING_ERROR.
        if frame.retire_prior_to > frame.sequence_number {
            return Err(transport_error!(
                FRAME_ENCODING_ERROR,
                "retire_prior_to is greater than sequence_number"
            ));
        }

        self.acceptor.retire_prior_to(frame.retire_prior_to);
        self.acceptor.accept(
            frame.sequence_number,
            frame.connection_id,
            frame.stateless_reset_token,
        );
        Ok(())
    }

    pub fn on_retire_connection_id(&mut self, frame: &RetireConnectionId) {
        self.issuer.on_retire_connection_id(frame);
    }

    /// Runs both emission loops
    pub fn on_transmit(&mut self, writer: &mut FrameWriter, waiters: &mut Waiters) -> IoResult {
        let result = self.issuer.on_transmit(writer, waiters);
        if result != IoResult::Ok {
            return result;
        }
        self.acceptor.on_transmit(writer, waiters)
    }

    /// Seats the handshake-provided destination ID at sequence 0
    pub fn accept_initial(&mut self, id: Id) -> bool {
        if self.acceptor.max_sequence.is_some() {
            return false;
        }
        self.acceptor
            .accept(VarInt::ZERO, id, StatelessResetToken::ZEROED)
    }

    /// Patches the sequence-0 reset token once transport parameters arrive
    pub fn apply_initial_stateless_reset_token(&mut self, token: StatelessResetToken) {
        if let Some(entry) = self
            .acceptor
            .entries
            .iter_mut()
            .find(|entry| entry.sequence_number == VarInt::ZERO)
        {
            entry.stateless_reset_token = token;
        }
    }

    /// Seats a preferred-address connection ID at sequence 1
    pub fn accept_preferred_address(&mut self, id: Id, token: StatelessResetToken) -> bool {
        self.acceptor.accept(VarInt::from_u8(1), id, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_codec::EncoderBuffer;
    use quill_quic_core::random::testing::{Broken, Sequential};
    use std::sync::Arc;

    fn transmit<R>(f: impl FnOnce(&mut FrameWriter, &mut Waiters) -> R) -> (R, usize, Waiters) {
        let mut storage = [0u8; 1200];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let mut waiters = Waiters::new();
        let result = {
            let mut writer = FrameWriter::new(&mut encoder);
            f(&mut writer, &mut waiters)
        };
        let written = encoder.as_slice().len();
        (result, written, waiters)
    }

    #[test]
    fn issued_sequences_strictly_increase() {
        let mut issuer = Issuer::default();
        let mut random = Sequential::default();
        let mut last = None;
        for round in 0..5 {
            let issued = issuer.issue(8, false, &mut random).unwrap();
            if let Some(last) = last {
                assert!(issued.sequence_number > last);
            }
            last = Some(issued.sequence_number);
            // retiring an id must not reset the sequence counter
            if round == 2 {
                issuer.on_retire_connection_id(&RetireConnectionId {
                    sequence_number: issued.sequence_number,
                });
            }
        }
    }

    #[test]
    fn issue_failure_modes() {
        let mut issuer = Issuer::default();
        assert!(issuer.issue(0, false, &mut Sequential::default()).is_none());
        assert!(issuer.issue(21, false, &mut Sequential::default()).is_none());
        assert!(issuer.issue(8, false, &mut Broken).is_none());
        issuer.use_zero_length = true;
        assert!(issuer.issue(8, false, &mut Sequential::default()).is_none());
    }

    #[test]
    fn new_connection_id_emission_lifecycle() {
        let mut issuer = Issuer::default();
        issuer.issue(8, false, &mut Sequential::default()).unwrap();

        // first pass emits and registers a record for the ack processor
        let (result, written, first) = transmit(|w, v| issuer.on_transmit(w, v));
        assert_eq!(result, IoResult::Ok);
        assert!(written > 0);
        assert_eq!(first.len(), 1);
        // the issuer keeps only a weak observer
        assert!(Arc::weak_count(&first[0]) == 1);

        // in flight: nothing new goes out
        let (_, written, waiters) = transmit(|w, v| issuer.on_transmit(w, v));
        assert_eq!(written, 0);
        assert!(waiters.is_empty());

        // lost: retransmitted with a fresh record
        first[0].on_lost();
        let (_, written, second) = transmit(|w, v| issuer.on_transmit(w, v));
        assert!(written > 0);
        assert_eq!(second.len(), 1);

        // acked: cleared and never sent again
        second[0].on_ack();
        let (_, written, _) = transmit(|w, v| issuer.on_transmit(w, v));
        assert_eq!(written, 0);
        assert!(issuer.entries[0].needless_ack);
    }

    #[test]
    fn zero_length_mode_rejects_new_connection_id() {
        let mut manager = Manager::default();
        manager.acceptor.use_zero_length = true;
        let frame = NewConnectionId {
            sequence_number: VarInt::from_u8(1),
            retire_prior_to: VarInt::ZERO,
            connection_id: Id::try_from_bytes(&[1, 2, 3, 4]).unwrap(),
            stateless_reset_token: StatelessResetToken::ZEROED,
        };
        let error = manager.on_new_connection_id(&frame).unwrap_err();
        assert_eq!(error.code, transport::Error::PROTOCOL_VIOLATION);
    }

    #[test]
    fn invalid_new_connection_id_fields() {
        let mut manager = Manager::default();

        let empty = NewConnectionId {
            sequence_number: VarInt::from_u8(1),
            retire_prior_to: VarInt::ZERO,
            connection_id: Id::EMPTY,
            stateless_reset_token: StatelessResetToken::ZEROED,
        };
        let error = manager.on_new_connection_id(&empty).unwrap_err();
        assert_eq!(error.code, transport::Error::FRAME_ENCODING_ERROR);

        let inverted = NewConnectionId {
            sequence_number: VarInt::from_u8(1),
            retire_prior_to: VarInt::from_u8(2),
            connection_id: Id::try_from_bytes(&[1, 2, 3, 4]).unwrap(),
            stateless_reset_token: StatelessResetToken::ZEROED,
        };
        let error = manager.on_new_connection_id(&inverted).unwrap_err();
        assert_eq!(error.code, transport::Error::FRAME_ENCODING_ERROR);
    }

    #[test]
    fn retire_prior_to_advances_acceptor() {
        let mut manager = Manager::default();
        assert!(manager.accept_initial(Id::try_from_bytes(&[9; 8]).unwrap()));

        for seq in 1u8..=3 {
            let frame = NewConnectionId {
                sequence_number: VarInt::from_u8(seq),
                retire_prior_to: VarInt::ZERO,
                connection_id: Id::try_from_bytes(&[seq; 8]).unwrap(),
                stateless_reset_token: StatelessResetToken::ZEROED,
            };
            manager.on_new_connection_id(&frame).unwrap();
        }

        // retire everything below 3
        let frame = NewConnectionId {
            sequence_number: VarInt::from_u8(4),
            retire_prior_to: VarInt::from_u8(3),
            connection_id: Id::try_from_bytes(&[4; 8]).unwrap(),
            stateless_reset_token: StatelessResetToken::ZEROED,
        };
        manager.on_new_connection_id(&frame).unwrap();

        assert_eq!(manager.acceptor.entries.len(), 2);
        assert!(manager
            .acceptor
            .entries
            .iter()
            .all(|entry| entry.sequence_number >= VarInt::from_u8(3)));
        // three retirements queued for emission
        assert_eq!(manager.acceptor.retire_queue.len(), 3);

        let (result, written, waiters) = transmit(|w, v| manager.on_transmit(w, v));
        assert_eq!(result, IoResult::Ok);
        assert!(written > 0);
        assert_eq!(waiters.len(), 3);
    }

    #[test]
    fn unknown_retirement_is_ignored() {
        let mut manager = Manager::default();
        manager.on_retire_connection_id(&RetireConnectionId {
            sequence_number: VarInt::from_u8(42),
        });
    }
}
