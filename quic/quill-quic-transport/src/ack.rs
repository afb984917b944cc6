// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The ACK processor: maps in-flight packet numbers to the ack/lost
//! records registered while the packet was built.
//!
//! The tracker owns the only strong record handles. Senders keep weak
//! observers; a record marked acked or lost stays retained here until
//! every observer has dropped its handle, so outcomes are never torn away
//! before they can be read.

use core::ops::RangeInclusive;
use hashbrown::HashMap;
use quill_quic_core::{
    ack::{mark_as_acked, mark_as_lost, Record, Waiters},
    frame, transport,
};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Tracker {
    in_flight: HashMap<u64, Waiters>,
    /// Records already marked, held until unobserved
    resolved: Vec<Arc<Record>>,
}

impl Tracker {
    /// Takes ownership of the records registered while building
    /// `packet_number`
    ///
    /// Packets with no ack-eliciting interest carry no records and are not
    /// tracked.
    pub fn on_packet_sent(&mut self, packet_number: u64, waiters: Waiters) {
        self.sweep();
        if waiters.is_empty() {
            return;
        }
        self.in_flight
            .entry(packet_number)
            .or_default()
            .extend(waiters);
    }

    /// Applies a decoded ACK frame
    pub fn on_ack_frame(&mut self, ack: &frame::Ack) -> Result<(), transport::Error> {
        let ranges = ack.acked_ranges()?;
        self.on_ack_ranges(&ranges);
        Ok(())
    }

    /// Marks every packet covered by `ranges` as acknowledged
    pub fn on_ack_ranges(&mut self, ranges: &[RangeInclusive<u64>]) {
        let mut resolved = Vec::new();
        self.in_flight.retain(|packet_number, waiters| {
            if ranges.iter().any(|range| range.contains(packet_number)) {
                mark_as_acked(waiters);
                resolved.append(waiters);
                return false;
            }
            true
        });
        self.resolved.extend(resolved);
        self.sweep();
    }

    /// Declares a single packet lost
    pub fn on_packet_loss(&mut self, packet_number: u64) {
        if let Some(waiters) = self.in_flight.remove(&packet_number) {
            mark_as_lost(&waiters);
            self.resolved.extend(waiters);
        }
        self.sweep();
    }

    /// Declares every unacked packet below `packet_number` lost
    pub fn on_loss_before(&mut self, packet_number: u64) {
        let mut resolved = Vec::new();
        self.in_flight.retain(|sent, waiters| {
            if *sent < packet_number {
                mark_as_lost(waiters);
                resolved.append(waiters);
                return false;
            }
            true
        });
        self.resolved.extend(resolved);
        self.sweep();
    }

    /// Drops resolved records every observer has lost interest in
    fn sweep(&mut self) {
        self.resolved
            .retain(|record| Arc::weak_count(record) > 0);
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    #[cfg(test)]
    pub(crate) fn resolved_len(&self) -> usize {
        self.resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_quic_core::ack;
    use std::sync::Weak;

    fn tracked(tracker: &mut Tracker, packet_number: u64) -> Weak<Record> {
        let mut waiters = Waiters::new();
        let observer = ack::register(&mut waiters);
        tracker.on_packet_sent(packet_number, waiters);
        observer
    }

    #[test]
    fn ack_and_loss_flip_records() {
        let mut tracker = Tracker::default();
        let acked = tracked(&mut tracker, 1);
        let lost = tracked(&mut tracker, 2);
        let waiting = tracked(&mut tracker, 5);

        tracker.on_ack_ranges(&[0..=1]);
        tracker.on_packet_loss(2);

        assert!(acked.upgrade().unwrap().is_acked());
        assert!(lost.upgrade().unwrap().is_lost());
        assert!(waiting.upgrade().unwrap().is_waiting());
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn loss_before_sweeps_older_packets() {
        let mut tracker = Tracker::default();
        let old = tracked(&mut tracker, 3);
        let new = tracked(&mut tracker, 9);

        tracker.on_loss_before(9);
        assert!(old.upgrade().unwrap().is_lost());
        assert!(new.upgrade().unwrap().is_waiting());
    }

    #[test]
    fn resolved_records_outlive_marking_until_unobserved() {
        let mut tracker = Tracker::default();
        let observer = tracked(&mut tracker, 7);

        // the outcome stays readable while an observer remains
        tracker.on_ack_ranges(&[7..=7]);
        assert_eq!(tracker.resolved_len(), 1);
        assert!(observer.upgrade().unwrap().is_acked());

        // once the observer drops, the next sweep frees the record
        drop(observer);
        tracker.on_ack_ranges(&[]);
        assert_eq!(tracker.resolved_len(), 0);
    }
}
