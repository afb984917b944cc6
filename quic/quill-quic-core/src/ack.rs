// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared ack/lost records.
//!
//! A record is created in the `Wait` state while the frame it tracks is in
//! flight. The ACK processor owns the only strong handles and flips records
//! to `Acked` or `Lost`; senders observe through `Weak` handles and treat a
//! dead record as "no longer of interest".

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const WAIT: u8 = 0;
const ACKED: u8 = 1;
const LOST: u8 = 2;

/// An atomic three-state ack/lost cell
#[derive(Debug, Default)]
pub struct Record {
    state: AtomicU8,
}

impl Record {
    /// Returns a fresh record in the `Wait` state behind a strong handle
    ///
    /// Strong handles belong to the ACK processor; emitters should go
    /// through [`register`] and keep only the weak observer it returns.
    #[inline]
    pub fn waiter() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn on_ack(&self) {
        self.state.store(ACKED, Ordering::Release);
    }

    #[inline]
    pub fn on_lost(&self) {
        self.state.store(LOST, Ordering::Release);
    }

    #[inline]
    pub fn is_acked(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACKED
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.state.load(Ordering::Acquire) == LOST
    }

    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.state.load(Ordering::Acquire) == WAIT
    }
}

/// The records registered while building a single packet
///
/// These are the strong handles; the ACK processor takes ownership of the
/// whole set once the packet number is known.
pub type Waiters = Vec<Arc<Record>>;

/// Creates a fresh record for a frame being emitted
///
/// The strong handle joins `waiters` — bound for the ACK processor — and
/// the emitter keeps only the returned weak observer.
#[inline]
pub fn register(waiters: &mut Waiters) -> Weak<Record> {
    let record = Record::waiter();
    let observer = Arc::downgrade(&record);
    waiters.push(record);
    observer
}

/// Marks every record in `waiters` as acknowledged
#[inline]
pub fn mark_as_acked(waiters: &[Arc<Record>]) {
    for record in waiters {
        record.on_ack();
    }
}

/// Marks every record in `waiters` as lost
#[inline]
pub fn mark_as_lost(waiters: &[Arc<Record>]) {
    for record in waiters {
        record.on_lost();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_flips() {
        let record = Record::waiter();
        assert!(record.is_waiting());
        record.on_ack();
        assert!(record.is_acked());
        record.on_lost();
        assert!(record.is_lost());
    }

    #[test]
    fn register_hands_out_weak_observers() {
        let mut waiters = Waiters::new();
        let observer = register(&mut waiters);
        assert!(observer.upgrade().unwrap().is_waiting());

        mark_as_acked(&waiters);
        assert!(observer.upgrade().unwrap().is_acked());

        // once the processor drops its interest the observer goes dead
        drop(waiters);
        assert!(observer.upgrade().is_none());
    }

    #[test]
    fn marking_covers_the_whole_set() {
        let mut waiters = Waiters::new();
        let first = register(&mut waiters);
        let second = register(&mut waiters);
        mark_as_lost(&waiters);
        assert!(first.upgrade().unwrap().is_lost());
        assert!(second.upgrade().unwrap().is_lost());
    }
}
