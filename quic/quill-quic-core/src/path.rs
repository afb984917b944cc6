// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! DPLPMTUD search primitives.

//= https://www.rfc-editor.org/rfc/rfc8899#section-5.1.2
//# When using IPv4, there is no currently equivalent size specified,
//# and a default BASE_PLPMTU of 1200 bytes is RECOMMENDED.
pub const BASE_PLPMTU: u16 = 1200;

/// The smallest datagram size every QUIC path must support
pub const INITIAL_DATAGRAM_SIZE_LIMIT: u16 = 1200;

/// Largest payload a UDP datagram can carry
pub const MAX_PLPMTU: u16 = u16::MAX;

/// A path which cannot carry 1200-byte datagrams cannot carry QUIC v1
#[inline]
pub const fn path_rejects_quic(datagram_limit: u16) -> bool {
    datagram_limit < INITIAL_DATAGRAM_SIZE_LIMIT
}

/// DPLPMTUD probing parameters
#[derive(Clone, Copy, Debug)]
pub struct Config {
    //= https://www.rfc-editor.org/rfc/rfc8899#section-5.1.2
    //# The default value of MAX_PROBES is 3.
    pub max_probes: u8,
    pub base_plpmtu: u16,
    pub max_plpmtu: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_probes: 3,
            base_plpmtu: BASE_PLPMTU,
            max_plpmtu: MAX_PLPMTU,
        }
    }
}

/// Binary search over candidate PLPMTU sizes
///
/// The search narrows `[low, high]` to within `accuracy` and then performs
/// one additional probe at `high` so an unconfirmed upper bound is never
/// reported as the result.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinarySearcher {
    low: u16,
    high: u16,
    mid: u16,
    accuracy: u16,
    high_confirmed: bool,
}

impl BinarySearcher {
    pub fn new(low: u16, high: u16) -> Option<Self> {
        Self::with_accuracy(low, high, 1)
    }

    pub fn with_accuracy(low: u16, high: u16, accuracy: u16) -> Option<Self> {
        if low > high {
            return None;
        }
        let mut searcher = Self {
            low,
            high,
            mid: 0,
            accuracy,
            high_confirmed: false,
        };
        searcher.update_next();
        Some(searcher)
    }

    #[inline]
    fn narrowed(&self) -> bool {
        self.high - self.low <= self.accuracy
    }

    fn update_next(&mut self) {
        if self.narrowed() && !self.high_confirmed {
            if self.mid != self.high {
                self.mid = self.high;
                return;
            }
            self.high_confirmed = true;
            return;
        }
        self.mid = self.low + ((self.high - self.low) >> 1);
    }

    /// True once the search has converged on a confirmed value
    #[inline]
    pub fn complete(&self) -> bool {
        self.narrowed() && self.high_confirmed
    }

    /// Size of the next probe to send
    #[inline]
    pub fn next_probe_size(&self) -> u16 {
        self.mid
    }

    /// The largest size confirmed by an acknowledged probe
    #[inline]
    pub fn confirmed(&self) -> u16 {
        self.low
    }

    pub fn on_probe_acked(&mut self) {
        self.low = self.mid;
        self.update_next();
    }

    pub fn on_probe_lost(&mut self) {
        self.high = self.mid;
        self.high_confirmed = true;
        self.update_next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(low: u16, high: u16, steps: usize, mtu: u16) -> BinarySearcher {
        let mut searcher = BinarySearcher::new(low, high).unwrap();
        let mut taken = 0;
        while taken < steps && !searcher.complete() {
            let probe = searcher.next_probe_size();
            assert!((low..=high).contains(&probe), "probe {probe} out of range");
            if probe > mtu {
                searcher.on_probe_lost();
            } else {
                searcher.on_probe_acked();
            }
            taken += 1;
        }
        searcher
    }

    #[test]
    fn converges_within_log_bound() {
        // range of 300 converges within ceil(log2(300)) + 1 = 10 steps
        let searcher = search(1200, 1500, 8, 1350);
        assert!(searcher.complete());
        assert_eq!(searcher.confirmed(), 1350);
    }

    #[test]
    fn converges_at_range_top() {
        let searcher = search(1200, 1500, 10, 1500);
        assert!(searcher.complete());
        assert_eq!(searcher.confirmed(), 1500);
    }

    #[test]
    fn converges_at_range_bottom() {
        let searcher = search(1200, 1500, 10, 1200);
        assert!(searcher.complete());
        assert_eq!(searcher.confirmed(), 1200);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(BinarySearcher::new(1500, 1200).is_none());
    }
}
