// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flow-control windows used at both the stream and connection level.

use crate::varint::VarInt;

/// A `{used, limit}` pair tracking one direction of flow control
///
/// `limit` only moves forward; `used` never exceeds `limit` after a
/// successful update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Window {
    used: VarInt,
    limit: VarInt,
}

impl Window {
    #[inline]
    pub fn new(limit: VarInt) -> Self {
        Self {
            used: VarInt::ZERO,
            limit,
        }
    }

    #[inline]
    pub fn used(&self) -> VarInt {
        self.used
    }

    #[inline]
    pub fn limit(&self) -> VarInt {
        self.limit
    }

    /// Bytes which may still be consumed before hitting the limit
    #[inline]
    pub fn available(&self) -> u64 {
        self.limit.as_u64() - self.used.as_u64()
    }

    /// Raises the limit; smaller or equal values are ignored
    #[inline]
    pub fn update_limit(&mut self, limit: VarInt) -> bool {
        if limit <= self.limit {
            return false;
        }
        self.limit = limit;
        true
    }

    /// Consumes `len` additional bytes, failing if the limit would be exceeded
    #[inline]
    pub fn consume(&mut self, len: u64) -> Result<(), FlowError> {
        let used = VarInt::new(self.used.as_u64() + len).map_err(|_| FlowError)?;
        if used > self.limit {
            return Err(FlowError);
        }
        self.used = used;
        Ok(())
    }

    /// Advances `used` to the high-water mark `offset`, failing if the limit
    /// would be exceeded. Offsets at or below the current mark are no-ops.
    #[inline]
    pub fn advance_to(&mut self, offset: VarInt) -> Result<(), FlowError> {
        if offset <= self.used {
            return Ok(());
        }
        if offset > self.limit {
            return Err(FlowError);
        }
        self.used = offset;
        Ok(())
    }
}

/// The window limit was exceeded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_monotonic() {
        let mut window = Window::new(VarInt::from_u8(100));
        assert!(!window.update_limit(VarInt::from_u8(50)));
        assert!(!window.update_limit(VarInt::from_u8(100)));
        assert!(window.update_limit(VarInt::from_u8(150)));
        assert_eq!(window.limit(), VarInt::from_u8(150));
    }

    #[test]
    fn consume_respects_limit() {
        let mut window = Window::new(VarInt::from_u8(10));
        window.consume(6).unwrap();
        assert_eq!(window.available(), 4);
        assert_eq!(window.consume(5), Err(FlowError));
        window.consume(4).unwrap();
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn advance_is_high_water() {
        let mut window = Window::new(VarInt::from_u8(10));
        window.advance_to(VarInt::from_u8(4)).unwrap();
        window.advance_to(VarInt::from_u8(2)).unwrap();
        assert_eq!(window.used(), VarInt::from_u8(4));
        assert_eq!(window.advance_to(VarInt::from_u8(11)), Err(FlowError));
    }
}
