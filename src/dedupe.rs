//! Replay and duplicate suppression
//!
//! Radios resend frames and chatty devices repeat reports; both are expected
//! steady-state behavior, not errors. A small insertion-ordered recency set
//! is enough to weed them out: the peer keeps one global ring over envelope
//! random values, and signatures may keep a private ring over a composite
//! of source address and device-level identity bytes.

use std::collections::VecDeque;

/// Number of recent values a ring remembers
pub const RING_CAPACITY: usize = 10;

/// Fixed-capacity insertion-ordered set of recently seen values
#[derive(Debug, Clone, Default)]
pub struct RecentValueRing {
    values: VecDeque<Vec<u8>>,
}

impl RecentValueRing {
    /// Create an empty ring
    pub fn new() -> Self {
        Self {
            values: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    /// Membership test with insert-on-miss
    ///
    /// Returns `true` if `value` was already present. Otherwise inserts it,
    /// evicting the oldest entry when the ring is at capacity, and returns
    /// `false`.
    pub fn seen(&mut self, value: &[u8]) -> bool {
        if self.values.iter().any(|v| v == value) {
            return true;
        }
        if self.values.len() == RING_CAPACITY {
            self.values.pop_front();
        }
        self.values.push_back(value.to_vec());
        false
    }

    /// Number of values currently remembered
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the ring is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Forget all remembered values
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_inserts_on_miss() {
        let mut ring = RecentValueRing::new();
        assert!(!ring.seen(&[1, 2, 3, 4]));
        assert!(ring.seen(&[1, 2, 3, 4]));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_eviction_of_oldest() {
        let mut ring = RecentValueRing::new();
        for i in 0..RING_CAPACITY as u8 {
            assert!(!ring.seen(&[i, 0, 0, 0]));
        }
        assert_eq!(ring.len(), RING_CAPACITY);

        // The 11th insertion evicts the oldest entry
        assert!(!ring.seen(&[0xff, 0, 0, 0]));
        assert_eq!(ring.len(), RING_CAPACITY);
        assert!(!ring.seen(&[0, 0, 0, 0]));

        // Entry 2 is still remembered at this point
        assert!(ring.seen(&[2, 0, 0, 0]));
    }

    #[test]
    fn test_composite_keys() {
        let mut ring = RecentValueRing::new();
        let mut key = b"E0:5A:1B:11:22:33".to_vec();
        key.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(!ring.seen(&key));
        assert!(ring.seen(&key));
    }

    #[test]
    fn test_clear() {
        let mut ring = RecentValueRing::new();
        ring.seen(&[1]);
        ring.clear();
        assert!(ring.is_empty());
        assert!(!ring.seen(&[1]));
    }
}
