//! Per-source replay protection.
//!
//! The mesh relays and repeats frames, so the same message can reach the
//! gateway several times, and a rebooting neighbour may replay old
//! traffic. The cache keeps the largest sequence number accepted per
//! source unicast address; anything at or below it is discarded before
//! model decoding.

use std::collections::HashMap;

/// Source address → highest accepted sequence number.
#[derive(Debug, Default)]
pub struct ReplayCache {
    cache: HashMap<u16, u32>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept iff `seq` is strictly greater than the recorded value;
    /// unknown sources accept and seed.
    pub fn check_seq_number(&mut self, src: u16, seq: u32) -> bool {
        match self.cache.get_mut(&src) {
            Some(last) if seq > *last => {
                *last = seq;
                true
            }
            Some(last) => {
                log::trace!("replay cache repeated: src={src}, seq={seq}, last={last}");
                false
            }
            None => {
                self.cache.insert(src, seq);
                true
            }
        }
    }

    /// Forget a source, e.g. after a node reset re-seeds its counter.
    pub fn remove_node(&mut self, src: u16) {
        self.cache.remove(&src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_seeds() {
        let mut cache = ReplayCache::new();
        assert!(cache.check_seq_number(21, 5));
    }

    #[test]
    fn monotonic_filter() {
        let mut cache = ReplayCache::new();
        assert!(cache.check_seq_number(21, 5));
        assert!(!cache.check_seq_number(21, 5));
        assert!(!cache.check_seq_number(21, 4));
        assert!(cache.check_seq_number(21, 6));
        assert!(!cache.check_seq_number(21, 6));
    }

    #[test]
    fn sources_are_independent() {
        let mut cache = ReplayCache::new();
        assert!(cache.check_seq_number(21, 100));
        assert!(cache.check_seq_number(22, 1));
    }

    #[test]
    fn remove_reseeds() {
        let mut cache = ReplayCache::new();
        assert!(cache.check_seq_number(21, 100));
        cache.remove_node(21);
        assert!(cache.check_seq_number(21, 1));
    }
}
