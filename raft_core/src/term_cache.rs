//! C4: preceding-term cache (spec §4.4 step 2, §5 "Shared-resource policy",
//! §9 Open Question).
//!
//! Single-writer (the leader's heartbeat loop), bounded at
//! `MaxTermCacheSize = 100`. Per the Open Question in spec §9 this clears
//! wholesale on overflow rather than evicting LRU-style; `DESIGN.md` records
//! that as a deliberate decision, not an oversight.

use std::collections::HashMap;

use crate::types::{LogIndex, TermIndex};

pub const MAX_TERM_CACHE_SIZE: usize = 100;

#[derive(Debug, Default)]
pub struct PrecedingTermCache {
    entries: HashMap<LogIndex, TermIndex>,
}

impl PrecedingTermCache {
    pub fn new() -> Self {
        PrecedingTermCache { entries: HashMap::new() }
    }

    pub fn get(&self, index: LogIndex) -> Option<TermIndex> {
        self.entries.get(&index).copied()
    }

    pub fn insert(&mut self, index: LogIndex, term: TermIndex) {
        if self.entries.len() >= MAX_TERM_CACHE_SIZE && !self.entries.contains_key(&index) {
            self.entries.clear();
        }
        self.entries.insert(index, term);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_clears_wholesale() {
        let mut cache = PrecedingTermCache::new();
        for i in 0..MAX_TERM_CACHE_SIZE as u64 {
            cache.insert(LogIndex(i), TermIndex(1));
        }
        assert_eq!(cache.entries.len(), MAX_TERM_CACHE_SIZE);
        cache.insert(LogIndex(MAX_TERM_CACHE_SIZE as u64), TermIndex(1));
        // Wholesale clear means everything but the newly inserted entry is gone.
        assert_eq!(cache.entries.len(), 1);
        assert_eq!(cache.get(LogIndex(0)), None);
    }
}
