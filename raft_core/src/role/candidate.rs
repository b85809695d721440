//! Candidate role (spec §4.3).

use crate::types::TermIndex;

#[derive(Debug)]
pub struct CandidateState {
    pub generation: u64,
    pub term: TermIndex,
    /// Running vote tally for this election: `+1` per granted vote (self
    /// included), `-1` per rejection or transport failure (spec §4.3).
    pub tally: i64,
    pub votes_received: usize,
}

impl CandidateState {
    pub fn new(generation: u64, term: TermIndex) -> Self {
        // The candidate always votes for itself first (spec §4.1, "Follower
        // expiry": "increment term, vote for self, enter Candidate").
        CandidateState { generation, term, tally: 1, votes_received: 1 }
    }

    pub fn record_grant(&mut self) {
        self.tally += 1;
        self.votes_received += 1;
    }

    pub fn record_rejection(&mut self) {
        self.tally -= 1;
    }

    pub fn has_majority(&self, cluster_size: usize) -> bool {
        self.tally > 0 && self.votes_received >= cluster_size / 2 + 1
    }
}
