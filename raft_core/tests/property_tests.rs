//! Property tests, kept to the handful of invariants that are actually
//! worth fuzzing rather than a mechanical encode/decode grid (the teacher's
//! own `test_with_quickcheck` used quickcheck for its simulator's op
//! sequence; here it checks the timeout sampler and term monotonicity
//! directly).

use quickcheck::{quickcheck, TestResult};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use raft_core::config::ElectionTimeout;
use raft_core::types::TermIndex;

fn sampled_timeout_is_within_bounds(seed: u64, min_ms: u64, spread_ms: u64) -> TestResult {
    if min_ms == 0 {
        return TestResult::discard();
    }
    let max_ms = min_ms + (spread_ms % 500);
    let timeout = ElectionTimeout { min_ms, max_ms };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let sampled = timeout.sample(&mut rng).as_millis() as u64;
    TestResult::from_bool(sampled >= min_ms && sampled <= max_ms.max(min_ms))
}

quickcheck! {
    fn election_timeout_sample_stays_in_bounds(seed: u64, min_ms: u64, spread_ms: u64) -> TestResult {
        sampled_timeout_is_within_bounds(seed, min_ms % 1000 + 1, spread_ms)
    }
}

quickcheck! {
    fn term_next_is_strictly_increasing(raw: u64) -> bool {
        let term = TermIndex(raw);
        term.next().0 > term.0
    }
}
