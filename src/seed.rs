//! Random seed established once at startup.

use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};

/// Returns `seed`, or one derived from the current time when `seed` is 0.
pub fn resolve_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    Utc::now().timestamp_micros() as u64
}

/// Generator every sampler of the run draws from.
pub fn startup_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(resolve_seed(seed))
}
