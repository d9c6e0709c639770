//! CPU-bound task body
//!
//! Each task draws an upper bound at random and scans every integer below it by
//! trial division, returning the largest prime found. Cost grows faster than
//! linearly with the bound, so tasks on the same pool finish at very different
//! times. That heterogeneity is what the scheduler is exercised against.
//!
//! # Example
//!
//! ```
//! use svcpool::worker::task;
//!
//! assert_eq!(task::largest_prime_below(20), 19);
//!
//! // Same seed, same work, same answer
//! assert_eq!(task::run_seeded(7, 1000), task::run_seeded(7, 1000));
//! ```

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Default upper limit for the drawn bound
pub const DEFAULT_TASK_BOUND: u64 = 40_000;

/// Smallest usable bound: the scan below 3 still finds the prime 2
pub const MIN_TASK_BOUND: u64 = 3;

/// Run one task with a fresh random seed
pub fn run_task(task_bound: u64) -> u64 {
    run_seeded(rand::random(), task_bound)
}

/// Run one task with a fixed seed
///
/// The drawn bound is uniform in `[MIN_TASK_BOUND, task_bound]`.
pub fn run_seeded(seed: u64, task_bound: u64) -> u64 {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let bound = rng.gen_range(MIN_TASK_BOUND..=task_bound.max(MIN_TASK_BOUND));
    largest_prime_below(bound)
}

/// Largest prime strictly below `bound` (0 if there is none)
///
/// Deliberately naive: every candidate is tested, in ascending order, with
/// trial division up to its square root.
pub fn largest_prime_below(bound: u64) -> u64 {
    let mut largest = 0;
    for n in 2..bound {
        if is_prime(n) {
            largest = n;
        }
    }
    largest
}

#[inline]
fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}
