//! Discovery timeout with random jitter.
//!
//! When several nodes power up together (a layout switched on from one
//! mains switch) they would all time out at the same moment and all become
//! servers.  Spreading the timeout by up to ±25% makes one node escalate
//! first so the others find it.

use std::time::Duration;

use rand::Rng;

/// Base discovery timeout.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum relative deviation applied by [`jittered_timeout`].
pub const DISCOVERY_TIMEOUT_JITTER: f64 = 0.25;

/// Returns `base` moved by a uniformly random amount within ±25%.
///
/// Works at nanosecond resolution. The lower bound is rounded up and the
/// upper bound down, so the result never leaves the ±25% band, even for
/// sub-millisecond bases.
pub fn jittered_timeout<R: Rng + ?Sized>(base: Duration, rng: &mut R) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;

    let base_ns = base.as_nanos();
    let low = (base_ns * 3 + 3) / 4;
    let high = base_ns * 5 / 4;
    let ns = if low >= high {
        low
    } else {
        rng.gen_range(low..=high)
    };
    let secs = u64::try_from(ns / NANOS_PER_SEC).unwrap_or(u64::MAX);
    // Always below one billion.
    let subsec = (ns % NANOS_PER_SEC) as u32;
    Duration::new(secs, subsec)
}

/// Computes the effective discovery timeout once, at manager construction.
pub fn discovery_timeout(base: Duration, randomize: bool) -> Duration {
    if randomize {
        jittered_timeout(base, &mut rand::thread_rng())
    } else {
        base
    }
}
