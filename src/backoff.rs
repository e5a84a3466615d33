//! Exponential backoff with jitter for retry scheduling (spec §9:
//! "exponential base 2, cap at 10s, ±20% jitter is a reasonable default").

use rand::Rng;
use std::time::Duration;

const BASE_MS: u64 = 1_000;
const CAP_MS: u64 = 10_000;
const JITTER_RATIO: f64 = 0.2;

/// Delay before the `attempt`-th retry (1-indexed: `attempt` is the
/// `retryCount` the event is about to be retried at).
pub fn backoff(attempt: u32) -> Duration {
    let exp = BASE_MS.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(CAP_MS) as f64;
    let jitter = capped * JITTER_RATIO;
    let jittered = capped + rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_millis(jittered.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        let small = backoff(0);
        let large = backoff(10);
        assert!(small.as_millis() <= (BASE_MS as f64 * (1.0 + JITTER_RATIO)) as u128);
        assert!(large.as_millis() <= (CAP_MS as f64 * (1.0 + JITTER_RATIO)) as u128);
    }
}
