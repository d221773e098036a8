//! Probabilistic crash injection for durability testing.
//!
//! External crash-recovery harnesses set a nonzero probability via
//! `DurabilityConfig::fault_crash_before_cmeta_flush` and repeatedly drive
//! flushes in a child process; the process dies mid-protocol and the harness
//! verifies recovery. With the default probability of 0.0 the hook is a
//! branch and nothing more.

use tracing::error;

/// Aborts the process with probability `probability`.
///
/// A probability of 0.0 (the production default) never crashes and does not
/// draw randomness.
pub fn maybe_crash(probability: f64) {
    if probability <= 0.0 {
        return;
    }
    if rand::random::<f64>() < probability {
        error!(probability, "Injected crash: simulating failure before consensus metadata flush");
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_probability_never_crashes() {
        for _ in 0..10_000 {
            maybe_crash(0.0);
        }
    }

    #[test]
    fn test_negative_probability_never_crashes() {
        maybe_crash(-1.0);
    }
}
