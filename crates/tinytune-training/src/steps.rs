use serde::{Deserialize, Serialize};
use tracing::warn;

/// Example count assumed when a streaming source cannot be counted.
pub const FALLBACK_EXAMPLE_COUNT: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEstimate {
    pub examples: u64,
    pub updates_per_epoch: u64,
    pub max_steps: u64,
    /// True when the fallback example count was used.
    pub degraded: bool,
}

/// Optimizer-step budget for a dataset of unknown exact size.
///
/// `max_steps = ceil(ceil(N / batch_size) / grad_accum) * epochs`. An absent
/// or zero count falls back to [`FALLBACK_EXAMPLE_COUNT`]. Zero parameters
/// are clamped to 1 and the result is never below 1.
#[must_use]
pub fn estimate_max_steps(approx: Option<u64>, batch_size: u64, grad_accum: u64, epochs: u64) -> StepEstimate {
    let (examples, degraded) = match approx {
        Some(n) if n > 0 => (n, false),
        _ => {
            warn!(
                fallback = FALLBACK_EXAMPLE_COUNT,
                "could not determine dataset size, assuming {FALLBACK_EXAMPLE_COUNT} examples"
            );
            (FALLBACK_EXAMPLE_COUNT, true)
        }
    };
    let (updates_per_epoch, max_steps) = schedule(examples, batch_size, grad_accum, epochs);
    StepEstimate { examples, updates_per_epoch, max_steps, degraded }
}

/// Same formula as [`estimate_max_steps`] for a dataset of known length.
#[must_use]
pub fn exact_total_steps(examples: u64, batch_size: u64, grad_accum: u64, epochs: u64) -> StepEstimate {
    let (updates_per_epoch, max_steps) = schedule(examples, batch_size, grad_accum, epochs);
    StepEstimate { examples, updates_per_epoch, max_steps, degraded: false }
}

fn schedule(examples: u64, batch_size: u64, grad_accum: u64, epochs: u64) -> (u64, u64) {
    let micro_batches = examples.div_ceil(batch_size.max(1));
    let updates_per_epoch = micro_batches.div_ceil(grad_accum.max(1)).max(1);
    (updates_per_epoch, updates_per_epoch.saturating_mul(epochs.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_when_count_missing() {
        let estimate = estimate_max_steps(Some(0), 1, 16, 15);
        assert_eq!(estimate.max_steps, 480);
        assert_eq!(estimate.updates_per_epoch, 32);
        assert!(estimate.degraded);

        assert_eq!(estimate_max_steps(None, 1, 16, 15), estimate);
    }

    #[test]
    fn test_formula_rounds_up() {
        // 10 examples, batch 3 -> 4 micro-batches, accum 8 -> 1 update per epoch
        let estimate = estimate_max_steps(Some(10), 3, 8, 3);
        assert_eq!(estimate.max_steps, 3);
        assert!(!estimate.degraded);

        assert_eq!(estimate_max_steps(Some(100), 1, 8, 3).max_steps, 39);
        assert_eq!(exact_total_steps(16, 2, 4, 2).max_steps, 4);
    }

    #[test]
    fn test_zero_parameters_are_clamped() {
        let estimate = estimate_max_steps(Some(5), 0, 0, 0);
        assert_eq!(estimate.max_steps, 5);
        assert_eq!(exact_total_steps(0, 1, 8, 3).max_steps, 3);
    }

    #[test]
    fn test_monotonic_in_examples_and_epochs() {
        let mut previous = 0;
        for n in 1..200 {
            let steps = estimate_max_steps(Some(n), 2, 4, 3).max_steps;
            assert!(steps >= previous);
            previous = steps;
        }
        for epochs in 1..10 {
            assert!(
                estimate_max_steps(Some(50), 1, 8, epochs + 1).max_steps
                    > estimate_max_steps(Some(50), 1, 8, epochs).max_steps
            );
        }
    }

    #[test]
    fn test_larger_batches_never_add_steps() {
        for approx in [Some(1), Some(37), Some(480), Some(1000), Some(0), None] {
            let mut previous = u64::MAX;
            for batch_size in 1..=64 {
                let steps = estimate_max_steps(approx, batch_size, 4, 2).max_steps;
                assert!(steps <= previous, "{approx:?}: batch {batch_size} gave {steps} > {previous}");
                previous = steps;
            }
        }

        let mut previous = u64::MAX;
        for batch_size in 1..=64 {
            let steps = exact_total_steps(100, batch_size, 8, 3).max_steps;
            assert!(steps <= previous);
            previous = steps;
        }
    }
}
