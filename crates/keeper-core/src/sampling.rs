//! Sample sizing for per-round upkeep checks.
//!
//! Each non-faulty node independently checks a random subset of the active
//! upkeeps every round. For a target probability `p` that any given upkeep is
//! checked by at least one node within `rounds` rounds, the per-node ratio is
//!
//! ```text
//! ratio = 1 - (1 - p) ^ (1 / (rounds * nodes))
//! ```
//!
//! [`SampleRatio`] rounds it to the nearest hundredth; [`sample_size`] works
//! from the exact value and rounds the key count up. Everything here is
//! pure: the same inputs always yield the same size, even though every node
//! draws different keys.

use crate::error::SamplingError;

/// Fraction of the active upkeep population to check per round.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct SampleRatio(f64);

impl SampleRatio {
    /// Compute the ratio needed for `probability` coverage across `nodes`
    /// independent samplers over `rounds` rounds.
    pub fn from_probability(
        rounds: u32,
        nodes: usize,
        probability: f64,
    ) -> Result<Self, SamplingError> {
        let ratio = coverage_ratio(rounds, nodes, probability)?;
        Ok(Self((ratio / 0.01).round() * 0.01))
    }

    /// Build a ratio directly (clamped into `[0, 1]`).
    pub fn new(ratio: f64) -> Self {
        Self(ratio.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Number of items to take out of `count`, rounded to nearest.
    pub fn of(&self, count: usize) -> usize {
        (self.0 * count as f64).round() as usize
    }

    /// Keys to check per round out of `population`. Never zero for a
    /// non-empty population, so small populations still get covered.
    pub fn sample_count(&self, population: usize) -> usize {
        if population == 0 {
            return 0;
        }
        self.of(population).clamp(1, population)
    }
}

/// Unrounded per-node ratio for `probability` coverage.
fn coverage_ratio(rounds: u32, nodes: usize, probability: f64) -> Result<f64, SamplingError> {
    if rounds == 0 {
        return Err(SamplingError::InvalidParameter(
            "number of rounds must be greater than 0".to_string(),
        ));
    }
    if nodes == 0 {
        return Err(SamplingError::InvalidParameter(
            "number of nodes must be greater than 0".to_string(),
        ));
    }
    if !(probability > 0.0 && probability < 1.0) {
        return Err(SamplingError::InvalidParameter(format!(
            "probability must be greater than 0 and less than 1, got {probability}"
        )));
    }

    let exponent = 1.0 / (f64::from(rounds) * nodes as f64);
    Ok(1.0 - (1.0 - probability).powf(exponent))
}

/// Minimum per-node sample size for a population of `population` upkeeps
/// checked by `non_faulty` nodes, targeting `target_probability` coverage
/// within a single round.
///
/// Uses the exact ratio rounded up, so `size / population` never falls short
/// of it. The result is clamped to `[1, population]`; an empty population
/// yields 0.
pub fn sample_size(
    population: usize,
    non_faulty: usize,
    target_probability: f64,
) -> Result<usize, SamplingError> {
    let ratio = coverage_ratio(1, non_faulty, target_probability)?;
    if population == 0 {
        return Ok(0);
    }
    // Absorb float noise so an exact product like 0.3 * 10 stays at 3.
    let size = (ratio * population as f64 - 1e-9).ceil();
    Ok((size.max(1.0) as usize).min(population))
}
