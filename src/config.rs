/*!
# Sampler Configuration

[`SamplerConfig`] collects everything the driver needs besides the density and proposal:
the seed states (one chain each), the stopping thresholds, the block size appended per outer
iteration, the iteration cap, and the global random seed.

Setters consume and return `self`, so a configuration reads as one chain of calls:

```rust
use converged_mcmc::config::SamplerConfig;

let config = SamplerConfig::new(vec![vec![0.0, 0.0], vec![0.9, 0.9]])
    .set_ess_min(120)
    .set_r_max(1.1)
    .set_block_size(400)
    .set_max_outer_iterations(50)
    .set_seed(42);
assert!(config.validate().is_ok());
```
*/

use rand::prelude::*;

use crate::error::{Result, SamplerError};

/// Parameters of a convergence-checked sampling run.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Starting points, one per chain. At least two, all of the same dimension.
    pub seed_states: Vec<Vec<f64>>,
    /// Minimum effective sample size required in every dimension.
    pub ess_min: usize,
    /// Largest acceptable R-hat in every dimension.
    pub r_max: f64,
    /// Steps appended to every chain per outer iteration. Must be divisible by 4.
    pub block_size: usize,
    /// Outer iterations allowed before giving up with `NonConvergence`.
    pub max_outer_iterations: usize,
    /// Global seed; chain `i` draws from a stream seeded with `seed + i`.
    pub seed: u64,
}

impl SamplerConfig {
    /// Creates a configuration with default thresholds and a random global seed.
    pub fn new(seed_states: Vec<Vec<f64>>) -> Self {
        Self {
            seed_states,
            ess_min: 400,
            r_max: 1.1,
            block_size: 400,
            max_outer_iterations: 100,
            seed: thread_rng().gen::<u64>(),
        }
    }

    pub fn set_ess_min(mut self, ess_min: usize) -> Self {
        self.ess_min = ess_min;
        self
    }

    pub fn set_r_max(mut self, r_max: f64) -> Self {
        self.r_max = r_max;
        self
    }

    pub fn set_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn set_max_outer_iterations(mut self, max_outer_iterations: usize) -> Self {
        self.max_outer_iterations = max_outer_iterations;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Dimension of the state space, taken from the first seed state.
    pub fn dim(&self) -> usize {
        self.seed_states.first().map_or(0, Vec::len)
    }

    /// Rejects configurations that cannot produce a well-defined run.
    pub fn validate(&self) -> Result<()> {
        if self.seed_states.len() < 2 {
            return invalid(format!(
                "need at least 2 seed states, got {}",
                self.seed_states.len()
            ));
        }
        let dim = self.dim();
        if dim == 0 {
            return invalid("seed states must have at least one coordinate".to_string());
        }
        for (i, state) in self.seed_states.iter().enumerate() {
            if state.len() != dim {
                return invalid(format!(
                    "seed state {i} has dimension {}, expected {dim}",
                    state.len()
                ));
            }
            if state.iter().any(|x| !x.is_finite()) {
                return invalid(format!("seed state {i} has non-finite coordinates: {state:?}"));
            }
        }
        if self.block_size == 0 || self.block_size % 4 != 0 {
            return invalid(format!(
                "block_size must be a positive multiple of 4, got {}",
                self.block_size
            ));
        }
        if self.ess_min == 0 {
            return invalid("ess_min must be positive".to_string());
        }
        if !(self.r_max.is_finite() && self.r_max > 1.0) {
            return invalid(format!("r_max must be finite and > 1, got {}", self.r_max));
        }
        if self.max_outer_iterations == 0 {
            return invalid("max_outer_iterations must be positive".to_string());
        }
        Ok(())
    }
}

fn invalid(msg: String) -> Result<()> {
    Err(SamplerError::InvalidConfiguration(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds() -> Vec<Vec<f64>> {
        vec![vec![0.0, 0.0], vec![0.9, -0.9], vec![-0.9, 0.9]]
    }

    fn assert_invalid(config: SamplerConfig) {
        match config.validate() {
            Err(SamplerError::InvalidConfiguration(_)) => {}
            other => panic!("Expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = SamplerConfig::new(seeds());
        assert!(config.validate().is_ok());
        assert_eq!(config.dim(), 2);
    }

    #[test]
    fn rejects_block_size_not_divisible_by_four() {
        assert_invalid(SamplerConfig::new(seeds()).set_block_size(402));
        assert_invalid(SamplerConfig::new(seeds()).set_block_size(0));
    }

    #[test]
    fn rejects_single_seed_state() {
        assert_invalid(SamplerConfig::new(vec![vec![0.0, 0.0]]));
    }

    #[test]
    fn rejects_mismatched_seed_dimensions() {
        assert_invalid(SamplerConfig::new(vec![vec![0.0, 0.0], vec![1.0]]));
        assert_invalid(SamplerConfig::new(vec![vec![], vec![]]));
        assert_invalid(SamplerConfig::new(vec![vec![f64::NAN], vec![1.0]]));
    }

    #[test]
    fn rejects_bad_thresholds() {
        assert_invalid(SamplerConfig::new(seeds()).set_ess_min(0));
        assert_invalid(SamplerConfig::new(seeds()).set_r_max(1.0));
        assert_invalid(SamplerConfig::new(seeds()).set_r_max(f64::INFINITY));
        assert_invalid(SamplerConfig::new(seeds()).set_max_outer_iterations(0));
    }
}
