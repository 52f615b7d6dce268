/*!
# Convergence-Checked Sampling

[`ConvergentSampler`] drives the whole run. Each outer iteration

1. **extends** every chain by `block_size` steps (earlier states are kept as they are),
2. **diagnoses** the whole record: warm-up removal and chain splitting, then R-hat and the
   variogram-based ESS for every coordinate,
3. **decides**: the run has converged once every coordinate has an autocorrelation cutoff,
   `R ≤ r_max` and `ESS ≥ ess_min`; otherwise it extends again.

After `max_outer_iterations` extensions without convergence the run fails with
`NonConvergence`. On convergence the split chains are thinned by
`s = ceil(m n / min ESS)` and concatenated in chain order.

## Example

```rust
use converged_mcmc::config::SamplerConfig;
use converged_mcmc::distributions::{Gaussian2D, IsotropicGaussian};
use converged_mcmc::sampler::ConvergentSampler;
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
let proposal = IsotropicGaussian::new(1.5).unwrap();
let config = SamplerConfig::new(vec![vec![-1.0, -1.0], vec![1.0, 1.0], vec![0.0, 0.0]])
    .set_ess_min(100)
    .set_block_size(400)
    .set_seed(42);

let mut sampler = ConvergentSampler::new(target, proposal, config).unwrap();
let output = sampler.run().unwrap();
assert_eq!(output.samples.ncols(), 2);
assert!(output.samples.nrows() >= 100);
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::prelude::*;
use std::fmt;

use crate::autocorr::autocorrelation_profiles;
use crate::autocorr::AutocorrelationProfile;
use crate::config::SamplerConfig;
use crate::core::ChainPool;
use crate::distributions::{Density, Proposal};
use crate::ensemble::Ensemble;
use crate::error::{Result, SamplerError};
use crate::stats::{convergence_stats, BasicStats, DimensionStats};

/// Per-coordinate verdicts of the latest diagnostic pass.
///
/// Sized to the dimension count on creation and reset before every pass, so a coordinate can
/// never carry a cutoff found in an earlier, shorter record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceState {
    rhat: Vec<f64>,
    ess: Vec<Option<f64>>,
    cutoffs: Vec<Option<usize>>,
}

impl ConvergenceState {
    pub fn new(dim: usize) -> Self {
        Self {
            rhat: vec![f64::NAN; dim],
            ess: vec![None; dim],
            cutoffs: vec![None; dim],
        }
    }

    /// Clears every verdict, keeping the size.
    pub fn reset(&mut self) {
        self.rhat.fill(f64::NAN);
        self.ess.fill(None);
        self.cutoffs.fill(None);
    }

    /// Stores the diagnostics of one pass. Entries beyond the dimension count are ignored.
    pub fn update(&mut self, stats: &[DimensionStats], profiles: &[AutocorrelationProfile]) {
        let slots = self
            .rhat
            .iter_mut()
            .zip(self.ess.iter_mut())
            .zip(self.cutoffs.iter_mut());
        for (((rhat, ess), cutoff), (s, p)) in slots.zip(stats.iter().zip(profiles)) {
            *rhat = s.rhat;
            *ess = p.ess;
            *cutoff = p.cutoff;
        }
    }

    /// True iff every coordinate has a cutoff, `R ≤ r_max` and `ESS ≥ ess_min`.
    pub fn is_converged(&self, r_max: f64, ess_min: usize) -> bool {
        self.rhat
            .iter()
            .zip(&self.ess)
            .zip(&self.cutoffs)
            .all(|((&rhat, ess), cutoff)| {
                cutoff.is_some()
                    && rhat <= r_max
                    && ess.is_some_and(|ess| ess >= ess_min as f64)
            })
    }

    /// Coordinates without an autocorrelation cutoff.
    pub fn undiagnosed(&self) -> usize {
        self.cutoffs.iter().filter(|c| c.is_none()).count()
    }

    /// Largest R-hat, or NaN before the first pass.
    pub fn max_rhat(&self) -> f64 {
        self.rhat
            .iter()
            .copied()
            .filter(|r| !r.is_nan())
            .fold(f64::NAN, f64::max)
    }

    /// Smallest defined ESS, or NaN when no coordinate has one.
    pub fn min_ess(&self) -> f64 {
        self.ess.iter().flatten().copied().fold(f64::NAN, f64::min)
    }

    pub fn rhat(&self) -> &[f64] {
        &self.rhat
    }

    pub fn ess(&self) -> &[Option<f64>] {
        &self.ess
    }

    pub fn cutoffs(&self) -> &[Option<usize>] {
        &self.cutoffs
    }

    pub fn dim(&self) -> usize {
        self.rhat.len()
    }
}

/// Diagnostics recorded after one outer iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSummary {
    /// 1-based outer iteration.
    pub iteration: usize,
    /// Steps per chain in the record.
    pub record_len: usize,
    /// Draws per split chain, `(record_len / 2) / 2`. Below 2 the record was too short to
    /// diagnose.
    pub chain_len: usize,
    pub rhat: Vec<f64>,
    pub ess: Vec<Option<f64>>,
    pub cutoffs: Vec<Option<usize>>,
    pub mean_acceptance: f64,
}

/// Everything a converged run produces.
#[derive(Debug, Clone)]
pub struct SampleOutput {
    /// All chains' trajectories, shape `(chains, steps, dims)`.
    pub record: Array3<f64>,
    /// The split ensemble the final diagnostics were computed on.
    pub ensemble: Ensemble,
    /// One entry per outer iteration, oldest first.
    pub history: Vec<IterationSummary>,
    /// Per-chain fraction of accepted proposals.
    pub acceptance: Vec<f64>,
    /// Thinned draws, one row per sample, in chain order.
    pub samples: Array2<f64>,
    pub thinning_interval: usize,
    pub iterations: usize,
}

impl SampleOutput {
    /// R-hat per iteration and coordinate, NaN where the record was too short.
    pub fn rhat_history(&self) -> Array2<f64> {
        let dim = self.ensemble.dim();
        Array2::from_shape_fn((self.history.len(), dim), |(i, d)| self.history[i].rhat[d])
    }

    /// ESS per iteration and coordinate, NaN where no cutoff was found.
    pub fn ess_history(&self) -> Array2<f64> {
        let dim = self.ensemble.dim();
        Array2::from_shape_fn((self.history.len(), dim), |(i, d)| {
            self.history[i].ess[d].unwrap_or(f64::NAN)
        })
    }

    /// Summary of the final diagnostics.
    pub fn summary(&self) -> Option<RunSummary> {
        let last = self.history.last()?;
        let ess: Vec<f64> = last.ess.iter().flatten().copied().collect();
        Some(RunSummary {
            rhat: BasicStats::new("R-hat", &last.rhat)?,
            ess: BasicStats::new("ESS", &ess)?,
            acceptance: BasicStats::new("p(accept)", &self.acceptance)?,
            n_samples: self.samples.nrows(),
            thinning_interval: self.thinning_interval,
        })
    }
}

/// Human-readable report of a finished run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub rhat: BasicStats,
    pub ess: BasicStats,
    pub acceptance: BasicStats,
    pub n_samples: usize,
    pub thinning_interval: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.rhat)?;
        writeln!(f, "{}", self.ess)?;
        writeln!(f, "{}", self.acceptance)?;
        write!(
            f,
            "{} samples, thinning interval {}",
            self.n_samples, self.thinning_interval
        )
    }
}

/// Thinning interval `s = ceil(size / ess)`, kept within `[1, size]`.
pub fn thinning_interval(size: usize, ess: f64) -> usize {
    let s = (size as f64 / ess).ceil();
    if s.is_nan() || s < 1.0 {
        1
    } else {
        (s as usize).min(size.max(1))
    }
}

/**
Takes draws `0, s, 2s, …` (below `n`) from each split chain and stacks them in chain order.

Each chain contributes `ceil(n / s)` rows, so the result has `m · ceil(n / s)` rows. Returns
the interval together with the draws.
*/
pub fn thin(ensemble: &Ensemble, ess: f64) -> (usize, Array2<f64>) {
    let (m, n, k) = ensemble.view().dim();
    let interval = thinning_interval(m * n, ess);
    let per_chain = n.div_ceil(interval);
    let draws = ensemble.view();
    let mut samples = Array2::zeros((m * per_chain, k));
    for j in 0..m {
        for (r, i) in (0..n).step_by(interval).enumerate() {
            samples
                .row_mut(j * per_chain + r)
                .assign(&draws.slice(s![j, i, ..]));
        }
    }
    (interval, samples)
}

enum DriverState {
    Extending,
    Diagnosing,
    Converged(Array3<f64>, Ensemble),
    Failed,
}

/// Runs Metropolis chains until they are diagnosed as mixed and sufficiently long.
pub struct ConvergentSampler<D, Q> {
    /// The target density.
    pub density: D,
    /// The symmetric proposal.
    pub proposal: Q,
    config: SamplerConfig,
    pool: ChainPool,
    history: Vec<IterationSummary>,
    iterations: usize,
}

impl<D, Q> ConvergentSampler<D, Q>
where
    D: Density + Sync,
    Q: Proposal + Sync,
{
    /// Validates `config` and creates one chain per seed state.
    pub fn new(density: D, proposal: Q, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        let pool = ChainPool::new(&density, &config.seed_states, config.seed)?;
        Ok(Self {
            density,
            proposal,
            config,
            pool,
            history: Vec::new(),
            iterations: 0,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn pool(&self) -> &ChainPool {
        &self.pool
    }

    pub fn history(&self) -> &[IterationSummary] {
        &self.history
    }

    /// Outer iterations run so far, across calls to [`Self::run`].
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Allows more outer iterations, e.g. after a `NonConvergence` error. A following
    /// [`Self::run`] continues from the existing record.
    ///
    /// A run that stopped inside a block (a density error) cannot be resumed: every later
    /// [`Self::run`] fails with `UnevenChains` without sampling.
    pub fn raise_iteration_cap(&mut self, max_outer_iterations: usize) {
        self.config.max_outer_iterations = self.config.max_outer_iterations.max(max_outer_iterations);
    }

    /// Runs until convergence or until the iteration cap is reached.
    pub fn run(&mut self) -> Result<SampleOutput> {
        self.drive(None)
    }

    /// Same as [`Self::run`], showing a progress bar over outer iterations.
    pub fn run_progress(&mut self) -> Result<SampleOutput> {
        let pb = ProgressBar::new(self.config.max_outer_iterations as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.cyan/blue} {pos}/{len} ({elapsed}) | {msg}")?
                .progress_chars("=>-"),
        );
        pb.set_prefix("Outer");
        pb.set_position(self.iterations as u64);

        let out = self.drive(Some(&pb));
        match &out {
            Ok(output) => pb.finish_with_message(format!(
                "converged, {} samples",
                output.samples.nrows()
            )),
            Err(e) => pb.abandon_with_message(e.to_string()),
        }
        out
    }

    fn drive(&mut self, pb: Option<&ProgressBar>) -> Result<SampleOutput> {
        // A block that failed part-way leaves the chains out of step for good.
        self.pool.check_lengths()?;
        let mut verdicts = ConvergenceState::new(self.pool.dim());
        let mut state = DriverState::Extending;
        loop {
            state = match state {
                DriverState::Extending => {
                    if self.iterations >= self.config.max_outer_iterations {
                        DriverState::Failed
                    } else {
                        self.pool
                            .run_block(&self.density, &self.proposal, self.config.block_size)?;
                        self.iterations += 1;
                        DriverState::Diagnosing
                    }
                }
                DriverState::Diagnosing => {
                    verdicts.reset();
                    let record = self.pool.record()?;
                    let next = match Ensemble::from_record(record.view()) {
                        Ok(ensemble) => {
                            let stats = convergence_stats(&ensemble)?;
                            let profiles = autocorrelation_profiles(&ensemble, &stats);
                            verdicts.update(&stats, &profiles);
                            if verdicts.is_converged(self.config.r_max, self.config.ess_min) {
                                DriverState::Converged(record, ensemble)
                            } else {
                                DriverState::Extending
                            }
                        }
                        Err(SamplerError::EnsembleTooShort { length }) => {
                            debug!("Record of length {length} too short to diagnose, extending");
                            DriverState::Extending
                        }
                        Err(e) => return Err(e),
                    };
                    self.record_iteration(&verdicts, pb);
                    next
                }
                DriverState::Converged(record, ensemble) => {
                    return Ok(self.extract(record, ensemble, &verdicts));
                }
                DriverState::Failed => {
                    warn!(
                        "No convergence after {} outer iterations: max R-hat {:.4}, min ESS {:.1}, {} undiagnosed dimension(s)",
                        self.iterations,
                        verdicts.max_rhat(),
                        verdicts.min_ess(),
                        verdicts.undiagnosed()
                    );
                    return Err(SamplerError::NonConvergence {
                        iterations: self.iterations,
                        max_rhat: verdicts.max_rhat(),
                        min_ess: verdicts.min_ess(),
                    });
                }
            };
        }
    }

    fn record_iteration(&mut self, verdicts: &ConvergenceState, pb: Option<&ProgressBar>) {
        let record_len = self.pool.len();
        let mean_acceptance = self.pool.mean_acceptance();
        let summary = IterationSummary {
            iteration: self.iterations,
            record_len,
            chain_len: (record_len / 2) / 2,
            rhat: verdicts.rhat().to_vec(),
            ess: verdicts.ess().to_vec(),
            cutoffs: verdicts.cutoffs().to_vec(),
            mean_acceptance,
        };
        debug!(
            "Iteration {}: L = {}, n = {}, max R-hat = {:.4}, min ESS = {:.1}, undiagnosed = {}, p(accept) = {:.3}",
            summary.iteration,
            summary.record_len,
            summary.chain_len,
            verdicts.max_rhat(),
            verdicts.min_ess(),
            verdicts.undiagnosed(),
            mean_acceptance
        );
        if let Some(pb) = pb {
            pb.set_position(self.iterations as u64);
            pb.set_message(format!(
                "p(accept)≈{:.2} max(rhat)≈{:.3} min(ess)≈{:.0}",
                mean_acceptance,
                verdicts.max_rhat(),
                verdicts.min_ess()
            ));
        }
        self.history.push(summary);
    }

    fn extract(
        &self,
        record: Array3<f64>,
        ensemble: Ensemble,
        verdicts: &ConvergenceState,
    ) -> SampleOutput {
        let (thinning_interval, samples) = thin(&ensemble, verdicts.min_ess());
        info!(
            "Converged after {} outer iterations: {} samples at thinning interval {}",
            self.iterations,
            samples.nrows(),
            thinning_interval
        );
        SampleOutput {
            record,
            ensemble,
            history: self.history.clone(),
            acceptance: self.pool.acceptance_fractions(),
            samples,
            thinning_interval,
            iterations: self.iterations,
        }
    }
}
