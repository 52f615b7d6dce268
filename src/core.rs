/*!
# Chain Pool

This module owns the set of Metropolis chains a run advances in lockstep. It includes:
- [`ChainPool`], which creates one [`MHChain`] per seed state and advances all of them by a
  block of steps in parallel (using Rayon).
- [`ChainPool::record`], which assembles every chain's trajectory into one
  `(chains, steps, dims)` array for the diagnostics.
- Helpers [`init`], [`init_det`] and [`init_with_seed`] for drawing seed states.

## Randomness

Chain `i` draws from its own `SmallRng` seeded with `seed + i`. Nothing is shared between
chains while a block runs, so the record is bit-for-bit identical whether the chains run on one
thread or many, and for any Rayon thread pool size.
*/

use ndarray::prelude::*;
use ndarray::stack;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::distributions::{Density, Proposal};
use crate::error::{Result, SamplerError};
use crate::metropolis_hastings::MHChain;

/// A fixed set of independent Metropolis chains that grow block by block.
#[derive(Debug, Clone)]
pub struct ChainPool {
    chains: Vec<MHChain>,
    /// The global random seed.
    pub seed: u64,
}

impl ChainPool {
    /**
    Creates one chain per seed state. Chain `i` is seeded with `seed + i`.

    # Examples

    ```rust
    use converged_mcmc::core::ChainPool;

    let density = |x: &[f64]| (-0.5 * x[0] * x[0]).exp();
    let pool = ChainPool::new(&density, &[vec![0.0], vec![1.0]], 42).unwrap();
    assert_eq!(pool.n_chains(), 2);
    assert_eq!(pool.chains()[1].seed, 43);
    ```
    */
    pub fn new<D>(density: &D, seed_states: &[Vec<f64>], seed: u64) -> Result<Self>
    where
        D: Density + ?Sized,
    {
        let chains = seed_states
            .iter()
            .enumerate()
            .map(|(i, state)| MHChain::new(density, state, seed.wrapping_add(i as u64)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chains, seed })
    }

    /// Advances every chain by `n_steps`, in parallel. Returns once all chains are done.
    ///
    /// The first failing chain's error is returned; chains that already finished keep their
    /// new states, so a failed block leaves the pool unevenly extended.
    pub fn run_block<D, Q>(&mut self, density: &D, proposal: &Q, n_steps: usize) -> Result<()>
    where
        D: Density + Sync + ?Sized,
        Q: Proposal + Sync + ?Sized,
    {
        self.chains
            .par_iter_mut()
            .try_for_each(|chain| chain.extend(density, proposal, n_steps))
    }

    /// Fails with `UnevenChains` unless every chain holds the same number of steps.
    pub fn check_lengths(&self) -> Result<()> {
        let lengths: Vec<usize> = self.chains.iter().map(MHChain::len).collect();
        if lengths.windows(2).all(|w| w[0] == w[1]) {
            Ok(())
        } else {
            Err(SamplerError::UnevenChains { lengths })
        }
    }

    /// Stacks all trajectories into a `(chains, steps, dims)` array.
    ///
    /// Fails with `UnevenChains` after a block that did not complete on every chain.
    pub fn record(&self) -> Result<Array3<f64>> {
        self.check_lengths()?;
        let views: Vec<ArrayView2<f64>> = self.chains.iter().map(|c| c.trajectory()).collect();
        Ok(stack(Axis(0), &views)?)
    }

    /// Per-chain fraction of accepted proposals.
    pub fn acceptance_fractions(&self) -> Vec<f64> {
        self.chains.iter().map(MHChain::acceptance_fraction).collect()
    }

    /// Mean acceptance fraction over all chains.
    pub fn mean_acceptance(&self) -> f64 {
        let fractions = self.acceptance_fractions();
        fractions.iter().sum::<f64>() / fractions.len().max(1) as f64
    }

    pub fn chains(&self) -> &[MHChain] {
        &self.chains
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn dim(&self) -> usize {
        self.chains.first().map_or(0, MHChain::dim)
    }

    /// Steps recorded per chain. All chains share this length between blocks.
    pub fn len(&self) -> usize {
        self.chains.first().map_or(0, MHChain::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generates `n` seed states from the `d` dimensional standard normal distribution.
pub fn init(n: usize, d: usize) -> Vec<Vec<f64>> {
    let rng = SmallRng::seed_from_u64(rand::thread_rng().gen::<u64>());
    _init(n, d, rng)
}

/// Same as [`init`] with the fixed seed 42.
pub fn init_det(n: usize, d: usize) -> Vec<Vec<f64>> {
    init_with_seed(n, d, 42)
}

/// Same as [`init`] except the draws are reproducible from `seed`.
pub fn init_with_seed(n: usize, d: usize, seed: u64) -> Vec<Vec<f64>> {
    _init(n, d, SmallRng::seed_from_u64(seed))
}

fn _init(n: usize, d: usize, mut rng: SmallRng) -> Vec<Vec<f64>> {
    (0..n)
        .map(|_| (0..d).map(|_| rng.sample(StandardNormal)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Gaussian2D, IsotropicGaussian};
    use ndarray::{arr1, arr2};

    fn target() -> Gaussian2D {
        Gaussian2D {
            mean: arr1(&[2.5, 2.5]),
            cov: arr2(&[[1.0, 0.6], [0.6, 2.0]]),
        }
    }

    fn seeds() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![0.9, 0.9],
            vec![-0.9, 0.9],
            vec![0.9, -0.9],
            vec![-0.9, -0.9],
        ]
    }

    #[test]
    fn record_has_chain_step_dim_layout() {
        let target = target();
        let proposal = IsotropicGaussian::new(1.0).unwrap();
        let mut pool = ChainPool::new(&target, &seeds(), 42).unwrap();
        pool.run_block(&target, &proposal, 400).unwrap();
        let record = pool.record().unwrap();
        assert_eq!(record.shape(), &[5, 400, 2]);
        assert_eq!(pool.len(), 400);
        assert_eq!(pool.acceptance_fractions().len(), 5);
    }

    #[test]
    fn record_is_append_only() {
        let target = target();
        let proposal = IsotropicGaussian::new(1.0).unwrap();
        let mut pool = ChainPool::new(&target, &seeds(), 7).unwrap();
        pool.run_block(&target, &proposal, 400).unwrap();
        let before = pool.record().unwrap();
        pool.run_block(&target, &proposal, 400).unwrap();
        let after = pool.record().unwrap();

        assert_eq!(after.shape(), &[5, 800, 2]);
        assert_eq!(after.slice(s![.., ..400, ..]), before);
    }

    #[test]
    fn parallel_blocks_are_reproducible() {
        let target = target();
        let proposal = IsotropicGaussian::new(1.0).unwrap();

        let mut blocks = ChainPool::new(&target, &seeds(), 11).unwrap();
        blocks.run_block(&target, &proposal, 400).unwrap();
        blocks.run_block(&target, &proposal, 400).unwrap();

        let mut single = ChainPool::new(&target, &seeds(), 11).unwrap();
        single.run_block(&target, &proposal, 800).unwrap();

        assert_eq!(blocks.record().unwrap(), single.record().unwrap());
        assert_eq!(blocks.acceptance_fractions(), single.acceptance_fractions());
    }

    #[test]
    fn uneven_chains_have_no_record() {
        let target = target();
        let proposal = IsotropicGaussian::new(1.0).unwrap();
        let mut pool = ChainPool::new(&target, &seeds(), 5).unwrap();
        pool.run_block(&target, &proposal, 8).unwrap();
        pool.chains[2].extend(&target, &proposal, 3).unwrap();

        match pool.record() {
            Err(SamplerError::UnevenChains { lengths }) => {
                assert_eq!(lengths, vec![8, 8, 11, 8, 8]);
            }
            other => panic!("Expected UnevenChains, got {other:?}"),
        }
        assert!(pool.check_lengths().is_err());
    }

    #[test]
    fn chains_use_distinct_streams() {
        let target = target();
        let proposal = IsotropicGaussian::new(1.0).unwrap();
        let same_start = vec![vec![2.5, 2.5]; 2];
        let mut pool = ChainPool::new(&target, &same_start, 3).unwrap();
        pool.run_block(&target, &proposal, 100).unwrap();
        let record = pool.record().unwrap();
        assert_ne!(record.index_axis(Axis(0), 0), record.index_axis(Axis(0), 1));
    }

    #[test]
    fn init_with_seed_is_deterministic() {
        let a = init_with_seed(4, 3, 9);
        let b = init_with_seed(4, 3, 9);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(a.iter().all(|x| x.len() == 3));
        assert_eq!(init_det(2, 2), init_with_seed(2, 2, 42));
    }
}
