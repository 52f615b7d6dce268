/*!
# Metropolis Chains

A single random-walk Metropolis chain over `R^k`. Each [`MHChain`] owns

- its current state and the cached density at that state,
- its own [`SmallRng`], seeded once and consumed strictly in step order,
- the full trajectory of visited states (one row per step, the seed state excluded), and
- a parallel record of which steps accepted their candidate.

Trajectories only grow. [`MHChain::extend`] appends rows and never touches earlier ones, so a
chain extended by `a` and then `b` steps holds exactly the same states as one extended by
`a + b` steps at once.

```rust
use converged_mcmc::distributions::{Gaussian2D, IsotropicGaussian};
use converged_mcmc::metropolis_hastings::MHChain;
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
let proposal = IsotropicGaussian::new(1.0).unwrap();
let mut chain = MHChain::new(&target, &[0.0, 0.0], 42).unwrap();
chain.extend(&target, &proposal, 100).unwrap();
assert_eq!(chain.len(), 100);
assert_eq!(chain.trajectory().shape(), &[100, 2]);
```
*/

use ndarray::prelude::*;
use rand::prelude::*;
use rand::rngs::SmallRng;

use crate::distributions::{Density, Proposal};
use crate::error::{Result, SamplerError};

/// Outcome of one Metropolis update.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The state after the update: the candidate if accepted, the old state otherwise.
    pub state: Vec<f64>,
    /// Density at `state`.
    pub density: f64,
    pub accepted: bool,
}

/// Evaluates `density` at `x`, rejecting values that cannot enter an acceptance ratio.
pub fn checked_density<D: Density + ?Sized>(density: &D, x: &[f64]) -> Result<f64> {
    let value = density.density(x);
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(SamplerError::DensityEvaluation {
            value,
            state: x.to_vec(),
        })
    }
}

/**
Performs one Metropolis update from `state`, whose density `state_density` is already known.

A candidate is drawn from `proposal` and accepted iff a uniform draw `u` satisfies
`u < f(candidate) / f(state)`. The proposal is assumed symmetric, so no correction term enters
the ratio. When `f(state) == 0` the ratio is taken as infinite and the candidate is accepted,
which lets a chain started off the support find its way in.

The generator is consumed in a fixed order: the proposal's draws first, then one uniform.
*/
pub fn advance<D, Q>(
    state: &[f64],
    state_density: f64,
    density: &D,
    proposal: &Q,
    rng: &mut SmallRng,
) -> Result<Transition>
where
    D: Density + ?Sized,
    Q: Proposal + ?Sized,
{
    let candidate = proposal.propose(state, rng);
    let candidate_density = checked_density(density, &candidate)?;
    let ratio = if state_density > 0.0 {
        candidate_density / state_density
    } else {
        f64::INFINITY
    };
    let u: f64 = rng.gen();
    if u < ratio {
        Ok(Transition {
            state: candidate,
            density: candidate_density,
            accepted: true,
        })
    } else {
        Ok(Transition {
            state: state.to_vec(),
            density: state_density,
            accepted: false,
        })
    }
}

/// A single Metropolis chain with its own generator and append-only trajectory.
#[derive(Debug, Clone)]
pub struct MHChain {
    /// The chain-specific random seed.
    pub seed: u64,
    rng: SmallRng,
    current_state: Vec<f64>,
    current_density: f64,
    trajectory: Array2<f64>,
    accepted: Vec<bool>,
}

impl MHChain {
    /// Creates a chain at `initial_state`, evaluating the density there once.
    pub fn new<D: Density + ?Sized>(density: &D, initial_state: &[f64], seed: u64) -> Result<Self> {
        let current_density = checked_density(density, initial_state)?;
        Ok(Self {
            seed,
            rng: SmallRng::seed_from_u64(seed),
            current_state: initial_state.to_vec(),
            current_density,
            trajectory: Array2::zeros((0, initial_state.len())),
            accepted: Vec::new(),
        })
    }

    /// Performs one update and appends the resulting state to the trajectory.
    pub fn step<D, Q>(&mut self, density: &D, proposal: &Q) -> Result<&[f64]>
    where
        D: Density + ?Sized,
        Q: Proposal + ?Sized,
    {
        let transition = advance(
            &self.current_state,
            self.current_density,
            density,
            proposal,
            &mut self.rng,
        )?;
        self.trajectory
            .push_row(ArrayView1::from(transition.state.as_slice()))?;
        self.accepted.push(transition.accepted);
        self.current_state = transition.state;
        self.current_density = transition.density;
        Ok(&self.current_state)
    }

    /// Runs `n_steps` further updates.
    pub fn extend<D, Q>(&mut self, density: &D, proposal: &Q, n_steps: usize) -> Result<()>
    where
        D: Density + ?Sized,
        Q: Proposal + ?Sized,
    {
        self.trajectory.reserve_rows(n_steps)?;
        self.accepted.reserve(n_steps);
        for _ in 0..n_steps {
            self.step(density, proposal)?;
        }
        Ok(())
    }

    /// All visited states so far, shape `(steps, dims)`.
    pub fn trajectory(&self) -> ArrayView2<'_, f64> {
        self.trajectory.view()
    }

    /// One flag per step, `true` where the candidate was accepted.
    pub fn acceptance_record(&self) -> &[bool] {
        &self.accepted
    }

    /// Fraction of accepted steps, or 0 for a chain that has not moved yet.
    pub fn acceptance_fraction(&self) -> f64 {
        if self.accepted.is_empty() {
            return 0.0;
        }
        self.accepted.iter().filter(|&&a| a).count() as f64 / self.accepted.len() as f64
    }

    pub fn current_state(&self) -> &[f64] {
        &self.current_state
    }

    pub fn dim(&self) -> usize {
        self.current_state.len()
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Gaussian2D, IsotropicGaussian};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn target() -> Gaussian2D {
        Gaussian2D {
            mean: arr1(&[0.0, 1.0]),
            cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
        }
    }

    #[test]
    fn uphill_move_is_always_accepted() {
        let density = |x: &[f64]| (-x[0] * x[0]).exp();
        let toward_mode = |x: &[f64], _rng: &mut SmallRng| -> Vec<f64> { vec![x[0] * 0.5] };
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..50 {
            let t = advance(&[2.0], (-4.0_f64).exp(), &density, &toward_mode, &mut rng).unwrap();
            assert!(t.accepted);
            assert_eq!(t.state, vec![1.0]);
        }
    }

    #[test]
    fn move_to_zero_density_is_always_rejected() {
        let density = |x: &[f64]| if x[0] > 0.0 { 1.0 } else { 0.0 };
        let off_support = |x: &[f64], _rng: &mut SmallRng| -> Vec<f64> { vec![-x[0]] };
        let mut rng = SmallRng::seed_from_u64(3);
        let t = advance(&[1.0], 1.0, &density, &off_support, &mut rng).unwrap();
        assert!(!t.accepted);
        assert_eq!(t.state, vec![1.0]);
        assert_eq!(t.density, 1.0);
    }

    #[test]
    fn zero_density_start_accepts_any_candidate() {
        let density = |x: &[f64]| if x[0] > 0.0 { 1.0 } else { 0.0 };
        let jump = |_x: &[f64], _rng: &mut SmallRng| -> Vec<f64> { vec![5.0] };
        let mut rng = SmallRng::seed_from_u64(3);
        let t = advance(&[-1.0], 0.0, &density, &jump, &mut rng).unwrap();
        assert!(t.accepted);
        assert_eq!(t.state, vec![5.0]);
    }

    #[test]
    fn invalid_density_values_are_propagated() {
        let proposal = IsotropicGaussian::new(1.0).unwrap();
        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            let density = move |_x: &[f64]| bad;
            match MHChain::new(&density, &[0.0], 1) {
                Err(SamplerError::DensityEvaluation { state, .. }) => assert_eq!(state, vec![0.0]),
                other => panic!("Expected DensityEvaluation, got {other:?}"),
            }
        }

        let negative_left = |x: &[f64]| if x[0] < 0.0 { -1.0 } else { 1.0 };
        let mut chain = MHChain::new(&negative_left, &[0.0], 1).unwrap();
        let err = chain.extend(&negative_left, &proposal, 1_000).unwrap_err();
        assert!(matches!(err, SamplerError::DensityEvaluation { value, .. } if value == -1.0));
    }

    #[test]
    fn extending_in_pieces_matches_one_long_run() {
        let target = target();
        let proposal = IsotropicGaussian::new(1.0).unwrap();

        let mut pieces = MHChain::new(&target, &[10.0, 12.0], 42).unwrap();
        pieces.extend(&target, &proposal, 120).unwrap();
        let prefix = pieces.trajectory().to_owned();
        pieces.extend(&target, &proposal, 80).unwrap();

        let mut whole = MHChain::new(&target, &[10.0, 12.0], 42).unwrap();
        whole.extend(&target, &proposal, 200).unwrap();

        assert_eq!(pieces.trajectory().slice(s![..120, ..]), prefix);
        assert_eq!(pieces.trajectory(), whole.trajectory());
        assert_eq!(pieces.acceptance_record(), whole.acceptance_record());
    }

    #[test]
    fn acceptance_record_matches_state_changes() {
        let target = target();
        let proposal = IsotropicGaussian::new(1.5).unwrap();
        let mut chain = MHChain::new(&target, &[0.0, 0.0], 7).unwrap();
        chain.extend(&target, &proposal, 500).unwrap();

        let traj = chain.trajectory();
        for t in 1..chain.len() {
            let moved = traj.row(t) != traj.row(t - 1);
            assert_eq!(moved, chain.acceptance_record()[t]);
        }
        let frac = chain.acceptance_fraction();
        assert!(frac > 0.1 && frac < 0.9, "Unexpected acceptance fraction {frac}");
        assert_abs_diff_eq!(
            frac,
            chain.acceptance_record().iter().filter(|&&a| a).count() as f64 / 500.0
        );
    }
}
