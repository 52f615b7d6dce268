/*!
Target densities and proposal (jump) distributions.

The sampler only needs two things from its caller:

- a [`Density`], an unnormalized non-negative function on `R^k`, and
- a [`Proposal`], a symmetric stepper that maps the current state to a candidate.

Plain closures implement both traits, so small problems need no new types:

```rust
use converged_mcmc::distributions::{Density, Proposal};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

let density = |x: &[f64]| (-0.5 * x.iter().map(|v| v * v).sum::<f64>()).exp();
let proposal = |x: &[f64], rng: &mut SmallRng| -> Vec<f64> {
    x.iter().map(|v| v + rng.gen_range(-0.5..0.5)).collect()
};

let mut rng = SmallRng::seed_from_u64(42);
let candidate = proposal.propose(&[0.0, 0.0], &mut rng);
assert_eq!(candidate.len(), 2);
assert!(density.density(&candidate) > 0.0);
```

The proposal receives the chain's own random number generator; it must not keep one of its
own, otherwise chains would no longer be reproducible from the global seed.

[`Gaussian2D`] and [`IsotropicGaussian`] are provided for tests and the demo binary.
*/

use ndarray::{arr1, arr2, Array1, Array2};
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

use crate::error::{Result, SamplerError};

/// A target density `f: R^k -> [0, inf)`, known up to a constant.
pub trait Density {
    /// Evaluates the (unnormalized) density at `x`.
    fn density(&self, x: &[f64]) -> f64;
}

/// A symmetric proposal `q(x' | x) = q(x | x')`. No Hastings correction is applied.
pub trait Proposal {
    /// Draws a candidate state from the current one using the chain's generator.
    fn propose(&self, current: &[f64], rng: &mut SmallRng) -> Vec<f64>;
}

impl<F> Density for F
where
    F: Fn(&[f64]) -> f64,
{
    fn density(&self, x: &[f64]) -> f64 {
        self(x)
    }
}

impl<F> Proposal for F
where
    F: Fn(&[f64], &mut SmallRng) -> Vec<f64>,
{
    fn propose(&self, current: &[f64], rng: &mut SmallRng) -> Vec<f64> {
        self(current, rng)
    }
}

/**
A 2D Gaussian density parameterized by a mean vector and a 2×2 covariance matrix.

# Examples

```rust
use converged_mcmc::distributions::{Density, Gaussian2D};
use ndarray::{arr1, arr2};

let gauss = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
let p = gauss.density(&[0.0, 0.0]);
assert!((p - 1.0 / (2.0 * std::f64::consts::PI)).abs() < 1e-12);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian2D {
    pub mean: Array1<f64>,
    pub cov: Array2<f64>,
}

impl Gaussian2D {
    /// Normalized log-density.
    pub fn log_prob(&self, theta: &[f64]) -> f64 {
        let (a, b, c, d) = (
            self.cov[(0, 0)],
            self.cov[(0, 1)],
            self.cov[(1, 0)],
            self.cov[(1, 1)],
        );
        let det = a * d - b * c;
        let inv_cov = arr2(&[[d, -b], [-c, a]]) / det;
        let diff = arr1(&[theta[0], theta[1]]) - &self.mean;
        let quad = diff.dot(&inv_cov.dot(&diff));
        -(2.0 * PI).ln() - 0.5 * det.abs().ln() - 0.5 * quad
    }
}

impl Density for Gaussian2D {
    fn density(&self, x: &[f64]) -> f64 {
        self.log_prob(x).exp()
    }
}

/**
A random-walk proposal adding independent `N(0, std²)` noise to every coordinate.

# Examples

```rust
use converged_mcmc::distributions::{IsotropicGaussian, Proposal};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let proposal = IsotropicGaussian::new(1.0).unwrap();
let mut rng = SmallRng::seed_from_u64(7);
let candidate = proposal.propose(&[0.0, 0.0], &mut rng);
assert_eq!(candidate.len(), 2);
```
*/
#[derive(Debug, Clone)]
pub struct IsotropicGaussian {
    pub std: f64,
    normal: Normal<f64>,
}

impl IsotropicGaussian {
    /// Creates a proposal with the given step standard deviation.
    pub fn new(std: f64) -> Result<Self> {
        let normal = Normal::new(0.0, std).map_err(|e| {
            SamplerError::InvalidConfiguration(format!("proposal std {std} rejected: {e}"))
        })?;
        Ok(Self { std, normal })
    }
}

impl Proposal for IsotropicGaussian {
    fn propose(&self, current: &[f64], rng: &mut SmallRng) -> Vec<f64> {
        current
            .iter()
            .map(|x| x + self.normal.sample(&mut *rng))
            .collect()
    }
}
