//! Warm-up removal and chain splitting.
//!
//! An [`Ensemble`] is what the diagnostics see: the record with its first half discarded and
//! every remaining trajectory cut into two equal halves, each treated as a chain of its own.
//! The warm-up boundary moves as the record grows, so the ensemble is always rebuilt from the
//! whole record.

use ndarray::{concatenate, prelude::*};

use crate::error::{Result, SamplerError};

/// Split post-warm-up draws, shape `(m, n, dims)` with `m = 2 × chains`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    draws: Array3<f64>,
}

impl Ensemble {
    /**
    Builds the ensemble from a `(chains, steps, dims)` record of length `L`.

    The first `L / 2` steps of every chain are discarded and `n = (L / 2) / 2`. Chain `j` of
    the record contributes its first post-warm-up half as ensemble chain `j` and its second
    half as ensemble chain `chains + j`.

    Fails with `EnsembleTooShort` when `n < 2`, since a within-chain variance needs two draws.

    # Examples

    ```rust
    use converged_mcmc::ensemble::Ensemble;
    use ndarray::Array3;

    let record = Array3::from_shape_fn((3, 400, 2), |(c, t, d)| (c * 1000 + t * 2 + d) as f64);
    let ensemble = Ensemble::from_record(record.view()).unwrap();
    assert_eq!(ensemble.n_chains(), 6);
    assert_eq!(ensemble.chain_len(), 100);
    ```
    */
    pub fn from_record(record: ArrayView3<f64>) -> Result<Self> {
        let (n_chains, length, _) = record.dim();
        let warmup = length / 2;
        let n = warmup / 2;
        if n < 2 || n_chains == 0 {
            return Err(SamplerError::EnsembleTooShort { length });
        }
        let first = record.slice(s![.., warmup..warmup + n, ..]);
        let second = record.slice(s![.., warmup + n..warmup + 2 * n, ..]);
        let draws = concatenate(Axis(0), &[first, second])?;
        Ok(Self { draws })
    }

    /// Number of split chains `m`.
    pub fn n_chains(&self) -> usize {
        self.draws.shape()[0]
    }

    /// Draws per split chain `n`.
    pub fn chain_len(&self) -> usize {
        self.draws.shape()[1]
    }

    pub fn dim(&self) -> usize {
        self.draws.shape()[2]
    }

    /// Total draws `m · n`.
    pub fn size(&self) -> usize {
        self.n_chains() * self.chain_len()
    }

    /// The `(m, n)` draws of coordinate `d`.
    pub fn dimension(&self, d: usize) -> ArrayView2<'_, f64> {
        self.draws.index_axis(Axis(2), d)
    }

    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.draws.view()
    }

    pub fn into_inner(self) -> Array3<f64> {
        self.draws
    }
}
