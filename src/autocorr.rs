/*!
Variogram-based autocorrelation and effective sample size.

For one coordinate with split-chain draws `psi[j][i]` (`m` chains of length `n`) and pooled
variance `var⁺` from [`crate::stats`]:

- variogram `V(t) = 1 / (m (n − t)) · Σ_j Σ_{i=t}^{n−1} (psi[j][i] − psi[j][i−t])²`
- autocorrelation `ρ(t) = 1 − V(t) / (2 var⁺)`
- cutoff `T`, the smallest `t` with `ρ(t) + ρ(t+1) < 0`
- `ESS = m n / (1 + 2 Σ_{t=1}^{T−1} ρ(t))`, capped at `m n`

When no cutoff exists the tail is still too noisy to truncate; the profile then carries no
ESS and the driver has to gather more draws.

The lagged sums of squared differences are computed directly for short chains and through
autocovariances obtained by FFT (`rustfft`) for long ones.
*/

use ndarray::prelude::*;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::ensemble::Ensemble;
use crate::stats::DimensionStats;

/// Chains up to this length use the quadratic direct sum.
const BRUTE_FORCE_MAX_LEN: usize = 100;

/// Autocorrelation diagnostics of one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct AutocorrelationProfile {
    /// `V(t)` for `t = 0..n`.
    pub variogram: Array1<f64>,
    /// `ρ(t)` for `t = 0..n`.
    pub rho: Array1<f64>,
    /// First lag where consecutive autocorrelations sum below zero, if any.
    pub cutoff: Option<usize>,
    /// Effective sample size, defined only when a cutoff was found.
    pub ess: Option<f64>,
}

impl AutocorrelationProfile {
    /// Builds the profile of the `(m, n)` draws `psi` with pooled variance `pooled_variance`.
    pub fn new(psi: ArrayView2<f64>, pooled_variance: f64) -> Self {
        let (m, n) = psi.dim();
        let variogram = variogram(psi);
        let rho = variogram.mapv(|v| 1.0 - v / (2.0 * pooled_variance));
        let cutoff = cutoff_lag(rho.view());
        let ess = cutoff.map(|t| effective_sample_size(rho.view(), t, m * n));
        Self {
            variogram,
            rho,
            cutoff,
            ess,
        }
    }
}

/// Computes the profile of every coordinate, in parallel.
///
/// `stats` must hold one entry per coordinate of `ensemble`, in order.
pub fn autocorrelation_profiles(
    ensemble: &Ensemble,
    stats: &[DimensionStats],
) -> Vec<AutocorrelationProfile> {
    stats
        .par_iter()
        .enumerate()
        .map(|(d, s)| AutocorrelationProfile::new(ensemble.dimension(d), s.pooled_variance))
        .collect()
}

/// Variogram `V(t)`, `t = 0..n`, of the `(m, n)` draws `psi`.
pub fn variogram(psi: ArrayView2<f64>) -> Array1<f64> {
    let (m, n) = psi.dim();
    let chains: Vec<ArrayView1<f64>> = psi.rows().into_iter().collect();

    let per_chain: Vec<Array1<f64>> = if n <= BRUTE_FORCE_MAX_LEN {
        chains.into_par_iter().map(lagged_sq_diffs_bf).collect()
    } else {
        let plans = FftPlans::new(n);
        chains
            .into_par_iter()
            .map(|chain| lagged_sq_diffs_fft(chain, &plans))
            .collect()
    };

    let mut total = Array1::<f64>::zeros(n);
    for sums in &per_chain {
        total += sums;
    }
    Array1::from_shape_fn(n, |t| total[t] / (m * (n - t)) as f64)
}

/// Smallest `t` in `[0, n − 1)` with `ρ(t) + ρ(t + 1) < 0`.
pub fn cutoff_lag(rho: ArrayView1<f64>) -> Option<usize> {
    rho.windows(2)
        .into_iter()
        .position(|pair| pair[0] + pair[1] < 0.0)
}

/**
Effective sample size of `size = m n` draws truncated at lag `cutoff`.

An empty sum (`cutoff ≤ 1`) gives `size`. Negative partial sums would push the estimate above
`size`, so the result is capped there.
*/
pub fn effective_sample_size(rho: ArrayView1<f64>, cutoff: usize, size: usize) -> f64 {
    let size = size as f64;
    let tail: f64 = if cutoff > 1 {
        rho.slice(s![1..cutoff]).sum()
    } else {
        0.0
    };
    let denom = 1.0 + 2.0 * tail;
    if denom > 1.0 {
        size / denom
    } else {
        size
    }
}

/// `out[t] = Σ_{i=t}^{n−1} (x[i] − x[i−t])²`, by direct summation.
fn lagged_sq_diffs_bf(x: ArrayView1<f64>) -> Array1<f64> {
    let n = x.len();
    Array1::from_shape_fn(n, |t| {
        (t..n).map(|i| (x[i] - x[i - t]).powi(2)).sum::<f64>()
    })
}

/// Forward and inverse plans for zero-padded transforms of chains of length `n`.
struct FftPlans {
    n_padded: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl FftPlans {
    fn new(n: usize) -> Self {
        // Next power of 2 >= 2n - 1 avoids wrap-around.
        let n_padded = (2 * n).saturating_sub(1).next_power_of_two();
        let mut planner = FftPlanner::new();
        Self {
            n_padded,
            forward: planner.plan_fft_forward(n_padded),
            inverse: planner.plan_fft_inverse(n_padded),
        }
    }
}

/// Same as [`lagged_sq_diffs_bf`], expanded as
/// `Σ_{i≥t} x_i² + Σ_{i<n−t} x_i² − 2 Σ_i x_i x_{i+t}` with the cross term from an FFT.
/// The chain is centered first; the differences do not depend on the shift.
fn lagged_sq_diffs_fft(x: ArrayView1<f64>, plans: &FftPlans) -> Array1<f64> {
    let n = x.len();
    let mean = x.sum() / n as f64;
    let centered: Vec<f64> = x.iter().map(|xi| xi - mean).collect();

    // prefix[j] = Σ_{i<j} x_i²
    let mut prefix: Vec<f64> = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for xi in &centered {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + xi * xi);
    }

    let mut buffer: Vec<Complex<f64>> = centered
        .iter()
        .map(|&re| Complex { re, im: 0.0 })
        .chain(std::iter::repeat(Complex { re: 0.0, im: 0.0 }).take(plans.n_padded - n))
        .collect();
    plans.forward.process(&mut buffer);
    buffer.iter_mut().for_each(|z| *z *= z.conj());
    plans.inverse.process(&mut buffer);

    // rustfft does not normalize.
    let scale = plans.n_padded as f64;
    Array1::from_shape_fn(n, |t| {
        if t == 0 {
            return 0.0;
        }
        let cross = buffer[t].re / scale;
        let sum = (prefix[n] - prefix[t]) + prefix[n - t] - 2.0 * cross;
        sum.max(0.0)
    })
}
