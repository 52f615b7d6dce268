//! Between/within-chain variances and the potential scale reduction factor (R-hat).
//!
//! For one coordinate with draws `psi[j][t]` (`m` chains, `n` draws each):
//!
//! - `B = n / (m - 1) · Σ_j (mean_j − grand_mean)²`
//! - `W = mean_j [ 1/(n - 1) · Σ_t (psi[j][t] − mean_j)² ]`
//! - `var⁺ = (n - 1)/n · W + B/n`
//! - `R = sqrt(var⁺ / W)`

use ndarray::prelude::*;
use rayon::prelude::*;
use std::{cmp::Ordering, fmt};

use crate::ensemble::Ensemble;
use crate::error::{Result, SamplerError};

/// Variance decomposition of a single coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionStats {
    /// Within-chain variance `W`.
    pub within: f64,
    /// Between-chain variance `B`.
    pub between: f64,
    /// Pooled variance estimate `var⁺`.
    pub pooled_variance: f64,
    /// Potential scale reduction factor.
    pub rhat: f64,
}

impl DimensionStats {
    pub fn is_converged(&self, r_max: f64) -> bool {
        self.rhat <= r_max
    }
}

/// Computes [`DimensionStats`] for the `(m, n)` draws of coordinate `dimension`.
///
/// Fails with `DegenerateChain` when the within-chain variance is zero.
pub fn dimension_stats(psi: ArrayView2<f64>, dimension: usize) -> Result<DimensionStats> {
    let (m, n) = psi.dim();
    let (m_f, n_f) = (m as f64, n as f64);

    // Shifting by the first draw keeps constant chains at exactly zero deviation.
    let chain_means: Array1<f64> = psi
        .rows()
        .into_iter()
        .map(|row| {
            let x0 = row[0];
            x0 + row.iter().map(|x| x - x0).sum::<f64>() / n_f
        })
        .collect();
    let grand_mean = chain_means.sum() / m_f;

    let between = n_f / (m_f - 1.0) * chain_means.mapv(|cm| (cm - grand_mean).powi(2)).sum();
    let within = psi
        .rows()
        .into_iter()
        .zip(chain_means.iter())
        .map(|(row, cm)| row.iter().map(|x| (x - cm).powi(2)).sum::<f64>() / (n_f - 1.0))
        .sum::<f64>()
        / m_f;

    if within == 0.0 {
        return Err(SamplerError::DegenerateChain { dimension });
    }

    let pooled_variance = (n_f - 1.0) / n_f * within + between / n_f;
    Ok(DimensionStats {
        within,
        between,
        pooled_variance,
        rhat: (pooled_variance / within).sqrt(),
    })
}

/// Computes [`DimensionStats`] for every coordinate of the ensemble, in parallel.
pub fn convergence_stats(ensemble: &Ensemble) -> Result<Vec<DimensionStats>> {
    (0..ensemble.dim())
        .into_par_iter()
        .map(|d| dimension_stats(ensemble.dimension(d), d))
        .collect()
}

/// Summary of one diagnostic across coordinates.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct BasicStats {
    pub name: String,
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub mean: f64,
}

impl BasicStats {
    /// Summarizes `data`. Returns `None` for empty input.
    pub fn new(name: &str, data: &[f64]) -> Option<Self> {
        let mut sorted = data.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let (min, max) = (*sorted.first()?, *sorted.last()?);
        let median = sorted[sorted.len() / 2];
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Some(Self {
            name: name.to_string(),
            min,
            median,
            max,
            mean,
        })
    }
}

impl fmt::Display for BasicStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in [{:.3}, {:.3}], median: {:.3}, mean: {:.3}",
            self.name, self.min, self.max, self.median, self.mean
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn hand_computed_example() {
        // Means 2 and 4, grand mean 3: B = 3 / 1 · 2 = 6, W = 1,
        // var⁺ = 2/3 + 6/3 = 8/3.
        let psi = arr2(&[[1.0, 2.0, 3.0], [3.0, 4.0, 5.0]]);
        let stats = dimension_stats(psi.view(), 0).unwrap();
        assert_abs_diff_eq!(stats.between, 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.within, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.pooled_variance, 8.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.rhat, (8.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert!(!stats.is_converged(1.1));
    }

    #[test]
    fn identical_chain_means_give_rhat_below_one() {
        // B = 0, so R = sqrt((n - 1) / n).
        let psi = arr2(&[[0.0, 1.0, 2.0, 3.0], [3.0, 2.0, 1.0, 0.0]]);
        let stats = dimension_stats(psi.view(), 0).unwrap();
        assert_abs_diff_eq!(stats.between, 0.0);
        assert_abs_diff_eq!(stats.rhat, 0.75_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn rhat_is_bounded_below_by_the_within_chain_term() {
        // R² = (n - 1)/n + B/(n W) with B ≥ 0.
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..50 {
            let m = 2 * rng.gen_range(1..6);
            let n = rng.gen_range(2..40);
            let psi = Array2::from_shape_simple_fn((m, n), || rng.gen::<f64>() * 10.0 - 5.0);
            let stats = dimension_stats(psi.view(), 0).unwrap();
            let floor = ((n as f64 - 1.0) / n as f64).sqrt();
            assert!(stats.rhat >= floor - 1e-12);
            if stats.between >= stats.within {
                assert!(stats.rhat >= 1.0 - 1e-12);
            } else {
                assert!(stats.rhat < 1.0);
            }
        }
    }

    #[test]
    fn separated_chains_have_large_rhat() {
        let mut rng = SmallRng::seed_from_u64(1);
        let psi = Array2::from_shape_fn((4, 200), |(j, _)| j as f64 * 10.0 + rng.gen::<f64>());
        let stats = dimension_stats(psi.view(), 0).unwrap();
        assert!(stats.rhat > 5.0, "Expected large R-hat, got {}", stats.rhat);
    }

    #[test]
    fn constant_chains_are_degenerate() {
        let psi = arr2(&[[0.9, 0.9, 0.9], [-0.3, -0.3, -0.3], [0.1, 0.1, 0.1]]);
        assert!(matches!(
            dimension_stats(psi.view(), 3),
            Err(SamplerError::DegenerateChain { dimension: 3 })
        ));
    }

    #[test]
    fn stats_follow_dimension_order() {
        let record = Array3::from_shape_fn((2, 16, 2), |(c, t, d)| {
            if d == 0 {
                (t % 3) as f64
            } else {
                (c * 10 + t % 2) as f64
            }
        });
        let ensemble = Ensemble::from_record(record.view()).unwrap();
        let stats = convergence_stats(&ensemble).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1], dimension_stats(ensemble.dimension(1), 1).unwrap());
        assert!(stats[1].rhat > stats[0].rhat);
    }

    #[test]
    fn basic_stats_summary() {
        let s = BasicStats::new("R-hat", &[1.2, 1.0, 1.1]).unwrap();
        assert_eq!((s.min, s.median, s.max), (1.0, 1.1, 1.2));
        assert_abs_diff_eq!(s.mean, 1.1, epsilon = 1e-12);
        assert_eq!(
            s.to_string(),
            "R-hat in [1.000, 1.200], median: 1.100, mean: 1.100"
        );
        assert!(BasicStats::new("empty", &[]).is_none());
    }
}
