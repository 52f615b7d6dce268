//! Samples a correlated 2D Gaussian until the chains are diagnosed as converged, then prints
//! the diagnostics history and the moments of the thinned draws.

use converged_mcmc::config::SamplerConfig;
use converged_mcmc::distributions::{Gaussian2D, IsotropicGaussian};
use converged_mcmc::sampler::ConvergentSampler;
use ndarray::{arr1, arr2, Axis};
use ndarray_stats::CorrelationExt;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    const SEED: u64 = 42;

    let target = Gaussian2D {
        mean: arr1(&[2.5, 2.5]),
        cov: arr2(&[[1.0, 0.6], [0.6, 2.0]]),
    };
    let proposal = IsotropicGaussian::new(1.5)?;
    let seed_states = vec![
        vec![0.0, 0.0],
        vec![0.9, 0.9],
        vec![-0.9, 0.9],
        vec![0.9, -0.9],
        vec![-0.9, -0.9],
    ];
    let config = SamplerConfig::new(seed_states)
        .set_ess_min(120)
        .set_r_max(1.1)
        .set_block_size(400)
        .set_seed(SEED);

    let mut sampler = ConvergentSampler::new(target, proposal, config)?;
    let output = sampler.run_progress()?;

    for it in &output.history {
        println!(
            "iteration {:>3}  L = {:>6}  R-hat = {:?}  ESS = {:?}",
            it.iteration, it.record_len, it.rhat, it.ess
        );
    }
    println!("Acceptance fractions: {:?}", output.acceptance);
    if let Some(summary) = output.summary() {
        println!("{summary}");
    }

    let samples = &output.samples;
    let mean = samples
        .mean_axis(Axis(0))
        .ok_or("No samples were extracted")?;
    let cov = samples.t().cov(1.0)?;
    println!("Mean: {mean}");
    println!("Covariance:\n{cov}");
    Ok(())
}
