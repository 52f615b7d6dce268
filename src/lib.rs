//! Multi-chain Metropolis sampling that extends its chains until split R-hat and the
//! variogram-based effective sample size certify convergence, then thins the post-warm-up
//! draws to approximately independent samples. See [`sampler`] for the entry point.

pub mod autocorr;
pub mod config;
pub mod core;
pub mod distributions;
pub mod ensemble;
pub mod error;
pub mod metropolis_hastings;
pub mod sampler;
pub mod stats;
