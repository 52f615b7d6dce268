//! Error type shared by every stage of a sampling run.

use thiserror::Error;

/// Everything that can stop a sampling run.
#[derive(Error, Debug)]
pub enum SamplerError {
    /// The configuration was rejected before any sampling took place.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The target density returned a value that cannot enter a Metropolis ratio.
    #[error("Target density returned {value} at state {state:?}; expected a finite, non-negative value")]
    DensityEvaluation { value: f64, state: Vec<f64> },
    /// Within-chain variance vanished, i.e. no chain ever moved along this coordinate.
    #[error("Within-chain variance is zero for dimension {dimension}; check the proposal and density")]
    DegenerateChain { dimension: usize },
    /// The iteration cap was hit before every dimension converged.
    #[error("No convergence after {iterations} outer iterations (max R-hat {max_rhat:.4}, min ESS {min_ess:.1})")]
    NonConvergence {
        iterations: usize,
        max_rhat: f64,
        min_ess: f64,
    },
    /// The record is too short to split into chains of at least two draws.
    #[error("Record of length {length} is too short to form a split ensemble")]
    EnsembleTooShort { length: usize },
    /// A block failed part-way, so the chains no longer share one length.
    #[error("Chains hold unequal numbers of steps {lengths:?}; a block failed part-way and the run cannot continue")]
    UnevenChains { lengths: Vec<usize> },
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error("Progress bar template is invalid: {0}")]
    Progress(#[from] indicatif::style::TemplateError),
}

/// Convenience type for `Result<T, SamplerError>`.
pub type Result<T> = std::result::Result<T, SamplerError>;
