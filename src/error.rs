//! Crate-wide error type covering model construction, sampler
//! configuration, and tuning failures.

use thiserror::Error;

/// Errors surfaced by model construction, sampler configuration, and the
/// adaptive tuning procedure.
///
/// All of these are fatal for the call that produced them. In particular a
/// [`Error::TuningFailed`] leaves the step sizes in a partially adjusted
/// state that must not be reused; re-run tuning with a larger iteration
/// limit or a smaller `tune_interval`.
#[derive(Error, Debug)]
pub enum Error {
    /// Sampling was requested on a [`Sampler`](crate::sampler::Sampler)
    /// with no step method assigned.
    #[error("step method must be assigned before sampling can begin")]
    MissingStepMethod,

    /// Pre-tuning was requested but the assigned step method does not
    /// implement it.
    #[error("the assigned step method does not support pre-tuning")]
    TuningUnsupported,

    /// A tuning iteration limit was given without an interval length.
    #[error("tune_interval must be set explicitly for pre-tuning")]
    TuneIntervalUnset,

    /// One of the tuning phases exhausted its iteration budget before
    /// reaching the required run of successful intervals.
    #[error("aborting tuning: exceeded {limit} steps; consider reducing tune_interval")]
    TuningFailed { limit: usize },

    /// A stochastic variable was built without a log-probability function.
    #[error("stochastic {name:?} logp not defined")]
    MissingLogp { name: String },

    /// A stochastic variable was built without an initial value.
    #[error("stochastic {name:?} value not defined")]
    MissingValue { name: String },

    /// Two stochastic variables were given the same name.
    #[error("a stochastic variable named {name:?} already exists in this model")]
    DuplicateName { name: String },

    /// An observed variable was built with a random-draw function.
    #[error("stochastic {name:?} is observed and must not carry a random function")]
    RandomOnObserved { name: String },

    /// An unobserved (free) variable was built with an array value; free
    /// variables must be scalar so they can be perturbed and recorded.
    #[error("free stochastic {name:?} must have a scalar value")]
    NonScalarFree { name: String },

    /// A parent reference pointed outside the model's node arena.
    #[error("stochastic {name:?} references parent {parent:?} from a different model")]
    UnknownParent { name: String, parent: String },

    /// A builtin stochastic was constructed with parameters outside its
    /// distribution's domain.
    #[error("invalid parameter for stochastic {name:?}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A prior draw was requested for a free variable that has no
    /// random-draw function.
    #[error("stochastic {name:?} has no random function; cannot draw from its prior")]
    MissingRandomFn { name: String },

    /// Chains with differing variable layouts were combined.
    #[error("cannot combine chains with differing parameters or lengths")]
    ChainMismatch,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
