//! Engine-level errors: malformed requests only. Infeasibility and other
//! solver outcomes are [`crate::RunStatus`] values, never errors.

use formix_model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Zero objectives supplied; checked before any model construction.
    #[error("select at least one objective")]
    NoObjective,

    /// More than two objectives supplied.
    #[error("at most two objectives are supported, got {0}")]
    UnsupportedObjectives(usize),

    /// The objective names neither a model quantity nor a score any
    /// registered scoring service claims.
    #[error("objective `{0}` matches no cost, quality, or ingredient name and no scoring service claims it")]
    UnknownObjective(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}
