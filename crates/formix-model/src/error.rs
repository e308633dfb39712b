//! Model-layer errors. Solver outcomes (infeasibility and friends) are not
//! errors: they are terminal statuses owned by the engine.

use formix_graph::GraphError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    /// A constraint table key names no known constraint scope.
    #[error("`{kind}` is not a known constraint scope")]
    UnknownConstraintScope { kind: String },

    /// A constraint row is structurally unusable (missing item, bad value...).
    #[error("constraint `{name}`: {reason}")]
    InvalidConstraint { name: String, reason: String },

    /// A per-100kcal bound needs an energy quality and none of the accepted
    /// spellings exist in the nutrient profile.
    #[error("no energy quality in the nutrient profile (required for per-100kcal scaling)")]
    MissingEnergyQuality,

    /// A process-loss row names a quality that does not parse as
    /// `<category>__<name>`.
    #[error("`{key}` is not a valid quality key")]
    InvalidQualityKey { key: String },

    /// The requested objective matches no cost/quality/ingredient name and
    /// no scoring collaborator claimed it.
    #[error("objective `{0}` is not a cost, quality, or ingredient name")]
    UnknownObjective(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
