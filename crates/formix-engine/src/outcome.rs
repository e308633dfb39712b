//! Terminal run statuses and their human-facing messages.
//!
//! Solver outcomes are business results, not faults: a run always ends in
//! one of these statuses unless the request itself was malformed (see
//! [`crate::EngineError`]).

use crate::report::{DecisionReport, LoosenedConstraint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Optimal solution found.
    Optimal,
    /// Solved, but only after the automatic relaxation pass widened the
    /// active ingredient bounds.
    OptimalLoosened,
    /// Single-objective solve found no feasible point.
    Infeasible,
    /// Range discovery for a single ranged objective failed.
    InfeasibleRange,
    /// Range discovery or the whole sweep failed in a two-objective run.
    InfeasibleMulti,
    /// Loosening strengths are only supported with exactly one objective.
    LoosenMultiObjective,
}

impl RunStatus {
    pub fn message(self) -> &'static str {
        match self {
            RunStatus::Optimal => "Optimal solution found!",
            RunStatus::OptimalLoosened => {
                "Problem was infeasible, but solved with loosened active ingredient constraints"
            }
            RunStatus::Infeasible => "No optimal solution found. Try loosening constraints",
            RunStatus::InfeasibleRange => {
                "Problem infeasible! Set either minimize or maximize and loosen constraints to make it feasible"
            }
            RunStatus::InfeasibleMulti => {
                "Problem infeasible! Set a single objective and loosen constraints to make it feasible"
            }
            RunStatus::LoosenMultiObjective => {
                "The loosen constraints feature only supported for one objective"
            }
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            RunStatus::Optimal => Severity::Success,
            RunStatus::OptimalLoosened => Severity::Info,
            RunStatus::Infeasible
            | RunStatus::InfeasibleRange
            | RunStatus::InfeasibleMulti
            | RunStatus::LoosenMultiObjective => Severity::Danger,
        }
    }

    pub fn is_solved(self) -> bool {
        matches!(self, RunStatus::Optimal | RunStatus::OptimalLoosened)
    }
}

/// Everything a finished run hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub message: &'static str,
    pub report: DecisionReport,
    /// Soft constraints whose resolved slack is non-negligible.
    pub loosened: Vec<LoosenedConstraint>,
    /// Constraint names the relaxation pass may never touch.
    pub not_loosenable: Vec<String>,
}

impl RunOutcome {
    pub fn empty(status: RunStatus) -> Self {
        Self {
            status,
            message: status.message(),
            report: DecisionReport::default(),
            loosened: Vec::new(),
            not_loosenable: Vec::new(),
        }
    }
}
