//! The external solver contract.
//!
//! The solver is an opaque collaborator: it receives the model plus an
//! objective, reports a termination status, and assigns every registered
//! decision variable. The engine only requires that named constraints can be
//! added and removed between calls without rebuilding the model: the sweep
//! loops depend on that.

use formix_model::{Expr, RecipeModel, Sense, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
}

/// A full variable assignment, indexed by [`VarId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    values: Vec<f64>,
}

impl Assignment {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values.get(var.0).copied().unwrap_or(0.0)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn eval(&self, expr: &Expr) -> f64 {
        expr.eval(&self.values)
    }
}

#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// Present exactly when `status` is `Optimal`.
    pub assignment: Option<Assignment>,
}

impl SolveOutcome {
    pub fn optimal(assignment: Assignment) -> Self {
        Self {
            status: SolveStatus::Optimal,
            assignment: Some(assignment),
        }
    }

    pub fn infeasible() -> Self {
        Self {
            status: SolveStatus::Infeasible,
            assignment: None,
        }
    }
}

pub trait Solver {
    fn solve(&mut self, model: &RecipeModel, objective: &Expr, sense: Sense) -> SolveOutcome;
}
