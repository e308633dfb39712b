//! Expressions over decision variables.
//!
//! An expression is a constant plus a sum of terms `coeff * v1 * v2 * ...`.
//! Most terms are linear (one variable); quality-objective terms and the
//! per-100kcal scaling factor multiply two variables and stay symbolic until
//! evaluated against a solver assignment. Term keys are ordered so that two
//! equal expressions are built identically regardless of insertion order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const COEFF_EPSILON: f64 = 1e-12;

/// Dense index of a registered decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub usize);

/// Optimization direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sense {
    Minimize,
    Maximize,
}

/// Comparison operator of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Eq => "=",
        };
        f.write_str(s)
    }
}

/// Constant plus sum of `coeff * product(vars)` terms. The term key is the
/// sorted variable list of the product, so merging is canonical.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expr {
    terms: BTreeMap<Vec<VarId>, f64>,
    constant: f64,
}

impl Expr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(v: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: v,
        }
    }

    pub fn var(v: VarId) -> Self {
        let mut e = Self::zero();
        e.add_term(1.0, vec![v]);
        e
    }

    pub fn scaled_var(v: VarId, coeff: f64) -> Self {
        let mut e = Self::zero();
        e.add_term(coeff, vec![v]);
        e
    }

    /// Product of two variables with a coefficient.
    pub fn product(a: VarId, b: VarId, coeff: f64) -> Self {
        let mut e = Self::zero();
        e.add_term(coeff, vec![a, b]);
        e
    }

    /// Add `coeff * product(vars)`, merging with an existing term for the
    /// same variable product. Terms whose coefficient vanishes are removed.
    pub fn add_term(&mut self, coeff: f64, mut vars: Vec<VarId>) {
        vars.sort_unstable();
        match self.terms.entry(vars) {
            std::collections::btree_map::Entry::Occupied(mut o) => {
                *o.get_mut() += coeff;
                if o.get().abs() < COEFF_EPSILON {
                    o.remove();
                }
            }
            std::collections::btree_map::Entry::Vacant(v) => {
                if coeff.abs() >= COEFF_EPSILON {
                    v.insert(coeff);
                }
            }
        }
    }

    pub fn add_constant(&mut self, v: f64) {
        self.constant += v;
    }

    pub fn add_inplace(&mut self, other: &Expr) {
        self.constant += other.constant;
        for (vars, coeff) in &other.terms {
            self.add_term(*coeff, vars.clone());
        }
    }

    pub fn sub_inplace(&mut self, other: &Expr) {
        self.constant -= other.constant;
        for (vars, coeff) in &other.terms {
            self.add_term(-coeff, vars.clone());
        }
    }

    pub fn scale(&self, k: f64) -> Self {
        let mut e = Self::zero();
        e.constant = self.constant * k;
        for (vars, coeff) in &self.terms {
            e.add_term(coeff * k, vars.clone());
        }
        e
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    /// `(variable-product, coefficient)` pairs in canonical order.
    pub fn terms(&self) -> impl Iterator<Item = (&[VarId], f64)> {
        self.terms.iter().map(|(vars, c)| (vars.as_slice(), *c))
    }

    /// Largest number of variables multiplied in a single term: 0 for a
    /// constant, 1 for a linear expression, 2 for the bilinear forms the
    /// model produces.
    pub fn degree(&self) -> usize {
        self.terms.keys().map(|vars| vars.len()).max().unwrap_or(0)
    }

    /// Evaluate against a full assignment, indexed by `VarId`.
    pub fn eval(&self, values: &[f64]) -> f64 {
        let mut total = self.constant;
        for (vars, coeff) in &self.terms {
            let mut term = *coeff;
            for v in vars {
                term *= values.get(v.0).copied().unwrap_or(0.0);
            }
            total += term;
        }
        total
    }
}
