//! Label-standard scoring collaborator.
//!
//! Score names (nutrition grades, HSR, PDCAAS, umami index, ...) are opaque
//! to the core: it only needs to know whether a name belongs to a scoring
//! standard and what stage it applies to, then routes the computation here
//! instead of building a model expression.

use crate::solver::Assignment;
use formix_graph::GoodId;
use formix_model::{RecipeModel, ReferenceRecipe};

/// What a score is computed against: the reference baseline or a solved
/// recipe.
#[derive(Debug, Clone, Copy)]
pub enum ScoreView<'a> {
    Reference(&'a ReferenceRecipe),
    Solved {
        model: &'a RecipeModel,
        assignment: &'a Assignment,
    },
}

pub trait ScoringService {
    /// Whether `name` is a score this service computes.
    fn knows(&self, name: &str) -> bool;

    /// Whether the score's natural domain is integral; sweep points for such
    /// objectives are rounded before deduplication.
    fn integral(&self, _name: &str) -> bool {
        false
    }

    fn score(&self, name: &str, stage: &GoodId, view: &ScoreView<'_>) -> f64;
}
