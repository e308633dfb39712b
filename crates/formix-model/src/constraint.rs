//! Business-constraint vocabulary: normalized rows, scopes, per-unit bases
//! and loosening strengths.
//!
//! Every constraint scope is a fixed variant here: the model dispatches on
//! this enum with one builder per family, rather than growing constraint
//! families named after arbitrary input strings.

use crate::expr::CmpOp;
use crate::quality::QualityCategory;
use formix_graph::GoodId;
use serde::{Deserialize, Serialize};

/// Which part of the model a constraint row binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Bounds a blend fraction `x[ingredient, stage]`.
    Ingredient,
    /// Bounds an aggregated stage quality `cq[stage, quality]`.
    Quality(QualityCategory),
    /// Bounds the total blend amount of a tagged ingredient class.
    ClassAmount,
    /// Bounds the cost expression.
    Cost,
}

/// How a two-item row combines its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombineOp {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
    /// Ratio rows compare `item1 / item2` to the value; they are linearized
    /// as `item1 - value * item2` and never percentage-scaled (a ratio
    /// already is one).
    #[serde(rename = "/")]
    Ratio,
}

/// Relaxation budget attached to a soft constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoosenStrength {
    Low,
    Medium,
    High,
}

impl LoosenStrength {
    /// Maximum slack allowed past the bound, in the model's fraction domain.
    pub fn budget(self) -> f64 {
        match self {
            LoosenStrength::Low => 0.05,
            LoosenStrength::Medium => 0.10,
            LoosenStrength::High => 0.20,
        }
    }
}

/// Unit basis a quality bound is expressed in. Ingredient rows are always
/// per-100g; cost rows carry no basis at all (factor 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerUnit {
    #[serde(rename = "100g")]
    Per100g,
    #[serde(rename = "serving")]
    PerServing,
    #[serde(rename = "100ml")]
    Per100Ml,
    #[serde(rename = "100kcal")]
    Per100Kcal,
}

impl PerUnit {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "100g" => Some(PerUnit::Per100g),
            "serving" => Some(PerUnit::PerServing),
            "100ml" => Some(PerUnit::Per100Ml),
            "100kcal" => Some(PerUnit::Per100Kcal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PerUnit::Per100g => "100g",
            PerUnit::PerServing => "serving",
            PerUnit::Per100Ml => "100ml",
            PerUnit::Per100Kcal => "100kcal",
        }
    }
}

/// One normalized business-constraint row.
///
/// `value` is stored in the solver's domain: ingredient and class-amount
/// rows arrive percentage-valued and are divided by 100 at normalization
/// (except ratio rows), quality and cost rows keep their unit value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRow {
    pub name: String,
    pub kind: ConstraintKind,
    pub item1: String,
    pub combine: Option<CombineOp>,
    pub item2: Option<String>,
    pub op: CmpOp,
    pub value: f64,
    pub per: Option<PerUnit>,
    pub active: bool,
    pub target: GoodId,
    pub loosen: Option<LoosenStrength>,
}

impl ConstraintRow {
    pub fn is_soft(&self) -> bool {
        self.loosen.is_some()
    }
}

/// Ingredient-count limits for one tagged class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCountRow {
    pub class_name: String,
    pub min_ingredients: f64,
    pub max_ingredients: f64,
    pub target: GoodId,
}

/// Serving-size parameters driving per-unit scaling factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServingParams {
    /// Serving size as sold, grams (`sps_as_sold_g`).
    pub sold_g: f64,
    /// Serving size as consumed, grams (`sps_as_consummed_g`).
    pub consumed_g: f64,
    /// Density as consumed, g/ml (`dp_as_consumed_gml`); 1 when unspecified.
    pub density: f64,
}

impl Default for ServingParams {
    fn default() -> Self {
        Self {
            sold_g: 100.0,
            consumed_g: 100.0,
            density: 1.0,
        }
    }
}

impl ServingParams {
    /// Constant scaling factor for the bases that do not depend on the
    /// solved energy value. `Per100Kcal` has no constant factor: the model
    /// builds a symbolic one from the stage's energy variable.
    pub fn constant_factor(&self, per: Option<PerUnit>) -> Option<f64> {
        match per {
            None | Some(PerUnit::Per100g) => Some(1.0),
            Some(PerUnit::PerServing) => Some(100.0 / self.sold_g),
            Some(PerUnit::Per100Ml) => Some(self.consumed_g / (self.sold_g * self.density)),
            Some(PerUnit::Per100Kcal) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serving_factors() {
        let serving = ServingParams {
            sold_g: 25.0,
            consumed_g: 200.0,
            density: 1.0,
        };
        assert_eq!(serving.constant_factor(Some(PerUnit::Per100g)), Some(1.0));
        assert_eq!(serving.constant_factor(None), Some(1.0));
        assert_eq!(
            serving.constant_factor(Some(PerUnit::PerServing)),
            Some(4.0)
        );
        assert_eq!(serving.constant_factor(Some(PerUnit::Per100Ml)), Some(8.0));
        assert_eq!(serving.constant_factor(Some(PerUnit::Per100Kcal)), None);
    }

    #[test]
    fn loosen_budgets_are_ordered() {
        assert!(LoosenStrength::Low.budget() < LoosenStrength::Medium.budget());
        assert!(LoosenStrength::Medium.budget() < LoosenStrength::High.budget());
    }
}
