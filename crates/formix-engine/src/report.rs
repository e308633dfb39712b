//! Decision-report assembly: optimized recipes compared against the
//! reference baseline.
//!
//! Per solved recipe, every quality category gets `{optimum, reference,
//! lbound, ubound, lslack, uslack}`: bounds read from the matching hard
//! business rows (NaN when none exist), slacks computed as post-solve
//! residuals. Intermediate stages nest their own sub-recipe reports.
//! Amounts are reported back in percent, the domain the request used.

use crate::scoring::{ScoreView, ScoringService};
use crate::solver::Assignment;
use formix_graph::GoodId;
use formix_model::{
    CmpOp, ConstraintFamily, ConstraintKind, ConstraintRow, Objective, ObjectiveSpec,
    QualityCategory, QualityId, RecipeModel, ReferenceRecipe, RequestData,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Slack magnitudes below this threshold read as "not loosened".
const SLACK_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub optimum: f64,
    pub reference: f64,
    pub lbound: f64,
    pub ubound: f64,
    pub lslack: f64,
    pub uslack: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngredientReport {
    pub optimum: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<f64>,
    pub optimum_cost: f64,
    pub reference_cost: f64,
    pub lbound: f64,
    pub ubound: f64,
    pub lslack: f64,
    pub uslack: f64,
    /// Sub-recipe of an intermediate stage blended in here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<Box<RecipeReport>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecipeReport {
    /// Requested objective values; only the final stage carries them.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub objectives: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimum_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<String>,
    pub ingredients: BTreeMap<String, IngredientReport>,
    pub nutrients: BTreeMap<String, QualityReport>,
    pub sustainability: BTreeMap<String, QualityReport>,
    pub other_parameters: BTreeMap<String, QualityReport>,
    pub subcomponents: BTreeMap<String, QualityReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub reference_value: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionReport {
    pub objectives: Vec<ObjectiveReport>,
    pub recipes: Vec<RecipeReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoosenedConstraint {
    #[serde(rename = "constraint name")]
    pub constraint_name: String,
    #[serde(rename = "slack value")]
    pub slack_value: f64,
    #[serde(rename = "constraint value")]
    pub constraint_value: f64,
    #[serde(rename = "per")]
    pub per: Option<String>,
}

pub struct ReportBuilder<'a> {
    data: &'a RequestData,
    refrec: &'a ReferenceRecipe,
    objectives: Vec<String>,
    scoring: Option<&'a dyn ScoringService>,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(
        data: &'a RequestData,
        refrec: &'a ReferenceRecipe,
        objectives: &[ObjectiveSpec<'_>],
        scoring: Option<&'a dyn ScoringService>,
    ) -> Self {
        Self {
            data,
            refrec,
            objectives: objectives.iter().map(|o| o.name.to_string()).collect(),
            scoring,
        }
    }

    /// The report header: one entry per requested objective with its
    /// reference-recipe value.
    pub fn header(&self, model: &RecipeModel) -> Vec<ObjectiveReport> {
        self.objectives
            .iter()
            .map(|name| ObjectiveReport {
                name: name.clone(),
                unit: self.data.units.get(name).cloned(),
                reference_value: self.reference_objective(model, name),
            })
            .collect()
    }

    /// A full recipe report for one solved assignment, rooted at the final
    /// stage.
    pub fn recipe(&self, model: &mut RecipeModel, assignment: &Assignment) -> RecipeReport {
        let final_stage = model.graph().final_stage().clone();
        self.recipe_for_stage(model, assignment, &final_stage, true)
    }

    fn recipe_for_stage(
        &self,
        model: &mut RecipeModel,
        assignment: &Assignment,
        stage: &GoodId,
        is_final: bool,
    ) -> RecipeReport {
        let mut report = RecipeReport::default();

        if is_final {
            for name in self.objectives.clone() {
                let value = self.solved_objective(model, assignment, &name);
                report.objectives.insert(name, value);
            }
            let cost_expr = model.cost_expr();
            report.optimum_cost = Some(assignment.eval(&cost_expr));
            report.reference_cost = Some(self.refrec.cost(stage, stage));
            report.unit_cost = self.data.units.get("cost").cloned();
        }

        let children: Vec<GoodId> = model.graph().incoming(stage).into_iter().cloned().collect();
        for good in &children {
            let entry = self.ingredient_entry(model, assignment, good, stage);
            report.ingredients.insert(good.to_string(), entry);
        }

        report.nutrients = self.quality_section(model, assignment, stage, QualityCategory::Profile);
        report.sustainability =
            self.quality_section(model, assignment, stage, QualityCategory::Sustainability);
        report.other_parameters =
            self.quality_section(model, assignment, stage, QualityCategory::OtherParams);
        report.subcomponents =
            self.quality_section(model, assignment, stage, QualityCategory::Subcomponents);

        report
    }

    fn ingredient_entry(
        &self,
        model: &mut RecipeModel,
        assignment: &Assignment,
        good: &GoodId,
        stage: &GoodId,
    ) -> IngredientReport {
        let is_source = model.graph().sources().contains(good);
        let x = model
            .lookup_amount(good, stage)
            .map(|v| assignment.value(v))
            .unwrap_or(0.0);

        let optimum_cost = if is_source {
            model.cost_of(good, stage) * x
        } else {
            // A stage's cost is what its own source feeds cost.
            let feeders: Vec<GoodId> = model.graph().incoming(good).into_iter().cloned().collect();
            feeders
                .iter()
                .filter(|f| model.graph().sources().contains(*f))
                .map(|f| {
                    let fx = model
                        .lookup_amount(f, good)
                        .map(|v| assignment.value(v))
                        .unwrap_or(0.0);
                    model.cost_of(f, good) * fx
                })
                .sum()
        };

        let (lbound, ubound, lslack, uslack) = self.bounds_for(
            model,
            x,
            |row| {
                matches!(row.kind, ConstraintKind::Ingredient)
                    && row.item1 == good.as_str()
                    && row.item2.is_none()
                    && row.target == *stage
            },
            |_row, _| Ok(1.0),
        );

        let recipe = if !is_source && good != model.graph().final_stage() {
            let sub = self.recipe_for_stage(model, assignment, good, false);
            Some(Box::new(sub))
        } else {
            None
        };

        IngredientReport {
            optimum: 100.0 * x,
            reference: self
                .refrec
                .goods()
                .contains(good)
                .then(|| 100.0 * self.refrec.amount(good, stage)),
            optimum_cost,
            reference_cost: self.refrec.cost(good, stage),
            lbound: 100.0 * lbound,
            ubound: 100.0 * ubound,
            lslack: 100.0 * lslack,
            uslack: 100.0 * uslack,
            recipe,
        }
    }

    fn quality_section(
        &self,
        model: &mut RecipeModel,
        assignment: &Assignment,
        stage: &GoodId,
        category: QualityCategory,
    ) -> BTreeMap<String, QualityReport> {
        let names: Vec<String> = self
            .data
            .quality_names
            .get(&category)
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default();

        // Total mass flowing into the stage scales the per-100g aggregate
        // into a per-batch amount.
        let children: Vec<GoodId> = model.graph().incoming(stage).into_iter().cloned().collect();
        let mass: f64 = children
            .iter()
            .filter_map(|g| model.lookup_amount(g, stage))
            .map(|v| assignment.value(v))
            .sum();

        let mut section = BTreeMap::new();
        for name in names {
            let quality = QualityId::new(category, name.clone());
            let cq = model
                .lookup_quality(stage, &quality)
                .map(|v| assignment.value(v))
                .unwrap_or(0.0);

            let (lbound, ubound, lslack, uslack) = self.bounds_for(
                model,
                cq,
                |row| {
                    row.kind == ConstraintKind::Quality(category)
                        && row.item1 == name
                        && row.item2.is_none()
                        && row.target == *stage
                },
                |row, m| {
                    m.per_factor_value(row, &self.data.serving, assignment.values())
                        .map_err(|_| ())
                },
            );

            section.insert(
                name,
                QualityReport {
                    optimum: cq * mass,
                    reference: self.refrec.quality_amount(&quality, stage),
                    lbound,
                    ubound,
                    lslack,
                    uslack,
                },
            );
        }
        section
    }

    /// Tightest matching hard bounds and their post-solve residuals.
    /// `(NaN, NaN, NaN, NaN)` when no matching hard row exists; an equality
    /// row pins both bounds with zero slack.
    fn bounds_for(
        &self,
        model: &RecipeModel,
        actual: f64,
        matches_row: impl Fn(&ConstraintRow) -> bool,
        factor: impl Fn(&ConstraintRow, &RecipeModel) -> Result<f64, ()>,
    ) -> (f64, f64, f64, f64) {
        let rows: Vec<&ConstraintRow> = model
            .rows()
            .iter()
            .filter(|r| r.active && r.loosen.is_none() && matches_row(r))
            .collect();

        let mut scaled = Vec::new();
        for row in rows {
            let Ok(f) = factor(row, model) else { continue };
            scaled.push((row.op, row.value * f));
        }

        if let Some((_, value)) = scaled.iter().find(|(op, _)| *op == CmpOp::Eq) {
            return (*value, *value, 0.0, 0.0);
        }

        let ubound = scaled
            .iter()
            .filter(|(op, _)| *op == CmpOp::Le)
            .map(|(_, v)| *v)
            .fold(f64::NAN, |acc: f64, v| if acc.is_nan() { v } else { acc.min(v) });
        let lbound = scaled
            .iter()
            .filter(|(op, _)| *op == CmpOp::Ge)
            .map(|(_, v)| *v)
            .fold(f64::NAN, |acc: f64, v| if acc.is_nan() { v } else { acc.max(v) });

        let uslack = if ubound.is_nan() { f64::NAN } else { ubound - actual };
        let lslack = if lbound.is_nan() { f64::NAN } else { actual - lbound };
        (lbound, ubound, lslack, uslack)
    }

    // ------------------------------------------------------------------
    // Objective values
    // ------------------------------------------------------------------

    fn is_good_name(&self, model: &RecipeModel, name: &str) -> bool {
        let good = GoodId::from(name);
        model.graph().sources().contains(&good) || model.graph().stages().contains(&good)
    }

    /// The requested objective evaluated on the solved assignment.
    /// Good-valued objectives (a bare ingredient) report in percent.
    pub fn solved_objective(
        &self,
        model: &mut RecipeModel,
        assignment: &Assignment,
        name: &str,
    ) -> f64 {
        match model.objective_expression(name) {
            Objective::Expression(expr) => {
                let value = assignment.eval(&expr);
                if self.is_good_name(model, name) {
                    100.0 * value
                } else {
                    value
                }
            }
            Objective::External(score) => match self.scoring {
                Some(service) => service.score(
                    &score,
                    model.graph().final_stage(),
                    &ScoreView::Solved { model, assignment },
                ),
                None => f64::NAN,
            },
        }
    }

    /// The requested objective evaluated on the reference recipe.
    pub fn reference_objective(&self, model: &RecipeModel, name: &str) -> f64 {
        if name == "cost" {
            let final_stage = self.refrec.final_stage().clone();
            return self.refrec.cost(&final_stage, &final_stage);
        }
        let final_stage = self.refrec.final_stage().clone();
        let category_order = [
            QualityCategory::Profile,
            QualityCategory::Sustainability,
            QualityCategory::OtherParams,
        ];
        for category in category_order {
            if self.data.has_quality(category, name) {
                return self
                    .refrec
                    .quality_amount(&QualityId::new(category, name.to_string()), &final_stage);
            }
        }
        if self.is_good_name(model, name) {
            return 100.0 * self.refrec.total_amount(&GoodId::from(name));
        }
        if self.data.has_quality(QualityCategory::Subcomponents, name) {
            return self.refrec.quality_amount(
                &QualityId::new(QualityCategory::Subcomponents, name.to_string()),
                &final_stage,
            );
        }
        match self.scoring {
            Some(service) => service.score(name, &final_stage, &ScoreView::Reference(self.refrec)),
            None => f64::NAN,
        }
    }

    // ------------------------------------------------------------------
    // Loosened constraints
    // ------------------------------------------------------------------

    /// Soft constraints whose slack actually absorbed something, keyed back
    /// to their business row. The slack is signed: positive past an upper
    /// bound, negative below a lower bound.
    pub fn loosened(&self, model: &RecipeModel, assignment: &Assignment) -> Vec<LoosenedConstraint> {
        let mut by_row: BTreeMap<usize, f64> = BTreeMap::new();
        for constraint in model.constraints() {
            let Some((slack_var, _)) = constraint.slack else {
                continue;
            };
            let ConstraintFamily::Business { row, .. } = constraint.family else {
                continue;
            };
            let magnitude = assignment.value(slack_var);
            let signed = match constraint.op {
                CmpOp::Le => magnitude,
                CmpOp::Ge => -magnitude,
                CmpOp::Eq => magnitude,
            };
            let entry = by_row.entry(row).or_insert(0.0);
            if signed.abs() > entry.abs() {
                *entry = signed;
            }
        }

        by_row
            .into_iter()
            .filter(|(_, slack)| slack.abs() > SLACK_EPSILON)
            .map(|(row_idx, slack)| {
                let row = &model.rows()[row_idx];
                LoosenedConstraint {
                    constraint_name: row.name.clone(),
                    slack_value: slack,
                    constraint_value: row.value,
                    per: row.per.map(|p| p.as_str().to_string()),
                }
            })
            .collect()
    }

    /// Rows that asked for loosening but can never be relaxed (they are
    /// inactive, so they never entered the model).
    pub fn not_loosenable(&self, model: &RecipeModel) -> Vec<String> {
        model
            .rows()
            .iter()
            .filter(|r| r.loosen.is_some() && !r.active)
            .map(|r| r.name.clone())
            .collect()
    }
}
