//! The formal optimization model: decision variables, parameters and
//! constraint sets over a stage graph.
//!
//! Variables:
//! - `x[good, stage]`: blend fraction of `good` directed into `stage`;
//!   `[0, 1]` for ordinary goods, `[-1, 0]` for evaporation (mass leaving
//!   the recipe).
//! - `y[good, stage, tag]`: binary presence indicator, one per tagged
//!   source good and arc, driving class-count limits.
//! - `cq[stage, quality]`: aggregated stage quality, `[0, ∞)`.
//! - one bounded slack variable per soft business constraint.
//!
//! Constraint families are a fixed enumeration with one builder each; the
//! model never grows families named after input strings. Structural families
//! (quality aggregation, presence linking) tie the variables together so the
//! business families have something to bind against.

use crate::constraint::{
    ClassCountRow, CombineOp, ConstraintKind, ConstraintRow, LoosenStrength, PerUnit,
    ServingParams,
};
use crate::error::ModelError;
use crate::expr::{CmpOp, Expr, VarId};
use crate::input::RequestData;
use crate::quality::{QualityCategory, QualityId};
use formix_graph::{GoodId, StageGraph};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Variables
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum VarKind {
    /// Blend fraction `x[good, stage]`.
    Amount { good: GoodId, stage: GoodId },
    /// Presence indicator `y[good, stage, tag]`.
    Presence {
        good: GoodId,
        stage: GoodId,
        tag: String,
    },
    /// Aggregated stage quality `cq[stage, quality]`.
    Quality { stage: GoodId, quality: QualityId },
    /// Slack of the soft constraint named here.
    Slack { constraint: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    Continuous { lower: f64, upper: f64 },
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub kind: VarKind,
    pub domain: Domain,
}

// ============================================================================
// Constraints
// ============================================================================

/// Which builder produced a model constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintFamily {
    /// Derived from a business-constraint row; the payload is the row index.
    Business { kind: ConstraintKind, row: usize },
    /// Ingredient-count limit from the class-constraint table.
    ClassCount,
    /// Structural: defines `cq[stage, quality]` from the stage's children.
    QualityAggregation,
    /// Structural: forces `y >= x` so presence tracks a nonzero fraction.
    PresenceLink,
    /// Temporary constraint pinning an objective during a sweep.
    ObjectivePin,
}

#[derive(Debug, Clone)]
pub struct ModelConstraint {
    pub name: String,
    pub lhs: Expr,
    pub op: CmpOp,
    pub rhs: Expr,
    pub family: ConstraintFamily,
    /// Slack variable and its budget when the constraint is soft.
    pub slack: Option<(VarId, LoosenStrength)>,
}

/// A named objective, either a model expression or an opaque label-standard
/// score the caller must resolve through its scoring collaborator.
#[derive(Debug, Clone)]
pub enum Objective {
    Expression(Expr),
    External(String),
}

// ============================================================================
// Recipe model
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecipeModel {
    graph: StageGraph,
    paths: BTreeSet<(GoodId, GoodId)>,
    profile: BTreeMap<(GoodId, QualityId), f64>,
    cost: BTreeMap<(GoodId, GoodId), f64>,
    quality_names: BTreeMap<QualityCategory, BTreeSet<String>>,
    rows: Vec<ConstraintRow>,
    class_counts: Vec<ClassCountRow>,
    variables: Vec<Variable>,
    amount_index: BTreeMap<(GoodId, GoodId), VarId>,
    presence_index: BTreeMap<(GoodId, GoodId, String), VarId>,
    quality_index: BTreeMap<(GoodId, QualityId), VarId>,
    constraints: Vec<ModelConstraint>,
}

impl RecipeModel {
    pub fn build(data: &RequestData) -> Result<Self, ModelError> {
        let graph = StageGraph::build(
            data.arcs.clone(),
            data.sources.clone(),
            data.stages.clone(),
            data.final_stage.clone(),
            data.include_evaporation,
        )?;
        let paths = graph.paths();

        let mut model = Self {
            graph,
            paths,
            profile: data.profile.clone(),
            cost: data.cost.clone(),
            quality_names: data.quality_names.clone(),
            rows: data.constraints.clone(),
            class_counts: data.class_counts.clone(),
            variables: Vec::new(),
            amount_index: BTreeMap::new(),
            presence_index: BTreeMap::new(),
            quality_index: BTreeMap::new(),
            constraints: Vec::new(),
        };

        model.register_amounts();
        model.register_presence(&data.tags);
        model.register_qualities();
        model.build_quality_aggregation(&data.process_loss);
        model.build_presence_links();
        model.build_business_constraints(data)?;
        model.build_class_counts();

        tracing::debug!(
            variables = model.variables.len(),
            constraints = model.constraints.len(),
            "recipe model built"
        );
        Ok(model)
    }

    // ------------------------------------------------------------------
    // Variable registration
    // ------------------------------------------------------------------

    fn push_var(&mut self, kind: VarKind, domain: Domain) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(Variable { kind, domain });
        id
    }

    fn amount_domain(good: &GoodId) -> Domain {
        if good.is_evaporation() {
            Domain::Continuous {
                lower: -1.0,
                upper: 0.0,
            }
        } else {
            Domain::Continuous {
                lower: 0.0,
                upper: 1.0,
            }
        }
    }

    fn register_amounts(&mut self) {
        let arcs: Vec<_> = self.graph.arcs().to_vec();
        for arc in arcs {
            self.amount_var(&arc.from, &arc.to);
        }
        // Diagonal entries back single-ingredient objectives.
        let sources: Vec<_> = self.graph.sources().iter().cloned().collect();
        for good in sources {
            self.amount_var(&good, &good);
        }
    }

    /// Blend-fraction variable for `(good, stage)`, registered on first use.
    pub fn amount_var(&mut self, good: &GoodId, stage: &GoodId) -> VarId {
        if let Some(id) = self.amount_index.get(&(good.clone(), stage.clone())) {
            return *id;
        }
        let id = self.push_var(
            VarKind::Amount {
                good: good.clone(),
                stage: stage.clone(),
            },
            Self::amount_domain(good),
        );
        self.amount_index
            .insert((good.clone(), stage.clone()), id);
        id
    }

    pub fn lookup_amount(&self, good: &GoodId, stage: &GoodId) -> Option<VarId> {
        self.amount_index
            .get(&(good.clone(), stage.clone()))
            .copied()
    }

    fn register_presence(&mut self, tags: &BTreeMap<GoodId, BTreeSet<String>>) {
        let arcs: Vec<_> = self.graph.arcs().to_vec();
        for arc in arcs {
            if !self.graph.sources().contains(&arc.from) {
                continue;
            }
            let Some(good_tags) = tags.get(&arc.from) else {
                continue;
            };
            for tag in good_tags {
                let id = self.push_var(
                    VarKind::Presence {
                        good: arc.from.clone(),
                        stage: arc.to.clone(),
                        tag: tag.clone(),
                    },
                    Domain::Binary,
                );
                self.presence_index
                    .insert((arc.from.clone(), arc.to.clone(), tag.clone()), id);
            }
        }
    }

    fn register_qualities(&mut self) {
        let stages: Vec<_> = self.graph.stages().iter().cloned().collect();
        for stage in stages {
            for quality in self.all_qualities() {
                self.quality_var(&stage, &quality);
            }
        }
    }

    /// Aggregated-quality variable for `(stage, quality)`, registered on
    /// first use.
    pub fn quality_var(&mut self, stage: &GoodId, quality: &QualityId) -> VarId {
        if let Some(id) = self.quality_index.get(&(stage.clone(), quality.clone())) {
            return *id;
        }
        let id = self.push_var(
            VarKind::Quality {
                stage: stage.clone(),
                quality: quality.clone(),
            },
            Domain::Continuous {
                lower: 0.0,
                upper: f64::INFINITY,
            },
        );
        self.quality_index
            .insert((stage.clone(), quality.clone()), id);
        id
    }

    pub fn lookup_quality(&self, stage: &GoodId, quality: &QualityId) -> Option<VarId> {
        self.quality_index
            .get(&(stage.clone(), quality.clone()))
            .copied()
    }

    fn all_qualities(&self) -> Vec<QualityId> {
        let mut out = Vec::new();
        for (category, names) in &self.quality_names {
            for name in names {
                out.push(QualityId::new(*category, name.clone()));
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Structural constraint families
    // ------------------------------------------------------------------

    fn build_quality_aggregation(&mut self, process_loss: &BTreeMap<(GoodId, QualityId), f64>) {
        let stages: Vec<_> = self.graph.stages().iter().cloned().collect();
        let qualities = self.all_qualities();
        for stage in &stages {
            let children: Vec<GoodId> = self.graph.incoming(stage).into_iter().cloned().collect();
            for quality in &qualities {
                let loss = process_loss
                    .get(&(stage.clone(), quality.clone()))
                    .copied()
                    .unwrap_or(0.0);
                let cq = self.quality_var(stage, quality);
                let mut rhs = Expr::zero();
                for child in &children {
                    let x = self.amount_var(child, stage);
                    if self.graph.sources().contains(child) {
                        let q = self
                            .profile
                            .get(&(child.clone(), quality.clone()))
                            .copied()
                            .unwrap_or(0.0);
                        rhs.add_term(q, vec![x]);
                    } else {
                        let child_cq = self.quality_var(child, quality);
                        rhs.add_term(1.0, vec![child_cq, x]);
                    }
                }
                let rhs = rhs.scale(1.0 - loss);
                self.constraints.push(ModelConstraint {
                    name: format!("quality_agg__{stage}__{quality}"),
                    lhs: Expr::var(cq),
                    op: CmpOp::Eq,
                    rhs,
                    family: ConstraintFamily::QualityAggregation,
                    slack: None,
                });
            }
        }
    }

    fn build_presence_links(&mut self) {
        let entries: Vec<((GoodId, GoodId, String), VarId)> = self
            .presence_index
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for ((good, stage, tag), y) in entries {
            let x = self.amount_var(&good, &stage);
            let mut lhs = Expr::var(x);
            lhs.add_term(-1.0, vec![y]);
            self.constraints.push(ModelConstraint {
                name: format!("presence_link__{good}__{stage}__{tag}"),
                lhs,
                op: CmpOp::Le,
                rhs: Expr::zero(),
                family: ConstraintFamily::PresenceLink,
                slack: None,
            });
        }
    }

    // ------------------------------------------------------------------
    // Business constraint families
    // ------------------------------------------------------------------

    fn build_business_constraints(&mut self, data: &RequestData) -> Result<(), ModelError> {
        let rows = self.rows.clone();
        for (row_idx, row) in rows.iter().enumerate() {
            if !row.active {
                continue;
            }
            let (lhs, rhs) = match row.kind {
                ConstraintKind::Ingredient => self.ingredient_bound(row)?,
                ConstraintKind::Quality(category) => self.quality_bound(row, category, data)?,
                ConstraintKind::ClassAmount => self.class_amount_bound(row, data)?,
                ConstraintKind::Cost => (self.cost_expr(), Expr::constant(row.value)),
            };
            self.push_business_constraint(row, row_idx, lhs, rhs);
        }
        Ok(())
    }

    /// Combine the one or two item expressions of a row against its value.
    /// Returns `(lhs, rhs)`; ratios are linearized to `item1 - value*item2`
    /// against zero.
    fn combine_items(
        row: &ConstraintRow,
        item1: Expr,
        item2: Option<Expr>,
        rhs: Expr,
    ) -> Result<(Expr, Expr), ModelError> {
        let missing_second = || ModelError::InvalidConstraint {
            name: row.name.clone(),
            reason: "operator given but second item missing".to_string(),
        };
        match row.combine {
            None => Ok((item1, rhs)),
            Some(CombineOp::Plus) => {
                let mut lhs = item1;
                lhs.add_inplace(&item2.ok_or_else(missing_second)?);
                Ok((lhs, rhs))
            }
            Some(CombineOp::Minus) => {
                let mut lhs = item1;
                lhs.sub_inplace(&item2.ok_or_else(missing_second)?);
                Ok((lhs, rhs))
            }
            Some(CombineOp::Ratio) => {
                let mut lhs = item1;
                lhs.sub_inplace(&item2.ok_or_else(missing_second)?.scale(row.value));
                Ok((lhs, Expr::zero()))
            }
        }
    }

    fn ingredient_bound(&mut self, row: &ConstraintRow) -> Result<(Expr, Expr), ModelError> {
        let target = row.target.clone();
        let item1 = Expr::var(self.amount_var(&GoodId::from(row.item1.as_str()), &target));
        let item2 = match &row.item2 {
            Some(i) => Some(Expr::var(self.amount_var(&GoodId::from(i.as_str()), &target))),
            None => None,
        };
        Self::combine_items(row, item1, item2, Expr::constant(row.value))
    }

    fn quality_bound(
        &mut self,
        row: &ConstraintRow,
        category: QualityCategory,
        data: &RequestData,
    ) -> Result<(Expr, Expr), ModelError> {
        let target = row.target.clone();
        let q1 = QualityId::new(category, row.item1.clone());
        let item1 = Expr::var(self.quality_var(&target, &q1));
        let item2 = match &row.item2 {
            Some(name) => Some(Expr::var(
                self.quality_var(&target, &QualityId::new(category, name.clone())),
            )),
            None => None,
        };

        // The bound value converts to the model's per-100g basis through the
        // row's per-unit factor. For per-100kcal the factor is symbolic in
        // the stage's own energy variable and stays in the expression.
        let rhs = match data.serving.constant_factor(row.per) {
            Some(factor) => Expr::constant(row.value * factor),
            None => {
                let energy = data.energy_quality()?;
                let energy_var = self.quality_var(&target, &energy);
                Expr::scaled_var(energy_var, row.value * 0.01)
            }
        };
        Self::combine_items(row, item1, item2, rhs)
    }

    fn class_amount_bound(
        &mut self,
        row: &ConstraintRow,
        data: &RequestData,
    ) -> Result<(Expr, Expr), ModelError> {
        let item1 = self.class_amount_expr(&row.item1, &row.target, data);
        let item2 = row
            .item2
            .as_ref()
            .map(|class| self.class_amount_expr(class, &row.target, data));
        Self::combine_items(row, item1, item2, Expr::constant(row.value))
    }

    /// Total blend fraction of all source goods tagged `class` feeding
    /// `target`.
    fn class_amount_expr(&mut self, class: &str, target: &GoodId, data: &RequestData) -> Expr {
        let mut expr = Expr::zero();
        let members: Vec<GoodId> = self
            .graph
            .incoming(target)
            .into_iter()
            .filter(|g| {
                self.graph.sources().contains(*g)
                    && data.tags.get(*g).is_some_and(|t| t.contains(class))
            })
            .cloned()
            .collect();
        for good in members {
            let x = self.amount_var(&good, target);
            expr.add_term(1.0, vec![x]);
        }
        expr
    }

    fn push_business_constraint(
        &mut self,
        row: &ConstraintRow,
        row_idx: usize,
        lhs: Expr,
        rhs: Expr,
    ) {
        let family = ConstraintFamily::Business {
            kind: row.kind,
            row: row_idx,
        };
        match row.loosen {
            None => self.constraints.push(ModelConstraint {
                name: row.name.clone(),
                lhs,
                op: row.op,
                rhs,
                family,
                slack: None,
            }),
            Some(strength) => {
                let slack = self.push_var(
                    VarKind::Slack {
                        constraint: row.name.clone(),
                    },
                    Domain::Continuous {
                        lower: 0.0,
                        upper: strength.budget(),
                    },
                );
                // The slack widens the bound in the infeasible direction;
                // equalities widen both ways around the same budget.
                match row.op {
                    CmpOp::Le => {
                        let mut soft_lhs = lhs;
                        soft_lhs.add_term(-1.0, vec![slack]);
                        self.constraints.push(ModelConstraint {
                            name: row.name.clone(),
                            lhs: soft_lhs,
                            op: CmpOp::Le,
                            rhs,
                            family,
                            slack: Some((slack, strength)),
                        });
                    }
                    CmpOp::Ge => {
                        let mut soft_lhs = lhs;
                        soft_lhs.add_term(1.0, vec![slack]);
                        self.constraints.push(ModelConstraint {
                            name: row.name.clone(),
                            lhs: soft_lhs,
                            op: CmpOp::Ge,
                            rhs,
                            family,
                            slack: Some((slack, strength)),
                        });
                    }
                    CmpOp::Eq => {
                        let mut upper_lhs = lhs.clone();
                        upper_lhs.add_term(-1.0, vec![slack]);
                        self.constraints.push(ModelConstraint {
                            name: format!("{}__ub", row.name),
                            lhs: upper_lhs,
                            op: CmpOp::Le,
                            rhs: rhs.clone(),
                            family,
                            slack: Some((slack, strength)),
                        });
                        let mut lower_lhs = lhs;
                        lower_lhs.add_term(1.0, vec![slack]);
                        self.constraints.push(ModelConstraint {
                            name: format!("{}__lb", row.name),
                            lhs: lower_lhs,
                            op: CmpOp::Ge,
                            rhs,
                            family,
                            slack: Some((slack, strength)),
                        });
                    }
                }
            }
        }
    }

    fn build_class_counts(&mut self) {
        let rows = self.class_counts.clone();
        for row in rows {
            let mut count = Expr::zero();
            let members: Vec<VarId> = self
                .presence_index
                .iter()
                .filter(|((_, stage, tag), _)| *stage == row.target && *tag == row.class_name)
                .map(|(_, id)| *id)
                .collect();
            for y in members {
                count.add_term(1.0, vec![y]);
            }
            self.constraints.push(ModelConstraint {
                name: format!("class_count__{}__min", row.class_name),
                lhs: count.clone(),
                op: CmpOp::Ge,
                rhs: Expr::constant(row.min_ingredients),
                family: ConstraintFamily::ClassCount,
                slack: None,
            });
            self.constraints.push(ModelConstraint {
                name: format!("class_count__{}__max", row.class_name),
                lhs: count,
                op: CmpOp::Le,
                rhs: Expr::constant(row.max_ingredients),
                family: ConstraintFamily::ClassCount,
                slack: None,
            });
        }
    }

    // ------------------------------------------------------------------
    // Objectives
    // ------------------------------------------------------------------

    /// Total recipe cost: `Σ cost[i, s] · x[i, s]` over every arc leaving a
    /// source good.
    pub fn cost_expr(&mut self) -> Expr {
        let mut expr = Expr::zero();
        let arcs: Vec<_> = self.graph.arcs().to_vec();
        for arc in arcs {
            if !self.graph.sources().contains(&arc.from) {
                continue;
            }
            let coeff = self
                .cost
                .get(&(arc.from.clone(), arc.to.clone()))
                .copied()
                .unwrap_or(0.0);
            let x = self.amount_var(&arc.from, &arc.to);
            expr.add_term(coeff, vec![x]);
        }
        expr
    }

    /// Build the expression for a named objective.
    ///
    /// Quality objectives re-derive per-ingredient contributions
    /// (`cq[final, q] · x[i, final]` summed over sources) instead of reading
    /// the aggregate directly: reporting attributes the objective back to
    /// individual ingredients this way.
    pub fn objective_expression(&mut self, name: &str) -> Objective {
        if name == "cost" {
            return Objective::Expression(self.cost_expr());
        }

        let category_order = [
            QualityCategory::Profile,
            QualityCategory::Sustainability,
            QualityCategory::OtherParams,
        ];
        for category in category_order {
            if self.has_quality_name(category, name) {
                return Objective::Expression(self.quality_objective(category, name));
            }
        }

        if self.graph.sources().contains(&GoodId::from(name)) {
            let good = GoodId::from(name);
            let x = self.amount_var(&good, &good);
            return Objective::Expression(Expr::var(x));
        }

        if self.has_quality_name(QualityCategory::Subcomponents, name) {
            return Objective::Expression(
                self.quality_objective(QualityCategory::Subcomponents, name),
            );
        }

        Objective::External(name.to_string())
    }

    fn has_quality_name(&self, category: QualityCategory, name: &str) -> bool {
        self.quality_names
            .get(&category)
            .is_some_and(|names| names.contains(name))
    }

    fn quality_objective(&mut self, category: QualityCategory, name: &str) -> Expr {
        let final_stage = self.graph.final_stage().clone();
        let quality = QualityId::new(category, name.to_string());
        let cq = self.quality_var(&final_stage, &quality);
        let sources: Vec<_> = self.graph.sources().iter().cloned().collect();
        let mut expr = Expr::zero();
        for good in sources {
            let x = self.amount_var(&good, &final_stage);
            expr.add_term(1.0, vec![cq, x]);
        }
        expr
    }

    // ------------------------------------------------------------------
    // Controller surface
    // ------------------------------------------------------------------

    pub fn add_constraint(&mut self, constraint: ModelConstraint) {
        self.constraints.push(constraint);
    }

    /// Remove every constraint with this name; returns how many were removed.
    pub fn remove_constraint(&mut self, name: &str) -> usize {
        let before = self.constraints.len();
        self.constraints.retain(|c| c.name != name);
        before - self.constraints.len()
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn paths(&self) -> &BTreeSet<(GoodId, GoodId)> {
        &self.paths
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[ModelConstraint] {
        &self.constraints
    }

    /// The model's snapshot of the business-constraint rows.
    pub fn rows(&self) -> &[ConstraintRow] {
        &self.rows
    }

    pub fn cost_of(&self, good: &GoodId, stage: &GoodId) -> f64 {
        self.cost
            .get(&(good.clone(), stage.clone()))
            .copied()
            .unwrap_or(0.0)
    }

    /// Constant per-unit factor for a row, or the post-solve value of the
    /// symbolic per-100kcal factor under `values`.
    pub fn per_factor_value(
        &self,
        row: &ConstraintRow,
        serving: &ServingParams,
        values: &[f64],
    ) -> Result<f64, ModelError> {
        match serving.constant_factor(row.per) {
            Some(factor) => Ok(factor),
            None => {
                debug_assert_eq!(row.per, Some(PerUnit::Per100Kcal));
                let energy_names = ["energy", "Energy", "calories", "Calories"];
                let quality = energy_names
                    .iter()
                    .map(|n| QualityId::profile(*n))
                    .find(|q| self.lookup_quality(&row.target, q).is_some())
                    .ok_or(ModelError::MissingEnergyQuality)?;
                let var = self
                    .lookup_quality(&row.target, &quality)
                    .expect("quality var just resolved");
                Ok(0.01 * values.get(var.0).copied().unwrap_or(0.0))
            }
        }
    }
}
