//! The optimization drive: single solves, range sweeps, Pareto frontiers
//! and the automatic relaxation retry.
//!
//! The controller owns all temporary model mutation. Every sweep iteration
//! adds exactly one pinning constraint and removes it before the next point;
//! nothing else is ever added or removed, so the model is reused across the
//! whole sweep. Relaxation works on a controller-local snapshot of the
//! normalized request: caller-supplied rows are never written to.

use crate::error::EngineError;
use crate::outcome::{RunOutcome, RunStatus};
use crate::report::{DecisionReport, ReportBuilder};
use crate::scoring::{ScoreView, ScoringService};
use crate::solver::{Assignment, SolveStatus, Solver};
use formix_model::{
    CmpOp, ConstraintFamily, ConstraintKind, Expr, LoosenStrength, ModelConstraint, Objective,
    ObjectiveOption, ObjectiveSpec, OptimizationRequest, RecipeModel, ReferenceRecipe,
    RequestData, Sense,
};

/// Name of the temporary constraint pinning the swept objective.
const OBJECTIVE_PIN: &str = "objective_pin";

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// Retry an infeasible single-objective solve once with every active,
    /// unrelaxed ingredient bound loosened at the lowest strength.
    pub auto_loosen: bool,
    /// Number of sweep points for ranged objectives.
    pub sweep_points: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            auto_loosen: true,
            sweep_points: 10,
        }
    }
}

pub struct OptimizationController<'a> {
    solver: &'a mut dyn Solver,
    scoring: Option<&'a dyn ScoringService>,
    config: ControllerConfig,
}

impl<'a> OptimizationController<'a> {
    pub fn new(solver: &'a mut dyn Solver, config: ControllerConfig) -> Self {
        Self {
            solver,
            scoring: None,
            config,
        }
    }

    pub fn with_scoring(mut self, scoring: &'a dyn ScoringService) -> Self {
        self.scoring = Some(scoring);
        self
    }

    /// Drive a whole request to a terminal outcome.
    pub fn run(&mut self, request: &OptimizationRequest) -> Result<RunOutcome, EngineError> {
        // Objective-count validation comes before any graph or model work.
        let objectives = request.objective_specs();
        if objectives.is_empty() {
            return Err(EngineError::NoObjective);
        }
        if objectives.len() > 2 {
            return Err(EngineError::UnsupportedObjectives(objectives.len()));
        }

        let data = request.normalize()?;
        let model = RecipeModel::build(&data)?;
        let arcs = model.graph().arcs().to_vec();
        let refrec = ReferenceRecipe::build(&data, &arcs);

        match objectives.as_slice() {
            [single] => self.run_single(&data, model, &refrec, *single),
            [first, second] => {
                if data.constraints.iter().any(|r| r.loosen.is_some()) {
                    tracing::info!("loosening requested with two objectives; refusing to solve");
                    return Ok(RunOutcome::empty(RunStatus::LoosenMultiObjective));
                }
                self.run_two(&data, model, &refrec, *first, *second)
            }
            _ => unreachable!("objective count validated above"),
        }
    }

    // ------------------------------------------------------------------
    // Single objective
    // ------------------------------------------------------------------

    fn run_single(
        &mut self,
        data: &RequestData,
        mut model: RecipeModel,
        refrec: &ReferenceRecipe,
        spec: ObjectiveSpec<'_>,
    ) -> Result<RunOutcome, EngineError> {
        match spec.option {
            ObjectiveOption::Minimize | ObjectiveOption::Maximize => {
                let sense = sense_of(spec.option);
                let expr = self.resolve_objective(&mut model, refrec, spec.name)?;
                let outcome = self.solver.solve(&model, &expr, sense);
                if outcome.status == SolveStatus::Optimal {
                    let assignment = outcome.assignment.expect("optimal solve assigns");
                    let builder = ReportBuilder::new(data, refrec, &[spec], self.scoring);
                    let recipe = builder.recipe(&mut model, &assignment);
                    return Ok(self.finished(
                        RunStatus::Optimal,
                        &builder,
                        &mut model,
                        vec![recipe],
                        Some(&assignment),
                    ));
                }

                if !self.config.auto_loosen {
                    return Ok(RunOutcome::empty(RunStatus::Infeasible));
                }

                // One automatic relaxation level, on a local snapshot:
                // active ingredient bounds that are not already soft drop to
                // the lowest strength, then exactly one retry.
                tracing::info!("solve infeasible; loosening active ingredient bounds and retrying");
                let mut relaxed = data.clone();
                for row in &mut relaxed.constraints {
                    if row.active
                        && row.loosen.is_none()
                        && row.kind == ConstraintKind::Ingredient
                    {
                        row.loosen = Some(LoosenStrength::Low);
                    }
                }
                let mut relaxed_model = RecipeModel::build(&relaxed)?;
                let expr = self.resolve_objective(&mut relaxed_model, refrec, spec.name)?;
                let retry = self.solver.solve(&relaxed_model, &expr, sense);
                if retry.status == SolveStatus::Optimal {
                    let assignment = retry.assignment.expect("optimal solve assigns");
                    let builder = ReportBuilder::new(&relaxed, refrec, &[spec], self.scoring);
                    let recipe = builder.recipe(&mut relaxed_model, &assignment);
                    return Ok(self.finished(
                        RunStatus::OptimalLoosened,
                        &builder,
                        &mut relaxed_model,
                        vec![recipe],
                        Some(&assignment),
                    ));
                }
                Ok(RunOutcome::empty(RunStatus::Infeasible))
            }
            ObjectiveOption::Range => {
                let expr = self.resolve_objective(&mut model, refrec, spec.name)?;
                let Some((min_v, max_v)) = self.discover_range(&model, &expr) else {
                    return Ok(RunOutcome::empty(RunStatus::InfeasibleRange));
                };
                let points =
                    sweep_points(min_v, max_v, self.config.sweep_points, self.is_integral(spec.name));
                tracing::debug!(?points, "sweeping ranged objective");

                // Cost is the tie-break objective at every pinned point.
                let cost = model.cost_expr();
                let builder = ReportBuilder::new(data, refrec, &[spec], self.scoring);
                let mut recipes = Vec::new();
                let mut last_assignment = None;
                for point in points {
                    model.add_constraint(pin(expr.clone(), CmpOp::Eq, point));
                    let outcome = self.solver.solve(&model, &cost, Sense::Minimize);
                    if outcome.status == SolveStatus::Optimal {
                        let assignment = outcome.assignment.expect("optimal solve assigns");
                        recipes.push(builder.recipe(&mut model, &assignment));
                        last_assignment = Some(assignment);
                    }
                    model.remove_constraint(OBJECTIVE_PIN);
                }
                Ok(self.finished(
                    RunStatus::Optimal,
                    &builder,
                    &mut model,
                    recipes,
                    last_assignment.as_ref(),
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // Two objectives: Pareto sweep
    // ------------------------------------------------------------------

    fn run_two(
        &mut self,
        data: &RequestData,
        mut model: RecipeModel,
        refrec: &ReferenceRecipe,
        first: ObjectiveSpec<'_>,
        second: ObjectiveSpec<'_>,
    ) -> Result<RunOutcome, EngineError> {
        // The ranged objective sweeps; the other is genuinely optimized at
        // every point.
        let (ranging, secondary) = if first.option == ObjectiveOption::Range {
            (first, second)
        } else {
            (second, first)
        };

        let range_expr = self.resolve_objective(&mut model, refrec, ranging.name)?;
        let secondary_expr = self.resolve_objective(&mut model, refrec, secondary.name)?;
        let secondary_sense = if secondary.option == ObjectiveOption::Minimize {
            Sense::Minimize
        } else {
            Sense::Maximize
        };

        let Some((min_v, max_v)) = self.discover_range(&model, &range_expr) else {
            return Ok(RunOutcome::empty(RunStatus::InfeasibleMulti));
        };
        let points = sweep_points(
            min_v,
            max_v,
            self.config.sweep_points,
            self.is_integral(ranging.name),
        );

        // The sweep traces either a bound on or an exact level of the
        // ranging objective, per its own option.
        let pin_op = match ranging.option {
            ObjectiveOption::Minimize => CmpOp::Le,
            ObjectiveOption::Maximize => CmpOp::Ge,
            ObjectiveOption::Range => CmpOp::Eq,
        };

        let builder = ReportBuilder::new(data, refrec, &[first, second], self.scoring);
        let mut recipes = Vec::new();
        for point in points {
            model.add_constraint(pin(range_expr.clone(), pin_op, point));
            let outcome = self.solver.solve(&model, &secondary_expr, secondary_sense);
            if outcome.status == SolveStatus::Optimal {
                let assignment = outcome.assignment.expect("optimal solve assigns");
                recipes.push(builder.recipe(&mut model, &assignment));
            }
            model.remove_constraint(OBJECTIVE_PIN);
        }

        if recipes.is_empty() {
            return Ok(RunOutcome::empty(RunStatus::InfeasibleMulti));
        }
        Ok(self.finished(RunStatus::Optimal, &builder, &mut model, recipes, None))
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    /// Resolve an objective name to a solvable expression. External score
    /// names become a constant scored against the reference recipe; a name
    /// nobody claims is a hard error.
    fn resolve_objective(
        &self,
        model: &mut RecipeModel,
        refrec: &ReferenceRecipe,
        name: &str,
    ) -> Result<Expr, EngineError> {
        match model.objective_expression(name) {
            Objective::Expression(expr) => Ok(expr),
            Objective::External(score) => {
                let service = self
                    .scoring
                    .filter(|s| s.knows(&score))
                    .ok_or_else(|| EngineError::UnknownObjective(score.clone()))?;
                let value = service.score(
                    &score,
                    model.graph().final_stage(),
                    &ScoreView::Reference(refrec),
                );
                Ok(Expr::constant(value))
            }
        }
    }

    /// Min/max feasible values of an expression, from two unconstrained
    /// solves. `None` when either direction is infeasible.
    fn discover_range(&mut self, model: &RecipeModel, expr: &Expr) -> Option<(f64, f64)> {
        let min_out = self.solver.solve(model, expr, Sense::Minimize);
        let min_v = expr.eval(min_out.assignment.as_ref()?.values());
        let max_out = self.solver.solve(model, expr, Sense::Maximize);
        let max_v = expr.eval(max_out.assignment.as_ref()?.values());
        tracing::debug!(min_v, max_v, "objective range discovered");
        Some((min_v, max_v))
    }

    fn is_integral(&self, name: &str) -> bool {
        self.scoring
            .is_some_and(|s| s.knows(name) && s.integral(name))
    }

    fn finished(
        &self,
        status: RunStatus,
        builder: &ReportBuilder<'_>,
        model: &mut RecipeModel,
        recipes: Vec<crate::report::RecipeReport>,
        last_assignment: Option<&Assignment>,
    ) -> RunOutcome {
        RunOutcome {
            status,
            message: status.message(),
            report: DecisionReport {
                objectives: builder.header(model),
                recipes,
            },
            loosened: last_assignment
                .map(|a| builder.loosened(model, a))
                .unwrap_or_default(),
            not_loosenable: builder.not_loosenable(model),
        }
    }
}

fn sense_of(option: ObjectiveOption) -> Sense {
    match option {
        ObjectiveOption::Maximize => Sense::Maximize,
        _ => Sense::Minimize,
    }
}

fn pin(lhs: Expr, op: CmpOp, value: f64) -> ModelConstraint {
    ModelConstraint {
        name: OBJECTIVE_PIN.to_string(),
        lhs,
        op,
        rhs: Expr::constant(value),
        family: ConstraintFamily::ObjectivePin,
        slack: None,
    }
}

/// Partition `[min_v, max_v]` into at most `n` sweep points, rounding to
/// integers first for integral objectives, deduplicated and sorted.
pub fn sweep_points(min_v: f64, max_v: f64, n: usize, integral: bool) -> Vec<f64> {
    let n = n.max(1);
    let mut points: Vec<f64> = if n == 1 || min_v == max_v {
        vec![min_v]
    } else {
        (0..n)
            .map(|i| min_v + (max_v - min_v) * i as f64 / (n - 1) as f64)
            .collect()
    };
    if integral {
        for p in &mut points {
            *p = p.round();
        }
    }
    points.sort_by(f64::total_cmp);
    points.dedup();
    points
}
