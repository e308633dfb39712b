//! RecipeModel construction tests

use formix_graph::GoodId;
use formix_model::{
    CmpOp, ConstraintFamily, ConstraintKind, Domain, LoosenStrength, Objective, QualityId,
    RecipeModel, VarKind,
};
use serde_json::json;

fn base_request() -> serde_json::Value {
    json!({
        "ingredients": {
            "profile": [
                {"ingredient": "ing_0", "sugars": 50.0, "protein": 30.0, "energy": 70.0, "water": 65.0},
                {"ingredient": "ing_1", "sugars": 28.0, "protein": 21.0, "energy": 65.0, "water": 31.0}
            ],
            "sustainability": [
                {"ingredient": "ing_0", "GHGe": 1.5},
                {"ingredient": "ing_1", "GHGe": 12.0}
            ],
            "ingtags": [
                {"ingredient": "ing_0", "class 1": "class_a", "class 2": ""},
                {"ingredient": "ing_1", "class 1": "class_a", "class 2": "class_b"}
            ],
            "cost": [
                {"ingredient": "ing_0", "cost": 16.57, "target_good": "Stage_1"},
                {"ingredient": "ing_1", "cost": 25.99, "target_good": "Stage_1"}
            ]
        },
        "constraints": {
            "ing": [
                {
                    "constraint name": "c_low",
                    "ingredient 1": "ing_0",
                    "operator": "",
                    "ingredient 2": "",
                    "constraint": ">=",
                    "value": 35.0,
                    "active": "yes",
                    "target_good": "Stage_1"
                },
                {
                    "constraint name": "c_inactive",
                    "ingredient 1": "ing_1",
                    "operator": "",
                    "ingredient 2": "",
                    "constraint": "<=",
                    "value": 20.0,
                    "active": "no",
                    "target_good": "Stage_1"
                }
            ],
            "profile": [
                {
                    "constraint name": "sugars serving",
                    "nutrient 1": "sugars",
                    "operator": "",
                    "nutrient 2": "",
                    "constraint": "<=",
                    "value": 10.0,
                    "per": "serving",
                    "active": "yes",
                    "target_good": "Final"
                },
                {
                    "constraint name": "protein per kcal",
                    "nutrient 1": "protein",
                    "operator": "",
                    "nutrient 2": "",
                    "constraint": ">=",
                    "value": 5.0,
                    "per": "100kcal",
                    "active": "yes",
                    "target_good": "Final"
                }
            ],
            "costcon": [
                {
                    "constraint name": "cost cap",
                    "item 1": "cost",
                    "operator": "",
                    "item 2": "",
                    "constraint": "<=",
                    "value": 30.0,
                    "active": "yes"
                }
            ]
        },
        "other_constraints": {
            "classcon": [
                {
                    "class name": "class_a",
                    "minimum ingredients": 0.0,
                    "maximum ingredients": 2.0,
                    "target_good": "Stage_1"
                }
            ]
        },
        "servingc": [
            {"serving parameter": "sps_as_sold_g", "value": 25.0},
            {"serving parameter": "sps_as_consummed_g", "value": 200.0},
            {"serving parameter": "dp_as_consumed_gml", "value": 1}
        ],
        "stage_data": {
            "arcs": [
                ["ing_0", "Stage_1"],
                ["ing_1", "Stage_1"],
                ["Stage_1", "Final"]
            ]
        }
    })
}

fn build_model(value: serde_json::Value) -> RecipeModel {
    let request: formix_model::OptimizationRequest = serde_json::from_value(value).unwrap();
    let data = request.normalize().unwrap();
    RecipeModel::build(&data).unwrap()
}

// ============================================================================
// Variables
// ============================================================================

#[test]
fn test_amount_bounds_distinguish_evaporation() {
    let model = build_model(base_request());
    // The profile tracks water, so evaporation was synthesized as a source.
    let evaporation = GoodId::from("evaporation");
    for var in model.variables() {
        if let VarKind::Amount { good, .. } = &var.kind {
            let Domain::Continuous { lower, upper } = var.domain else {
                panic!("amount vars are continuous");
            };
            if *good == evaporation {
                assert_eq!((lower, upper), (-1.0, 0.0));
            } else {
                assert_eq!((lower, upper), (0.0, 1.0));
            }
        }
    }
}

#[test]
fn test_path_incidence_spans_transitive_routes() {
    let model = build_model(base_request());
    let paths = model.paths();
    // ing_0 reaches Final only through Stage_1.
    assert!(paths.contains(&(GoodId::from("ing_0"), GoodId::from("Stage_1"))));
    assert!(paths.contains(&(GoodId::from("ing_0"), GoodId::from("Final"))));
    assert!(!paths.contains(&(GoodId::from("Final"), GoodId::from("ing_0"))));
}

#[test]
fn test_quality_vars_cover_stages_only() {
    let model = build_model(base_request());
    for var in model.variables() {
        if let VarKind::Quality { stage, .. } = &var.kind {
            assert!(
                model.graph().stages().contains(stage),
                "quality var registered for non-stage `{stage}`"
            );
        }
    }
    assert!(model
        .lookup_quality(&GoodId::from("Final"), &QualityId::profile("sugars"))
        .is_some());
}

// ============================================================================
// Constraint families
// ============================================================================

#[test]
fn test_ingredient_bound_is_percent_scaled() {
    let model = build_model(base_request());
    let c = model
        .constraints()
        .iter()
        .find(|c| c.name == "c_low")
        .expect("active ingredient bound present");
    assert_eq!(c.op, CmpOp::Ge);
    assert_eq!(c.rhs.constant_part(), 0.35);
    assert!(matches!(
        c.family,
        ConstraintFamily::Business {
            kind: ConstraintKind::Ingredient,
            ..
        }
    ));
}

#[test]
fn test_inactive_rows_are_not_added() {
    let model = build_model(base_request());
    assert!(!model.constraints().iter().any(|c| c.name == "c_inactive"));
}

#[test]
fn test_serving_bound_scales_value() {
    let model = build_model(base_request());
    let c = model
        .constraints()
        .iter()
        .find(|c| c.name == "sugars serving")
        .unwrap();
    // 100 / sps_as_sold_g = 4
    assert_eq!(c.rhs.constant_part(), 40.0);
    assert!(c.rhs.is_constant());
}

#[test]
fn test_per_100kcal_bound_stays_symbolic() {
    let model = build_model(base_request());
    let c = model
        .constraints()
        .iter()
        .find(|c| c.name == "protein per kcal")
        .unwrap();
    // The factor is 0.01 * cq[Final, energy]: a variable, not a constant.
    assert!(!c.rhs.is_constant());
    let energy_var = model
        .lookup_quality(&GoodId::from("Final"), &QualityId::profile("energy"))
        .unwrap();
    let (vars, coeff) = c.rhs.terms().next().unwrap();
    assert_eq!(vars, &[energy_var]);
    assert!((coeff - 0.05).abs() < 1e-12);
}

#[test]
fn test_class_count_bounds_use_presence_vars() {
    let model = build_model(base_request());
    let max = model
        .constraints()
        .iter()
        .find(|c| c.name == "class_count__class_a__max")
        .unwrap();
    assert_eq!(max.rhs.constant_part(), 2.0);
    // Both class_a ingredients feed Stage_1, one presence var each.
    assert_eq!(max.lhs.terms().count(), 2);
    for (vars, _) in max.lhs.terms() {
        for v in vars {
            assert!(matches!(
                model.variables()[v.0].kind,
                VarKind::Presence { .. }
            ));
        }
    }
}

#[test]
fn test_soft_row_gains_bounded_slack() {
    let mut value = base_request();
    value["lconstraints"] = json!([
        {"constraint name": "c_low", "loosening strength": "medium"}
    ]);
    let model = build_model(value);
    let c = model
        .constraints()
        .iter()
        .find(|c| c.name == "c_low")
        .unwrap();
    let (slack, strength) = c.slack.expect("soft constraint carries slack");
    assert_eq!(strength, LoosenStrength::Medium);
    let Domain::Continuous { lower, upper } = model.variables()[slack.0].domain else {
        panic!("slack is continuous");
    };
    assert_eq!(lower, 0.0);
    assert_eq!(upper, LoosenStrength::Medium.budget());
}

#[test]
fn test_quality_aggregation_constraints_exist_per_stage() {
    let model = build_model(base_request());
    let agg: Vec<_> = model
        .constraints()
        .iter()
        .filter(|c| matches!(c.family, ConstraintFamily::QualityAggregation))
        .collect();
    // Two stages (Stage_1, Final) x all known qualities.
    assert!(!agg.is_empty());
    for c in &agg {
        assert_eq!(c.op, CmpOp::Eq);
    }
    // Final aggregates a stage child: its sugars row must carry a bilinear
    // term (cq[Stage_1, sugars] * x[Stage_1, Final]).
    let final_sugars = agg
        .iter()
        .find(|c| c.name == "quality_agg__Final__profile__sugars")
        .unwrap();
    assert_eq!(final_sugars.rhs.degree(), 2);
}

// ============================================================================
// Objectives
// ============================================================================

#[test]
fn test_cost_objective_sums_arc_costs() {
    let mut model = build_model(base_request());
    let Objective::Expression(expr) = model.objective_expression("cost") else {
        panic!("cost is a model expression");
    };
    // Two costed arcs into Stage_1; evaporation and Stage_1->Final cost 0.
    assert_eq!(expr.terms().count(), 2);
}

#[test]
fn test_quality_objective_rederives_per_ingredient() {
    let mut model = build_model(base_request());
    let Objective::Expression(expr) = model.objective_expression("sugars") else {
        panic!("sugars is a model expression");
    };
    // One bilinear term per source ingredient (including evaporation).
    assert_eq!(expr.degree(), 2);
    assert_eq!(expr.terms().count(), model.graph().sources().len());
}

#[test]
fn test_ingredient_objective_is_diagonal_var() {
    let mut model = build_model(base_request());
    let Objective::Expression(expr) = model.objective_expression("ing_0") else {
        panic!("ing_0 is a model expression");
    };
    let (vars, coeff) = expr.terms().next().unwrap();
    assert_eq!(coeff, 1.0);
    assert_eq!(vars.len(), 1);
    let VarKind::Amount { good, stage } = &model.variables()[vars[0].0].kind else {
        panic!("diagonal amount var");
    };
    assert_eq!(good, stage);
}

#[test]
fn test_unrecognized_objective_is_external() {
    let mut model = build_model(base_request());
    match model.objective_expression("HSR points") {
        Objective::External(name) => assert_eq!(name, "HSR points"),
        other => panic!("expected external objective, got {other:?}"),
    }
}

// ============================================================================
// Controller surface
// ============================================================================

#[test]
fn test_added_constraints_can_be_removed_by_name() {
    let mut model = build_model(base_request());
    let before = model.constraints().len();
    let Objective::Expression(expr) = model.objective_expression("cost") else {
        unreachable!()
    };
    model.add_constraint(formix_model::ModelConstraint {
        name: "obj_pin".to_string(),
        lhs: expr,
        op: CmpOp::Eq,
        rhs: formix_model::Expr::constant(5.0),
        family: ConstraintFamily::ObjectivePin,
        slack: None,
    });
    assert_eq!(model.constraints().len(), before + 1);
    assert_eq!(model.remove_constraint("obj_pin"), 1);
    assert_eq!(model.constraints().len(), before);
}

#[test]
fn test_unknown_constraint_scope_is_rejected() {
    let mut value = base_request();
    value["constraints"]["wildcard"] = json!([
        {
            "constraint name": "w0",
            "item 1": "x",
            "operator": "",
            "item 2": "",
            "constraint": ">=",
            "value": 1.0,
            "active": "yes"
        }
    ]);
    let request: formix_model::OptimizationRequest = serde_json::from_value(value).unwrap();
    let err = request.normalize().unwrap_err();
    assert!(matches!(
        err,
        formix_model::ModelError::UnknownConstraintScope { .. }
    ));
}
