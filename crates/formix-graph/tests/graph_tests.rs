//! StageGraph behavior tests

use formix_graph::{
    order_arcs, GoodId, GraphError, StageArc, StageGraph, DEFAULT_FINAL_STAGE, EVAPORATION,
};
use std::collections::BTreeSet;

fn goods(names: &[&str]) -> BTreeSet<GoodId> {
    names.iter().map(|n| GoodId::from(*n)).collect()
}

fn arcs(pairs: &[(&str, &str)]) -> Vec<StageArc> {
    pairs.iter().map(|(f, t)| StageArc::new(*f, *t)).collect()
}

fn two_stage_graph() -> StageGraph {
    // ing_0, ing_1 -> Stage_1; ing_2 -> Stage_2; Stage_1, Stage_2 -> Final
    StageGraph::build(
        arcs(&[
            ("ing_0", "Stage_1"),
            ("ing_1", "Stage_1"),
            ("ing_2", "Stage_2"),
            ("Stage_1", "Final"),
            ("Stage_2", "Final"),
        ]),
        goods(&["ing_0", "ing_1", "ing_2"]),
        goods(&["Stage_1", "Stage_2"]),
        GoodId::from(DEFAULT_FINAL_STAGE),
        false,
    )
    .unwrap()
}

// ============================================================================
// Build validation
// ============================================================================

#[test]
fn test_undeclared_good_rejected() {
    let err = StageGraph::build(
        arcs(&[("ing_0", "Mystery")]),
        goods(&["ing_0"]),
        goods(&[]),
        GoodId::from(DEFAULT_FINAL_STAGE),
        false,
    )
    .unwrap_err();
    match err {
        GraphError::InvalidGraph(msg) => assert!(msg.contains("Mystery")),
        other => panic!("expected InvalidGraph, got {other:?}"),
    }
}

#[test]
fn test_final_stage_is_implicitly_declared() {
    let graph = StageGraph::build(
        arcs(&[("ing_0", "Final")]),
        goods(&["ing_0"]),
        goods(&[]),
        GoodId::from(DEFAULT_FINAL_STAGE),
        false,
    )
    .unwrap();
    assert!(graph.stages().contains(graph.final_stage()));
}

#[test]
fn test_default_arc_inference_targets_final() {
    let graph = StageGraph::build(
        vec![],
        goods(&["ing_0", "ing_1", EVAPORATION]),
        goods(&[]),
        GoodId::from(DEFAULT_FINAL_STAGE),
        false,
    )
    .unwrap();
    let final_stage = graph.final_stage().clone();
    assert!(graph.has_arc(&GoodId::from("ing_0"), &final_stage));
    assert!(graph.has_arc(&GoodId::from("ing_1"), &final_stage));
    assert!(!graph.has_arc(&GoodId::from(EVAPORATION), &final_stage));
}

// ============================================================================
// Reachability and paths
// ============================================================================

#[test]
fn test_reachable_transitive() {
    let graph = two_stage_graph();
    let from_ing0 = graph.reachable(&GoodId::from("ing_0"));
    assert!(from_ing0.contains(&GoodId::from("Stage_1")));
    assert!(from_ing0.contains(&GoodId::from("Final")));
    assert!(!from_ing0.contains(&GoodId::from("Stage_2")));
    assert!(!from_ing0.contains(&GoodId::from("ing_0")));
}

#[test]
fn test_reachable_terminates_on_cycle() {
    // Malformed input: A <-> B. Reachability must not hang or error.
    let graph = StageGraph::build(
        arcs(&[("A", "B"), ("B", "A"), ("B", "Final")]),
        goods(&[]),
        goods(&["A", "B"]),
        GoodId::from(DEFAULT_FINAL_STAGE),
        false,
    )
    .unwrap();
    let from_a = graph.reachable(&GoodId::from("A"));
    // The cycle leads back to A itself.
    assert!(from_a.contains(&GoodId::from("A")));
    assert!(from_a.contains(&GoodId::from("B")));
    assert!(from_a.contains(&GoodId::from("Final")));
}

#[test]
fn test_paths_exclude_self_and_close_transitively() {
    let graph = two_stage_graph();
    let paths = graph.paths();
    assert!(paths.contains(&(GoodId::from("ing_0"), GoodId::from("Stage_1"))));
    assert!(paths.contains(&(GoodId::from("ing_0"), GoodId::from("Final"))));
    assert!(!paths.contains(&(GoodId::from("ing_0"), GoodId::from("ing_0"))));

    // Transitive closure: (a, b) and (b, c) imply (a, c).
    for (a, b) in &paths {
        for (b2, c) in &paths {
            if b == b2 {
                assert!(
                    paths.contains(&(a.clone(), c.clone())),
                    "missing transitive path ({a}, {c})"
                );
            }
        }
    }
}

// ============================================================================
// Topological arc order
// ============================================================================

#[test]
fn test_arc_order_places_feeders_first() {
    let graph = two_stage_graph();
    let ordered = graph.topological_arc_order().unwrap();
    assert_eq!(ordered.len(), 5);

    // Every arc into a stage comes before any arc out of that stage.
    for (i, arc) in ordered.iter().enumerate() {
        for later in &ordered[i + 1..] {
            assert!(
                later.to != arc.from,
                "arc into `{}` placed after an arc out of it",
                arc.from
            );
        }
    }

    let stages = graph.stage_evaluation_order().unwrap();
    let final_pos = stages
        .iter()
        .position(|s| s == graph.final_stage())
        .unwrap();
    assert_eq!(final_pos, stages.len() - 1, "final stage must come last");
}

#[test]
fn test_cycle_fails_ordering() {
    let graph = StageGraph::build(
        arcs(&[("A", "B"), ("B", "A"), ("B", "Final")]),
        goods(&[]),
        goods(&["A", "B"]),
        GoodId::from(DEFAULT_FINAL_STAGE),
        false,
    )
    .unwrap();
    let err = graph.topological_arc_order().unwrap_err();
    assert!(matches!(err, GraphError::CyclicStageGraph { .. }));
}

#[test]
fn test_lenient_order_drops_dangling_arcs() {
    // "orphan" never flows into Final; the lenient ordering drops it instead
    // of stalling the whole ordering.
    let list = arcs(&[
        ("ing_0", "Stage_1"),
        ("Stage_1", "Final"),
        ("ing_1", "orphan"),
    ]);
    let ordering = order_arcs(&list, &GoodId::from(DEFAULT_FINAL_STAGE));
    assert_eq!(ordering.ordered.len(), 2);
    assert_eq!(ordering.dropped.len(), 1);
    assert_eq!(ordering.dropped[0].to, GoodId::from("orphan"));
}

#[test]
fn test_deep_chain_orders_bottom_up() {
    let graph = StageGraph::build(
        arcs(&[
            ("Stage_2", "Final"),
            ("Stage_1", "Stage_2"),
            ("ing_0", "Stage_1"),
        ]),
        goods(&["ing_0"]),
        goods(&["Stage_1", "Stage_2"]),
        GoodId::from(DEFAULT_FINAL_STAGE),
        false,
    )
    .unwrap();
    let stages = graph.stage_evaluation_order().unwrap();
    assert_eq!(
        stages,
        vec![
            GoodId::from("Stage_1"),
            GoodId::from("Stage_2"),
            GoodId::from("Final")
        ]
    );
}
