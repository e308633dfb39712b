//! Property tests for path closure and arc ordering on generated DAGs.

use formix_graph::{GoodId, GraphError, StageArc, StageGraph, DEFAULT_FINAL_STAGE};
use proptest::prelude::*;
use std::collections::BTreeSet;

const MAX_LAYERS: usize = 4;
const MAX_PER_LAYER: usize = 3;

/// Generate a layered DAG: goods live on layers, arcs only go to strictly
/// higher layers, and the top layer is the final stage. Acyclic by
/// construction, and every good has a route to the final stage.
fn layered_dag_strategy() -> impl Strategy<Value = (Vec<StageArc>, BTreeSet<GoodId>, BTreeSet<GoodId>)>
{
    (1usize..=MAX_LAYERS, 1usize..=MAX_PER_LAYER, any::<u64>()).prop_map(
        |(layers, per_layer, seed)| {
            let mut arcs = Vec::new();
            let mut sources = BTreeSet::new();
            let mut stages = BTreeSet::new();
            let final_stage = GoodId::from(DEFAULT_FINAL_STAGE);

            let name = |layer: usize, slot: usize| -> GoodId {
                if layer == 0 {
                    GoodId::new(format!("ing_{slot}"))
                } else {
                    GoodId::new(format!("Stage_{layer}_{slot}"))
                }
            };

            let mut rng = seed;
            let mut next = move || {
                // xorshift, deterministic per seed
                rng ^= rng << 13;
                rng ^= rng >> 7;
                rng ^= rng << 17;
                rng
            };

            for layer in 0..layers {
                for slot in 0..per_layer {
                    let good = name(layer, slot);
                    if layer == 0 {
                        sources.insert(good.clone());
                    } else {
                        stages.insert(good.clone());
                    }
                    // at least one outgoing arc, to a random higher layer
                    let target_layer = layer + 1 + (next() as usize) % (layers - layer);
                    let target = if target_layer >= layers {
                        final_stage.clone()
                    } else {
                        name(target_layer, (next() as usize) % per_layer)
                    };
                    arcs.push(StageArc::new(good, target));
                }
            }
            // make sure every non-source target is declared
            for arc in &arcs {
                if arc.to != final_stage && !sources.contains(&arc.to) {
                    stages.insert(arc.to.clone());
                }
            }
            (arcs, sources, stages)
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn paths_are_transitively_closed((arcs, sources, stages) in layered_dag_strategy()) {
        let graph = StageGraph::build(
            arcs,
            sources,
            stages,
            GoodId::from(DEFAULT_FINAL_STAGE),
            false,
        ).unwrap();
        let paths = graph.paths();
        for (a, b) in &paths {
            for (b2, c) in &paths {
                if b == b2 {
                    prop_assert!(paths.contains(&(a.clone(), c.clone())));
                }
            }
        }
    }

    #[test]
    fn acyclic_arcs_order_with_feeders_first((arcs, sources, stages) in layered_dag_strategy()) {
        let graph = StageGraph::build(
            arcs,
            sources,
            stages,
            GoodId::from(DEFAULT_FINAL_STAGE),
            false,
        ).unwrap();
        let ordered = graph.topological_arc_order().unwrap();
        prop_assert_eq!(ordered.len(), graph.arcs().len());
        for (i, arc) in ordered.iter().enumerate() {
            for later in &ordered[i + 1..] {
                prop_assert!(later.to != arc.from);
            }
        }
    }

    #[test]
    fn cyclic_arcs_always_fail_ordering((arcs, sources, mut stages) in layered_dag_strategy()) {
        // Close a cycle over two fresh stages wired into the final stage.
        let mut arcs = arcs;
        stages.insert(GoodId::from("cyc_a"));
        stages.insert(GoodId::from("cyc_b"));
        arcs.push(StageArc::new("cyc_a", "cyc_b"));
        arcs.push(StageArc::new("cyc_b", "cyc_a"));
        arcs.push(StageArc::new("cyc_b", DEFAULT_FINAL_STAGE));

        let graph = StageGraph::build(
            arcs,
            sources,
            stages,
            GoodId::from(DEFAULT_FINAL_STAGE),
            false,
        ).unwrap();
        let err = graph.topological_arc_order().unwrap_err();
        prop_assert!(
            matches!(err, GraphError::CyclicStageGraph { .. }),
            "expected a cyclic stage graph error"
        );
    }
}
