//! Stage graph: the production DAG that blend fractions flow through.
//!
//! A *good* is either a source ingredient (a leaf with a property profile) or
//! a *stage* (an intermediate or final mix whose quality is computed, never
//! supplied). An *arc* `(from, to)` means `from` is blended into `to`; the
//! unique final stage is the sink of the whole graph.
//!
//! This crate answers the structural questions the model and the reference
//! recipe need:
//! - which goods feed (directly or transitively) into a given stage
//!   ([`StageGraph::reachable`], [`StageGraph::paths`]),
//! - in what order stage qualities can be evaluated so that no stage reads a
//!   child that has not been aggregated yet ([`StageGraph::topological_arc_order`]).
//!
//! Notes:
//! - Reachability tolerates cyclic input: callers sometimes hand us malformed
//!   arc lists, and a traversal that terminates is more useful there than a
//!   hard failure. Only the ordering operation treats a cycle as an error.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Name of the designated final stage when a request does not override it.
pub const DEFAULT_FINAL_STAGE: &str = "Final";

/// Name of the synthetic shrinkage ingredient. Its blend fraction is negative
/// (mass leaving the recipe), so default-arc inference skips it unless the
/// request opts in.
pub const EVAPORATION: &str = "evaporation";

// ============================================================================
// Goods and arcs
// ============================================================================

/// Identifier of a good (source ingredient or stage). Plain string identity:
/// the core accepts whatever names the caller uses, including anonymized ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoodId(String);

impl GoodId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this good is the synthetic evaporation ingredient.
    pub fn is_evaporation(&self) -> bool {
        self.0 == EVAPORATION
    }
}

impl fmt::Display for GoodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for GoodId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for GoodId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Directed edge: `from` is blended into `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageArc {
    pub from: GoodId,
    pub to: GoodId,
}

impl StageArc {
    pub fn new(from: impl Into<GoodId>, to: impl Into<GoodId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// An arc references a good that was never declared, or default-arc
    /// inference was asked to run with no source goods at all.
    #[error("invalid stage graph: {0}")]
    InvalidGraph(String),

    /// The arc list cannot be put in evaluation order: a full peeling pass
    /// made no progress. Raised only by the ordering operation.
    #[error("stage graph contains a cycle: {unplaced} arc(s) cannot be ordered")]
    CyclicStageGraph { unplaced: usize },
}

// ============================================================================
// Arc ordering
// ============================================================================

/// Result of ordering an arc list for stage evaluation.
///
/// `ordered` is arranged so that for any arc `(u, v)`, every arc into `u`
/// appears earlier: evaluating stage qualities by walking `ordered` never
/// reads a stage that has not been aggregated yet. `dropped` holds arcs that
/// could not be placed: members of a cycle, or arcs that never flow into the
/// final stage.
#[derive(Debug, Clone)]
pub struct ArcOrdering {
    pub ordered: Vec<StageArc>,
    pub dropped: Vec<StageArc>,
}

/// Order `arcs` for evaluation, dropping arcs that cannot be placed.
///
/// The peel runs backwards from the sink: an arc `(u, v)` is placed once all
/// of `v`'s outgoing arcs are placed (arcs terminating at `final_stage` seed
/// the process), and the accumulated list is reversed at the end.
pub fn order_arcs(arcs: &[StageArc], final_stage: &GoodId) -> ArcOrdering {
    let mut out_count: BTreeMap<&GoodId, usize> = BTreeMap::new();
    for arc in arcs {
        *out_count.entry(&arc.from).or_insert(0) += 1;
    }

    let mut placed = vec![false; arcs.len()];
    let mut placed_out: BTreeMap<&GoodId, usize> = BTreeMap::new();
    let mut ordered_idx: Vec<usize> = Vec::with_capacity(arcs.len());

    loop {
        let mut progress = false;
        for (i, arc) in arcs.iter().enumerate() {
            if placed[i] {
                continue;
            }
            let outgoing = out_count.get(&arc.to).copied().unwrap_or(0);
            let ready = arc.to == *final_stage
                || (outgoing > 0 && placed_out.get(&arc.to).copied().unwrap_or(0) == outgoing);
            if ready {
                placed[i] = true;
                *placed_out.entry(&arc.from).or_insert(0) += 1;
                ordered_idx.push(i);
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }

    ordered_idx.reverse();
    let ordered = ordered_idx.iter().map(|&i| arcs[i].clone()).collect();
    let dropped = arcs
        .iter()
        .enumerate()
        .filter(|(i, _)| !placed[*i])
        .map(|(_, a)| a.clone())
        .collect();
    ArcOrdering { ordered, dropped }
}

// ============================================================================
// Stage graph
// ============================================================================

/// The ingredient → stage DAG for one optimization request.
#[derive(Debug, Clone)]
pub struct StageGraph {
    final_stage: GoodId,
    sources: BTreeSet<GoodId>,
    stages: BTreeSet<GoodId>,
    arcs: Vec<StageArc>,
    adjacency: BTreeMap<GoodId, Vec<GoodId>>,
}

impl StageGraph {
    /// Build a graph from declared arcs and goods.
    ///
    /// When `arcs` is empty, the default topology is inferred: every source
    /// good arcs directly to `final_stage`, except `evaporation`, which is
    /// added only when `include_evaporation` is set.
    pub fn build(
        arcs: Vec<StageArc>,
        sources: BTreeSet<GoodId>,
        stages: BTreeSet<GoodId>,
        final_stage: GoodId,
        include_evaporation: bool,
    ) -> Result<Self, GraphError> {
        let mut stages = stages;
        stages.insert(final_stage.clone());

        let arcs = if arcs.is_empty() {
            if sources.is_empty() {
                return Err(GraphError::InvalidGraph(
                    "no arcs supplied and no source goods to infer default arcs from".to_string(),
                ));
            }
            sources
                .iter()
                .filter(|g| !g.is_evaporation() || include_evaporation)
                .map(|g| StageArc::new(g.clone(), final_stage.clone()))
                .collect()
        } else {
            arcs
        };

        for arc in &arcs {
            for good in [&arc.from, &arc.to] {
                if !sources.contains(good) && !stages.contains(good) {
                    return Err(GraphError::InvalidGraph(format!(
                        "arc `{}` -> `{}` references undeclared good `{good}`",
                        arc.from, arc.to
                    )));
                }
            }
        }

        let mut adjacency: BTreeMap<GoodId, Vec<GoodId>> = BTreeMap::new();
        for arc in &arcs {
            adjacency
                .entry(arc.from.clone())
                .or_default()
                .push(arc.to.clone());
        }

        tracing::debug!(
            arcs = arcs.len(),
            sources = sources.len(),
            stages = stages.len(),
            "stage graph built"
        );

        Ok(Self {
            final_stage,
            sources,
            stages,
            arcs,
            adjacency,
        })
    }

    pub fn final_stage(&self) -> &GoodId {
        &self.final_stage
    }

    pub fn sources(&self) -> &BTreeSet<GoodId> {
        &self.sources
    }

    pub fn stages(&self) -> &BTreeSet<GoodId> {
        &self.stages
    }

    /// All goods, sources first.
    pub fn goods(&self) -> impl Iterator<Item = &GoodId> {
        self.sources.iter().chain(self.stages.iter())
    }

    pub fn arcs(&self) -> &[StageArc] {
        &self.arcs
    }

    pub fn has_arc(&self, from: &GoodId, to: &GoodId) -> bool {
        self.adjacency
            .get(from)
            .is_some_and(|next| next.contains(to))
    }

    /// Goods blended directly into `to`, in arc declaration order.
    pub fn incoming(&self, to: &GoodId) -> Vec<&GoodId> {
        self.arcs
            .iter()
            .filter(|a| a.to == *to)
            .map(|a| &a.from)
            .collect()
    }

    /// All goods reachable from `from` via one or more arcs.
    ///
    /// Iterative depth-first traversal with a per-call visited set: cyclic
    /// input terminates instead of erroring, and `from` itself appears in the
    /// result only if a cycle leads back to it.
    pub fn reachable(&self, from: &GoodId) -> BTreeSet<GoodId> {
        let mut visited: BTreeSet<GoodId> = BTreeSet::new();
        let mut stack: Vec<&GoodId> = vec![from];
        while let Some(good) = stack.pop() {
            if let Some(next) = self.adjacency.get(good) {
                for n in next {
                    if visited.insert(n.clone()) {
                        stack.push(n);
                    }
                }
            }
        }
        visited
    }

    /// The transitive-reachability relation: every `(a, b)` with `b`
    /// reachable from `a` and `a != b`.
    pub fn paths(&self) -> BTreeSet<(GoodId, GoodId)> {
        let mut paths = BTreeSet::new();
        for a in self.goods() {
            for b in self.reachable(a) {
                if b != *a {
                    paths.insert((a.clone(), b));
                }
            }
        }
        paths
    }

    /// Arcs in stage-evaluation order; fails on cyclic (or dangling) input.
    pub fn topological_arc_order(&self) -> Result<Vec<StageArc>, GraphError> {
        let ArcOrdering { ordered, dropped } = order_arcs(&self.arcs, &self.final_stage);
        if !dropped.is_empty() {
            return Err(GraphError::CyclicStageGraph {
                unplaced: dropped.len(),
            });
        }
        Ok(ordered)
    }

    /// Unique arc targets in evaluation order: every stage appears after all
    /// the stages that feed it.
    pub fn stage_evaluation_order(&self) -> Result<Vec<GoodId>, GraphError> {
        let ordered = self.topological_arc_order()?;
        let mut seen = BTreeSet::new();
        let mut stages = Vec::new();
        for arc in ordered {
            if seen.insert(arc.to.clone()) {
                stages.push(arc.to);
            }
        }
        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<GoodId> {
        names.iter().map(|n| GoodId::from(*n)).collect()
    }

    #[test]
    fn default_arcs_skip_evaporation_unless_opted_in() {
        let sources = set(&["a", "b", EVAPORATION]);
        let graph = StageGraph::build(
            vec![],
            sources.clone(),
            BTreeSet::new(),
            GoodId::from(DEFAULT_FINAL_STAGE),
            false,
        )
        .unwrap();
        assert_eq!(graph.arcs().len(), 2);

        let graph = StageGraph::build(
            vec![],
            sources,
            BTreeSet::new(),
            GoodId::from(DEFAULT_FINAL_STAGE),
            true,
        )
        .unwrap();
        assert_eq!(graph.arcs().len(), 3);
    }

    #[test]
    fn default_arcs_require_sources() {
        let err = StageGraph::build(
            vec![],
            BTreeSet::new(),
            BTreeSet::new(),
            GoodId::from(DEFAULT_FINAL_STAGE),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidGraph(_)));
    }
}
