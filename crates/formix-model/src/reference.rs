//! Reference recipe: baseline quality and cost of a previously-recorded
//! blend, computed once at construction by walking the stage graph bottom-up.
//!
//! The recorded blend lists percentage amounts per `(ingredient, target)`;
//! aggregation mirrors what the optimizer's structural constraints express:
//! a stage's quality is the mass-weighted average of its direct children's
//! quality, discounted by process loss. All aggregation happens here, once;
//! queries only index into the finished tables.

use crate::input::RequestData;
use crate::quality::QualityId;
use formix_graph::{order_arcs, GoodId, StageArc};
use std::collections::{BTreeMap, BTreeSet};

/// One recorded `(ingredient, target)` line of the reference blend,
/// fraction-valued after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeEntry {
    pub ingredient: GoodId,
    pub target: GoodId,
    pub amount: f64,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct ReferenceRecipe {
    final_stage: GoodId,
    /// Entries in stage-evaluation order: arcs into a stage precede arcs
    /// out of it.
    entries: Vec<RecipeEntry>,
    /// Computed quality per good: profile values for sources, aggregates
    /// for stages.
    qualities: BTreeMap<(GoodId, QualityId), f64>,
    /// Goods that appear as blend lines.
    goods: BTreeSet<GoodId>,
}

impl ReferenceRecipe {
    /// Build the baseline from the recorded blend and the arc list the
    /// optimizer uses. Arcs that never reach the final stage are dropped
    /// rather than stalling the ordering: a reference blend is allowed to
    /// disagree with a sloppy arc list.
    pub fn build(data: &RequestData, arcs: &[StageArc]) -> Self {
        let ordering = order_arcs(arcs, &data.final_stage);
        if !ordering.dropped.is_empty() {
            tracing::warn!(
                dropped = ordering.dropped.len(),
                "reference recipe ignored arcs that do not reach the final stage"
            );
        }

        // One entry per surviving arc; amounts come from the blend rows
        // (percent), absent lines mean the reference did not use the arc.
        let mut entries: Vec<RecipeEntry> = ordering
            .ordered
            .iter()
            .map(|arc| {
                let percent = data
                    .blend
                    .iter()
                    .find(|b| b.ingredient == arc.from && b.target == arc.to)
                    .map(|b| b.amount)
                    .unwrap_or(0.0);
                RecipeEntry {
                    ingredient: arc.from.clone(),
                    target: arc.to.clone(),
                    amount: percent,
                    cost: 0.0,
                }
            })
            .collect();

        // Cost pass, still in percent: a source line costs its share of the
        // unit cost; a stage line inherits the sum of the lines feeding it
        // (already computed: entries are in evaluation order).
        let mut priced: Vec<bool> = vec![false; entries.len()];
        for i in 0..entries.len() {
            let key = (entries[i].ingredient.clone(), entries[i].target.clone());
            if let Some(unit_cost) = data.cost.get(&key) {
                entries[i].cost = entries[i].amount * unit_cost / 100.0;
                priced[i] = true;
            }
        }
        for i in 0..entries.len() {
            if priced[i] {
                continue;
            }
            let ingredient = entries[i].ingredient.clone();
            let is_stage = entries.iter().any(|e| e.target == ingredient);
            if is_stage {
                entries[i].cost = entries
                    .iter()
                    .filter(|e| e.target == ingredient)
                    .map(|e| e.cost)
                    .sum();
            }
        }

        // Percent -> fraction for the solver's variable domain.
        for entry in &mut entries {
            entry.amount /= 100.0;
        }

        let qualities = Self::aggregate_qualities(data, &entries);
        let goods = entries.iter().map(|e| e.ingredient.clone()).collect();

        Self {
            final_stage: data.final_stage.clone(),
            entries,
            qualities,
            goods,
        }
    }

    fn aggregate_qualities(
        data: &RequestData,
        entries: &[RecipeEntry],
    ) -> BTreeMap<(GoodId, QualityId), f64> {
        let mut cq = data.profile.clone();
        let quality_ids: Vec<QualityId> = data
            .quality_names
            .iter()
            .flat_map(|(category, names)| {
                names
                    .iter()
                    .map(|n| QualityId::new(*category, n.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        // Unique targets in evaluation order.
        let mut seen = BTreeSet::new();
        let stages: Vec<GoodId> = entries
            .iter()
            .filter(|e| seen.insert(e.target.clone()))
            .map(|e| e.target.clone())
            .collect();

        for stage in stages {
            let children: Vec<&RecipeEntry> =
                entries.iter().filter(|e| e.target == stage).collect();
            let total: f64 = children.iter().map(|e| e.amount).sum();
            for quality in &quality_ids {
                // Zero incoming mass means quality 0, not a division error.
                let mut value = 0.0;
                if total != 0.0 {
                    for child in &children {
                        let child_q = cq
                            .get(&(child.ingredient.clone(), quality.clone()))
                            .copied()
                            .unwrap_or(0.0);
                        value += child.amount * child_q;
                    }
                    value /= total;
                }
                let loss = data
                    .process_loss
                    .get(&(stage.clone(), quality.clone()))
                    .copied()
                    .unwrap_or(0.0);
                cq.insert((stage.clone(), quality.clone()), value * (1.0 - loss));
            }
        }
        cq
    }

    pub fn final_stage(&self) -> &GoodId {
        &self.final_stage
    }

    /// Goods recorded as blend lines.
    pub fn goods(&self) -> &BTreeSet<GoodId> {
        &self.goods
    }

    pub fn entries(&self) -> &[RecipeEntry] {
        &self.entries
    }

    /// Aggregated (for stages) or profile (for sources) quality value.
    pub fn quality(&self, quality: &QualityId, good: &GoodId) -> f64 {
        self.qualities
            .get(&(good.clone(), quality.clone()))
            .copied()
            .unwrap_or(0.0)
    }

    /// Quality scaled by the stage's total incoming mass: the per-batch
    /// figure reports compare optimized recipes against.
    pub fn quality_amount(&self, quality: &QualityId, stage: &GoodId) -> f64 {
        self.quality(quality, stage) * self.stage_total(stage)
    }

    /// Recorded blend fraction; 0 when the pair was never recorded.
    pub fn amount(&self, ingredient: &GoodId, stage: &GoodId) -> f64 {
        self.entries
            .iter()
            .find(|e| e.ingredient == *ingredient && e.target == *stage)
            .map(|e| e.amount)
            .unwrap_or(0.0)
    }

    /// Total fraction of `ingredient` over all stages.
    pub fn total_amount(&self, ingredient: &GoodId) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.ingredient == *ingredient)
            .map(|e| e.amount)
            .sum()
    }

    /// Total incoming mass of a stage.
    pub fn stage_total(&self, stage: &GoodId) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.target == *stage)
            .map(|e| e.amount)
            .sum()
    }

    /// Cost of one blend line; the final stage queried as an ingredient
    /// yields the whole recipe's cost.
    pub fn cost(&self, ingredient: &GoodId, stage: &GoodId) -> f64 {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.ingredient == *ingredient && e.target == *stage)
        {
            return entry.cost;
        }
        if *ingredient == self.final_stage {
            return self
                .entries
                .iter()
                .filter(|e| e.target == self.final_stage)
                .map(|e| e.cost)
                .sum();
        }
        0.0
    }

    /// Ingredients recorded as feeding `stage`, in entry order.
    pub fn stage_ingredients(&self, stage: &GoodId) -> Vec<GoodId> {
        let mut seen = BTreeSet::new();
        self.entries
            .iter()
            .filter(|e| e.target == *stage)
            .filter(|e| seen.insert(e.ingredient.clone()))
            .map(|e| e.ingredient.clone())
            .collect()
    }
}
