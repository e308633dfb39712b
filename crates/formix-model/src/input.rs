//! Wire-format request records and their normalization into model tables.
//!
//! The request arrives as JSON lists whose field names carry spaces and vary
//! by constraint family (`ingredient 1`, `nutrient 1`, `class name 1`...).
//! Everything here is about turning that shape into the fixed vocabulary of
//! [`crate::constraint`]: defaults applied (missing `target_good` means the
//! final stage), percentages divided down into the solver's fraction domain,
//! loosening requests merged onto their rows, and the synthetic evaporation
//! ingredient added when the profile tracks water.

use crate::constraint::{
    ClassCountRow, CombineOp, ConstraintKind, ConstraintRow, LoosenStrength, PerUnit, ServingParams,
};
use crate::error::ModelError;
use crate::expr::CmpOp;
use crate::quality::{QualityCategory, QualityId};
use formix_graph::{GoodId, StageArc, DEFAULT_FINAL_STAGE, EVAPORATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Wire records
// ============================================================================

/// One numeric ingredient record: `{"ingredient": ..., "<quality>": value}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericRow {
    pub ingredient: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

/// One class-tag record; tag columns are string-valued, empty means untagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRow {
    pub ingredient: String,
    #[serde(flatten)]
    pub tags: BTreeMap<String, String>,
}

/// One reference-blend record, percentage-valued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendRow {
    pub ingredient: String,
    pub value: f64,
    #[serde(default)]
    pub target_good: Option<String>,
}

/// One cost record; `target_good` defaults to the final stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRow {
    pub ingredient: String,
    pub cost: f64,
    #[serde(default)]
    pub target_good: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngredientsInput {
    #[serde(default)]
    pub profile: Vec<NumericRow>,
    #[serde(default)]
    pub sustainability: Vec<NumericRow>,
    #[serde(default)]
    pub otherp: Vec<NumericRow>,
    #[serde(default, rename = "AAprofile")]
    pub aa_profile: Vec<NumericRow>,
    #[serde(default)]
    pub subcomponents: Vec<NumericRow>,
    #[serde(default)]
    pub ingtags: Vec<TagRow>,
    #[serde(default)]
    pub refrec: Vec<BlendRow>,
    #[serde(default)]
    pub cost: Vec<CostRow>,
}

/// An as-yet untyped constraint row: column names still carry the family's
/// own item headers, normalized by the `" 1"` / `" 2"` suffix rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawConstraintRow(pub BTreeMap<String, Value>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassConRow {
    #[serde(rename = "class name")]
    pub class_name: String,
    #[serde(rename = "minimum ingredients")]
    pub min_ingredients: f64,
    #[serde(rename = "maximum ingredients")]
    pub max_ingredients: f64,
    #[serde(default)]
    pub target_good: Option<String>,
}

/// An opaque label-standard score request; the core only routes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRow {
    pub score: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtherConstraintsInput {
    #[serde(default)]
    pub classcon: Vec<ClassConRow>,
    #[serde(default)]
    pub scon: Vec<ScoreRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingRow {
    #[serde(rename = "serving parameter")]
    pub parameter: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveOption {
    Minimize,
    Maximize,
    Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveRow {
    #[serde(rename = "Objective")]
    pub objective: String,
    #[serde(rename = "Option")]
    pub option: ObjectiveOption,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoosenRow {
    #[serde(rename = "constraint name")]
    pub constraint_name: String,
    #[serde(rename = "loosening strength")]
    pub strength: LoosenStrength,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherOptRow {
    pub parameter: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageDataInput {
    #[serde(default)]
    pub goods: Vec<String>,
    #[serde(default)]
    pub arcs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessLossRow {
    pub target_good: String,
    /// Flattened quality key, e.g. `profile__sugars`.
    pub quality: String,
    pub value: f64,
}

/// A complete optimization request as received on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationRequest {
    #[serde(default)]
    pub ingredients: IngredientsInput,
    #[serde(default)]
    pub units: BTreeMap<String, String>,
    /// Constraint lists keyed by family (`ing`, `profile`, `costcon`, ...).
    #[serde(default)]
    pub constraints: BTreeMap<String, Vec<RawConstraintRow>>,
    #[serde(default)]
    pub other_constraints: OtherConstraintsInput,
    #[serde(default)]
    pub servingc: Vec<ServingRow>,
    #[serde(default)]
    pub objectives: Vec<ObjectiveRow>,
    #[serde(default)]
    pub lconstraints: Vec<LoosenRow>,
    #[serde(default)]
    pub other_opt: Vec<OtherOptRow>,
    #[serde(default)]
    pub stage_data: Option<StageDataInput>,
    #[serde(default)]
    pub process_loss: Vec<ProcessLossRow>,
}

// ============================================================================
// Normalized request
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectiveSpec<'a> {
    pub name: &'a str,
    pub option: ObjectiveOption,
}

/// A normalized blend entry: fraction-valued, target defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendEntry {
    pub ingredient: GoodId,
    pub target: GoodId,
    pub amount: f64,
}

/// The request after normalization: every table in model vocabulary, every
/// default applied.
#[derive(Debug, Clone)]
pub struct RequestData {
    pub final_stage: GoodId,
    pub sources: BTreeSet<GoodId>,
    pub stages: BTreeSet<GoodId>,
    pub arcs: Vec<StageArc>,
    pub include_evaporation: bool,
    /// `q[ingredient, quality]`; absent pairs read as 0.
    pub profile: BTreeMap<(GoodId, QualityId), f64>,
    /// Known quality names per category.
    pub quality_names: BTreeMap<QualityCategory, BTreeSet<String>>,
    /// Class tags per ingredient.
    pub tags: BTreeMap<GoodId, BTreeSet<String>>,
    /// `cost[ingredient, target_stage]`; absent pairs read as 0.
    pub cost: BTreeMap<(GoodId, GoodId), f64>,
    pub process_loss: BTreeMap<(GoodId, QualityId), f64>,
    pub constraints: Vec<ConstraintRow>,
    pub class_counts: Vec<ClassCountRow>,
    pub serving: ServingParams,
    pub scores: Vec<ScoreRow>,
    pub blend: Vec<BlendEntry>,
    pub units: BTreeMap<String, String>,
}

impl RequestData {
    pub fn quality_value(&self, good: &GoodId, quality: &QualityId) -> f64 {
        self.profile
            .get(&(good.clone(), quality.clone()))
            .copied()
            .unwrap_or(0.0)
    }

    /// Resolve the quality name carrying energy, among the accepted
    /// spellings, for per-100kcal scaling.
    pub fn energy_quality(&self) -> Result<QualityId, ModelError> {
        let names = self
            .quality_names
            .get(&QualityCategory::Profile)
            .cloned()
            .unwrap_or_default();
        for candidate in ["energy", "Energy", "calories", "Calories"] {
            if names.contains(candidate) {
                return Ok(QualityId::profile(candidate));
            }
        }
        Err(ModelError::MissingEnergyQuality)
    }

    /// Whether `name` is a known quality in `category`.
    pub fn has_quality(&self, category: QualityCategory, name: &str) -> bool {
        self.quality_names
            .get(&category)
            .is_some_and(|names| names.contains(name))
    }
}

impl OptimizationRequest {
    /// Normalize the wire request into model tables.
    pub fn normalize(&self) -> Result<RequestData, ModelError> {
        let final_stage = GoodId::from(DEFAULT_FINAL_STAGE);

        let mut profile: BTreeMap<(GoodId, QualityId), f64> = BTreeMap::new();
        let mut quality_names: BTreeMap<QualityCategory, BTreeSet<String>> = BTreeMap::new();
        let mut sources: BTreeSet<GoodId> = BTreeSet::new();

        let category_lists = [
            (QualityCategory::Profile, &self.ingredients.profile),
            (
                QualityCategory::Sustainability,
                &self.ingredients.sustainability,
            ),
            (QualityCategory::OtherParams, &self.ingredients.otherp),
            (
                QualityCategory::AminoAcidProfile,
                &self.ingredients.aa_profile,
            ),
            (
                QualityCategory::Subcomponents,
                &self.ingredients.subcomponents,
            ),
        ];
        for (category, rows) in category_lists {
            for row in rows {
                let good = GoodId::from(row.ingredient.as_str());
                if category == QualityCategory::Profile {
                    sources.insert(good.clone());
                }
                for (name, value) in &row.values {
                    quality_names
                        .entry(category)
                        .or_default()
                        .insert(name.clone());
                    profile.insert((good.clone(), QualityId::new(category, name.clone())), *value);
                }
            }
        }

        let mut tags: BTreeMap<GoodId, BTreeSet<String>> = BTreeMap::new();
        for row in &self.ingredients.ingtags {
            let entry = tags.entry(GoodId::from(row.ingredient.as_str())).or_default();
            for tag in row.tags.values() {
                if !tag.is_empty() {
                    entry.insert(tag.clone());
                }
            }
        }

        let mut cost: BTreeMap<(GoodId, GoodId), f64> = BTreeMap::new();
        for row in &self.ingredients.cost {
            let target = row
                .target_good
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(GoodId::from)
                .unwrap_or_else(|| final_stage.clone());
            cost.insert((GoodId::from(row.ingredient.as_str()), target), row.cost);
        }

        // Synthesize the evaporation ingredient when the profile tracks
        // water: negative-mass shrinkage is pure water leaving the recipe.
        let water_columns: Vec<String> = quality_names
            .get(&QualityCategory::Profile)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| n.eq_ignore_ascii_case("water"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let evaporation = GoodId::from(EVAPORATION);
        if !water_columns.is_empty() && !sources.contains(&evaporation) {
            sources.insert(evaporation.clone());
            for column in &water_columns {
                profile.insert(
                    (evaporation.clone(), QualityId::profile(column.clone())),
                    100.0,
                );
            }
        }

        let include_evaporation = self
            .other_opt
            .iter()
            .any(|row| row.parameter == EVAPORATION && row.value.as_f64() == Some(1.0));

        // Stage topology: declared goods, or inferred from arc endpoints
        // that are not ingredients.
        let stage_data = self.stage_data.clone().unwrap_or_default();
        let arcs: Vec<StageArc> = stage_data
            .arcs
            .iter()
            .map(|(from, to)| StageArc::new(from.as_str(), to.as_str()))
            .collect();
        let mut stages: BTreeSet<GoodId> = stage_data
            .goods
            .iter()
            .map(|g| GoodId::from(g.as_str()))
            .collect();
        if stages.is_empty() {
            for arc in &arcs {
                for good in [&arc.from, &arc.to] {
                    if !sources.contains(good) {
                        stages.insert(good.clone());
                    }
                }
            }
        }

        let mut process_loss: BTreeMap<(GoodId, QualityId), f64> = BTreeMap::new();
        for row in &self.process_loss {
            let quality =
                QualityId::parse(&row.quality).ok_or_else(|| ModelError::InvalidQualityKey {
                    key: row.quality.clone(),
                })?;
            process_loss.insert((GoodId::from(row.target_good.as_str()), quality), row.value);
        }

        let mut constraints = Vec::new();
        for (kind_key, rows) in &self.constraints {
            let kind = constraint_kind(kind_key)?;
            for raw in rows {
                constraints.push(normalize_constraint_row(raw, kind, &final_stage)?);
            }
        }
        for request in &self.lconstraints {
            for row in constraints
                .iter_mut()
                .filter(|r| r.name == request.constraint_name)
            {
                row.loosen = Some(request.strength);
            }
        }

        let class_counts = self
            .other_constraints
            .classcon
            .iter()
            .map(|row| ClassCountRow {
                class_name: row.class_name.clone(),
                min_ingredients: row.min_ingredients,
                max_ingredients: row.max_ingredients,
                target: row
                    .target_good
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .map(GoodId::from)
                    .unwrap_or_else(|| final_stage.clone()),
            })
            .collect();

        let serving = serving_params(&self.servingc);

        let blend = self
            .ingredients
            .refrec
            .iter()
            .map(|row| BlendEntry {
                ingredient: GoodId::from(row.ingredient.as_str()),
                target: row
                    .target_good
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .map(GoodId::from)
                    .unwrap_or_else(|| final_stage.clone()),
                amount: row.value,
            })
            .collect();

        Ok(RequestData {
            final_stage,
            sources,
            stages,
            arcs,
            include_evaporation,
            profile,
            quality_names,
            tags,
            cost,
            process_loss,
            constraints,
            class_counts,
            serving,
            scores: self.other_constraints.scon.clone(),
            blend,
            units: self.units.clone(),
        })
    }

    pub fn objective_specs(&self) -> Vec<ObjectiveSpec<'_>> {
        self.objectives
            .iter()
            .map(|row| ObjectiveSpec {
                name: row.objective.as_str(),
                option: row.option,
            })
            .collect()
    }
}

// ============================================================================
// Row-level normalization
// ============================================================================

fn constraint_kind(key: &str) -> Result<ConstraintKind, ModelError> {
    match key {
        "ing" => Ok(ConstraintKind::Ingredient),
        "class_amount" => Ok(ConstraintKind::ClassAmount),
        "costcon" => Ok(ConstraintKind::Cost),
        other => QualityCategory::from_key(other)
            .map(ConstraintKind::Quality)
            .ok_or_else(|| ModelError::UnknownConstraintScope {
                kind: other.to_string(),
            }),
    }
}

fn str_field<'a>(raw: &'a RawConstraintRow, key: &str) -> Option<&'a str> {
    raw.0.get(key).and_then(Value::as_str)
}

/// Find the item column by its positional suffix (`ingredient 1`,
/// `nutrient 1`, `class name 1`... all normalize the same way).
fn item_field(raw: &RawConstraintRow, suffix: &str) -> Option<String> {
    raw.0
        .iter()
        .find(|(key, _)| key.ends_with(suffix))
        .and_then(|(_, v)| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn normalize_constraint_row(
    raw: &RawConstraintRow,
    kind: ConstraintKind,
    final_stage: &GoodId,
) -> Result<ConstraintRow, ModelError> {
    let name = str_field(raw, "constraint name")
        .unwrap_or_default()
        .to_string();
    let invalid = |reason: &str| ModelError::InvalidConstraint {
        name: name.clone(),
        reason: reason.to_string(),
    };

    let item1 = item_field(raw, " 1").ok_or_else(|| invalid("missing first item"))?;
    let item2 = item_field(raw, " 2");
    let combine = match str_field(raw, "operator").unwrap_or_default() {
        "" => None,
        "+" => Some(CombineOp::Plus),
        "-" => Some(CombineOp::Minus),
        "/" => Some(CombineOp::Ratio),
        other => return Err(invalid(&format!("unknown item operator `{other}`"))),
    };
    if item2.is_some() && combine.is_none() {
        return Err(invalid("second item without an operator"));
    }

    let op = match str_field(raw, "constraint") {
        Some(">=") => CmpOp::Ge,
        Some("<=") => CmpOp::Le,
        Some("=") => CmpOp::Eq,
        other => return Err(invalid(&format!("unknown comparison `{other:?}`"))),
    };

    let mut value = raw
        .0
        .get("value")
        .and_then(Value::as_f64)
        .ok_or_else(|| invalid("missing numeric value"))?;

    // Ingredient and class-amount bounds arrive percentage-valued; the
    // solver's blend fractions live in [0, 1]. Ratios are left alone.
    let percent_scaled = matches!(
        kind,
        ConstraintKind::Ingredient | ConstraintKind::ClassAmount
    );
    if percent_scaled && combine != Some(CombineOp::Ratio) {
        value /= 100.0;
    }

    // `per` invariants: ingredient rows are always per-100g, cost rows have
    // no unit basis at all.
    let per = match kind {
        ConstraintKind::Ingredient => Some(PerUnit::Per100g),
        ConstraintKind::Cost => None,
        _ => match str_field(raw, "per") {
            None | Some("") => None,
            Some(s) => Some(
                PerUnit::parse(s).ok_or_else(|| invalid(&format!("unknown per-unit `{s}`")))?,
            ),
        },
    };

    let active = str_field(raw, "active") == Some("yes");
    let target = match str_field(raw, "target_good") {
        None | Some("") => final_stage.clone(),
        Some(t) => GoodId::from(t),
    };

    Ok(ConstraintRow {
        name,
        kind,
        item1,
        combine,
        item2,
        op,
        value,
        per,
        active,
        target,
        loosen: None,
    })
}

fn serving_params(rows: &[ServingRow]) -> ServingParams {
    let mut serving = ServingParams::default();
    for row in rows {
        let Some(value) = row.value.as_f64() else {
            continue; // empty string means "use the default"
        };
        match row.parameter.as_str() {
            "sps_as_sold_g" => serving.sold_g = value,
            "sps_as_consummed_g" => serving.consumed_g = value,
            "dp_as_consumed_gml" => serving.density = value,
            _ => {}
        }
    }
    serving
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingredient_rows_are_percent_scaled_and_forced_per_100g() {
        let raw: RawConstraintRow = serde_json::from_value(serde_json::json!({
            "constraint name": "c0",
            "ingredient 1": "ing_0",
            "operator": "",
            "ingredient 2": "",
            "constraint": ">=",
            "value": 35.0,
            "active": "yes",
            "target_good": "Stage_2",
        }))
        .unwrap();
        let row = normalize_constraint_row(
            &raw,
            ConstraintKind::Ingredient,
            &GoodId::from(DEFAULT_FINAL_STAGE),
        )
        .unwrap();
        assert_eq!(row.value, 0.35);
        assert_eq!(row.per, Some(PerUnit::Per100g));
        assert_eq!(row.target, GoodId::from("Stage_2"));
    }

    #[test]
    fn ratio_rows_keep_their_value() {
        let raw: RawConstraintRow = serde_json::from_value(serde_json::json!({
            "constraint name": "ratio",
            "ingredient 1": "a",
            "operator": "/",
            "ingredient 2": "b",
            "constraint": "<=",
            "value": 2.0,
            "active": "yes",
        }))
        .unwrap();
        let row = normalize_constraint_row(
            &raw,
            ConstraintKind::Ingredient,
            &GoodId::from(DEFAULT_FINAL_STAGE),
        )
        .unwrap();
        assert_eq!(row.value, 2.0);
        assert_eq!(row.combine, Some(CombineOp::Ratio));
    }

    #[test]
    fn evaporation_synthesized_from_water_profile() {
        let request: OptimizationRequest = serde_json::from_value(serde_json::json!({
            "ingredients": {
                "profile": [
                    {"ingredient": "ing_0", "water": 65.7, "sugars": 50.2}
                ],
                "cost": [{"ingredient": "ing_0", "cost": 16.57}]
            }
        }))
        .unwrap();
        let data = request.normalize().unwrap();
        assert!(data.sources.contains(&GoodId::from(EVAPORATION)));
        assert_eq!(
            data.quality_value(&GoodId::from(EVAPORATION), &QualityId::profile("water")),
            100.0
        );
        assert_eq!(
            data.quality_value(&GoodId::from(EVAPORATION), &QualityId::profile("sugars")),
            0.0
        );
    }
}
