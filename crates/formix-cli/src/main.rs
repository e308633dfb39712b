//! Formix CLI
//!
//! Solver-independent entrypoints over an optimization request:
//! - `formix validate`: parse the request, build the stage graph and model,
//!   report what a solve would see.
//! - `formix baseline`: compute and print the reference-recipe baseline.
//! - `formix model`: variable/constraint statistics of the built model.
//!
//! There is deliberately no `solve` command: the solver is an external
//! collaborator wired in by the embedding service, not by this binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use formix_model::{
    ConstraintFamily, Domain, OptimizationRequest, RecipeModel, ReferenceRecipe, RequestData,
    VarKind,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formix")]
#[command(
    author,
    version,
    about = "Multi-stage blend formulation: request validation, baselines, model statistics"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a request and build its stage graph and model, reporting errors.
    Validate {
        /// Request JSON file.
        file: PathBuf,
    },
    /// Compute the reference-recipe baseline per stage.
    Baseline {
        /// Request JSON file.
        file: PathBuf,
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Report variable and constraint statistics of the built model.
    Model {
        /// Request JSON file.
        file: PathBuf,
        /// Emit JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Baseline { file, json } => baseline(&file, json),
        Commands::Model { file, json } => model_stats(&file, json),
    }
}

fn load(file: &PathBuf) -> Result<(OptimizationRequest, RequestData)> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("reading request `{}`", file.display()))?;
    let request: OptimizationRequest =
        serde_json::from_str(&text).context("request is not valid JSON for the input contract")?;
    let data = request.normalize().context("normalizing request")?;
    Ok((request, data))
}

fn validate(file: &PathBuf) -> Result<()> {
    let (request, data) = load(file)?;
    let model = RecipeModel::build(&data).context("building recipe model")?;

    println!("{}", "request ok".green().bold());
    println!(
        "  goods: {} sources, {} stages (final: {})",
        data.sources.len(),
        model.graph().stages().len(),
        model.graph().final_stage()
    );
    println!(
        "  arcs: {} ({} transitive paths)",
        model.graph().arcs().len(),
        model.paths().len()
    );
    println!(
        "  constraints: {} rows ({} active)",
        data.constraints.len(),
        data.constraints.iter().filter(|r| r.active).count()
    );
    println!("  objectives: {}", request.objectives.len());

    if let Err(err) = model.graph().topological_arc_order() {
        println!("{} {err}", "warning:".yellow().bold());
    }
    Ok(())
}

#[derive(Serialize)]
struct StageBaseline {
    total_mass: f64,
    cost: f64,
    qualities: BTreeMap<String, f64>,
}

fn baseline(file: &PathBuf, json: bool) -> Result<()> {
    let (_, data) = load(file)?;
    let model = RecipeModel::build(&data).context("building recipe model")?;
    let refrec = ReferenceRecipe::build(&data, model.graph().arcs());

    let stages = model
        .graph()
        .stage_evaluation_order()
        .context("ordering stages")?;
    let mut report: BTreeMap<String, StageBaseline> = BTreeMap::new();
    for stage in &stages {
        let mut qualities = BTreeMap::new();
        for (category, names) in &data.quality_names {
            for name in names {
                let quality = formix_model::QualityId::new(*category, name.clone());
                qualities.insert(quality.to_string(), refrec.quality(&quality, stage));
            }
        }
        // The cost of assembling a stage is what its recorded feeds cost.
        let cost = refrec
            .stage_ingredients(stage)
            .iter()
            .map(|i| refrec.cost(i, stage))
            .sum();
        report.insert(
            stage.to_string(),
            StageBaseline {
                total_mass: refrec.stage_total(stage),
                cost,
                qualities,
            },
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for stage in &stages {
        let entry = &report[&stage.to_string()];
        println!("{}", stage.to_string().cyan().bold());
        println!("  total mass: {:.4}", entry.total_mass);
        println!("  cost:       {:.4}", entry.cost);
        for (name, value) in &entry.qualities {
            println!("  {name}: {value:.4}");
        }
    }
    Ok(())
}

#[derive(Serialize, Default)]
struct ModelStats {
    variables: BTreeMap<&'static str, usize>,
    constraints: BTreeMap<&'static str, usize>,
}

fn model_stats(file: &PathBuf, json: bool) -> Result<()> {
    let (_, data) = load(file)?;
    let model = RecipeModel::build(&data).context("building recipe model")?;

    let mut stats = ModelStats::default();
    for var in model.variables() {
        let key = match var.kind {
            VarKind::Amount { .. } => "amount",
            VarKind::Presence { .. } => "presence",
            VarKind::Quality { .. } => "quality",
            VarKind::Slack { .. } => "slack",
        };
        *stats.variables.entry(key).or_insert(0) += 1;
    }
    for constraint in model.constraints() {
        let key = match constraint.family {
            ConstraintFamily::Business { .. } => "business",
            ConstraintFamily::ClassCount => "class_count",
            ConstraintFamily::QualityAggregation => "quality_aggregation",
            ConstraintFamily::PresenceLink => "presence_link",
            ConstraintFamily::ObjectivePin => "objective_pin",
        };
        *stats.constraints.entry(key).or_insert(0) += 1;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "variables".cyan().bold());
    for (kind, count) in &stats.variables {
        println!("  {kind}: {count}");
    }
    println!("{}", "constraints".cyan().bold());
    for (family, count) in &stats.constraints {
        println!("  {family}: {count}");
    }
    let binaries = model
        .variables()
        .iter()
        .filter(|v| matches!(v.domain, Domain::Binary))
        .count();
    println!("  ({} binary variables)", binaries);
    Ok(())
}
