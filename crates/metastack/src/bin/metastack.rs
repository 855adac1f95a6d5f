//! CLI entry point for the stacking ensemble.
//!
//! Subcommands:
//!   select   -- Select (or reload) the meta models and write the inventory
//!   rank     -- Write the per-fold model usage ranking
//!   train    -- Grid-search the second stage and record the CV summary
//!   predict  -- Vote on the test set and record every variant's scores
//!   merge    -- Keep the best boosters of several trained ensembles

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use metastack::artifacts::FsPredictionStore;
use metastack::catalog::ModelCatalog;
use metastack::dataset::JsonFoldLabels;
use metastack::selection::{CandidateStatistics, JsonCandidateStatistics, PredictionStatistics};
use metastack::submission::JsonDecisionWriter;
use metastack::{Ensemble, EnsembleConfig, Fold, Label, RecordPaths, Result};

#[derive(Parser)]
#[command(name = "metastack", about = "Meta-model selection and stacking ensemble")]
struct Cli {
    #[command(flatten)]
    inputs: Inputs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Inputs {
    /// Ensemble configuration (JSON).
    #[arg(long, global = true, default_value = "ensemble.json")]
    config: PathBuf,

    /// Base model catalog (JSON list of model specs).
    #[arg(long, global = true, default_value = "catalog.json")]
    catalog: PathBuf,

    /// Directory with `validation/` and `test/` prediction artifacts.
    #[arg(long, global = true, default_value = "predictions")]
    predictions: PathBuf,

    /// Directory with `fold<k>.json` and `test.json` label matrices.
    #[arg(long, global = true, default_value = "labels")]
    labels: PathBuf,

    /// Precomputed candidate statistics; scored from predictions when absent.
    #[arg(long, global = true)]
    statistics: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Select (or reload) the meta models.
    Select,

    /// Write the most used models per fold.
    Rank {
        /// Models listed per fold.
        #[arg(long, default_value = "20")]
        top_k: usize,
    },

    /// Train the second stage.
    Train {
        /// Only this fold (1-5); requires --label.
        #[arg(long, requires = "label")]
        fold: Option<usize>,

        /// Only this label (0-12); requires --fold.
        #[arg(long, requires = "fold")]
        label: Option<usize>,

        /// Grid-search the given pair again even if a record exists.
        #[arg(long, requires = "fold")]
        retrain: bool,
    },

    /// Predict and score the test set.
    Predict {
        /// Directory for the decision files.
        #[arg(long, default_value = "submissions")]
        output: PathBuf,

        /// Also score the base models' own majority vote.
        #[arg(long)]
        first_stage: bool,
    },

    /// Copy the best booster per (fold, label) from other record directories.
    Merge {
        /// Record directories of trained ensembles.
        #[arg(long, required = true, num_args = 1..)]
        sources: Vec<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let Inputs {
        config,
        catalog,
        predictions,
        labels,
        statistics,
    } = cli.inputs;

    let config = EnsembleConfig::from_json_file(&config)?;
    let catalog = ModelCatalog::load(&catalog)?;
    let store = FsPredictionStore::under(&predictions);
    let labels = JsonFoldLabels::new(labels);

    let precomputed;
    let scored;
    let candidates: &dyn CandidateStatistics = match &statistics {
        Some(path) => {
            precomputed = JsonCandidateStatistics::load(path)?;
            &precomputed
        }
        None => {
            scored = PredictionStatistics {
                catalog: &catalog,
                store: &store,
                labels: &labels,
                beta: config.beta,
                search: config.search,
            };
            &scored
        }
    };

    let shared_stats_dir = config.shared_stats_dir.clone();
    let ensemble = Ensemble::open(config, candidates, &store, &labels)?;

    match cli.command {
        Command::Select => {
            let segmented = ensemble.segmented_models(&catalog);
            println!(
                "selected {} models ({} on segmented images)",
                ensemble.selection().unique_models().len(),
                segmented.len()
            );
        }
        Command::Rank { top_k } => {
            ensemble.write_rank_report(top_k)?;
            println!("wrote {}", ensemble.paths().rank_txt().display());
        }
        Command::Train { fold, label, retrain } => {
            if let (Some(fold), Some(label)) = (fold, label) {
                let (fold, label) = (Fold::new(fold)?, Label::new(label)?);
                let record = if retrain {
                    ensemble.retrain(fold, label)?
                } else {
                    ensemble.train_single(fold, label)?
                };
                println!(
                    "fold {fold} label {label}: greedy_f2 {:.6} at threshold {:.2}",
                    record.greedy_f2(),
                    record.greedy_threshold()
                );
            } else {
                ensemble.train_all()?;
                let summary = ensemble.cv_report()?;
                println!("cross-validation f2: {:.6}", summary.avg());
            }
        }
        Command::Predict { output, first_stage } => {
            let writer = JsonDecisionWriter::new(output);
            for result in ensemble.evaluate_test(&writer)? {
                println!("{}: {:.6}", result.name, result.summary.avg());
            }
            if first_stage {
                let (cv, test) = ensemble.first_stage_report(&catalog)?;
                println!("first stage: cv {:.6}, test {:.6}", cv.avg(), test.avg());
            }
        }
        Command::Merge { sources } => {
            let sources: Vec<RecordPaths> = sources
                .iter()
                .map(|dir| RecordPaths::new(dir, shared_stats_dir.as_deref()))
                .collect();
            let merged = ensemble.merge(&sources)?;
            println!("merged {} boosters", merged.len());
            let summary = ensemble.cv_report()?;
            println!("cross-validation f2: {:.6}", summary.avg());
        }
    }
    Ok(())
}
