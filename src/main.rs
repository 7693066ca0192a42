//! `historicam` command-line tool.
//!
//! Runs one-off identifications and offline accuracy evaluations with the same
//! configuration the HTTP service uses.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use historicam::evaluate::{EvaluationMode, evaluate, parse_holdout_ids};
use historicam::{EmbeddingIndex, HistoricamConfig, build_service};

#[derive(Parser)]
#[command(name = "historicam")]
#[command(about = "Identify campus buildings from photos")]
struct Cli {
    /// YAML configuration file. Environment variables override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the building in a single photo
    Identify {
        /// Path to the image file
        #[arg(short, long)]
        image: PathBuf,
    },

    /// Measure accuracy against the labelled reference set
    Evaluate {
        /// File of record ids to hold out as queries. Defaults to leave-one-out.
        #[arg(long)]
        holdout: Option<PathBuf>,

        /// Override the configured top-k
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = HistoricamConfig::load(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command {
        Commands::Identify { image } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("failed to read {}", image.display()))?;
            let assembled = build_service(&config).await?;
            let result = assembled.service.identify(&bytes).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Evaluate {
            holdout,
            top_k,
            json,
        } => {
            let path = config
                .index
                .embeddings_path
                .as_deref()
                .context("evaluation needs EMBEDDINGS_PATH")?;
            let store = index::blob_store_for(path, config.gcp.access_token.clone())?;
            let reference =
                EmbeddingIndex::load(store.as_ref(), path, Some(config.index.dimension)).await?;

            let mode = match holdout {
                Some(file) => {
                    let text = tokio::fs::read_to_string(&file)
                        .await
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    EvaluationMode::Holdout(parse_holdout_ids(&text))
                }
                None => EvaluationMode::LeaveOneOut,
            };
            let top_k = top_k.unwrap_or(config.ranker.top_k);
            info!(records = reference.size(), top_k, "starting evaluation");
            let report = evaluate(&reference, &mode, top_k, config.classifier)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Total queries: {}", report.total);
                println!("Top-k: {}", report.top_k);
                println!("Confidence threshold: {}", report.confidence_threshold);
                println!(
                    "Accuracy (confident predictions only): {:.1}%",
                    report.accuracy_confident * 100.0
                );
                println!("Accuracy (all predictions): {:.1}%", report.accuracy_any * 100.0);
                println!("\nPrediction status:");
                for (status, count) in &report.status_counts {
                    let share = *count as f64 / report.total.max(1) as f64 * 100.0;
                    println!("  {status}: {count} ({share:.1}%)");
                }
                let worst = report.buildings_with_errors();
                if !worst.is_empty() {
                    println!("\nBuildings with errors:");
                    for (building, acc) in worst {
                        println!(
                            "  {building}: {:.1}% ({}/{})",
                            acc.accuracy * 100.0,
                            acc.correct,
                            acc.total
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
