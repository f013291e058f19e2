//! Cropflow pipeline CLI.
//!
//! `ingest` accepts a file of observation envelopes, `normalize` runs one
//! bronze-to-silver pass, `variance` compares the current estimate for a key
//! against realized data. All subcommands share one SQLite database.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cropflow_backend::estimates::EstimateStore;
use cropflow_backend::ingest::IngestGateway;
use cropflow_backend::models::{Config, IngestEnvelope, VarianceReport};
use cropflow_backend::normalize::{extract::SourceRegistry, Normalizer, SilverStore};
use cropflow_backend::store::Db;

#[derive(Parser)]
#[command(name = "cropflow", about = "Agricultural observation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a JSON file holding one envelope or an array of envelopes.
    Ingest {
        /// Path to the envelope file.
        file: PathBuf,
    },
    /// Run one normalization pass over unprocessed raw records.
    Normalize {
        /// Override the configured batch limit.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Load a new estimate version for a (commodity, period) key.
    LoadEstimate {
        commodity: String,
        period: String,
        /// Line items as a JSON object of name -> value.
        line_items: String,
        #[arg(long)]
        as_of: NaiveDate,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print the variance report for a (commodity, period) key.
    Variance { commodity: String, period: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    let cli = Cli::parse();

    let db = Db::open(&config.database_path)
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    let registry = Arc::new(SourceRegistry::with_defaults());
    let gateway = Arc::new(IngestGateway::new(db.clone(), registry.clone()));
    let silver = SilverStore::new(db.clone());

    match cli.command {
        Command::Ingest { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let envelopes = parse_envelopes(&text)?;

            let report = gateway.ingest_batch(&envelopes).await;
            info!(
                accepted = report.accepted,
                rejected = report.rejected,
                "ingest complete"
            );
            for result in &report.results {
                if let Err(e) = result {
                    eprintln!("rejected: {}", e);
                }
            }
        }
        Command::Normalize { limit } => {
            let normalizer = Normalizer::new(gateway, silver, registry);
            let report = normalizer
                .normalize(limit.unwrap_or(config.normalize_batch_limit))
                .await?;
            info!(
                processed = report.processed_count,
                errors = report.error_count,
                "normalization pass complete"
            );
        }
        Command::LoadEstimate {
            commodity,
            period,
            line_items,
            as_of,
            notes,
        } => {
            let items: BTreeMap<String, f64> =
                serde_json::from_str(&line_items).context("line items must be a JSON object")?;
            let estimates = EstimateStore::new(db);
            let id = estimates.load_estimate(&commodity, &period, &items, as_of, notes.as_deref())?;
            info!(%commodity, %period, id, "estimate loaded");
        }
        Command::Variance { commodity, period } => {
            let estimates = EstimateStore::new(db);
            match estimates.variance_report(&silver, &commodity, &period)? {
                VarianceReport::Pending { commodity, period } => {
                    println!("{} {}: pending (no estimate or no realized data)", commodity, period);
                }
                VarianceReport::Ready {
                    commodity,
                    period,
                    as_of_date,
                    rows,
                } => {
                    println!("{} {} (estimate as of {})", commodity, period, as_of_date);
                    for row in rows {
                        println!(
                            "  {}: estimate {:.2} realized {:.2} diff {:+.2} ({:+.2}%)",
                            row.line_item,
                            row.estimate_value,
                            row.realized_value,
                            row.absolute_diff,
                            row.pct_diff,
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn parse_envelopes(text: &str) -> Result<Vec<IngestEnvelope>> {
    // Accept either a single envelope object or an array of them.
    if let Ok(batch) = serde_json::from_str::<Vec<IngestEnvelope>>(text) {
        return Ok(batch);
    }
    let single: IngestEnvelope =
        serde_json::from_str(text).context("file is neither an envelope nor an array of them")?;
    Ok(vec![single])
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cropflow_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
