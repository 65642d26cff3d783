//! Churn prediction command line
//!
//! - `train`: walk-forward validation and final model training
//! - `score`: daily batch scoring of active members
//! - `drift`: feature drift, concept drift and hit-rate checks

use anyhow::Result;
use chrono::NaiveDate;
use churn_cli::config::AppConfig;
use churn_sdk::{BatchScorerBuilder, DriftMonitor, PgStores, Trainer};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "churn", version, about = "Gym-member churn prediction pipelines")]
struct Cli {
    /// PostgreSQL connection string (overrides configuration)
    #[arg(long, global = true)]
    db_url: Option<String>,

    /// .env file with database credentials
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Model configuration YAML (overrides configuration)
    #[arg(long, global = true)]
    model_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains and saves a new model version.
    Train {
        /// Directory receiving the model version
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Skip walk-forward validation
        #[arg(long)]
        skip_cv: bool,
    },
    /// Scores active members and publishes the day's predictions.
    Score {
        /// Saved model version (newest under output_dir if omitted)
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Run date, YYYY-MM-DD (default: today)
        #[arg(long)]
        score_date: Option<NaiveDate>,
        /// Do not refresh warehouse views first
        #[arg(long)]
        no_refresh: bool,
    },
    /// Runs the drift checks and prints the report as JSON.
    Drift {
        /// Run as of this date (default: today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let mut app = AppConfig::load(cli.env_file.as_deref())?;
    if let Some(url) = cli.db_url {
        app.database_url = Some(url);
    }
    if let Some(path) = cli.model_config {
        app.model_config = Some(path);
    }

    match cli.command {
        Commands::Train {
            output_dir,
            skip_cv,
        } => {
            if let Some(dir) = output_dir {
                app.output_dir = dir;
            }
            let stores = connect(&app).await?;
            let config = app.pipeline()?.skip_cv(skip_cv);
            let outcome = Trainer::new(config).run(&stores.samples).await?;

            let report = &outcome.model.report;
            info!(
                "Training complete: {} (PR-AUC={:.4}, ROC-AUC={:.4}, Brier={:.4})",
                report.version,
                report.test_metrics.pr_auc,
                report.test_metrics.roc_auc,
                report.test_metrics.brier_score
            );
            info!("Artifacts: {}", outcome.model.model_dir.display());
        }
        Commands::Score {
            model_dir,
            score_date,
            no_refresh,
        } => {
            if let Some(dir) = model_dir {
                app.model_dir = Some(dir);
            }
            if no_refresh {
                app.refresh_views = false;
            }
            let stores = connect(&app).await?;

            let mut builder = BatchScorerBuilder::new().with_config(app.pipeline()?);
            if let Some(date) = score_date {
                builder = builder.with_score_date(date);
            }
            let scorer = builder.build()?;
            let summary = scorer.run(&stores.samples, &stores.predictions).await?;
            info!("Summary: {}", serde_json::to_string(&summary)?);
        }
        Commands::Drift { today } => {
            let stores = connect(&app).await?;
            let mut monitor = DriftMonitor::new(app.pipeline()?);
            if let Some(date) = today {
                monitor = monitor.with_today(date);
            }
            let report = monitor
                .run_full_check(&stores.samples, &stores.predictions)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn connect(app: &AppConfig) -> Result<PgStores> {
    let stores = PgStores::connect(app.database_url()?, app.max_connections).await?;
    Ok(stores)
}

/// Initialize tracing subscriber
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "churn=info,churn_cli=info,churn_sdk=info,churn_runtime=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}
