use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use parcelwise_core::{DisplayRow, MapPoint, OwnerStrategy, ResolverConfig};
use parcelwise_pipeline::{Pipeline, Resolution};
use parcelwise_service::ArcGisConnector;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "parcelwise", version, about = "Resolve parcels and owners at a map point")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the parcels and owners at a point and print the selection update as JSON.
    Resolve {
        /// Resolver config (JSON).
        #[arg(long, env = "PARCELWISE_CONFIG")]
        config: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        x: f64,
        #[arg(long, allow_hyphen_values = true)]
        y: f64,
        /// Spatial reference of the point.
        #[arg(long)]
        wkid: Option<u32>,
        /// Current selection (JSON array of rows), for toggle and dedup.
        #[arg(long)]
        selection: Option<PathBuf>,
    },
    /// Validate a config and report the owner strategy it selects.
    CheckConfig {
        #[arg(long, env = "PARCELWISE_CONFIG")]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct Output<'a> {
    resolved_at: String,
    #[serde(flatten)]
    resolution: &'a Resolution,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("parcelwise v{}", env!("CARGO_PKG_VERSION"));

    match Cli::parse().command {
        Command::Resolve {
            config,
            x,
            y,
            wkid,
            selection,
        } => {
            let config = load_config(&config)?;
            let previous = match selection {
                Some(path) => load_selection(&path)?,
                None => Vec::new(),
            };
            let point = match wkid {
                Some(wkid) => MapPoint::new(x, y).with_wkid(wkid),
                None => MapPoint::new(x, y),
            };
            resolve(&config, &point, &previous).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(&config)?;
            config.validate().context("invalid config")?;
            let strategy = OwnerStrategy::select(&config);
            println!("{}", serde_json::to_string_pretty(&strategy)?);
            Ok(())
        }
    }
}

async fn resolve(
    config: &ResolverConfig,
    point: &MapPoint,
    previous: &[DisplayRow],
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(ArcGisConnector::new(config.fields.clone()));
    let request = pipeline.begin_request();
    let result = pipeline
        .resolve_selection(point, config, previous, &request)
        .await;
    pipeline.finish_request(request);
    pipeline.clear_cache();

    let resolution = match result {
        Ok(resolution) => resolution,
        Err(err) => match err.user_message() {
            Some(message) => anyhow::bail!(message),
            None => anyhow::bail!("resolution cancelled"),
        },
    };

    if let Resolution::Success(update) = &resolution {
        eprintln!(
            "  {} row(s) added, {} parcel(s) removed, {} degraded",
            update.rows.len(),
            update.to_remove.len(),
            update.failed_parcels.len()
        );
    }
    let output = Output {
        resolved_at: chrono::Utc::now().to_rfc3339(),
        resolution: &resolution,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<ResolverConfig> {
    ResolverConfig::load(path).with_context(|| format!("reading config {}", path.display()))
}

fn load_selection(path: &Path) -> anyhow::Result<Vec<DisplayRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading selection {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing selection {}", path.display()))
}
