use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use fragstitch::batch::solve_batch;
use fragstitch::fragment::read_fragments;
use fragstitch::{Config, Pipeline};

/// Replays a recorded fragment collection through the online stitcher and
/// prints one JSON line per stitched path.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON array of fragment records
    fragments: PathBuf,

    /// parameter file, defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// fragments with fewer samples are discarded on load
    #[arg(long, default_value_t = 3)]
    min_samples: usize,

    /// also solve the whole set offline and compare
    #[arg(long)]
    batch: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fragstitch=info")),
        )
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut fragments =
        read_fragments(&cli.fragments, &config.fragment_attr_name, cli.min_samples)?;

    // the live feed delivers fragments as they finish
    fragments.sort_by(|a, b| a.last_timestamp.total_cmp(&b.last_timestamp));

    let batch = if cli.batch {
        Some(solve_batch(&fragments, &config)?)
    } else {
        None
    };

    let (tx, rx) = bounded(config.queue_capacity);
    let pipeline = Pipeline::spawn(config, rx)?;

    let feeder = thread::Builder::new()
        .name("feeder".to_string())
        .spawn(move || {
            for fragment in fragments {
                if tx.send(fragment).is_err() {
                    break;
                }
            }
        })?;

    let mut online_paths = 0;
    for path in pipeline.output().iter() {
        let first = path.fragments.first().map(|f| f.first_timestamp);
        let last = path.fragments.last().map(|f| f.last_timestamp);

        println!(
            "{}",
            json!({
                "direction": path.direction,
                "fragment_ids": path.ids(),
                "first_timestamp": first,
                "last_timestamp": last,
                "post_flag": path.post_flag(),
            })
        );

        online_paths += 1;
    }

    feeder.join().map_err(|_| anyhow!("feeder thread panicked"))?;
    let report = pipeline.join()?;

    info!(
        routed = report.routed,
        east_paths = report.east.emitted_paths,
        west_paths = report.west.emitted_paths,
        rejected = report.east.rejected + report.west.rejected,
        "replay finished"
    );

    if let Some(batch) = batch {
        info!(
            online_paths,
            batch_paths = batch.paths.len(),
            batch_objective = batch.objective,
            "offline comparison"
        );
    }

    Ok(())
}
