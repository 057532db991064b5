use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use sitemirror::{Controller, CrawlSummary, DEFAULT_OUTPUT_DIR, load_records};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Mirror a website section into a browsable local copy
#[derive(Debug, Parser)]
#[command(name = "sitemirror", version, about)]
struct Cli {
    /// Root URL; only pages under its directory are mirrored
    url: String,

    /// Output directory
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,

    /// Minimum delay between requests, in seconds
    #[arg(short, long, default_value_t = 1.0)]
    delay: f64,

    /// Store hash-named files in the output root instead of mirroring the URL hierarchy
    #[arg(long)]
    flat: bool,

    /// User agent to rotate through (repeatable)
    #[arg(short = 'A', long = "user-agent")]
    user_agents: Vec<String>,

    /// Number of concurrent fetch workers
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Request timeout, in seconds
    #[arg(long, default_value_t = 30.0)]
    timeout: f64,

    /// Continue from the metadata of a previous run in the output directory
    #[arg(long)]
    resume: bool,
}

/// Structured logging to stderr, filtered by `RUST_LOG`
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sitemirror=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(err) = run(Cli::parse()).await {
        eprintln!("sitemirror error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let timeout = Duration::try_from_secs_f64(cli.timeout)
        .with_context(|| format!("invalid timeout: {}", cli.timeout))?;

    let mut builder = Controller::builder(&cli.url)
        .output_dir(&cli.output)
        .delay_secs(cli.delay)
        .preserve_structure(!cli.flat)
        .concurrency(cli.concurrency)
        .timeout(timeout);

    if !cli.user_agents.is_empty() {
        builder = builder.user_agents(cli.user_agents.clone());
    }

    if cli.resume {
        let records = load_records(&cli.output)
            .await
            .context("failed to read previous run metadata")?;
        tracing::info!(records = records.len(), "Resuming previous run");
        builder = builder.resume(records);
    }

    let controller = builder.build()?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight writes");
            ctrl_c.cancel();
        }
    });

    let mut stats = controller.subscribe_stats();
    let progress = tokio::spawn(async move {
        while stats.changed().await.is_ok() {
            let snapshot = stats.borrow_and_update().clone();
            tracing::debug!(
                queued = snapshot.urls_queued,
                mirrored = snapshot.pages_mirrored,
                failed = snapshot.pages_failed,
                pages_per_sec = format!("{:.2}", snapshot.pages_per_second()),
                "Progress"
            );
        }
    });

    let summary = controller.run(cancel).await?;
    let _ = progress.await;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &CrawlSummary) {
    println!();
    println!("Mirror of {}", summary.scope);
    println!("  Pages mirrored: {}", summary.pages_done);
    println!("  Pages failed:   {}", summary.pages_failed);
    if summary.pages_pending > 0 {
        println!("  Pages pending:  {}", summary.pages_pending);
    }
    println!("  Bytes written:  {}", summary.total_bytes);
    println!("  Elapsed:        {:.2?}", summary.elapsed);

    if summary.cancelled {
        println!("Run interrupted; rerun with --resume to continue.");
    }

    if !summary.failures.is_empty() {
        println!();
        println!("Failed URLs:");
        for failed in &summary.failures {
            println!("  {} {}", failed.failure, failed.url);
        }
    }
}
