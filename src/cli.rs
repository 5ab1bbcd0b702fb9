use crate::{detect_reader, ImageFormat, ProbeOptions, ProbeResult, Prober, ProgressTracker};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "image-probe")]
#[command(about = "Probe image type and dimensions over HTTP without full downloads")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        help = "Per-origin concurrency once range support is confirmed"
    )]
    pub reusable: Option<usize>,

    #[arg(
        long,
        help = "Per-origin concurrency before range support is confirmed"
    )]
    pub non_reusable: Option<usize>,

    #[arg(long, help = "Global cap on concurrent connections")]
    pub max_connections: Option<usize>,

    #[arg(long, help = "Custom User-Agent header")]
    pub user_agent: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe a batch of URLs from a file
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, help = "Write the JSON report here instead of stdout")]
        output: Option<PathBuf>,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,
    },

    /// Probe a single URL or local file
    Single {
        #[arg(help = "http(s) URL or local file path")]
        target: String,
    },
}

impl Cli {
    /// Folds the top-level flags into probe options.
    pub fn probe_options(&self) -> ProbeOptions {
        let mut options = ProbeOptions::default();
        if let Some(reusable) = self.reusable {
            options.concurrent_requests_reusable = reusable;
        }
        if let Some(non_reusable) = self.non_reusable {
            options.concurrent_requests_non_reusable = non_reusable;
        }
        if let Some(max_connections) = self.max_connections {
            options.max_concurrent_connections = max_connections;
        }
        options.user_agent = self.user_agent.clone();
        options
    }
}

#[derive(Serialize)]
struct ReportEntry<'a> {
    url: &'a str,
    format: ImageFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime: Option<&'static str>,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> From<&'a ProbeResult> for ReportEntry<'a> {
    fn from(result: &'a ProbeResult) -> Self {
        Self {
            url: &result.url,
            format: result.info.format,
            mime: result.info.format.mime(),
            width: result.info.width,
            height: result.info.height,
            error: result.error.as_ref().map(|e| e.to_string()),
        }
    }
}

pub struct CliRunner {
    prober: Prober,
}

impl CliRunner {
    pub fn new(options: ProbeOptions) -> Self {
        Self {
            prober: Prober::new(options),
        }
    }

    pub async fn run(&self, command: Commands, cancel: &CancellationToken) -> anyhow::Result<()> {
        match command {
            Commands::Batch {
                input,
                output,
                progress_interval,
            } => {
                self.run_batch(input, output, progress_interval, cancel)
                    .await
            }
            Commands::Single { target } => self.run_single(&target, cancel).await,
        }
    }

    async fn run_batch(
        &self,
        input: PathBuf,
        output: Option<PathBuf>,
        progress_interval: Option<u64>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let urls = read_urls_from_file(&input).await?;
        info!("loaded {} URLs from {}", urls.len(), input.display());

        let progress = Arc::new(ProgressTracker::new(urls.len()));
        if let Some(interval) = progress_interval {
            let tracker = progress.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
                ticker.tick().await;
                while !tracker.is_complete() {
                    ticker.tick().await;
                    let p = tracker.get_progress();
                    println!(
                        "Progress: {}/{} - Success: {}, Errors: {}, Rate: {:.1}/s",
                        p.completed, p.total, p.success, p.errors, p.rate
                    );
                }
            });
        }

        let results = self.prober.probe_tracked(&urls, cancel, Some(progress)).await;

        let entries: Vec<ReportEntry> = results.iter().map(ReportEntry::from).collect();
        let report = serde_json::to_string_pretty(&entries)?;
        match &output {
            Some(path) => {
                fs::write(path, &report)
                    .await
                    .with_context(|| format!("write report to {}", path.display()))?;
                info!("report written to {}", path.display());
            }
            None => println!("{report}"),
        }

        let successes = results.iter().filter(|r| r.is_success()).count();
        info!(
            "batch complete: {} ok, {} failed",
            successes,
            results.len() - successes
        );
        for result in &results {
            if let Some(err) = &result.error {
                warn!("{}: {}", result.url, err);
            }
        }
        Ok(())
    }

    async fn run_single(&self, target: &str, cancel: &CancellationToken) -> anyhow::Result<()> {
        let info = if Path::new(target).exists() {
            let file =
                std::fs::File::open(target).with_context(|| format!("open {target}"))?;
            detect_reader(file).with_context(|| format!("read {target}"))?
        } else {
            let urls = vec![target.to_string()];
            let mut results = self.prober.probe(&urls, cancel).await;
            match results.pop() {
                Some(ProbeResult {
                    error: Some(err), ..
                }) => return Err(err.into()),
                Some(result) => result.info,
                None => bail!("no result produced for {target}"),
            }
        };

        if !info.is_resolved() {
            bail!("could not determine image type for {target}");
        }
        println!(
            "{} {} {} {}",
            info.format,
            info.format.mime().unwrap_or("-"),
            info.width,
            info.height
        );
        Ok(())
    }
}

pub async fn read_urls_from_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}
