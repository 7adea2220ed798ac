//! transcriptor - Dataverse transcript downloader
//!
//! Downloads conversation transcripts from a Dynamics 365 Customer Service
//! workstream: authenticate, query the Dataverse Web API in three batched
//! waves, and write one JSON file per conversation that has a transcript.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use transcriptor_core::auth::{Authenticator, TokenCache};
use transcriptor_core::dataverse::DataverseClient;
use transcriptor_core::pipeline::TranscriptPipeline;
use transcriptor_core::{Config, DownloadSummary};

#[derive(Parser)]
#[command(name = "transcriptor")]
#[command(about = "Download conversation transcripts from a Dynamics 365 workstream")]
#[command(version)]
struct Args {
    /// Path to config file (default: ~/.config/transcriptor/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured workstream id
    #[arg(long)]
    workstream_id: Option<String>,

    /// Override the configured conversation cap (range: 1-1000)
    #[arg(long)]
    max_conversations: Option<u32>,

    /// Override the configured look-back window in days
    #[arg(long)]
    days: Option<i64>,

    /// Override the configured output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Use this access token instead of the cache or interactive login
    #[arg(long)]
    access_token: Option<String>,

    /// Mirror logs to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Download transcripts (the default when no subcommand is given)
    Download,

    /// Remove the cached authentication token
    ClearCache,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;

    let _log_guard = transcriptor_core::logging::init(&config.logging, args.verbose)
        .context("failed to initialize logging")?;

    match args.command {
        Some(Command::ClearCache) => {
            TokenCache::new(config.token_cache_path.clone()).clear();
            println!(
                "Token cache cleared ({}).",
                config.token_cache_path.display()
            );
            Ok(())
        }
        Some(Command::Download) | None => {
            config.validate().context("invalid configuration")?;
            cmd_download(&config)
        }
    }
}

/// Load the config file and fold CLI overrides into it.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(workstream_id) = &args.workstream_id {
        config.workstream_id = workstream_id.clone();
    }
    if let Some(max_conversations) = args.max_conversations {
        config.max_conversations = Some(max_conversations);
    }
    if let Some(days) = args.days {
        config.days_to_fetch = days;
    }
    if let Some(output_dir) = &args.output_dir {
        config.output_dir = output_dir.clone();
    }
    if let Some(access_token) = &args.access_token {
        config.access_token = Some(access_token.clone());
    }

    Ok(config)
}

fn cmd_download(config: &Config) -> Result<()> {
    println!("Dynamics 365 Transcript Downloader");
    println!("==================================");
    println!();
    println!("Organization URL:  {}", config.organization_url_trimmed());
    println!("Workstream ID:     {}", config.workstream_id);
    println!("Days to fetch:     {}", config.days_to_fetch);
    println!(
        "Max conversations: {}",
        config.max_conversations.unwrap_or_default()
    );
    println!();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create async runtime")?;

    println!("Step 1: Authentication");
    let authenticator = Authenticator::new(config);
    let token = runtime
        .block_on(authenticator.access_token())
        .context("authentication failed")?;
    tracing::info!("Access token resolved");

    println!("Step 2: Connecting to Dataverse");
    let client = DataverseClient::new(
        &token,
        config.organization_url_trimmed(),
        &config.api_version,
    )
    .context("failed to create Dataverse client")?;

    println!("Step 3: Downloading transcripts");
    let pipeline =
        TranscriptPipeline::new(&client, config).context("failed to initialize pipeline")?;
    let output_dir = pipeline.output_dir().to_path_buf();
    let summary = runtime
        .block_on(pipeline.run())
        .context("transcript download failed")?;

    print_summary(&summary);
    if !summary.files.is_empty() {
        println!("\nFiles saved to: {}", output_dir.display());
    }

    Ok(())
}

fn print_summary(summary: &DownloadSummary) {
    println!();
    println!("Summary");
    println!("=======");
    println!("Total conversations found: {}", summary.total_conversations);
    println!("Transcripts found:         {}", summary.transcripts_found);
    println!("Transcripts downloaded:    {}", summary.transcripts_downloaded);
    println!("Errors:                    {}", summary.errors);
}
