mod config;
mod layers;

use crate::config::{Settings, DEFAULT_CONFIG_FILE};
use crate::layers::KeywordLogic;
use crate::layers::discovery::{build_query, ArxivClient, DiscoveryError, ARXIV_API_URL, BROAD_QUERY};
use crate::layers::download::Downloader;
use crate::layers::export;
use crate::layers::filter::{FilterPipeline, ProgressEvent};
use crate::layers::pdf::PdfScanner;
use anyhow::{Context, Result};
use chrono::Local;
use clap::{ArgAction, Args, Parser, Subcommand};
use dotenvy::dotenv;
use std::env;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Batch-search arXiv by conference comment, filter the results locally and
/// export the matches to a spreadsheet
#[derive(Parser)]
#[command(name = "arxiv-sieve", version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to $ARXIV_SIEVE_CONFIG, then ./arxiv_sieve.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a search with the saved settings, overridden by any flags given
    Search(SearchArgs),
    /// Check that arXiv is reachable and not rate limiting us
    Check,
    /// Print the effective settings
    Config,
}

#[derive(Args)]
struct SearchArgs {
    /// Records to examine (at most 30000)
    #[arg(long)]
    max_results: Option<usize>,

    /// Conference the comment field must mention, e.g. "AAAI 2026"; empty for none
    #[arg(long)]
    comment: Option<String>,

    /// Comma separated title keywords
    #[arg(long)]
    title_keywords: Option<String>,

    #[arg(long, value_enum)]
    title_logic: Option<KeywordLogic>,

    /// Comma separated abstract keywords
    #[arg(long)]
    abstract_keywords: Option<String>,

    #[arg(long, value_enum)]
    abstract_logic: Option<KeywordLogic>,

    /// Keep only papers with a GitHub link in metadata or PDF text
    #[arg(long, action = ArgAction::Set)]
    require_open_source: Option<bool>,

    /// Download the PDF of every accepted paper
    #[arg(long, action = ArgAction::Set)]
    download_pdfs: Option<bool>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Do not write these settings back to the settings file
    #[arg(long)]
    no_save: bool,
}

impl SearchArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.max_results { settings.max_results = v; }
        if let Some(v) = self.comment { settings.comment = v; }
        if let Some(v) = self.title_keywords { settings.title_keywords = v; }
        if let Some(v) = self.title_logic { settings.title_logic = v; }
        if let Some(v) = self.abstract_keywords { settings.abstract_keywords = v; }
        if let Some(v) = self.abstract_logic { settings.abstract_logic = v; }
        if let Some(v) = self.require_open_source { settings.require_open_source = v; }
        if let Some(v) = self.download_pdfs { settings.download_pdfs = v; }
        if let Some(v) = self.output_dir { settings.output_dir = v; }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Auto-create .env if it doesn't exist (copy from .env.example)
    if !Path::new(".env").exists() && Path::new(".env.example").exists() {
        println!("Creating .env from .env.example...");
        std::fs::copy(".env.example", ".env")?;
    }
    dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config_path = cli.config
        .or_else(|| env::var("ARXIV_SIEVE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let api_url = env::var("ARXIV_API_URL").unwrap_or_else(|_| ARXIV_API_URL.to_string());

    let mut settings = Settings::load(&config_path);

    match cli.command {
        Commands::Search(args) => {
            let save = !args.no_save;
            args.apply(&mut settings);
            run_search(settings, &config_path, &api_url, save).await
        }
        Commands::Check => check(&api_url).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let directives = log_directives(debug, env::var("RUST_LOG").ok());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG)),
        )
        .with_target(false)
        .init();
}

const DEFAULT_LOG: &str = "arxiv_sieve=info";

/// `--debug` wins over RUST_LOG, which may come from a generated `.env`.
fn log_directives(debug: bool, rust_log: Option<String>) -> String {
    if debug {
        return "arxiv_sieve=debug".to_string();
    }
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG.to_string())
}

async fn run_search(settings: Settings, config_path: &Path, api_url: &str, save: bool) -> Result<()> {
    let criteria = settings.criteria().context("Invalid search settings")?;
    if save {
        if let Err(e) = Settings::from_criteria(&criteria).save(config_path) {
            tracing::warn!("Settings not saved: {:#}", e);
        }
    }

    // 1. Query
    println!("--- Step 1: Query ---");
    let query = build_query(&criteria.comment);
    if criteria.comment.trim().is_empty() {
        tracing::warn!(
            "No comment filter given, using the broad query '{}'; filtering relies entirely on local checks",
            BROAD_QUERY
        );
    }
    println!("Query: {} (examining up to {} records)", query, criteria.max_results);

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Stop requested, finishing the current record...");
            stop.cancel();
        }
    });

    // 2. Search & filter
    println!("\n--- Step 2: Search & Filter ---");
    let client = ArxivClient::new(api_url)?;
    let scanner = PdfScanner::new()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(log_progress(rx));

    let report = FilterPipeline::new(&criteria, &scanner)
        .with_progress(tx)
        .with_cancellation(cancel.clone())
        .run(client.search(&query, criteria.max_results))
        .await;
    let _ = progress.await;

    // 3. Download
    let mut downloaded = 0;
    if criteria.download_pdfs && !report.accepted.is_empty() {
        println!("\n--- Step 3: Download ---");
        let downloader = Downloader::new(&criteria.output_dir)?;
        for screened in &report.accepted {
            if cancel.is_cancelled() {
                tracing::warn!("Skipping remaining downloads after stop request");
                break;
            }
            match downloader.download_paper(&screened.paper).await {
                Ok(path) => {
                    tracing::info!("Downloaded: {}", path.display());
                    downloaded += 1;
                }
                Err(e) => tracing::warn!("PDF download failed, skipping {}: {:#}", screened.paper.id, e),
            }
        }
    }

    // 4. Export
    println!("\n--- Step 4: Export ---");
    let export_path = if report.accepted.is_empty() {
        tracing::warn!("No papers matched the filters, nothing exported.");
        None
    } else {
        let path = export::result_path(&criteria.output_dir, &criteria.comment, report.accepted.len(), Local::now());
        export::write_results(&path, &report.accepted)
            .with_context(|| format!("Could not write results to {}", path.display()))?;
        Some(path)
    };

    println!(
        "\nDone{}: scanned {}, accepted {}, rejected {}.",
        if report.cancelled { " (stopped early)" } else { "" },
        report.scanned,
        report.accepted.len(),
        report.rejected
    );
    if report.source_errors > 0 {
        println!("The arXiv search failed before the result limit was reached; results are partial.");
    }
    if criteria.download_pdfs {
        println!("PDFs downloaded: {} into {}", downloaded, criteria.output_dir.display());
    }
    if let Some(path) = export_path {
        println!("Results exported to: {}", path.display());
    }

    Ok(())
}

async fn log_progress(mut rx: UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Scanned { index, title } => {
                tracing::info!("Scanning result {}: {}", index, title);
            }
            ProgressEvent::Accepted { index, title, open_source } => {
                let tag = if open_source { " [open source]" } else { "" };
                tracing::info!("#{} accepted{}: {}", index, tag, title);
            }
            ProgressEvent::Rejected { index, title, reason } => {
                tracing::info!("#{} rejected ({}): {}", index, reason, title);
            }
            ProgressEvent::ScanFailed { index, id, error } => {
                tracing::warn!("#{} PDF scan failed for {}, treating as no GitHub link: {}", index, id, error);
            }
            ProgressEvent::SourceFailed { error } => {
                tracing::error!("arXiv search failed: {}", error);
            }
        }
    }
}

async fn check(api_url: &str) -> Result<()> {
    let client = ArxivClient::new(api_url)?;
    match client.check().await {
        Ok(Some(paper)) => println!("arXiv is reachable, sample title: {}", paper.title),
        Ok(None) => println!("arXiv answered with no results; possibly rate limited or a network problem"),
        Err(e) => match e.downcast_ref::<DiscoveryError>() {
            Some(status) if status.is_rate_limited() => {
                println!("HTTP error, probably rate limited: {}", status);
            }
            _ => println!("arXiv check failed: {:#}", e),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_overrides_rust_log() {
        assert_eq!(log_directives(true, Some("arxiv_sieve=info".to_string())), "arxiv_sieve=debug");
        assert_eq!(log_directives(true, None), "arxiv_sieve=debug");
    }

    #[test]
    fn test_rust_log_used_without_debug_flag() {
        assert_eq!(log_directives(false, Some("arxiv_sieve=warn".to_string())), "arxiv_sieve=warn");
        assert_eq!(log_directives(false, Some("  ".to_string())), DEFAULT_LOG);
        assert_eq!(log_directives(false, None), DEFAULT_LOG);
    }
}
