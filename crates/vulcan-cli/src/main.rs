use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vulcan_collector::{build_filter, Command, Config};
use vulcan_client::{FetcherSet, GitFetcher, HubFetcher, PageFetcher};
use vulcan_core::config::Settings;
use vulcan_core::error::AppError;
use vulcan_core::source::{ResourceDescriptor, SourceCatalog, SourceFilter, SourceKind};
use vulcan_core::summary::{BatchStatus, SyncReport, SyncSummary};
use vulcan_sync::{BatchRunner, RateLimiter, RetryPolicy, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let config = Config::parse();

    // Setup logging (stderr to keep stdout clean for listings and reports)
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let exit_code = match run(config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {}", err.user_message());
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn run(config: Config) -> Result<i32, AppError> {
    let settings = Settings::load(config.config.as_deref())?;

    match config.command {
        Command::Sync {
            category,
            priority,
            kind,
            dry_run,
            sources,
            report,
        } => {
            let filter = build_filter(category, priority, kind);
            sync(&settings, &filter, dry_run, sources.as_deref(), report).await
        }
        Command::Sources {
            category,
            priority,
            kind,
            sources,
        } => {
            let filter = build_filter(category, priority, kind);
            list_sources(&settings, &filter, sources.as_deref())
        }
    }
}

/// Synchronize the configured sources and report the result
async fn sync(
    settings: &Settings,
    filter: &SourceFilter,
    dry_run: bool,
    sources_path: Option<&Path>,
    report_path: Option<PathBuf>,
) -> Result<i32, AppError> {
    let catalog = SourceCatalog::load(sources_path, settings)?;
    let descriptors = catalog.descriptors(settings);

    let limiter = Arc::new(RateLimiter::from_settings(settings));
    let retry = RetryPolicy::from_settings(&settings.retry);
    let engine = SyncEngine::new(limiter, retry);
    let runner = BatchRunner::new(engine, build_fetchers(settings)?);

    if dry_run {
        let planned = runner.plan(&descriptors, filter)?;
        print_plan(&planned);
        return Ok(0);
    }

    let report = runner.run(&descriptors, filter).await?;
    print_summary(&report.summary);

    let written = write_report(settings, &report, report_path.as_deref())?;
    info!("Report written to {}", written.display());

    Ok(exit_code(report.summary.status()))
}

/// List the configured sources after filtering
fn list_sources(
    settings: &Settings,
    filter: &SourceFilter,
    sources_path: Option<&Path>,
) -> Result<i32, AppError> {
    let catalog = SourceCatalog::load(sources_path, settings)?;
    let descriptors = catalog.descriptors(settings);
    let matching: Vec<_> = descriptors.iter().filter(|d| filter.matches(d)).collect();

    println!("\n{} configured source(s):\n", matching.len());
    for descriptor in &matching {
        println!(
            "  [{}] {} ({}, {})",
            descriptor.priority.as_str().to_uppercase(),
            descriptor.name,
            descriptor.kind,
            descriptor.category
        );
        println!(
            "      {} -> {}",
            descriptor.identity,
            descriptor.local_path.display()
        );
    }
    println!();

    Ok(0)
}

/// Wire each source kind to its transport
fn build_fetchers(settings: &Settings) -> Result<FetcherSet, AppError> {
    let token = hub_token();
    if token.is_none() {
        info!("HUGGINGFACE_TOKEN not set; dataset downloads run unauthenticated");
    }
    Ok(FetcherSet::new()
        .with(
            SourceKind::Repository,
            Arc::new(GitFetcher::new(&settings.fetch)),
        )
        .with(SourceKind::Page, Arc::new(PageFetcher::new(&settings.fetch)?))
        .with(
            SourceKind::Dataset,
            Arc::new(HubFetcher::new(&settings.fetch, token)?),
        ))
}

fn hub_token() -> Option<String> {
    std::env::var("HUGGINGFACE_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
}

fn print_plan(planned: &[ResourceDescriptor]) {
    if planned.is_empty() {
        println!("Nothing to sync for the given filters.");
        return;
    }
    println!("Would sync {} source(s):\n", planned.len());
    for descriptor in planned {
        println!(
            "  [{}] {} ({}) -> {}",
            descriptor.priority.as_str().to_uppercase(),
            descriptor.name,
            descriptor.category,
            descriptor.local_path.display()
        );
    }
}

fn print_summary(summary: &SyncSummary) {
    let rule = "=".repeat(60);
    println!("\n{}", rule);
    println!("Sync Summary");
    println!("{}", rule);
    println!("  Total sources:   {}", summary.total);
    println!("  Succeeded:       {}", summary.succeeded());
    println!("  Failed:          {}", summary.failed());

    if !summary.succeeded_by_status.is_empty() {
        println!("\n  By result:");
        for (status, count) in &summary.succeeded_by_status {
            println!("    {:<12} {}", status, count);
        }
    }

    if !summary.by_category.is_empty() {
        println!("\n  By category:");
        for (category, counts) in &summary.by_category {
            println!(
                "    {:<24} {} ok, {} failed",
                category, counts.success, counts.failed
            );
        }
    }

    if !summary.by_priority.is_empty() {
        println!("\n  By priority:");
        for (priority, counts) in &summary.by_priority {
            println!(
                "    {:<24} {} ok, {} failed",
                priority, counts.success, counts.failed
            );
        }
    }

    if !summary.errors.is_empty() {
        println!("\n  Errors:");
        for error in &summary.errors {
            println!("    ✗ {}: {}", error.resource, error.error);
        }
    }
    println!("{}\n", rule);
}

/// Write the JSON run report, to the explicit path or the reports directory
fn write_report(
    settings: &Settings,
    report: &SyncReport,
    explicit: Option<&Path>,
) -> Result<PathBuf, AppError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => settings.reports_dir().join(format!(
            "sync-report-{}.json",
            report.generated_at.format("%Y%m%dT%H%M%SZ")
        )),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
    Ok(path)
}

fn exit_code(status: BatchStatus) -> i32 {
    match status {
        BatchStatus::Success => 0,
        BatchStatus::Partial => 2,
        BatchStatus::Failure => 1,
    }
}
