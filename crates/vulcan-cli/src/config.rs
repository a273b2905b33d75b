use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use vulcan_core::source::{Priority, SourceFilter, SourceKind};

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "vulcan")]
#[command(
    author,
    version,
    about = "Collector for smart-contract security sources"
)]
#[command(after_help = "Examples:
  vulcan sync
  vulcan sync --category vulnerabilities --priority high
  vulcan sync --kind repository --dry-run
  vulcan sync --report /tmp/report.json
  vulcan sources --kind page")]
pub struct Config {
    /// Path to the configuration file (default: platform config directory)
    #[arg(long, global = true, value_name = "PATH", env = "VULCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synchronize the configured sources into the local output tree
    #[command(after_help = "Examples:
  vulcan sync                                  # Sync every configured source
  vulcan sync --category vulnerabilities       # Sync one category
  vulcan sync --priority high --dry-run        # Show what a run would touch
  vulcan sync --sources ./my-sources.toml      # Use a custom source catalog")]
    Sync {
        /// Only sync sources in this category
        #[arg(long, value_name = "NAME")]
        category: Option<String>,

        /// Only sync sources with this priority
        #[arg(long, value_enum, value_name = "LEVEL")]
        priority: Option<PriorityArg>,

        /// Only sync sources of this kind
        #[arg(long, value_enum, value_name = "KIND")]
        kind: Option<KindArg>,

        /// List what would be synced without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Custom path to a sources TOML file
        #[arg(long, value_name = "PATH")]
        sources: Option<PathBuf>,

        /// Where to write the JSON run report (default: reports directory)
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },
    /// List the configured sources
    Sources {
        /// Only list sources in this category
        #[arg(long, value_name = "NAME")]
        category: Option<String>,

        /// Only list sources with this priority
        #[arg(long, value_enum, value_name = "LEVEL")]
        priority: Option<PriorityArg>,

        /// Only list sources of this kind
        #[arg(long, value_enum, value_name = "KIND")]
        kind: Option<KindArg>,

        /// Custom path to a sources TOML file
        #[arg(long, value_name = "PATH")]
        sources: Option<PathBuf>,
    },
}

/// Priority filter accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::High => Priority::High,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::Low => Priority::Low,
        }
    }
}

/// Source kind filter accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Repository,
    Page,
    Dataset,
}

impl From<KindArg> for SourceKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Repository => SourceKind::Repository,
            KindArg::Page => SourceKind::Page,
            KindArg::Dataset => SourceKind::Dataset,
        }
    }
}

/// Builds the descriptor filter from the command line selectors.
pub fn build_filter(
    category: Option<String>,
    priority: Option<PriorityArg>,
    kind: Option<KindArg>,
) -> SourceFilter {
    SourceFilter {
        category,
        priority: priority.map(Priority::from),
        kind: kind.map(SourceKind::from),
    }
}
