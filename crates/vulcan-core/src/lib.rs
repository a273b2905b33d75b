//! Vulcan Core - Domain types, error handling, and configuration.

pub mod config;
pub mod error;
pub mod source;
pub mod summary;

pub use config::{default_config_path, FetchSettings, RateLimitEntry, RetrySettings, Settings};
pub use error::AppError;
pub use source::{
    sanitize_filename, Priority, ResourceDescriptor, SourceCatalog, SourceEntry, SourceFilter,
    SourceKind,
};
pub use summary::{
    BatchStatus, GroupCount, SyncError, SyncOutcome, SyncReport, SyncStatus, SyncSummary,
};
