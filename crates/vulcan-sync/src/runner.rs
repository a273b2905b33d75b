//! Batch orchestration over the sync engine.
//!
//! Planning resolves the catalog into the exact ordered list of resources a
//! run will touch; running walks that list sequentially and folds the
//! outcomes into a [`SyncReport`]. One failing resource never stops the
//! batch, but a misconfigured batch never starts.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{info, warn};

use vulcan_client::FetcherSet;
use vulcan_core::error::AppError;
use vulcan_core::source::{ResourceDescriptor, SourceFilter};
use vulcan_core::summary::{SyncOutcome, SyncReport};

use crate::engine::SyncEngine;

/// Runs batches of resource syncs in declaration order.
pub struct BatchRunner {
    engine: SyncEngine,
    fetchers: FetcherSet,
}

impl BatchRunner {
    pub fn new(engine: SyncEngine, fetchers: FetcherSet) -> Self {
        Self { engine, fetchers }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Resolves the descriptors a run would process, in order.
    ///
    /// The whole input is validated first: an invalid descriptor or a kind
    /// with no registered fetcher is a configuration error that aborts the
    /// batch before any remote call. After validation the filter is applied
    /// and duplicate destination paths are collapsed, first declaration
    /// wins.
    ///
    /// This is exactly what a dry run reports.
    pub fn plan(
        &self,
        descriptors: &[ResourceDescriptor],
        filter: &SourceFilter,
    ) -> Result<Vec<ResourceDescriptor>, AppError> {
        for descriptor in descriptors {
            descriptor.validate()?;
            if !self.fetchers.supports(descriptor.kind) {
                return Err(AppError::Configuration(format!(
                    "no fetcher registered for source kind '{}' (source '{}')",
                    descriptor.kind, descriptor.name
                )));
            }
        }

        let mut seen_paths: HashSet<PathBuf> = HashSet::new();
        let mut planned = Vec::new();
        for descriptor in descriptors.iter().filter(|d| filter.matches(d)) {
            if !seen_paths.insert(descriptor.local_path.clone()) {
                warn!(
                    "Skipping '{}': local path {} already claimed by an earlier source",
                    descriptor.name,
                    descriptor.local_path.display()
                );
                continue;
            }
            planned.push(descriptor.clone());
        }
        Ok(planned)
    }

    /// Plans and runs one batch, returning the full report.
    ///
    /// Resources are processed sequentially in plan order. Individual
    /// failures are recorded in the report and the batch moves on; only a
    /// planning error makes this return `Err`.
    pub async fn run(
        &self,
        descriptors: &[ResourceDescriptor],
        filter: &SourceFilter,
    ) -> Result<SyncReport, AppError> {
        let planned = self.plan(descriptors, filter)?;
        let total = planned.len();
        info!("Syncing {} source(s)", total);

        let mut outcomes = Vec::with_capacity(total);
        for (index, descriptor) in planned.iter().enumerate() {
            info!(
                "[{}/{}] {} ({}, {})",
                index + 1,
                total,
                descriptor.name,
                descriptor.kind,
                descriptor.category
            );
            let outcome = match self.fetchers.for_kind(descriptor.kind) {
                Some(fetcher) => self.engine.sync(descriptor, fetcher.as_ref()).await,
                // plan() checked this; stay total anyway
                None => SyncOutcome::failure(
                    descriptor.clone(),
                    AppError::Configuration(format!(
                        "no fetcher registered for source kind '{}'",
                        descriptor.kind
                    ))
                    .to_string(),
                ),
            };
            match &outcome.error {
                None => info!(
                    "[{}/{}] {}: {}",
                    index + 1,
                    total,
                    descriptor.name,
                    outcome.status.as_str()
                ),
                Some(error) => warn!(
                    "[{}/{}] {}: failed ({})",
                    index + 1,
                    total,
                    descriptor.name,
                    error
                ),
            }
            outcomes.push(outcome);
        }

        Ok(SyncReport::new(filter.clone(), outcomes))
    }
}
