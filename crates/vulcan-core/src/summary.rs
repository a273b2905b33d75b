//! Sync outcomes and their aggregation into run summaries.
//!
//! This module is pure data shaping: the engine produces [`SyncOutcome`]s,
//! the batch runner folds them into a [`SyncSummary`], and the CLI renders
//! or serializes the result. No I/O happens here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::{ResourceDescriptor, SourceFilter};

/// Terminal status of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// A fresh local copy was materialized
    Fetched,
    /// An existing local copy was updated in place
    Refreshed,
    /// The attempt failed; the outcome's error text carries the diagnosis
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Fetched => "fetched",
            SyncStatus::Refreshed => "refreshed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, SyncStatus::Failed)
    }
}

/// Outcome of reconciling a single resource.
///
/// Created once per sync attempt and never mutated after return.
/// `status == Failed` exactly when `error` is present; the constructors
/// maintain that pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub descriptor: ResourceDescriptor,
    pub status: SyncStatus,
    pub error: Option<String>,
}

impl SyncOutcome {
    /// A fresh local copy was created.
    pub fn fetched(descriptor: ResourceDescriptor) -> Self {
        Self {
            descriptor,
            status: SyncStatus::Fetched,
            error: None,
        }
    }

    /// An existing local copy was brought up to date.
    pub fn refreshed(descriptor: ResourceDescriptor) -> Self {
        Self {
            descriptor,
            status: SyncStatus::Refreshed,
            error: None,
        }
    }

    /// The attempt failed with the given diagnostic text.
    pub fn failure(descriptor: ResourceDescriptor, error: String) -> Self {
        Self {
            descriptor,
            status: SyncStatus::Failed,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Success/failure tally for one summary group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub success: usize,
    pub failed: usize,
}

/// One collected failure, keyed by resource name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    pub resource: String,
    pub error: String,
}

/// Overall disposition of a batch, for exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every outcome succeeded (or the batch was empty)
    Success,
    /// Some outcomes succeeded, some failed
    Partial,
    /// Every outcome failed
    Failure,
}

/// Aggregated view over a batch of outcomes.
///
/// The serialized field names are the report contract consumed by the CLI
/// and by downstream tooling; they are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: usize,
    pub succeeded_by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, GroupCount>,
    pub by_priority: BTreeMap<String, GroupCount>,
    pub errors: Vec<SyncError>,
}

impl SyncSummary {
    /// Creates a new empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a sequence of outcomes into a summary.
    pub fn from_outcomes(outcomes: &[SyncOutcome]) -> Self {
        let mut summary = Self::new();
        for outcome in outcomes {
            summary.record(outcome);
        }
        summary
    }

    /// Records one outcome into every grouping.
    pub fn record(&mut self, outcome: &SyncOutcome) {
        self.total += 1;

        if outcome.is_success() {
            *self
                .succeeded_by_status
                .entry(outcome.status.as_str().to_string())
                .or_default() += 1;
        }

        let by_category = self
            .by_category
            .entry(outcome.descriptor.category.clone())
            .or_default();
        let by_priority = self
            .by_priority
            .entry(outcome.descriptor.priority.as_str().to_string())
            .or_default();
        if outcome.is_success() {
            by_category.success += 1;
            by_priority.success += 1;
        } else {
            by_category.failed += 1;
            by_priority.failed += 1;
        }

        if let Some(error) = &outcome.error {
            self.errors.push(SyncError {
                resource: outcome.descriptor.name.clone(),
                error: error.clone(),
            });
        }
    }

    /// Returns the number of successful outcomes.
    pub fn succeeded(&self) -> usize {
        self.succeeded_by_status.values().sum()
    }

    /// Returns the number of failed outcomes.
    pub fn failed(&self) -> usize {
        self.total - self.succeeded()
    }

    /// Classifies the batch as a whole.
    pub fn status(&self) -> BatchStatus {
        let failed = self.failed();
        if failed == 0 {
            BatchStatus::Success
        } else if failed == self.total {
            BatchStatus::Failure
        } else {
            BatchStatus::Partial
        }
    }
}

/// Everything one batch run writes to its JSON report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Filter the batch ran under.
    pub filter: SourceFilter,
    /// Per-resource outcomes, in processing order.
    pub outcomes: Vec<SyncOutcome>,
    pub summary: SyncSummary,
}

impl SyncReport {
    pub fn new(filter: SourceFilter, outcomes: Vec<SyncOutcome>) -> Self {
        Self {
            generated_at: Utc::now(),
            filter,
            summary: SyncSummary::from_outcomes(&outcomes),
            outcomes,
        }
    }
}
