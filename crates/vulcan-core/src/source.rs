//! Source declarations: what to collect, from where, into which directory.
//!
//! A source catalog is an ordered list of declared sources (TOML file or the
//! compiled-in defaults). Loading turns each entry into a
//! [`ResourceDescriptor`], the unit the sync engine reconciles.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Settings;
use crate::error::AppError;

/// Relative importance of a source.
///
/// Informational only: used for filtering and summary grouping, never for
/// scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of remote thing a source points at, which in turn selects the
/// fetcher adapter and the output subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Repository,
    Page,
    Dataset,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Repository => "repository",
            SourceKind::Page => "page",
            SourceKind::Dataset => "dataset",
        }
    }

    /// Output subdirectory for resources of this kind.
    pub fn subdir(&self) -> &'static str {
        match self {
            SourceKind::Repository => "repos",
            SourceKind::Page => "pages",
            SourceKind::Dataset => "datasets",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of synchronization: a named remote resource mapped to a local
/// directory.
///
/// Immutable per sync attempt. `identity` is opaque to the engine; the
/// fetcher adapter for `kind` interprets it (repository URL, page URL,
/// dataset id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub identity: String,
    pub local_path: PathBuf,
    pub kind: SourceKind,
    pub category: String,
    pub priority: Priority,
}

impl ResourceDescriptor {
    /// Rejects descriptors that must never reach the limiter/retry path.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Configuration(
                "source declaration is missing a name".to_string(),
            ));
        }
        if self.identity.trim().is_empty() {
            return Err(AppError::Configuration(format!(
                "source '{}' is missing an identity",
                self.name
            )));
        }
        if self.local_path.as_os_str().is_empty() {
            return Err(AppError::Configuration(format!(
                "source '{}' resolves to an empty local path",
                self.name
            )));
        }
        Ok(())
    }
}

/// Filter applied to a descriptor collection before syncing or listing.
///
/// Empty filter matches everything. Category matching is exact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFilter {
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub kind: Option<SourceKind>,
}

impl SourceFilter {
    pub fn matches(&self, descriptor: &ResourceDescriptor) -> bool {
        if let Some(category) = &self.category {
            if &descriptor.category != category {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if descriptor.priority != priority {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if descriptor.kind != kind {
                return false;
            }
        }
        true
    }
}

/// One declared source in the catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub kind: SourceKind,
    pub identity: String,
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: Priority,
}

fn default_priority() -> Priority {
    Priority::Medium
}

/// Ordered collection of declared sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCatalog {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl SourceCatalog {
    /// Loads the catalog, in order of preference: explicit path, the path
    /// named in settings, the compiled-in defaults.
    ///
    /// A path given explicitly or via settings must exist and parse.
    pub fn load(path: Option<&Path>, settings: &Settings) -> Result<Self, AppError> {
        let chosen = path.or(settings.sources_file.as_deref());
        match chosen {
            Some(file) => {
                let raw = std::fs::read_to_string(file)?;
                let catalog: SourceCatalog = toml::from_str(&raw).map_err(|e| {
                    AppError::Configuration(format!("cannot parse {}: {}", file.display(), e))
                })?;
                debug!(path = %file.display(), count = catalog.sources.len(), "loaded source catalog");
                Ok(catalog)
            }
            None => {
                debug!("no sources file configured; using built-in catalog");
                Ok(Self::builtin())
            }
        }
    }

    /// The compiled-in default catalog: the curated security sources this
    /// tool was built to collect.
    pub fn builtin() -> Self {
        let entry = |name: &str, kind: SourceKind, identity: &str, category: &str, priority| {
            SourceEntry {
                name: name.to_string(),
                kind,
                identity: identity.to_string(),
                category: category.to_string(),
                priority,
            }
        };
        Self {
            sources: vec![
                entry(
                    "smartbugs-curated",
                    SourceKind::Repository,
                    "https://github.com/smartbugs/smartbugs-curated",
                    "vulnerabilities",
                    Priority::High,
                ),
                entry(
                    "swc-registry",
                    SourceKind::Page,
                    "https://swcregistry.io",
                    "standards",
                    Priority::High,
                ),
                entry(
                    "owasp-sc-top10",
                    SourceKind::Page,
                    "https://owasp.org/www-project-smart-contract-top-10",
                    "standards",
                    Priority::Medium,
                ),
                entry(
                    "consensys-best-practices",
                    SourceKind::Page,
                    "https://consensys.github.io/smart-contract-best-practices",
                    "guidance",
                    Priority::Medium,
                ),
                entry(
                    "smart-contract-fiesta",
                    SourceKind::Dataset,
                    "Zellic/smart-contract-fiesta",
                    "contracts",
                    Priority::High,
                ),
            ],
        }
    }

    /// Resolves every entry into a descriptor, preserving declaration order.
    ///
    /// Local paths follow `<output_root>/<kind dir>/<category>/<name>`, with
    /// the category and name made filesystem-safe.
    pub fn descriptors(&self, settings: &Settings) -> Vec<ResourceDescriptor> {
        self.sources
            .iter()
            .map(|entry| ResourceDescriptor {
                name: entry.name.clone(),
                identity: entry.identity.clone(),
                local_path: settings
                    .output_root
                    .join(entry.kind.subdir())
                    .join(sanitize_filename(&entry.category))
                    .join(sanitize_filename(&entry.name)),
                kind: entry.kind,
                category: entry.category.clone(),
                priority: entry.priority,
            })
            .collect()
    }
}

/// Makes a string safe for use as a file or directory name.
///
/// Replaces characters that are invalid on common filesystems with `_`,
/// trims leading and trailing dots and spaces, and caps the length at 255.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    trimmed.chars().take(255).collect()
}
