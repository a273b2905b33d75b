//! Dataset hub transport: snapshot downloads through the hub's HTTP API.
//!
//! A dataset identity is a hub id such as `Zellic/smart-contract-fiesta`.
//! Fetching lists the snapshot's files through the JSON API, then streams
//! each file under the resource directory verbatim; no dataset format is
//! interpreted.

use std::path::{Component, Path};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use vulcan_core::config::FetchSettings;
use vulcan_core::error::AppError;

use crate::fetcher::ResourceFetcher;
use crate::http::{build_client, check_status, map_transport_error};

const SERVICE: &str = "dataset-hub";

const DEFAULT_API_BASE: &str = "https://huggingface.co";

/// Subset of the hub's dataset metadata this tool consumes.
///
/// # Examples
///
/// ```
/// use vulcan_client::hub::DatasetInfo;
///
/// let json = r#"{
///     "id": "Zellic/smart-contract-fiesta",
///     "siblings": [{"rfilename": "README.md"}, {"rfilename": "data/contracts.jsonl"}]
/// }"#;
/// let info: DatasetInfo = serde_json::from_str(json).unwrap();
/// assert_eq!(info.siblings.len(), 2);
/// assert_eq!(info.siblings[0].rfilename, "README.md");
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct DatasetInfo {
    /// Files belonging to the snapshot, relative to the dataset root
    #[serde(default)]
    pub siblings: Vec<SiblingFile>,
}

/// One file belonging to a dataset snapshot.
#[derive(Deserialize, Debug, Clone)]
pub struct SiblingFile {
    pub rfilename: String,
}

/// Fetcher for dataset snapshots hosted on a dataset hub.
///
/// Refresh has no incremental path either: the hub serves whole files, so
/// a refresh re-lists the snapshot and re-downloads it in place.
pub struct HubFetcher {
    client: Client,
    api_base: Url,
    token: Option<String>,
    timeout_secs: u64,
}

impl HubFetcher {
    /// Creates a hub fetcher.
    ///
    /// `token` is an optional bearer token for gated datasets, typically
    /// taken from the `HUGGINGFACE_TOKEN` environment variable.
    pub fn new(settings: &FetchSettings, token: Option<String>) -> Result<Self, AppError> {
        let api_base = Url::parse(DEFAULT_API_BASE)
            .map_err(|_| AppError::InvalidUrl(DEFAULT_API_BASE.to_string()))?;
        Ok(Self {
            client: build_client(settings)?,
            api_base,
            token,
            timeout_secs: settings.http_timeout_secs,
        })
    }

    fn info_url(&self, id: &str) -> Result<Url, AppError> {
        self.api_base
            .join(&format!("api/datasets/{}", id))
            .map_err(|_| AppError::InvalidUrl(id.to_string()))
    }

    fn file_url(&self, id: &str, rfilename: &str) -> Result<Url, AppError> {
        self.api_base
            .join(&format!("datasets/{}/resolve/main/{}", id, rfilename))
            .map_err(|_| AppError::InvalidUrl(format!("{}/{}", id, rfilename)))
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn dataset_info(&self, id: &str) -> Result<DatasetInfo, AppError> {
        let url = self.info_url(id)?;
        let resp = self
            .request(url)
            .send()
            .await
            .map_err(|e| map_transport_error(&e, self.timeout_secs))?;
        check_status(resp.status())?;
        resp.json::<DatasetInfo>()
            .await
            .map_err(|e| map_transport_error(&e, self.timeout_secs))
    }

    async fn download_file(&self, id: &str, rfilename: &str, dest: &Path) -> Result<(), AppError> {
        if !is_safe_relative(rfilename) {
            return Err(AppError::Configuration(format!(
                "dataset file name '{}' escapes the resource directory",
                rfilename
            )));
        }
        let url = self.file_url(id, rfilename)?;
        let resp = self
            .request(url)
            .send()
            .await
            .map_err(|e| map_transport_error(&e, self.timeout_secs))?;
        check_status(resp.status())?;

        let target = dest.join(rfilename);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_transport_error(&e, self.timeout_secs))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(dataset = id, file = rfilename, "stored dataset file");
        Ok(())
    }

    async fn snapshot(&self, identity: &str, dest: &Path) -> Result<(), AppError> {
        validate_dataset_id(identity)?;
        let info = self.dataset_info(identity).await?;
        if info.siblings.is_empty() {
            warn!(dataset = identity, "dataset lists no files");
        }
        tokio::fs::create_dir_all(dest).await?;
        for sibling in &info.siblings {
            self.download_file(identity, &sibling.rfilename, dest).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceFetcher for HubFetcher {
    fn service(&self) -> &str {
        SERVICE
    }

    async fn fetch(&self, identity: &str, dest: &Path) -> Result<(), AppError> {
        self.snapshot(identity, dest).await
    }

    async fn refresh(&self, identity: &str, dest: &Path) -> Result<(), AppError> {
        self.snapshot(identity, dest).await
    }
}

fn validate_dataset_id(id: &str) -> Result<(), AppError> {
    let well_formed = !id.is_empty()
        && !id.starts_with('/')
        && !id.ends_with('/')
        && id.chars().all(|c| !c.is_whitespace())
        && !id.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if well_formed {
        Ok(())
    } else {
        Err(AppError::Configuration(format!(
            "'{}' is not a valid dataset id (expected e.g. 'owner/name')",
            id
        )))
    }
}

/// True when the hub-reported file name stays inside the resource
/// directory once joined onto it.
fn is_safe_relative(rfilename: &str) -> bool {
    let path = Path::new(rfilename);
    !rfilename.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
