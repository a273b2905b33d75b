//! Page transport: raw captures of security documentation pages.
//!
//! A "fetch" stores the response body verbatim under the resource
//! directory; nothing is parsed or extracted here.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use vulcan_core::config::FetchSettings;
use vulcan_core::error::AppError;

use crate::fetcher::ResourceFetcher;
use crate::http::{build_client, check_status, map_transport_error};

const SERVICE: &str = "page-fetch";

const ACCEPT_HEADER: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Fetcher for single web pages.
///
/// Pages have no incremental update path, so refresh re-downloads the
/// capture in place.
pub struct PageFetcher {
    client: Client,
    timeout_secs: u64,
}

impl PageFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(settings)?,
            timeout_secs: settings.http_timeout_secs,
        })
    }

    async fn download(&self, identity: &str, dest: &Path) -> Result<(), AppError> {
        let url =
            Url::parse(identity).map_err(|_| AppError::InvalidUrl(identity.to_string()))?;

        let resp = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| map_transport_error(&e, self.timeout_secs))?;
        check_status(resp.status())?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| map_transport_error(&e, self.timeout_secs))?;

        tokio::fs::create_dir_all(dest).await?;
        let file = dest.join(capture_filename(identity));
        tokio::fs::write(&file, &body).await?;
        debug!(url = identity, file = %file.display(), bytes = body.len(), "stored page capture");
        Ok(())
    }
}

#[async_trait]
impl ResourceFetcher for PageFetcher {
    fn service(&self) -> &str {
        SERVICE
    }

    async fn fetch(&self, identity: &str, dest: &Path) -> Result<(), AppError> {
        self.download(identity, dest).await
    }

    async fn refresh(&self, identity: &str, dest: &Path) -> Result<(), AppError> {
        self.download(identity, dest).await
    }
}

/// Stable on-disk name for one captured URL.
fn capture_filename(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let prefix: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}.html", prefix)
}
