//! Vulcan Client - Fetcher adapters for external data sources
//!
//! This crate provides the transports the sync engine drives:
//!
//! - [`git`] - git-hosted repositories (shallow clone / fast-forward pull)
//! - [`page`] - raw captures of web pages
//! - [`hub`] - dataset snapshots from a dataset hub
//!
//! # Overview
//!
//! Every transport implements [`ResourceFetcher`]: it names the rate-limit
//! service its calls are charged against, knows how to materialize and
//! refresh a local copy, and classifies its own tool's refresh failures.

pub mod fetcher;
pub mod git;
mod http;
pub mod hub;
pub mod page;

// Re-export main adapter types
pub use fetcher::{FetcherSet, ResourceFetcher};
pub use git::GitFetcher;
pub use hub::HubFetcher;
pub use page::PageFetcher;
