//! Vulcan CLI - Command-line interface for the Vulcan source collector
//!
//! This crate provides the CLI application that ties together all Vulcan components.

pub mod config;

pub use config::{build_filter, Command, Config, KindArg, PriorityArg};
