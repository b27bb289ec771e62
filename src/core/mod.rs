//! Core business logic module
//!
//! This module contains the domain models, the yt-dlp integration and the
//! batch pipeline built on top of it.

pub mod config;
pub mod dependencies;
pub mod downloader;
pub mod extractor;
pub mod format_resolver;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod progress_tracker;
pub mod runtime;
pub mod temp_manager;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod orchestrator_integration_tests;


// Re-export commonly used types
pub use config::AppConfig;
pub use orchestrator::BatchOrchestrator;
pub use runtime::{BatchHandle, BatchService};
