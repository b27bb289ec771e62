//! Utility modules and helper functions
//!
//! This module contains shared utilities and helper functions used across the crate.

pub mod file_utils;
pub mod formatting;
pub mod logging;
pub mod validation;

// Re-export commonly used utilities
pub use file_utils::*;
pub use formatting::*;
pub use logging::*;
pub use validation::*;
