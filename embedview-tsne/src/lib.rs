//! embedview t-SNE host
//!
//! Loads a dataset, builds an [`embedview_core::Session`] and either runs it to
//! completion (batch) or drives it from JSON commands on stdin (interactive).

pub mod dataset;
pub mod error;
pub mod interactive;
pub mod logging;

pub use dataset::{ConfigOverrides, Dataset};
pub use error::{CliError, Result};
