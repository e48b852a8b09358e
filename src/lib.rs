//! Composite vulnerability index: themes of ranked percentages combined into
//! subset scores, driven by a JSON or YAML configuration.

pub mod config;
pub mod error;
pub mod export;
pub mod index;
pub mod orchestrate;
pub mod table;
pub mod validate;

pub use config::SchemaConfig;
pub use error::ConfigError;
pub use index::{compute_indices, IndexColumns};
pub use orchestrate::{BatchSummary, ConfigReport, Orchestrator, Workspace};
pub use table::{OutputFormat, Table};
