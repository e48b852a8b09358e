// src/error.rs

use std::path::PathBuf;

/// Conditions that abort processing of a single configuration file.
///
/// These travel inside `anyhow::Error` and can be recovered with
/// `err.downcast_ref::<ConfigError>()` when a caller needs to tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading configuration {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing configuration {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A ratio percentage has no estimated total at its declaration position.
    #[error(
        "theme `{theme}`: percentage field `{field}` (position {position}) has no matching estimated total"
    )]
    UnpairedPercentage {
        theme: String,
        field: String,
        position: usize,
    },

    /// Two themes declare the same field key, so their derived columns would collide.
    #[error("field `{key}` is declared by both theme `{first}` and theme `{second}`")]
    SharedFieldKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("source table {path:?} does not exist or is not a file")]
    SourceNotFound { path: PathBuf },

    #[error("columns missing from source table {source_path:?}: {columns:?}")]
    MissingColumns {
        source_path: PathBuf,
        columns: Vec<String>,
    },
}
