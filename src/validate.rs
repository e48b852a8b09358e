// src/validate.rs

use anyhow::{Context, Result};
use std::{collections::BTreeSet, fs};
use tracing::{info, warn};

use crate::config::{Members, SchemaConfig};
use crate::error::ConfigError;
use crate::table::Table;

/// Outcome of checking a configuration against a loaded table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// Referenced columns the table lacks. Any entry makes the configuration unusable.
    pub missing_columns: Vec<String>,
    /// Subsets naming a theme that does not exist. These are skipped.
    pub bad_subsets: BTreeSet<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.missing_columns.is_empty()
    }

    /// Turn a failed validation into the error that aborts this configuration.
    pub fn into_result(self, config: &SchemaConfig) -> Result<BTreeSet<String>, ConfigError> {
        if self.is_valid() {
            Ok(self.bad_subsets)
        } else {
            Err(ConfigError::MissingColumns {
                source_path: config.source_path.clone(),
                columns: self.missing_columns,
            })
        }
    }
}

/// The source table must exist before anything else is attempted.
pub fn check_source(config: &SchemaConfig) -> Result<(), ConfigError> {
    if config.source_path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::SourceNotFound {
            path: config.source_path.clone(),
        })
    }
}

/// Create the output directory when it does not exist yet.
pub fn ensure_output_dir(config: &SchemaConfig) -> Result<()> {
    if !config.output_dir.is_dir() {
        warn!(
            path = %config.output_dir.display(),
            "output directory does not exist; creating it"
        );
        fs::create_dir_all(&config.output_dir)
            .with_context(|| format!("creating output directory {:?}", config.output_dir))?;
    }
    Ok(())
}

/// Subsets whose theme list names an undefined theme.
pub fn bad_subsets(config: &SchemaConfig) -> BTreeSet<String> {
    let mut bad = BTreeSet::new();
    for subset in &config.subsets {
        if let Members::Themes(keys) = &subset.members {
            let unknown: Vec<&String> = keys.iter().filter(|k| config.theme(k).is_none()).collect();
            if !unknown.is_empty() {
                warn!(
                    subset = %subset.key,
                    themes = ?unknown,
                    "subset names nonexistent themes and will be skipped"
                );
                bad.insert(subset.key.clone());
            }
        }
    }
    bad
}

/// Referenced columns that `table` does not have, in reference order.
pub fn missing_columns(config: &SchemaConfig, table: &Table) -> Vec<String> {
    config
        .required_columns()
        .into_iter()
        .filter(|c| !table.has_column(c))
        .collect()
}

/// Check `config` against `table`. Creates the output directory as a side
/// effect; never touches the table.
pub fn validate(config: &SchemaConfig, table: &Table) -> Result<Validation> {
    ensure_output_dir(config)?;

    let bad_subsets = bad_subsets(config);

    for subset in &config.subsets {
        if config.theme(&subset.key).is_some() {
            warn!(
                key = %subset.key,
                "subset shares its key with a theme; its composite columns overwrite the theme's"
            );
        }
    }

    let missing_columns = missing_columns(config, table);
    if missing_columns.is_empty() {
        info!(
            subsets = config.subsets.len() - bad_subsets.len(),
            skipped = bad_subsets.len(),
            "configuration valid"
        );
    } else {
        warn!(
            path = %config.source_path.display(),
            columns = ?missing_columns,
            "columns do not exist in source table"
        );
    }

    Ok(Validation {
        missing_columns,
        bad_subsets,
    })
}
