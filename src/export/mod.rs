// src/export/mod.rs

pub mod join;

pub use join::{CommandJoiner, JoinRequest, SpatialJoiner, Unconfigured};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::config::SchemaConfig;
use crate::index::IndexColumns;
use crate::table::{write_table, OutputFormat, Table};

/// `<output_dir>/<name>_csv_<YYYYmmdd-HHMMSS>`, one per configuration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// Create a fresh directory. If a run of the same name already exists
    /// (two runs within one second) a `_2`, `_3`, ... suffix is added.
    pub fn create(config: &SchemaConfig, now: DateTime<Local>) -> Result<Self> {
        let base = format!("{}_csv_{}", config.name, now.format("%Y%m%d-%H%M%S"));
        let mut attempt = 1;
        loop {
            let name = if attempt == 1 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let path = config.output_dir.join(name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok(RunDirectory { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("creating run directory {:?}", path))
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpatialOutcome {
    Joined(PathBuf),
    /// The join failed; the subset's table export is still on disk.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsetExport {
    pub subset: String,
    pub table_path: PathBuf,
    /// `None` when the subset is not spatial.
    pub spatial: Option<SpatialOutcome>,
}

/// Output columns of a subset: identifiers, then every member theme's
/// columns in theme declaration order, then the subset composite.
pub fn subset_columns(
    config: &SchemaConfig,
    columns: &IndexColumns,
    subset_key: &str,
) -> Result<Vec<String>> {
    let subset = config
        .subset(subset_key)
        .ok_or_else(|| anyhow!("subset `{}` is not defined", subset_key))?;
    let subset_cols = columns
        .subset(subset_key)
        .ok_or_else(|| anyhow!("subset `{}` was not computed", subset_key))?;

    let mut out = config.geoid_fields.clone();
    for theme in config.themes.iter().filter(|t| subset.includes(&t.key)) {
        let theme_cols = columns
            .theme(&theme.key)
            .ok_or_else(|| anyhow!("theme `{}` was not computed", theme.key))?;
        out.extend(theme_cols.export_columns().cloned());
    }
    out.push(subset_cols.composite.clone());

    let mut seen = std::collections::HashSet::new();
    out.retain(|c| seen.insert(c.clone()));
    Ok(out)
}

/// Writes subset slices and the complete table of one configuration into its run directory.
pub struct SubsetExporter<'a> {
    config: &'a SchemaConfig,
    run_dir: &'a RunDirectory,
    joiner: &'a dyn SpatialJoiner,
    scratch: &'a Path,
    format: OutputFormat,
}

impl<'a> SubsetExporter<'a> {
    pub fn new(
        config: &'a SchemaConfig,
        run_dir: &'a RunDirectory,
        joiner: &'a dyn SpatialJoiner,
        scratch: &'a Path,
        format: OutputFormat,
    ) -> Self {
        SubsetExporter {
            config,
            run_dir,
            joiner,
            scratch,
            format,
        }
    }

    fn file_path(&self, suffix: &str) -> PathBuf {
        self.run_dir.path().join(format!(
            "{}_{}.{}",
            self.config.name,
            suffix,
            self.format.extension()
        ))
    }

    /// `<run_dir>/<subset>_<feature stem>/<subset>_<feature file name>`
    pub fn join_output_path(&self, subset_key: &str) -> PathBuf {
        let features = &self.config.join_features_path;
        let feature_name = features
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = format!("{}_{}", subset_key, feature_name);
        let folder = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        self.run_dir.path().join(folder).join(file_name)
    }

    /// Persist the slice of `table` belonging to `subset_key`, then join it
    /// to geometry when the subset is spatial.
    pub fn export(
        &self,
        table: &Table,
        columns: &IndexColumns,
        subset_key: &str,
    ) -> Result<SubsetExport> {
        let names = subset_columns(self.config, columns, subset_key)?;
        let slice = table.select(&names)?;
        let table_path = self.file_path(subset_key);
        write_table(&slice, &table_path, self.format)
            .with_context(|| format!("exporting subset `{}`", subset_key))?;
        info!(subset = %subset_key, path = %table_path.display(), "table stored");

        let spatial = if self.config.is_spatial(subset_key) {
            Some(self.join(subset_key, &table_path))
        } else {
            None
        };

        Ok(SubsetExport {
            subset: subset_key.to_string(),
            table_path,
            spatial,
        })
    }

    fn join(&self, subset_key: &str, table_path: &Path) -> SpatialOutcome {
        let output = self.join_output_path(subset_key);
        let attempt = output
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .with_context(|| format!("creating spatial output directory for {:?}", output))
            .and_then(|()| {
                self.joiner.join(&JoinRequest {
                    features: &self.config.join_features_path,
                    join_field: &self.config.join_field,
                    table: table_path,
                    output: &output,
                    scratch: self.scratch,
                })
            });

        match attempt {
            Ok(path) => {
                info!(subset = %subset_key, path = %path.display(), "spatial features stored");
                SpatialOutcome::Joined(path)
            }
            Err(e) => {
                warn!(subset = %subset_key, error = %format!("{:#}", e), "spatial join failed; table export kept");
                SpatialOutcome::Failed(format!("{:#}", e))
            }
        }
    }

    /// Persist every original and derived column as `<name>_COMPLETE`.
    pub fn export_complete(&self, table: &Table) -> Result<PathBuf> {
        let path = self.file_path("COMPLETE");
        write_table(table, &path, self.format).context("exporting complete table")?;
        info!(path = %path.display(), columns = table.column_names().len(), "complete table stored");
        Ok(path)
    }
}
