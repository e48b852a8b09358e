// src/orchestrate.rs

use anyhow::{Context, Result};
use chrono::Local;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::config::SchemaConfig;
use crate::export::{RunDirectory, SpatialJoiner, SpatialOutcome, SubsetExport, SubsetExporter};
use crate::index::compute_indices;
use crate::table::{read_csv, OutputFormat};
use crate::validate;

/// Scratch directory shared by every configuration of one batch.
///
/// Removed when released or dropped, whatever happened to the configurations.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn acquire() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("svi-scratch-")
            .tempdir()
            .context("creating scratch workspace")?;
        info!(path = %dir.path().display(), "scratch workspace created");
        Ok(Workspace { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn release(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("removing scratch workspace {:?}", path))?;
        info!(path = %path.display(), "scratch workspace removed");
        Ok(())
    }
}

/// What one configuration produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReport {
    pub name: String,
    pub run_dir: PathBuf,
    pub exports: Vec<SubsetExport>,
    pub skipped_subsets: BTreeSet<String>,
    pub complete_path: PathBuf,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<(PathBuf, Result<ConfigReport>)>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Runs validate → compute → export for each configuration in turn.
pub struct Orchestrator<'a> {
    joiner: &'a dyn SpatialJoiner,
    format: OutputFormat,
}

impl<'a> Orchestrator<'a> {
    pub fn new(joiner: &'a dyn SpatialJoiner, format: OutputFormat) -> Self {
        Orchestrator { joiner, format }
    }

    /// Process every file; a failing file is logged and the batch moves on.
    pub fn run_batch(&self, workspace: &Workspace, paths: &[PathBuf]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (i, path) in paths.iter().enumerate() {
            info!(n = i + 1, path = %path.display(), "performing operations defined in configuration");
            let outcome = self.process_file(workspace, path);
            match &outcome {
                Ok(report) => info!(
                    path = %path.display(),
                    run_dir = %report.run_dir.display(),
                    subsets = report.exports.len(),
                    skipped = report.skipped_subsets.len(),
                    "configuration done"
                ),
                Err(e) => error!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "terminating operations for configuration"
                ),
            }
            summary.outcomes.push((path.clone(), outcome));
        }
        summary
    }

    #[tracing::instrument(level = "info", skip(self, workspace, config_path), fields(path = %config_path.display()))]
    pub fn process_file(&self, workspace: &Workspace, config_path: &Path) -> Result<ConfigReport> {
        let config = SchemaConfig::load(config_path)?;
        self.process_config(workspace, &config)
    }

    pub fn process_config(&self, workspace: &Workspace, config: &SchemaConfig) -> Result<ConfigReport> {
        // 1) the source must exist before anything is read
        validate::check_source(config)?;

        // 2) load the table
        let mut table = read_csv(&config.source_path, &config.identifier_columns())?;

        // 3) validate: bad subsets are skipped, missing columns are fatal
        let skipped = validate::validate(config, &table)?.into_result(config)?;

        // 4) derive every index column
        let columns = compute_indices(&mut table, config, &skipped)?;

        // 5) export each subset, then the whole table
        let run_dir = RunDirectory::create(config, Local::now())?;
        let exporter =
            SubsetExporter::new(config, &run_dir, self.joiner, workspace.path(), self.format);

        let mut exports = Vec::new();
        for subset in config.subsets.iter().filter(|s| !skipped.contains(&s.key)) {
            info!(subset = %subset.key, "creating table for subset");
            let export = exporter.export(&table, &columns, &subset.key)?;
            if let Some(SpatialOutcome::Failed(reason)) = &export.spatial {
                warn!(subset = %subset.key, %reason, "no spatial features for subset");
            }
            exports.push(export);
        }
        let complete_path = exporter.export_complete(&table)?;

        Ok(ConfigReport {
            name: config.name.clone(),
            run_dir: run_dir.path().to_path_buf(),
            exports,
            skipped_subsets: skipped,
            complete_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::export::Unconfigured;
    use std::fs;
    use tempfile::tempdir;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,svi=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn write_config(dir: &Path, file: &str, source: &Path, subsets: &str) -> Result<PathBuf> {
        let path = dir.join(file);
        let text = format!(
            r#"{{
            "absolute_source_path": {source:?},
            "absolute_svi_path": {out:?},
            "set_name": "county",
            "geoid_fields": ["GEOID"],
            "join_field": "GEOID",
            "join_shapefile_path": "/geo/tracts.shp",
            "themes": {{
                "ECON": {{
                    "estimated_totals": {{"POV": ["popA", "popB"]}},
                    "estimated_percentages": {{"POV": "total"}}
                }}
            }},
            "subsets": {subsets},
            "spatial_subsets": ["S1"]
        }}"#,
            out = dir.join("out"),
        );
        fs::write(&path, text)?;
        Ok(path)
    }

    fn write_source(dir: &Path) -> Result<PathBuf> {
        let path = dir.join("acs.csv");
        fs::write(
            &path,
            "GEOID,popA,popB,total\n01001,10,5,100\n01003,20,10,50\n01005,5,5,40\n",
        )?;
        Ok(path)
    }

    #[test]
    fn end_to_end_single_subset() -> Result<()> {
        init_test_logging();
        let dir = tempdir()?;
        let source = write_source(dir.path())?;
        let cfg = write_config(dir.path(), "a.json", &source, r#"{"S1": ["ECON"]}"#)?;

        let workspace = Workspace::acquire()?;
        let orchestrator = Orchestrator::new(&Unconfigured, OutputFormat::Csv);
        let report = orchestrator.process_file(&workspace, &cfg)?;

        assert!(dir.path().join("out").is_dir());
        assert_eq!(report.exports.len(), 1);
        let s1 = &report.exports[0];
        assert!(matches!(s1.spatial, Some(SpatialOutcome::Failed(_))));

        let text = fs::read_to_string(&s1.table_path)?;
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("GEOID,E_POV,EP_POV,EPL_POV,RPL_ECON,RPL_S1")
        );
        assert!(lines.next().unwrap_or_default().starts_with("01001,"));
        assert!(report.complete_path.is_file());
        workspace.release()?;
        Ok(())
    }

    #[test]
    fn bad_subset_is_skipped_others_still_export() -> Result<()> {
        init_test_logging();
        let dir = tempdir()?;
        let source = write_source(dir.path())?;
        let cfg = write_config(
            dir.path(),
            "b.json",
            &source,
            r#"{"S1": ["ECON"], "BAD": ["HOUS"]}"#,
        )?;

        let workspace = Workspace::acquire()?;
        let report =
            Orchestrator::new(&Unconfigured, OutputFormat::Csv).process_file(&workspace, &cfg)?;

        assert_eq!(report.skipped_subsets, BTreeSet::from(["BAD".to_string()]));
        assert_eq!(report.exports.len(), 1);
        assert_eq!(report.exports[0].subset, "S1");
        assert!(!report.run_dir.join("county_BAD.csv").exists());
        Ok(())
    }

    #[test]
    fn batch_continues_past_failing_files() -> Result<()> {
        init_test_logging();
        let dir = tempdir()?;
        let source = write_source(dir.path())?;
        let missing_source = write_config(
            dir.path(),
            "missing.json",
            &dir.path().join("nope.csv"),
            r#"{"S1": ["ECON"]}"#,
        )?;
        let good = write_config(dir.path(), "good.json", &source, r#"{"S1": ["ECON"]}"#)?;

        fs::write(dir.path().join("narrow.csv"), "GEOID,popA\n01001,1\n")?;
        let missing_column = write_config(
            dir.path(),
            "narrow.json",
            &dir.path().join("narrow.csv"),
            r#"{"S1": ["ECON"]}"#,
        )?;

        let workspace = Workspace::acquire()?;
        let scratch = workspace.path().to_path_buf();
        let summary = Orchestrator::new(&Unconfigured, OutputFormat::Csv).run_batch(
            &workspace,
            &[missing_source, good, missing_column],
        );
        workspace.release()?;

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 2);
        assert!(!scratch.exists());

        let err = summary.outcomes[0].1.as_ref().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::SourceNotFound { .. })
        ));
        let err = summary.outcomes[2].1.as_ref().unwrap_err();
        match err.downcast_ref::<ConfigError>() {
            Some(ConfigError::MissingColumns { columns, .. }) => {
                assert_eq!(columns, &vec!["popB".to_string(), "total".to_string()])
            }
            other => panic!("unexpected: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn parquet_format_changes_extensions() -> Result<()> {
        let dir = tempdir()?;
        let source = write_source(dir.path())?;
        let cfg = write_config(dir.path(), "p.json", &source, r#"{"S1": ["ECON"]}"#)?;

        let workspace = Workspace::acquire()?;
        let report =
            Orchestrator::new(&Unconfigured, OutputFormat::Parquet).process_file(&workspace, &cfg)?;
        assert_eq!(
            report.exports[0].table_path,
            report.run_dir.join("county_S1.parquet")
        );
        assert_eq!(
            report.complete_path,
            report.run_dir.join("county_COMPLETE.parquet")
        );
        Ok(())
    }
}
