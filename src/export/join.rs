// src/export/join.rs

use anyhow::{bail, Context, Result};
use std::{
    path::{Path, PathBuf},
    process::Command,
};
use tracing::debug;

/// What a spatial join is asked to do for one exported subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest<'a> {
    /// Geometry-bearing dataset the table is attached to.
    pub features: &'a Path,
    /// Key present in both the features and the table.
    pub join_field: &'a str,
    /// The persisted subset table.
    pub table: &'a Path,
    /// Where the joined dataset must be written. Its parent directory exists.
    pub output: &'a Path,
    /// Scratch space owned by the current batch.
    pub scratch: &'a Path,
}

/// Attaches a persisted table to geometry. Implementations block until done.
pub trait SpatialJoiner {
    fn join(&self, request: &JoinRequest<'_>) -> Result<PathBuf>;
}

/// Runs an external program as
/// `<program> <features> <join_field> <table> <join_field> <output>`
/// from inside the scratch directory.
#[derive(Debug, Clone)]
pub struct CommandJoiner {
    program: PathBuf,
}

impl CommandJoiner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandJoiner {
            program: program.into(),
        }
    }
}

impl SpatialJoiner for CommandJoiner {
    fn join(&self, request: &JoinRequest<'_>) -> Result<PathBuf> {
        debug!(program = %self.program.display(), output = %request.output.display(), "running spatial join");
        let output = Command::new(&self.program)
            .arg(request.features)
            .arg(request.join_field)
            .arg(request.table)
            .arg(request.join_field)
            .arg(request.output)
            .current_dir(request.scratch)
            .output()
            .with_context(|| format!("launching spatial join {:?}", self.program))?;

        if !output.status.success() {
            bail!(
                "spatial join {:?} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(request.output.to_path_buf())
    }
}

/// Stand-in when no join backend was configured; every request fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

impl SpatialJoiner for Unconfigured {
    fn join(&self, _request: &JoinRequest<'_>) -> Result<PathBuf> {
        bail!("no spatial join backend configured")
    }
}
