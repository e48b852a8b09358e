use anyhow::{Context, Result};
use clap::Parser;
use glob::glob;
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};
use svi::{
    export::{CommandJoiner, SpatialJoiner, Unconfigured},
    Orchestrator, OutputFormat, Workspace,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Compute composite vulnerability indices from JSON/YAML theme configurations"
)]
struct Args {
    /// Configuration files or glob patterns. Prompted for on stdin when omitted.
    configs: Vec<String>,

    /// Program that joins an exported table to geometry:
    /// `<program> <features> <join_field> <table> <join_field> <output>`
    #[arg(long)]
    join_command: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let args = Args::parse();

    // ─── 2) gather configuration paths ───────────────────────────────
    let patterns = if args.configs.is_empty() {
        prompt_for_paths()?
    } else {
        args.configs
    };
    let paths = expand_patterns(&patterns);
    if paths.is_empty() {
        warn!("no configuration files selected; exit");
        return Ok(());
    }
    info!("{} configuration file(s) to process", paths.len());

    // ─── 3) run the batch inside one scratch workspace ───────────────
    let workspace = Workspace::acquire()?;
    let joiner: Box<dyn SpatialJoiner> = match args.join_command {
        Some(program) => Box::new(CommandJoiner::new(program)),
        None => Box::new(Unconfigured),
    };
    let summary = Orchestrator::new(joiner.as_ref(), args.format).run_batch(&workspace, &paths);

    // ─── 4) per-file summary ─────────────────────────────────────────
    for (path, outcome) in &summary.outcomes {
        match outcome {
            Ok(report) => info!(
                path = %path.display(),
                run_dir = %report.run_dir.display(),
                "ok"
            ),
            Err(e) => error!(path = %path.display(), "failed: {:#}", e),
        }
    }
    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "all done"
    );

    // ─── 5) tear down scratch space ──────────────────────────────────
    if let Err(e) = workspace.release() {
        error!("failed to remove scratch workspace: {:#}", e);
    }
    Ok(())
}

/// Read one path or pattern per line until a blank line or EOF.
fn prompt_for_paths() -> Result<Vec<String>> {
    print!("Select configuration file(s), one per line; blank line to finish:\n> ");
    io::stdout().flush()?;

    let mut out = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line.context("reading configuration path from stdin")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        out.push(trimmed.to_string());
        print!("> ");
        io::stdout().flush()?;
    }
    Ok(out)
}

/// Expand glob patterns. An entry that matches nothing, or is not a valid
/// pattern, is kept as a literal path so it surfaces as a per-file error.
fn expand_patterns(patterns: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matched: Vec<PathBuf> = match glob(pattern) {
            Ok(entries) => entries.filter_map(|p| p.ok()).collect(),
            Err(e) => {
                warn!(%pattern, error = %e, "invalid glob pattern; treating it as a path");
                Vec::new()
            }
        };
        if matched.is_empty() {
            paths.push(PathBuf::from(pattern));
        } else {
            paths.extend(matched);
        }
    }
    paths
}
