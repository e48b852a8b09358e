// src/table/io.rs

use anyhow::{Context, Result};
use arrow::{
    compute::concat_batches,
    csv::{reader::Format, ReaderBuilder, WriterBuilder},
    datatypes::{DataType, Field, Schema},
};
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};
use tracing::debug;

use super::Table;

/// On-disk format for exported tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Load a delimited file with a header row into a `Table`.
///
/// Types are inferred from the whole file, except `text_columns`, which are
/// always read as Utf8 so identifiers like `01001` keep their leading zeros.
#[tracing::instrument(level = "debug", skip(path, text_columns), fields(path = %path.as_ref().display()))]
pub fn read_csv<P: AsRef<Path>>(path: P, text_columns: &[String]) -> Result<Table> {
    let path = path.as_ref();

    // 1) infer a schema over every record
    let file = File::open(path).with_context(|| format!("opening source table {:?}", path))?;
    let (inferred, records) = Format::default()
        .with_header(true)
        .infer_schema(BufReader::new(file), None)
        .with_context(|| format!("inferring schema of {:?}", path))?;

    // 2) pin identifier columns to text
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| {
            if text_columns.iter().any(|c| c == f.name()) {
                Field::new(f.name(), DataType::Utf8, true)
            } else {
                f.as_ref().clone()
            }
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));

    // 3) read and stitch the batches together
    let file = File::open(path).with_context(|| format!("reopening source table {:?}", path))?;
    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(BufReader::new(file))
        .with_context(|| format!("creating CSV reader for {:?}", path))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing {:?}", path))?;
    let batch = concat_batches(&schema, &batches).context("concatenating CSV batches")?;

    debug!(
        records,
        rows = batch.num_rows(),
        columns = batch.num_columns(),
        "loaded source table"
    );
    Ok(Table::new(batch))
}

/// Persist `table` at `path`: header row, no index column, UTF-8.
///
/// Written to a temporary sibling first, then renamed over `path`.
pub fn write_table(table: &Table, path: &Path, format: OutputFormat) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let file = File::create(&tmp_path).with_context(|| format!("creating {:?}", tmp_path))?;
    match format {
        OutputFormat::Csv => {
            let mut writer = WriterBuilder::new()
                .with_header(true)
                .build(BufWriter::new(file));
            writer
                .write(table.batch())
                .with_context(|| format!("writing CSV {:?}", tmp_path))?;
            writer.into_inner().flush()?;
        }
        OutputFormat::Parquet => {
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            let mut writer = ArrowWriter::try_new(file, table.batch().schema(), Some(props))
                .context("creating Arrow writer")?;
            writer
                .write(table.batch())
                .with_context(|| format!("writing Parquet {:?}", tmp_path))?;
            writer.close().context("closing Parquet writer")?;
        }
    }

    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {:?} -> {:?}", tmp_path, path))?;
    debug!(path = %path.display(), rows = table.num_rows(), "table written");
    Ok(())
}
