// src/table/mod.rs

pub mod io;

pub use io::{read_csv, write_table, OutputFormat};

use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Array},
    compute::cast,
    datatypes::{DataType, Field, FieldRef, Schema},
    record_batch::RecordBatch,
};
use std::sync::Arc;

/// In-memory column store for one source table and everything derived from it.
///
/// Row order never changes. Columns are only appended, or replaced in place
/// when a column of the same name is written again.
#[derive(Debug, Clone)]
pub struct Table {
    batch: RecordBatch,
}

impl Table {
    pub fn new(batch: RecordBatch) -> Self {
        Table { batch }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema().index_of(name).is_ok()
    }

    pub fn column(&self, name: &str) -> Result<&ArrayRef> {
        self.batch
            .column_by_name(name)
            .ok_or_else(|| anyhow!("column `{}` not in table", name))
    }

    /// Read `name` as floats. Nulls, NaN and unparseable text come back as `None`.
    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let arr = self.column(name)?;
        let floats = cast(arr, &DataType::Float64)
            .with_context(|| format!("casting column `{}` to Float64", name))?;
        let floats = floats
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| anyhow!("column `{}` did not cast to Float64Array", name))?;
        Ok(floats.iter().map(|v| v.filter(|x| !x.is_nan())).collect())
    }

    /// Append `array` as `name`, or replace the existing column of that name in place.
    pub fn set_column(&mut self, name: &str, array: ArrayRef) -> Result<()> {
        if array.len() != self.num_rows() {
            bail!(
                "column `{}` has {} rows, table has {}",
                name,
                array.len(),
                self.num_rows()
            );
        }

        let schema = self.batch.schema();
        let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
        let mut columns: Vec<ArrayRef> = self.batch.columns().to_vec();
        let field = Arc::new(Field::new(name, array.data_type().clone(), true));

        match schema.index_of(name) {
            Ok(i) => {
                fields[i] = field;
                columns[i] = array;
            }
            Err(_) => {
                fields.push(field);
                columns.push(array);
            }
        }

        self.batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .with_context(|| format!("rebuilding table with column `{}`", name))?;
        Ok(())
    }

    pub fn set_numeric(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        self.set_column(name, Arc::new(Float64Array::from(values)) as ArrayRef)
    }

    /// Project onto `names` in the given order. Repeated names are kept once.
    pub fn select(&self, names: &[String]) -> Result<Table> {
        let schema = self.batch.schema();
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let i = schema
                .index_of(name)
                .with_context(|| format!("selecting column `{}`", name))?;
            if !indices.contains(&i) {
                indices.push(i);
            }
        }
        Ok(Table::new(self.batch.project(&indices)?))
    }
}
