// src/index/mod.rs

pub mod numeric;

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::{Basis, Members, SchemaConfig, Subset, Theme};
use crate::table::Table;

pub fn total_column(key: &str) -> String {
    format!("E_{}", key)
}

pub fn percentage_column(key: &str) -> String {
    format!("EP_{}", key)
}

pub fn rank_column(key: &str) -> String {
    format!("EPL_{}", key)
}

/// Sum of ranks feeding a composite, for a theme or a subset.
pub fn sum_column(key: &str) -> String {
    format!("SPL_{}", key)
}

/// Percentile rank of `sum_column(key)`.
pub fn composite_column(key: &str) -> String {
    format!("RPL_{}", key)
}

/// Derived columns written for one theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeColumns {
    pub totals: Vec<String>,
    pub percentages: Vec<String>,
    pub ranks: Vec<String>,
    pub sum: String,
    pub composite: String,
}

impl ThemeColumns {
    /// The columns a subset export carries for this theme. The rank sum is left out.
    pub fn export_columns(&self) -> impl Iterator<Item = &String> + '_ {
        self.totals
            .iter()
            .chain(&self.percentages)
            .chain(&self.ranks)
            .chain(std::iter::once(&self.composite))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsetColumns {
    pub sum: String,
    pub composite: String,
}

/// Which derived columns belong to which theme and subset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexColumns {
    pub themes: BTreeMap<String, ThemeColumns>,
    pub subsets: BTreeMap<String, SubsetColumns>,
}

impl IndexColumns {
    pub fn theme(&self, key: &str) -> Option<&ThemeColumns> {
        self.themes.get(key)
    }

    pub fn subset(&self, key: &str) -> Option<&SubsetColumns> {
        self.subsets.get(key)
    }
}

/// Themes used by at least one subset not in `exclude`, in declaration order.
pub fn required_themes<'a>(config: &'a SchemaConfig, exclude: &BTreeSet<String>) -> Vec<&'a Theme> {
    let active: Vec<&Subset> = config
        .subsets
        .iter()
        .filter(|s| !exclude.contains(&s.key))
        .collect();
    config
        .themes
        .iter()
        .filter(|t| active.iter().any(|s| s.includes(&t.key)))
        .collect()
}

/// Derive every theme and subset index column into `table`.
///
/// Expects a configuration that passed validation against this table; a
/// missing column here is a caller error and aborts the computation.
#[tracing::instrument(level = "info", skip_all, fields(set = %config.name, rows = table.num_rows()))]
pub fn compute_indices(
    table: &mut Table,
    config: &SchemaConfig,
    exclude: &BTreeSet<String>,
) -> Result<IndexColumns> {
    let mut columns = IndexColumns::default();

    for theme in required_themes(config, exclude) {
        let cols = compute_theme(table, theme)
            .with_context(|| format!("computing theme `{}`", theme.key))?;
        columns.themes.insert(theme.key.clone(), cols);
    }

    for subset in config.subsets.iter().filter(|s| !exclude.contains(&s.key)) {
        let cols = compute_subset(table, config, subset, &columns)
            .with_context(|| format!("computing subset `{}`", subset.key))?;
        columns.subsets.insert(subset.key.clone(), cols);
    }

    info!(
        themes = columns.themes.len(),
        subsets = columns.subsets.len(),
        "indices computed"
    );
    Ok(columns)
}

fn compute_theme(table: &mut Table, theme: &Theme) -> Result<ThemeColumns> {
    let rows = table.num_rows();

    // 1) totals: row-wise sum of the listed sources
    let mut totals = Vec::with_capacity(theme.totals.len());
    for field in &theme.totals {
        let sources = field
            .sources
            .iter()
            .map(|c| table.numeric(c))
            .collect::<Result<Vec<_>>>()?;
        let name = total_column(&field.key);
        table.set_numeric(&name, numeric::row_sum(&sources, rows))?;
        totals.push(name);
    }

    // 2) percentages, or a verbatim copy
    let mut percentages = Vec::with_capacity(theme.percentages.len());
    for field in &theme.percentages {
        let name = percentage_column(&field.key);
        match &field.basis {
            Basis::Verbatim { source } => {
                let copied = table.column(source)?.clone();
                table.set_column(&name, copied)?;
            }
            Basis::Ratio {
                numerator,
                denominator,
            } => {
                let totals = table.numeric(&total_column(numerator))?;
                let denominators = table.numeric(denominator)?;
                table.set_numeric(&name, numeric::percentage(&totals, &denominators))?;
            }
        }
        percentages.push(name);
    }

    // 3) percentile ranks, flipped for inverse fields
    let mut ranks = Vec::with_capacity(theme.percentages.len());
    let mut rank_values = Vec::with_capacity(theme.percentages.len());
    for field in &theme.percentages {
        let mut rank = numeric::percentile_rank(&table.numeric(&percentage_column(&field.key))?);
        if field.inverse {
            rank = numeric::invert(&rank);
        }
        let name = rank_column(&field.key);
        table.set_numeric(&name, rank.clone())?;
        rank_values.push(rank);
        ranks.push(name);
    }

    // 4) theme composite
    let sum = sum_column(&theme.key);
    let composite = composite_column(&theme.key);
    let sums = numeric::row_sum(&rank_values, rows);
    let composite_values = numeric::percentile_rank(&sums);
    table.set_numeric(&sum, sums)?;
    table.set_numeric(&composite, composite_values)?;

    debug!(theme = %theme.key, fields = ranks.len(), "theme composite written");
    Ok(ThemeColumns {
        totals,
        percentages,
        ranks,
        sum,
        composite,
    })
}

fn compute_subset(
    table: &mut Table,
    config: &SchemaConfig,
    subset: &Subset,
    columns: &IndexColumns,
) -> Result<SubsetColumns> {
    if let Members::Themes(keys) = &subset.members {
        if let Some(unknown) = keys.iter().find(|k| config.theme(k).is_none()) {
            bail!(
                "subset `{}` names undefined theme `{}` and was not excluded",
                subset.key,
                unknown
            );
        }
    }

    let mut composites = Vec::new();
    for theme in config.themes.iter().filter(|t| subset.includes(&t.key)) {
        let theme_cols = columns
            .theme(&theme.key)
            .with_context(|| format!("theme `{}` was not computed", theme.key))?;
        composites.push(table.numeric(&theme_cols.composite)?);
    }

    let sum = sum_column(&subset.key);
    let composite = composite_column(&subset.key);
    let sums = numeric::row_sum(&composites, table.num_rows());
    let composite_values = numeric::percentile_rank(&sums);
    table.set_numeric(&sum, sums)?;
    table.set_numeric(&composite, composite_values)?;

    debug!(subset = %subset.key, themes = composites.len(), "subset composite written");
    Ok(SubsetColumns { sum, composite })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{ArrayRef, Float64Array, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use std::sync::Arc;

    fn econ_table() -> Result<Table> {
        let schema = Schema::new(vec![
            Field::new("GEOID", DataType::Utf8, true),
            Field::new("popA", DataType::Int64, true),
            Field::new("popB", DataType::Int64, true),
            Field::new("total", DataType::Int64, true),
            Field::new("income", DataType::Float64, true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
                Arc::new(Int64Array::from(vec![10, 20, 5])) as ArrayRef,
                Arc::new(Int64Array::from(vec![5, 10, 5])) as ArrayRef,
                Arc::new(Int64Array::from(vec![100, 50, 40])) as ArrayRef,
                Arc::new(Float64Array::from(vec![52_000.0, 31_000.0, 47_500.0])) as ArrayRef,
            ],
        )?;
        Ok(Table::new(batch))
    }

    fn econ_config(extra: &str) -> Result<SchemaConfig> {
        let text = format!(
            r#"{{
            "absolute_source_path": "/data/src.csv",
            "absolute_svi_path": "/data/out",
            "set_name": "t",
            "geoid_fields": ["GEOID"],
            "join_field": "GEOID",
            "join_shapefile_path": "/data/geo.shp",
            "themes": {{
                "ECON": {{
                    "estimated_totals": {{"POV": ["popA", "popB"]}},
                    "estimated_percentages": {{"POV": "total"}}
                }},
                "INC": {{
                    "estimated_totals": {{"PCI": ["income"]}},
                    "estimated_percentages": {{"PCI": "income"}},
                    "non_percentage_fields": ["PCI"],
                    "inverse_fields": ["PCI"]
                }}
            }},
            "subsets": {{"S1": ["ECON"]{extra}}}
        }}"#
        );
        SchemaConfig::from_json_str(&text)
    }

    fn third(x: f64) -> Option<f64> {
        Some(x / 3.0)
    }

    #[test]
    fn single_theme_pipeline() -> Result<()> {
        let mut table = econ_table()?;
        let config = econ_config("")?;
        let cols = compute_indices(&mut table, &config, &BTreeSet::new())?;

        assert_eq!(
            table.numeric("E_POV")?,
            vec![Some(15.0), Some(30.0), Some(10.0)]
        );
        assert_eq!(
            table.numeric("EP_POV")?,
            vec![Some(15.0), Some(60.0), Some(25.0)]
        );
        let expected = vec![third(1.0), third(3.0), third(2.0)];
        assert_eq!(table.numeric("EPL_POV")?, expected);
        assert_eq!(table.numeric("SPL_ECON")?, expected);
        assert_eq!(table.numeric("RPL_ECON")?, expected);
        assert_eq!(table.numeric("SPL_S1")?, expected);
        assert_eq!(table.numeric("RPL_S1")?, expected);

        let econ = cols.theme("ECON").expect("ECON recorded");
        assert_eq!(
            econ.export_columns().cloned().collect::<Vec<_>>(),
            vec!["E_POV", "EP_POV", "EPL_POV", "RPL_ECON"]
        );
        assert_eq!(econ.sum, "SPL_ECON");
        // INC is not used by any subset
        assert!(cols.theme("INC").is_none());
        assert!(!table.has_column("RPL_INC"));
        Ok(())
    }

    #[test]
    fn verbatim_field_is_copied_and_inverse_rank_flipped() -> Result<()> {
        let mut table = econ_table()?;
        let config = econ_config(r#", "INCOME": ["INC"]"#)?;
        compute_indices(&mut table, &config, &BTreeSet::new())?;

        assert_eq!(table.numeric("EP_PCI")?, table.numeric("income")?);
        // income 52_000, 31_000, 47_500 ranks 1, 1/3, 2/3
        let plain = numeric::percentile_rank(&table.numeric("EP_PCI")?);
        let flipped = table.numeric("EPL_PCI")?;
        for (p, f) in plain.iter().zip(&flipped) {
            assert_eq!(f.unwrap(), 1.0 - p.unwrap());
        }
        Ok(())
    }

    #[test]
    fn all_subset_sums_every_theme() -> Result<()> {
        let mut table = econ_table()?;
        let config = econ_config(r#", "FULL": "ALL""#)?;
        let cols = compute_indices(&mut table, &config, &BTreeSet::new())?;

        assert!(cols.theme("ECON").is_some() && cols.theme("INC").is_some());
        let econ = table.numeric("RPL_ECON")?;
        let inc = table.numeric("RPL_INC")?;
        let expected: Vec<Option<f64>> = econ
            .iter()
            .zip(&inc)
            .map(|(a, b)| Some(a.unwrap() + b.unwrap()))
            .collect();
        assert_eq!(table.numeric("SPL_FULL")?, expected);
        Ok(())
    }

    #[test]
    fn excluded_subset_produces_nothing() -> Result<()> {
        let mut table = econ_table()?;
        let config = econ_config(r#", "BAD": ["ECON", "NOPE"]"#)?;
        let exclude: BTreeSet<String> = ["BAD".to_string()].into();
        let cols = compute_indices(&mut table, &config, &exclude)?;

        assert!(cols.subset("BAD").is_none());
        assert!(!table.has_column("SPL_BAD") && !table.has_column("RPL_BAD"));
        assert!(cols.subset("S1").is_some());
        assert!(table.has_column("RPL_S1"));
        Ok(())
    }

    #[test]
    fn unexcluded_bad_subset_is_an_error() -> Result<()> {
        let mut table = econ_table()?;
        let config = econ_config(r#", "BAD": ["NOPE"]"#)?;
        assert!(compute_indices(&mut table, &config, &BTreeSet::new()).is_err());
        Ok(())
    }

    #[test]
    fn rerun_reproduces_the_same_values() -> Result<()> {
        let mut table = econ_table()?;
        let config = econ_config(r#", "FULL": "ALL""#)?;
        compute_indices(&mut table, &config, &BTreeSet::new())?;
        let first = table.clone();

        compute_indices(&mut table, &config, &BTreeSet::new())?;
        assert_eq!(first.column_names(), table.column_names());
        for name in first.column_names().iter().skip(1) {
            assert_eq!(first.numeric(name)?, table.numeric(name)?, "column {name}");
        }
        Ok(())
    }

    #[test]
    fn zero_denominator_leaves_row_unranked() -> Result<()> {
        let mut table = econ_table()?;
        table.set_numeric("total", vec![Some(100.0), Some(0.0), Some(40.0)])?;
        let config = econ_config("")?;
        compute_indices(&mut table, &config, &BTreeSet::new())?;

        assert_eq!(table.numeric("EP_POV")?, vec![Some(15.0), None, Some(25.0)]);
        assert_eq!(table.numeric("EPL_POV")?, vec![Some(0.5), None, Some(1.0)]);
        // the unranked row contributes nothing to the theme sum
        assert_eq!(
            table.numeric("SPL_ECON")?,
            vec![Some(0.5), Some(0.0), Some(1.0)]
        );
        Ok(())
    }
}
