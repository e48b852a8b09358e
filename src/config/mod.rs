// src/config/mod.rs

pub mod raw;

use anyhow::Result;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::error::ConfigError;
use raw::{RawConfig, RawMembers, RawTheme};

/// Keyword that selects every theme for a subset.
pub const ALL_THEMES: &str = "ALL";

/// Parsed theme/subset definitions for one configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaConfig {
    /// `set_name`: prefix for the run directory and every exported file.
    pub name: String,
    pub source_path: PathBuf,
    pub output_dir: PathBuf,
    pub geoid_fields: Vec<String>,
    pub join_field: String,
    pub join_features_path: PathBuf,
    pub themes: Vec<Theme>,
    pub subsets: Vec<Subset>,
    pub spatial_subsets: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub key: String,
    pub totals: Vec<TotalField>,
    pub percentages: Vec<PercentageField>,
}

/// `E_<key>` = row-wise sum of `sources`.
#[derive(Debug, Clone, PartialEq)]
pub struct TotalField {
    pub key: String,
    pub sources: Vec<String>,
}

/// `EP_<key>`, ranked into `EPL_<key>`.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentageField {
    pub key: String,
    pub basis: Basis,
    /// Higher raw values mean lower vulnerability; the rank is flipped.
    pub inverse: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Basis {
    /// `E_<numerator> / denominator * 100`, where `numerator` is a total key of the same theme.
    Ratio {
        numerator: String,
        denominator: String,
    },
    /// Copy `source` unchanged.
    Verbatim { source: String },
}

impl Basis {
    /// The source-table column this field reads.
    pub fn source_column(&self) -> &str {
        match self {
            Basis::Ratio { denominator, .. } => denominator,
            Basis::Verbatim { source } => source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subset {
    pub key: String,
    pub members: Members,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Members {
    AllThemes,
    Themes(Vec<String>),
}

impl Subset {
    pub fn includes(&self, theme_key: &str) -> bool {
        match &self.members {
            Members::AllThemes => true,
            Members::Themes(keys) => keys.iter().any(|k| k == theme_key),
        }
    }
}

impl Theme {
    /// Every source-table column this theme reads, in declaration order.
    pub fn source_columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.totals
            .iter()
            .flat_map(|t| t.sources.iter().map(String::as_str))
            .chain(self.percentages.iter().map(|p| p.basis.source_column()))
    }
}

impl SchemaConfig {
    /// Load a configuration document; `.yaml`/`.yml` files are read as YAML, anything else as JSON.
    #[tracing::instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = path
            .extension()
            .and_then(|s| s.to_str())
            .map_or(false, |ext| {
                ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
            });

        let raw: RawConfig = if is_yaml {
            serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        Ok(Self::from_raw(raw)?)
    }

    /// Parse a JSON document held in memory.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<memory>"),
            message: e.to_string(),
        })?;
        Ok(Self::from_raw(raw)?)
    }

    /// Resolve the document format into typed definitions.
    ///
    /// The document pairs the i-th estimated percentage with the i-th
    /// estimated total; that pairing is fixed here into `Basis::Ratio::numerator`.
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let themes = raw
            .themes
            .0
            .into_iter()
            .map(|(key, theme)| resolve_theme(key, theme))
            .collect::<Result<Vec<_>, _>>()?;
        check_field_keys(&themes)?;

        let subsets = raw
            .subsets
            .0
            .into_iter()
            .map(|(key, members)| {
                let members = match members {
                    RawMembers::Keyword(k) if k == ALL_THEMES => Members::AllThemes,
                    RawMembers::Keyword(k) => Members::Themes(vec![k]),
                    RawMembers::Themes(keys) => Members::Themes(keys),
                };
                Subset { key, members }
            })
            .collect::<Vec<_>>();

        for key in &raw.spatial_subsets {
            if !subsets.iter().any(|s| &s.key == key) {
                warn!(subset = %key, "spatial subset is not defined in `subsets`");
            }
        }

        Ok(SchemaConfig {
            name: raw.set_name,
            source_path: raw.absolute_source_path,
            output_dir: raw.absolute_svi_path,
            geoid_fields: raw.geoid_fields,
            join_field: raw.join_field,
            join_features_path: raw.join_shapefile_path,
            themes,
            subsets,
            spatial_subsets: raw.spatial_subsets.into_iter().collect(),
        })
    }

    pub fn theme(&self, key: &str) -> Option<&Theme> {
        self.themes.iter().find(|t| t.key == key)
    }

    pub fn subset(&self, key: &str) -> Option<&Subset> {
        self.subsets.iter().find(|s| s.key == key)
    }

    pub fn is_spatial(&self, subset_key: &str) -> bool {
        self.spatial_subsets.contains(subset_key)
    }

    /// Columns read as text rather than inferred: row identifiers and the join key.
    pub fn identifier_columns(&self) -> Vec<String> {
        let mut cols = self.geoid_fields.clone();
        if !cols.contains(&self.join_field) {
            cols.push(self.join_field.clone());
        }
        cols
    }

    /// Every column the source table must provide, first occurrence order, no repeats.
    pub fn required_columns(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let referenced = self
            .geoid_fields
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.join_field.as_str()))
            .chain(self.themes.iter().flat_map(|t| t.source_columns()));
        for col in referenced {
            if seen.insert(col) {
                out.push(col.to_string());
            }
        }
        out
    }
}

/// Derived column names carry only the field key, so a key may belong to one theme.
fn check_field_keys(themes: &[Theme]) -> Result<(), ConfigError> {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    for theme in themes {
        let keys: BTreeSet<&str> = theme
            .totals
            .iter()
            .map(|t| t.key.as_str())
            .chain(theme.percentages.iter().map(|p| p.key.as_str()))
            .collect();
        for key in keys {
            if let Some(first) = owners.insert(key, theme.key.as_str()) {
                return Err(ConfigError::SharedFieldKey {
                    key: key.to_string(),
                    first: first.to_string(),
                    second: theme.key.clone(),
                });
            }
        }
    }
    Ok(())
}

fn resolve_theme(key: String, raw: RawTheme) -> Result<Theme, ConfigError> {
    let totals: Vec<TotalField> = raw
        .estimated_totals
        .0
        .into_iter()
        .map(|(key, sources)| TotalField { key, sources })
        .collect();

    for total in totals.iter().filter(|t| t.sources.is_empty()) {
        warn!(theme = %key, field = %total.key, "estimated total lists no source columns");
    }

    let mut percentages = Vec::with_capacity(raw.estimated_percentages.0.len());
    for (position, (field, column)) in raw.estimated_percentages.0.into_iter().enumerate() {
        let basis = if raw.non_percentage_fields.contains(&field) {
            Basis::Verbatim { source: column }
        } else {
            let numerator = totals
                .get(position)
                .map(|t| t.key.clone())
                .ok_or_else(|| ConfigError::UnpairedPercentage {
                    theme: key.clone(),
                    field: field.clone(),
                    position,
                })?;
            debug!(theme = %key, field = %field, numerator = %numerator, "paired percentage");
            Basis::Ratio {
                numerator,
                denominator: column,
            }
        };
        let inverse = raw.inverse_fields.contains(&field);
        percentages.push(PercentageField {
            key: field,
            basis,
            inverse,
        });
    }

    for stray in raw
        .non_percentage_fields
        .iter()
        .chain(raw.inverse_fields.iter())
        .filter(|f| !percentages.iter().any(|p| &p.key == *f))
    {
        warn!(theme = %key, field = %stray, "flag names no estimated percentage; ignored");
    }

    Ok(Theme {
        key,
        totals,
        percentages,
    })
}
