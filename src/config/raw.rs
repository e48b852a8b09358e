// src/config/raw.rs
//
// The configuration document exactly as it is written on disk.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::{fmt, marker::PhantomData, path::PathBuf};

/// An object read as a list of entries in document order.
///
/// A repeated key overwrites the earlier value but keeps its position.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<T>(pub Vec<(String, T)>);

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        OrderedMap(Vec::new())
    }
}

impl<'de, T> Deserialize<'de> for OrderedMap<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for EntriesVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string keys")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, T)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    match entries.iter_mut().find(|(k, _)| *k == key) {
                        Some(slot) => slot.1 = value,
                        None => entries.push((key, value)),
                    }
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub absolute_source_path: PathBuf,
    pub absolute_svi_path: PathBuf,
    pub set_name: String,
    pub geoid_fields: Vec<String>,
    pub join_field: String,
    pub join_shapefile_path: PathBuf,
    pub themes: OrderedMap<RawTheme>,
    pub subsets: OrderedMap<RawMembers>,
    #[serde(default)]
    pub spatial_subsets: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawTheme {
    pub estimated_totals: OrderedMap<Vec<String>>,
    pub estimated_percentages: OrderedMap<String>,
    #[serde(default)]
    pub non_percentage_fields: Vec<String>,
    #[serde(default)]
    pub inverse_fields: Vec<String>,
}

/// Either the `"ALL"` keyword or a list of theme keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawMembers {
    Keyword(String),
    Themes(Vec<String>),
}
