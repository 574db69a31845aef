use crate::error::{IndexerError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_TIME_BUDGET_SECS: u64 = 240;

/// Subtypes that never carry indexable content (workflow maps, discussions,
/// channels, task lists and the like)
pub const DEFAULT_EXCLUDED_TYPES: &[i64] = &[
    137, 142, 143, 148, 150, 154, 161, 162, 201, 203, 209, 210, 211, 345, 346, 361, 374, 431,
    441, 482, 484, 899, 901, 903, 904, 906, 3_030_004, 3_030_201,
];

/// Volume subtypes whose contents are skipped when no included locations are set
pub const DEFAULT_EXCLUDED_VOLUME_TYPES: &[i64] = &[148, 161, 162, 901, 903, 904, 906];

/// Which ancestor resolver runs when no closure table is usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenealogistKind {
    /// One parent lookup per hop
    Single,
    /// One lookup per frontier of ids
    Batch,
    /// Single lookups for small frontiers, batch lookups otherwise
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum HiddenItems {
    #[default]
    HideAll,
    ShowAll,
    /// Hidden items of these subtypes are still traversed
    ShowTypes(Vec<i64>),
}

/// When the excluded-volume-type filter applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTypeFilter {
    /// Only when no included locations are configured
    #[default]
    WithoutIncludedLocations,
    /// Regardless of included locations
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TraversalConfig {
    /// Location ids whose descendants are traversed (empty: everything)
    #[serde(deserialize_with = "id_list")]
    #[schemars(with = "Vec<i64>")]
    pub included_locations: Vec<i64>,
    /// Location ids whose descendants are skipped
    #[serde(deserialize_with = "id_list")]
    #[schemars(with = "Vec<i64>")]
    pub excluded_locations: Vec<i64>,
    /// Subtypes to traverse (empty: every subtype not excluded)
    #[serde(deserialize_with = "id_list")]
    #[schemars(with = "Vec<i64>")]
    pub included_types: Vec<i64>,
    #[serde(deserialize_with = "id_list")]
    #[schemars(with = "Vec<i64>")]
    pub excluded_types: Vec<i64>,
    #[serde(deserialize_with = "id_list")]
    #[schemars(with = "Vec<i64>")]
    pub excluded_volume_types: Vec<i64>,
    pub volume_type_filter: VolumeTypeFilter,
    pub hidden_items: HiddenItems,
    /// Free-form SQL ANDed into the item filter
    pub sql_where: Option<String>,
    pub batch_size: usize,
    pub track_deletes: bool,
    /// Skip delete events older than the first traversal
    pub replay_historical_deletes: bool,
    pub time_budget_secs: u64,
    /// Use `DTreeAncestors` when the repository has it
    pub use_ancestor_closure: bool,
    pub genealogist: GenealogistKind,
    pub cache_min_capacity: usize,
    pub cache_max_capacity: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            included_locations: Vec::new(),
            excluded_locations: Vec::new(),
            included_types: Vec::new(),
            excluded_types: DEFAULT_EXCLUDED_TYPES.to_vec(),
            excluded_volume_types: DEFAULT_EXCLUDED_VOLUME_TYPES.to_vec(),
            volume_type_filter: VolumeTypeFilter::default(),
            hidden_items: HiddenItems::default(),
            sql_where: None,
            batch_size: DEFAULT_BATCH_SIZE,
            track_deletes: true,
            replay_historical_deletes: false,
            time_budget_secs: DEFAULT_TIME_BUDGET_SECS,
            use_ancestor_closure: true,
            genealogist: GenealogistKind::default(),
            cache_min_capacity: 1_000,
            cache_max_capacity: 10_000,
        }
    }
}

impl TraversalConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validated()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Normalize the batch size and reject inconsistent settings
    pub fn validated(mut self) -> Result<Self> {
        self.batch_size = clamp_batch_size(self.batch_size);
        if self.time_budget_secs == 0 {
            return Err(IndexerError::Config(
                "time_budget_secs must be positive".to_string(),
            ));
        }
        if self.cache_max_capacity == 0 || self.cache_min_capacity > self.cache_max_capacity {
            return Err(IndexerError::Config(format!(
                "cache capacity {}..{} is invalid",
                self.cache_min_capacity, self.cache_max_capacity
            )));
        }
        if self
            .sql_where
            .as_deref()
            .is_some_and(|sql| sql.trim().is_empty())
        {
            self.sql_where = None;
        }
        Ok(self)
    }

    #[must_use]
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    #[must_use]
    pub fn has_location_filters(&self) -> bool {
        !self.included_locations.is_empty() || !self.excluded_locations.is_empty()
    }
}

/// Clamp a batch-size hint into `1..=1000`; zero selects the default
#[must_use]
pub fn clamp_batch_size(hint: usize) -> usize {
    if hint == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        hint.min(MAX_BATCH_SIZE)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdList {
    List(Vec<i64>),
    Text(String),
}

/// Accept `[1, 2]` as well as `"1, 2"`
fn id_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<i64>, D::Error> {
    match RawIdList::deserialize(d)? {
        RawIdList::List(ids) => Ok(ids),
        RawIdList::Text(text) => parse_id_list(&text).map_err(serde::de::Error::custom),
    }
}

pub fn parse_id_list(text: &str) -> std::result::Result<Vec<i64>, String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|e| format!("invalid id {s:?}: {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = TraversalConfig::from_toml_str("").expect("config");
        assert_eq!(config, TraversalConfig::default());
        assert_eq!(config.time_budget(), Duration::from_secs(240));
    }

    #[test]
    fn parses_full_document() {
        let config = TraversalConfig::from_toml_str(
            r#"
            included_locations = "10, 2000"
            excluded_locations = [2]
            excluded_types = []
            batch_size = 5000
            track_deletes = false
            genealogist = "batch"
            volume_type_filter = "always"
            sql_where = "  "

            [hidden_items]
            show_types = [144]
            "#,
        )
        .expect("config");

        assert_eq!(config.included_locations, vec![10, 2000]);
        assert_eq!(config.excluded_locations, vec![2]);
        assert!(config.excluded_types.is_empty());
        assert_eq!(config.batch_size, MAX_BATCH_SIZE);
        assert!(!config.track_deletes);
        assert_eq!(config.genealogist, GenealogistKind::Batch);
        assert_eq!(config.volume_type_filter, VolumeTypeFilter::Always);
        assert_eq!(config.hidden_items, HiddenItems::ShowTypes(vec![144]));
        assert_eq!(config.sql_where, None);
        assert!(config.has_location_filters());
    }

    #[test]
    fn hidden_items_accepts_plain_strings() {
        let config =
            TraversalConfig::from_toml_str(r#"hidden_items = "show_all""#).expect("config");
        assert_eq!(config.hidden_items, HiddenItems::ShowAll);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(TraversalConfig::from_toml_str(r#"included_locations = "10,x""#).is_err());
        assert!(TraversalConfig::from_toml_str("time_budget_secs = 0").is_err());
        assert!(TraversalConfig::from_toml_str(
            "cache_min_capacity = 10\ncache_max_capacity = 5"
        )
        .is_err());
        assert!(TraversalConfig::from_toml_str(r#"genealogist = "psychic""#).is_err());
    }

    #[test]
    fn batch_size_is_clamped() {
        assert_eq!(clamp_batch_size(0), DEFAULT_BATCH_SIZE);
        assert_eq!(clamp_batch_size(1), 1);
        assert_eq!(clamp_batch_size(999), 999);
        assert_eq!(clamp_batch_size(100_000), MAX_BATCH_SIZE);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "batch_size = 7\ngenealogist = \"single\"").expect("write");
        let config = TraversalConfig::load(file.path()).expect("load");
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.genealogist, GenealogistKind::Single);
    }
}
