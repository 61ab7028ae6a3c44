//! Run configuration: one immutable [`CbrConfig`] plus typed per-relation overrides.
//!
//! The config is persisted as TOML; every field has a default, so an empty
//! file is a valid config. Per-relation overrides come from a JSON file that
//! maps relation labels to partial records; absent fields inherit the global
//! values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::{CombineAcrossPaths, CombinePerPath};
use crate::error::ConfigError;
use crate::stats::ScoreMode;
use crate::vocab::{RelationId, RelationVocab};

/// Which split is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    #[default]
    Dev,
    Test,
}

impl std::str::FromStr for Split {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidConfiguration {
                setting: "split".into(),
                value: other.into(),
                expected: "split must be `dev` or `test`".into(),
            }),
        }
    }
}

/// Global run configuration, persisted as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CbrConfig {
    /// Dataset directory name under `data_dir`.
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    /// Root of all datasets.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub split: Split,
    /// Replaces `test.txt` when evaluating the test split.
    #[serde(default)]
    pub test_file_name: Option<String>,
    /// Number of neighbors per query.
    #[serde(default = "default_k_adj")]
    pub k_adj: usize,
    /// Execution budget: programs that must reach an entity before stopping.
    #[serde(default = "default_max_num_programs")]
    pub max_num_programs: usize,
    #[serde(default = "default_max_path_len")]
    pub max_path_len: usize,
    /// Size of the precomputed path pool to load.
    #[serde(default = "default_num_paths_around_entities")]
    pub num_paths_around_entities: usize,
    /// Clustering threshold selecting the statistics directory.
    #[serde(default = "default_linkage")]
    pub linkage: f64,
    /// Weight paths by their learned score instead of uniformly.
    #[serde(default = "default_true")]
    pub use_path_counts: bool,
    #[serde(default)]
    pub cheat_neighbors: bool,
    #[serde(default)]
    pub use_only_precision_scores: bool,
    #[serde(default)]
    pub aggr_type1: CombinePerPath,
    #[serde(default)]
    pub aggr_type2: CombineAcrossPaths,
    #[serde(default)]
    pub per_relation_config_file: Option<PathBuf>,
    /// Seed for cheat-neighbor sampling.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Evaluate queries on the rayon thread pool.
    #[serde(default)]
    pub parallel: bool,
    /// Skip other known answers when ranking a gold answer.
    #[serde(default = "default_true")]
    pub filtered_eval: bool,
}

fn default_dataset_name() -> String {
    "MRN".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("prob-cbr-data/data")
}
fn default_k_adj() -> usize {
    5
}
fn default_max_num_programs() -> usize {
    5000
}
fn default_max_path_len() -> usize {
    3
}
fn default_num_paths_around_entities() -> usize {
    1000
}
fn default_linkage() -> f64 {
    0.8
}
fn default_true() -> bool {
    true
}
fn default_seed() -> u64 {
    42
}

impl Default for CbrConfig {
    fn default() -> Self {
        Self {
            dataset_name: default_dataset_name(),
            data_dir: default_data_dir(),
            split: Split::default(),
            test_file_name: None,
            k_adj: default_k_adj(),
            max_num_programs: default_max_num_programs(),
            max_path_len: default_max_path_len(),
            num_paths_around_entities: default_num_paths_around_entities(),
            linkage: default_linkage(),
            use_path_counts: true,
            cheat_neighbors: false,
            use_only_precision_scores: false,
            aggr_type1: CombinePerPath::default(),
            aggr_type2: CombineAcrossPaths::default(),
            per_relation_config_file: None,
            seed: default_seed(),
            parallel: false,
            filtered_eval: true,
        }
    }
}

impl CbrConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Parse a TOML config. Aggregation names are checked before the typed
    /// decode so a bad name is [`ConfigError::InvalidConfiguration`].
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            path: origin.to_string(),
            message,
        };
        let table: toml::Table = toml::from_str(content).map_err(|e| parse_error(e.to_string()))?;
        if let Some(name) = table.get("aggr_type1").and_then(toml::Value::as_str) {
            name.parse::<CombinePerPath>()?;
        }
        if let Some(name) = table.get("aggr_type2").and_then(toml::Value::as_str) {
            name.parse::<CombineAcrossPaths>()?;
        }
        toml::Value::Table(table)
            .try_into()
            .map_err(|e| parse_error(e.to_string()))
    }

    /// Reject knob values no run can use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |setting: &str, value: String, expected: &str| ConfigError::InvalidConfiguration {
            setting: setting.into(),
            value,
            expected: expected.into(),
        };
        if self.max_path_len == 0 {
            return Err(invalid("max_path_len", "0".into(), "max_path_len must be at least 1"));
        }
        if self.num_paths_around_entities == 0 {
            return Err(invalid(
                "num_paths_around_entities",
                "0".into(),
                "num_paths_around_entities must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.linkage) {
            return Err(invalid(
                "linkage",
                self.linkage.to_string(),
                "linkage is a clustering threshold in [0, 1]",
            ));
        }
        Ok(())
    }

    /// `<data_dir>/<dataset_name>`.
    pub fn dataset_dir(&self) -> PathBuf {
        self.data_dir.join(&self.dataset_name)
    }

    /// Per-relation settings before any override applies.
    pub fn relation_defaults(&self) -> RelationConfig {
        RelationConfig {
            cheat_neighbors: self.cheat_neighbors,
            score_mode: if self.use_only_precision_scores {
                ScoreMode::PrecisionOnly
            } else {
                ScoreMode::PriorTimesPrecision
            },
            max_num_programs: self.max_num_programs,
            k_adj: self.k_adj,
            per_path: self.aggr_type1,
            across: self.aggr_type2,
        }
    }

    /// Global defaults merged with the overrides file, if one is configured.
    pub fn relation_overrides(
        &self,
        relations: &RelationVocab,
    ) -> Result<RelationOverrides, ConfigError> {
        match &self.per_relation_config_file {
            Some(path) => RelationOverrides::load(path, self.relation_defaults(), relations),
            None => Ok(RelationOverrides::uniform(self.relation_defaults())),
        }
    }
}

/// Effective settings for queries on one relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationConfig {
    pub cheat_neighbors: bool,
    pub score_mode: ScoreMode,
    pub max_num_programs: usize,
    pub k_adj: usize,
    pub per_path: CombinePerPath,
    pub across: CombineAcrossPaths,
}

/// One entry of the overrides file. Aggregation names are kept as strings
/// so a bad name surfaces as [`ConfigError::InvalidConfiguration`].
#[derive(Debug, Default, Deserialize)]
struct RelationOverride {
    cheat_neighbors: Option<bool>,
    use_only_precision_scores: Option<bool>,
    max_num_programs: Option<usize>,
    k_adj: Option<usize>,
    aggr_type1: Option<String>,
    aggr_type2: Option<String>,
}

impl RelationOverride {
    fn apply(self, defaults: &RelationConfig) -> Result<RelationConfig, ConfigError> {
        Ok(RelationConfig {
            cheat_neighbors: self.cheat_neighbors.unwrap_or(defaults.cheat_neighbors),
            score_mode: match self.use_only_precision_scores {
                Some(true) => ScoreMode::PrecisionOnly,
                Some(false) => ScoreMode::PriorTimesPrecision,
                None => defaults.score_mode,
            },
            max_num_programs: self.max_num_programs.unwrap_or(defaults.max_num_programs),
            k_adj: self.k_adj.unwrap_or(defaults.k_adj),
            per_path: match self.aggr_type1 {
                Some(name) => name.parse()?,
                None => defaults.per_path,
            },
            across: match self.aggr_type2 {
                Some(name) => name.parse()?,
                None => defaults.across,
            },
        })
    }
}

/// Relation → settings, with an explicit default record.
#[derive(Debug, Clone)]
pub struct RelationOverrides {
    defaults: RelationConfig,
    by_relation: HashMap<RelationId, RelationConfig>,
}

impl RelationOverrides {
    /// Every relation uses `defaults`.
    pub fn uniform(defaults: RelationConfig) -> Self {
        Self {
            defaults,
            by_relation: HashMap::new(),
        }
    }

    pub fn load(
        path: &Path,
        defaults: RelationConfig,
        relations: &RelationVocab,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&content, &path.display().to_string(), defaults, relations)
    }

    pub fn from_json_str(
        content: &str,
        origin: &str,
        defaults: RelationConfig,
        relations: &RelationVocab,
    ) -> Result<Self, ConfigError> {
        let raw: HashMap<String, RelationOverride> =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse {
                path: origin.to_string(),
                message: e.to_string(),
            })?;

        let mut by_relation = HashMap::with_capacity(raw.len());
        for (label, entry) in raw {
            let config = entry.apply(&defaults)?;
            match relations.id(&label) {
                Some(relation) => {
                    by_relation.insert(relation, config);
                }
                None => tracing::warn!(relation = %label, "override for unknown relation ignored"),
            }
        }
        tracing::debug!(overrides = by_relation.len(), "loaded per-relation config");

        Ok(Self {
            defaults,
            by_relation,
        })
    }

    pub fn for_relation(&self, relation: RelationId) -> &RelationConfig {
        self.by_relation.get(&relation).unwrap_or(&self.defaults)
    }

    pub fn defaults(&self) -> &RelationConfig {
        &self.defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = CbrConfig::from_toml_str("", "inline").unwrap();
        assert_eq!(config.k_adj, 5);
        assert_eq!(config.max_num_programs, 5000);
        assert_eq!(config.max_path_len, 3);
        assert_eq!(config.linkage, 0.8);
        assert!(config.use_path_counts);
        assert!(!config.cheat_neighbors);
        assert_eq!(config.aggr_type1, CombinePerPath::None);
        assert_eq!(config.aggr_type2, CombineAcrossPaths::Sum);
        assert_eq!(config.split, Split::Dev);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_fields_override_defaults() {
        let config = CbrConfig::from_toml_str(
            r#"
            dataset_name = "FB122"
            split = "test"
            k_adj = 10
            aggr_type2 = "noisy_or"
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.dataset_name, "FB122");
        assert_eq!(config.split, Split::Test);
        assert_eq!(config.k_adj, 10);
        assert_eq!(config.aggr_type2, CombineAcrossPaths::NoisyOr);
    }

    #[test]
    fn bad_aggregation_name_is_invalid_configuration() {
        let result = CbrConfig::from_toml_str("aggr_type2 = \"median\"", "inline");
        match result {
            Err(ConfigError::InvalidConfiguration { setting, value, .. }) => {
                assert_eq!(setting, "aggr_type2");
                assert_eq!(value, "median");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            CbrConfig::from_toml_str("aggr_type1 = \"mean\"", "inline"),
            Err(ConfigError::InvalidConfiguration { .. })
        ));
        // A non-string value is still a decode error.
        assert!(matches!(
            CbrConfig::from_toml_str("aggr_type1 = 3", "inline"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn out_of_range_linkage_is_invalid() {
        let config = CbrConfig {
            linkage: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn overrides_inherit_missing_fields() {
        let rels = RelationVocab::from_labels(["treats", "causes"]);
        let defaults = CbrConfig::default().relation_defaults();
        let overrides = RelationOverrides::from_json_str(
            r#"{
                "treats": {"k_adj": 2, "cheat_neighbors": true, "aggr_type2": "max"},
                "unknown_rel": {"k_adj": 9}
            }"#,
            "inline",
            defaults.clone(),
            &rels,
        )
        .unwrap();

        let treats = overrides.for_relation(rels.id("treats").unwrap());
        assert_eq!(treats.k_adj, 2);
        assert!(treats.cheat_neighbors);
        assert_eq!(treats.across, CombineAcrossPaths::Max);
        assert_eq!(treats.max_num_programs, defaults.max_num_programs);
        assert_eq!(treats.per_path, defaults.per_path);

        assert_eq!(overrides.for_relation(rels.id("causes").unwrap()), &defaults);
    }

    #[test]
    fn override_with_bad_mode_is_invalid_configuration() {
        let rels = RelationVocab::from_labels(["treats"]);
        let result = RelationOverrides::from_json_str(
            r#"{"treats": {"aggr_type1": "product"}}"#,
            "inline",
            CbrConfig::default().relation_defaults(),
            &rels,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidConfiguration { .. })
        ));
    }
}
