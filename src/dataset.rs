//! Precomputed artifacts: layout on disk and loaders.
//!
//! Every artifact except the triple files exists in two encodings: `.json`
//! (serde_json) and `.bin` (bincode). The loader takes whichever is present,
//! preferring JSON. Labels are resolved against the vocabularies on load;
//! entries naming unknown labels are dropped with a debug log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{CbrConfig, Split};
use crate::error::ArtifactError;
use crate::graph::{Fact, TrainingSet};
use crate::neighbors::SimilarityIndex;
use crate::program::{LocalPath, PathPool, Program};
use crate::stats::{ClusterAssignments, ClusterId, ScoreTables, StatsTable};
use crate::vocab::{EntityId, EntityVocab, RelationId, RelationVocab, Vocab, VocabId};

/// Linkage threshold under which the fallback tables live.
pub const FALLBACK_LINKAGE: f64 = 0.0;

/// File locations for one dataset.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
    num_paths: usize,
    max_path_len: usize,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>, num_paths: usize, max_path_len: usize) -> Self {
        Self {
            root: root.into(),
            num_paths,
            max_path_len,
        }
    }

    pub fn from_config(config: &CbrConfig) -> Self {
        Self::new(
            config.dataset_dir(),
            config.num_paths_around_entities,
            config.max_path_len,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_vocab(&self) -> PathBuf {
        self.root.join("entity_vocab.json")
    }

    pub fn relation_vocab(&self) -> PathBuf {
        self.root.join("relation_vocab.json")
    }

    pub fn graph(&self) -> PathBuf {
        self.root.join("graph.txt")
    }

    pub fn dev(&self) -> PathBuf {
        self.root.join("dev.txt")
    }

    pub fn test(&self, file_name: Option<&str>) -> PathBuf {
        self.root.join(file_name.unwrap_or("test.txt"))
    }

    /// Stem of the similarity ranking (extension added on lookup).
    pub fn similarity(&self) -> PathBuf {
        self.root.join("ent_sim")
    }

    /// `linkage=0.8`, `linkage=0.0`, ...
    pub fn linkage_dir(&self, linkage: f64) -> PathBuf {
        self.root.join(format!("linkage={linkage:?}"))
    }

    pub fn cluster_assignments(&self, linkage: f64) -> PathBuf {
        self.linkage_dir(linkage).join("cluster_assignments")
    }

    pub fn prior_map(&self, linkage: f64) -> PathBuf {
        self.linkage_dir(linkage)
            .join("prior_maps")
            .join(format!("path_{}", self.num_paths))
            .join("path_prior_map")
    }

    pub fn precision_map(&self, linkage: f64) -> PathBuf {
        self.linkage_dir(linkage)
            .join("precision_maps")
            .join(format!("path_{}", self.num_paths))
            .join("precision_map")
    }

    pub fn path_pool(&self) -> PathBuf {
        self.root
            .join("subgraphs")
            .join(format!("paths_{}", self.num_paths))
            .join(format!("paths_{}_path_len_{}", self.num_paths, self.max_path_len))
    }
}

/// The existing `.json` or `.bin` file for an extensionless stem.
pub fn find_artifact(stem: &Path) -> Result<PathBuf, ArtifactError> {
    ["json", "bin"]
        .iter()
        .map(|ext| stem.with_extension(ext))
        .find(|path| path.is_file())
        .ok_or_else(|| ArtifactError::Missing {
            path: format!("{}.{{json,bin}}", stem.display()),
        })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ArtifactError::Missing {
            path: path.display().to_string(),
        },
        _ => ArtifactError::Io {
            path: path.display().to_string(),
            source: e,
        },
    })
}

/// Decode an artifact by extension: `.bin` is bincode, anything else JSON.
pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let bytes = read_bytes(path)?;
    let parse_error = |message: String| ArtifactError::Parse {
        path: path.display().to_string(),
        message,
    };
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("bin") => bincode::deserialize(&bytes).map_err(|e| parse_error(e.to_string())),
        _ => serde_json::from_slice(&bytes).map_err(|e| parse_error(e.to_string())),
    }
}

/// A tab-separated triple as written in the split files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledTriple {
    pub source: String,
    pub relation: String,
    pub target: String,
}

/// Read a `source\trelation\ttarget` file. Blank lines are skipped.
pub fn read_triples(path: &Path) -> Result<Vec<LabeledTriple>, ArtifactError> {
    let bytes = read_bytes(path)?;
    let content = String::from_utf8(bytes).map_err(|e| ArtifactError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut triples = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let &[source, relation, target] = fields.as_slice() else {
            return Err(ArtifactError::Malformed {
                path: path.display().to_string(),
                message: format!(
                    "line {}: expected 3 tab-separated fields, found {}",
                    line_no + 1,
                    fields.len()
                ),
            });
        };
        triples.push(LabeledTriple {
            source: source.to_string(),
            relation: relation.to_string(),
            target: target.to_string(),
        });
    }
    Ok(triples)
}

/// On-disk record of one scored path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPath {
    pub path: Vec<String>,
    pub score: f64,
}

/// On-disk shape of a prior or precision map.
pub type RawStatsMap = HashMap<u32, HashMap<String, Vec<ScoredPath>>>;

/// On-disk shape of a path pool: entity → paths of `(relation, entity)` hops.
pub type RawPathPool = HashMap<String, Vec<Vec<(String, String)>>>;

fn load_vocab<I: VocabId>(path: &Path) -> Result<Vocab<I>, ArtifactError> {
    let map: HashMap<String, u32> = read_artifact(path)?;
    Vocab::from_map(map, &path.display().to_string())
}

fn resolve_program(labels: &[String], relations: &RelationVocab) -> Option<Program> {
    labels
        .iter()
        .map(|label| relations.id(label))
        .collect::<Option<Vec<RelationId>>>()
        .filter(|relations| !relations.is_empty())
        .map(Program::new)
}

pub fn stats_table(raw: RawStatsMap, relations: &RelationVocab) -> StatsTable {
    let mut table = StatsTable::new();
    let mut skipped = 0usize;
    for (cluster, by_relation) in raw {
        for (label, paths) in by_relation {
            let Some(relation) = relations.id(&label) else {
                skipped += paths.len();
                continue;
            };
            for scored in paths {
                match resolve_program(&scored.path, relations) {
                    Some(program) => table.insert(ClusterId(cluster), relation, program, scored.score),
                    None => skipped += 1,
                }
            }
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "statistics entries with unknown relations dropped");
    }
    table
}

pub fn path_pool(raw: RawPathPool, entities: &EntityVocab, relations: &RelationVocab) -> PathPool {
    let mut pool = HashMap::with_capacity(raw.len());
    let mut skipped = 0usize;
    for (label, walks) in raw {
        let Some(start) = entities.id(&label) else {
            skipped += walks.len();
            continue;
        };
        let mut paths = Vec::with_capacity(walks.len());
        for walk in walks {
            let hops: Option<Vec<(RelationId, EntityId)>> = walk
                .iter()
                .map(|(rel, ent)| Some((relations.id(rel)?, entities.id(ent)?)))
                .collect();
            match hops {
                Some(hops) if !hops.is_empty() => {
                    let end = hops[hops.len() - 1].1;
                    paths.push(LocalPath {
                        program: Program::new(hops.into_iter().map(|(rel, _)| rel).collect()),
                        end,
                    });
                }
                _ => skipped += 1,
            }
        }
        pool.insert(start, paths);
    }
    if skipped > 0 {
        tracing::debug!(skipped, "pooled paths with unknown labels dropped");
    }
    PathPool::new(pool)
}

/// Everything a run reads from disk, loaded eagerly.
#[derive(Debug)]
pub struct Dataset {
    pub entities: EntityVocab,
    pub relations: RelationVocab,
    pub training: TrainingSet,
    /// Split triples exactly as written; sources may be unseen.
    pub dev: Vec<LabeledTriple>,
    pub test: Vec<LabeledTriple>,
    pub similarity: SimilarityIndex,
    pub clusters: ClusterAssignments,
    pub tables: ScoreTables,
    pub paths: PathPool,
}

impl Dataset {
    /// Load every artifact the config names. Fails on the first missing one.
    pub fn load(config: &CbrConfig) -> Result<Self, ArtifactError> {
        let layout = ArtifactLayout::from_config(config);
        let root = layout.root();
        if !root.is_dir() {
            return Err(ArtifactError::Missing {
                path: root.display().to_string(),
            });
        }
        tracing::info!(dataset = %root.display(), "loading artifacts");

        let entities: EntityVocab = load_vocab(&layout.entity_vocab())?;
        let relations = RelationVocab::new(load_vocab(&layout.relation_vocab())?);

        let graph = read_triples(&layout.graph())?;
        let training = training_set(&graph, &entities, &relations);
        let dev = read_triples(&layout.dev())?;
        let test = read_triples(&layout.test(config.test_file_name.as_deref()))?;

        let similarity = similarity_index(
            read_artifact(&find_artifact(&layout.similarity())?)?,
            &entities,
        );

        let clusters = cluster_assignments(
            read_artifact(&find_artifact(&layout.cluster_assignments(config.linkage))?)?,
            &entities,
        );

        let load_table = |stem: PathBuf| -> Result<StatsTable, ArtifactError> {
            Ok(stats_table(read_artifact(&find_artifact(&stem)?)?, &relations))
        };
        let tables = ScoreTables {
            prior: load_table(layout.prior_map(config.linkage))?,
            precision: load_table(layout.precision_map(config.linkage))?,
            prior_fallback: load_table(layout.prior_map(FALLBACK_LINKAGE))?,
            precision_fallback: load_table(layout.precision_map(FALLBACK_LINKAGE))?,
        };

        let paths = path_pool(
            read_artifact(&find_artifact(&layout.path_pool())?)?,
            &entities,
            &relations,
        );

        tracing::info!(
            entities = entities.len(),
            relations = relations.len(),
            facts = training.len(),
            dev = dev.len(),
            test = test.len(),
            clusters = clusters.len(),
            path_pools = paths.len(),
            "artifacts loaded"
        );

        Ok(Self {
            entities,
            relations,
            training,
            dev,
            test,
            similarity,
            clusters,
            tables,
            paths,
        })
    }

    /// Triples of the split selected for evaluation.
    pub fn eval_split(&self, split: Split) -> &[LabeledTriple] {
        match split {
            Split::Dev => &self.dev,
            Split::Test => &self.test,
        }
    }

    /// Every known `(source, relation, target)` across train, dev and test.
    pub fn all_known_triples(&self) -> impl Iterator<Item = (&str, &str, &str)> + '_ {
        let training = self.training.facts().iter().filter_map(|fact| {
            Some((
                self.entities.label(fact.source)?,
                self.relations.label(fact.relation)?,
                self.entities.label(fact.target)?,
            ))
        });
        let splits = self
            .dev
            .iter()
            .chain(&self.test)
            .map(|t| (t.source.as_str(), t.relation.as_str(), t.target.as_str()));
        training.chain(splits)
    }
}

pub fn training_set(
    triples: &[LabeledTriple],
    entities: &EntityVocab,
    relations: &RelationVocab,
) -> TrainingSet {
    let facts: Vec<Fact> = triples
        .iter()
        .filter_map(|t| {
            Some(Fact::new(
                entities.id(&t.source)?,
                relations.id(&t.relation)?,
                entities.id(&t.target)?,
            ))
        })
        .collect();
    let skipped = triples.len() - facts.len();
    if skipped > 0 {
        tracing::warn!(skipped, "training triples with unknown labels dropped");
    }
    TrainingSet::new(facts)
}

pub fn similarity_index(raw: HashMap<String, Vec<String>>, entities: &EntityVocab) -> SimilarityIndex {
    let ranked = raw
        .into_iter()
        .filter_map(|(label, similar)| {
            let entity = entities.id(&label)?;
            let similar = similar.iter().filter_map(|s| entities.id(s)).collect();
            Some((entity, similar))
        })
        .collect();
    SimilarityIndex::new(ranked)
}

pub fn cluster_assignments(raw: HashMap<String, u32>, entities: &EntityVocab) -> ClusterAssignments {
    let clusters = raw
        .into_iter()
        .filter_map(|(label, cluster)| Some((entities.id(&label)?, ClusterId(cluster))))
        .collect();
    ClusterAssignments::new(clusters)
}
