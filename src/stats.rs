//! Path statistics: cluster assignments and prior/precision tables.
//!
//! Scores are looked up in an explicit order: the entity's cluster table,
//! then the fallback table (the single no-clustering cluster), then zero.
//! The tag on every [`ProgramScore`] records which step answered.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::program::Program;
use crate::vocab::{EntityId, RelationId};

/// Id of an entity cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

/// The cluster the fallback tables are keyed by.
pub const FALLBACK_CLUSTER: ClusterId = ClusterId(0);

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cluster:{}", self.0)
    }
}

/// Entity → cluster, precomputed offline.
#[derive(Debug, Clone, Default)]
pub struct ClusterAssignments {
    clusters: HashMap<EntityId, ClusterId>,
}

impl ClusterAssignments {
    pub fn new(clusters: HashMap<EntityId, ClusterId>) -> Self {
        Self { clusters }
    }

    /// Cluster of `entity`; unassigned entities use the fallback cluster.
    pub fn cluster_of(&self, entity: EntityId) -> ClusterId {
        self.clusters.get(&entity).copied().unwrap_or(FALLBACK_CLUSTER)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// cluster → relation → program → score.
#[derive(Debug, Clone, Default)]
pub struct StatsTable {
    scores: HashMap<ClusterId, HashMap<RelationId, HashMap<Program, f64>>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cluster: ClusterId, relation: RelationId, program: Program, score: f64) {
        self.scores
            .entry(cluster)
            .or_default()
            .entry(relation)
            .or_default()
            .insert(program, score);
    }

    pub fn get(&self, cluster: ClusterId, relation: RelationId, program: &Program) -> Option<f64> {
        self.scores.get(&cluster)?.get(&relation)?.get(program).copied()
    }

    /// Total number of (cluster, relation, program) entries.
    pub fn len(&self) -> usize {
        self.scores
            .values()
            .flat_map(HashMap::values)
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a program's score is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// `prior × precision`.
    #[default]
    PriorTimesPrecision,
    /// `precision` alone.
    PrecisionOnly,
}

/// Which lookup step produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    Cluster,
    Fallback,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgramScore {
    pub value: f64,
    pub source: ScoreSource,
}

/// Cluster-specific and fallback prior/precision tables.
#[derive(Debug, Clone, Default)]
pub struct ScoreTables {
    pub prior: StatsTable,
    pub precision: StatsTable,
    pub prior_fallback: StatsTable,
    pub precision_fallback: StatsTable,
}

impl ScoreTables {
    /// Score `program` for `relation` in `cluster`: cluster tables, else fallback, else 0.
    ///
    /// A step answers only if every table its formula needs has the entry.
    pub fn score(
        &self,
        cluster: ClusterId,
        relation: RelationId,
        program: &Program,
        mode: ScoreMode,
    ) -> ProgramScore {
        Self::formula(&self.prior, &self.precision, cluster, relation, program, mode)
            .map(|value| ProgramScore {
                value,
                source: ScoreSource::Cluster,
            })
            .or_else(|| {
                let fallback = Self::formula(
                    &self.prior_fallback,
                    &self.precision_fallback,
                    FALLBACK_CLUSTER,
                    relation,
                    program,
                    mode,
                )?;
                tracing::trace!(
                    cluster = %cluster,
                    relation = %relation,
                    "program missing from cluster statistics, using fallback"
                );
                Some(ProgramScore {
                    value: fallback,
                    source: ScoreSource::Fallback,
                })
            })
            .unwrap_or(ProgramScore {
                value: 0.0,
                source: ScoreSource::Default,
            })
    }

    fn formula(
        prior: &StatsTable,
        precision: &StatsTable,
        cluster: ClusterId,
        relation: RelationId,
        program: &Program,
        mode: ScoreMode,
    ) -> Option<f64> {
        let precision = precision.get(cluster, relation, program)?;
        match mode {
            ScoreMode::PrecisionOnly => Some(precision),
            ScoreMode::PriorTimesPrecision => {
                Some(prior.get(cluster, relation, program)? * precision)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(ids: &[u32]) -> Program {
        Program::new(ids.iter().map(|&id| RelationId(id)).collect())
    }

    fn tables() -> ScoreTables {
        let r = RelationId(0);
        let mut tables = ScoreTables::default();
        // Cluster 3 knows [1]; the fallback knows [1] and [2].
        tables.prior.insert(ClusterId(3), r, p(&[1]), 0.5);
        tables.precision.insert(ClusterId(3), r, p(&[1]), 0.8);
        tables.prior_fallback.insert(FALLBACK_CLUSTER, r, p(&[1]), 0.1);
        tables.precision_fallback.insert(FALLBACK_CLUSTER, r, p(&[1]), 0.1);
        tables.prior_fallback.insert(FALLBACK_CLUSTER, r, p(&[2]), 0.5);
        tables.precision_fallback.insert(FALLBACK_CLUSTER, r, p(&[2]), 0.6);
        // Cluster 3 has precision but no prior for [4].
        tables.precision.insert(ClusterId(3), r, p(&[4]), 0.9);
        tables
    }

    #[test]
    fn cluster_entry_wins() {
        let s = tables().score(ClusterId(3), RelationId(0), &p(&[1]), ScoreMode::PriorTimesPrecision);
        assert_eq!(s.source, ScoreSource::Cluster);
        assert!((s.value - 0.4).abs() < 1e-12);
    }

    #[test]
    fn missing_cluster_entry_falls_back() {
        let s = tables().score(ClusterId(3), RelationId(0), &p(&[2]), ScoreMode::PriorTimesPrecision);
        assert_eq!(s.source, ScoreSource::Fallback);
        assert!((s.value - 0.3).abs() < 1e-12);

        let s = tables().score(ClusterId(7), RelationId(0), &p(&[1]), ScoreMode::PrecisionOnly);
        assert_eq!(s.source, ScoreSource::Fallback);
        assert!((s.value - 0.1).abs() < 1e-12);
    }

    #[test]
    fn missing_everywhere_defaults_to_zero() {
        let s = tables().score(ClusterId(3), RelationId(0), &p(&[9]), ScoreMode::PriorTimesPrecision);
        assert_eq!(s.source, ScoreSource::Default);
        assert_eq!(s.value, 0.0);
    }

    #[test]
    fn partial_cluster_entry_depends_on_mode() {
        let t = tables();
        let precision_only = t.score(ClusterId(3), RelationId(0), &p(&[4]), ScoreMode::PrecisionOnly);
        assert_eq!(precision_only.source, ScoreSource::Cluster);
        assert!((precision_only.value - 0.9).abs() < 1e-12);

        let product = t.score(ClusterId(3), RelationId(0), &p(&[4]), ScoreMode::PriorTimesPrecision);
        assert_eq!(product.source, ScoreSource::Default);
    }

    #[test]
    fn unassigned_entities_use_fallback_cluster() {
        let clusters = ClusterAssignments::new(HashMap::from([(EntityId(1), ClusterId(4))]));
        assert_eq!(clusters.cluster_of(EntityId(1)), ClusterId(4));
        assert_eq!(clusters.cluster_of(EntityId(2)), FALLBACK_CLUSTER);
        assert_eq!(tables().prior.len(), 1);
    }
}
