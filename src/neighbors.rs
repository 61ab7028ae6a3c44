//! Neighbor retrieval: similar entities that already answer the query relation.
//!
//! Similarity rankings are precomputed offline; retrieval only filters them.
//! When the ranking yields nothing, the optional "cheat neighbor" fallback
//! samples from every entity known to have the relation instead.

use std::collections::HashMap;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::QueryError;
use crate::graph::{LeakageMask, TrainingSet};
use crate::vocab::{EntityId, EntityVocab, RelationId};

/// Precomputed similarity ranking: entity → similar entities, most similar first.
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    ranked: HashMap<EntityId, Vec<EntityId>>,
}

impl SimilarityIndex {
    pub fn new(ranked: HashMap<EntityId, Vec<EntityId>>) -> Self {
        Self { ranked }
    }

    /// The ranking for `entity`, or `None` if it was never indexed.
    pub fn similar_to(&self, entity: EntityId) -> Option<&[EntityId]> {
        self.ranked.get(&entity).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// Neighbors chosen for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    pub entities: Vec<EntityId>,
    /// Chosen by relation membership rather than similarity.
    pub from_fallback: bool,
}

pub struct NeighborRetriever<'a> {
    similarity: &'a SimilarityIndex,
    training: &'a TrainingSet,
    entities: Option<&'a EntityVocab>,
}

impl<'a> NeighborRetriever<'a> {
    pub fn new(similarity: &'a SimilarityIndex, training: &'a TrainingSet) -> Self {
        Self {
            similarity,
            training,
            entities: None,
        }
    }

    /// Name entities by label in errors instead of by id.
    pub fn with_labels(mut self, entities: &'a EntityVocab) -> Self {
        self.entities = Some(entities);
        self
    }

    fn unseen(&self, source: EntityId) -> QueryError {
        let label = match self.entities {
            Some(entities) => entities.resolve_label(source),
            None => source.to_string(),
        };
        QueryError::UnseenEntity { label }
    }

    /// Up to `k` entities most similar to `source` that have an unmasked `relation` fact.
    ///
    /// `source` itself is never returned.
    pub fn nearest_neighbors(
        &self,
        source: EntityId,
        relation: RelationId,
        k: usize,
        mask: &LeakageMask,
    ) -> Result<Vec<EntityId>, QueryError> {
        let ranked = self
            .similarity
            .similar_to(source)
            .ok_or_else(|| self.unseen(source))?;
        Ok(ranked
            .iter()
            .copied()
            .filter(|&candidate| candidate != source)
            .filter(|&candidate| self.training.has_answer(candidate, relation, mask))
            .take(k)
            .collect())
    }

    /// Similarity-based neighbors, falling back to relation members when enabled.
    ///
    /// An unseen `source` is an error only when the fallback is disabled.
    pub fn retrieve(
        &self,
        source: EntityId,
        relation: RelationId,
        k: usize,
        fallback: bool,
        mask: &LeakageMask,
        rng: &mut impl Rng,
    ) -> Result<Neighbors, QueryError> {
        let nearest = self.nearest_neighbors(source, relation, k, mask);
        match nearest {
            Ok(entities) if !entities.is_empty() => Ok(Neighbors {
                entities,
                from_fallback: false,
            }),
            Ok(_) | Err(QueryError::UnseenEntity { .. }) if fallback => {
                let entities = self.fallback_neighbors(source, relation, k, rng);
                tracing::debug!(
                    source = %source,
                    relation = %relation,
                    sampled = entities.len(),
                    "no similar neighbors, using relation members"
                );
                Ok(Neighbors {
                    entities,
                    from_fallback: true,
                })
            }
            Ok(entities) => Ok(Neighbors {
                entities,
                from_fallback: false,
            }),
            Err(err) => Err(err),
        }
    }

    /// All relation members if there are at most `k`, else `k` drawn without replacement.
    fn fallback_neighbors(
        &self,
        source: EntityId,
        relation: RelationId,
        k: usize,
        rng: &mut impl Rng,
    ) -> Vec<EntityId> {
        let candidates: Vec<EntityId> = self
            .training
            .subjects_with(relation)
            .iter()
            .copied()
            .filter(|&candidate| candidate != source)
            .collect();
        if candidates.len() <= k {
            candidates
        } else {
            candidates.choose_multiple(rng, k).copied().collect()
        }
    }
}
