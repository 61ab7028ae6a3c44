//! Programs (relation paths) and their extraction from neighbor cases.
//!
//! A program is the relation sequence of a walk, e.g. `[has_target, target_of_inv]`.
//! Candidate programs come from the precomputed local path pool of each
//! neighbor: every pooled path that ends at one of the neighbor's known answers
//! explains that answer, and its relation sequence becomes a candidate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::graph::{LeakageMask, TrainingSet};
use crate::vocab::{EntityId, RelationId, RelationVocab};

/// An ordered relation path. Ordering and hashing are by the relation sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Program(Vec<RelationId>);

impl Program {
    pub fn new(relations: Vec<RelationId>) -> Self {
        Self(relations)
    }

    pub fn relations(&self) -> &[RelationId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The degenerate program `[relation]`, which just restates the query.
    pub fn is_query_relation(&self, relation: RelationId) -> bool {
        self.0.len() == 1 && self.0[0] == relation
    }

    pub fn starts_with(&self, relation: RelationId) -> bool {
        self.0.first() == Some(&relation)
    }

    /// Human-readable form, e.g. `treats -> causes_inv`.
    pub fn display(&self, relations: &RelationVocab) -> String {
        self.0
            .iter()
            .map(|&r| relations.resolve_label(r))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl From<Vec<RelationId>> for Program {
    fn from(relations: Vec<RelationId>) -> Self {
        Self(relations)
    }
}

/// A pooled walk starting at some entity.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPath {
    pub program: Program,
    /// Entity the walk ends at.
    pub end: EntityId,
}

/// Precomputed local paths around each entity.
#[derive(Debug, Clone, Default)]
pub struct PathPool {
    paths: HashMap<EntityId, Vec<LocalPath>>,
}

impl PathPool {
    pub fn new(paths: HashMap<EntityId, Vec<LocalPath>>) -> Self {
        Self { paths }
    }

    pub fn paths_from(&self, entity: EntityId) -> &[LocalPath] {
        self.paths.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Programs of pooled paths from `entity` to `target` with at most `max_len` hops.
    pub fn programs_to(
        &self,
        entity: EntityId,
        target: EntityId,
        max_len: usize,
    ) -> impl Iterator<Item = &Program> + '_ {
        self.paths_from(entity)
            .iter()
            .filter(move |path| path.end == target)
            .map(|path| &path.program)
            .filter(move |program| !program.is_empty() && program.len() <= max_len)
    }

    /// Number of entities with a pool.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Candidate programs gathered from a query's neighbors.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// One entry per explaining path; duplicates are kept for usage counts.
    pub programs: Vec<Program>,
    /// Neighbors that had no unmasked answer for the relation.
    pub neighbors_without_answers: usize,
}

pub struct ProgramExtractor<'a> {
    training: &'a TrainingSet,
    pool: &'a PathPool,
    max_path_len: usize,
}

impl<'a> ProgramExtractor<'a> {
    pub fn new(training: &'a TrainingSet, pool: &'a PathPool, max_path_len: usize) -> Self {
        Self {
            training,
            pool,
            max_path_len,
        }
    }

    /// Every program connecting a neighbor to one of its own `relation` answers.
    pub fn extract(
        &self,
        relation: RelationId,
        neighbors: &[EntityId],
        mask: &LeakageMask,
    ) -> Extraction {
        let mut extraction = Extraction::default();
        for &neighbor in neighbors {
            let answers = self.training.known_answers(neighbor, relation, mask);
            if answers.is_empty() {
                extraction.neighbors_without_answers += 1;
                continue;
            }
            for answer in answers {
                extraction.programs.extend(
                    self.pool
                        .programs_to(neighbor, answer, self.max_path_len)
                        .filter(|program| !program.is_query_relation(relation))
                        .cloned(),
                );
            }
        }
        extraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Fact;

    fn e(id: u32) -> EntityId {
        EntityId(id)
    }

    fn program(relations: &[RelationId]) -> Program {
        Program::new(relations.to_vec())
    }

    #[test]
    fn query_relation_program_is_degenerate() {
        let r = RelationId(0);
        assert!(program(&[r]).is_query_relation(r));
        assert!(!program(&[r, r]).is_query_relation(r));
        assert!(!program(&[RelationId(1)]).is_query_relation(r));
        assert!(program(&[r, RelationId(1)]).starts_with(r));
    }

    #[test]
    fn display_uses_labels() {
        let rels = RelationVocab::from_labels(["treats", "causes_inv"]);
        let p = program(&[rels.id("treats").unwrap(), rels.id("causes_inv").unwrap()]);
        assert_eq!(p.display(&rels), "treats -> causes_inv");
    }

    #[test]
    fn extracts_paths_ending_at_known_answers() {
        let rels = RelationVocab::from_labels(["treats", "binds", "targets", "causes"]);
        let treats = rels.id("treats").unwrap();
        let binds = rels.id("binds").unwrap();
        let targets = rels.id("targets").unwrap();
        let causes = rels.id("causes").unwrap();

        // Neighbor 1 treats 5; neighbor 2 treats nothing.
        let training = TrainingSet::new([
            Fact::new(e(1), treats, e(5)),
            Fact::new(e(2), causes, e(6)),
        ]);
        let pool = PathPool::new(HashMap::from([(
            e(1),
            vec![
                LocalPath {
                    program: program(&[binds, targets]),
                    end: e(5),
                },
                LocalPath {
                    program: program(&[treats]),
                    end: e(5),
                },
                LocalPath {
                    program: program(&[causes]),
                    end: e(6),
                },
                LocalPath {
                    program: program(&[binds, targets, causes, binds]),
                    end: e(5),
                },
            ],
        )]));

        let extractor = ProgramExtractor::new(&training, &pool, 3);
        let extraction = extractor.extract(treats, &[e(1), e(2)], &LeakageMask::empty());
        assert_eq!(extraction.programs, vec![program(&[binds, targets])]);
        assert_eq!(extraction.neighbors_without_answers, 1);
    }

    #[test]
    fn masked_answers_are_not_explained() {
        let rels = RelationVocab::from_labels(["treats", "binds"]);
        let treats = rels.id("treats").unwrap();
        let binds = rels.id("binds").unwrap();
        let training = TrainingSet::new([Fact::new(e(1), treats, e(5))]);
        let pool = PathPool::new(HashMap::from([(
            e(1),
            vec![LocalPath {
                program: program(&[binds]),
                end: e(5),
            }],
        )]));
        let mask = LeakageMask::for_query(e(1), treats, &[e(5)], &rels);
        let extraction = ProgramExtractor::new(&training, &pool, 3).extract(treats, &[e(1)], &mask);
        assert!(extraction.programs.is_empty());
        assert_eq!(extraction.neighbors_without_answers, 1);
    }
}
