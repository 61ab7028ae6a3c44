//! Training facts and the per-query leakage overlay.
//!
//! - [`TrainingSet`]: (subject, relation) → known answers, and relation → subjects
//! - [`LeakageMask`]: the gold edges of one query, hidden from every lookup
//! - [`adjacency::AdjacencyBank`]: sparse per-relation matrices for program execution
//!
//! The training data itself is never mutated while queries run; each query
//! carries its own mask, so queries can be evaluated in any order or in parallel.

pub mod adjacency;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::vocab::{EntityId, RelationId, RelationVocab};

/// A directed labeled edge `(source, relation, target)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fact {
    pub source: EntityId,
    pub relation: RelationId,
    pub target: EntityId,
}

impl Fact {
    pub fn new(source: EntityId, relation: RelationId, target: EntityId) -> Self {
        Self {
            source,
            relation,
            target,
        }
    }
}

/// A fact in storage orientation: inverse facts are flipped onto their base relation.
///
/// `(a, r, b)` and `(b, r_inv, a)` map to the same edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub relation: RelationId,
    pub row: EntityId,
    pub col: EntityId,
}

impl Edge {
    pub fn of(fact: &Fact, relations: &RelationVocab) -> Self {
        let orientation = relations.orientation(fact.relation);
        if orientation.inverse {
            Self {
                relation: orientation.base,
                row: fact.target,
                col: fact.source,
            }
        } else {
            Self {
                relation: orientation.base,
                row: fact.source,
                col: fact.target,
            }
        }
    }
}

/// Training facts indexed for neighbor retrieval and program extraction.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    /// (subject, relation) → answers, in file order without duplicates.
    answers: HashMap<(EntityId, RelationId), Vec<EntityId>>,
    /// relation → subjects having at least one fact with it, ascending.
    subjects: HashMap<RelationId, Vec<EntityId>>,
    facts: Vec<Fact>,
}

impl TrainingSet {
    pub fn new(facts: impl IntoIterator<Item = Fact>) -> Self {
        let mut answers: HashMap<(EntityId, RelationId), Vec<EntityId>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for fact in facts {
            if !seen.insert(fact) {
                continue;
            }
            answers
                .entry((fact.source, fact.relation))
                .or_default()
                .push(fact.target);
            unique.push(fact);
        }

        let mut subjects: HashMap<RelationId, Vec<EntityId>> = HashMap::new();
        for &(source, relation) in answers.keys() {
            subjects.entry(relation).or_default().push(source);
        }
        for list in subjects.values_mut() {
            list.sort_unstable();
        }

        Self {
            answers,
            subjects,
            facts: unique,
        }
    }

    /// All training answers of `(subject, relation)`, ignoring any mask.
    pub fn answers(&self, subject: EntityId, relation: RelationId) -> &[EntityId] {
        self.answers
            .get(&(subject, relation))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Answers of `(subject, relation)` that survive the query's leakage mask.
    pub fn known_answers(
        &self,
        subject: EntityId,
        relation: RelationId,
        mask: &LeakageMask,
    ) -> Vec<EntityId> {
        self.answers(subject, relation)
            .iter()
            .copied()
            .filter(|&target| !mask.hides(&Fact::new(subject, relation, target)))
            .collect()
    }

    /// Whether `(subject, relation)` has at least one unmasked answer.
    pub fn has_answer(&self, subject: EntityId, relation: RelationId, mask: &LeakageMask) -> bool {
        self.answers(subject, relation)
            .iter()
            .any(|&target| !mask.hides(&Fact::new(subject, relation, target)))
    }

    /// Every entity that is the subject of some `relation` fact.
    pub fn subjects_with(&self, relation: RelationId) -> &[EntityId] {
        self.subjects
            .get(&relation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// The facts a query must not see: `(e1, r, g)` and `(g, r_inv, e1)` for each gold `g`.
#[derive(Debug, Clone, Default)]
pub struct LeakageMask {
    facts: HashSet<Fact>,
    edges: HashSet<Edge>,
}

impl LeakageMask {
    /// A mask hiding nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn for_query(
        source: EntityId,
        relation: RelationId,
        gold: &[EntityId],
        relations: &RelationVocab,
    ) -> Self {
        let inverse = relations.inverse_of(relation);
        let mut facts = HashSet::with_capacity(gold.len() * 2);
        for &answer in gold {
            facts.insert(Fact::new(source, relation, answer));
            if let Some(inverse) = inverse {
                facts.insert(Fact::new(answer, inverse, source));
            }
        }
        let edges = facts.iter().map(|fact| Edge::of(fact, relations)).collect();
        Self { facts, edges }
    }

    pub fn hides(&self, fact: &Fact) -> bool {
        !self.facts.is_empty() && self.facts.contains(fact)
    }

    pub fn hides_edge(&self, edge: &Edge) -> bool {
        !self.edges.is_empty() && self.edges.contains(edge)
    }

    /// Hidden edges in storage orientation.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}
