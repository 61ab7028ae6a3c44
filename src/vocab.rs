//! Entity and relation vocabularies: bidirectional label ↔ ID mapping.
//!
//! Ids are dense (`0..len`) so they double as row/column indices of the
//! per-relation adjacency matrices. Relations additionally know their
//! inverse: `x_inv` is the inverse of `x` whenever both labels exist.

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

/// Suffix marking the inverse of a relation label.
pub const INVERSE_SUFFIX: &str = "_inv";

/// Dense index of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(pub u32);

/// Dense index of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RelationId(pub u32);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ent:{}", self.0)
    }
}

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rel:{}", self.0)
    }
}

/// Conversion between a typed id and its dense index.
pub trait VocabId: Copy {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

impl VocabId for EntityId {
    fn from_index(index: usize) -> Self {
        EntityId(index as u32)
    }
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl VocabId for RelationId {
    fn from_index(index: usize) -> Self {
        RelationId(index as u32)
    }
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bidirectional vocabulary mapping labels to dense ids.
#[derive(Debug, Clone)]
pub struct Vocab<I> {
    /// Forward map: dense id → label (source of truth).
    labels: Vec<String>,
    /// Reverse map: label → dense id.
    ids: HashMap<String, u32>,
    _id: PhantomData<I>,
}

impl<I: VocabId> Vocab<I> {
    /// Build a vocabulary assigning ids in iteration order, skipping duplicates.
    pub fn from_labels<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        let mut vocab = Self {
            labels: Vec::new(),
            ids: HashMap::new(),
            _id: PhantomData,
        };
        for label in labels {
            vocab.intern(label.into());
        }
        vocab
    }

    /// Build a vocabulary from an explicit `{label: id}` map.
    ///
    /// Ids must be dense: every value in `0..map.len()` exactly once.
    pub fn from_map(map: HashMap<String, u32>, origin: &str) -> Result<Self, ArtifactError> {
        let mut labels: Vec<Option<String>> = vec![None; map.len()];
        for (label, id) in &map {
            let slot = labels
                .get_mut(*id as usize)
                .ok_or_else(|| ArtifactError::Malformed {
                    path: origin.to_string(),
                    message: format!("id {id} for \"{label}\" is out of range 0..{}", map.len()),
                })?;
            if slot.is_some() {
                return Err(ArtifactError::Malformed {
                    path: origin.to_string(),
                    message: format!("id {id} is assigned to more than one label"),
                });
            }
            *slot = Some(label.clone());
        }
        Ok(Self {
            labels: labels.into_iter().flatten().collect(),
            ids: map,
            _id: PhantomData,
        })
    }

    fn intern(&mut self, label: String) -> I {
        if let Some(&id) = self.ids.get(&label) {
            return I::from_index(id as usize);
        }
        let id = self.labels.len() as u32;
        self.ids.insert(label.clone(), id);
        self.labels.push(label);
        I::from_index(id as usize)
    }

    /// Look up an id by label.
    pub fn id(&self, label: &str) -> Option<I> {
        self.ids.get(label).map(|&id| I::from_index(id as usize))
    }

    /// Look up a label by id.
    pub fn label(&self, id: I) -> Option<&str> {
        self.labels.get(id.index()).map(String::as_str)
    }

    /// Label for display, falling back to the raw index.
    pub fn resolve_label(&self, id: I) -> String {
        self.label(id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", id.index()))
    }

    /// All ids in index order.
    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        (0..self.labels.len()).map(I::from_index)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub type EntityVocab = Vocab<EntityId>;

/// How a relation hop maps onto a stored adjacency matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Orientation {
    /// Relation whose matrix stores the edges.
    pub base: RelationId,
    /// Walk the stored matrix backwards (transposed).
    pub inverse: bool,
}

/// Relation vocabulary with inverse-relation resolution.
#[derive(Debug, Clone)]
pub struct RelationVocab {
    vocab: Vocab<RelationId>,
    inverses: Vec<Option<RelationId>>,
    orientations: Vec<Orientation>,
}

impl RelationVocab {
    pub fn new(vocab: Vocab<RelationId>) -> Self {
        let mut inverses = Vec::with_capacity(vocab.len());
        let mut orientations = Vec::with_capacity(vocab.len());
        for id in vocab.ids() {
            let label = vocab.label(id).unwrap_or_default();
            let (partner, is_inverse) = match label.strip_suffix(INVERSE_SUFFIX) {
                Some(base) => (vocab.id(base), true),
                None => (vocab.id(&format!("{label}{INVERSE_SUFFIX}")), false),
            };
            inverses.push(partner);
            orientations.push(match partner {
                Some(base) if is_inverse => Orientation { base, inverse: true },
                _ => Orientation {
                    base: id,
                    inverse: false,
                },
            });
        }
        Self {
            vocab,
            inverses,
            orientations,
        }
    }

    pub fn from_labels<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self::new(Vocab::from_labels(labels))
    }

    /// The inverse relation, if the vocabulary defines one.
    pub fn inverse_of(&self, relation: RelationId) -> Option<RelationId> {
        self.inverses.get(relation.index()).copied().flatten()
    }

    /// Where the edges of `relation` are stored.
    pub fn orientation(&self, relation: RelationId) -> Orientation {
        self.orientations
            .get(relation.index())
            .copied()
            .unwrap_or(Orientation {
                base: relation,
                inverse: false,
            })
    }

    pub(crate) fn orientations(&self) -> &[Orientation] {
        &self.orientations
    }

    pub fn id(&self, label: &str) -> Option<RelationId> {
        self.vocab.id(label)
    }

    pub fn label(&self, id: RelationId) -> Option<&str> {
        self.vocab.label(id)
    }

    pub fn resolve_label(&self, id: RelationId) -> String {
        self.vocab.resolve_label(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = RelationId> + '_ {
        self.vocab.ids()
    }

    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_resolve_both_ways() {
        let vocab = EntityVocab::from_labels(["aspirin", "headache", "aspirin"]);
        assert_eq!(vocab.len(), 2);
        let aspirin = vocab.id("aspirin").unwrap();
        assert_eq!(vocab.label(aspirin), Some("aspirin"));
        assert_eq!(vocab.id("ibuprofen"), None);
        assert_eq!(vocab.resolve_label(EntityId(99)), "#99");
    }

    #[test]
    fn from_map_rejects_sparse_ids() {
        let map: HashMap<String, u32> = [("a".to_string(), 0), ("b".to_string(), 5)].into();
        assert!(EntityVocab::from_map(map, "entity_vocab.json").is_err());

        let map: HashMap<String, u32> = [("a".to_string(), 1), ("b".to_string(), 0)].into();
        let vocab = EntityVocab::from_map(map, "entity_vocab.json").unwrap();
        assert_eq!(vocab.label(EntityId(0)), Some("b"));
    }

    #[test]
    fn inverse_relations_share_a_base() {
        let rels = RelationVocab::from_labels(["treats", "treats_inv", "causes"]);
        let treats = rels.id("treats").unwrap();
        let treats_inv = rels.id("treats_inv").unwrap();
        let causes = rels.id("causes").unwrap();

        assert_eq!(rels.inverse_of(treats), Some(treats_inv));
        assert_eq!(rels.inverse_of(treats_inv), Some(treats));
        assert_eq!(rels.inverse_of(causes), None);

        assert_eq!(
            rels.orientation(treats_inv),
            Orientation {
                base: treats,
                inverse: true
            }
        );
        assert!(!rels.orientation(treats).inverse);
        assert!(!rels.orientation(causes).inverse);
    }

    #[test]
    fn dangling_inverse_label_is_its_own_base() {
        let rels = RelationVocab::from_labels(["orphan_inv"]);
        let orphan = rels.id("orphan_inv").unwrap();
        assert_eq!(rels.inverse_of(orphan), None);
        assert_eq!(rels.orientation(orphan).base, orphan);
    }
}
