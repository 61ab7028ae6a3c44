//! Adjacency bank: one sparse entity×entity matrix per relation.
//!
//! Each relation is stored once in CSR form together with its transpose, so a
//! hop along `r` and a hop along `r_inv` both read a contiguous row. Program
//! execution is repeated sparse vector × matrix products starting from a
//! one-hot vector at the source entity; the resulting weights are walk counts.
//!
//! Queries read the bank through an [`AdjacencyView`] that skips the edges of a
//! [`LeakageMask`]. For callers that really want to edit the bank in place,
//! [`AdjacencyBank::remove_facts`] / [`AdjacencyBank::restore_facts`] form an
//! exact transaction: only stored values are zeroed and put back, the sparsity
//! structure never changes.

use std::collections::{BTreeMap, HashMap};

use crate::vocab::{EntityId, Orientation, RelationId, RelationVocab, VocabId};

use super::{Edge, Fact, LeakageMask};

/// Sparse vector of walk weights over entities, ordered by entity id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityWeights(BTreeMap<EntityId, f64>);

impl EntityWeights {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn one_hot(entity: EntityId) -> Self {
        Self(BTreeMap::from([(entity, 1.0)]))
    }

    fn add(&mut self, entity: EntityId, weight: f64) {
        *self.0.entry(entity).or_insert(0.0) += weight;
    }

    /// True when no entity is reachable.
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, entity: EntityId) -> f64 {
        self.0.get(&entity).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, f64)> + '_ {
        self.0.iter().map(|(&entity, &weight)| (entity, weight))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(EntityId, f64)> for EntityWeights {
    fn from_iter<T: IntoIterator<Item = (EntityId, f64)>>(iter: T) -> Self {
        let mut weights = Self::zero();
        for (entity, weight) in iter {
            weights.add(entity, weight);
        }
        weights
    }
}

/// Compressed sparse row matrix with 0/1 entries.
#[derive(Debug, Clone, PartialEq)]
struct CsrMatrix {
    row_ptr: Vec<usize>,
    col_idx: Vec<EntityId>,
    values: Vec<f64>,
}

impl CsrMatrix {
    fn from_entries(num_rows: usize, mut entries: Vec<(EntityId, EntityId)>) -> Self {
        entries.sort_unstable();
        entries.dedup();

        let mut row_ptr = vec![0; num_rows + 1];
        let mut col_idx = Vec::with_capacity(entries.len());
        for (row, col) in entries {
            row_ptr[row.index() + 1] += 1;
            col_idx.push(col);
        }
        for i in 0..num_rows {
            row_ptr[i + 1] += row_ptr[i];
        }
        let values = vec![1.0; col_idx.len()];

        Self {
            row_ptr,
            col_idx,
            values,
        }
    }

    fn row(&self, row: EntityId) -> impl Iterator<Item = (EntityId, f64)> + '_ {
        let range = match (self.row_ptr.get(row.index()), self.row_ptr.get(row.index() + 1)) {
            (Some(&start), Some(&end)) => start..end,
            _ => 0..0,
        };
        self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    fn position(&self, row: EntityId, col: EntityId) -> Option<usize> {
        let start = *self.row_ptr.get(row.index())?;
        let end = *self.row_ptr.get(row.index() + 1)?;
        self.col_idx[start..end]
            .binary_search(&col)
            .ok()
            .map(|offset| start + offset)
    }

    fn nnz(&self) -> usize {
        self.values.iter().filter(|&&v| v != 0.0).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RelationMatrix {
    forward: CsrMatrix,
    backward: CsrMatrix,
}

impl RelationMatrix {
    fn set(&mut self, edge: &Edge, value: f64) -> Option<f64> {
        let pos = self.forward.position(edge.row, edge.col)?;
        let previous = self.forward.values[pos];
        self.forward.values[pos] = value;
        if let Some(back) = self.backward.position(edge.col, edge.row) {
            self.backward.values[back] = value;
        }
        Some(previous)
    }
}

/// Stored values zeroed by [`AdjacencyBank::remove_facts`].
#[derive(Debug, Clone, Default)]
#[must_use = "removed facts must be handed back to restore_facts"]
pub struct RemovedFacts {
    entries: Vec<(Edge, f64)>,
}

impl RemovedFacts {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-relation sparse adjacency matrices built from the training facts.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyBank {
    num_entities: usize,
    matrices: HashMap<RelationId, RelationMatrix>,
    orientations: Vec<Orientation>,
}

impl AdjacencyBank {
    /// Build the bank in one pass over the facts.
    ///
    /// Inverse facts land in their base relation's matrix, so `(a, r, b)` and
    /// `(b, r_inv, a)` set the same entry. Facts naming an entity outside
    /// `0..num_entities` are dropped.
    pub fn build(facts: &[Fact], num_entities: usize, relations: &RelationVocab) -> Self {
        let mut entries: HashMap<RelationId, Vec<(EntityId, EntityId)>> = HashMap::new();
        let mut dropped = 0usize;
        for fact in facts {
            if fact.source.index() >= num_entities || fact.target.index() >= num_entities {
                dropped += 1;
                continue;
            }
            let edge = Edge::of(fact, relations);
            entries
                .entry(edge.relation)
                .or_default()
                .push((edge.row, edge.col));
        }
        if dropped > 0 {
            tracing::warn!(dropped, "facts reference entities outside the vocabulary");
        }

        let matrices: HashMap<RelationId, RelationMatrix> = entries
            .into_iter()
            .map(|(relation, pairs)| {
                let transposed = pairs.iter().map(|&(row, col)| (col, row)).collect();
                let matrix = RelationMatrix {
                    forward: CsrMatrix::from_entries(num_entities, pairs),
                    backward: CsrMatrix::from_entries(num_entities, transposed),
                };
                (relation, matrix)
            })
            .collect();

        tracing::info!(
            relations = matrices.len(),
            entities = num_entities,
            "built sparse adjacency matrices"
        );

        Self {
            num_entities,
            matrices,
            orientations: relations.orientations().to_vec(),
        }
    }

    fn orientation(&self, relation: RelationId) -> Orientation {
        self.orientations
            .get(relation.index())
            .copied()
            .unwrap_or(Orientation {
                base: relation,
                inverse: false,
            })
    }

    /// Read access excluding the edges hidden by `mask`.
    pub fn view<'a>(&'a self, mask: &'a LeakageMask) -> AdjacencyView<'a> {
        AdjacencyView {
            bank: self,
            mask: Some(mask),
        }
    }

    /// Execute a relation path on the unmasked bank.
    pub fn execute_program(&self, source: EntityId, path: &[RelationId]) -> EntityWeights {
        AdjacencyView {
            bank: self,
            mask: None,
        }
        .execute(source, path)
    }

    /// Whether a stored, non-removed edge exists.
    pub fn contains(&self, edge: &Edge) -> bool {
        self.matrices
            .get(&edge.relation)
            .and_then(|m| m.forward.position(edge.row, edge.col).map(|p| m.forward.values[p]))
            .is_some_and(|value| value != 0.0)
    }

    /// Zero the given edges in place. Edges that are absent or already removed are ignored.
    pub fn remove_facts<'e>(&mut self, edges: impl IntoIterator<Item = &'e Edge>) -> RemovedFacts {
        let mut removed = RemovedFacts::default();
        for edge in edges {
            let Some(matrix) = self.matrices.get_mut(&edge.relation) else {
                continue;
            };
            match matrix.forward.position(edge.row, edge.col) {
                Some(pos) if matrix.forward.values[pos] != 0.0 => {
                    if let Some(previous) = matrix.set(edge, 0.0) {
                        removed.entries.push((*edge, previous));
                    }
                }
                _ => {}
            }
        }
        removed
    }

    /// Put back exactly what [`remove_facts`](Self::remove_facts) took out.
    pub fn restore_facts(&mut self, removed: RemovedFacts) {
        for (edge, value) in removed.entries.into_iter().rev() {
            if let Some(matrix) = self.matrices.get_mut(&edge.relation) {
                matrix.set(&edge, value);
            }
        }
    }

    pub fn num_entities(&self) -> usize {
        self.num_entities
    }

    /// Number of stored non-zero entries across all relations.
    pub fn nnz(&self) -> usize {
        self.matrices.values().map(|m| m.forward.nnz()).sum()
    }
}

/// Masked read access to an [`AdjacencyBank`].
#[derive(Clone, Copy)]
pub struct AdjacencyView<'a> {
    bank: &'a AdjacencyBank,
    mask: Option<&'a LeakageMask>,
}

impl AdjacencyView<'_> {
    /// Walk `path` from `source`, returning the weight of each reachable entity.
    ///
    /// Returns the zero vector as soon as an intermediate frontier is empty.
    pub fn execute(&self, source: EntityId, path: &[RelationId]) -> EntityWeights {
        if source.index() >= self.bank.num_entities {
            return EntityWeights::zero();
        }
        let mut current = EntityWeights::one_hot(source);
        for &relation in path {
            current = self.step(&current, relation);
            if current.is_zero() {
                break;
            }
        }
        current
    }

    fn step(&self, frontier: &EntityWeights, relation: RelationId) -> EntityWeights {
        let orientation = self.bank.orientation(relation);
        let Some(matrix) = self.bank.matrices.get(&orientation.base) else {
            return EntityWeights::zero();
        };
        let csr = if orientation.inverse {
            &matrix.backward
        } else {
            &matrix.forward
        };

        let mut next = EntityWeights::zero();
        for (entity, weight) in frontier.iter() {
            for (neighbor, value) in csr.row(entity) {
                if value == 0.0 {
                    continue;
                }
                if let Some(mask) = self.mask {
                    let edge = if orientation.inverse {
                        Edge {
                            relation: orientation.base,
                            row: neighbor,
                            col: entity,
                        }
                    } else {
                        Edge {
                            relation: orientation.base,
                            row: entity,
                            col: neighbor,
                        }
                    };
                    if mask.hides_edge(&edge) {
                        continue;
                    }
                }
                next.add(neighbor, weight * value);
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(id: u32) -> EntityId {
        EntityId(id)
    }

    /// 0 --treats--> 1, 0 --treats--> 2, 3 --treats--> 1, 1 --causes--> 4, 2 --causes--> 4
    fn fixture() -> (AdjacencyBank, RelationVocab, Vec<Fact>) {
        let rels = RelationVocab::from_labels(["treats", "treats_inv", "causes"]);
        let treats = rels.id("treats").unwrap();
        let causes = rels.id("causes").unwrap();
        let facts = vec![
            Fact::new(e(0), treats, e(1)),
            Fact::new(e(0), treats, e(2)),
            Fact::new(e(3), treats, e(1)),
            Fact::new(e(1), causes, e(4)),
            Fact::new(e(2), causes, e(4)),
        ];
        (AdjacencyBank::build(&facts, 5, &rels), rels, facts)
    }

    #[test]
    fn single_hop_reaches_targets() {
        let (bank, rels, _) = fixture();
        let treats = rels.id("treats").unwrap();
        let result = bank.execute_program(e(0), &[treats]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(e(1)), 1.0);
        assert_eq!(result.get(e(2)), 1.0);
    }

    #[test]
    fn walk_counts_accumulate() {
        let (bank, rels, _) = fixture();
        let treats = rels.id("treats").unwrap();
        let causes = rels.id("causes").unwrap();
        let result = bank.execute_program(e(0), &[treats, causes]);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(e(4)), 2.0);
    }

    #[test]
    fn inverse_hop_uses_transpose() {
        let (bank, rels, _) = fixture();
        let treats = rels.id("treats").unwrap();
        let treats_inv = rels.id("treats_inv").unwrap();
        // Who else treats what 0 treats?
        let result = bank.execute_program(e(0), &[treats, treats_inv]);
        assert_eq!(result.get(e(0)), 2.0);
        assert_eq!(result.get(e(3)), 1.0);
    }

    #[test]
    fn dead_end_returns_zero_vector() {
        let (bank, rels, _) = fixture();
        let causes = rels.id("causes").unwrap();
        let treats = rels.id("treats").unwrap();
        assert!(bank.execute_program(e(4), &[causes]).is_zero());
        assert!(bank.execute_program(e(0), &[causes, treats]).is_zero());
        assert!(bank.execute_program(e(99), &[treats]).is_zero());
    }

    #[test]
    fn masked_view_skips_hidden_edges() {
        let (bank, rels, _) = fixture();
        let treats = rels.id("treats").unwrap();
        let treats_inv = rels.id("treats_inv").unwrap();
        let mask = LeakageMask::for_query(e(0), treats, &[e(1)], &rels);
        let view = bank.view(&mask);

        let forward = view.execute(e(0), &[treats]);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward.get(e(2)), 1.0);

        // The inverse direction is hidden too.
        let backward = view.execute(e(1), &[treats_inv]);
        assert_eq!(backward.len(), 1);
        assert_eq!(backward.get(e(3)), 1.0);
    }

    #[test]
    fn remove_then_restore_is_bit_identical() {
        let (mut bank, rels, facts) = fixture();
        let before = bank.clone();
        let edges: Vec<Edge> = facts[..2].iter().map(|f| Edge::of(f, &rels)).collect();

        let removed = bank.remove_facts(&edges);
        assert_eq!(removed.len(), 2);
        assert_ne!(bank, before);
        assert_eq!(bank.nnz(), before.nnz() - 2);
        assert!(!bank.contains(&edges[0]));
        let treats = rels.id("treats").unwrap();
        assert!(bank.execute_program(e(0), &[treats]).is_zero());

        bank.restore_facts(removed);
        assert_eq!(bank, before);
    }

    #[test]
    fn removing_twice_only_records_once() {
        let (mut bank, rels, facts) = fixture();
        let before = bank.clone();
        let edge = Edge::of(&facts[0], &rels);
        let first = bank.remove_facts([&edge, &edge]);
        assert_eq!(first.len(), 1);
        let second = bank.remove_facts([&edge]);
        assert!(second.is_empty());
        bank.restore_facts(second);
        bank.restore_facts(first);
        assert_eq!(bank, before);
    }
}
