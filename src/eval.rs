//! Rank-based evaluation of predicted answers.
//!
//! Each gold answer of a query is ranked against the prediction list. In the
//! filtered setting, other known-true answers for the same (source, relation)
//! are skipped while counting, so predicting a different correct answer first
//! is not penalized. A gold answer missing from the predictions is a miss: it
//! adds nothing to MRR or any Hits@k.
//!
//! | Metric | Description |
//! |--------|-------------|
//! | MRR | Mean of 1/rank, 0 for misses |
//! | Hits@k | Fraction of gold answers with rank <= k |

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;

use crate::dataset::LabeledTriple;

/// 1-based position of `item` in `list`, `None` if absent.
pub fn rank_in_list<T: PartialEq>(item: &T, list: &[T]) -> Option<usize> {
    list.iter().position(|candidate| candidate == item).map(|i| i + 1)
}

/// 1-based rank of `gold`, skipping entries of `known` other than `gold` itself.
pub fn filtered_rank<T: Eq + Hash>(gold: &T, predictions: &[T], known: &HashSet<T>) -> Option<usize> {
    let mut rank = 0;
    for candidate in predictions {
        if candidate == gold {
            return Some(rank + 1);
        }
        if !known.contains(candidate) {
            rank += 1;
        }
    }
    None
}

/// Rank-based evaluation results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankMetrics {
    /// Mean Reciprocal Rank; misses count as 0.
    pub mrr: f64,
    pub hits_at_1: f64,
    pub hits_at_3: f64,
    pub hits_at_5: f64,
    pub hits_at_10: f64,
    /// Gold answers evaluated.
    pub num_answers: usize,
    /// Gold answers absent from the predictions.
    pub num_missed: usize,
}

impl RankMetrics {
    /// Compute metrics from per-answer ranks (`None` = not predicted).
    pub fn from_ranks(ranks: &[Option<usize>]) -> Self {
        if ranks.is_empty() {
            return Self::default();
        }

        let n = ranks.len() as f64;
        let hits = |k: usize| ranks.iter().flatten().filter(|&&r| r <= k).count() as f64 / n;
        let mrr = ranks.iter().flatten().map(|&r| 1.0 / r as f64).sum::<f64>() / n;

        Self {
            mrr,
            hits_at_1: hits(1),
            hits_at_3: hits(3),
            hits_at_5: hits(5),
            hits_at_10: hits(10),
            num_answers: ranks.len(),
            num_missed: ranks.iter().filter(|r| r.is_none()).count(),
        }
    }

    /// Merge metrics from disjoint evaluations, weighted by answer count.
    pub fn merge(metrics: &[Self]) -> Self {
        let total: usize = metrics.iter().map(|m| m.num_answers).sum();
        if total == 0 {
            return Self::default();
        }
        let weighted = |field: fn(&Self) -> f64| {
            metrics
                .iter()
                .map(|m| field(m) * m.num_answers as f64)
                .sum::<f64>()
                / total as f64
        };

        Self {
            mrr: weighted(|m: &RankMetrics| m.mrr),
            hits_at_1: weighted(|m: &RankMetrics| m.hits_at_1),
            hits_at_3: weighted(|m: &RankMetrics| m.hits_at_3),
            hits_at_5: weighted(|m: &RankMetrics| m.hits_at_5),
            hits_at_10: weighted(|m: &RankMetrics| m.hits_at_10),
            num_answers: total,
            num_missed: metrics.iter().map(|m| m.num_missed).sum(),
        }
    }

    /// Format as summary string.
    pub fn summary(&self) -> String {
        format!(
            "MRR: {:.4} | H@1: {:.4} | H@3: {:.4} | H@5: {:.4} | H@10: {:.4} (n={}, missed={})",
            self.mrr,
            self.hits_at_1,
            self.hits_at_3,
            self.hits_at_5,
            self.hits_at_10,
            self.num_answers,
            self.num_missed
        )
    }
}

/// One evaluation query: every gold answer of a (source, relation) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvalQuery {
    pub source: String,
    pub relation: String,
    pub gold: Vec<String>,
}

/// Group split triples into queries, in order of first appearance.
pub fn group_queries(triples: &[LabeledTriple]) -> Vec<EvalQuery> {
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    let mut queries: Vec<EvalQuery> = Vec::new();
    for t in triples {
        let key = (t.source.as_str(), t.relation.as_str());
        let slot = *index.entry(key).or_insert_with(|| {
            queries.push(EvalQuery {
                source: t.source.clone(),
                relation: t.relation.clone(),
                gold: Vec::new(),
            });
            queries.len() - 1
        });
        let gold = &mut queries[slot].gold;
        if !gold.contains(&t.target) {
            gold.push(t.target.clone());
        }
    }
    queries
}

/// Every known-true target of each (source, relation), by label.
#[derive(Debug, Clone, Default)]
pub struct KnownAnswers {
    answers: HashMap<(String, String), HashSet<String>>,
}

impl KnownAnswers {
    pub fn from_triples<'a>(triples: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> Self {
        let mut answers: HashMap<(String, String), HashSet<String>> = HashMap::new();
        for (source, relation, target) in triples {
            answers
                .entry((source.to_string(), relation.to_string()))
                .or_default()
                .insert(target.to_string());
        }
        Self { answers }
    }

    pub fn answers(&self, source: &str, relation: &str) -> impl Iterator<Item = &str> + '_ {
        self.answers
            .get(&(source.to_string(), relation.to_string()))
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}
