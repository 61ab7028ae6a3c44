//! Answer aggregation: merge per-program entity vectors into one ranking.
//!
//! Two stages. [`CombinePerPath`] turns an entity's weight inside one program
//! into a contribution; [`CombineAcrossPaths`] folds all of an entity's
//! contributions into a score.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::execute::ProgramAnswer;
use crate::vocab::EntityId;

/// Per-program contribution of a reachable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CombinePerPath {
    /// The path weight, however many walks reach the entity.
    #[default]
    None,
    /// The path weight times the entity's walk count.
    Sum,
}

/// Fold of an entity's contributions across programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CombineAcrossPaths {
    #[default]
    Sum,
    /// Highest contribution; ties broken by the remaining contributions.
    Max,
    NoisyOr,
    LogSumExp,
}

impl CombinePerPath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sum => "sum",
        }
    }
}

impl CombineAcrossPaths {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::NoisyOr => "noisy_or",
            Self::LogSumExp => "logsumexp",
        }
    }
}

impl FromStr for CombinePerPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "sum" => Ok(Self::Sum),
            other => Err(ConfigError::InvalidConfiguration {
                setting: "aggr_type1".into(),
                value: other.into(),
                expected: "aggr_type1 must be one of: none, sum".into(),
            }),
        }
    }
}

impl FromStr for CombineAcrossPaths {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "noisy_or" => Ok(Self::NoisyOr),
            "logsumexp" => Ok(Self::LogSumExp),
            other => Err(ConfigError::InvalidConfiguration {
                setting: "aggr_type2".into(),
                value: other.into(),
                expected: "aggr_type2 must be one of: sum, max, noisy_or, logsumexp".into(),
            }),
        }
    }
}

impl TryFrom<String> for CombinePerPath {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for CombineAcrossPaths {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CombinePerPath> for String {
    fn from(mode: CombinePerPath) -> Self {
        mode.as_str().to_string()
    }
}

impl From<CombineAcrossPaths> for String {
    fn from(mode: CombineAcrossPaths) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for CombinePerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CombineAcrossPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate answer and how it scored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedAnswer {
    pub entity: EntityId,
    pub score: f64,
    /// Per-program contributions, highest first.
    pub contributions: Vec<f64>,
}

/// Rank every entity reached by at least one program, best first.
///
/// Equal scores are ordered by ascending entity id, except under
/// [`CombineAcrossPaths::Max`], where the full descending contribution lists
/// are compared lexicographically first.
pub fn aggregate(
    answers: &[ProgramAnswer],
    per_path: CombinePerPath,
    across: CombineAcrossPaths,
) -> Vec<RankedAnswer> {
    let mut contributions: BTreeMap<EntityId, Vec<f64>> = BTreeMap::new();
    for answer in answers {
        for (entity, walks) in answer.entities.iter() {
            let contribution = match per_path {
                CombinePerPath::None => answer.path_weight,
                CombinePerPath::Sum => answer.path_weight * walks,
            };
            contributions.entry(entity).or_default().push(contribution);
        }
    }

    let mut ranked: Vec<RankedAnswer> = contributions
        .into_iter()
        .map(|(entity, mut values)| {
            values.sort_by(|a, b| b.total_cmp(a));
            let score = fold(&values, across);
            RankedAnswer {
                entity,
                score,
                contributions: values,
            }
        })
        .collect();

    match across {
        CombineAcrossPaths::Max => {
            ranked.sort_by(|a, b| descending_lexicographic(&a.contributions, &b.contributions))
        }
        _ => ranked.sort_by(|a, b| b.score.total_cmp(&a.score)),
    }
    ranked
}

fn fold(values: &[f64], across: CombineAcrossPaths) -> f64 {
    match across {
        CombineAcrossPaths::Sum => values.iter().sum(),
        CombineAcrossPaths::Max => values.first().copied().unwrap_or(0.0),
        CombineAcrossPaths::NoisyOr => 1.0 - values.iter().map(|p| 1.0 - p).product::<f64>(),
        CombineAcrossPaths::LogSumExp => log_sum_exp(values),
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Larger lists first: element-wise descending, then longer before its prefix.
fn descending_lexicographic(a: &[f64], b: &[f64]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| y.total_cmp(x))
        .find(|ord| ord.is_ne())
        .unwrap_or_else(|| b.len().cmp(&a.len()))
}

/// Every answer tied with the best score.
pub fn top_answers(ranked: &[RankedAnswer]) -> Vec<EntityId> {
    let Some(best) = ranked.first() else {
        return Vec::new();
    };
    ranked
        .iter()
        .take_while(|answer| answer.score == best.score)
        .map(|answer| answer.entity)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::adjacency::EntityWeights;
    use crate::program::Program;
    use crate::vocab::RelationId;

    fn e(id: u32) -> EntityId {
        EntityId(id)
    }

    fn answer(program: u32, weight: f64, entities: &[(u32, f64)]) -> ProgramAnswer {
        ProgramAnswer {
            program: Program::new(vec![RelationId(program)]),
            path_weight: weight,
            entities: entities.iter().map(|&(id, w)| (e(id), w)).collect(),
        }
    }

    #[test]
    fn noisy_or_combines_independent_evidence() {
        let answers = [answer(1, 0.5, &[(7, 1.0)]), answer(2, 0.5, &[(7, 1.0)])];
        let ranked = aggregate(&answers, CombinePerPath::None, CombineAcrossPaths::NoisyOr);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].score - 0.75).abs() < 1e-12);
    }

    #[test]
    fn none_per_path_ignores_walk_counts() {
        let answers = [answer(1, 0.3, &[(7, 5.0), (8, 1.0)]), answer(2, 0.2, &[(7, 2.0)])];
        let ranked = aggregate(&answers, CombinePerPath::None, CombineAcrossPaths::Sum);
        assert_eq!(ranked[0].entity, e(7));
        assert!((ranked[0].score - 0.5).abs() < 1e-12);
        assert!((ranked[1].score - 0.3).abs() < 1e-12);

        let ranked = aggregate(&answers, CombinePerPath::Sum, CombineAcrossPaths::Sum);
        assert!((ranked[0].score - 1.9).abs() < 1e-12);
    }

    #[test]
    fn max_breaks_ties_on_later_contributions() {
        let answers = [
            answer(1, 0.9, &[(1, 1.0), (2, 1.0), (3, 1.0)]),
            answer(2, 0.4, &[(2, 1.0), (3, 1.0)]),
            answer(3, 0.6, &[(3, 1.0)]),
            answer(4, 0.1, &[(2, 1.0)]),
        ];
        let ranked = aggregate(&answers, CombinePerPath::None, CombineAcrossPaths::Max);
        let order: Vec<_> = ranked.iter().map(|a| a.entity).collect();
        // 3: [0.9, 0.6, 0.4]; 2: [0.9, 0.4, 0.1]; 1: [0.9]
        assert_eq!(order, vec![e(3), e(2), e(1)]);
        assert!(ranked.iter().all(|a| (a.score - 0.9).abs() < 1e-12));
        assert_eq!(top_answers(&ranked).len(), 3);
    }

    #[test]
    fn logsumexp_is_stable() {
        let answers = [answer(1, 1000.0, &[(1, 1.0)]), answer(2, 1000.0, &[(1, 1.0)])];
        let ranked = aggregate(&answers, CombinePerPath::None, CombineAcrossPaths::LogSumExp);
        assert!((ranked[0].score - (1000.0 + 2f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn zero_vectors_contribute_nothing() {
        let answers = [ProgramAnswer {
            program: Program::new(vec![RelationId(1)]),
            path_weight: 1.0,
            entities: EntityWeights::zero(),
        }];
        assert!(aggregate(&answers, CombinePerPath::Sum, CombineAcrossPaths::Sum).is_empty());
        assert!(top_answers(&[]).is_empty());
    }

    #[test]
    fn unknown_mode_names_are_rejected() {
        assert_eq!("noisy_or".parse::<CombineAcrossPaths>().unwrap(), CombineAcrossPaths::NoisyOr);
        assert!(matches!(
            "median".parse::<CombineAcrossPaths>(),
            Err(ConfigError::InvalidConfiguration { .. })
        ));
        assert!("product".parse::<CombinePerPath>().is_err());
    }

    #[test]
    fn equal_scores_order_by_entity() {
        let answers = [answer(1, 0.5, &[(9, 1.0), (4, 1.0)])];
        let ranked = aggregate(&answers, CombinePerPath::None, CombineAcrossPaths::Sum);
        assert_eq!(ranked[0].entity, e(4));
        assert_eq!(top_answers(&ranked), vec![e(4), e(9)]);
    }
}
