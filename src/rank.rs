//! Program ranking: deduplicate candidates and order them by learned score.

use std::collections::BTreeSet;

use crate::program::Program;
use crate::stats::{ClusterId, ScoreMode, ScoreSource, ScoreTables};
use crate::vocab::RelationId;

/// A unique program with its ranking score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedProgram {
    pub program: Program,
    pub score: f64,
    pub source: ScoreSource,
}

/// Rank `programs` for a query on `relation` from an entity in `cluster`.
///
/// Duplicates collapse. The degenerate program `[relation]` is only kept when
/// the cluster statistics score it explicitly; it is never scored through the
/// fallback tables. Programs are sorted by descending score; equal scores keep
/// program order, so the result is deterministic.
pub fn rank_programs(
    programs: &[Program],
    relation: RelationId,
    cluster: ClusterId,
    mode: ScoreMode,
    tables: &ScoreTables,
) -> Vec<RankedProgram> {
    let unique: BTreeSet<&Program> = programs.iter().collect();

    let mut ranked: Vec<RankedProgram> = unique
        .into_iter()
        .filter_map(|program| {
            let score = tables.score(cluster, relation, program, mode);
            if program.is_query_relation(relation) && score.source != ScoreSource::Cluster {
                return None;
            }
            Some(RankedProgram {
                program: program.clone(),
                score: score.value,
                source: score.source,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// How many ranked programs needed the fallback tables or the zero default.
pub fn fallback_counts(ranked: &[RankedProgram]) -> (usize, usize) {
    ranked.iter().fold((0, 0), |(fallback, default), p| match p.source {
        ScoreSource::Fallback => (fallback + 1, default),
        ScoreSource::Default => (fallback, default + 1),
        ScoreSource::Cluster => (fallback, default),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::FALLBACK_CLUSTER;

    fn p(ids: &[u32]) -> Program {
        Program::new(ids.iter().map(|&id| RelationId(id)).collect())
    }

    const R1: RelationId = RelationId(1);
    const C: ClusterId = ClusterId(2);

    fn tables() -> ScoreTables {
        let mut t = ScoreTables::default();
        t.prior.insert(C, R1, p(&[1]), 1.0);
        t.precision.insert(C, R1, p(&[1]), 0.2);
        t.prior.insert(C, R1, p(&[2]), 0.5);
        t.precision.insert(C, R1, p(&[2]), 0.8);
        t.prior_fallback.insert(FALLBACK_CLUSTER, R1, p(&[3, 4]), 0.5);
        t.precision_fallback.insert(FALLBACK_CLUSTER, R1, p(&[3, 4]), 0.5);
        t
    }

    #[test]
    fn empty_input_ranks_nothing() {
        assert!(rank_programs(&[], R1, C, ScoreMode::PriorTimesPrecision, &tables()).is_empty());
    }

    #[test]
    fn duplicates_collapse() {
        let programs = [p(&[1]), p(&[1]), p(&[2])];
        let ranked = rank_programs(&programs, R1, C, ScoreMode::PriorTimesPrecision, &tables());
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].program, p(&[2]));
        assert!((ranked[0].score - 0.4).abs() < 1e-12);
        assert_eq!(ranked[1].program, p(&[1]));
    }

    #[test]
    fn unscored_query_relation_is_excluded() {
        let programs = [p(&[1]), p(&[2])];
        let ranked = rank_programs(&programs, R1, ClusterId(9), ScoreMode::PriorTimesPrecision, &tables());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].program, p(&[2]));
        assert_eq!(ranked[0].source, ScoreSource::Default);
    }

    #[test]
    fn sorted_by_descending_score_with_fallback() {
        let programs = [p(&[5]), p(&[2]), p(&[3, 4])];
        let ranked = rank_programs(&programs, R1, C, ScoreMode::PriorTimesPrecision, &tables());
        let order: Vec<_> = ranked.iter().map(|r| r.program.clone()).collect();
        assert_eq!(order, vec![p(&[2]), p(&[3, 4]), p(&[5])]);
        assert_eq!(fallback_counts(&ranked), (1, 1));
    }

    #[test]
    fn equal_scores_keep_program_order() {
        let mut t = tables();
        t.prior.insert(C, R1, p(&[8]), 0.5);
        t.precision.insert(C, R1, p(&[8]), 0.8);
        // [2] and [8] tie at 0.4; the unscored rest tie at 0. Ties come out in
        // ascending program order whatever the input order.
        let programs = [p(&[7, 1]), p(&[8]), p(&[5, 9]), p(&[2]), p(&[6, 2]), p(&[5]), p(&[8])];
        let ranked = rank_programs(&programs, R1, C, ScoreMode::PriorTimesPrecision, &t);
        let order: Vec<_> = ranked.iter().map(|r| r.program.clone()).collect();
        assert_eq!(
            order,
            vec![p(&[2]), p(&[8]), p(&[5]), p(&[5, 9]), p(&[6, 2]), p(&[7, 1])]
        );

        let mut reversed = programs;
        reversed.reverse();
        let again = rank_programs(&reversed, R1, C, ScoreMode::PriorTimesPrecision, &t);
        assert_eq!(again, ranked);
    }

    #[test]
    fn precision_only_changes_order() {
        let programs = [p(&[1]), p(&[2])];
        let ranked = rank_programs(&programs, R1, C, ScoreMode::PrecisionOnly, &tables());
        assert_eq!(ranked[0].program, p(&[2]));
        assert!((ranked[0].score - 0.8).abs() < 1e-12);
        assert!((ranked[1].score - 0.2).abs() < 1e-12);
    }
}
