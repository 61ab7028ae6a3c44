//! Program execution: walk ranked programs from the query entity.
//!
//! Each program's path weight is looked up again here rather than taken from
//! the ranker. The ranker's score and the executor's weight are computed
//! separately and can diverge: a path can be ranked on one table entry and
//! weighted by another if the two lookups ever resolve the fallback chain
//! differently.

use crate::graph::adjacency::{AdjacencyView, EntityWeights};
use crate::program::Program;
use crate::rank::RankedProgram;
use crate::stats::{ClusterId, ScoreMode, ScoreTables};
use crate::vocab::{EntityId, RelationId};

/// Reachable entities of one program and the weight its contributions carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramAnswer {
    pub program: Program,
    pub path_weight: f64,
    pub entities: EntityWeights,
}

#[derive(Debug, Clone, Default)]
pub struct Execution {
    /// Every attempted program, executable or not, in ranked order.
    pub answers: Vec<ProgramAnswer>,
    pub non_executable: Vec<Program>,
}

impl Execution {
    pub fn executed(&self) -> usize {
        self.answers.len() - self.non_executable.len()
    }
}

/// Where path weights come from.
#[derive(Debug, Clone, Copy)]
pub enum PathWeighting<'a> {
    /// Score each path from the statistics tables.
    Scored {
        tables: &'a ScoreTables,
        cluster: ClusterId,
        mode: ScoreMode,
    },
    /// Every path weighs 1.
    Uniform,
}

impl PathWeighting<'_> {
    fn weight(&self, relation: RelationId, program: &Program) -> f64 {
        match self {
            PathWeighting::Scored {
                tables,
                cluster,
                mode,
            } => tables.score(*cluster, relation, program, *mode).value,
            PathWeighting::Uniform => 1.0,
        }
    }
}

/// Execute `ranked` programs from `source` in order.
///
/// `budget` caps the number of programs that reach at least one entity;
/// non-executable programs are recorded but do not count against it.
pub fn execute_programs(
    view: &AdjacencyView<'_>,
    source: EntityId,
    relation: RelationId,
    ranked: &[RankedProgram],
    budget: usize,
    weighting: PathWeighting<'_>,
) -> Execution {
    let mut execution = Execution::default();
    let mut executed = 0usize;
    for ranked_program in ranked {
        if executed == budget {
            break;
        }
        let program = &ranked_program.program;
        let entities = view.execute(source, program.relations());
        let path_weight = weighting.weight(relation, program);
        if entities.is_zero() {
            execution.non_executable.push(program.clone());
        } else {
            executed += 1;
        }
        execution.answers.push(ProgramAnswer {
            program: program.clone(),
            path_weight,
            entities,
        });
    }
    tracing::trace!(
        source = %source,
        executed,
        failed = execution.non_executable.len(),
        "executed programs"
    );
    execution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::adjacency::AdjacencyBank;
    use crate::graph::{Fact, LeakageMask};
    use crate::stats::{FALLBACK_CLUSTER, ScoreSource};
    use crate::vocab::RelationVocab;

    fn e(id: u32) -> EntityId {
        EntityId(id)
    }

    fn ranked(programs: &[&[RelationId]]) -> Vec<RankedProgram> {
        programs
            .iter()
            .map(|relations| RankedProgram {
                program: Program::new(relations.to_vec()),
                score: 1.0,
                source: ScoreSource::Cluster,
            })
            .collect()
    }

    fn fixture() -> (AdjacencyBank, RelationVocab) {
        let rels = RelationVocab::from_labels(["treats", "binds", "causes"]);
        let treats = rels.id("treats").unwrap();
        let binds = rels.id("binds").unwrap();
        let facts = vec![
            Fact::new(e(0), treats, e(1)),
            Fact::new(e(0), binds, e(2)),
            Fact::new(e(0), binds, e(3)),
        ];
        (AdjacencyBank::build(&facts, 4, &rels), rels)
    }

    #[test]
    fn dead_programs_are_reported_and_kept() {
        let (bank, rels) = fixture();
        let treats = rels.id("treats").unwrap();
        let causes = rels.id("causes").unwrap();
        let mask = LeakageMask::empty();
        let programs = ranked(&[&[causes], &[treats]]);
        let exec = execute_programs(
            &bank.view(&mask),
            e(0),
            treats,
            &programs,
            10,
            PathWeighting::Uniform,
        );
        assert_eq!(exec.answers.len(), 2);
        assert!(exec.answers[0].entities.is_zero());
        assert_eq!(exec.non_executable, vec![Program::new(vec![causes])]);
        assert_eq!(exec.executed(), 1);
    }

    #[test]
    fn budget_counts_only_successful_programs() {
        let (bank, rels) = fixture();
        let treats = rels.id("treats").unwrap();
        let binds = rels.id("binds").unwrap();
        let causes = rels.id("causes").unwrap();
        let mask = LeakageMask::empty();
        let programs = ranked(&[&[causes], &[binds], &[causes, causes], &[treats]]);
        let exec = execute_programs(
            &bank.view(&mask),
            e(0),
            treats,
            &programs,
            1,
            PathWeighting::Uniform,
        );
        // [causes] fails, [binds] uses the budget, the rest is never tried.
        assert_eq!(exec.answers.len(), 2);
        assert_eq!(exec.executed(), 1);
        assert_eq!(exec.answers[1].entities.len(), 2);
    }

    #[test]
    fn scored_weights_come_from_tables() {
        let (bank, rels) = fixture();
        let treats = rels.id("treats").unwrap();
        let binds = rels.id("binds").unwrap();
        let mut tables = ScoreTables::default();
        let program = Program::new(vec![binds]);
        tables.prior_fallback.insert(FALLBACK_CLUSTER, treats, program.clone(), 0.5);
        tables.precision_fallback.insert(FALLBACK_CLUSTER, treats, program, 0.4);
        let mask = LeakageMask::empty();
        let weighting = PathWeighting::Scored {
            tables: &tables,
            cluster: ClusterId(5),
            mode: ScoreMode::PriorTimesPrecision,
        };
        let exec = execute_programs(
            &bank.view(&mask),
            e(0),
            treats,
            &ranked(&[&[binds]]),
            10,
            weighting,
        );
        assert!((exec.answers[0].path_weight - 0.2).abs() < 1e-12);
    }

    #[test]
    fn zero_budget_executes_nothing() {
        let (bank, rels) = fixture();
        let treats = rels.id("treats").unwrap();
        let mask = LeakageMask::empty();
        let exec = execute_programs(
            &bank.view(&mask),
            e(0),
            treats,
            &ranked(&[&[treats]]),
            0,
            PathWeighting::Uniform,
        );
        assert!(exec.answers.is_empty());
    }
}
