//! The engine facade: owns the loaded dataset and runs the per-query pipeline.
//!
//! ```text
//! neighbors -> extract programs -> rank -> execute -> aggregate
//! ```
//!
//! Every query builds a [`LeakageMask`] from its gold answers and threads it
//! through all stages, so the shared data is only ever read. That is what
//! makes [`CbrEngine::evaluate`] safe to run on the rayon pool.

use std::collections::{BTreeMap, HashSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;

use crate::aggregate::{RankedAnswer, aggregate, top_answers};
use crate::config::{CbrConfig, RelationOverrides, Split};
use crate::dataset::Dataset;
use crate::error::{CbrResult, ConfigError, QueryError};
use crate::eval::{EvalQuery, KnownAnswers, RankMetrics, filtered_rank, group_queries};
use crate::execute::{PathWeighting, execute_programs};
use crate::graph::LeakageMask;
use crate::graph::adjacency::AdjacencyBank;
use crate::neighbors::NeighborRetriever;
use crate::program::{Program, ProgramExtractor};
use crate::rank::{fallback_counts, rank_programs};
use crate::vocab::{EntityId, RelationId};

/// A resolved query. `gold` answers are hidden from the engine while it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub source: EntityId,
    pub relation: RelationId,
    pub gold: Vec<EntityId>,
}

/// Counters describing how one query was answered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDiagnostics {
    pub neighbors: usize,
    pub neighbors_without_answers: usize,
    pub fallback_neighbors: bool,
    /// Unique ranked programs.
    pub programs: usize,
    pub executed: usize,
    pub non_executable: usize,
    /// Programs scored from the fallback tables.
    pub fallback_scores: usize,
    /// Programs found in no table (score 0).
    pub default_scores: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Prediction {
    /// Ranked answers, best first.
    pub answers: Vec<RankedAnswer>,
    /// Every answer tied with the best score.
    pub top_answers: Vec<EntityId>,
    /// Extracted programs not starting with the query relation, with repeats.
    pub learnt_programs: Vec<Program>,
    pub diagnostics: QueryDiagnostics,
}

impl Prediction {
    pub fn ranked_entities(&self) -> Vec<EntityId> {
        self.answers.iter().map(|answer| answer.entity).collect()
    }
}

/// Result of one evaluated query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub source: String,
    pub relation: String,
    pub gold: Vec<String>,
    /// Filtered rank per gold answer, `None` for a miss.
    pub ranks: Vec<Option<usize>>,
    pub top_answers: Vec<String>,
    pub diagnostics: QueryDiagnostics,
    /// Set when the query could not be answered at all.
    pub error: Option<String>,
    #[serde(skip)]
    learnt_programs: Vec<String>,
}

/// Mean diagnostics over every answered query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsSummary {
    pub answered_queries: usize,
    pub failed_queries: usize,
    pub mean_neighbors: f64,
    pub mean_neighbors_without_answers: f64,
    pub fallback_neighbor_queries: usize,
    pub mean_programs: f64,
    pub mean_non_executable: f64,
    pub fallback_scores: usize,
    pub default_scores: usize,
}

/// Everything an evaluation run reports.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub dataset: String,
    pub split: Split,
    pub overall: RankMetrics,
    pub per_relation: BTreeMap<String, RankMetrics>,
    pub diagnostics: DiagnosticsSummary,
    /// relation → program → number of times a neighbor produced it.
    pub learnt_programs: BTreeMap<String, BTreeMap<String, usize>>,
    pub queries: Vec<QueryOutcome>,
}

/// Summary statistics about a loaded engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub dataset: String,
    pub entities: usize,
    pub relations: usize,
    pub training_facts: usize,
    pub adjacency_entries: usize,
    pub dev_triples: usize,
    pub test_triples: usize,
    pub clusters: usize,
    pub prior_entries: usize,
    pub precision_entries: usize,
    pub path_pools: usize,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dataset: {}", self.dataset)?;
        writeln!(f, "Entities: {}", self.entities)?;
        writeln!(f, "Relations: {}", self.relations)?;
        writeln!(
            f,
            "Training facts: {} ({} adjacency entries)",
            self.training_facts, self.adjacency_entries
        )?;
        writeln!(f, "Dev/test triples: {}/{}", self.dev_triples, self.test_triples)?;
        writeln!(f, "Clustered entities: {}", self.clusters)?;
        writeln!(
            f,
            "Statistics: {} prior, {} precision entries",
            self.prior_entries, self.precision_entries
        )?;
        write!(f, "Path pools: {}", self.path_pools)
    }
}

/// Case-based reasoning engine over one loaded dataset.
pub struct CbrEngine {
    config: CbrConfig,
    dataset: Dataset,
    bank: AdjacencyBank,
    overrides: RelationOverrides,
}

impl CbrEngine {
    /// Validate `config` and build the adjacency bank over `dataset`.
    pub fn new(config: CbrConfig, dataset: Dataset) -> Result<Self, ConfigError> {
        config.validate()?;
        let overrides = config.relation_overrides(&dataset.relations)?;
        let bank = AdjacencyBank::build(
            dataset.training.facts(),
            dataset.entities.len(),
            &dataset.relations,
        );
        Ok(Self {
            config,
            dataset,
            bank,
            overrides,
        })
    }

    /// Load all artifacts named by `config`, then build the engine.
    pub fn load(config: CbrConfig) -> CbrResult<Self> {
        config.validate()?;
        let dataset = Dataset::load(&config)?;
        Ok(Self::new(config, dataset)?)
    }

    pub fn config(&self) -> &CbrConfig {
        &self.config
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn info(&self) -> EngineInfo {
        let ds = &self.dataset;
        EngineInfo {
            dataset: self.config.dataset_name.clone(),
            entities: ds.entities.len(),
            relations: ds.relations.len(),
            training_facts: ds.training.len(),
            adjacency_entries: self.bank.nnz(),
            dev_triples: ds.dev.len(),
            test_triples: ds.test.len(),
            clusters: ds.clusters.len(),
            prior_entries: ds.tables.prior.len(),
            precision_entries: ds.tables.precision.len(),
            path_pools: ds.paths.len(),
        }
    }

    /// Resolve labels into a [`Query`]. Gold labels outside the vocabulary are dropped.
    pub fn resolve_query(
        &self,
        source: &str,
        relation: &str,
        gold: &[String],
    ) -> Result<Query, QueryError> {
        let ds = &self.dataset;
        let source_id = ds.entities.id(source).ok_or_else(|| QueryError::UnseenEntity {
            label: source.to_string(),
        })?;
        let relation_id = ds.relations.id(relation).ok_or_else(|| QueryError::UnseenRelation {
            label: relation.to_string(),
        })?;
        Ok(Query {
            source: source_id,
            relation: relation_id,
            gold: gold.iter().filter_map(|g| ds.entities.id(g)).collect(),
        })
    }

    /// Answer one query.
    pub fn predict(&self, query: &Query) -> Result<Prediction, QueryError> {
        let ds = &self.dataset;
        let settings = self.overrides.for_relation(query.relation);
        let mask = LeakageMask::for_query(query.source, query.relation, &query.gold, &ds.relations);
        let mut rng = StdRng::seed_from_u64(query_seed(self.config.seed, query.source, query.relation));

        let neighbors = NeighborRetriever::new(&ds.similarity, &ds.training)
            .with_labels(&ds.entities)
            .retrieve(
                query.source,
                query.relation,
                settings.k_adj,
                settings.cheat_neighbors,
                &mask,
                &mut rng,
            )?;

        let extraction = ProgramExtractor::new(&ds.training, &ds.paths, self.config.max_path_len)
            .extract(query.relation, &neighbors.entities, &mask);
        let learnt_programs: Vec<Program> = extraction
            .programs
            .iter()
            .filter(|program| !program.starts_with(query.relation))
            .cloned()
            .collect();

        let cluster = ds.clusters.cluster_of(query.source);
        let ranked = rank_programs(
            &extraction.programs,
            query.relation,
            cluster,
            settings.score_mode,
            &ds.tables,
        );
        let (fallback_scores, default_scores) = fallback_counts(&ranked);

        let weighting = if self.config.use_path_counts {
            PathWeighting::Scored {
                tables: &ds.tables,
                cluster,
                mode: settings.score_mode,
            }
        } else {
            PathWeighting::Uniform
        };
        let execution = execute_programs(
            &self.bank.view(&mask),
            query.source,
            query.relation,
            &ranked,
            settings.max_num_programs,
            weighting,
        );

        let answers = aggregate(&execution.answers, settings.per_path, settings.across);
        let top = top_answers(&answers);

        let diagnostics = QueryDiagnostics {
            neighbors: neighbors.entities.len(),
            neighbors_without_answers: extraction.neighbors_without_answers,
            fallback_neighbors: neighbors.from_fallback,
            programs: ranked.len(),
            executed: execution.executed(),
            non_executable: execution.non_executable.len(),
            fallback_scores,
            default_scores,
        };
        tracing::debug!(
            source = %query.source,
            relation = %query.relation,
            neighbors = diagnostics.neighbors,
            programs = diagnostics.programs,
            answers = answers.len(),
            "query answered"
        );

        Ok(Prediction {
            answers,
            top_answers: top,
            learnt_programs,
            diagnostics,
        })
    }

    /// Run every query of `split` and collect metrics.
    pub fn evaluate(&self, split: Split) -> EvalReport {
        let ds = &self.dataset;
        let queries = group_queries(ds.eval_split(split));
        let known = if self.config.filtered_eval {
            KnownAnswers::from_triples(ds.all_known_triples())
        } else {
            KnownAnswers::default()
        };
        tracing::info!(
            split = ?split,
            queries = queries.len(),
            parallel = self.config.parallel,
            "evaluating"
        );

        let outcomes: Vec<QueryOutcome> = if self.config.parallel {
            queries
                .par_iter()
                .map(|query| self.evaluate_query(query, &known))
                .collect()
        } else {
            queries
                .iter()
                .map(|query| self.evaluate_query(query, &known))
                .collect()
        };

        let report = self.report(split, outcomes);
        tracing::info!(
            mrr = report.overall.mrr,
            hits_at_1 = report.overall.hits_at_1,
            hits_at_10 = report.overall.hits_at_10,
            answers = report.overall.num_answers,
            "evaluation finished"
        );
        report
    }

    fn evaluate_query(&self, query: &EvalQuery, known: &KnownAnswers) -> QueryOutcome {
        let ds = &self.dataset;
        let mut outcome = QueryOutcome {
            source: query.source.clone(),
            relation: query.relation.clone(),
            gold: query.gold.clone(),
            ranks: vec![None; query.gold.len()],
            top_answers: Vec::new(),
            diagnostics: QueryDiagnostics::default(),
            error: None,
            learnt_programs: Vec::new(),
        };

        let prediction = self
            .resolve_query(&query.source, &query.relation, &query.gold)
            .and_then(|resolved| self.predict(&resolved));
        let prediction = match prediction {
            Ok(prediction) => prediction,
            Err(err) => {
                tracing::debug!(source = %query.source, relation = %query.relation, %err, "query skipped");
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };

        let predicted = prediction.ranked_entities();
        let known_ids: HashSet<EntityId> = known
            .answers(&query.source, &query.relation)
            .filter_map(|label| ds.entities.id(label))
            .collect();
        outcome.ranks = query
            .gold
            .iter()
            .map(|gold| {
                let gold = ds.entities.id(gold)?;
                filtered_rank(&gold, &predicted, &known_ids)
            })
            .collect();
        outcome.top_answers = prediction
            .top_answers
            .iter()
            .map(|&entity| ds.entities.resolve_label(entity))
            .collect();
        outcome.learnt_programs = prediction
            .learnt_programs
            .iter()
            .map(|program| program.display(&ds.relations))
            .collect();
        outcome.diagnostics = prediction.diagnostics;
        outcome
    }

    fn report(&self, split: Split, queries: Vec<QueryOutcome>) -> EvalReport {
        let mut all_ranks = Vec::new();
        let mut by_relation: BTreeMap<String, Vec<Option<usize>>> = BTreeMap::new();
        let mut learnt_programs: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        let mut summary = DiagnosticsSummary::default();

        for outcome in &queries {
            all_ranks.extend_from_slice(&outcome.ranks);
            by_relation
                .entry(outcome.relation.clone())
                .or_default()
                .extend_from_slice(&outcome.ranks);

            if outcome.error.is_some() {
                summary.failed_queries += 1;
                continue;
            }
            let d = &outcome.diagnostics;
            summary.answered_queries += 1;
            summary.mean_neighbors += d.neighbors as f64;
            summary.mean_neighbors_without_answers += d.neighbors_without_answers as f64;
            summary.mean_programs += d.programs as f64;
            summary.mean_non_executable += d.non_executable as f64;
            summary.fallback_neighbor_queries += usize::from(d.fallback_neighbors);
            summary.fallback_scores += d.fallback_scores;
            summary.default_scores += d.default_scores;

            let counts = learnt_programs.entry(outcome.relation.clone()).or_default();
            for program in &outcome.learnt_programs {
                *counts.entry(program.clone()).or_insert(0) += 1;
            }
        }

        if summary.answered_queries > 0 {
            let n = summary.answered_queries as f64;
            summary.mean_neighbors /= n;
            summary.mean_neighbors_without_answers /= n;
            summary.mean_programs /= n;
            summary.mean_non_executable /= n;
        }

        EvalReport {
            dataset: self.config.dataset_name.clone(),
            split,
            overall: RankMetrics::from_ranks(&all_ranks),
            per_relation: by_relation
                .into_iter()
                .map(|(relation, ranks)| (relation, RankMetrics::from_ranks(&ranks)))
                .collect(),
            diagnostics: summary,
            learnt_programs,
            queries,
        }
    }
}

/// Per-query RNG seed, independent of processing order.
fn query_seed(seed: u64, source: EntityId, relation: RelationId) -> u64 {
    let key = (u64::from(source.0) << 32) | u64::from(relation.0);
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ key
}
