//! prob-cbr CLI: case-based link prediction over precomputed artifacts.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use prob_cbr::aggregate::{CombineAcrossPaths, CombinePerPath};
use prob_cbr::config::{CbrConfig, Split};
use prob_cbr::engine::CbrEngine;

#[derive(Parser)]
#[command(name = "prob-cbr", version, about = "Case-based link prediction")]
struct Cli {
    /// TOML run configuration. Flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory holding one subdirectory per dataset.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    dataset_name: Option<String>,

    /// Test split file name inside the dataset directory.
    #[arg(long, global = true)]
    test_file_name: Option<String>,

    /// Number of neighbors per query.
    #[arg(long, global = true)]
    k_adj: Option<usize>,

    /// Execution budget per query.
    #[arg(long, global = true)]
    max_num_programs: Option<usize>,

    #[arg(long, global = true)]
    max_path_len: Option<usize>,

    #[arg(long, global = true)]
    num_paths_around_entities: Option<usize>,

    /// Clustering threshold selecting the statistics directory.
    #[arg(long, global = true)]
    linkage: Option<f64>,

    /// Weight paths by learned score (true) or uniformly (false).
    #[arg(long, global = true)]
    use_path_counts: Option<bool>,

    /// Fall back to relation members when no similar neighbor qualifies.
    #[arg(long, global = true)]
    cheat_neighbors: Option<bool>,

    #[arg(long, global = true)]
    use_only_precision_scores: Option<bool>,

    /// Per-path combination: none | sum.
    #[arg(long, global = true)]
    aggr_type1: Option<CombinePerPath>,

    /// Cross-path combination: sum | max | noisy_or | logsumexp.
    #[arg(long, global = true)]
    aggr_type2: Option<CombineAcrossPaths>,

    /// JSON file of per-relation overrides.
    #[arg(long, global = true)]
    per_relation_config_file: Option<PathBuf>,

    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every query of a split and report Hits@k / MRR.
    Evaluate {
        /// dev | test
        #[arg(long)]
        split: Option<Split>,

        /// Process queries in parallel.
        #[arg(long)]
        parallel: bool,

        /// Rank gold answers without skipping other known answers.
        #[arg(long)]
        raw: bool,

        /// Write the full JSON report here.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Also print per-relation metrics.
        #[arg(long)]
        per_relation: bool,
    },

    /// Predict answers for a single (source, relation) query.
    Predict {
        /// Source entity label.
        source: String,

        /// Relation label.
        relation: String,

        /// Known answers to hide from the engine (comma-separated labels).
        #[arg(long, value_delimiter = ',')]
        gold: Vec<String>,

        /// Number of answers to print.
        #[arg(long, default_value = "10")]
        top_k: usize,
    },

    /// Show dataset and engine statistics.
    Info,

    /// Print the effective configuration as TOML.
    Config,
}

impl Cli {
    fn resolve_config(&self) -> Result<CbrConfig> {
        let mut config = match &self.config {
            Some(path) => CbrConfig::load(path)?,
            None => CbrConfig::default(),
        };
        if let Some(v) = &self.data_dir {
            config.data_dir = v.clone();
        }
        if let Some(v) = &self.dataset_name {
            config.dataset_name = v.clone();
        }
        if let Some(v) = &self.test_file_name {
            config.test_file_name = Some(v.clone());
        }
        if let Some(v) = &self.per_relation_config_file {
            config.per_relation_config_file = Some(v.clone());
        }
        config.k_adj = self.k_adj.unwrap_or(config.k_adj);
        config.max_num_programs = self.max_num_programs.unwrap_or(config.max_num_programs);
        config.max_path_len = self.max_path_len.unwrap_or(config.max_path_len);
        config.num_paths_around_entities = self
            .num_paths_around_entities
            .unwrap_or(config.num_paths_around_entities);
        config.linkage = self.linkage.unwrap_or(config.linkage);
        config.use_path_counts = self.use_path_counts.unwrap_or(config.use_path_counts);
        config.cheat_neighbors = self.cheat_neighbors.unwrap_or(config.cheat_neighbors);
        config.use_only_precision_scores = self
            .use_only_precision_scores
            .unwrap_or(config.use_only_precision_scores);
        config.aggr_type1 = self.aggr_type1.unwrap_or(config.aggr_type1);
        config.aggr_type2 = self.aggr_type2.unwrap_or(config.aggr_type2);
        config.seed = self.seed.unwrap_or(config.seed);
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = cli.resolve_config()?;

    match cli.command {
        Commands::Evaluate {
            split,
            parallel,
            raw,
            output,
            per_relation,
        } => {
            config.split = split.unwrap_or(config.split);
            config.parallel |= parallel;
            config.filtered_eval &= !raw;
            let split = config.split;

            let engine = CbrEngine::load(config)?;
            let report = engine.evaluate(split);

            println!(
                "{} {:?} ({} queries)",
                report.dataset,
                report.split,
                report.queries.len()
            );
            println!("  {}", report.overall.summary());
            if per_relation {
                for (relation, metrics) in &report.per_relation {
                    println!("  {relation}: {}", metrics.summary());
                }
            }
            let d = &report.diagnostics;
            println!(
                "  neighbors/query: {:.2} | programs/query: {:.2} | non-executable/query: {:.2} | failed queries: {}",
                d.mean_neighbors, d.mean_programs, d.mean_non_executable, d.failed_queries
            );

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&report).into_diagnostic()?;
                std::fs::write(&path, json).into_diagnostic()?;
                println!("Report written to {}", path.display());
            }
        }

        Commands::Predict {
            source,
            relation,
            gold,
            top_k,
        } => {
            let engine = CbrEngine::load(config)?;
            let query = engine.resolve_query(&source, &relation, &gold)?;
            let prediction = engine.predict(&query)?;
            let entities = &engine.dataset().entities;

            println!("Answers for ({source}, {relation}, ?):");
            if prediction.answers.is_empty() {
                println!("  (none)");
            }
            for (i, answer) in prediction.answers.iter().take(top_k).enumerate() {
                println!(
                    "  {}. {} (score: {:.4}, paths: {})",
                    i + 1,
                    entities.resolve_label(answer.entity),
                    answer.score,
                    answer.contributions.len()
                );
            }

            let d = &prediction.diagnostics;
            println!(
                "\nneighbors: {}{} | programs: {} | executed: {} | non-executable: {}",
                d.neighbors,
                if d.fallback_neighbors { " (fallback)" } else { "" },
                d.programs,
                d.executed,
                d.non_executable
            );
        }

        Commands::Info => {
            let engine = CbrEngine::load(config)?;
            println!("{}", engine.info());
        }

        Commands::Config => {
            let toml = toml::to_string_pretty(&config).into_diagnostic()?;
            print!("{toml}");
        }
    }

    Ok(())
}
