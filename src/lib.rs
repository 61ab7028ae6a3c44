// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # prob-cbr
//!
//! Case-based link prediction over a knowledge graph. To answer `(e1, r, ?)`
//! the engine finds entities similar to `e1` that already answer `r`, collects
//! the relation paths ("programs") explaining their answers, scores those
//! programs with cluster-level prior/precision statistics, walks them from
//! `e1` over sparse per-relation adjacency matrices and aggregates the
//! reached entities into a ranking.
//!
//! ## Architecture
//!
//! - **Vocabularies** (`vocab`): dense entity/relation ids, inverse relations
//! - **Graph** (`graph`): training facts, leakage masks, CSR adjacency bank
//! - **Reasoning** (`neighbors`, `program`, `rank`, `execute`, `aggregate`)
//! - **Statistics** (`stats`): cluster-indexed tables with ordered fallback
//! - **Runner** (`config`, `dataset`, `engine`, `eval`): artifacts, batch evaluation, metrics
//!
//! ## Library usage
//!
//! ```no_run
//! use prob_cbr::config::CbrConfig;
//! use prob_cbr::engine::CbrEngine;
//!
//! let engine = CbrEngine::load(CbrConfig::default()).unwrap();
//! let query = engine.resolve_query("DB00945", "treats", &[]).unwrap();
//! let prediction = engine.predict(&query).unwrap();
//! for answer in prediction.answers.iter().take(10) {
//!     println!("{} {:.4}", engine.dataset().entities.resolve_label(answer.entity), answer.score);
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod eval;
pub mod execute;
pub mod graph;
pub mod neighbors;
pub mod program;
pub mod rank;
pub mod stats;
pub mod vocab;
