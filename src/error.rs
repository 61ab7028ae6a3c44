//! Rich diagnostic error types for the prob-cbr engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the prob-cbr engine.
///
/// Artifact and configuration errors abort a run; query errors are recorded
/// per query and never abort a batch.
#[derive(Debug, Error, Diagnostic)]
pub enum CbrError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Artifact errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ArtifactError {
    #[error("missing artifact: {path}")]
    #[diagnostic(
        code(cbr::artifact::missing),
        help(
            "A required precomputed artifact was not found. Run the preprocessing \
             pipeline for this dataset (vocabularies, entity similarity, clustering, \
             prior/precision maps, path pools) or check --data-dir and --dataset-name."
        )
    )]
    Missing { path: String },

    #[error("I/O error reading {path}")]
    #[diagnostic(
        code(cbr::artifact::io),
        help("Check that the file is readable and not truncated.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    #[diagnostic(
        code(cbr::artifact::parse),
        help(
            "The artifact could not be decoded. `.json` files are read as JSON and \
             `.bin` files as bincode; make sure the extension matches the encoding."
        )
    )]
    Parse { path: String, message: String },

    #[error("malformed artifact {path}: {message}")]
    #[diagnostic(
        code(cbr::artifact::malformed),
        help("The artifact decoded but its contents are inconsistent. Regenerate it.")
    )]
    Malformed { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("entity \"{label}\" was not seen during training")]
    #[diagnostic(
        code(cbr::query::unseen_entity),
        help(
            "The query source has no entry in the entity vocabulary or the similarity \
             index. Its prediction is recorded as empty and the batch continues."
        )
    )]
    UnseenEntity { label: String },

    #[error("relation \"{label}\" was not seen during training")]
    #[diagnostic(
        code(cbr::query::unseen_relation),
        help("The query relation is not in the relation vocabulary.")
    )]
    UnseenRelation { label: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid configuration: {setting} = \"{value}\"")]
    #[diagnostic(
        code(cbr::config::invalid),
        help("{expected}")
    )]
    InvalidConfiguration {
        setting: String,
        value: String,
        expected: String,
    },

    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(cbr::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(cbr::config::parse),
        help("Run configs are TOML; per-relation overrides are JSON. Check the syntax.")
    )]
    Parse { path: String, message: String },
}

/// Convenience alias for functions returning prob-cbr results.
pub type CbrResult<T> = std::result::Result<T, CbrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_error_converts_to_cbr_error() {
        let err = ArtifactError::Missing {
            path: "data/ent_sim.json".into(),
        };
        let cbr: CbrError = err.into();
        assert!(matches!(cbr, CbrError::Artifact(ArtifactError::Missing { .. })));
    }

    #[test]
    fn query_error_converts_to_cbr_error() {
        let err = QueryError::UnseenEntity {
            label: "CHEBI:6640".into(),
        };
        let cbr: CbrError = err.into();
        assert!(matches!(cbr, CbrError::Query(QueryError::UnseenEntity { .. })));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = ConfigError::InvalidConfiguration {
            setting: "aggr_type2".into(),
            value: "median".into(),
            expected: "one of sum, max, noisy_or, logsumexp".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("aggr_type2"));
        assert!(msg.contains("median"));
    }
}
