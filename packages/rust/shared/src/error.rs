//! Error types for the static build pipeline.
//!
//! Library crates use [`HssError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum HssError {
    /// Configuration loading or validation error. Always fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching remote documents.
    #[error("network error: {0}")]
    Network(String),

    /// A document could not be parsed or has an unexpected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Cache tree read/write failure that is not a plain IO error.
    #[error("cache error: {0}")]
    Cache(String),

    /// A step handler failed for one resource.
    #[error("step `{step}` failed for `{slug}`: {message}")]
    Step {
        step: String,
        slug: String,
        message: String,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (duplicate slug, bad template, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Every per-resource failure of one phase, reported together.
    #[error("{phase} failed for {} resource(s):\n{}", failures.len(), failures.join("\n"))]
    Aggregate {
        phase: String,
        failures: Vec<String>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HssError>;

impl HssError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attribute an error to a step and resource.
    pub fn step(step: impl Into<String>, slug: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Step {
            step: step.into(),
            slug: slug.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HssError::config("store `remote` has no url");
        assert_eq!(err.to_string(), "config error: store `remote` has no url");

        let err = HssError::step("extract-topics", "manifests/demo", "bad metadata");
        assert_eq!(
            err.to_string(),
            "step `extract-topics` failed for `manifests/demo`: bad metadata"
        );
    }

    #[test]
    fn aggregate_lists_every_failure() {
        let err = HssError::Aggregate {
            phase: "enrich".into(),
            failures: vec!["a: boom".into(), "b: bang".into()],
        };
        let text = err.to_string();
        assert!(text.starts_with("enrich failed for 2 resource(s)"));
        assert!(text.contains("a: boom"));
        assert!(text.contains("b: bang"));
    }
}
