// This module defines the error taxonomy of the gallery harness using the thiserror crate.
// Errors are split by the scope they invalidate: DescriptorError and CorpusError reject a
// single fixture and the corpus load carries on, JobError resolves to a recorded Fail
// verdict for one matrix cell, and ConfigError is run-scoped and fatal because the matrix
// cannot be resolved without a consistent toolchain/scenario universe.

//! Error types for the gallery harness.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// What went wrong inside a `@gallery-hints` or `@gallery-expect` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DescriptorErrorKind {
    MalformedKey,
    ConflictingFlagMode,
    DuplicateKey,
    EmptyToken,
    MalformedAssertion,
    UnterminatedBlock,
}

impl fmt::Display for DescriptorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MalformedKey => "malformed key",
            Self::ConflictingFlagMode => "conflicting flag mode",
            Self::DuplicateKey => "duplicate key",
            Self::EmptyToken => "empty token",
            Self::MalformedAssertion => "malformed assertion",
            Self::UnterminatedBlock => "unterminated block",
        };
        f.write_str(name)
    }
}

/// Fixture-scoped annotation error. Only the owning fixture is excluded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at annotation line {line}: {detail}")]
pub struct DescriptorError {
    pub kind: DescriptorErrorKind,
    /// 1-based line within the source file, 0 when not attributable.
    pub line: usize,
    pub detail: String,
}

impl DescriptorError {
    pub fn new(kind: DescriptorErrorKind, line: usize, detail: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            detail: detail.into(),
        }
    }
}

/// Errors raised while loading the fixture corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("corpus root {path} is not a readable directory: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown category `{category}`")]
    UnknownCategory { category: String },

    #[error("fixture id `{id}` is already taken by {existing}")]
    DuplicateId { id: String, existing: PathBuf },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Job-scoped failure. Always resolves to a recorded `Fail` verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("compile failed: {diagnostic}")]
    Compile { diagnostic: String },

    #[error("timed out after {}s", .limit.as_secs_f64())]
    Timeout { limit: Duration },

    #[error("disassembly failed: {reason}")]
    Disassemble { reason: String },

    #[error("job I/O failed: {reason}")]
    Io { reason: String },
}

impl JobError {
    pub fn io(context: &str, err: std::io::Error) -> Self {
        Self::Io {
            reason: format!("{context}: {err}"),
        }
    }
}

/// Run-scoped, fatal configuration error. Raised before any job is scheduled.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("the toolchain universe is empty")]
    NoToolchains,

    #[error("the scenario universe is empty")]
    NoScenarios,

    #[error("toolchain `{id}` is declared more than once")]
    DuplicateToolchain { id: String },

    #[error("scenario `{label}` is declared more than once")]
    DuplicateScenario { label: String },

    #[error("toolchain `{toolchain}` has no baseline flags for scenario `{scenario}`")]
    MissingBaseline { toolchain: String, scenario: String },

    #[error("unknown toolchain identifier `{id}`")]
    UnknownToolchain { id: String },

    #[error("unknown scenario label `{label}`")]
    UnknownScenario { label: String },

    #[error("invalid toolchain `{id}`: {reason}")]
    InvalidToolchain { id: String, reason: String },

    #[error("invalid scenario `{label}`: {reason}")]
    InvalidScenario { label: String, reason: String },

    #[error("worker pool size must be at least 1")]
    NoWorkers,
}

/// Result type alias for job-scoped operations.
pub type JobResult<T> = Result<T, JobError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
