// This module is the hub for infrastructure shared by every harness component. Today
// that is the error taxonomy: fixture-scoped descriptor and corpus errors, job-scoped
// errors that become Fail verdicts, and fatal configuration errors.

//! Shared harness infrastructure.

pub mod error;

pub use error::{
    ConfigError, ConfigResult, CorpusError, DescriptorError, DescriptorErrorKind, JobError,
    JobResult,
};
