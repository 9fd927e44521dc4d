//! Gallery harness - scenario matrices and codegen pattern checks for an
//! annotated compiler-behavior corpus.
//!
//! Every fixture in the corpus is a small source file that illustrates one
//! code-generation or hardening behavior. Its `@gallery-hints` block says
//! which flags to add or replace and which toolchains or scenarios it is valid
//! for; its `@gallery-expect` block says which instructions must or must not
//! appear in the compiled output.
//!
//! # Primary Usage
//!
//! ```ignore
//! use gallery_harness::{resolve, ArtifactDisassembler, Config, Corpus, Runner};
//!
//! let config = Config::load(Path::new("gallery.toml"))?;
//! let corpus = Corpus::load(Path::new("src"), &config.settings.extensions)?;
//! let matrix = resolve(corpus.fixtures(), &config.toolchains, &config.scenarios)?;
//! let report = Runner::new(config.settings.jobs, config.settings.timeout)?
//!     .run(&corpus, &config.toolchains, &matrix, &config.compiler, &ArtifactDisassembler, |_, _| {});
//! ```
//!
//! # Architecture
//!
//! - [`annotation`] - fixture parsing (`@gallery-hints`, `@gallery-expect`) and corpus loading
//! - [`matrix`] - toolchain profiles and the {fixture x toolchain x scenario} resolver
//! - [`verify`] - instruction patterns and per-cell verification
//! - [`toolchain`] - process-backed compiler and object/listing disassemblers
//! - [`run`] - worker pool, report, regression detection, artifact dumps
//! - [`config`] - TOML universe configuration
//! - [`core`] - shared error taxonomy

pub mod annotation;
pub mod config;
pub mod core;
pub mod matrix;
pub mod run;
pub mod toolchain;
pub mod verify;

pub use annotation::{Category, Corpus, FixtureCase, PatternAssertion, ScenarioDescriptor};
pub use config::{Config, RunSettings};
pub use core::{ConfigError, CorpusError, DescriptorError, DescriptorErrorKind, JobError};
pub use matrix::{
    resolve, InclusionState, Matrix, MatrixCell, OptimizationScenario, ToolchainProfile,
};
pub use run::{AbortReason, ArtifactWriter, CancelToken, RunReport, Runner};
pub use toolchain::{ArtifactDisassembler, CommandCompiler};
pub use verify::{verify, Compiler, Disassembler, Instruction, Verdict, VerificationResult};
