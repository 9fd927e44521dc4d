// This module is the matrix resolver. It expands the universe of toolchain profiles and
// optimization scenarios against every fixture's scenario descriptor, producing exactly one
// immutable MatrixCell per (fixture, toolchain, scenario) triple. Skipped cells are kept
// with the rule that skipped them so reports can account for every triple. Resolution is a
// pure function: it runs once, single-threaded, before any job is dispatched.

//! Scenario matrix resolution.

pub mod resolver;
pub mod toolchain;

pub use resolver::{inclusion, resolve, resolve_flags, InclusionState, Matrix, MatrixCell};
pub use toolchain::{infer_arch, OptimizationScenario, ToolchainProfile, ToolchainVersion};
