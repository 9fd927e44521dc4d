// This module is the pattern verifier. Given an included matrix cell it drives the compile
// and disassemble capabilities, then evaluates each applicable PatternAssertion against the
// ordered instruction stream. Job-scoped failures (compile diagnostics, timeouts, broken
// artifacts) are folded into a Fail verdict here, so nothing a toolchain does can escape
// as an error into the aggregator.

//! Pattern verification of compiled cells.

pub mod pattern;
pub mod verifier;

pub use pattern::Instruction;
pub use verifier::{
    verify, Artifact, ArtifactKind, AssertionResult, CompileRequest, Compiler, Disassembler,
    Failure, FailureKind, Outcome, Verdict, VerificationResult,
};
