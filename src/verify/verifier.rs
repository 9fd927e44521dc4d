//! Per-cell verification: compile, disassemble, evaluate.
//!
//! The toolchain is reached only through the [`Compiler`] and
//! [`Disassembler`] capabilities, so the verifier stays deterministic and
//! can be driven by closures returning canned instruction streams.

use super::pattern::Instruction;
use crate::annotation::{Category, FixtureCase};
use crate::core::{JobError, JobResult};
use crate::matrix::{InclusionState, MatrixCell, ToolchainProfile};
use log::debug;
use serde::Serialize;
use std::time::{Duration, Instant};

/// What a successful compile produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Object file or executable.
    Object,
    /// Textual assembly listing.
    Listing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn object(bytes: Vec<u8>) -> Self {
        Self {
            kind: ArtifactKind::Object,
            bytes,
        }
    }

    pub fn listing(text: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Listing,
            bytes: text.into().into_bytes(),
        }
    }
}

/// Everything a compiler collaborator needs for one job.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub toolchain: &'a ToolchainProfile,
    pub fixture: &'a str,
    pub source: &'a str,
    /// File name to give the source, e.g. `input.c`.
    pub input_name: String,
    pub flags: &'a [String],
    /// Wall-clock budget. Implementations must kill the process when it runs out.
    pub timeout: Duration,
}

/// `compile(sourceText, flagTokens) → artifact | diagnostic`.
///
/// Invoked concurrently from the worker pool; implementations must keep
/// per-job scratch state private.
pub trait Compiler: Sync {
    fn compile(&self, request: &CompileRequest<'_>) -> JobResult<Artifact>;
}

/// `disassemble(artifact) → ordered instruction stream`.
pub trait Disassembler: Sync {
    fn disassemble(&self, artifact: &Artifact) -> JobResult<Vec<Instruction>>;
}

impl<F> Compiler for F
where
    F: Fn(&CompileRequest<'_>) -> JobResult<Artifact> + Sync,
{
    fn compile(&self, request: &CompileRequest<'_>) -> JobResult<Artifact> {
        self(request)
    }
}

impl<F> Disassembler for F
where
    F: Fn(&Artifact) -> JobResult<Vec<Instruction>> + Sync,
{
    fn disassemble(&self, artifact: &Artifact) -> JobResult<Vec<Instruction>> {
        self(artifact)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Pass,
    Fail,
    Inapplicable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionResult {
    pub index: usize,
    pub identity: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Why a cell failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Compile,
    Timeout,
    Disassemble,
    Io,
    Assertion,
    /// A collaborator panicked while handling the job.
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<JobError> for Failure {
    fn from(err: JobError) -> Self {
        let kind = match &err {
            JobError::Compile { .. } => FailureKind::Compile,
            JobError::Timeout { .. } => FailureKind::Timeout,
            JobError::Disassemble { .. } => FailureKind::Disassemble,
            JobError::Io { .. } => FailureKind::Io,
        };
        let message = match err {
            JobError::Compile { diagnostic } => diagnostic,
            other => other.to_string(),
        };
        Self { kind, message }
    }
}

/// Verdict for one matrix cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub fixture: String,
    pub toolchain: String,
    pub scenario: String,
    pub category: Category,
    pub inclusion: InclusionState,
    pub flags: Vec<String>,
    pub verdict: Verdict,
    pub assertions: Vec<AssertionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_count: Option<usize>,
    pub elapsed_ms: u64,
    /// Disassembled stream, kept for artifact dumps only.
    #[serde(skip)]
    pub listing: Vec<Instruction>,
}

impl VerificationResult {
    fn new(cell: &MatrixCell, fixture: &FixtureCase, verdict: Verdict) -> Self {
        Self {
            fixture: cell.fixture.clone(),
            toolchain: cell.toolchain.clone(),
            scenario: cell.scenario.clone(),
            category: fixture.category,
            inclusion: cell.inclusion,
            flags: cell.resolved_flags.clone(),
            verdict,
            assertions: Vec::new(),
            failure: None,
            instruction_count: None,
            elapsed_ms: 0,
            listing: Vec::new(),
        }
    }

    /// Skip result for a cell that is not included.
    pub fn skipped(cell: &MatrixCell, fixture: &FixtureCase) -> Self {
        let mut result = Self::new(cell, fixture, Verdict::Skip);
        result.assertions = inapplicable(fixture);
        result
    }

    /// Fail result for a job whose compiler or disassembler panicked.
    pub fn panicked(cell: &MatrixCell, fixture: &FixtureCase, message: impl Into<String>) -> Self {
        let failure = Failure {
            kind: FailureKind::Panic,
            message: message.into(),
        };
        Self::failed(cell, fixture, failure, Instant::now())
    }

    fn failed(
        cell: &MatrixCell,
        fixture: &FixtureCase,
        failure: Failure,
        started: Instant,
    ) -> Self {
        let mut result = Self::new(cell, fixture, Verdict::Fail);
        result.assertions = inapplicable(fixture);
        result.failure = Some(failure);
        result.elapsed_ms = elapsed_ms(started);
        result
    }
}

fn inapplicable(fixture: &FixtureCase) -> Vec<AssertionResult> {
    fixture
        .assertions
        .iter()
        .map(|a| AssertionResult {
            index: a.index,
            identity: a.identity(),
            outcome: Outcome::Inapplicable,
            diagnostic: None,
        })
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Verify one cell.
///
/// Cells that are not included return `Skip` without touching the
/// collaborators. A compile or disassembly failure is a `Fail` with no
/// assertion evaluated; otherwise the verdict is `Pass` iff every applicable
/// assertion passes.
pub fn verify(
    cell: &MatrixCell,
    fixture: &FixtureCase,
    toolchain: &ToolchainProfile,
    compiler: &dyn Compiler,
    disassembler: &dyn Disassembler,
    timeout: Duration,
) -> VerificationResult {
    if cell.inclusion != InclusionState::Included {
        return VerificationResult::skipped(cell, fixture);
    }

    let started = Instant::now();
    debug!(
        "Compiling {} with {} [{}]: {}",
        cell.fixture,
        cell.toolchain,
        cell.scenario,
        cell.resolved_flags.join(" ")
    );
    let request = CompileRequest {
        toolchain,
        fixture: &fixture.id,
        source: &fixture.source,
        input_name: fixture.input_name(),
        flags: &cell.resolved_flags,
        timeout,
    };
    let artifact = match compiler.compile(&request) {
        Ok(artifact) => artifact,
        Err(err) => return VerificationResult::failed(cell, fixture, err.into(), started),
    };
    if started.elapsed() >= timeout {
        let err = JobError::Timeout { limit: timeout };
        return VerificationResult::failed(cell, fixture, err.into(), started);
    }

    let listing = match disassembler.disassemble(&artifact) {
        Ok(listing) => listing,
        Err(err) => return VerificationResult::failed(cell, fixture, err.into(), started),
    };

    let mut result = VerificationResult::new(cell, fixture, Verdict::Pass);
    let mut first_failure: Option<String> = None;
    for assertion in &fixture.assertions {
        let identity = assertion.identity();
        let applies = assertion.applies(&cell.scenario, &toolchain.id, &toolchain.family);
        let (outcome, diagnostic) = if !applies {
            (Outcome::Inapplicable, None)
        } else {
            match assertion.evaluate(&listing) {
                Ok(()) => (Outcome::Pass, None),
                Err(diagnostic) => {
                    first_failure.get_or_insert_with(|| diagnostic.clone());
                    (Outcome::Fail, Some(diagnostic))
                }
            }
        };
        result.assertions.push(AssertionResult {
            index: assertion.index,
            identity,
            outcome,
            diagnostic,
        });
    }

    if let Some(message) = first_failure {
        result.verdict = Verdict::Fail;
        result.failure = Some(Failure {
            kind: FailureKind::Assertion,
            message,
        });
    }
    result.instruction_count = Some(listing.len());
    result.listing = listing;
    result.elapsed_ms = elapsed_ms(started);
    debug!(
        "{} on {} [{}]: {:?}",
        cell.fixture, cell.toolchain, cell.scenario, result.verdict
    );
    result
}
