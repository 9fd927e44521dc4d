//! Run report: per-cell results, summary counts, transitions.
//!
//! The report serializes to JSON for CI gating and renders a plain-text
//! summary for humans. Its exit code distinguishes failures from an early abort.

use super::regression::{self, Transition};
use crate::annotation::{Category, RejectedFixture};
use crate::matrix::{Matrix, ToolchainProfile};
use crate::verify::{Verdict, VerificationResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Every included cell passed.
pub const EXIT_PASS: u8 = 0;
/// At least one included cell failed.
pub const EXIT_FAILURES: u8 = 1;
/// The run stopped before every included cell was attempted.
pub const EXIT_ABORTED: u8 = 2;

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum AbortReason {
    FailureThreshold { limit: usize },
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_cells: usize,
    pub included: usize,
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
    pub not_attempted: usize,
    pub rejected_fixtures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: Summary,
    pub categories: BTreeMap<Category, CategoryCounts>,
    pub results: Vec<VerificationResult>,
    pub regressions: Vec<Transition>,
    pub improvements: Vec<Transition>,
    pub rejected: Vec<RejectedFixture>,
    pub aborted: Option<AbortReason>,
}

impl RunReport {
    /// Assemble a report. `results` must be in matrix order; included cells
    /// without a result are counted as not attempted.
    pub fn new(
        matrix: &Matrix,
        results: Vec<VerificationResult>,
        toolchains: &[ToolchainProfile],
        rejected: Vec<RejectedFixture>,
        aborted: Option<AbortReason>,
    ) -> Self {
        let mut summary = Summary {
            total_cells: matrix.len(),
            included: matrix.included().count(),
            rejected_fixtures: rejected.len(),
            ..Summary::default()
        };
        let mut categories: BTreeMap<Category, CategoryCounts> = BTreeMap::new();
        for result in &results {
            let counts = categories.entry(result.category).or_default();
            match result.verdict {
                Verdict::Pass => {
                    summary.pass += 1;
                    counts.pass += 1;
                }
                Verdict::Fail => {
                    summary.fail += 1;
                    counts.fail += 1;
                }
                Verdict::Skip => {
                    summary.skip += 1;
                    counts.skip += 1;
                }
            }
        }
        summary.not_attempted = summary.included.saturating_sub(summary.pass + summary.fail);

        let transitions = regression::detect(&results, toolchains);
        Self {
            summary,
            categories,
            results,
            regressions: transitions.regressions,
            improvements: transitions.improvements,
            rejected,
            aborted,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Zero iff every included cell passed.
    pub fn exit_code(&self) -> u8 {
        if self.aborted.is_some() {
            EXIT_ABORTED
        } else if self.summary.fail > 0 || self.summary.not_attempted > 0 {
            EXIT_FAILURES
        } else {
            EXIT_PASS
        }
    }

    /// Human-readable summary: failures, transitions, per-category counts.
    pub fn write_summary(&self, out: &mut dyn Write) -> io::Result<()> {
        for result in &self.results {
            if result.verdict != Verdict::Fail {
                continue;
            }
            let message = result
                .failure
                .as_ref()
                .map(|f| f.message.lines().next().unwrap_or("").to_string())
                .unwrap_or_default();
            writeln!(
                out,
                "FAIL {} on {} [{}]: {}",
                result.fixture, result.toolchain, result.scenario, message
            )?;
        }
        for transition in &self.regressions {
            writeln!(out, "REGRESSION {}", describe(transition))?;
        }
        for transition in &self.improvements {
            writeln!(out, "improved {}", describe(transition))?;
        }
        for rejected in &self.rejected {
            writeln!(out, "rejected {}: {}", rejected.path.display(), rejected.reason)?;
        }

        if !self.categories.is_empty() {
            writeln!(out)?;
            writeln!(out, "{:<16} {:>6} {:>6} {:>6}", "category", "pass", "fail", "skip")?;
            for (category, counts) in &self.categories {
                writeln!(
                    out,
                    "{:<16} {:>6} {:>6} {:>6}",
                    category.as_str(),
                    counts.pass,
                    counts.fail,
                    counts.skip
                )?;
            }
        }

        let s = &self.summary;
        writeln!(out)?;
        writeln!(
            out,
            "{} cells: {} included, {} passed, {} failed, {} skipped, {} not attempted",
            s.total_cells, s.included, s.pass, s.fail, s.skip, s.not_attempted
        )?;
        writeln!(
            out,
            "{} regressions, {} improvements, {} rejected fixtures",
            self.regressions.len(),
            self.improvements.len(),
            s.rejected_fixtures
        )?;
        match self.aborted {
            Some(AbortReason::FailureThreshold { limit }) => {
                writeln!(out, "aborted: failure threshold of {limit} reached")?
            }
            Some(AbortReason::Cancelled) => writeln!(out, "aborted: run cancelled")?,
            None => {}
        }
        Ok(())
    }
}

fn describe(transition: &Transition) -> String {
    format!(
        "{} `{}` [{} {} {}]: {} -> {}",
        transition.fixture,
        transition.assertion,
        transition.family,
        transition.arch,
        transition.scenario,
        transition.from,
        transition.to
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::FixtureCase;
    use crate::matrix::{resolve, OptimizationScenario};
    use crate::verify::{Failure, FailureKind};

    fn fixture() -> FixtureCase {
        FixtureCase::parse("loops/unroll", Category::Loops, ".c", "int f(void);\n").unwrap()
    }

    fn matrix() -> (Matrix, Vec<ToolchainProfile>) {
        let toolchains = vec![ToolchainProfile::new("gcc-15.2-x64")
            .with_baseline("O0", ["-O0"])
            .with_baseline("O2", ["-O2"])];
        let scenarios = [OptimizationScenario::new("O0"), OptimizationScenario::new("O2")];
        let matrix = resolve(&[fixture()], &toolchains, &scenarios).unwrap();
        (matrix, toolchains)
    }

    fn result(matrix: &Matrix, idx: usize, verdict: Verdict) -> VerificationResult {
        let mut result = VerificationResult::skipped(&matrix.cells()[idx], &fixture());
        result.verdict = verdict;
        if verdict == Verdict::Fail {
            result.failure = Some(Failure {
                kind: FailureKind::Compile,
                message: "error: unknown flag\nsecond line".to_string(),
            });
        }
        result
    }

    #[test]
    fn test_counts_and_exit_codes() {
        let (matrix, toolchains) = matrix();
        let passing = RunReport::new(
            &matrix,
            vec![result(&matrix, 0, Verdict::Pass), result(&matrix, 1, Verdict::Pass)],
            &toolchains,
            Vec::new(),
            None,
        );
        assert_eq!(passing.summary.included, 2);
        assert_eq!(passing.summary.pass, 2);
        assert_eq!(passing.categories[&Category::Loops].pass, 2);
        assert_eq!(passing.exit_code(), EXIT_PASS);

        let failing = RunReport::new(
            &matrix,
            vec![result(&matrix, 0, Verdict::Pass), result(&matrix, 1, Verdict::Fail)],
            &toolchains,
            Vec::new(),
            None,
        );
        assert_eq!(failing.exit_code(), EXIT_FAILURES);

        let aborted = RunReport::new(
            &matrix,
            vec![result(&matrix, 0, Verdict::Fail)],
            &toolchains,
            Vec::new(),
            Some(AbortReason::FailureThreshold { limit: 1 }),
        );
        assert_eq!(aborted.summary.not_attempted, 1);
        assert_eq!(aborted.exit_code(), EXIT_ABORTED);
    }

    #[test]
    fn test_json_shape() {
        let (matrix, toolchains) = matrix();
        let report = RunReport::new(
            &matrix,
            vec![result(&matrix, 1, Verdict::Fail)],
            &toolchains,
            Vec::new(),
            Some(AbortReason::Cancelled),
        );
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["fail"], 1);
        assert_eq!(json["categories"]["loops"]["fail"], 1);
        assert_eq!(json["aborted"]["reason"], "cancelled");
        assert_eq!(json["results"][0]["failure"]["kind"], "compile");
        assert_eq!(json["results"][0]["scenario"], "O2");
    }

    #[test]
    fn test_human_summary() {
        let (matrix, toolchains) = matrix();
        let report = RunReport::new(
            &matrix,
            vec![result(&matrix, 0, Verdict::Pass), result(&matrix, 1, Verdict::Fail)],
            &toolchains,
            Vec::new(),
            None,
        );
        let mut out = Vec::new();
        report.write_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("FAIL loops/unroll on gcc-15.2-x64 [O2]: error: unknown flag\n"));
        assert!(text.contains("2 cells: 2 included, 1 passed, 1 failed"));
    }
}
