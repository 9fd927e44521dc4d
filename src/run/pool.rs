//! Worker pool driving the verifier across a resolved matrix.
//!
//! Workers pull included cells off a shared cursor and send finished results
//! over a channel; the calling thread is the only one that touches the
//! collection. Each result lands in the slot of its cell index exactly once,
//! and the final report is assembled in matrix order after all workers join.

use super::report::{AbortReason, RunReport};
use crate::annotation::{Corpus, FixtureCase};
use crate::core::{ConfigError, ConfigResult};
use crate::matrix::{Matrix, ToolchainProfile};
use crate::verify::{verify, Compiler, Disassembler, Verdict, VerificationResult};
use log::{debug, info, warn};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Run-scoped cancellation flag. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching new jobs. In-flight jobs still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fixed-size pool executing `verify` for every included cell.
#[derive(Debug, Clone)]
pub struct Runner {
    jobs: usize,
    timeout: Duration,
    max_failures: Option<usize>,
    cancel: CancelToken,
}

impl Runner {
    pub fn new(jobs: usize, timeout: Duration) -> ConfigResult<Self> {
        if jobs == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(Self {
            jobs,
            timeout,
            max_failures: None,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_max_failures(mut self, limit: Option<usize>) -> Self {
        self.max_failures = limit.filter(|&n| n > 0);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Verify every included cell and build the report.
    ///
    /// `observe` runs on the calling thread for each attempted cell, in
    /// completion order; artifact dumps hook in here.
    pub fn run<F>(
        &self,
        corpus: &Corpus,
        toolchains: &[ToolchainProfile],
        matrix: &Matrix,
        compiler: &dyn Compiler,
        disassembler: &dyn Disassembler,
        mut observe: F,
    ) -> RunReport
    where
        F: FnMut(&FixtureCase, &VerificationResult),
    {
        let profiles: HashMap<&str, &ToolchainProfile> =
            toolchains.iter().map(|t| (t.id.as_str(), t)).collect();
        let cells = matrix.cells();
        let mut slots: Vec<Option<VerificationResult>> = vec![None; cells.len()];
        let mut pending = Vec::new();
        for (idx, cell) in cells.iter().enumerate() {
            let Some(fixture) = corpus.get(&cell.fixture) else {
                warn!("Matrix cell references unknown fixture {}", cell.fixture);
                continue;
            };
            if !profiles.contains_key(cell.toolchain.as_str()) {
                warn!("Matrix cell references unknown toolchain {}", cell.toolchain);
                continue;
            }
            if cell.inclusion.is_included() {
                pending.push((idx, fixture));
            } else {
                slots[idx] = Some(VerificationResult::skipped(cell, fixture));
            }
        }

        let workers = self.jobs.min(pending.len());
        info!(
            "Verifying {} of {} cells on {} workers",
            pending.len(),
            cells.len(),
            workers
        );

        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let mut failures = 0usize;
        let mut aborted = None;
        let (tx, rx) = mpsc::channel::<(usize, &FixtureCase, VerificationResult)>();

        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let (cursor, stop, pending, profiles) = (&cursor, &stop, &pending, &profiles);
                let cancel = &self.cancel;
                let timeout = self.timeout;
                scope.spawn(move || loop {
                    if stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                        break;
                    }
                    let next = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(&(idx, fixture)) = pending.get(next) else {
                        break;
                    };
                    let cell = &cells[idx];
                    let Some(toolchain) = profiles.get(cell.toolchain.as_str()) else {
                        continue;
                    };
                    debug!(
                        "worker {worker}: {} on {} [{}]",
                        cell.fixture, cell.toolchain, cell.scenario
                    );
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        verify(cell, fixture, toolchain, compiler, disassembler, timeout)
                    }))
                    .unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        warn!(
                            "{} on {} [{}] panicked: {message}",
                            cell.fixture, cell.toolchain, cell.scenario
                        );
                        VerificationResult::panicked(cell, fixture, message)
                    });
                    if tx.send((idx, fixture, result)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for (idx, fixture, result) in rx {
                if result.verdict == Verdict::Fail {
                    failures += 1;
                    if let Some(limit) = self.max_failures {
                        if failures >= limit && !stop.swap(true, Ordering::SeqCst) {
                            warn!("Failure threshold of {limit} reached; stopping dispatch");
                            aborted = Some(AbortReason::FailureThreshold { limit });
                        }
                    }
                }
                observe(fixture, &result);
                slots[idx] = Some(result);
            }
        });

        let results: Vec<VerificationResult> = slots.into_iter().flatten().collect();
        let attempted = results
            .iter()
            .filter(|r| r.verdict != Verdict::Skip)
            .count();
        let not_attempted = pending.len().saturating_sub(attempted);
        if not_attempted == 0 {
            aborted = None;
        } else if aborted.is_none() {
            aborted = Some(AbortReason::Cancelled);
        }
        if not_attempted > 0 {
            warn!("{not_attempted} included cells were not attempted");
        }

        RunReport::new(
            matrix,
            results,
            toolchains,
            corpus.rejected().to_vec(),
            aborted,
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("job panicked: {text}")
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("job panicked: {text}")
    } else {
        "job panicked".to_string()
    }
}
