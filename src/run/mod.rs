// This module is the run aggregator. It is the only component allowed to schedule work or to
// stop a run early: a fixed-size worker pool executes verify() for every included matrix cell,
// the calling thread collects results (and writes optional triage artifacts), and the
// collected results are reordered into matrix order before the RunReport, including its
// cross-version regression analysis, is assembled.

//! Run scheduling and reporting.

pub mod artifacts;
pub mod pool;
pub mod regression;
pub mod report;

pub use artifacts::ArtifactWriter;
pub use pool::{CancelToken, Runner};
pub use regression::{detect, Transition, Transitions};
pub use report::{
    AbortReason, CategoryCounts, RunReport, Summary, EXIT_ABORTED, EXIT_FAILURES, EXIT_PASS,
};
