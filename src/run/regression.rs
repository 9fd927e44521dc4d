//! Cross-version regression detection.
//!
//! Assertion outcomes are grouped by (fixture, assertion, family, arch,
//! scenario) and ordered by toolchain version. Each pair of adjacent versions
//! that both produced a Pass/Fail outcome is compared: Pass then Fail is a
//! regression, Fail then Pass an improvement. Versions of different families
//! never share a group, so a vendor switch is never reported.

use crate::matrix::{ToolchainProfile, ToolchainVersion};
use crate::verify::{Outcome, VerificationResult};
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One outcome change between adjacent toolchain versions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Transition {
    pub fixture: String,
    /// Canonical assertion text.
    pub assertion: String,
    pub family: String,
    pub arch: String,
    pub scenario: String,
    /// Toolchain id of the older version.
    pub from: String,
    /// Toolchain id of the newer version.
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transitions {
    pub regressions: Vec<Transition>,
    pub improvements: Vec<Transition>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey<'a> {
    fixture: &'a str,
    index: usize,
    assertion: &'a str,
    family: &'a str,
    arch: &'a str,
    scenario: &'a str,
}

/// Compare adjacent versions within every group.
pub fn detect(results: &[VerificationResult], toolchains: &[ToolchainProfile]) -> Transitions {
    let profiles: HashMap<&str, &ToolchainProfile> =
        toolchains.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut groups: BTreeMap<GroupKey<'_>, Vec<(&ToolchainVersion, &str, Outcome)>> =
        BTreeMap::new();
    for result in results {
        let Some(profile) = profiles.get(result.toolchain.as_str()) else {
            continue;
        };
        for assertion in &result.assertions {
            if !matches!(assertion.outcome, Outcome::Pass | Outcome::Fail) {
                continue;
            }
            let key = GroupKey {
                fixture: &result.fixture,
                index: assertion.index,
                assertion: &assertion.identity,
                family: &profile.family,
                arch: &profile.arch,
                scenario: &result.scenario,
            };
            groups
                .entry(key)
                .or_default()
                .push((&profile.version, &profile.id, assertion.outcome));
        }
    }

    let mut transitions = Transitions::default();
    for (key, mut history) in groups {
        history.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));
        for pair in history.windows(2) {
            let (older_version, older, before) = pair[0];
            let (newer_version, newer, after) = pair[1];
            if older_version == newer_version || before == after {
                continue;
            }
            let transition = Transition {
                fixture: key.fixture.to_string(),
                assertion: key.assertion.to_string(),
                family: key.family.to_string(),
                arch: key.arch.to_string(),
                scenario: key.scenario.to_string(),
                from: older.to_string(),
                to: newer.to_string(),
            };
            if before == Outcome::Pass {
                debug!(
                    "Regression in {} `{}`: {} -> {}",
                    transition.fixture, transition.assertion, older, newer
                );
                transitions.regressions.push(transition);
            } else {
                transitions.improvements.push(transition);
            }
        }
    }
    transitions
}
