//! Expansion of fixtures × toolchains × scenarios into matrix cells.

use super::toolchain::{OptimizationScenario, ToolchainProfile};
use crate::annotation::{FixtureCase, FlagMode, ScenarioDescriptor};
use crate::core::{ConfigError, ConfigResult};
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Whether a cell is executed, and if not, which rule skipped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InclusionState {
    Included,
    SkippedCompilerNotAllowed,
    SkippedCompilerExcluded,
    SkippedScenarioExcluded,
    SkippedScenarioNotSelected,
}

impl InclusionState {
    pub fn is_included(self) -> bool {
        self == Self::Included
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Included => "included",
            Self::SkippedCompilerNotAllowed => "skipped: compiler not allowed",
            Self::SkippedCompilerExcluded => "skipped: compiler excluded",
            Self::SkippedScenarioExcluded => "skipped: scenario excluded",
            Self::SkippedScenarioNotSelected => "skipped: scenario not selected",
        }
    }
}

impl fmt::Display for InclusionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved pairing of one fixture with one toolchain and one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixCell {
    pub fixture: String,
    pub toolchain: String,
    pub scenario: String,
    /// Final flag tokens. Empty for skipped cells.
    pub resolved_flags: Vec<String>,
    pub inclusion: InclusionState,
}

impl MatrixCell {
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.fixture, &self.toolchain, &self.scenario)
    }
}

/// Resolved cells in (fixture, toolchain, scenario) order, one per triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Matrix {
    cells: Vec<MatrixCell>,
}

impl Matrix {
    pub fn cells(&self) -> &[MatrixCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Look a cell up by its triple. Cells are sorted, so this is a binary search.
    pub fn get(&self, fixture: &str, toolchain: &str, scenario: &str) -> Option<&MatrixCell> {
        self.cells
            .binary_search_by(|cell| cell.key().cmp(&(fixture, toolchain, scenario)))
            .ok()
            .map(|idx| &self.cells[idx])
    }

    pub fn included(&self) -> impl Iterator<Item = &MatrixCell> + '_ {
        self.cells.iter().filter(|c| c.inclusion.is_included())
    }

    /// Number of cells in each inclusion state.
    pub fn counts(&self) -> BTreeMap<InclusionState, usize> {
        let mut counts = BTreeMap::new();
        for cell in &self.cells {
            *counts.entry(cell.inclusion).or_insert(0) += 1;
        }
        counts
    }
}

/// Decide whether a fixture runs on a toolchain under a scenario.
///
/// `compiler-only` wins over `compiler-exclude`: a toolchain matched by both
/// is included.
pub fn inclusion(
    descriptor: &ScenarioDescriptor,
    toolchain: &ToolchainProfile,
    scenario: &str,
) -> InclusionState {
    let matches = |m: &crate::annotation::ToolchainMatcher| m.matches(&toolchain.id, &toolchain.family);

    if !descriptor.compiler_only.is_empty() {
        if !descriptor.compiler_only.iter().any(matches) {
            return InclusionState::SkippedCompilerNotAllowed;
        }
    } else if descriptor.compiler_exclude.iter().any(matches) {
        return InclusionState::SkippedCompilerExcluded;
    }

    if descriptor
        .scenario_exclude
        .iter()
        .any(|label| label.eq_ignore_ascii_case(scenario))
    {
        return InclusionState::SkippedScenarioExcluded;
    }
    if !descriptor.scenario_only.is_empty()
        && !descriptor
            .scenario_only
            .iter()
            .any(|label| label.eq_ignore_ascii_case(scenario))
    {
        return InclusionState::SkippedScenarioNotSelected;
    }
    InclusionState::Included
}

/// Apply a descriptor's flag mode to a scenario's baseline flags.
///
/// Repeated flags are kept: order and repetition can matter to a toolchain.
pub fn resolve_flags(descriptor: &ScenarioDescriptor, baseline: &[String]) -> Vec<String> {
    match &descriptor.flags {
        FlagMode::Replace(flags) => flags.clone(),
        FlagMode::Extra(extra) => baseline.iter().chain(extra).cloned().collect(),
        FlagMode::Baseline => baseline.to_vec(),
    }
}

/// Expand the universe against every fixture.
///
/// Pure: output depends only on the inputs and is sorted by
/// (fixture id, toolchain id, scenario label). Repeated fixtures, toolchains
/// or scenarios collapse to their first occurrence; scenario labels compare
/// case-insensitively. Fails only if a toolchain
/// lacks baseline flags for a scenario.
pub fn resolve(
    fixtures: &[FixtureCase],
    toolchains: &[ToolchainProfile],
    scenarios: &[OptimizationScenario],
) -> ConfigResult<Matrix> {
    let mut fixture_set: BTreeMap<&str, &FixtureCase> = BTreeMap::new();
    for fixture in fixtures {
        fixture_set.entry(fixture.id.as_str()).or_insert(fixture);
    }
    let mut toolchain_set: BTreeMap<&str, &ToolchainProfile> = BTreeMap::new();
    for toolchain in toolchains {
        toolchain_set.entry(toolchain.id.as_str()).or_insert(toolchain);
    }
    let mut scenario_set: Vec<&str> = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let label = scenario.label.as_str();
        if !scenario_set.iter().any(|s| s.eq_ignore_ascii_case(label)) {
            scenario_set.push(label);
        }
    }
    scenario_set.sort_unstable();

    for toolchain in toolchain_set.values() {
        for &scenario in &scenario_set {
            if toolchain.baseline(scenario).is_none() {
                return Err(ConfigError::MissingBaseline {
                    toolchain: toolchain.id.clone(),
                    scenario: scenario.to_string(),
                });
            }
        }
    }

    let mut cells =
        Vec::with_capacity(fixture_set.len() * toolchain_set.len() * scenario_set.len());
    for fixture in fixture_set.values() {
        for toolchain in toolchain_set.values() {
            for &scenario in &scenario_set {
                let state = inclusion(&fixture.descriptor, toolchain, scenario);
                let resolved_flags = match (state, toolchain.baseline(scenario)) {
                    (InclusionState::Included, Some(baseline)) => {
                        resolve_flags(&fixture.descriptor, baseline)
                    }
                    _ => Vec::new(),
                };
                cells.push(MatrixCell {
                    fixture: fixture.id.clone(),
                    toolchain: toolchain.id.clone(),
                    scenario: scenario.to_string(),
                    resolved_flags,
                    inclusion: state,
                });
            }
        }
    }

    debug!(
        "Resolved {} cells ({} fixtures x {} toolchains x {} scenarios)",
        cells.len(),
        fixture_set.len(),
        toolchain_set.len(),
        scenario_set.len()
    );
    Ok(Matrix { cells })
}
