// This module loads the toolchain/scenario universe and run settings from a TOML file. The
// file is read once per run and validated as a whole before anything is scheduled: every
// problem here is a ConfigError, which is fatal because the matrix cannot be resolved
// against an inconsistent universe. Besides the ToolchainProfiles and OptimizationScenarios
// the resolver needs, it also yields the CommandCompiler describing how each toolchain is
// invoked.

//! Universe configuration.

use crate::annotation::DEFAULT_EXTENSIONS;
use crate::core::{ConfigError, ConfigResult};
use crate::matrix::{OptimizationScenario, ToolchainProfile};
use crate::toolchain::{CommandCompiler, ToolchainCommand};
use crate::verify::ArtifactKind;
use log::debug;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

/// Per-job timeout when the config does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    run: RunSection,
    #[serde(default, rename = "scenario")]
    scenarios: Vec<ScenarioSection>,
    #[serde(default, rename = "toolchain")]
    toolchains: Vec<ToolchainSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunSection {
    jobs: Option<usize>,
    timeout_secs: Option<u64>,
    max_failures: Option<usize>,
    extensions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioSection {
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolchainSection {
    id: String,
    family: Option<String>,
    version: Option<String>,
    arch: Option<String>,
    command: Option<String>,
    args: Option<Vec<String>>,
    #[serde(default)]
    output: OutputKind,
    #[serde(default)]
    baseline: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputKind {
    #[default]
    Object,
    Assembly,
}

impl From<OutputKind> for ArtifactKind {
    fn from(kind: OutputKind) -> Self {
        match kind {
            OutputKind::Object => ArtifactKind::Object,
            OutputKind::Assembly => ArtifactKind::Listing,
        }
    }
}

/// Run-wide settings from the `[run]` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub jobs: usize,
    pub timeout: Duration,
    /// Stop dispatching once this many cells have failed.
    pub max_failures: Option<usize>,
    pub extensions: Vec<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            timeout: DEFAULT_TIMEOUT,
            max_failures: None,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A validated toolchain/scenario universe.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: RunSettings,
    pub toolchains: Vec<ToolchainProfile>,
    pub scenarios: Vec<OptimizationScenario>,
    pub compiler: CommandCompiler,
}

impl Config {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loading universe from {}", path.display());
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> ConfigResult<Self> {
        let file: ConfigFile = toml::from_str(text)?;

        let mut settings = RunSettings::default();
        if let Some(jobs) = file.run.jobs {
            if jobs == 0 {
                return Err(ConfigError::NoWorkers);
            }
            settings.jobs = jobs;
        }
        if let Some(secs) = file.run.timeout_secs {
            settings.timeout = Duration::from_secs(secs);
        }
        settings.max_failures = file.run.max_failures;
        if let Some(extensions) = file.run.extensions {
            settings.extensions = extensions;
        }

        if file.scenarios.is_empty() {
            return Err(ConfigError::NoScenarios);
        }
        let mut labels = BTreeSet::new();
        let mut scenarios = Vec::with_capacity(file.scenarios.len());
        for section in file.scenarios {
            if let Some(reason) = path_component_problem(&section.label) {
                return Err(ConfigError::InvalidScenario {
                    label: section.label,
                    reason: reason.to_string(),
                });
            }
            if !labels.insert(section.label.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateScenario {
                    label: section.label,
                });
            }
            scenarios.push(OptimizationScenario::new(section.label));
        }

        if file.toolchains.is_empty() {
            return Err(ConfigError::NoToolchains);
        }
        let mut ids = BTreeSet::new();
        let mut toolchains = Vec::with_capacity(file.toolchains.len());
        let mut compiler = CommandCompiler::new();
        for section in file.toolchains {
            validate_id(&section.id)?;
            if !ids.insert(section.id.clone()) {
                return Err(ConfigError::DuplicateToolchain { id: section.id });
            }

            let mut profile = ToolchainProfile::new(section.id.as_str());
            if let Some(family) = section.family {
                profile = profile.with_family(family);
            }
            if let Some(version) = section.version {
                profile = profile.with_version(&version);
            }
            if let Some(arch) = section.arch {
                profile = profile.with_arch(arch);
            }
            for scenario in &scenarios {
                let flags = section
                    .baseline
                    .iter()
                    .find(|(label, _)| label.eq_ignore_ascii_case(&scenario.label))
                    .map(|(_, flags)| flags)
                    .ok_or_else(|| ConfigError::MissingBaseline {
                        toolchain: section.id.clone(),
                        scenario: scenario.label.clone(),
                    })?;
                profile = profile.with_baseline(scenario.label.as_str(), flags.iter().cloned());
            }

            let program = section.command.unwrap_or_else(|| profile.family.clone());
            if program.trim().is_empty() {
                return Err(ConfigError::InvalidToolchain {
                    id: section.id,
                    reason: "empty command".to_string(),
                });
            }
            let mut command = ToolchainCommand::new(program, section.output.into());
            if let Some(args) = section.args {
                command = command.with_args(args);
            }
            debug!(
                "Toolchain {}: family {}, version {}, arch {}",
                profile.id, profile.family, profile.version, profile.arch
            );
            compiler.insert(section.id, command);
            toolchains.push(profile);
        }

        Ok(Self {
            settings,
            toolchains,
            scenarios,
            compiler,
        })
    }

    /// Narrow the universe to the named toolchains and scenarios. An empty
    /// filter keeps everything; naming something the universe lacks is fatal.
    pub fn select(mut self, toolchains: &[String], scenarios: &[String]) -> ConfigResult<Self> {
        if !toolchains.is_empty() {
            for id in toolchains {
                if !self.toolchains.iter().any(|t| &t.id == id) {
                    return Err(ConfigError::UnknownToolchain { id: id.clone() });
                }
            }
            self.toolchains.retain(|t| toolchains.contains(&t.id));
        }
        if !scenarios.is_empty() {
            for label in scenarios {
                if !self
                    .scenarios
                    .iter()
                    .any(|s| s.label.eq_ignore_ascii_case(label))
                {
                    return Err(ConfigError::UnknownScenario {
                        label: label.clone(),
                    });
                }
            }
            self.scenarios
                .retain(|s| scenarios.iter().any(|l| l.eq_ignore_ascii_case(&s.label)));
        }
        Ok(self)
    }
}

/// Toolchain ids become directory names in artifact dumps.
fn validate_id(id: &str) -> ConfigResult<()> {
    match path_component_problem(id) {
        Some(reason) => Err(ConfigError::InvalidToolchain {
            id: id.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Why `name` cannot serve as a single directory name in the artifact tree.
/// Toolchain ids and scenario labels both end up as one.
pub(crate) fn path_component_problem(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        Some("empty identifier")
    } else if name.contains(['/', '\\']) || name.contains(char::is_whitespace) {
        Some("identifier must not contain path separators or whitespace")
    } else if name == "." || name == ".." {
        Some("identifier must not be a relative path component")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIVERSE: &str = r#"
[run]
jobs = 2
timeout_secs = 5
max_failures = 3

[[scenario]]
label = "O0"

[[scenario]]
label = "O2"

[[toolchain]]
id = "gcc-15.2-x64"
args = ["{flags}", "-c", "{input}", "-o", "{output}"]
[toolchain.baseline]
O0 = ["-O0"]
O2 = ["-O2", "-fno-plt"]

[[toolchain]]
id = "cg152"
family = "gcc"
version = "15.2"
command = "/opt/compiler-explorer/gcc-15.2.0/bin/gcc"
output = "assembly"
[toolchain.baseline]
O0 = []
O2 = ["-O2"]
"#;

    #[test]
    fn test_parse_universe() {
        let config = Config::parse(UNIVERSE).unwrap();
        assert_eq!(config.settings.jobs, 2);
        assert_eq!(config.settings.timeout, Duration::from_secs(5));
        assert_eq!(config.settings.max_failures, Some(3));
        assert_eq!(config.settings.extensions.len(), DEFAULT_EXTENSIONS.len());

        let labels: Vec<_> = config.scenarios.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["O0", "O2"]);

        let gcc = &config.toolchains[0];
        assert_eq!(gcc.family, "gcc");
        assert_eq!(gcc.baseline("O2").unwrap(), ["-O2", "-fno-plt"]);
        let command = config.compiler.command("gcc-15.2-x64").unwrap();
        assert_eq!(command.program, "gcc");
        assert_eq!(command.output, ArtifactKind::Object);

        let ce = &config.toolchains[1];
        assert_eq!(ce.family, "gcc");
        assert_eq!(ce.version.components(), [15, 2]);
        let command = config.compiler.command("cg152").unwrap();
        assert_eq!(command.output, ArtifactKind::Listing);
        assert_eq!(command.args, ToolchainCommand::default_args(ArtifactKind::Listing));
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse(
            "[[scenario]]\nlabel = \"O2\"\n[[toolchain]]\nid = \"clang-19-x64\"\nbaseline = { O2 = [\"-O2\"] }\n",
        )
        .unwrap();
        assert!(config.settings.jobs >= 1);
        assert_eq!(config.settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.settings.max_failures, None);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            Config::parse("[[toolchain]]\nid = \"a-1\"\n"),
            Err(ConfigError::NoScenarios)
        ));
        assert!(matches!(
            Config::parse("[[scenario]]\nlabel = \"O2\"\n"),
            Err(ConfigError::NoToolchains)
        ));
        assert!(matches!(
            Config::parse("[run]\njobs = 0\n"),
            Err(ConfigError::NoWorkers)
        ));
        assert!(matches!(
            Config::parse("[[scenario]]\nlabel = \"O2\"\n[[scenario]]\nlabel = \"o2\"\n"),
            Err(ConfigError::DuplicateScenario { .. })
        ));

        let missing = "[[scenario]]\nlabel = \"O2\"\n[[scenario]]\nlabel = \"O3\"\n\
                       [[toolchain]]\nid = \"a-1\"\nbaseline = { O2 = [] }\n";
        match Config::parse(missing) {
            Err(ConfigError::MissingBaseline { toolchain, scenario }) => {
                assert_eq!(toolchain, "a-1");
                assert_eq!(scenario, "O3");
            }
            other => panic!("expected MissingBaseline, got {other:?}"),
        }

        let duplicate = "[[scenario]]\nlabel = \"O2\"\n\
                         [[toolchain]]\nid = \"a-1\"\nbaseline = { O2 = [] }\n\
                         [[toolchain]]\nid = \"a-1\"\nbaseline = { O2 = [] }\n";
        assert!(matches!(
            Config::parse(duplicate),
            Err(ConfigError::DuplicateToolchain { .. })
        ));

        let bad_id = "[[scenario]]\nlabel = \"O2\"\n[[toolchain]]\nid = \"../x\"\nbaseline = { O2 = [] }\n";
        assert!(matches!(
            Config::parse(bad_id),
            Err(ConfigError::InvalidToolchain { .. })
        ));

        let bad_label = "[[scenario]]\nlabel = \"../../escaped\"\n\
                         [[toolchain]]\nid = \"a-1\"\nbaseline = { O2 = [] }\n";
        match Config::parse(bad_label) {
            Err(ConfigError::InvalidScenario { label, .. }) => assert_eq!(label, "../../escaped"),
            other => panic!("expected InvalidScenario, got {other:?}"),
        }
        assert!(matches!(
            Config::parse("[[scenario]]\nlabel = \"..\"\n"),
            Err(ConfigError::InvalidScenario { .. })
        ));

        assert!(matches!(
            Config::parse("[[scenario]]\nlabel = \"O2\"\nlevel = 2\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_select() {
        let config = Config::parse(UNIVERSE).unwrap();
        let narrowed = config
            .clone()
            .select(&["cg152".to_string()], &["o2".to_string()])
            .unwrap();
        assert_eq!(narrowed.toolchains.len(), 1);
        assert_eq!(narrowed.scenarios, [OptimizationScenario::new("O2")]);

        let all = config.clone().select(&[], &[]).unwrap();
        assert_eq!(all.toolchains.len(), 2);

        assert!(matches!(
            config.clone().select(&["icc-2021".to_string()], &[]),
            Err(ConfigError::UnknownToolchain { .. })
        ));
        assert!(matches!(
            config.select(&[], &["Ofast".to_string()]),
            Err(ConfigError::UnknownScenario { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("universe.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
