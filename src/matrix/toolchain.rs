//! Toolchain profiles and optimization scenarios.
//!
//! A toolchain identifier is a vendor + version + architecture triple such as
//! `gcc-15.2-x64`. Compiler Explorer style ids (`cg152`, `clang1910`,
//! `vc_v19_44_VS17_14_x64`) are decomposed heuristically; configuration can
//! override any part.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Dotted numeric version, compared component-wise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct ToolchainVersion {
    components: Vec<u64>,
    raw: String,
}

impl ToolchainVersion {
    /// Every run of ASCII digits becomes one component: `19.44` → [19, 44], `v2` → [2].
    pub fn parse(raw: &str) -> Self {
        let components = raw
            .split(|c: char| !c.is_ascii_digit())
            .filter(|run| !run.is_empty())
            .filter_map(|run| run.parse().ok())
            .collect();
        Self {
            components,
            raw: raw.to_string(),
        }
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for ToolchainVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components
            .cmp(&other.components)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ToolchainVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ToolchainVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<ToolchainVersion> for String {
    fn from(version: ToolchainVersion) -> Self {
        version.raw
    }
}

/// Instruction set implied by an identifier fragment. Defaults to `amd64`.
pub fn infer_arch(text: &str) -> &'static str {
    let t = text.to_ascii_lowercase();
    let has = |needle: &str| t.contains(needle);
    if has("avr") {
        "avr"
    } else if has("arm64") || has("aarch64") || has("armv8") {
        "aarch64"
    } else if has("arm") {
        "arm32"
    } else if has("mips64") {
        "mips64"
    } else if has("mips") {
        "mips"
    } else if has("sparc64") {
        "sparc64"
    } else if has("sparc") {
        "sparc"
    } else if has("riscv64") || has("rv64") {
        "riscv64"
    } else if has("riscv") || has("rv32") {
        "riscv32"
    } else if has("powerpc64") || has("ppc64") {
        "powerpc64"
    } else if has("powerpc") || has("ppc") {
        "powerpc"
    } else if has("x86") || has("i386") || has("i686") {
        "x86"
    } else {
        "amd64"
    }
}

/// A compiler installation the corpus can be compiled with. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainProfile {
    pub id: String,
    /// Vendor family; regressions are only reported within one family.
    pub family: String,
    pub version: ToolchainVersion,
    pub arch: String,
    /// Baseline flags keyed by scenario label.
    pub baseline: BTreeMap<String, Vec<String>>,
}

impl ToolchainProfile {
    /// Create a profile, deriving family, version and architecture from the id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let parts: Vec<&str> = id.split('-').collect();
        let (family, version, arch) = match parts.as_slice() {
            [family, middle @ .., last] if parts.len() >= 3 => {
                (family.to_string(), middle.join("-"), infer_arch(last))
            }
            [family, version] => (family.to_string(), version.to_string(), infer_arch(version)),
            _ => {
                let split = id
                    .find(|c: char| !c.is_ascii_alphabetic())
                    .unwrap_or(id.len());
                let family = if split == 0 { id.as_str() } else { &id[..split] };
                (family.to_string(), id[split..].to_string(), infer_arch(&id))
            }
        };
        Self {
            version: ToolchainVersion::parse(&version),
            family,
            arch: arch.to_string(),
            id,
            baseline: BTreeMap::new(),
        }
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = family.into();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = ToolchainVersion::parse(version);
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_baseline<I, S>(mut self, scenario: impl Into<String>, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.baseline
            .insert(scenario.into(), flags.into_iter().map(Into::into).collect());
        self
    }

    /// Baseline flags for a scenario label. An exact match wins; otherwise
    /// the label is compared case-insensitively.
    pub fn baseline(&self, scenario: &str) -> Option<&[String]> {
        self.baseline
            .get(scenario)
            .or_else(|| {
                self.baseline
                    .iter()
                    .find(|(label, _)| label.eq_ignore_ascii_case(scenario))
                    .map(|(_, flags)| flags)
            })
            .map(Vec::as_slice)
    }
}

/// A named optimization configuration. Its flags live on each toolchain profile.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OptimizationScenario {
    pub label: String,
}

impl OptimizationScenario {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triple_identifier() {
        let profile = ToolchainProfile::new("compilerA-19.44-x64");
        assert_eq!(profile.family, "compilerA");
        assert_eq!(profile.version.components(), [19, 44]);
        assert_eq!(profile.arch, "amd64");

        let arm = ToolchainProfile::new("gcc-14.2-arm64");
        assert_eq!(arm.arch, "aarch64");
    }

    #[test]
    fn test_compiler_explorer_identifiers() {
        let gcc = ToolchainProfile::new("cg152");
        assert_eq!(gcc.family, "cg");
        assert_eq!(gcc.version.components(), [152]);

        let avr = ToolchainProfile::new("avrg1520");
        assert_eq!(avr.family, "avrg");
        assert_eq!(avr.arch, "avr");

        let msvc = ToolchainProfile::new("vc_v19_44_VS17_14_x86");
        assert_eq!(msvc.family, "vc");
        assert_eq!(msvc.arch, "x86");
    }

    #[test]
    fn test_two_part_identifier() {
        let profile = ToolchainProfile::new("vendorA-v2");
        assert_eq!(profile.family, "vendorA");
        assert_eq!(profile.version.components(), [2]);
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(ToolchainVersion::parse("9.4") < ToolchainVersion::parse("10.1"));
        assert!(ToolchainVersion::parse("19.44") > ToolchainVersion::parse("19.4"));
        assert!(ToolchainVersion::parse("v1") < ToolchainVersion::parse("v2"));
    }

    #[test]
    fn test_overrides() {
        let profile = ToolchainProfile::new("cg152")
            .with_family("gcc")
            .with_version("15.2")
            .with_arch("x86")
            .with_baseline("O2", ["-O2"]);
        assert_eq!(profile.family, "gcc");
        assert_eq!(profile.version.as_str(), "15.2");
        assert_eq!(profile.baseline("O2").unwrap(), ["-O2"]);
        assert!(profile.baseline("O3").is_none());
    }
}
