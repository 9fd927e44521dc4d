//! Fixture cases: one example source unit plus its parsed annotations.

use super::expect::{PatternAssertion, EXPECT_MARKER};
use super::hints::{ScenarioDescriptor, HINTS_MARKER};
use crate::core::DescriptorError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Closed taxonomy of fixture categories. Mirrors the corpus's top-level directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Arithmetic,
    ControlFlow,
    Hardening,
    Loops,
    Memory,
    Security,
    Simd,
    StringLiterals,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Arithmetic,
        Category::ControlFlow,
        Category::Hardening,
        Category::Loops,
        Category::Memory,
        Category::Security,
        Category::Simd,
        Category::StringLiterals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arithmetic => "arithmetic",
            Self::ControlFlow => "control-flow",
            Self::Hardening => "hardening",
            Self::Loops => "loops",
            Self::Memory => "memory",
            Self::Security => "security",
            Self::Simd => "simd",
            Self::StringLiterals => "string-literals",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One example source unit under test. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixtureCase {
    /// Path under the corpus root without extension, `/`-separated.
    pub id: String,
    pub title: String,
    pub category: Category,
    /// Source file extension including the dot (`.c`, `.cpp`), used to name the compiler input.
    pub extension: String,
    #[serde(skip)]
    pub source: String,
    pub assertions: Vec<PatternAssertion>,
    pub descriptor: ScenarioDescriptor,
}

impl FixtureCase {
    /// Build a fixture from its source text, parsing both annotation blocks.
    pub fn parse(
        id: impl Into<String>,
        category: Category,
        extension: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, DescriptorError> {
        let id = id.into();
        let source = source.into();
        let descriptor = ScenarioDescriptor::from_source(&source)?;
        let assertions = PatternAssertion::from_source(&source)?;
        let title = title_of(&source).unwrap_or_else(|| {
            id.rsplit('/').next().unwrap_or(id.as_str()).to_string()
        });
        Ok(Self {
            id,
            title,
            category,
            extension: extension.into(),
            source,
            assertions,
            descriptor,
        })
    }

    /// File name handed to the compiler for this fixture.
    pub fn input_name(&self) -> String {
        format!("input{}", self.extension)
    }
}

/// First non-blank line of the first block comment that is not an annotation.
fn title_of(source: &str) -> Option<String> {
    let mut rest = source;
    while let Some(open) = rest.find("/*") {
        let after = &rest[open + 2..];
        let close = after.find("*/")?;
        let body = &after[..close];
        rest = &after[close + 2..];
        if body.contains(HINTS_MARKER) || body.contains(EXPECT_MARKER) {
            continue;
        }
        let line = body
            .lines()
            .map(|l| l.trim().trim_start_matches('*').trim())
            .find(|l| !l.is_empty());
        if let Some(line) = line {
            return Some(line.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK_PROTECTOR: &str = r#"/* @gallery-hints
 *   extra-flags: -fstack-protector-all
 *   compiler-exclude: vc_v19_44_VS17_14_x64, vc_v19_44_VS17_14_x86
 */

/*
 * Stack Protector (Stack Canary)
 *
 * With -fstack-protector-all the compiler inserts a canary value.
 */

/* @gallery-expect
 *   must-contain: call __stack_chk_fail
 */
void copy(char *dst, const char *src);
"#;

    #[test]
    fn test_parse_fixture() {
        let fixture = FixtureCase::parse(
            "hardening/stack-protector",
            Category::Hardening,
            ".c",
            STACK_PROTECTOR,
        )
        .unwrap();
        assert_eq!(fixture.title, "Stack Protector (Stack Canary)");
        assert_eq!(fixture.descriptor.extra_flags(), ["-fstack-protector-all"]);
        assert_eq!(fixture.descriptor.compiler_exclude.len(), 2);
        assert_eq!(fixture.assertions.len(), 1);
        assert_eq!(fixture.input_name(), "input.c");
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let fixture =
            FixtureCase::parse("loops/unrollme-2", Category::Loops, ".c", "int f(void);").unwrap();
        assert_eq!(fixture.title, "unrollme-2");
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("graphics".parse::<Category>().is_err());
    }
}
