//! `@gallery-hints` scenario descriptors.
//!
//! A fixture may open with a structured comment such as
//!
//! ```text
//! /* @gallery-hints
//!  *   extra-flags: -D_FORTIFY_SOURCE=2
//!  *   compiler-only: cg152, clang1910
//!  *   scenario-exclude: O0
//!  */
//! ```
//!
//! The block is located in the untyped source text and parsed line by line
//! into a [`ScenarioDescriptor`]. Parsing never looks at the rest of the file.

use crate::core::{DescriptorError, DescriptorErrorKind};
use serde::Serialize;
use std::collections::BTreeSet;

/// Marker opening the scenario descriptor block.
pub const HINTS_MARKER: &str = "@gallery-hints";

/// One content line of an annotation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockLine<'a> {
    /// 1-based line number in the fixture source.
    pub line: usize,
    /// Line text with comment decoration (`*`) and surrounding whitespace removed.
    pub text: &'a str,
}

/// Locate the first `/* <marker> ... */` block and return its non-blank lines.
///
/// Returns `Ok(None)` when the fixture carries no such block.
pub(crate) fn annotation_block<'a>(
    source: &'a str,
    marker: &str,
) -> Result<Option<Vec<BlockLine<'a>>>, DescriptorError> {
    let mut search = 0;
    while let Some(rel) = source[search..].find(marker) {
        let at = search + rel;
        let content_start = at + marker.len();
        search = content_start;

        let at_boundary = source[content_start..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '-' || c == '_'));
        if !at_boundary {
            continue;
        }

        let before = source[..at].trim_end();
        let undecorated = before.trim_end_matches('*');
        if undecorated.len() == before.len() || !undecorated.ends_with('/') {
            continue;
        }

        let first_line = line_of(source, at);
        let Some(len) = source[content_start..].find("*/") else {
            return Err(DescriptorError::new(
                DescriptorErrorKind::UnterminatedBlock,
                first_line,
                format!("`{marker}` block is never closed with `*/`"),
            ));
        };

        let body = &source[content_start..content_start + len];
        let lines = body
            .split('\n')
            .enumerate()
            .map(|(offset, raw)| BlockLine {
                line: first_line + offset,
                text: raw.trim().trim_start_matches('*').trim(),
            })
            .filter(|l| !l.text.is_empty())
            .collect();
        return Ok(Some(lines));
    }
    Ok(None)
}

fn line_of(source: &str, byte_offset: usize) -> usize {
    source[..byte_offset].bytes().filter(|&b| b == b'\n').count() + 1
}

/// Closed matcher for toolchain identifiers used by `compiler-only`,
/// `compiler-exclude` and assertion qualifiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "match", content = "value", rename_all = "kebab-case")]
pub enum ToolchainMatcher {
    /// Matches a toolchain whose full identifier or vendor family equals the name.
    Name(String),
    /// `prefix*`: matches any identifier starting with the prefix.
    Prefix(String),
}

impl ToolchainMatcher {
    pub fn parse(token: &str) -> Self {
        match token.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Name(token.to_string()),
        }
    }

    pub fn matches(&self, identifier: &str, family: &str) -> bool {
        match self {
            Self::Name(name) => name == identifier || name == family,
            Self::Prefix(prefix) => identifier.starts_with(prefix.as_str()),
        }
    }
}

impl std::fmt::Display for ToolchainMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// How a fixture's flags relate to a scenario's baseline flags.
///
/// `extra-flags` and `replace-flags` are mutually exclusive, so the two modes
/// are variants of one enum rather than two optional fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "flags", rename_all = "kebab-case")]
pub enum FlagMode {
    #[default]
    Baseline,
    Extra(Vec<String>),
    Replace(Vec<String>),
}

/// Typed form of a fixture's `@gallery-hints` block. Every field defaults to
/// "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioDescriptor {
    pub flags: FlagMode,
    pub compiler_only: Vec<ToolchainMatcher>,
    pub compiler_exclude: Vec<ToolchainMatcher>,
    pub scenario_only: Vec<String>,
    pub scenario_exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum HintKey {
    ExtraFlags,
    ReplaceFlags,
    CompilerOnly,
    CompilerExclude,
    ScenarioOnly,
    ScenarioExclude,
}

impl HintKey {
    fn parse(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "extra-flags" => Some(Self::ExtraFlags),
            "replace-flags" => Some(Self::ReplaceFlags),
            "compiler-only" => Some(Self::CompilerOnly),
            "compiler-exclude" => Some(Self::CompilerExclude),
            "scenario-only" => Some(Self::ScenarioOnly),
            "scenario-exclude" => Some(Self::ScenarioExclude),
            _ => None,
        }
    }
}

impl ScenarioDescriptor {
    /// Parse the `@gallery-hints` block of a fixture, if any.
    pub fn from_source(source: &str) -> Result<Self, DescriptorError> {
        match annotation_block(source, HINTS_MARKER)? {
            Some(lines) => Self::from_lines(&lines),
            None => Ok(Self::default()),
        }
    }

    pub(crate) fn from_lines(lines: &[BlockLine<'_>]) -> Result<Self, DescriptorError> {
        let mut seen = BTreeSet::new();
        let mut extra = None;
        let mut replace = None;
        let mut descriptor = Self::default();

        for entry in lines {
            let Some((key, value)) = entry.text.split_once(':') else {
                return Err(DescriptorError::new(
                    DescriptorErrorKind::MalformedKey,
                    entry.line,
                    format!("expected `key: value`, found `{}`", entry.text),
                ));
            };
            let key_text = key.trim();
            let Some(key) = HintKey::parse(key_text) else {
                return Err(DescriptorError::new(
                    DescriptorErrorKind::MalformedKey,
                    entry.line,
                    format!("unknown key `{key_text}`"),
                ));
            };
            if !seen.insert(key) {
                return Err(DescriptorError::new(
                    DescriptorErrorKind::DuplicateKey,
                    entry.line,
                    format!("`{}` appears more than once", key_text.to_ascii_lowercase()),
                ));
            }

            let value = value.trim();
            match key {
                HintKey::ExtraFlags => extra = Some((entry.line, flag_tokens(value))),
                HintKey::ReplaceFlags => replace = Some((entry.line, flag_tokens(value))),
                HintKey::CompilerOnly => {
                    descriptor.compiler_only = set_tokens(value, entry.line)?
                        .iter()
                        .map(|t| ToolchainMatcher::parse(t))
                        .collect();
                }
                HintKey::CompilerExclude => {
                    descriptor.compiler_exclude = set_tokens(value, entry.line)?
                        .iter()
                        .map(|t| ToolchainMatcher::parse(t))
                        .collect();
                }
                HintKey::ScenarioOnly => descriptor.scenario_only = set_tokens(value, entry.line)?,
                HintKey::ScenarioExclude => {
                    descriptor.scenario_exclude = set_tokens(value, entry.line)?
                }
            }
        }

        descriptor.flags = match (extra, replace) {
            (Some(_), Some((line, _))) => {
                return Err(DescriptorError::new(
                    DescriptorErrorKind::ConflictingFlagMode,
                    line,
                    "`extra-flags` and `replace-flags` cannot be combined",
                ));
            }
            (Some((_, tokens)), None) if !tokens.is_empty() => FlagMode::Extra(tokens),
            (None, Some((_, tokens))) if !tokens.is_empty() => FlagMode::Replace(tokens),
            _ => FlagMode::Baseline,
        };
        Ok(descriptor)
    }

    pub fn extra_flags(&self) -> &[String] {
        match &self.flags {
            FlagMode::Extra(flags) => flags,
            _ => &[],
        }
    }

    pub fn replace_flags(&self) -> Option<&[String]> {
        match &self.flags {
            FlagMode::Replace(flags) => Some(flags),
            _ => None,
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        *self == Self::default()
    }
}

/// Flags split on whitespace only, so `-Wl,-z,now` stays one token.
fn flag_tokens(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Set members split on commas and whitespace; duplicates collapse, order is kept.
fn set_tokens(value: &str, line: usize) -> Result<Vec<String>, DescriptorError> {
    let mut tokens: Vec<String> = Vec::new();
    if value.is_empty() {
        return Ok(tokens);
    }
    for chunk in value.split(',') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            return Err(DescriptorError::new(
                DescriptorErrorKind::EmptyToken,
                line,
                format!("empty entry in `{value}`"),
            ));
        }
        for token in chunk.split_whitespace() {
            if !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_string());
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_block_is_unconstrained() {
        let descriptor = ScenarioDescriptor::from_source("int main(void) { return 0; }").unwrap();
        assert!(descriptor.is_unconstrained());
    }

    #[test]
    fn test_parse_fortify_block() {
        let source = r#"/* @gallery-hints
 *   extra-flags: -D_FORTIFY_SOURCE=2
 *   compiler-only: cg152, clang1910
 *   scenario-exclude: O0
 */

#include <string.h>
"#;
        let descriptor = ScenarioDescriptor::from_source(source).unwrap();
        assert_eq!(descriptor.extra_flags(), ["-D_FORTIFY_SOURCE=2"]);
        assert_eq!(
            descriptor.compiler_only,
            vec![
                ToolchainMatcher::Name("cg152".into()),
                ToolchainMatcher::Name("clang1910".into())
            ]
        );
        assert_eq!(descriptor.scenario_exclude, vec!["O0".to_string()]);
        assert!(descriptor.replace_flags().is_none());
    }

    #[test]
    fn test_replace_flags_keep_order_and_commas() {
        let source = "/* @gallery-hints\n * replace-flags: /O2 /GS -Wl,-z,now /O2\n */";
        let descriptor = ScenarioDescriptor::from_source(source).unwrap();
        assert_eq!(
            descriptor.replace_flags().unwrap(),
            ["/O2", "/GS", "-Wl,-z,now", "/O2"]
        );
    }

    #[test]
    fn test_conflicting_flag_mode() {
        let source = "/* @gallery-hints\n * extra-flags: -O1\n * replace-flags: -O3\n */";
        let err = ScenarioDescriptor::from_source(source).unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::ConflictingFlagMode);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_duplicate_key_is_case_insensitive() {
        let source = "/* @gallery-hints\n * compiler-only: gcc\n * Compiler-Only: clang\n */";
        let err = ScenarioDescriptor::from_source(source).unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::DuplicateKey);
    }

    #[test]
    fn test_unknown_key_is_malformed() {
        let source = "/* @gallery-hints\n * compiler-ony: gcc\n */";
        let err = ScenarioDescriptor::from_source(source).unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::MalformedKey);
        assert!(err.detail.contains("compiler-ony"));
    }

    #[test]
    fn test_line_without_colon_is_malformed() {
        let source = "/* @gallery-hints\n * just some words\n */";
        let err = ScenarioDescriptor::from_source(source).unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::MalformedKey);
    }

    #[test]
    fn test_empty_set_entry() {
        let source = "/* @gallery-hints\n * compiler-exclude: gcc,,clang\n */";
        let err = ScenarioDescriptor::from_source(source).unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::EmptyToken);
    }

    #[test]
    fn test_unterminated_block() {
        let err = ScenarioDescriptor::from_source("/* @gallery-hints\n * extra-flags: -O2\n")
            .unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::UnterminatedBlock);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_marker_must_open_a_comment() {
        let source = "// see @gallery-hints below\nint x;";
        assert!(ScenarioDescriptor::from_source(source).unwrap().is_unconstrained());
    }

    #[test]
    fn test_single_line_block() {
        let source = "/** @gallery-hints scenario-only: O2 O3 */";
        let descriptor = ScenarioDescriptor::from_source(source).unwrap();
        assert_eq!(descriptor.scenario_only, vec!["O2".to_string(), "O3".to_string()]);
    }

    #[test]
    fn test_matcher_forms() {
        let name = ToolchainMatcher::parse("vendorA");
        assert!(name.matches("vendorA-1.0-x64", "vendorA"));
        assert!(name.matches("vendorA", "vendorA"));
        assert!(!name.matches("vendorB-1.0-x64", "vendorB"));

        let prefix = ToolchainMatcher::parse("vc_v19*");
        assert!(prefix.matches("vc_v19_44_VS17_14_x64", "vc"));
        assert!(!prefix.matches("cg152", "cg"));
        assert_eq!(prefix.to_string(), "vc_v19*");
    }
}
