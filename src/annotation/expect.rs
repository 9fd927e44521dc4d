//! `@gallery-expect` pattern assertions.
//!
//! ```text
//! /* @gallery-expect
//!  *   must-contain: call __stack_chk_fail
//!  *   must-not-contain: call memset | scenario: O2, O3
//!  *   must-contain-in-order: push rbp; call; ret | compiler: gcc
//!  */
//! ```
//!
//! A predicate is a mnemonic (`j*` for a prefix, `*` for any) optionally
//! followed by text the operands must contain. Matching is case-insensitive
//! and ignores whitespace differences around operand separators.

use super::hints::{annotation_block, BlockLine, ToolchainMatcher};
use crate::core::{DescriptorError, DescriptorErrorKind};
use serde::Serialize;
use std::fmt;

/// Marker opening the assertion block.
pub const EXPECT_MARKER: &str = "@gallery-expect";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssertionKind {
    MustContain,
    MustNotContain,
    MustContainInOrder,
}

impl AssertionKind {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::MustContain => "must-contain",
            Self::MustNotContain => "must-not-contain",
            Self::MustContainInOrder => "must-contain-in-order",
        }
    }

    fn parse(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "must-contain" => Some(Self::MustContain),
            "must-not-contain" => Some(Self::MustNotContain),
            "must-contain-in-order" => Some(Self::MustContainInOrder),
            _ => None,
        }
    }
}

impl fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Mnemonic half of an instruction predicate. Stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "match", content = "value", rename_all = "kebab-case")]
pub enum MnemonicMatch {
    Any,
    Exact(String),
    Prefix(String),
}

/// Predicate over a single disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstructionPattern {
    pub mnemonic: MnemonicMatch,
    /// Normalized text the operand string must contain.
    pub operands: Option<String>,
}

impl InstructionPattern {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        if head.is_empty() {
            return None;
        }
        let head = head.to_ascii_lowercase();
        let mnemonic = if head == "*" {
            MnemonicMatch::Any
        } else if let Some(prefix) = head.strip_suffix('*') {
            MnemonicMatch::Prefix(prefix.to_string())
        } else {
            MnemonicMatch::Exact(head)
        };
        let operands = (!rest.is_empty()).then(|| normalize_operands(rest));
        if mnemonic == MnemonicMatch::Any && operands.is_none() {
            return None;
        }
        Some(Self { mnemonic, operands })
    }
}

impl fmt::Display for InstructionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mnemonic {
            MnemonicMatch::Any => f.write_str("*")?,
            MnemonicMatch::Exact(m) => f.write_str(m)?,
            MnemonicMatch::Prefix(p) => write!(f, "{p}*")?,
        }
        if let Some(operands) = &self.operands {
            write!(f, " {operands}")?;
        }
        Ok(())
    }
}

/// Cells an assertion is restricted to. Empty lists mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliesTo {
    pub scenarios: Vec<String>,
    pub compilers: Vec<ToolchainMatcher>,
}

/// One declared expectation about a fixture's compiled output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternAssertion {
    /// Position within the fixture's expect block.
    pub index: usize,
    pub kind: AssertionKind,
    /// One predicate, or the ordered list for `must-contain-in-order`.
    pub patterns: Vec<InstructionPattern>,
    pub applies_to: Option<AppliesTo>,
}

impl PatternAssertion {
    /// Stable identity used to line results up across toolchains.
    pub fn identity(&self) -> String {
        let patterns: Vec<String> = self.patterns.iter().map(|p| p.to_string()).collect();
        format!("{}: {}", self.kind, patterns.join("; "))
    }

    /// Whether this assertion is evaluated for the given cell.
    pub fn applies(&self, scenario: &str, toolchain: &str, family: &str) -> bool {
        let Some(scope) = &self.applies_to else {
            return true;
        };
        let scenario_ok = scope.scenarios.is_empty()
            || scope
                .scenarios
                .iter()
                .any(|s| s.eq_ignore_ascii_case(scenario));
        let compiler_ok = scope.compilers.is_empty()
            || scope.compilers.iter().any(|m| m.matches(toolchain, family));
        scenario_ok && compiler_ok
    }

    /// Parse the `@gallery-expect` block of a fixture, if any.
    pub fn from_source(source: &str) -> Result<Vec<Self>, DescriptorError> {
        match annotation_block(source, EXPECT_MARKER)? {
            Some(lines) => lines
                .iter()
                .enumerate()
                .map(|(index, line)| Self::from_line(index, line))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    fn from_line(index: usize, entry: &BlockLine<'_>) -> Result<Self, DescriptorError> {
        let malformed = |detail: String| {
            DescriptorError::new(DescriptorErrorKind::MalformedAssertion, entry.line, detail)
        };

        let mut sections = entry.text.split('|');
        let body = sections.next().unwrap_or_default();
        let Some((keyword, pattern_text)) = body.split_once(':') else {
            return Err(malformed(format!("expected `kind: pattern`, found `{body}`")));
        };
        let keyword = keyword.trim();
        let kind = AssertionKind::parse(keyword)
            .ok_or_else(|| malformed(format!("unknown assertion kind `{keyword}`")))?;

        let pieces: Vec<&str> = pattern_text.split(';').collect();
        if kind != AssertionKind::MustContainInOrder && pieces.len() > 1 {
            return Err(malformed(
                "only `must-contain-in-order` takes a `;` list".to_string(),
            ));
        }
        let patterns = pieces
            .iter()
            .map(|piece| {
                InstructionPattern::parse(piece)
                    .ok_or_else(|| malformed(format!("empty pattern in `{}`", pattern_text.trim())))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut applies_to: Option<AppliesTo> = None;
        for qualifier in sections {
            let Some((key, value)) = qualifier.split_once(':') else {
                return Err(malformed(format!(
                    "expected `scenario:` or `compiler:`, found `{}`",
                    qualifier.trim()
                )));
            };
            let tokens: Vec<&str> = value
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .collect();
            if tokens.is_empty() {
                return Err(malformed(format!("`{}` qualifier has no values", key.trim())));
            }
            let scope = applies_to.get_or_insert_with(AppliesTo::default);
            match key.trim().to_ascii_lowercase().as_str() {
                "scenario" => scope.scenarios.extend(tokens.iter().map(|t| t.to_string())),
                "compiler" => scope
                    .compilers
                    .extend(tokens.iter().map(|t| ToolchainMatcher::parse(t))),
                other => return Err(malformed(format!("unknown qualifier `{other}`"))),
            }
        }

        Ok(Self {
            index,
            kind,
            patterns,
            applies_to,
        })
    }
}

/// Lowercase, collapse whitespace, and drop spaces around operand separators.
pub(crate) fn normalize_operands(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    collapsed.replace(", ", ",").replace(" ,", ",")
}
