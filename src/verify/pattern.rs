//! Instruction streams and assertion evaluation.
//!
//! Evaluation is a pure function of an assertion and an instruction stream,
//! so it is tested here with hand-written streams and no toolchain at all.

use crate::annotation::expect::normalize_operands;
use crate::annotation::{AssertionKind, InstructionPattern, MnemonicMatch, PatternAssertion};
use log::trace;
use serde::Serialize;
use std::fmt;

/// One disassembled instruction, in program order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    pub mnemonic: String,
    pub operands: String,
}

impl Instruction {
    pub fn new(mnemonic: impl Into<String>, operands: impl Into<String>) -> Self {
        Self {
            address: None,
            mnemonic: mnemonic.into(),
            operands: operands.into(),
        }
    }

    pub fn at(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            f.write_str(&self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, self.operands)
        }
    }
}

impl InstructionPattern {
    /// Whether the instruction satisfies this predicate.
    pub fn matches(&self, inst: &Instruction) -> bool {
        self.mnemonic_matches(&inst.mnemonic) && self.operands_match(&inst.operands)
    }

    fn mnemonic_matches(&self, mnemonic: &str) -> bool {
        let mnemonic = mnemonic.trim().to_ascii_lowercase();
        // `rep stosb`, `lock cmpxchg`: prefixes are part of the formatted mnemonic.
        let base = mnemonic.rsplit(' ').next().unwrap_or(mnemonic.as_str());
        match &self.mnemonic {
            MnemonicMatch::Any => true,
            MnemonicMatch::Exact(want) => mnemonic == *want || base == want,
            MnemonicMatch::Prefix(prefix) => {
                mnemonic.starts_with(prefix.as_str()) || base.starts_with(prefix.as_str())
            }
        }
    }

    fn operands_match(&self, operands: &str) -> bool {
        match &self.operands {
            Some(want) => normalize_operands(operands).contains(want.as_str()),
            None => true,
        }
    }
}

fn describe(index: usize, inst: &Instruction) -> String {
    match inst.address {
        Some(address) => format!("#{index} ({address:#x}) `{inst}`"),
        None => format!("#{index} `{inst}`"),
    }
}

/// Closest near-miss for a predicate: same mnemonic with other operands,
/// else the operand text under another mnemonic.
fn nearest(pattern: &InstructionPattern, stream: &[Instruction]) -> Option<String> {
    let by_mnemonic = stream
        .iter()
        .position(|inst| pattern.mnemonic_matches(&inst.mnemonic));
    let by_operands = || {
        pattern.operands.as_ref()?;
        stream
            .iter()
            .position(|inst| pattern.operands_match(&inst.operands))
    };
    by_mnemonic
        .or_else(by_operands)
        .map(|idx| describe(idx, &stream[idx]))
}

impl PatternAssertion {
    /// Evaluate against an instruction stream. `Err` carries the triage diagnostic.
    pub fn evaluate(&self, stream: &[Instruction]) -> Result<(), String> {
        let identity = self.identity();
        trace!("Evaluating `{}` against {} instructions", identity, stream.len());
        let Some(pattern) = self.patterns.first() else {
            return Err(format!("`{identity}` has no instruction pattern"));
        };

        match self.kind {
            AssertionKind::MustContain => {
                if stream.iter().any(|inst| pattern.matches(inst)) {
                    return Ok(());
                }
                let mut diagnostic = format!(
                    "`{identity}` failed: no match among {} instructions",
                    stream.len()
                );
                if let Some(near) = nearest(pattern, stream) {
                    diagnostic.push_str(&format!("; nearest is {near}"));
                }
                Err(diagnostic)
            }
            AssertionKind::MustNotContain => match stream.iter().position(|inst| pattern.matches(inst)) {
                None => Ok(()),
                Some(idx) => Err(format!(
                    "`{identity}` failed: found {}",
                    describe(idx, &stream[idx])
                )),
            },
            AssertionKind::MustContainInOrder => {
                let mut cursor = 0;
                let mut last_match: Option<usize> = None;
                for (step, pattern) in self.patterns.iter().enumerate() {
                    let found = stream[cursor..]
                        .iter()
                        .position(|inst| pattern.matches(inst))
                        .map(|offset| cursor + offset);
                    match found {
                        Some(idx) => {
                            trace!("Step {step} `{pattern}` matched {}", describe(idx, &stream[idx]));
                            last_match = Some(idx);
                            cursor = idx + 1;
                        }
                        None => {
                            let mut diagnostic = format!(
                                "`{identity}` failed: matched {step} of {} steps; `{pattern}` not found",
                                self.patterns.len()
                            );
                            if let Some(prev) = last_match {
                                diagnostic
                                    .push_str(&format!(" after {}", describe(prev, &stream[prev])));
                            }
                            let earlier =
                                stream[..cursor].iter().position(|inst| pattern.matches(inst));
                            if let Some(idx) = earlier {
                                diagnostic.push_str(&format!(
                                    " (it occurs earlier at {})",
                                    describe(idx, &stream[idx])
                                ));
                            } else if let Some(near) = nearest(pattern, &stream[cursor..]) {
                                diagnostic.push_str(&format!("; nearest after that point is {near}"));
                            }
                            return Err(diagnostic);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assertion(line: &str) -> PatternAssertion {
        let source = format!("/* @gallery-expect\n * {line}\n */");
        PatternAssertion::from_source(&source).unwrap().remove(0)
    }

    fn stream(listing: &[&str]) -> Vec<Instruction> {
        listing
            .iter()
            .map(|line| match line.split_once(' ') {
                Some((m, ops)) => Instruction::new(m, ops),
                None => Instruction::new(*line, ""),
            })
            .collect()
    }

    #[test]
    fn test_assertion_without_patterns_fails() {
        let listing = stream(&["push rbp", "ret"]);
        for line in [
            "must-contain: ret",
            "must-not-contain: call memset",
            "must-contain-in-order: push rbp; ret",
        ] {
            let mut hollow = assertion(line);
            hollow.patterns.clear();
            let diagnostic = hollow.evaluate(&listing).unwrap_err();
            assert!(diagnostic.contains("no instruction pattern"), "{diagnostic}");
        }
    }

    #[test]
    fn test_must_contain_anywhere() {
        let check = assertion("must-contain: call __stack_chk_fail");
        let insts = stream(&["push rbp", "mov rbp, rsp", "call __stack_chk_fail", "ret"]);
        assert!(check.evaluate(&insts).is_ok());
        let last = stream(&["ret", "call __stack_chk_fail@PLT"]);
        assert!(check.evaluate(&last).is_ok());
    }

    #[test]
    fn test_empty_stream() {
        let contain = assertion("must-contain: ret");
        let absent = assertion("must-not-contain: call memset");
        assert!(contain.evaluate(&[]).is_err());
        assert!(absent.evaluate(&[]).is_ok());
    }

    #[test]
    fn test_must_contain_reports_nearest() {
        let check = assertion("must-contain: call __stack_chk_fail");
        let insts = stream(&["push rbp", "call memset", "ret"]);
        let diagnostic = check.evaluate(&insts).unwrap_err();
        assert!(diagnostic.contains("#1 `call memset`"), "{diagnostic}");
    }

    #[test]
    fn test_must_not_contain_names_offender() {
        let check = assertion("must-not-contain: call memset");
        let insts: Vec<_> = stream(&["xor eax, eax", "call memset@PLT"])
            .into_iter()
            .enumerate()
            .map(|(i, inst)| inst.at(0x1000 + i as u64 * 4))
            .collect();
        let diagnostic = check.evaluate(&insts).unwrap_err();
        assert!(diagnostic.contains("#1 (0x1004) `call memset@PLT`"), "{diagnostic}");
    }

    #[test]
    fn test_in_order_subsequence() {
        let check = assertion("must-contain-in-order: push; call");
        assert!(check.evaluate(&stream(&["nop", "push rbp", "mov", "call foo", "ret"])).is_ok());

        let diagnostic = check.evaluate(&stream(&["call foo", "push rbp"])).unwrap_err();
        assert!(diagnostic.contains("matched 1 of 2"), "{diagnostic}");
        assert!(diagnostic.contains("occurs earlier at #0"), "{diagnostic}");
    }

    #[test]
    fn test_in_order_generic_letters() {
        let check = assertion("must-contain-in-order: a; b");
        assert!(check.evaluate(&stream(&["x", "a", "y", "b", "z"])).is_ok());
        assert!(check.evaluate(&stream(&["b", "a"])).is_err());
    }

    #[test]
    fn test_mnemonic_forms() {
        let jumps = assertion("must-contain: j*");
        assert!(jumps.evaluate(&stream(&["jne .L3"])).is_ok());
        assert!(jumps.evaluate(&stream(&["cmp eax, 1"])).is_err());

        let stos = assertion("must-contain: stosq");
        assert!(stos.evaluate(&[Instruction::new("rep stosq", "")]).is_ok());

        let canary = assertion("must-contain: * QWORD PTR FS:0x28");
        assert!(canary
            .evaluate(&stream(&["mov rax, QWORD PTR fs:0x28"]))
            .is_ok());
    }

    #[test]
    fn test_operand_spacing_is_ignored() {
        let check = assertion("must-contain: mov rbp, rsp");
        assert!(check.evaluate(&stream(&["mov rbp,rsp"])).is_ok());
        assert!(check.evaluate(&stream(&["MOV RBP ,RSP"])).is_ok());
    }
}
