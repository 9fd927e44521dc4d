//! Disassembly collaborators.
//!
//! Object artifacts are parsed with `object` and every text section is decoded
//! with iced-x86 in Intel syntax. Branch operands are replaced by the symbol a
//! relocation (or, for linked images, the symbol table) names, so assertions
//! can say `call memset` regardless of how the target was encoded.
//! Listing artifacts are compiler `-S` style text; directives, labels and
//! comments are dropped and the remaining lines split into mnemonic/operands.

use crate::core::{JobError, JobResult};
use crate::verify::{Artifact, ArtifactKind, Disassembler, Instruction};
use iced_x86::{Decoder, DecoderOptions, Formatter, IntelFormatter};
use log::{debug, trace};
use object::{
    Architecture, Object, ObjectKind, ObjectSection, ObjectSymbol, RelocationTarget, SectionIndex,
    SectionKind,
};
use std::collections::{BTreeMap, HashMap};

/// Decodes object files and executables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectDisassembler;

/// Parses textual assembly listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingDisassembler;

/// Dispatches on the artifact kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactDisassembler;

impl Disassembler for ArtifactDisassembler {
    fn disassemble(&self, artifact: &Artifact) -> JobResult<Vec<Instruction>> {
        match artifact.kind {
            ArtifactKind::Object => ObjectDisassembler.disassemble(artifact),
            ArtifactKind::Listing => ListingDisassembler.disassemble(artifact),
        }
    }
}

impl Disassembler for ObjectDisassembler {
    fn disassemble(&self, artifact: &Artifact) -> JobResult<Vec<Instruction>> {
        decode_object(&artifact.bytes)
    }
}

impl Disassembler for ListingDisassembler {
    fn disassemble(&self, artifact: &Artifact) -> JobResult<Vec<Instruction>> {
        Ok(parse_listing(&String::from_utf8_lossy(&artifact.bytes)))
    }
}

fn disassemble_error(reason: impl Into<String>) -> JobError {
    JobError::Disassemble {
        reason: reason.into(),
    }
}

/// Decode every text section of an x86 object file, in section order.
pub fn decode_object(data: &[u8]) -> JobResult<Vec<Instruction>> {
    let file = object::File::parse(data)
        .map_err(|e| disassemble_error(format!("unrecognized object file: {e}")))?;
    let bitness = match file.architecture() {
        Architecture::X86_64 | Architecture::X86_64_X32 => 64,
        Architecture::I386 => 32,
        other => {
            return Err(disassemble_error(format!(
                "unsupported architecture {other:?}"
            )))
        }
    };

    // Absolute addresses only mean something once the image is linked.
    let linked = file.kind() != ObjectKind::Relocatable;
    let mut symbols: HashMap<u64, String> = HashMap::new();
    if linked {
        for symbol in file.symbols() {
            if !symbol.is_definition() {
                continue;
            }
            if let Ok(name) = symbol.name() {
                if !name.is_empty() {
                    symbols.entry(symbol.address()).or_insert_with(|| name.to_string());
                }
            }
        }
    }

    let mut formatter = IntelFormatter::new();
    formatter.options_mut().set_space_after_operand_separator(true);

    let mut out = Vec::new();
    for section in file.sections().filter(|s| s.kind() == SectionKind::Text) {
        let name = section.name().unwrap_or("<unnamed>");
        let bytes = section
            .data()
            .map_err(|e| disassemble_error(format!("cannot read section {name}: {e}")))?;
        let base = section.address();

        let mut targets: BTreeMap<u64, String> = BTreeMap::new();
        for (offset, relocation) in section.relocations() {
            if let Some(target) = relocation_target_name(&file, relocation.target()) {
                targets.insert(offset, target);
            }
        }
        trace!(
            "Decoding {name}: {} bytes at {base:#x}, {} relocations",
            bytes.len(),
            targets.len()
        );

        let mut decoder = Decoder::with_ip(bitness, bytes, base, DecoderOptions::NONE);
        let mut inst = iced_x86::Instruction::default();
        while decoder.can_decode() {
            decoder.decode_out(&mut inst);
            let mut mnemonic = String::new();
            formatter.format_mnemonic(&inst, &mut mnemonic);
            let mut operands = String::new();
            formatter.format_all_operands(&inst, &mut operands);

            let offset = inst.ip() - base;
            let end = offset + inst.len() as u64;
            let is_branch =
                inst.is_call_near() || inst.is_jmp_short_or_near() || inst.is_jcc_short_or_near();
            let relocated = targets.range(offset..end).next().map(|(_, n)| n);
            if let Some(target) = relocated {
                if is_branch {
                    operands = target.clone();
                } else {
                    operands.push_str(&format!(" <{target}>"));
                }
            } else if linked && is_branch {
                if let Some(target) = symbols.get(&inst.near_branch_target()) {
                    operands = target.clone();
                }
            }

            out.push(Instruction {
                address: Some(inst.ip()),
                mnemonic,
                operands,
            });
        }
    }

    if out.is_empty() {
        return Err(disassemble_error("object contains no code"));
    }
    debug!("Decoded {} instructions", out.len());
    Ok(out)
}

fn relocation_target_name(file: &object::File<'_>, target: RelocationTarget) -> Option<String> {
    let section_name = |index: SectionIndex| {
        file.section_by_index(index)
            .ok()
            .and_then(|s| s.name().ok().map(str::to_string))
    };
    match target {
        RelocationTarget::Symbol(index) => {
            let symbol = file.symbol_by_index(index).ok()?;
            match symbol.name() {
                Ok(name) if !name.is_empty() => Some(name.to_string()),
                _ => symbol.section_index().and_then(section_name),
            }
        }
        RelocationTarget::Section(index) => section_name(index),
        _ => None,
    }
}

const PREFIXES: &[&str] = &[
    "rep", "repe", "repz", "repne", "repnz", "lock", "notrack", "bnd", "xacquire", "xrelease",
];

/// MASM listing lines that are not instructions, keyed by their first or second word.
const MASM_LEADING: &[&str] = &[
    "PUBLIC", "EXTRN", "INCLUDELIB", "INCLUDE", "END", "ALIGN", "ORG", "COMM", "TITLE", "ASSUME",
];
const MASM_SECOND: &[&str] = &[
    "PROC", "ENDP", "SEGMENT", "ENDS", "DB", "DW", "DD", "DQ", "LABEL", "=", "EQU",
];

/// Parse a compiler assembly listing into instructions.
///
/// A label may share a line with an instruction (`.L2: ret`); objdump style
/// `  1c: call foo` lines carry their address in the label position.
pub fn parse_listing(text: &str) -> Vec<Instruction> {
    let mut out = Vec::new();
    for raw in text.lines() {
        let mut line = strip_comment(raw).trim();
        let mut address = None;

        while let Some((head, rest)) = line.split_once(':') {
            if head.is_empty() || head.contains(char::is_whitespace) || head.contains(',') {
                break;
            }
            if let Ok(value) = u64::from_str_radix(head.trim_start_matches("0x"), 16) {
                address = Some(value);
            }
            line = rest.trim();
        }
        if line.is_empty() || line.starts_with('.') {
            continue;
        }

        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            continue;
        };
        let second = words.next().unwrap_or("");
        if MASM_LEADING.contains(&first.to_ascii_uppercase().as_str())
            || MASM_SECOND.contains(&second.to_ascii_uppercase().as_str())
        {
            continue;
        }

        let (mut mnemonic, mut operands) = split_first_word(line);
        let mut mnemonic_text = mnemonic.to_ascii_lowercase();
        while PREFIXES.contains(&mnemonic.to_ascii_lowercase().as_str()) && !operands.is_empty() {
            let (next, rest) = split_first_word(operands);
            mnemonic_text = format!("{mnemonic_text} {}", next.to_ascii_lowercase());
            mnemonic = next;
            operands = rest;
        }

        out.push(Instruction {
            address,
            mnemonic: mnemonic_text,
            operands: operands.to_string(),
        });
    }
    out
}

fn split_first_word(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx..].trim()),
        None => (line, ""),
    }
}

/// Cut `#`, `;`, `//` and ARM `@` comments. `#` and `@` only count at line
/// start or after a tab, since they also mark immediates and symbol versions.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with('@') {
        return "";
    }
    let mut end = line.len();
    for marker in [";", "//", "\t#", "\t@"] {
        if let Some(idx) = line.find(marker) {
            end = end.min(idx);
        }
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::code_asm::*;
    use object::write;
    use object::{
        BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind, SymbolFlags,
        SymbolKind, SymbolScope,
    };

    /// `push rbp; mov rbp, rsp; call memset; pop rbp; ret` with a PC32 relocation on the call.
    fn elf_object() -> Vec<u8> {
        let mut prologue = CodeAssembler::new(64).unwrap();
        prologue.push(rbp).unwrap();
        prologue.mov(rbp, rsp).unwrap();
        let mut code = prologue.assemble(0).unwrap();
        let call_offset = code.len() as u64;
        code.extend_from_slice(&[0xe8, 0, 0, 0, 0]);
        let mut epilogue = CodeAssembler::new(64).unwrap();
        epilogue.pop(rbp).unwrap();
        epilogue.ret().unwrap();
        code.extend(epilogue.assemble(0).unwrap());

        let mut obj = write::Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
        obj.append_section_data(text, &code, 16);
        obj.add_symbol(write::Symbol {
            name: b"clear".to_vec(),
            value: 0,
            size: code.len() as u64,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: write::SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
        let memset = obj.add_symbol(write::Symbol {
            name: b"memset".to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Text,
            scope: SymbolScope::Dynamic,
            weak: false,
            section: write::SymbolSection::Undefined,
            flags: SymbolFlags::None,
        });
        obj.add_relocation(
            text,
            write::Relocation {
                offset: call_offset + 1,
                symbol: memset,
                addend: -4,
                flags: RelocationFlags::Generic {
                    kind: RelocationKind::Relative,
                    encoding: RelocationEncoding::Generic,
                    size: 32,
                },
            },
        )
        .unwrap();
        obj.write().unwrap()
    }

    #[test]
    fn test_object_decoding_names_relocated_calls() {
        let insts = decode_object(&elf_object()).unwrap();
        let mnemonics: Vec<_> = insts.iter().map(|i| i.mnemonic.as_str()).collect();
        assert_eq!(mnemonics, ["push", "mov", "call", "pop", "ret"]);
        assert_eq!(insts[1].operands, "rbp, rsp");
        assert_eq!(insts[2].operands, "memset");
        assert_eq!(insts[0].address, Some(0));
    }

    #[test]
    fn test_object_dispatch() {
        let artifact = Artifact::object(elf_object());
        let insts = ArtifactDisassembler.disassemble(&artifact).unwrap();
        assert_eq!(insts.len(), 5);
    }

    #[test]
    fn test_garbage_is_a_disassembly_error() {
        let err = decode_object(b"not an object").unwrap_err();
        assert!(matches!(err, JobError::Disassemble { .. }));
    }

    #[test]
    fn test_listing_skips_directives_and_labels() {
        let listing = "\t.file\t\"input.c\"\n\t.text\n\t.globl\tf\nf:\n.LFB0:\n\t.cfi_startproc\n\tpush\trbp\t# save\n\tmov\trbp, rsp\n\tmov\trax, QWORD PTR fs:40\n.L2:\tret\n\t.size\tf, .-f\n";
        let insts = parse_listing(listing);
        let rendered: Vec<_> = insts.iter().map(|i| i.to_string()).collect();
        assert_eq!(
            rendered,
            ["push rbp", "mov rbp, rsp", "mov rax, QWORD PTR fs:40", "ret"]
        );
    }

    #[test]
    fn test_listing_prefixes_and_addresses() {
        let insts = parse_listing("  1c:\trep stosq\n  21:\tcall   4a <memset>\n");
        assert_eq!(insts[0].mnemonic, "rep stosq");
        assert_eq!(insts[0].address, Some(0x1c));
        assert_eq!(insts[1].operands, "4a <memset>");
    }

    #[test]
    fn test_masm_listing() {
        let listing = "PUBLIC\tf\n_TEXT\tSEGMENT\nf\tPROC\n\tsub\trsp, 40\t\t\t\t\t; 00000028H\n\tcall\tmemset\n\tret\t0\nf\tENDP\n_TEXT\tENDS\nEND\n";
        let rendered: Vec<_> = parse_listing(listing).iter().map(|i| i.to_string()).collect();
        assert_eq!(rendered, ["sub rsp, 40", "call memset", "ret 0"]);
    }

    #[test]
    fn test_arm_immediates_survive() {
        let insts = parse_listing("\tadd\tx0, x0, #4\t// bump\n\tldr w1, [x0, #8]\n");
        assert_eq!(insts[0].operands, "x0, x0, #4");
        assert_eq!(insts[1].operands, "w1, [x0, #8]");
    }
}
