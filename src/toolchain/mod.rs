// This module holds the production collaborators behind the verifier's Compiler and
// Disassembler capabilities: a CommandCompiler that runs the configured toolchain binary in
// an isolated scratch directory under a wall-clock limit, and disassemblers for the two
// artifact kinds a toolchain can produce (x86 object files, decoded with object + iced-x86,
// and textual assembly listings).

//! Toolchain process and disassembly collaborators.

pub mod command;
pub mod disasm;

pub use command::{CommandCompiler, ToolchainCommand};
pub use disasm::{
    decode_object, parse_listing, ArtifactDisassembler, ListingDisassembler, ObjectDisassembler,
};
