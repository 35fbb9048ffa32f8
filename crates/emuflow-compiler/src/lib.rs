//! emuflow compiler: builds a dataflow program and emits its packet dump.
//!
//! ```text
//! variables + blocks → Program → finalize (reindex, sort, relabel) → Dump
//! ```
//!
//! The [`Program`] is the compilation session. References stay symbolic
//! until [`Program::finalize`] fixes the execution order; [`Program::emit`]
//! then encodes everything against the final indices.

pub mod config;
pub mod dump;
pub mod program;
pub mod sort;

pub use config::{CompilerConfig, ConfigError, MIN_MTU};
pub use dump::{fingerprint, Dump, DumpLine};
pub use program::{BlockHandle, Program};
pub use sort::{schedule, Schedule};

pub use emuflow_codegen::blocks;
pub use emuflow_codegen::{Block, BlockSpec, Input, InstanceFlags, Session, VarSpec};
pub use emuflow_types::{Diagnostic, Diagnostics, EmuError, ErrorCode, MemType, Ref, Result};

use serde::Serialize;

/// The result of a full compilation: the dump plus every warning raised.
#[derive(Debug, Clone, Serialize)]
pub struct CompileOutput {
    pub dump: Dump,
    pub diagnostics: Diagnostics,
    /// Hex SHA-256 of the packet stream.
    pub sha256: String,
}

/// Finalize `program` and emit its dump.
pub fn compile(program: &mut Program) -> Result<CompileOutput> {
    let diagnostics = program.finalize()?.clone();
    let dump = program.emit()?;
    let sha256 = dump.sha256();
    Ok(CompileOutput {
        dump,
        diagnostics,
        sha256,
    })
}

/// Like [`compile`], but fatal errors come back as diagnostics.
pub fn compile_to_diagnostics(program: &mut Program) -> std::result::Result<CompileOutput, Diagnostics> {
    compile(program).map_err(|e| {
        let mut diagnostics = program.diagnostics().clone();
        diagnostics.push_error(Diagnostic::error(&e));
        diagnostics
    })
}
