//! Middle end of the sch compiler. Takes parsed source units, checks and
//! elaborates them into a typed tree and lowers that to textual IR with
//! explicit reference counting.

use log::debug;

use crate::{
    frontend::{SourceMap, ast},
    middle::{
        elaborate::elaborate,
        error::{SemanticError, Warning},
        lir::{self, tir_lowering::lower_to_lir},
        session::{CompilationSession, CompileOptions},
    },
};

pub mod frontend;
pub mod index;
pub mod middle;

#[cfg(test)]
mod test_util;

/// Result of a successful compilation
#[derive(Debug)]
pub struct CompilationOutput {
    pub module: lir::Module,
    pub warnings: Vec<Warning>,
}

/// Elaborates `units` and lowers them to a LIR module. Stops at the first
/// semantic error.
pub fn compile(
    sources: &SourceMap,
    units: &[ast::SourceUnit],
    options: &CompileOptions,
) -> Result<CompilationOutput, SemanticError> {
    let mut session = CompilationSession::new(sources, options);

    elaborate(&mut session, units)?;
    let module = lower_to_lir(&session);

    debug!(
        "compiled {} units into {} functions with {} warnings",
        units.len(),
        module.functions.len(),
        session.warnings.len()
    );

    Ok(CompilationOutput {
        module,
        warnings: session.warnings,
    })
}
