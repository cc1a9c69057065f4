//! Top-level compilation facade: chains decode → abstract-interpret →
//! codegen → backend.compile_method() into a single-backend, no-prewarm
//! facade — heuristic pre-warming is out of scope here.

use std::rc::Rc;

use crate::backend::{CodegenBackend, CompiledCode, ExecutableCode, SymbolResolver};
use crate::bytecode::Code;
use crate::error::CoreError;
use crate::interp::{AbstractInterpreter, CompilerHandle};
use crate::ir::IlMethod;

/// Drives one function through abstract interpretation and code generation,
/// then hands the IL to `backend`. Compilation is atomic: either
/// this returns `Ok` with a callable entry, or the caller permanently falls
/// back to the interpreter for that function.
pub struct Compiler<B: CodegenBackend> {
    backend: B,
}

impl<B: CodegenBackend> Compiler<B> {
    pub fn new(backend: B) -> Compiler<B> {
        Compiler { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Abstract-interpret and lower `code` to IL, without invoking the
    /// backend. Useful for tests and for callers that only need the IL
    /// (e.g. to inspect it) rather than machine code.
    pub fn lower(&self, code: Rc<Code>) -> Result<IlMethod, CoreError> {
        let mut ai = AbstractInterpreter::new(code, None::<CompilerHandle>)?;
        if !ai.interpret() {
            let reason = ai.unsupported.expect("interpret() returned false without a reason");
            return Err(CoreError::Unsupported(reason));
        }
        let method = crate::codegen::generate(&ai)?;
        Ok(method)
    }

    /// Run the full pipeline: lower to IL, then compile that IL to
    /// unrelocated machine code via the backend.
    pub fn compile_function(&self, code: Rc<Code>) -> Result<(IlMethod, CompiledCode), CoreError> {
        let method = self.lower(code)?;
        let compiled = self.backend.compile_method(&method)?;
        Ok((method, compiled))
    }

    /// Run the full pipeline through to an executable entry point.
    pub fn compile_and_finalize(
        &self,
        code: Rc<Code>,
        resolver: &dyn SymbolResolver,
    ) -> Result<(IlMethod, ExecutableCode), CoreError> {
        let (method, compiled) = self.compile_function(code)?;
        let executable = self.backend.finalize(compiled, resolver)?;
        Ok((method, executable))
    }
}
