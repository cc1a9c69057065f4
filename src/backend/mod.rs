//! Backend-agnostic code generation contract.
//!
//! The core never emits machine code itself — `codegen::generate` produces an
//! `IlMethod`, and a `CodegenBackend` lowers that to native code. Only a
//! [`StubBackend`] ships here; a real backend (Cranelift, say) is a separate
//! crate implementing this trait, keeping Cranelift itself behind the same
//! `CodegenBackend` seam.

pub mod stub;

use crate::helpers::Helper;
use crate::ir::IlMethod;

pub use stub::StubBackend;

/// Target architecture the backend lowers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    AArch64,
}

/// Target information a backend reports about itself.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub arch: TargetArch,
    pub pointer_size: usize,
}

/// Error from a backend's compile or finalize step.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("unsupported IL instruction: {0}")]
    UnsupportedInstruction(String),
    #[error("register allocation failed: {0}")]
    RegisterAllocationFailed(String),
}

/// Where a relocation in [`CompiledCode::code`] needs its final address
/// patched in once the code is placed in executable memory.
#[derive(Debug, Clone)]
pub enum RelocationTarget {
    /// A host runtime helper, resolved via [`SymbolResolver::resolve_helper`].
    Helper(Helper),
    /// An address already known at compile time.
    Absolute(usize),
}

/// One relocation entry: an offset into [`CompiledCode::code`] and what to
/// patch there.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub code_offset: usize,
    pub target: RelocationTarget,
}

/// Resolves helper tokens to their native entry points at finalization time.
/// The core never dereferences these addresses itself; only the backend
/// does, while patching relocations.
pub trait SymbolResolver {
    fn resolve_helper(&self, helper: Helper) -> Option<usize>;
}

/// Machine code compiled from one [`IlMethod`], not yet executable — its
/// relocations still need patching against real addresses.
#[derive(Debug)]
pub struct CompiledCode {
    pub code: Vec<u8>,
    pub entry_offset: usize,
    pub relocations: Vec<Relocation>,
}

/// Executable native code, after relocation and memory mapping. Dropping
/// this releases the backend's allocation via `release`, so a JIT code
/// object always knows how to free its own backend-allocated memory.
pub struct ExecutableCode {
    pub code_ptr: *const u8,
    pub code_size: usize,
    pub entry_offset: usize,
    release: Option<Box<dyn FnMut() + Send>>,
}

impl ExecutableCode {
    pub fn new(
        code_ptr: *const u8,
        code_size: usize,
        entry_offset: usize,
        release: Box<dyn FnMut() + Send>,
    ) -> ExecutableCode {
        ExecutableCode { code_ptr, code_size, entry_offset, release: Some(release) }
    }
}

impl Drop for ExecutableCode {
    fn drop(&mut self) {
        if let Some(mut release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ExecutableCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableCode")
            .field("code_ptr", &self.code_ptr)
            .field("code_size", &self.code_size)
            .field("entry_offset", &self.entry_offset)
            .finish()
    }
}

// Safety: `code_ptr` points at immutable executable memory that does not
// change after finalization, and `release` is itself `Send`.
unsafe impl Send for ExecutableCode {}
unsafe impl Sync for ExecutableCode {}

/// The backend-agnostic code generation trait.
///
/// Pipeline: `IlMethod` → `compile_method()` → `CompiledCode` →
/// `finalize()` → `ExecutableCode`.
pub trait CodegenBackend: Send + Sync {
    /// Backend name, for diagnostics.
    fn name(&self) -> &str;

    /// Compile one method's IL to machine code, unrelocated.
    fn compile_method(&self, method: &IlMethod) -> Result<CompiledCode, BackendError>;

    /// Patch relocations against `resolver` and produce executable code.
    fn finalize(
        &self,
        code: CompiledCode,
        resolver: &dyn SymbolResolver,
    ) -> Result<ExecutableCode, BackendError>;

    /// Target architecture this backend lowers to.
    fn target_info(&self) -> TargetInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executable_code_runs_its_release_closure_on_drop() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicBool::new(false));
        let released_in_closure = released.clone();
        let code = ExecutableCode::new(
            std::ptr::null(),
            0,
            0,
            Box::new(move || released_in_closure.store(true, Ordering::SeqCst)),
        );
        drop(code);
        assert!(released.load(Ordering::SeqCst));
    }
}
