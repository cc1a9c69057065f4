//! Stub backend for exercising the pipeline without real codegen.
//!
//! Produces placeholder machine code (a single trap instruction) so
//! `compiler::compile` can be driven end to end in tests without a real
//! native backend.

use super::{BackendError, CodegenBackend, CompiledCode, ExecutableCode, SymbolResolver, TargetArch, TargetInfo};
use crate::ir::IlMethod;

/// A backend that produces placeholder code (`INT3` on x86, `BRK` on ARM)
/// and always fails to finalize, since it never allocates real executable
/// memory.
pub struct StubBackend;

impl CodegenBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn compile_method(&self, _method: &IlMethod) -> Result<CompiledCode, BackendError> {
        let trap_byte = match self.target_info().arch {
            TargetArch::X86_64 => 0xCC,
            TargetArch::AArch64 => 0x00,
        };
        Ok(CompiledCode { code: vec![trap_byte], entry_offset: 0, relocations: vec![] })
    }

    fn finalize(
        &self,
        _code: CompiledCode,
        _resolver: &dyn SymbolResolver,
    ) -> Result<ExecutableCode, BackendError> {
        Err(BackendError::Backend("stub backend cannot produce executable code".to_string()))
    }

    fn target_info(&self) -> TargetInfo {
        #[cfg(target_arch = "x86_64")]
        {
            TargetInfo { arch: TargetArch::X86_64, pointer_size: 8 }
        }
        #[cfg(target_arch = "aarch64")]
        {
            TargetInfo { arch: TargetArch::AArch64, pointer_size: 8 }
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            TargetInfo { arch: TargetArch::X86_64, pointer_size: 8 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IlType;

    #[test]
    fn stub_compile_produces_nonempty_placeholder_code() {
        let stub = StubBackend;
        assert_eq!(stub.name(), "stub");
        let method = IlMethod::new("test", vec![IlType::Object]);
        let result = stub.compile_method(&method);
        assert!(result.is_ok());
        assert!(!result.unwrap().code.is_empty());
    }

    #[test]
    fn stub_finalize_always_fails() {
        let stub = StubBackend;
        let method = IlMethod::new("test", vec![IlType::Object]);
        let code = stub.compile_method(&method).unwrap();

        struct NoResolver;
        impl SymbolResolver for NoResolver {
            fn resolve_helper(&self, _: crate::helpers::Helper) -> Option<usize> {
                None
            }
        }

        assert!(stub.finalize(code, &NoResolver).is_err());
    }
}
