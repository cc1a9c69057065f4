//! Crate-wide error rollup: keeps per-subsystem `thiserror` enums
//! (`DecodeError`, `CodegenError`, `BackendError`) separate but
//! `#[from]`-convertible into one pipeline-level error.

use crate::backend::BackendError;
use crate::bytecode::DecodeError;
use crate::codegen::CodegenError;
use crate::interp::UnsupportedReason;

/// Everything that can keep a function from producing a callable entry
/// point. None of these are retried — per spec, an unsuccessful compile
/// permanently falls back to the interpreter for that function.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("function is not a JIT candidate: {0:?}")]
    Unsupported(UnsupportedReason),

    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_reason_renders_in_the_error_message() {
        let err = CoreError::Unsupported(UnsupportedReason::YieldFamily);
        assert!(err.to_string().contains("YieldFamily"));
    }
}
