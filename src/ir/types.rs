//! IL value types.
//!
//! The generator deals in a handful of concrete widths plus one boxed
//! catch-all; unlike the bytecode-level lattice, every IL value has a type
//! at emission time — it's the backend's input, not an inference result.

/// A type an IL slot (stack entry or local) can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IlType {
    /// 4-byte integer.
    I4,
    /// 8-byte integer.
    I8,
    /// Pointer-width integer (used for refcounts, array lengths).
    NativeInt,
    /// 8-byte float.
    R8,
    /// A managed object pointer (owned reference).
    Object,
    /// No value (a call with no return, a `void` local).
    Void,
}

impl IlType {
    /// Whether this slot holds an owned reference the CG's refcount
    /// discipline must track.
    pub fn is_object(self) -> bool {
        matches!(self, IlType::Object)
    }

    /// Stack/local slot width in abstract "cells" — `rot_two`/`rot_three`
    /// and friends only ever permute same-width cells.
    pub fn width(self) -> u8 {
        match self {
            IlType::I4 => 1,
            IlType::I8 | IlType::R8 | IlType::NativeInt | IlType::Object => 1,
            IlType::Void => 0,
        }
    }
}

impl std::fmt::Display for IlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IlType::I4 => write!(f, "i4"),
            IlType::I8 => write!(f, "i8"),
            IlType::NativeInt => write!(f, "nint"),
            IlType::R8 => write!(f, "r8"),
            IlType::Object => write!(f, "obj"),
            IlType::Void => write!(f, "void"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_is_the_only_refcounted_type() {
        assert!(IlType::Object.is_object());
        assert!(!IlType::I4.is_object());
        assert!(!IlType::R8.is_object());
    }
}
