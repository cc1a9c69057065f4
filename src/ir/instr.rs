//! The stack-based IL's instruction set.
//!
//! Unlike the register-SSA form this is grounded on, every instruction here
//! reads its operands off an implicit evaluation stack and pushes its
//! result back onto it — the shape a managed-runtime bytecode emitter
//! expects.

use super::types::IlType;

/// A local variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "loc{}", self.0)
    }
}

/// A branch target, created by `define_label` and fixed in place by
/// `mark_label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

impl std::fmt::Display for LabelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// An integer method token identifying a host runtime helper, resolved
/// through the per-method symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HelperToken(pub u32);

impl std::fmt::Display for HelperToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Two-operand arithmetic/bitwise ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
}

impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
        };
        write!(f, "{s}")
    }
}

/// One-operand arithmetic/bitwise ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryArithOp {
    Neg,
    Not,
}

impl std::fmt::Display for UnaryArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnaryArithOp::Neg => "neg",
            UnaryArithOp::Not => "not",
        };
        write!(f, "{s}")
    }
}

/// The three primitive comparisons the backend implements directly.
/// `le`, `ge`, and `ne` are not separate instructions — the builder
/// synthesizes them from these three plus `not`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareKind {
    Ceq,
    Clt,
    Cgt,
}

impl std::fmt::Display for CompareKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompareKind::Ceq => "ceq",
            CompareKind::Clt => "clt",
            CompareKind::Cgt => "cgt",
        };
        write!(f, "{s}")
    }
}

/// What a `branch` instruction does with the boolean popped off the stack
/// (or nothing, for `Always`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    Always,
    IfTrue,
    IfFalse,
}

impl std::fmt::Display for BranchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BranchKind::Always => "br",
            BranchKind::IfTrue => "brtrue",
            BranchKind::IfFalse => "brfalse",
        };
        write!(f, "{s}")
    }
}

/// One IL instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum IlInstr {
    ConstI4(i32),
    ConstI8(i64),
    ConstNativeInt(i64),
    ConstR8(f64),
    /// A raw pointer literal (e.g. a boxed constant's address).
    ConstPtr(u64),
    ConstNull,

    Dup(IlType),
    Pop(IlType),
    RotTwo(IlType),
    RotThree(IlType),
    RotFour(IlType),

    LoadLocal(LocalId),
    StoreLocal(LocalId),
    LoadLocalAddr(LocalId),

    Arith(ArithOp, IlType),
    UnaryArith(UnaryArithOp, IlType),
    /// Always produces an `I4` (0 or 1).
    Compare(CompareKind, IlType),

    /// Call a host helper by token, consuming `arg_count` stack slots and
    /// pushing one result unless `returns` is `Void`.
    Call { token: HelperToken, arg_count: u32, returns: IlType },

    /// Fixes a label's position at this point in the stream. Patches any
    /// forward branch that targeted it.
    MarkLabel(LabelId),
    /// `short_form` is an emission hint: true once the builder has verified
    /// the branch site and its label are close enough for a single-byte
    /// (rather than a four-byte) offset once the backend lays out real
    /// bytes. Unresolved forward branches start `true` and are revised
    /// downward by `mark_label` if the gap turns out too wide.
    Branch { kind: BranchKind, label: LabelId, short_form: bool },

    /// Pops a value of `ty` (or nothing, for `Void`) and returns it.
    Return(IlType),
}

impl std::fmt::Display for IlInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IlInstr::ConstI4(v) => write!(f, "ldc.i4 {v}"),
            IlInstr::ConstI8(v) => write!(f, "ldc.i8 {v}"),
            IlInstr::ConstNativeInt(v) => write!(f, "ldc.nint {v}"),
            IlInstr::ConstR8(v) => write!(f, "ldc.r8 {v}"),
            IlInstr::ConstPtr(v) => write!(f, "ldc.ptr {v:#x}"),
            IlInstr::ConstNull => write!(f, "ldnull"),
            IlInstr::Dup(ty) => write!(f, "dup.{ty}"),
            IlInstr::Pop(ty) => write!(f, "pop.{ty}"),
            IlInstr::RotTwo(ty) => write!(f, "rot2.{ty}"),
            IlInstr::RotThree(ty) => write!(f, "rot3.{ty}"),
            IlInstr::RotFour(ty) => write!(f, "rot4.{ty}"),
            IlInstr::LoadLocal(id) => write!(f, "ldloc {id}"),
            IlInstr::StoreLocal(id) => write!(f, "stloc {id}"),
            IlInstr::LoadLocalAddr(id) => write!(f, "ldloca {id}"),
            IlInstr::Arith(op, ty) => write!(f, "{op}.{ty}"),
            IlInstr::UnaryArith(op, ty) => write!(f, "{op}.{ty}"),
            IlInstr::Compare(cmp, ty) => write!(f, "{cmp}.{ty}"),
            IlInstr::Call { token, arg_count, returns } => {
                write!(f, "call {token} ({arg_count} args) -> {returns}")
            }
            IlInstr::MarkLabel(label) => write!(f, "{label}:"),
            IlInstr::Branch { kind, label, short_form } => {
                let form = if *short_form { ".s" } else { "" };
                write!(f, "{kind}{form} {label}")
            }
            IlInstr::Return(ty) => write!(f, "ret.{ty}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_disassembly_style() {
        assert_eq!(IlInstr::ConstI4(7).to_string(), "ldc.i4 7");
        assert_eq!(IlInstr::Arith(ArithOp::Add, IlType::I4).to_string(), "add.i4");
        assert_eq!(
            IlInstr::Branch { kind: BranchKind::IfTrue, label: LabelId(2), short_form: true }.to_string(),
            "brtrue.s L2"
        );
    }
}
