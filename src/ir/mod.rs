//! The stack-based typed intermediate language the code generator emits
//! into and the backend compiles.

pub mod builder;
pub mod display;
pub mod instr;
pub mod types;

pub use builder::{IlBuilder, IlMethod};
pub use instr::{ArithOp, BranchKind, CompareKind, HelperToken, IlInstr, LabelId, LocalId, UnaryArithOp};
pub use types::IlType;
