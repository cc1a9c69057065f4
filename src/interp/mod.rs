//! The abstract interpreter.

pub mod fixpoint;
pub mod preprocess;

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::bytecode::{decode_function, Code, DecodeError, DecodedInstr};
use crate::cow::CowVec;
use crate::source::{MaybeSource, SourceArena};
use crate::value::AbstractValue;

/// Per-slot local state: its current abstract value, the source that
/// produced it (if any), and whether control flow can reach this point
/// without having assigned it.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractLocalInfo {
    pub value: AbstractValue,
    pub source: MaybeSource,
    pub maybe_undefined: bool,
}

impl AbstractLocalInfo {
    pub fn undefined() -> AbstractLocalInfo {
        AbstractLocalInfo {
            value: AbstractValue::UNDEFINED,
            source: None,
            maybe_undefined: true,
        }
    }

    pub fn assigned(value: AbstractValue) -> AbstractLocalInfo {
        AbstractLocalInfo {
            value,
            source: None,
            maybe_undefined: false,
        }
    }
}

/// One (operand stack, locals) pair recorded at a bytecode offset.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterState {
    pub stack: Vec<(AbstractValue, MaybeSource)>,
    pub locals: CowVec<AbstractLocalInfo>,
}

impl InterpreterState {
    pub fn new(locals: CowVec<AbstractLocalInfo>) -> InterpreterState {
        InterpreterState { stack: Vec::new(), locals }
    }
}

/// Reserved hook for a future host-compiler handle; the AI itself never
/// reads through it.
#[derive(Debug, Clone, Copy)]
pub struct CompilerHandle;

/// Why `interpret()` could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedReason {
    CoroutineOrGenerator,
    YieldFamily,
    WithStatement,
    FrameIntrospectionGlobal,
    UnmodeledOpcode,
    StackShapeMismatch,
    Decode,
}

/// Forward, flow-sensitive abstract interpretation over one function's
/// bytecode.
pub struct AbstractInterpreter {
    pub(crate) code: Rc<Code>,
    pub(crate) instrs: Vec<DecodedInstr>,
    pub(crate) offset_index: FxHashMap<usize, usize>,
    pub(crate) arena: SourceArena,
    pub(crate) start_states: FxHashMap<usize, InterpreterState>,
    /// The source recorded by `LOAD_FAST`, `LOAD_CONST`, and each
    /// arithmetic instruction, keyed by that instruction's offset — the
    /// only offsets the code generator queries via `should_box`.
    pub(crate) source_at: FxHashMap<usize, MaybeSource>,
    pub(crate) pop_opens: FxHashMap<usize, usize>,
    pub(crate) return_value: AbstractValue,
    pub(crate) unsupported: Option<UnsupportedReason>,
    _compiler: Option<CompilerHandle>,
}

impl AbstractInterpreter {
    /// Bind to a code object. `compiler_opt` is unused by the analysis
    /// itself; it exists so a future top-level facade can thread a handle
    /// through without changing this constructor's shape.
    pub fn new(code: Rc<Code>, compiler_opt: Option<CompilerHandle>) -> Result<AbstractInterpreter, DecodeError> {
        let instrs = decode_function(&code.code)?;
        let offset_index = instrs.iter().enumerate().map(|(i, instr)| (instr.offset, i)).collect();
        Ok(AbstractInterpreter {
            code,
            instrs,
            offset_index,
            arena: SourceArena::new(),
            start_states: FxHashMap::default(),
            source_at: FxHashMap::default(),
            pop_opens: FxHashMap::default(),
            return_value: AbstractValue::UNDEFINED,
            unsupported: None,
            _compiler: compiler_opt,
        })
    }

    /// Run preprocessing then the worklist fixpoint. Returns `false` if the
    /// function contains a construct this core does not model.
    pub fn interpret(&mut self) -> bool {
        let preprocessed = preprocess::run(&self.code, &self.instrs);
        if let Some(reason) = preprocessed.unsupported {
            self.unsupported = Some(reason);
            return false;
        }
        self.pop_opens = preprocessed.pop_opens;

        fixpoint::run(self);
        self.unsupported.is_none()
    }

    pub fn local_info(&self, offset: usize, local_index: usize) -> Option<&AbstractLocalInfo> {
        self.start_states.get(&offset)?.locals.get(local_index)
    }

    pub fn stack_info(&self, offset: usize) -> Option<&[(AbstractValue, MaybeSource)]> {
        self.start_states.get(&offset).map(|s| s.stack.as_slice())
    }

    pub fn return_info(&self) -> AbstractValue {
        self.return_value
    }

    /// Whether the source recorded at `offset` (a `LOAD_FAST`, `LOAD_CONST`,
    /// or arithmetic instruction) must be materialized in boxed form.
    pub fn should_box(&mut self, offset: usize) -> bool {
        match self.source_at.get(&offset).copied() {
            Some(Some(id)) => self.arena.escapes(id),
            // No source recorded, or recorded as absent: treat as already
            // escaped, consistent with "an absent source is equivalent to
            // already escaped".
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CodeFlags, Constant};

    fn unary_negate_code() -> Rc<Code> {
        use crate::bytecode::Opcode;
        let mut code = Code::new("f", vec![], 1);
        code.code = vec![
            Opcode::LoadFast as u8, 0,
            Opcode::UnaryNegative as u8, 0,
            Opcode::ReturnValue as u8, 0,
        ];
        code.consts.push(Constant::None);
        code.arg_count = 1;
        Rc::new(code)
    }

    #[test]
    fn interpret_simple_function_succeeds() {
        let code = unary_negate_code();
        let mut ai = AbstractInterpreter::new(code, None).unwrap();
        assert!(ai.interpret());
        assert_eq!(ai.return_info().kind(), crate::value::AbstractValueKind::Any);
    }

    #[test]
    fn rejects_generator_flag() {
        use crate::bytecode::Opcode;
        let mut code = Code::new("g", vec![Opcode::ReturnValue as u8, 0], 0);
        code.flags |= CodeFlags::GENERATOR;
        let mut ai = AbstractInterpreter::new(Rc::new(code), None).unwrap();
        assert!(!ai.interpret());
        assert_eq!(ai.unsupported, Some(UnsupportedReason::CoroutineOrGenerator));
    }
}
