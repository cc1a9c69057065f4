//! The worklist fixpoint.
//!
//! Processes one queued offset per iteration: clone its incoming state,
//! apply that instruction's stack effect (the ~90-case dispatch), then
//! propagate the outgoing state(s) to every control-flow successor,
//! enqueuing any target whose start state changed. The worklist is a
//! `VecDeque` walked FIFO so re-running the fixpoint over the same code
//! always visits offsets in the same order.

use std::collections::VecDeque;

use crate::bytecode::{Code, Constant, DecodedInstr, Opcode};
use crate::cow::CowVec;
use crate::value::tables::{BinOp, RichCompareOp, UnaryOp};
use crate::value::AbstractValue;

use super::{AbstractInterpreter, AbstractLocalInfo, InterpreterState, UnsupportedReason};

/// The abstract kind a `LOAD_CONST` operand carries.
fn const_value(constant: &Constant) -> AbstractValue {
    match constant {
        Constant::Int(_) => AbstractValue::INT,
        Constant::Float(_) => AbstractValue::FLOAT,
        Constant::Bool(_) => AbstractValue::BOOL,
        Constant::Str(_) => AbstractValue::STR,
        Constant::Bytes(_) => AbstractValue::BYTES,
        Constant::None => AbstractValue::NONE,
        Constant::Tuple(_) => AbstractValue::TUPLE,
        Constant::Opaque => AbstractValue::ANY,
    }
}

/// Where control flow goes after one instruction.
enum Successors {
    /// Straight-line; continue at the next instruction.
    Fallthrough,
    /// Unconditional transfer, no fallthrough.
    Jump(usize),
    /// Both arms are live, same outgoing state on both: `(taken, not_taken)`.
    Branch(usize, usize),
    /// `JUMP_IF_*_OR_POP`: the taken arm keeps the top-of-stack value that
    /// was just peeked; the not-taken (fallthrough) arm pops it.
    BranchKeepOrPop(usize, usize),
    /// `FOR_ITER`'s two arms: enter the loop body, or fall through past it.
    ForIter { body: usize, after: usize },
    /// `RETURN_VALUE` / `RAISE_VARARGS` / `RERAISE`: no successors at all.
    Terminal,
}

pub fn run(ai: &mut AbstractInterpreter) {
    let starting = starting_state(&ai.code);
    ai.start_states.insert(0, starting);

    let mut worklist: VecDeque<usize> = VecDeque::new();
    worklist.push_back(0);
    drain(ai, &mut worklist);
}

/// Process a worklist to completion, dispatching each queued offset
/// through `step` and propagating the result to its successors. Used both
/// for the top-level pass started at offset 0 and for the nested pass
/// seeded at a `SETUP_FINALLY` handler target.
fn drain(ai: &mut AbstractInterpreter, worklist: &mut VecDeque<usize>) {
    while let Some(offset) = worklist.pop_front() {
        if ai.unsupported.is_some() {
            return;
        }
        let Some(&idx) = ai.offset_index.get(&offset) else { continue };
        let instr = ai.instrs[idx].clone();
        let Some(incoming) = ai.start_states.get(&offset).cloned() else { continue };

        let mut state = incoming;
        let successors = match step(ai, &instr, &mut state) {
            Some(s) => s,
            None => return, // ai.unsupported was set by `step`
        };

        let next_offset = offset + instr.size;

        match successors {
            Successors::Fallthrough => {
                if next_offset < ai.code.code.len() {
                    propagate(ai, next_offset, state, worklist);
                }
            }
            Successors::Jump(target) => {
                propagate(ai, target, state, worklist);
            }
            Successors::Branch(taken, not_taken) => {
                propagate(ai, taken, state.clone(), worklist);
                propagate(ai, not_taken, state, worklist);
            }
            Successors::BranchKeepOrPop(taken, not_taken) => {
                propagate(ai, taken, state.clone(), worklist);
                let mut popped = state;
                popped.stack.pop();
                propagate(ai, not_taken, popped, worklist);
            }
            Successors::ForIter { body, after } => {
                let mut body_state = state.clone();
                body_state.stack.push((AbstractValue::ANY, None));
                propagate(ai, body, body_state, worklist);

                let mut after_state = state;
                after_state.stack.pop();
                propagate(ai, after, after_state, worklist);
            }
            Successors::Terminal => {}
        }
    }
}

fn propagate(ai: &mut AbstractInterpreter, offset: usize, state: InterpreterState, worklist: &mut VecDeque<usize>) {
    match ai.start_states.get(&offset) {
        None => {
            ai.start_states.insert(offset, state);
            worklist.push_back(offset);
        }
        Some(existing) => match merge_states(existing, &state, &mut ai.arena) {
            Some((merged, changed)) => {
                if changed {
                    ai.start_states.insert(offset, merged);
                    worklist.push_back(offset);
                }
            }
            None => {
                ai.unsupported = Some(UnsupportedReason::StackShapeMismatch);
            }
        },
    }
}

/// Join two states at a control-flow merge.
/// Returns `None` if the hard stack-shape invariant is violated.
fn merge_states(
    a: &InterpreterState,
    b: &InterpreterState,
    arena: &mut crate::source::SourceArena,
) -> Option<(InterpreterState, bool)> {
    if a.stack.len() != b.stack.len() {
        return None;
    }

    let mut changed = false;
    let mut stack = Vec::with_capacity(a.stack.len());
    for (&(av, asrc), &(bv, bsrc)) in a.stack.iter().zip(b.stack.iter()) {
        let merged_value = av.merge_with(bv);
        let merged_source = if av.kind() != bv.kind() {
            let combined = crate::source::combine_opt(arena, asrc, bsrc);
            if let Some(id) = combined {
                arena.escape(id);
            } else {
                // absent source on either side already counts as escaped.
            }
            combined
        } else {
            crate::source::combine_opt(arena, asrc, bsrc)
        };
        if merged_value != av || merged_source != asrc {
            changed = true;
        }
        stack.push((merged_value, merged_source));
    }

    let len = a.locals.len();
    let mut locals = Vec::with_capacity(len);
    for i in 0..len {
        let al = a.locals.get(i).unwrap();
        let bl = b.locals.get(i).unwrap();
        let merged_value = al.value.merge_with(bl.value);
        let merged_source = if al.value.kind() != bl.value.kind() {
            let combined = crate::source::combine_opt(arena, al.source, bl.source);
            if let Some(id) = combined {
                arena.escape(id);
            }
            combined
        } else {
            crate::source::combine_opt(arena, al.source, bl.source)
        };
        let merged_undefined = al.maybe_undefined || bl.maybe_undefined;
        let merged = AbstractLocalInfo {
            value: merged_value,
            source: merged_source,
            maybe_undefined: merged_undefined,
        };
        if merged != *al {
            changed = true;
        }
        locals.push(merged);
    }

    Some((InterpreterState { stack, locals: CowVec::from_vec(locals) }, changed))
}

fn starting_state(code: &Code) -> InterpreterState {
    let mut locals = Vec::with_capacity(code.local_count);
    let assigned_upto = code.arg_count + code.kwonly_arg_count;
    for i in 0..code.local_count {
        if i < assigned_upto {
            locals.push(AbstractLocalInfo::assigned(AbstractValue::ANY));
        } else if Some(i) == code.varargs_slot() {
            locals.push(AbstractLocalInfo::assigned(AbstractValue::TUPLE));
        } else if Some(i) == code.varkwargs_slot() {
            locals.push(AbstractLocalInfo::assigned(AbstractValue::DICT));
        } else {
            locals.push(AbstractLocalInfo::undefined());
        }
    }
    InterpreterState::new(CowVec::from_vec(locals))
}

fn binop_of(opcode: Opcode) -> Option<BinOp> {
    use Opcode::*;
    Some(match opcode {
        BinaryAdd | InplaceAdd => BinOp::Add,
        BinarySubtract | InplaceSubtract => BinOp::Sub,
        BinaryMultiply | InplaceMultiply => BinOp::Mul,
        BinaryTrueDivide | InplaceTrueDivide => BinOp::TrueDiv,
        BinaryFloorDivide | InplaceFloorDivide => BinOp::FloorDiv,
        BinaryModulo | InplaceModulo => BinOp::Mod,
        BinaryPower | InplacePower => BinOp::Pow,
        BinaryMatrixMultiply => BinOp::MatMul,
        BinaryLshift | InplaceLshift => BinOp::LShift,
        BinaryRshift | InplaceRshift => BinOp::RShift,
        BinaryAnd | InplaceAnd => BinOp::And,
        BinaryOr | InplaceOr => BinOp::Or,
        BinaryXor | InplaceXor => BinOp::Xor,
        BinarySubscr => BinOp::Subscr,
        _ => return None,
    })
}

fn richcompare_of(arg: u32) -> Option<RichCompareOp> {
    Some(match arg {
        0 => RichCompareOp::Lt,
        1 => RichCompareOp::Le,
        2 => RichCompareOp::Eq,
        3 => RichCompareOp::Ne,
        4 => RichCompareOp::Gt,
        5 => RichCompareOp::Ge,
        _ => return None,
    })
}

macro_rules! pop_or_fail {
    ($ai:expr, $state:expr) => {
        match $state.stack.pop() {
            Some(v) => v,
            None => {
                $ai.unsupported = Some(UnsupportedReason::StackShapeMismatch);
                return None;
            }
        }
    };
}

/// Apply one instruction's stack effect, returning its control-flow
/// successors, or `None` if the instruction could not be modeled (in
/// which case `ai.unsupported` has been set).
fn step(ai: &mut AbstractInterpreter, instr: &DecodedInstr, state: &mut InterpreterState) -> Option<Successors> {
    use Opcode::*;

    let offset = instr.offset;
    let arg = instr.arg;

    match instr.opcode {
        Nop => {}

        PopTop => {
            pop_or_fail!(ai, state);
        }

        RotTwo => {
            let a = pop_or_fail!(ai, state);
            let b = pop_or_fail!(ai, state);
            state.stack.push(a);
            state.stack.push(b);
        }

        RotThree => {
            let a = pop_or_fail!(ai, state);
            let b = pop_or_fail!(ai, state);
            let c = pop_or_fail!(ai, state);
            state.stack.push(a);
            state.stack.push(c);
            state.stack.push(b);
        }

        DupTop => {
            let top = *state.stack.last()?;
            state.stack.push(top);
        }

        LoadConst => {
            let src = ai.arena.new_const();
            ai.source_at.insert(offset, Some(src));
            let value = ai.code.consts.get(arg as usize).map_or(AbstractValue::ANY, const_value);
            state.stack.push((value, Some(src)));
        }

        LoadFast => {
            let idx = arg as usize;
            let info = state.locals.get(idx)?.clone();
            let src = info.source.or_else(|| Some(ai.arena.new_local()));
            ai.source_at.insert(offset, src);
            state.stack.push((info.value, src));
        }

        StoreFast => {
            let (value, source) = pop_or_fail!(ai, state);
            let idx = arg as usize;
            let new_info = AbstractLocalInfo { value, source, maybe_undefined: false };
            state.locals.set(idx, new_info);
        }

        DeleteFast => {
            let idx = arg as usize;
            state.locals.set(idx, AbstractLocalInfo::undefined());
        }

        LoadName | LoadGlobal | LoadClassderef | LoadDeref => {
            let src = ai.arena.new_intermediate(&[]);
            state.stack.push((AbstractValue::ANY, Some(src)));
        }

        StoreName | StoreGlobal | StoreDeref => {
            let (_value, source) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, source);
        }

        DeleteName | DeleteGlobal => {}

        LoadAttr | LoadMethod => {
            let (_v, s) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, s);
            state.stack.push((AbstractValue::ANY, None));
            if instr.opcode == LoadMethod {
                state.stack.push((AbstractValue::ANY, None));
            }
        }

        StoreAttr => {
            let (_obj, obj_src) = pop_or_fail!(ai, state);
            let (_val, val_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, obj_src);
            crate::source::escape_opt(&mut ai.arena, val_src);
        }

        DeleteAttr => {
            let (_obj, obj_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, obj_src);
        }

        LoadBuildClass | LoadAssertionError => {
            state.stack.push((AbstractValue::ANY, None));
        }

        UnaryPositive | UnaryNegative | UnaryNot | UnaryInvert => {
            let op = match instr.opcode {
                UnaryPositive => UnaryOp::Positive,
                UnaryNegative => UnaryOp::Negative,
                UnaryNot => UnaryOp::Not,
                UnaryInvert => UnaryOp::Invert,
                _ => unreachable!(),
            };
            let (value, source) = pop_or_fail!(ai, state);
            let result = value.unary(&mut ai.arena, source, op);
            let result_src = ai.arena.new_intermediate(&source.into_iter().collect::<Vec<_>>());
            ai.source_at.insert(offset, Some(result_src));
            state.stack.push((result, Some(result_src)));
        }

        op if binop_of(op).is_some() => {
            let binop = binop_of(op).unwrap();
            let (rhs, rhs_src) = pop_or_fail!(ai, state);
            let (lhs, lhs_src) = pop_or_fail!(ai, state);
            let result = lhs.binary(&mut ai.arena, lhs_src, binop, rhs, rhs_src);
            let inputs: Vec<_> = [lhs_src, rhs_src].into_iter().flatten().collect();
            let result_src = ai.arena.new_intermediate(&inputs);
            ai.source_at.insert(offset, Some(result_src));
            state.stack.push((result, Some(result_src)));
        }

        StoreSubscr => {
            let (_idx, idx_src) = pop_or_fail!(ai, state);
            let (_container, c_src) = pop_or_fail!(ai, state);
            let (_val, v_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, idx_src);
            crate::source::escape_opt(&mut ai.arena, c_src);
            crate::source::escape_opt(&mut ai.arena, v_src);
        }

        DeleteSubscr => {
            let (_idx, idx_src) = pop_or_fail!(ai, state);
            let (_container, c_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, idx_src);
            crate::source::escape_opt(&mut ai.arena, c_src);
        }

        CompareOp => {
            let (rhs, rhs_src) = pop_or_fail!(ai, state);
            let (lhs, lhs_src) = pop_or_fail!(ai, state);
            let result = match richcompare_of(arg) {
                Some(cmp) => lhs.compare(&mut ai.arena, lhs_src, cmp, rhs, rhs_src),
                None => {
                    crate::source::escape_opt(&mut ai.arena, lhs_src);
                    crate::source::escape_opt(&mut ai.arena, rhs_src);
                    AbstractValue::ANY
                }
            };
            state.stack.push((result, None));
        }

        IsOp => {
            let (_rhs, _) = pop_or_fail!(ai, state);
            let (_lhs, _) = pop_or_fail!(ai, state);
            state.stack.push((AbstractValue::BOOL, None));
        }

        ContainsOp => {
            let (_rhs, rhs_src) = pop_or_fail!(ai, state);
            let (_lhs, lhs_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, rhs_src);
            crate::source::escape_opt(&mut ai.arena, lhs_src);
            state.stack.push((AbstractValue::BOOL, None));
        }

        BuildTuple | BuildList | BuildSet | BuildMap | BuildString | BuildSlice => {
            let count = match instr.opcode {
                BuildMap => arg as usize * 2,
                _ => arg as usize,
            };
            for _ in 0..count {
                let (_v, s) = pop_or_fail!(ai, state);
                crate::source::escape_opt(&mut ai.arena, s);
            }
            let result = match instr.opcode {
                BuildTuple => AbstractValue::TUPLE,
                BuildList => AbstractValue::LIST,
                BuildSet => AbstractValue::SET,
                BuildMap => AbstractValue::DICT,
                BuildString => AbstractValue::STR,
                BuildSlice => AbstractValue::SLICE,
                _ => unreachable!(),
            };
            state.stack.push((result, None));
        }

        ListToTuple => {
            let (_v, s) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, s);
            state.stack.push((AbstractValue::TUPLE, None));
        }

        ListExtend | SetUpdate | DictUpdate | DictMerge => {
            let (_item, item_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, item_src);
            // container stays on the stack, untouched.
        }

        UnpackSequence => {
            let (_v, s) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, s);
            for _ in 0..arg {
                state.stack.push((AbstractValue::ANY, None));
            }
        }

        UnpackEx => {
            let (_v, s) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, s);
            let before = arg & 0xFF;
            let after = (arg >> 8) & 0xFF;
            for _ in 0..(before + after + 1) {
                state.stack.push((AbstractValue::ANY, None));
            }
        }

        FormatValue => {
            let have_fmt_spec = arg & 0x04 != 0;
            if have_fmt_spec {
                let (_spec, spec_src) = pop_or_fail!(ai, state);
                crate::source::escape_opt(&mut ai.arena, spec_src);
            }
            let (_v, v_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, v_src);
            state.stack.push((AbstractValue::STR, None));
        }

        ReturnValue => {
            let (value, _source) = pop_or_fail!(ai, state);
            ai.return_value = ai.return_value.merge_with(value);
            return Some(Successors::Terminal);
        }

        RaiseVarargs => {
            for _ in 0..arg {
                let (_v, s) = pop_or_fail!(ai, state);
                crate::source::escape_opt(&mut ai.arena, s);
            }
            return Some(Successors::Terminal);
        }

        JumpForward => {
            let target = offset + instr.size + arg as usize;
            return Some(Successors::Jump(target));
        }

        JumpAbsolute => {
            return Some(Successors::Jump(arg as usize));
        }

        PopJumpIfFalse | PopJumpIfTrue => {
            let (value, source) = pop_or_fail!(ai, state);
            value.truth(&mut ai.arena, source);
            let target = arg as usize;
            let fallthrough = offset + instr.size;
            if instr.opcode == PopJumpIfFalse {
                if value.is_always_false() {
                    return Some(Successors::Jump(target));
                }
                if value.is_always_true() {
                    return Some(Successors::Jump(fallthrough));
                }
            } else if value.is_always_true() {
                return Some(Successors::Jump(target));
            } else if value.is_always_false() {
                return Some(Successors::Jump(fallthrough));
            }
            return Some(Successors::Branch(target, fallthrough));
        }

        JumpIfFalseOrPop | JumpIfTrueOrPop => {
            let (value, source) = *state.stack.last()?;
            value.truth(&mut ai.arena, source);
            let target = arg as usize;
            let fallthrough = offset + instr.size;
            return Some(Successors::BranchKeepOrPop(target, fallthrough));
        }

        JumpIfNotExcMatch => {
            let (_rhs, rhs_src) = pop_or_fail!(ai, state);
            let (_lhs, lhs_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, rhs_src);
            crate::source::escape_opt(&mut ai.arena, lhs_src);
            let target = arg as usize;
            let fallthrough = offset + instr.size;
            return Some(Successors::Branch(target, fallthrough));
        }

        ForIter => {
            let body = offset + instr.size;
            let after = arg as usize;
            return Some(Successors::ForIter { body, after });
        }

        GetIter => {
            let (_v, s) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, s);
            state.stack.push((AbstractValue::ANY, None));
        }

        SetupFinally => {
            let handler_target = arg as usize;
            let mut handler_state = state.clone();
            handler_state.stack.push((AbstractValue::ANY, None));
            let fallthrough = offset + instr.size;
            propagate_into(ai, handler_target, handler_state);
            return Some(Successors::Jump(fallthrough));
        }

        PopBlock => {}

        PopExcept => {
            pop_or_fail!(ai, state);
        }

        Reraise => {
            pop_or_fail!(ai, state);
            return Some(Successors::Terminal);
        }

        SetupAnnotations => {}

        WithExceptStart => {
            state.stack.push((AbstractValue::ANY, None));
        }

        CallFunction => {
            for _ in 0..(arg + 1) {
                let (_v, s) = pop_or_fail!(ai, state);
                crate::source::escape_opt(&mut ai.arena, s);
            }
            state.stack.push((AbstractValue::ANY, None));
        }

        CallFunctionKw => {
            for _ in 0..(arg + 2) {
                let (_v, s) = pop_or_fail!(ai, state);
                crate::source::escape_opt(&mut ai.arena, s);
            }
            state.stack.push((AbstractValue::ANY, None));
        }

        CallFunctionEx => {
            let has_kwargs = arg & 0x01 != 0;
            let count = if has_kwargs { 3 } else { 2 };
            for _ in 0..count {
                let (_v, s) = pop_or_fail!(ai, state);
                crate::source::escape_opt(&mut ai.arena, s);
            }
            state.stack.push((AbstractValue::ANY, None));
        }

        CallMethod => {
            for _ in 0..(arg + 2) {
                let (_v, s) = pop_or_fail!(ai, state);
                crate::source::escape_opt(&mut ai.arena, s);
            }
            state.stack.push((AbstractValue::ANY, None));
        }

        MakeFunction => {
            let extra = (arg & 0x01 != 0) as u32
                + (arg & 0x02 != 0) as u32
                + (arg & 0x04 != 0) as u32
                + (arg & 0x08 != 0) as u32;
            for _ in 0..(extra + 2) {
                let (_v, s) = pop_or_fail!(ai, state);
                crate::source::escape_opt(&mut ai.arena, s);
            }
            state.stack.push((AbstractValue::FUNCTION, None));
        }

        PrintExpr => {
            let (_v, s) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, s);
        }

        ImportName => {
            let (_fromlist, f_src) = pop_or_fail!(ai, state);
            let (_level, l_src) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, f_src);
            crate::source::escape_opt(&mut ai.arena, l_src);
            state.stack.push((AbstractValue::ANY, None));
        }

        ImportFrom => {
            let (_module, m_src) = *state.stack.last()?;
            crate::source::escape_opt(&mut ai.arena, m_src);
            state.stack.push((AbstractValue::ANY, None));
        }

        ImportStar => {
            let (_v, s) = pop_or_fail!(ai, state);
            crate::source::escape_opt(&mut ai.arena, s);
        }

        ExtendedArg => {
            // Never appears post-decode; the decoder folds it away.
        }

        YieldValue | YieldFrom | GetAwaitable | GetAiter | GetAnext | BeforeAsyncWith
        | SetupWith | SetupAsyncWith => {
            // Preprocessing rejects these before the fixpoint ever runs.
            ai.unsupported = Some(UnsupportedReason::WithStatement);
            return None;
        }
    }

    Some(Successors::Fallthrough)
}

/// Seed a nested worklist at a `SETUP_FINALLY` handler target and drain it
/// to completion before returning to the enclosing `drain` call. The
/// handler target is only ever reachable via this exceptional edge, so it
/// needs its own entry point into the fixpoint rather than falling out of
/// the normal fallthrough/branch successors.
fn propagate_into(ai: &mut AbstractInterpreter, offset: usize, state: InterpreterState) {
    let mut worklist = VecDeque::new();
    propagate(ai, offset, state, &mut worklist);
    drain(ai, &mut worklist);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Code;
    use std::rc::Rc;

    fn make(code_bytes: Vec<u8>, local_count: usize) -> AbstractInterpreter {
        let code = Code::new("f", code_bytes, local_count);
        AbstractInterpreter::new(Rc::new(code), None).unwrap()
    }

    #[test]
    fn float_add_does_not_escape_sources() {
        // LOAD_CONST 0 (1.0); LOAD_CONST 1 (2.0); BINARY_ADD; RETURN_VALUE
        let mut code = Code::new(
            "f",
            vec![
                Opcode::LoadConst as u8, 0,
                Opcode::LoadConst as u8, 1,
                Opcode::BinaryAdd as u8, 0,
                Opcode::ReturnValue as u8, 0,
            ],
            0,
        );
        code.consts = vec![crate::bytecode::Constant::Float(1.0), crate::bytecode::Constant::Float(2.0)];
        let mut ai = AbstractInterpreter::new(Rc::new(code), None).unwrap();
        assert!(ai.interpret());
        // Float + Float is in the binary table, so neither LOAD_CONST source escapes.
        assert!(!ai.should_box(0));
        assert!(!ai.should_box(2));
        assert_eq!(ai.return_info(), AbstractValue::FLOAT);
    }

    #[test]
    fn int_plus_float_add_escapes_sources() {
        // LOAD_CONST 0 (1); LOAD_CONST 1 (2.0); BINARY_ADD; RETURN_VALUE
        let mut code = Code::new(
            "f",
            vec![
                Opcode::LoadConst as u8, 0,
                Opcode::LoadConst as u8, 1,
                Opcode::BinaryAdd as u8, 0,
                Opcode::ReturnValue as u8, 0,
            ],
            0,
        );
        code.consts = vec![crate::bytecode::Constant::Int(1), crate::bytecode::Constant::Float(2.0)];
        let mut ai = AbstractInterpreter::new(Rc::new(code), None).unwrap();
        assert!(ai.interpret());
        assert!(ai.should_box(0));
        assert!(ai.should_box(2));
    }

    #[test]
    fn unary_negate_int_local_tracks_source() {
        let mut ai = make(
            vec![
                Opcode::LoadFast as u8, 0,
                Opcode::UnaryNegative as u8, 0,
                Opcode::ReturnValue as u8, 0,
            ],
            1,
        );
        assert!(ai.interpret());
        assert_eq!(ai.return_info(), AbstractValue::ANY);
    }

    #[test]
    fn unmodeled_construct_reports_false() {
        let mut ai = make(vec![Opcode::SetupWith as u8, 4, Opcode::ReturnValue as u8, 0], 0);
        assert!(!ai.interpret());
    }
}
