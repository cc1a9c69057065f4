//! The code generator.
//!
//! Turns a completed `AbstractInterpreter` back into one linear pass over
//! the same instruction stream, grounded on Pyjion's `AbstractInterpreter::
//! compileWorker`: no separate CFG or worklist of its own, since the AI has
//! already proven every offset it visited is reachable with an agreed-upon
//! stack shape. The generator boxes everything — every Python value lives
//! in an `IlType::Object` slot, calling a host helper for every operation —
//! leaving the AI's unboxed-value lattice (`AbstractValue`, `should_box`)
//! as groundwork a later optimization pass can act on rather than something
//! this pass consults.

pub mod block_stack;
pub mod value_stack;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::bytecode::{DecodedInstr, Opcode};
use crate::ehmanager::{ExceptionHandlerManager, ExceptionVars};
use crate::helpers::{Helper, HelperTable};
use crate::interp::AbstractInterpreter;
use crate::ir::{BranchKind, IlBuilder, IlMethod, IlType, LabelId, LocalId, UnaryArithOp};

use block_stack::BlockStack;
use value_stack::{ShadowKind, StackSnapshots, ValueStack};

/// Why `generate` could not produce an `IlMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    #[error("generate() requires an AbstractInterpreter that has already run interpret() to completion")]
    NotInterpreted,
    #[error("opcode {opcode:?} at offset {offset} has no lowering")]
    Unlowerable { opcode: Opcode, offset: usize },
}

/// Compile one function's bytecode into an `IlMethod`, re-walking the same
/// instruction stream the abstract interpreter already validated.
///
/// The emitted method takes a single `Object` parameter — a pointer to the
/// host's frame for this activation — and returns an `Object`: the result,
/// or null with an exception set on the host thread state.
pub fn generate(ai: &AbstractInterpreter) -> Result<IlMethod, CodegenError> {
    if ai.unsupported.is_some() || ai.start_states.is_empty() {
        return Err(CodegenError::NotInterpreted);
    }

    let mut method = IlMethod::new(ai.code.name.clone(), vec![IlType::Object]);
    let mut builder = IlBuilder::new(&mut method);
    let mut cg = CodeGenerator::new(ai);

    cg.prologue(&mut builder);
    cg.walk(&mut builder)?;
    cg.epilogue(&mut builder);

    Ok(method)
}

/// Precomputed set of offsets any branch-family opcode can land on —
/// `JumpForward`'s target is relative to the instruction after it; every
/// other jump-family opcode's `arg` is already an absolute offset (mirrors
/// `interp::fixpoint::step`'s handling of the same opcodes exactly).
fn compute_jump_targets(instrs: &[DecodedInstr]) -> FxHashSet<usize> {
    use Opcode::*;
    let mut targets = FxHashSet::default();
    for instr in instrs {
        match instr.opcode {
            JumpForward => {
                targets.insert(instr.offset + instr.size + instr.arg as usize);
            }
            JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue | JumpIfFalseOrPop | JumpIfTrueOrPop
            | JumpIfNotExcMatch | ForIter | SetupFinally => {
                targets.insert(instr.arg as usize);
            }
            _ => {}
        }
    }
    targets
}

struct CodeGenerator<'ai> {
    ai: &'ai AbstractInterpreter,
    helpers: &'static HelperTable,
    jump_targets: FxHashSet<usize>,
    labels: FxHashMap<usize, LabelId>,
    stack: ValueStack,
    snapshots: StackSnapshots,
    blocks: BlockStack,
    ehmgr: ExceptionHandlerManager,
    locals: Vec<LocalId>,
    cell_locals: Vec<LocalId>,
    return_local: Option<LocalId>,
    return_label: Option<LabelId>,
}

impl<'ai> CodeGenerator<'ai> {
    fn new(ai: &'ai AbstractInterpreter) -> CodeGenerator<'ai> {
        CodeGenerator {
            ai,
            helpers: HelperTable::global(),
            jump_targets: FxHashSet::default(),
            labels: FxHashMap::default(),
            stack: ValueStack::new(),
            snapshots: StackSnapshots::new(),
            blocks: BlockStack::new(),
            ehmgr: ExceptionHandlerManager::new(),
            locals: Vec::new(),
            cell_locals: Vec::new(),
            return_local: None,
            return_label: None,
        }
    }

    fn return_local(&self) -> LocalId {
        self.return_local.expect("prologue must run before return_local is read")
    }

    fn return_label(&self) -> LabelId {
        self.return_label.expect("prologue must run before return_label is read")
    }

    /// The innermost open handler, or the root if no handler is open.
    fn current_handler(&self) -> &crate::ehmanager::ExceptionHandler {
        match self.blocks.top() {
            Some(idx) => self.ehmgr.handler(idx),
            None => self.ehmgr.root_handler(),
        }
    }

    /// The label generated code should jump to on a failed helper call:
    /// the innermost open handler's error target, or the root's.
    fn current_error_label(&self) -> LabelId {
        self.current_handler().error_target
    }

    /// Decref every still-live `Object` shadow slot between the current
    /// handler's entry depth and `consumed` operands back from the current
    /// depth — `consumed` excludes operands a helper call already took
    /// ownership of, since those are no longer on the real stack to decref.
    /// `Value` slots in the same range are discarded without a call.
    fn unwind_above(&mut self, b: &mut IlBuilder, consumed: u32) {
        let entry_depth = self.current_handler().entry_stack_depth;
        let base = self.stack.depth().saturating_sub(consumed as usize);
        let kinds: Vec<ShadowKind> = self.stack.kinds_between(entry_depth, base).collect();
        for kind in kinds {
            match kind {
                ShadowKind::Object => self.call_void(b, Helper::Decref, 1),
                ShadowKind::Value => b.pop_value(IlType::I4),
            }
        }
    }

    /// Same as `unwind_above` for sites where the shadow stack has already
    /// been popped down to its post-instruction depth before the branch.
    fn unwind_exact(&mut self, b: &mut IlBuilder) {
        let entry_depth = self.current_handler().entry_stack_depth;
        let count = self.stack.objects_above(entry_depth).len();
        for _ in 0..count {
            self.call_void(b, Helper::Decref, 1);
        }
    }

    /// The label standing for bytecode offset `offset`, creating one on
    /// first reference. `self.labels` and `b` never alias — this is sound
    /// under ordinary disjoint borrowing even though it looks like `self`
    /// and `b` are both touched inside one expression.
    fn label_for(&mut self, b: &mut IlBuilder, offset: usize) -> LabelId {
        *self.labels.entry(offset).or_insert_with(|| b.define_label())
    }

    fn fresh_exception_vars(&mut self, b: &mut IlBuilder) -> ExceptionVars {
        ExceptionVars {
            prev_exc: b.define_local(IlType::Object, true),
            prev_exc_val: b.define_local(IlType::Object, true),
            prev_traceback: b.define_local(IlType::Object, true),
            finally_exc: b.define_local(IlType::Object, true),
            finally_traceback: b.define_local(IlType::Object, true),
            finally_value: b.define_local(IlType::Object, true),
        }
    }

    // ---- helper-call conventions ----

    /// An `Object`-returning helper: null means failure.
    fn call_checked_object(&mut self, b: &mut IlBuilder, helper: Helper, arg_count: u32) {
        let token = self.helpers.token(helper);
        b.call(token, arg_count, IlType::Object);
        b.dup(IlType::Object);
        b.const_null();
        b.ceq(IlType::Object);
        let cont = b.define_label();
        b.branch(BranchKind::IfFalse, cont);
        b.pop_value(IlType::Object); // the duplicated result is null, nothing to decref
        self.unwind_above(b, arg_count);
        let err = self.current_error_label();
        b.branch(BranchKind::Always, err);
        b.mark_label(cont);
    }

    /// An `I4`-returning status helper (`-1` means failure); nothing of its
    /// own is left behind for the caller to consume.
    fn call_checked_i4(&mut self, b: &mut IlBuilder, helper: Helper, arg_count: u32) {
        let token = self.helpers.token(helper);
        b.call(token, arg_count, IlType::I4);
        b.const_i4(-1);
        b.ceq(IlType::I4);
        let cont = b.define_label();
        b.branch(BranchKind::IfFalse, cont);
        self.unwind_above(b, arg_count);
        let err = self.current_error_label();
        b.branch(BranchKind::Always, err);
        b.mark_label(cont);
    }

    /// An `I4`-returning helper whose non-error result (`0`/`1`) is itself
    /// the value the caller wants (truthiness, exception matching,
    /// containment) — the value stays on the stack after the check.
    fn call_i4_checked_keep(&mut self, b: &mut IlBuilder, helper: Helper, arg_count: u32) {
        let token = self.helpers.token(helper);
        b.call(token, arg_count, IlType::I4);
        b.dup(IlType::I4);
        b.const_i4(-1);
        b.ceq(IlType::I4);
        let cont = b.define_label();
        b.branch(BranchKind::IfFalse, cont);
        b.pop_value(IlType::I4); // the duplicated -1 sentinel, not an owned reference
        self.unwind_above(b, arg_count);
        let err = self.current_error_label();
        b.branch(BranchKind::Always, err);
        b.mark_label(cont);
    }

    fn call_void(&mut self, b: &mut IlBuilder, helper: Helper, arg_count: u32) {
        let token = self.helpers.token(helper);
        b.call(token, arg_count, IlType::Void);
    }

    /// Emit a branch and make sure `target`'s shadow-stack shape is
    /// recorded the first time any edge reaches it — using a throwaway
    /// clone, since this call site's own stack must keep representing the
    /// code that follows inline, not the jump's destination.
    fn emit_branch(&mut self, b: &mut IlBuilder, kind: BranchKind, target: usize) {
        let mut edge = self.stack.clone();
        self.snapshots.snapshot_or_restore(target, &mut edge);
        let label = self.label_for(b, target);
        b.branch(kind, label);
    }

    // ---- prologue / walk / epilogue ----

    fn prologue(&mut self, b: &mut IlBuilder) {
        for _ in 0..self.ai.code.local_count {
            self.locals.push(b.define_local(IlType::Object, false));
        }
        let cell_count = self.ai.code.cellvars.len() + self.ai.code.freevars.len();
        for _ in 0..cell_count {
            self.cell_locals.push(b.define_local(IlType::Object, false));
        }
        self.return_local = Some(b.define_local(IlType::Object, false));
        self.return_label = Some(b.define_label());

        self.call_void(b, Helper::PushFrame, 0);
        self.call_void(b, Helper::LastiInit, 0);

        let root_target = b.define_label();
        let vars = self.fresh_exception_vars(b);
        self.ehmgr.set_root_handler(root_target, vars);
    }

    fn walk(&mut self, b: &mut IlBuilder) -> Result<(), CodegenError> {
        self.jump_targets = compute_jump_targets(&self.ai.instrs);
        let instrs = self.ai.instrs.clone();

        for instr in &instrs {
            let offset = instr.offset;
            if !self.ai.start_states.contains_key(&offset) {
                continue;
            }
            if self.jump_targets.contains(&offset) || self.ehmgr.is_handler_at_offset(offset) {
                let label = self.label_for(b, offset);
                b.mark_label(label);
                self.snapshots.snapshot_or_restore(offset, &mut self.stack);
            }
            self.lower(b, instr)?;
        }
        Ok(())
    }

    fn epilogue(&mut self, b: &mut IlBuilder) {
        let handlers: Vec<_> = self.ehmgr.handlers_in_creation_order().map(|(i, h)| (i, h.clone())).collect();

        for (_, handler) in &handlers {
            b.mark_label(handler.error_target);
            b.load_addr(handler.vars.prev_exc);
            b.load_addr(handler.vars.prev_exc_val);
            b.load_addr(handler.vars.prev_traceback);
            self.call_void(b, Helper::PrepareException, 3);
            if handler.is_try_finally {
                b.load(handler.vars.prev_exc);
                b.store(handler.vars.finally_exc);
                b.load(handler.vars.prev_exc_val);
                b.store(handler.vars.finally_value);
                b.load(handler.vars.prev_traceback);
                b.store(handler.vars.finally_traceback);
            }
            match handler.back_handler {
                Some(parent) => {
                    let parent_target = handlers[parent].1.error_target;
                    b.branch(BranchKind::Always, parent_target);
                }
                None => {
                    self.call_void(b, Helper::PopFrame, 0);
                    b.const_null();
                    b.ret(IlType::Object);
                }
            }
        }

        b.mark_label(self.return_label());
        b.load(self.return_local());
        self.call_void(b, Helper::PopFrame, 0);
        b.ret(IlType::Object);
    }

    // ---- per-opcode lowering ----

    fn lower(&mut self, b: &mut IlBuilder, instr: &DecodedInstr) -> Result<(), CodegenError> {
        use Opcode::*;

        let offset = instr.offset;
        let arg = instr.arg;

        match instr.opcode {
            Nop | SetupAnnotations => {}

            PopTop => {
                b.pop_value(IlType::Object);
                self.stack.pop();
            }
            RotTwo => b.rot_two(IlType::Object),
            RotThree => b.rot_three(IlType::Object),
            DupTop => {
                b.dup(IlType::Object);
                self.stack.push(ShadowKind::Object);
            }

            LoadConst => {
                b.const_ptr(arg as u64);
                b.dup(IlType::Object);
                self.call_void(b, Helper::Incref, 1);
                self.stack.push(ShadowKind::Object);
            }

            LoadFast => self.load_fast(b, offset, arg as usize),
            StoreFast => {
                let local = self.locals[arg as usize];
                let incoming = b.define_local(IlType::Object, true);
                b.store(incoming);
                self.stack.pop();
                b.load(local);
                self.call_void(b, Helper::Decref, 1);
                b.load(incoming);
                b.store(local);
                b.free_local(incoming);
            }
            DeleteFast => {
                let local = self.locals[arg as usize];
                b.const_null();
                b.store(local);
            }

            LoadDeref | LoadClassderef => {
                let helper_is_classderef = matches!(instr.opcode, LoadClassderef);
                if helper_is_classderef {
                    b.const_i4(arg as i32);
                    self.call_checked_object(b, Helper::LoadClassderef, 1);
                } else {
                    let cell = self.cell_locals[arg as usize];
                    b.load(cell);
                }
                self.stack.push(ShadowKind::Object);
            }
            StoreDeref => {
                let cell = self.cell_locals[arg as usize];
                b.store(cell);
                self.stack.pop();
            }

            LoadName => {
                b.const_i4(arg as i32);
                self.call_checked_object(b, Helper::LoadName, 1);
                self.stack.push(ShadowKind::Object);
            }
            LoadGlobal => {
                b.const_i4(arg as i32);
                self.call_checked_object(b, Helper::LoadGlobal, 1);
                self.stack.push(ShadowKind::Object);
            }
            StoreName | StoreGlobal => {
                let helper = if matches!(instr.opcode, StoreName) { Helper::StoreName } else { Helper::StoreGlobal };
                b.const_i4(arg as i32);
                self.call_checked_i4(b, helper, 2);
                self.stack.pop();
            }
            DeleteName | DeleteGlobal => {
                let helper = if matches!(instr.opcode, DeleteName) { Helper::DeleteName } else { Helper::DeleteGlobal };
                b.const_i4(arg as i32);
                self.call_checked_i4(b, helper, 1);
            }

            LoadAttr => {
                b.const_i4(arg as i32);
                self.call_checked_object(b, Helper::LoadAttr, 2);
                self.stack.pop();
                self.stack.push(ShadowKind::Object);
            }
            StoreAttr => {
                b.const_i4(arg as i32);
                self.call_checked_i4(b, Helper::StoreAttr, 3);
                self.stack.pop();
                self.stack.pop();
            }
            DeleteAttr => {
                b.const_i4(arg as i32);
                self.call_checked_i4(b, Helper::DeleteAttr, 2);
                self.stack.pop();
            }

            LoadBuildClass => {
                self.call_checked_object(b, Helper::LoadBuildClass, 0);
                self.stack.push(ShadowKind::Object);
            }
            LoadAssertionError => {
                self.call_checked_object(b, Helper::LoadAssertionError, 0);
                self.stack.push(ShadowKind::Object);
            }

            LoadMethod => self.load_method(b, arg as i32),
            CallMethod => {
                let count = arg + 2;
                self.call_checked_object(b, Helper::MethodCallN, count);
                for _ in 0..count {
                    self.stack.pop();
                }
                self.stack.push(ShadowKind::Object);
            }

            UnaryPositive => self.unary(b, Helper::UnaryPositive),
            UnaryNegative => self.unary(b, Helper::UnaryNegative),
            UnaryInvert => self.unary(b, Helper::UnaryInvert),
            UnaryNot => {
                self.call_checked_i4(b, Helper::UnaryNotInt, 1);
                self.stack.pop();
                self.stack.push(ShadowKind::Object);
            }

            BinaryAdd | BinarySubtract | BinaryMultiply | BinaryTrueDivide | BinaryFloorDivide
            | BinaryModulo | BinaryPower | BinaryMatrixMultiply | BinaryLshift | BinaryRshift
            | BinaryAnd | BinaryOr | BinaryXor | BinarySubscr => self.binary(b, binary_helper(instr.opcode)),
            InplaceAdd | InplaceSubtract | InplaceMultiply | InplaceTrueDivide | InplaceFloorDivide
            | InplaceModulo | InplacePower | InplaceLshift | InplaceRshift | InplaceAnd | InplaceOr
            | InplaceXor => self.binary(b, binary_helper(instr.opcode)),

            StoreSubscr => {
                self.call_checked_i4(b, Helper::StoreSubscr, 3);
                self.stack.pop();
                self.stack.pop();
                self.stack.pop();
            }
            DeleteSubscr => {
                self.call_checked_i4(b, Helper::DeleteSubscr, 2);
                self.stack.pop();
                self.stack.pop();
            }

            CompareOp => {
                b.const_i4(arg as i32);
                self.call_checked_object(b, Helper::RichCompare, 3);
                self.stack.pop();
                self.stack.pop();
                self.stack.push(ShadowKind::Object);
            }
            IsOp => {
                b.ceq(IlType::Object);
                if arg != 0 {
                    b.unary_arith(UnaryArithOp::Not, IlType::I4);
                }
                self.stack.pop();
                self.stack.pop();
                self.stack.push(ShadowKind::Object);
            }
            ContainsOp => {
                self.call_i4_checked_keep(b, Helper::Contains, 2);
                self.stack.pop();
                self.stack.pop();
                self.stack.push(ShadowKind::Object);
            }

            BuildTuple => self.build_sequence(b, arg as usize, Helper::TupleNew, Helper::TupleStore),
            BuildList => self.build_sequence(b, arg as usize, Helper::ListNew, Helper::ListStore),
            BuildSet => self.build_sequence(b, arg as usize, Helper::SetNew, Helper::SetAdd),
            BuildMap => self.build_map(b, arg as usize),
            BuildString => {
                let count = arg;
                self.call_checked_object(b, Helper::BuildString, count);
                for _ in 0..count {
                    self.stack.pop();
                }
                self.stack.push(ShadowKind::Object);
            }
            BuildSlice => {
                let count = arg;
                self.call_checked_object(b, Helper::BuildSlice, count);
                for _ in 0..count {
                    self.stack.pop();
                }
                self.stack.push(ShadowKind::Object);
            }
            ListToTuple => {
                self.call_checked_object(b, Helper::ListToTuple, 1);
                self.stack.pop();
                self.stack.push(ShadowKind::Object);
            }
            ListExtend => self.consume_into_container(b, Helper::ListExtend),
            SetUpdate => self.consume_into_container(b, Helper::SetUpdate),
            DictUpdate => self.consume_into_container(b, Helper::DictUpdate),
            DictMerge => self.consume_into_container(b, Helper::DictMerge),

            UnpackSequence => self.unpack_sequence(b, arg as usize),
            UnpackEx => self.unpack_ex(b, arg),

            FormatValue => self.format_value(b, arg),

            ReturnValue => {
                let ret = self.return_local();
                b.store(ret);
                self.stack.pop();
                let label = self.return_label();
                b.branch(BranchKind::Always, label);
            }
            RaiseVarargs => {
                let count = arg;
                let token = self.helpers.token(Helper::RaiseVarargs);
                b.call(token, count, IlType::I4);
                b.pop_value(IlType::I4);
                for _ in 0..count {
                    self.stack.pop();
                }
                let err = self.current_error_label();
                self.unwind_exact(b);
                b.branch(BranchKind::Always, err);
            }
            Reraise => {
                let handler = self.current_handler().clone();
                if handler.is_try_finally {
                    b.load(handler.vars.finally_exc);
                    b.load(handler.vars.finally_value);
                    b.load(handler.vars.finally_traceback);
                    self.call_void(b, Helper::PyerrRestore, 3);
                }
                let token = self.helpers.token(Helper::Reraise);
                b.call(token, 1, IlType::I4);
                b.pop_value(IlType::I4);
                self.stack.pop();
                let err = self.current_error_label();
                self.unwind_exact(b);
                b.branch(BranchKind::Always, err);
            }

            JumpForward => {
                let target = offset + instr.size + arg as usize;
                self.emit_branch(b, BranchKind::Always, target);
            }
            JumpAbsolute => {
                let target = arg as usize;
                if target <= offset {
                    self.call_checked_i4(b, Helper::PeriodicWork, 0);
                }
                self.emit_branch(b, BranchKind::Always, target);
            }
            PopJumpIfFalse | PopJumpIfTrue => {
                self.stack.pop();
                self.call_i4_checked_keep(b, Helper::IsTrue, 1);
                let target = arg as usize;
                if target <= offset {
                    self.call_checked_i4(b, Helper::PeriodicWork, 0);
                }
                let kind = if matches!(instr.opcode, PopJumpIfFalse) { BranchKind::IfFalse } else { BranchKind::IfTrue };
                self.emit_branch(b, kind, target);
            }
            JumpIfFalseOrPop | JumpIfTrueOrPop => {
                b.dup(IlType::Object);
                self.stack.push(ShadowKind::Object);
                self.call_i4_checked_keep(b, Helper::IsTrue, 1);
                self.stack.pop();
                let target = arg as usize;
                if target <= offset {
                    self.call_checked_i4(b, Helper::PeriodicWork, 0);
                }
                let kind = if matches!(instr.opcode, JumpIfFalseOrPop) { BranchKind::IfFalse } else { BranchKind::IfTrue };
                self.emit_branch(b, kind, target);
                b.pop_value(IlType::Object);
                self.stack.pop();
            }
            JumpIfNotExcMatch => {
                self.stack.pop();
                self.stack.pop();
                self.call_i4_checked_keep(b, Helper::CompareExceptions, 2);
                self.emit_branch(b, BranchKind::IfFalse, arg as usize);
                b.pop_value(IlType::I4);
            }
            ForIter => self.for_iter(b, arg as usize),
            GetIter => {
                self.call_checked_object(b, Helper::GetIter, 1);
                self.stack.pop();
                self.stack.push(ShadowKind::Object);
            }

            SetupFinally => self.setup_finally(b, arg as usize),
            PopBlock => {
                self.blocks.pop();
            }
            PopExcept => {
                self.blocks.pop();
                b.pop_value(IlType::Object);
                self.stack.pop();
            }

            CallFunction => self.call_function(b, arg),
            CallFunctionKw => {
                let count = arg + 2;
                self.call_checked_object(b, Helper::CallKwWithTuple, count);
                for _ in 0..count {
                    self.stack.pop();
                }
                self.stack.push(ShadowKind::Object);
            }
            CallFunctionEx => {
                let has_kwargs = arg & 0x01 != 0;
                let (helper, count) = if has_kwargs { (Helper::CallKwargs, 3) } else { (Helper::CallArgs, 2) };
                self.call_checked_object(b, helper, count);
                for _ in 0..count {
                    self.stack.pop();
                }
                self.stack.push(ShadowKind::Object);
            }
            MakeFunction => self.make_function(b, arg),
            PrintExpr => {
                self.call_checked_i4(b, Helper::PrintExpr, 1);
                self.stack.pop();
            }

            ImportName => {
                b.const_i4(arg as i32);
                self.call_checked_object(b, Helper::ImportName, 3);
                self.stack.pop();
                self.stack.pop();
                self.stack.push(ShadowKind::Object);
            }
            ImportFrom => {
                b.dup(IlType::Object);
                b.const_i4(arg as i32);
                self.call_checked_object(b, Helper::ImportFrom, 2);
                self.stack.push(ShadowKind::Object);
            }
            ImportStar => {
                self.call_checked_i4(b, Helper::ImportStar, 1);
                self.stack.pop();
            }

            ExtendedArg | WithExceptStart => {
                return Err(CodegenError::Unlowerable { opcode: instr.opcode, offset });
            }
            op if op.is_unsupported_construct() => {
                return Err(CodegenError::Unlowerable { opcode: op, offset });
            }
        }
        Ok(())
    }

    fn load_fast(&mut self, b: &mut IlBuilder, offset: usize, idx: usize) {
        let local = self.locals[idx];
        let maybe_undefined = self.ai.local_info(offset, idx).map_or(false, |info| info.maybe_undefined);
        b.load(local);
        if maybe_undefined {
            b.dup(IlType::Object);
            b.const_null();
            b.ceq(IlType::Object);
            let bound = b.define_label();
            b.branch(BranchKind::IfFalse, bound);
            b.pop_value(IlType::Object); // the dup'd null, nothing to decref
            self.call_void(b, Helper::UnboundLocal, 0);
            self.unwind_exact(b);
            let err = self.current_error_label();
            b.branch(BranchKind::Always, err);
            b.mark_label(bound);
        }
        b.dup(IlType::Object);
        self.call_void(b, Helper::Incref, 1);
        self.stack.push(ShadowKind::Object);
    }

    fn load_method(&mut self, b: &mut IlBuilder, name_idx: i32) {
        b.const_i4(name_idx);
        self.call_checked_object(b, Helper::LoadAttr, 2);
        self.stack.pop();
        b.const_null();
        self.stack.push(ShadowKind::Object);
        self.stack.push(ShadowKind::Object);
    }

    fn unary(&mut self, b: &mut IlBuilder, helper: Helper) {
        self.call_checked_object(b, helper, 1);
        self.stack.pop();
        self.stack.push(ShadowKind::Object);
    }

    fn binary(&mut self, b: &mut IlBuilder, helper: Helper) {
        self.call_checked_object(b, helper, 2);
        self.stack.pop();
        self.stack.pop();
        self.stack.push(ShadowKind::Object);
    }

    /// Spill the `count` operands already on the stack to fresh locals,
    /// build a fresh container of the right size, then re-load and store
    /// each element into it — the IL has no random-access stack read, only
    /// shallow rotations, so this is the only way to reorder "N values in,
    /// 1 container out".
    fn build_sequence(&mut self, b: &mut IlBuilder, count: usize, new_helper: Helper, store_helper: Helper) {
        let temps: Vec<LocalId> = (0..count).map(|_| b.define_local(IlType::Object, true)).collect();
        for i in (0..count).rev() {
            b.store(temps[i]);
            self.stack.pop();
        }
        b.const_i4(count as i32);
        self.call_checked_object(b, new_helper, 1);
        self.stack.push(ShadowKind::Object);
        for (i, &tmp) in temps.iter().enumerate() {
            b.dup(IlType::Object);
            b.const_i4(i as i32);
            b.load(tmp);
            self.call_checked_i4(b, store_helper, 3);
        }
        for tmp in temps {
            b.free_local(tmp);
        }
    }

    fn build_map(&mut self, b: &mut IlBuilder, pairs: usize) {
        let key_temps: Vec<LocalId> = (0..pairs).map(|_| b.define_local(IlType::Object, true)).collect();
        let val_temps: Vec<LocalId> = (0..pairs).map(|_| b.define_local(IlType::Object, true)).collect();
        for i in (0..pairs).rev() {
            b.store(val_temps[i]);
            self.stack.pop();
            b.store(key_temps[i]);
            self.stack.pop();
        }
        b.const_i4(pairs as i32);
        self.call_checked_object(b, Helper::DictNewPresized, 1);
        self.stack.push(ShadowKind::Object);
        for i in 0..pairs {
            b.dup(IlType::Object);
            b.load(key_temps[i]);
            b.load(val_temps[i]);
            self.call_checked_i4(b, Helper::DictStore, 3);
        }
        for tmp in key_temps.into_iter().chain(val_temps) {
            b.free_local(tmp);
        }
    }

    /// `LIST_APPEND`/`LIST_EXTEND`/`SET_UPDATE`/`DICT_UPDATE`/`DICT_MERGE`:
    /// consume only the top operand, leaving the container beneath it on
    /// the stack untouched.
    fn consume_into_container(&mut self, b: &mut IlBuilder, store_helper: Helper) {
        let tmp = b.define_local(IlType::Object, true);
        b.store(tmp);
        self.stack.pop();
        b.dup(IlType::Object);
        b.load(tmp);
        self.call_checked_i4(b, store_helper, 2);
        b.free_local(tmp);
    }

    fn unpack_sequence(&mut self, b: &mut IlBuilder, count: usize) {
        let seq = b.define_local(IlType::Object, true);
        b.store(seq);
        self.stack.pop();
        for i in (0..count).rev() {
            b.load(seq);
            b.const_i4(i as i32);
            self.call_checked_object(b, Helper::UnpackSequence, 2);
            self.stack.push(ShadowKind::Object);
        }
        b.free_local(seq);
    }

    fn unpack_ex(&mut self, b: &mut IlBuilder, arg: u32) {
        let before = (arg & 0xFF) as usize;
        let after = ((arg >> 8) & 0xFF) as usize;
        let seq = b.define_local(IlType::Object, true);
        b.store(seq);
        self.stack.pop();

        for i in (0..after).rev() {
            b.load(seq);
            b.const_i4((before + i) as i32);
            self.call_checked_object(b, Helper::UnpackSequence, 2);
            self.stack.push(ShadowKind::Object);
        }
        b.load(seq);
        b.const_i4(before as i32);
        b.const_i4(after as i32);
        self.call_checked_object(b, Helper::UnpackExRest, 3);
        self.stack.push(ShadowKind::Object);
        for i in (0..before).rev() {
            b.load(seq);
            b.const_i4(i as i32);
            self.call_checked_object(b, Helper::UnpackSequence, 2);
            self.stack.push(ShadowKind::Object);
        }
        b.free_local(seq);
    }

    fn format_value(&mut self, b: &mut IlBuilder, flags: u32) {
        let has_spec = flags & 0x04 != 0;
        if has_spec {
            self.stack.pop();
        } else {
            b.const_null();
        }
        self.stack.pop();
        b.const_i4((flags & 0x03) as i32);
        self.call_checked_object(b, Helper::FormatValue, 3);
        self.stack.push(ShadowKind::Object);
    }

    /// `FOR_ITER`'s two arms leave the shadow stack at different depths —
    /// iterator kept plus a new value on the loop-body edge, iterator
    /// dropped entirely on the loop-exit edge — so the "stop" arm is
    /// emitted out of line and never touches `self.stack`, which keeps
    /// tracking the body edge straight through.
    fn for_iter(&mut self, b: &mut IlBuilder, after_target: usize) {
        b.dup(IlType::Object);
        self.call_checked_object(b, Helper::IterNext, 1);
        b.dup(IlType::Object);
        b.const_null();
        b.ceq(IlType::Object);
        let stop = b.define_label();
        b.branch(BranchKind::IfTrue, stop);

        self.stack.push(ShadowKind::Object);
        let resume = b.define_label();
        b.branch(BranchKind::Always, resume);

        b.mark_label(stop);
        b.pop_value(IlType::Object);
        b.pop_value(IlType::Object);
        let mut after_stack = self.stack.clone();
        after_stack.pop(); // the loop result the continue arm pushed
        after_stack.pop(); // the iterator itself
        self.snapshots.snapshot_or_restore(after_target, &mut after_stack);
        let after_label = self.label_for(b, after_target);
        b.branch(BranchKind::Always, after_label);

        b.mark_label(resume);
    }

    fn setup_finally(&mut self, b: &mut IlBuilder, handler_offset: usize) {
        let error_target = b.define_label();
        let vars = self.fresh_exception_vars(b);
        let parent = self.blocks.top().unwrap_or(0);
        let depth = self.stack.depth();
        let idx = self.ehmgr.add_setup_finally(error_target, depth, parent, vars, handler_offset, true);
        self.blocks.push(idx);

        let mut handler_stack = self.stack.clone();
        handler_stack.push(ShadowKind::Object);
        self.snapshots.snapshot_or_restore(handler_offset, &mut handler_stack);
        let _ = self.label_for(b, handler_offset);
    }

    fn call_function(&mut self, b: &mut IlBuilder, nargs: u32) {
        let (helper, count) = match nargs {
            0 => (Helper::Call0, 1),
            1 => (Helper::Call1, 2),
            2 => (Helper::Call2, 3),
            3 => (Helper::Call3, 4),
            4 => (Helper::Call4, 5),
            n => (Helper::CallNWithTuple, n + 1),
        };
        self.call_checked_object(b, helper, count);
        for _ in 0..count {
            self.stack.pop();
        }
        self.stack.push(ShadowKind::Object);
    }

    /// `qualname` and the code object are always present; defaults,
    /// keyword-only defaults, annotations, and a closure tuple are each
    /// conditionally present per `flags`' low four bits. Rather than the
    /// multi-call `NewFunction` + `SetClosure`/`SetDefaults`/... dance, a
    /// single dynamically-sized call does the whole thing — `HelperTable`'s
    /// `arg_count` is advisory only, so nothing stops a call site from
    /// passing its own count.
    fn make_function(&mut self, b: &mut IlBuilder, flags: u32) {
        let mut extra = 0u32;
        for bit in [0x01u32, 0x02, 0x04, 0x08] {
            if flags & bit != 0 {
                extra += 1;
            }
        }
        let count = 2 + extra;
        self.call_checked_object(b, Helper::NewFunction, count);
        for _ in 0..count {
            self.stack.pop();
        }
        self.stack.push(ShadowKind::Object);
    }
}

/// Map a `BINARY_*`/`INPLACE_*` opcode to its helper. Named differently
/// (`Subtract` vs `Sub`, `Multiply` vs `Mul`, ...) since the opcode set
/// mirrors the host VM's naming while the helper table uses operator names.
fn binary_helper(opcode: Opcode) -> Helper {
    use Opcode::*;
    match opcode {
        BinaryAdd => Helper::BinaryAdd,
        BinarySubtract => Helper::BinarySub,
        BinaryMultiply => Helper::BinaryMul,
        BinaryTrueDivide => Helper::BinaryTrueDiv,
        BinaryFloorDivide => Helper::BinaryFloorDiv,
        BinaryModulo => Helper::BinaryMod,
        BinaryPower => Helper::BinaryPow,
        BinaryMatrixMultiply => Helper::BinaryMatMul,
        BinarySubscr => Helper::BinarySubscr,
        BinaryLshift => Helper::BinaryLShift,
        BinaryRshift => Helper::BinaryRShift,
        BinaryAnd => Helper::BinaryAnd,
        BinaryOr => Helper::BinaryOr,
        BinaryXor => Helper::BinaryXor,
        InplaceAdd => Helper::InplaceAdd,
        InplaceSubtract => Helper::InplaceSub,
        InplaceMultiply => Helper::InplaceMul,
        InplaceTrueDivide => Helper::InplaceTrueDiv,
        InplaceFloorDivide => Helper::InplaceFloorDiv,
        InplaceModulo => Helper::InplaceMod,
        InplacePower => Helper::InplacePow,
        InplaceLshift => Helper::InplaceLShift,
        InplaceRshift => Helper::InplaceRShift,
        InplaceAnd => Helper::InplaceAnd,
        InplaceOr => Helper::InplaceOr,
        InplaceXor => Helper::InplaceXor,
        other => unreachable!("{other:?} is not a binary/inplace opcode"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Code, Constant};
    use std::rc::Rc;

    fn compile(code: Code) -> Result<IlMethod, CodegenError> {
        let mut ai = AbstractInterpreter::new(Rc::new(code), None).unwrap();
        assert!(ai.interpret(), "abstract interpretation must succeed for this fixture");
        generate(&ai)
    }

    fn simple_return_none() -> Code {
        let mut code = Code::new("f", vec![], 0);
        code.code = vec![Opcode::LoadConst as u8, 0, Opcode::ReturnValue as u8, 0];
        code.consts.push(Constant::None);
        code
    }

    #[test]
    fn generate_rejects_an_uninterpreted_function() {
        let code = Rc::new(simple_return_none());
        let ai = AbstractInterpreter::new(code, None).unwrap();
        assert_eq!(generate(&ai), Err(CodegenError::NotInterpreted));
    }

    #[test]
    fn a_function_returning_a_constant_compiles_to_nonempty_il() {
        let method = compile(simple_return_none()).unwrap();
        assert!(!method.instrs.is_empty());
        assert_eq!(method.param_types, vec![IlType::Object]);
    }

    #[test]
    fn arithmetic_lowers_to_a_checked_binary_helper_call() {
        let mut code = Code::new("add", vec![], 2);
        code.code = vec![
            Opcode::LoadFast as u8, 0,
            Opcode::LoadFast as u8, 1,
            Opcode::BinaryAdd as u8, 0,
            Opcode::ReturnValue as u8, 0,
        ];
        code.arg_count = 2;
        let method = compile(code).unwrap();
        let has_add_call = method.instrs.iter().any(|i| {
            matches!(i, crate::ir::IlInstr::Call { token, .. } if *token == HelperTable::global().token(Helper::BinaryAdd))
        });
        assert!(has_add_call);
    }

    #[test]
    fn a_loop_compiles_without_panicking_on_diverging_stack_shapes() {
        // for x in y: pass ; return None
        let mut code = Code::new("loop", vec![], 2);
        code.code = vec![
            Opcode::LoadFast as u8, 0,       // offset 0: y
            Opcode::GetIter as u8, 0,        // offset 2
            Opcode::ForIter as u8, 10,       // offset 4, -> offset 10 (after the loop)
            Opcode::StoreFast as u8, 1,      // offset 6: x
            Opcode::JumpAbsolute as u8, 4,   // offset 8, -> offset 4 (ForIter)
            Opcode::LoadConst as u8, 0,      // offset 10
            Opcode::ReturnValue as u8, 0,    // offset 12
        ];
        code.arg_count = 1;
        code.local_count = 2;
        code.consts.push(Constant::None);
        let method = compile(code).unwrap();
        assert!(!method.instrs.is_empty());
    }

    #[test]
    fn load_const_increfs_after_pushing_the_literal() {
        let method = compile(simple_return_none()).unwrap();
        let positions: Vec<_> = method
            .instrs
            .iter()
            .enumerate()
            .filter_map(|(i, instr)| match instr {
                crate::ir::IlInstr::ConstPtr(_) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(positions.len(), 1);
        let after = &method.instrs[positions[0] + 1..positions[0] + 3];
        assert!(matches!(after[0], crate::ir::IlInstr::Dup(IlType::Object)));
        assert!(matches!(
            after[1],
            crate::ir::IlInstr::Call { token, .. } if token == HelperTable::global().token(Helper::Incref)
        ));
    }

    #[test]
    fn store_fast_decrefs_the_previous_slot_occupant() {
        // def f(a): a = a; return None
        let mut code = Code::new("f", vec![], 1);
        code.code = vec![
            Opcode::LoadFast as u8, 0,
            Opcode::StoreFast as u8, 0,
            Opcode::LoadConst as u8, 0,
            Opcode::ReturnValue as u8, 0,
        ];
        code.arg_count = 1;
        code.local_count = 1;
        code.consts.push(Constant::None);
        let method = compile(code).unwrap();
        let calls_decref = method.instrs.iter().any(|i| {
            matches!(i, crate::ir::IlInstr::Call { token, .. } if *token == HelperTable::global().token(Helper::Decref))
        });
        assert!(calls_decref, "StoreFast must decref the slot's old occupant");
    }

    #[test]
    fn a_raise_inside_a_handler_region_unwinds_the_live_object_beneath_it() {
        // try: <push a live object>; raise Exception() except: return 42
        let mut code = Code::new("f", vec![], 0);
        code.code = vec![
            Opcode::SetupFinally as u8, 10, // offset 0, handler at offset 10
            Opcode::LoadConst as u8, 0,     // offset 2: a live object the handler must unwind
            Opcode::RaiseVarargs as u8, 0,  // offset 4
            Opcode::PopBlock as u8, 0,      // offset 6 (unreachable, mirrors the emitter's shape)
            Opcode::JumpForward as u8, 6,   // offset 8, unreachable (target past the end)
            Opcode::PopExcept as u8, 0,     // offset 10 (handler target)
            Opcode::LoadConst as u8, 0,     // offset 12
            Opcode::ReturnValue as u8, 0,   // offset 14
        ];
        code.consts = vec![Constant::Int(42)];
        let method = compile(code).unwrap();
        let decref_calls = method.instrs.iter().filter(|i| {
            matches!(i, crate::ir::IlInstr::Call { token, .. } if *token == HelperTable::global().token(Helper::Decref))
        }).count();
        assert!(decref_calls >= 1, "the live offset-2 object must be decref'd on the RaiseVarargs error path");
    }

    #[test]
    fn a_backward_pop_jump_if_true_emits_periodic_work() {
        // do { } while (x): a conditional jump that is itself the loop's
        // back-edge, rather than routing through a separate JUMP_ABSOLUTE.
        let mut code = Code::new("f", vec![], 1);
        code.code = vec![
            Opcode::LoadFast as u8, 0,       // offset 0 (loop top)
            Opcode::PopJumpIfTrue as u8, 0,  // offset 2, -> offset 0
            Opcode::LoadConst as u8, 0,      // offset 4
            Opcode::ReturnValue as u8, 0,    // offset 6
        ];
        code.arg_count = 1;
        code.local_count = 1;
        code.consts.push(Constant::None);
        let method = compile(code).unwrap();
        let calls_periodic_work = method.instrs.iter().any(|i| {
            matches!(i, crate::ir::IlInstr::Call { token, .. } if *token == HelperTable::global().token(Helper::PeriodicWork))
        });
        assert!(calls_periodic_work, "a backward POP_JUMP_IF_TRUE must call PeriodicWork before branching");
    }

    #[test]
    fn reraise_inside_a_handler_restores_the_saved_exception_triple_first() {
        // try: raise Exception() finally: pass — the handler body is just
        // RERAISE, with no POP_EXCEPT, so it must restore from the saved
        // triple rather than re-raising whatever rt_prepare_exception left.
        let mut code = Code::new("f", vec![], 0);
        code.code = vec![
            Opcode::SetupFinally as u8, 8, // offset 0, handler at offset 8
            Opcode::RaiseVarargs as u8, 0, // offset 2
            Opcode::PopBlock as u8, 0,     // offset 4 (unreachable)
            Opcode::JumpForward as u8, 2,  // offset 6, unreachable (target past the end)
            Opcode::Reraise as u8, 0,      // offset 8 (handler target)
        ];
        let method = compile(code).unwrap();
        let restore_calls = method.instrs.iter().filter(|i| {
            matches!(i, crate::ir::IlInstr::Call { token, arg_count, .. }
                if *token == HelperTable::global().token(Helper::PyerrRestore) && *arg_count == 3)
        }).count();
        assert_eq!(restore_calls, 1, "RERAISE in a try/finally handler must restore the saved triple with a 3-arg call");

        let load_addr_calls = method.instrs.iter().filter(|i| matches!(i, crate::ir::IlInstr::LoadLocalAddr(_))).count();
        assert_eq!(load_addr_calls, 6, "the epilogue must fetch the exception triple by address once per handler (root + the try/finally region)");
    }

    #[test]
    fn try_except_opens_and_closes_a_handler_region() {
        // try: x = y
        // except: x = None
        let mut code = Code::new("tryexcept", vec![], 2);
        code.code = vec![
            Opcode::SetupFinally as u8, 10,  // offset 0, handler at offset 10
            Opcode::LoadFast as u8, 0,       // offset 2
            Opcode::StoreFast as u8, 1,      // offset 4
            Opcode::PopBlock as u8, 0,       // offset 6
            Opcode::JumpForward as u8, 6,    // offset 8, -> offset 16 (8 + size 2 + arg 6)
            Opcode::PopExcept as u8, 0,      // offset 10 (handler target)
            Opcode::LoadConst as u8, 0,      // offset 12
            Opcode::StoreFast as u8, 1,      // offset 14
            Opcode::LoadConst as u8, 0,      // offset 16
            Opcode::ReturnValue as u8, 0,    // offset 18
        ];
        code.arg_count = 1;
        code.local_count = 2;
        code.consts.push(Constant::None);
        let method = compile(code).unwrap();
        assert!(method.instrs.iter().any(|i| matches!(i, crate::ir::IlInstr::MarkLabel(_))));
    }
}
