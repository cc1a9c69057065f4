//! IL construction.
//!
//! `IlMethod` is the growing instruction stream for one compiled function;
//! `IlBuilder` is the emission API the code generator drives it through —
//! the stack-based analogue of a register-SSA builder over a function.

use rustc_hash::FxHashMap;

use super::instr::{ArithOp, BranchKind, CompareKind, HelperToken, IlInstr, LabelId, LocalId, UnaryArithOp};
use super::types::IlType;

/// A label's position, once known. `None` until `mark_label` fixes it.
#[derive(Debug, Clone, Copy)]
struct LabelState {
    resolved_at: Option<usize>,
}

/// One compiled method's IL: its signature, its locals, and its
/// instruction stream, ready to hand to a backend.
#[derive(Debug, Clone)]
pub struct IlMethod {
    pub name: String,
    pub param_types: Vec<IlType>,
    pub local_types: Vec<IlType>,
    pub instrs: Vec<IlInstr>,
    pub max_stack_depth: usize,
}

impl IlMethod {
    pub fn new(name: impl Into<String>, param_types: Vec<IlType>) -> IlMethod {
        IlMethod {
            name: name.into(),
            param_types,
            local_types: Vec::new(),
            instrs: Vec::new(),
            max_stack_depth: 0,
        }
    }
}

/// Builds one `IlMethod`'s instruction stream. Tracks the per-type local
/// free-list, pending forward branches, and a running stack-depth counter
/// used to fill in `IlMethod::max_stack_depth`.
pub struct IlBuilder<'a> {
    method: &'a mut IlMethod,
    free_locals: FxHashMap<IlType, Vec<LocalId>>,
    labels: Vec<LabelState>,
    /// Forward branches awaiting their label's position: (instr index, label).
    pending: Vec<(usize, LabelId)>,
    current_depth: usize,
    /// Threshold, in instruction count, under which a branch keeps its
    /// short-form encoding.
    short_form_limit: usize,
}

impl<'a> IlBuilder<'a> {
    pub fn new(method: &'a mut IlMethod) -> IlBuilder<'a> {
        IlBuilder {
            method,
            free_locals: FxHashMap::default(),
            labels: Vec::new(),
            pending: Vec::new(),
            current_depth: 0,
            short_form_limit: 128,
        }
    }

    fn emit(&mut self, instr: IlInstr) {
        self.method.instrs.push(instr);
    }

    fn push(&mut self, n: usize) {
        self.current_depth += n;
        self.method.max_stack_depth = self.method.max_stack_depth.max(self.current_depth);
    }

    fn pop(&mut self, n: usize) {
        self.current_depth = self.current_depth.saturating_sub(n);
    }

    pub fn method(&self) -> &IlMethod {
        self.method
    }

    pub fn method_mut(&mut self) -> &mut IlMethod {
        self.method
    }

    // ---- constants ----

    pub fn const_i4(&mut self, value: i32) {
        self.emit(IlInstr::ConstI4(value));
        self.push(1);
    }

    pub fn const_i8(&mut self, value: i64) {
        self.emit(IlInstr::ConstI8(value));
        self.push(1);
    }

    pub fn const_native_int(&mut self, value: i64) {
        self.emit(IlInstr::ConstNativeInt(value));
        self.push(1);
    }

    pub fn const_r8(&mut self, value: f64) {
        self.emit(IlInstr::ConstR8(value));
        self.push(1);
    }

    pub fn const_ptr(&mut self, value: u64) {
        self.emit(IlInstr::ConstPtr(value));
        self.push(1);
    }

    pub fn const_null(&mut self) {
        self.emit(IlInstr::ConstNull);
        self.push(1);
    }

    // ---- stack manipulation ----

    pub fn dup(&mut self, ty: IlType) {
        self.emit(IlInstr::Dup(ty));
        self.push(1);
    }

    pub fn pop_value(&mut self, ty: IlType) {
        self.emit(IlInstr::Pop(ty));
        self.pop(1);
    }

    pub fn rot_two(&mut self, ty: IlType) {
        self.emit(IlInstr::RotTwo(ty));
    }

    pub fn rot_three(&mut self, ty: IlType) {
        self.emit(IlInstr::RotThree(ty));
    }

    pub fn rot_four(&mut self, ty: IlType) {
        self.emit(IlInstr::RotFour(ty));
    }

    // ---- locals ----

    /// Allocate a local of `ty`. If `cache` is true and a same-typed local
    /// was previously released via `free_local`, that slot is reused
    /// instead of growing `local_types`.
    pub fn define_local(&mut self, ty: IlType, cache: bool) -> LocalId {
        if cache {
            if let Some(reused) = self.free_locals.get_mut(&ty).and_then(Vec::pop) {
                return reused;
            }
        }
        let id = LocalId(self.method.local_types.len() as u32);
        self.method.local_types.push(ty);
        id
    }

    /// Release `id` back to its type's free list for a later `define_local`.
    pub fn free_local(&mut self, id: LocalId) {
        let ty = self.method.local_types[id.0 as usize];
        self.free_locals.entry(ty).or_default().push(id);
    }

    pub fn load(&mut self, id: LocalId) {
        self.emit(IlInstr::LoadLocal(id));
        self.push(1);
    }

    pub fn store(&mut self, id: LocalId) {
        self.emit(IlInstr::StoreLocal(id));
        self.pop(1);
    }

    pub fn load_addr(&mut self, id: LocalId) {
        self.emit(IlInstr::LoadLocalAddr(id));
        self.push(1);
    }

    // ---- arithmetic / comparison ----

    pub fn arith(&mut self, op: ArithOp, ty: IlType) {
        self.emit(IlInstr::Arith(op, ty));
        self.pop(2);
        self.push(1);
    }

    pub fn unary_arith(&mut self, op: UnaryArithOp, ty: IlType) {
        self.emit(IlInstr::UnaryArith(op, ty));
        self.pop(1);
        self.push(1);
    }

    fn compare_primitive(&mut self, kind: CompareKind, ty: IlType) {
        self.emit(IlInstr::Compare(kind, ty));
        self.pop(2);
        self.push(1);
    }

    pub fn ceq(&mut self, ty: IlType) {
        self.compare_primitive(CompareKind::Ceq, ty);
    }

    pub fn clt(&mut self, ty: IlType) {
        self.compare_primitive(CompareKind::Clt, ty);
    }

    pub fn cgt(&mut self, ty: IlType) {
        self.compare_primitive(CompareKind::Cgt, ty);
    }

    /// `a <= b` as `!(a > b)`.
    pub fn cle(&mut self, ty: IlType) {
        self.cgt(ty);
        self.unary_arith(UnaryArithOp::Not, IlType::I4);
    }

    /// `a >= b` as `!(a < b)`.
    pub fn cge(&mut self, ty: IlType) {
        self.clt(ty);
        self.unary_arith(UnaryArithOp::Not, IlType::I4);
    }

    /// `a != b` as `!(a == b)`.
    pub fn cne(&mut self, ty: IlType) {
        self.ceq(ty);
        self.unary_arith(UnaryArithOp::Not, IlType::I4);
    }

    // ---- calls ----

    pub fn call(&mut self, token: HelperToken, arg_count: u32, returns: IlType) {
        self.emit(IlInstr::Call { token, arg_count, returns });
        self.pop(arg_count as usize);
        if !matches!(returns, IlType::Void) {
            self.push(1);
        }
    }

    // ---- labels / branches ----

    pub fn define_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(LabelState { resolved_at: None });
        id
    }

    /// Fix `label`'s position at the current instruction. Any forward
    /// branch already emitted against this label is revised to a long-form
    /// encoding if the gap exceeds `short_form_limit`.
    pub fn mark_label(&mut self, label: LabelId) {
        let here = self.method.instrs.len();
        self.labels[label.0 as usize].resolved_at = Some(here);
        self.emit(IlInstr::MarkLabel(label));

        self.pending.retain(|&(site, pending_label)| {
            if pending_label != label {
                return true;
            }
            let distance = here.saturating_sub(site);
            if distance > self.short_form_limit {
                if let IlInstr::Branch { short_form, .. } = &mut self.method.instrs[site] {
                    *short_form = false;
                }
            }
            false
        });
    }

    /// Emit a branch. `Always` pops nothing; `IfTrue`/`IfFalse` pop one
    /// boolean-as-`I4` off the stack. Forward references (the label has
    /// not been marked yet) start short-form and may be widened later by
    /// `mark_label`.
    pub fn branch(&mut self, kind: BranchKind, label: LabelId) {
        if !matches!(kind, BranchKind::Always) {
            self.pop(1);
        }
        let site = self.method.instrs.len();
        let already_resolved = self.labels[label.0 as usize].resolved_at.is_some();
        self.emit(IlInstr::Branch { kind, label, short_form: true });
        if !already_resolved {
            self.pending.push((site, label));
        } else if let Some(target) = self.labels[label.0 as usize].resolved_at {
            let distance = site.saturating_sub(target);
            if distance > self.short_form_limit {
                if let IlInstr::Branch { short_form, .. } = &mut self.method.instrs[site] {
                    *short_form = false;
                }
            }
        }
    }

    pub fn ret(&mut self, ty: IlType) {
        self.emit(IlInstr::Return(ty));
        if !matches!(ty, IlType::Void) {
            self.pop(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locals_are_reused_from_the_free_list_when_cached() {
        let mut method = IlMethod::new("f", vec![]);
        let mut b = IlBuilder::new(&mut method);
        let a = b.define_local(IlType::I4, true);
        b.free_local(a);
        let reused = b.define_local(IlType::I4, true);
        assert_eq!(a, reused);
        assert_eq!(method.local_types.len(), 1);
    }

    #[test]
    fn define_local_without_cache_always_allocates() {
        let mut method = IlMethod::new("f", vec![]);
        let mut b = IlBuilder::new(&mut method);
        let a = b.define_local(IlType::I4, true);
        b.free_local(a);
        let fresh = b.define_local(IlType::I4, false);
        assert_ne!(a, fresh);
        assert_eq!(method.local_types.len(), 2);
    }

    #[test]
    fn forward_branch_resolves_short_form_when_target_is_close() {
        let mut method = IlMethod::new("f", vec![]);
        let mut b = IlBuilder::new(&mut method);
        let label = b.define_label();
        b.const_i4(1);
        b.branch(BranchKind::IfTrue, label);
        b.const_i4(2);
        b.pop_value(IlType::I4);
        b.mark_label(label);
        let branch_instr = &method.instrs[1];
        assert!(matches!(branch_instr, IlInstr::Branch { short_form: true, .. }));
    }

    #[test]
    fn forward_branch_widens_when_target_is_far() {
        let mut method = IlMethod::new("f", vec![]);
        let mut b = IlBuilder::new(&mut method);
        b.short_form_limit = 2;
        let label = b.define_label();
        b.const_i4(1);
        b.branch(BranchKind::IfTrue, label);
        for _ in 0..5 {
            b.const_i4(0);
            b.pop_value(IlType::I4);
        }
        b.mark_label(label);
        let branch_instr = &method.instrs[1];
        assert!(matches!(branch_instr, IlInstr::Branch { short_form: false, .. }));
    }

    #[test]
    fn max_stack_depth_tracks_the_high_water_mark() {
        let mut method = IlMethod::new("f", vec![]);
        let mut b = IlBuilder::new(&mut method);
        b.const_i4(1);
        b.const_i4(2);
        b.arith(ArithOp::Add, IlType::I4);
        assert_eq!(method.max_stack_depth, 2);
    }
}
