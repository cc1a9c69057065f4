//! The host runtime helper catalogue.
//!
//! A fixed, numbered table the code generator emits `ir::Call` instructions
//! against. Each entry pairs a stable `HelperToken` with a descriptor the
//! backend uses to resolve an actual native entry point; the core itself
//! only needs the token and the calling-convention shape (arg count, return
//! type) to lower an opcode correctly.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use crate::ir::{HelperToken, IlType};

/// One entry in the helper table: everything the CG and backend need to
/// call it correctly. `native_name` is the symbol the backend resolves
/// against the host's runtime library — this core never dereferences it.
#[derive(Debug, Clone, Copy)]
pub struct HelperDescriptor {
    pub token: HelperToken,
    pub native_name: &'static str,
    pub returns: IlType,
    pub arg_count: u32,
}

/// Every helper the CG may call, grouped by what they operate on.
/// Binary/unary arithmetic route through `value::tables::BinOp`/
/// `UnaryOp` via `Helper::binary`/`Helper::unary` rather than one variant
/// per operator, since the native symbol differs only by operator name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    BinaryAdd,
    BinarySub,
    BinaryMul,
    BinaryTrueDiv,
    BinaryFloorDiv,
    BinaryMod,
    BinaryPow,
    BinaryMatMul,
    BinarySubscr,
    BinaryLShift,
    BinaryRShift,
    BinaryAnd,
    BinaryOr,
    BinaryXor,
    InplaceAdd,
    InplaceSub,
    InplaceMul,
    InplaceTrueDiv,
    InplaceFloorDiv,
    InplaceMod,
    InplacePow,
    InplaceLShift,
    InplaceRShift,
    InplaceAnd,
    InplaceOr,
    InplaceXor,

    UnaryPositive,
    UnaryNegative,
    UnaryNotObject,
    UnaryNotInt,
    UnaryInvert,

    TupleNew,
    ListNew,
    DictNewPresized,
    SetNew,
    ListStore,
    TupleStore,
    ListAppend,
    ListExtend,
    ListToTuple,
    DictStore,
    DictMerge,
    DictUpdate,
    SetAdd,
    SetUpdate,
    BuildSlice,
    BuildMap,
    BuildString,

    LoadName,
    StoreName,
    DeleteName,
    LoadAttr,
    StoreAttr,
    DeleteAttr,
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    LoadMethod,
    LoadBuildClass,
    LoadClassderef,

    Call0,
    Call1,
    Call2,
    Call3,
    Call4,
    CallNWithTuple,
    CallKwWithTuple,
    CallArgs,
    CallKwargs,
    MethodCall,
    MethodCallN,
    FancyCall,

    GetIter,
    IterNext,

    Incref,
    Decref,
    DecrefAndNull,

    RaiseVarargs,
    Reraise,
    PrepareException,
    UnwindEh,
    CompareExceptions,
    PyerrSetstring,
    PyerrRestore,
    UnboundLocal,
    EhTrace,
    CheckFunctionResult,

    PushFrame,
    PopFrame,
    LastiInit,
    LastiUpdate,

    ImportName,
    ImportFrom,
    ImportStar,

    NewFunction,
    SetClosure,
    SetDefaults,
    SetKwDefaults,
    SetAnnotations,

    IsTrue,
    PrintExpr,
    FormatValue,
    PyobjectStr,
    PyobjectRepr,
    PyobjectAscii,
    PyobjectFormat,
    PeriodicWork,

    RichCompare,
    Contains,

    UnpackSequence,
    UnpackExRest,
    LoadAssertionError,
    StoreSubscr,
    DeleteSubscr,
}

impl Helper {
    /// All helpers, in table order — the order their tokens are assigned.
    const ALL: &'static [Helper] = &[
        Helper::BinaryAdd, Helper::BinarySub, Helper::BinaryMul, Helper::BinaryTrueDiv,
        Helper::BinaryFloorDiv, Helper::BinaryMod, Helper::BinaryPow, Helper::BinaryMatMul,
        Helper::BinarySubscr, Helper::BinaryLShift, Helper::BinaryRShift, Helper::BinaryAnd,
        Helper::BinaryOr, Helper::BinaryXor,
        Helper::InplaceAdd, Helper::InplaceSub, Helper::InplaceMul, Helper::InplaceTrueDiv,
        Helper::InplaceFloorDiv, Helper::InplaceMod, Helper::InplacePow, Helper::InplaceLShift,
        Helper::InplaceRShift, Helper::InplaceAnd, Helper::InplaceOr, Helper::InplaceXor,
        Helper::UnaryPositive, Helper::UnaryNegative, Helper::UnaryNotObject, Helper::UnaryNotInt,
        Helper::UnaryInvert,
        Helper::TupleNew, Helper::ListNew, Helper::DictNewPresized, Helper::SetNew,
        Helper::ListStore, Helper::TupleStore, Helper::ListAppend, Helper::ListExtend,
        Helper::ListToTuple, Helper::DictStore, Helper::DictMerge, Helper::DictUpdate,
        Helper::SetAdd, Helper::SetUpdate, Helper::BuildSlice, Helper::BuildMap,
        Helper::BuildString,
        Helper::LoadName, Helper::StoreName, Helper::DeleteName, Helper::LoadAttr,
        Helper::StoreAttr, Helper::DeleteAttr, Helper::LoadGlobal, Helper::StoreGlobal,
        Helper::DeleteGlobal, Helper::LoadMethod, Helper::LoadBuildClass, Helper::LoadClassderef,
        Helper::Call0, Helper::Call1, Helper::Call2, Helper::Call3, Helper::Call4,
        Helper::CallNWithTuple, Helper::CallKwWithTuple, Helper::CallArgs, Helper::CallKwargs,
        Helper::MethodCall, Helper::MethodCallN, Helper::FancyCall,
        Helper::GetIter, Helper::IterNext,
        Helper::Incref, Helper::Decref, Helper::DecrefAndNull,
        Helper::RaiseVarargs, Helper::Reraise, Helper::PrepareException, Helper::UnwindEh,
        Helper::CompareExceptions, Helper::PyerrSetstring, Helper::PyerrRestore,
        Helper::UnboundLocal, Helper::EhTrace, Helper::CheckFunctionResult,
        Helper::PushFrame, Helper::PopFrame, Helper::LastiInit, Helper::LastiUpdate,
        Helper::ImportName, Helper::ImportFrom, Helper::ImportStar,
        Helper::NewFunction, Helper::SetClosure, Helper::SetDefaults, Helper::SetKwDefaults,
        Helper::SetAnnotations,
        Helper::IsTrue, Helper::PrintExpr, Helper::FormatValue, Helper::PyobjectStr,
        Helper::PyobjectRepr, Helper::PyobjectAscii, Helper::PyobjectFormat, Helper::PeriodicWork,
        Helper::RichCompare, Helper::Contains,
        Helper::UnpackSequence, Helper::UnpackExRest, Helper::LoadAssertionError,
        Helper::StoreSubscr, Helper::DeleteSubscr,
    ];

    fn native_name(self) -> &'static str {
        match self {
            Helper::BinaryAdd => "rt_binary_add",
            Helper::BinarySub => "rt_binary_sub",
            Helper::BinaryMul => "rt_binary_mul",
            Helper::BinaryTrueDiv => "rt_binary_truediv",
            Helper::BinaryFloorDiv => "rt_binary_floordiv",
            Helper::BinaryMod => "rt_binary_mod",
            Helper::BinaryPow => "rt_binary_pow",
            Helper::BinaryMatMul => "rt_binary_matmul",
            Helper::BinarySubscr => "rt_binary_subscr",
            Helper::BinaryLShift => "rt_binary_lshift",
            Helper::BinaryRShift => "rt_binary_rshift",
            Helper::BinaryAnd => "rt_binary_and",
            Helper::BinaryOr => "rt_binary_or",
            Helper::BinaryXor => "rt_binary_xor",
            Helper::InplaceAdd => "rt_inplace_add",
            Helper::InplaceSub => "rt_inplace_sub",
            Helper::InplaceMul => "rt_inplace_mul",
            Helper::InplaceTrueDiv => "rt_inplace_truediv",
            Helper::InplaceFloorDiv => "rt_inplace_floordiv",
            Helper::InplaceMod => "rt_inplace_mod",
            Helper::InplacePow => "rt_inplace_pow",
            Helper::InplaceLShift => "rt_inplace_lshift",
            Helper::InplaceRShift => "rt_inplace_rshift",
            Helper::InplaceAnd => "rt_inplace_and",
            Helper::InplaceOr => "rt_inplace_or",
            Helper::InplaceXor => "rt_inplace_xor",
            Helper::UnaryPositive => "rt_unary_positive",
            Helper::UnaryNegative => "rt_unary_negative",
            Helper::UnaryNotObject => "rt_unary_not_object",
            Helper::UnaryNotInt => "rt_unary_not_int",
            Helper::UnaryInvert => "rt_unary_invert",
            Helper::TupleNew => "rt_tuple_new",
            Helper::ListNew => "rt_list_new",
            Helper::DictNewPresized => "rt_dict_new_presized",
            Helper::SetNew => "rt_set_new",
            Helper::ListStore => "rt_list_store",
            Helper::TupleStore => "rt_tuple_store",
            Helper::ListAppend => "rt_list_append",
            Helper::ListExtend => "rt_list_extend",
            Helper::ListToTuple => "rt_list_to_tuple",
            Helper::DictStore => "rt_dict_store",
            Helper::DictMerge => "rt_dict_merge",
            Helper::DictUpdate => "rt_dict_update",
            Helper::SetAdd => "rt_set_add",
            Helper::SetUpdate => "rt_set_update",
            Helper::BuildSlice => "rt_build_slice",
            Helper::BuildMap => "rt_build_map",
            Helper::BuildString => "rt_unicode_joinarray",
            Helper::LoadName => "rt_load_name",
            Helper::StoreName => "rt_store_name",
            Helper::DeleteName => "rt_delete_name",
            Helper::LoadAttr => "rt_load_attr",
            Helper::StoreAttr => "rt_store_attr",
            Helper::DeleteAttr => "rt_delete_attr",
            Helper::LoadGlobal => "rt_load_global",
            Helper::StoreGlobal => "rt_store_global",
            Helper::DeleteGlobal => "rt_delete_global",
            Helper::LoadMethod => "rt_load_method",
            Helper::LoadBuildClass => "rt_load_build_class",
            Helper::LoadClassderef => "rt_load_classderef",
            Helper::Call0 => "rt_call0",
            Helper::Call1 => "rt_call1",
            Helper::Call2 => "rt_call2",
            Helper::Call3 => "rt_call3",
            Helper::Call4 => "rt_call4",
            Helper::CallNWithTuple => "rt_call_n_with_tuple",
            Helper::CallKwWithTuple => "rt_call_kw_with_tuple",
            Helper::CallArgs => "rt_call_args",
            Helper::CallKwargs => "rt_call_kwargs",
            Helper::MethodCall => "rt_method_call",
            Helper::MethodCallN => "rt_method_call_n",
            Helper::FancyCall => "rt_fancy_call",
            Helper::GetIter => "rt_get_iter",
            Helper::IterNext => "rt_iter_next",
            Helper::Incref => "rt_incref",
            Helper::Decref => "rt_decref",
            Helper::DecrefAndNull => "rt_decref_and_null",
            Helper::RaiseVarargs => "rt_raise_varargs",
            Helper::Reraise => "rt_reraise",
            Helper::PrepareException => "rt_prepare_exception",
            Helper::UnwindEh => "rt_unwind_eh",
            Helper::CompareExceptions => "rt_compare_exceptions",
            Helper::PyerrSetstring => "rt_pyerr_setstring",
            Helper::PyerrRestore => "rt_pyerr_restore",
            Helper::UnboundLocal => "rt_unbound_local",
            Helper::EhTrace => "rt_eh_trace",
            Helper::CheckFunctionResult => "rt_check_function_result",
            Helper::PushFrame => "rt_push_frame",
            Helper::PopFrame => "rt_pop_frame",
            Helper::LastiInit => "rt_lasti_init",
            Helper::LastiUpdate => "rt_lasti_update",
            Helper::ImportName => "rt_import_name",
            Helper::ImportFrom => "rt_import_from",
            Helper::ImportStar => "rt_import_star",
            Helper::NewFunction => "rt_new_function",
            Helper::SetClosure => "rt_set_closure",
            Helper::SetDefaults => "rt_set_defaults",
            Helper::SetKwDefaults => "rt_set_kw_defaults",
            Helper::SetAnnotations => "rt_set_annotations",
            Helper::IsTrue => "rt_is_true",
            Helper::PrintExpr => "rt_print_expr",
            Helper::FormatValue => "rt_format_value",
            Helper::PyobjectStr => "rt_pyobject_str",
            Helper::PyobjectRepr => "rt_pyobject_repr",
            Helper::PyobjectAscii => "rt_pyobject_ascii",
            Helper::PyobjectFormat => "rt_pyobject_format",
            Helper::PeriodicWork => "rt_periodic_work",
            Helper::RichCompare => "rt_rich_compare",
            Helper::Contains => "rt_contains",
            Helper::UnpackSequence => "rt_unpack_sequence_item",
            Helper::UnpackExRest => "rt_unpack_ex_rest",
            Helper::LoadAssertionError => "rt_load_assertion_error",
            Helper::StoreSubscr => "rt_store_subscr",
            Helper::DeleteSubscr => "rt_delete_subscr",
        }
    }

    /// Return type and fixed argument count for helpers with a
    /// statically-known shape. Variadic helpers (`call_n_with_tuple` and
    /// friends) are called with an `arg_count` the CG computes per call
    /// site, not from this table — `fixed_shape` returns `None` for those
    /// and the CG supplies the count directly to `ir::IlBuilder::call`.
    fn fixed_shape(self) -> Option<(IlType, u32)> {
        use Helper::*;
        Some(match self {
            BinaryAdd | BinarySub | BinaryMul | BinaryTrueDiv | BinaryFloorDiv | BinaryMod
            | BinaryPow | BinaryMatMul | BinarySubscr | BinaryLShift | BinaryRShift | BinaryAnd
            | BinaryOr | BinaryXor | InplaceAdd | InplaceSub | InplaceMul | InplaceTrueDiv
            | InplaceFloorDiv | InplaceMod | InplacePow | InplaceLShift | InplaceRShift
            | InplaceAnd | InplaceOr | InplaceXor => (IlType::Object, 2),

            UnaryPositive | UnaryNegative | UnaryNotObject | UnaryInvert => (IlType::Object, 1),
            UnaryNotInt => (IlType::I4, 1),

            ListStore | TupleStore | DictStore | SetAdd => (IlType::I4, 3),
            ListAppend | ListExtend | DictMerge | DictUpdate | SetUpdate => (IlType::I4, 2),
            ListToTuple => (IlType::Object, 1),
            DictNewPresized | ListNew | TupleNew | SetNew => (IlType::Object, 1),
            BuildSlice => (IlType::Object, 3),

            LoadName | LoadGlobal | LoadClassderef | LoadBuildClass => (IlType::Object, 1),
            StoreName | StoreGlobal => (IlType::I4, 2),
            DeleteName | DeleteGlobal => (IlType::I4, 1),
            LoadAttr => (IlType::Object, 2),
            LoadMethod => (IlType::I4, 3),
            StoreAttr => (IlType::I4, 3),
            DeleteAttr => (IlType::I4, 2),

            Call0 => (IlType::Object, 1),
            Call1 => (IlType::Object, 2),
            Call2 => (IlType::Object, 3),
            Call3 => (IlType::Object, 4),
            Call4 => (IlType::Object, 5),

            GetIter => (IlType::Object, 1),
            IterNext => (IlType::Object, 1),

            Incref => (IlType::Void, 1),
            Decref | DecrefAndNull => (IlType::Void, 1),

            RaiseVarargs => (IlType::I4, 3),
            Reraise => (IlType::I4, 1),
            PrepareException => (IlType::Void, 1),
            UnwindEh => (IlType::Void, 1),
            CompareExceptions => (IlType::I4, 2),
            PyerrSetstring => (IlType::Void, 2),
            PyerrRestore => (IlType::Void, 1),
            UnboundLocal => (IlType::Void, 1),
            EhTrace => (IlType::Void, 0),
            CheckFunctionResult => (IlType::Object, 1),

            PushFrame => (IlType::Void, 1),
            PopFrame => (IlType::Void, 1),
            LastiInit => (IlType::Void, 1),
            LastiUpdate => (IlType::Void, 2),

            ImportName => (IlType::Object, 3),
            ImportFrom => (IlType::Object, 2),
            ImportStar => (IlType::I4, 1),

            NewFunction => (IlType::Object, 2),
            SetClosure => (IlType::Void, 2),
            SetDefaults => (IlType::Void, 2),
            SetKwDefaults => (IlType::Void, 2),
            SetAnnotations => (IlType::Void, 2),

            IsTrue => (IlType::I4, 1),
            PrintExpr => (IlType::I4, 1),
            FormatValue => (IlType::Object, 3),
            PyobjectStr | PyobjectRepr | PyobjectAscii => (IlType::Object, 1),
            PyobjectFormat => (IlType::Object, 2),
            PeriodicWork => (IlType::I4, 0),

            RichCompare => (IlType::Object, 3),
            Contains => (IlType::I4, 2),
            UnpackSequence => (IlType::Object, 2),
            UnpackExRest => (IlType::Object, 3),
            LoadAssertionError => (IlType::Object, 0),
            StoreSubscr => (IlType::I4, 3),
            DeleteSubscr => (IlType::I4, 2),

            // Variadic shapes are computed at the call site.
            CallNWithTuple | CallKwWithTuple | CallArgs | CallKwargs | MethodCall
            | MethodCallN | FancyCall | BuildMap | BuildString => return None,
        })
    }
}

/// The process-global, read-only helper table.
pub struct HelperTable {
    by_helper: FxHashMap<Helper, HelperDescriptor>,
    by_token: FxHashMap<HelperToken, Helper>,
}

impl HelperTable {
    fn build() -> HelperTable {
        let mut by_helper = FxHashMap::default();
        let mut by_token = FxHashMap::default();
        for (i, &helper) in Helper::ALL.iter().enumerate() {
            let token = HelperToken(i as u32);
            let (returns, arg_count) = helper.fixed_shape().unwrap_or((IlType::Object, 0));
            let descriptor = HelperDescriptor { token, native_name: helper.native_name(), returns, arg_count };
            by_helper.insert(helper, descriptor);
            by_token.insert(token, helper);
        }
        HelperTable { by_helper, by_token }
    }

    pub fn global() -> &'static HelperTable {
        static TABLE: OnceLock<HelperTable> = OnceLock::new();
        TABLE.get_or_init(HelperTable::build)
    }

    pub fn descriptor(&self, helper: Helper) -> HelperDescriptor {
        self.by_helper[&helper]
    }

    pub fn token(&self, helper: Helper) -> HelperToken {
        self.descriptor(helper).token
    }

    pub fn helper_for_token(&self, token: HelperToken) -> Option<Helper> {
        self.by_token.get(&token).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_helper_has_a_unique_token() {
        let table = HelperTable::global();
        let mut seen = std::collections::HashSet::new();
        for &helper in Helper::ALL {
            let token = table.token(helper);
            assert!(seen.insert(token.0), "duplicate token for {helper:?}");
        }
    }

    #[test]
    fn token_round_trips_to_helper() {
        let table = HelperTable::global();
        let token = table.token(Helper::BinaryAdd);
        assert_eq!(table.helper_for_token(token), Some(Helper::BinaryAdd));
    }

    #[test]
    fn variadic_helpers_have_no_fixed_shape() {
        assert_eq!(Helper::CallArgs.fixed_shape(), None);
        assert_eq!(Helper::MethodCallN.fixed_shape(), None);
    }
}
