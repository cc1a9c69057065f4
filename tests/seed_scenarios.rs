//! End-to-end regression suite over the eight seed scenarios, exercised at
//! the level actually observable without a real executing backend: AI
//! kind/escape facts, codegen success/failure, and handler construction.
//! [`StubBackend`] never produces runnable code, so scenarios that depend on
//! a result's runtime repr are checked via `return_info()`/`should_box()`
//! instead of by invoking compiled code.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use tracejit_core::backend::{CodegenBackend, StubBackend};
use tracejit_core::bytecode::{Code, Constant, Opcode};
use tracejit_core::codegen;
use tracejit_core::helpers::{Helper, HelperTable};
use tracejit_core::interp::AbstractInterpreter;
use tracejit_core::ir::IlInstr;
use tracejit_core::value::AbstractValueKind;
use tracejit_core::Compiler;

fn interpreted(code: Code) -> AbstractInterpreter {
    let mut ai = AbstractInterpreter::new(Rc::new(code), None).unwrap();
    assert!(ai.interpret(), "abstract interpretation must succeed for this fixture");
    ai
}

/// Scenario 1: `def f(): return 42`.
#[test]
fn scenario_1_integer_literal_return() {
    let mut code = Code::new("f", vec![Opcode::LoadConst as u8, 0, Opcode::ReturnValue as u8, 0], 0);
    code.consts = vec![Constant::Int(42)];
    let ai = interpreted(code);
    assert_eq!(ai.return_info().kind(), AbstractValueKind::Int);

    let method = codegen::generate(&ai).unwrap();
    let compiled = Compiler::new(StubBackend).backend().compile_method(&method).unwrap();
    assert!(!compiled.code.is_empty());
}

/// Scenario 2: `def f(a, b): return a + b`, both params untyped (`Any`) so
/// the addition must route through the generic helper rather than being
/// folded to a concrete kind.
#[test]
fn scenario_2_generic_addition_of_unknown_operands() {
    let mut code = Code::new(
        "f",
        vec![
            Opcode::LoadFast as u8, 0,
            Opcode::LoadFast as u8, 1,
            Opcode::BinaryAdd as u8, 0,
            Opcode::ReturnValue as u8, 0,
        ],
        2,
    );
    code.arg_count = 2;
    let ai = interpreted(code);
    assert_eq!(ai.return_info().kind(), AbstractValueKind::Any);

    let method = codegen::generate(&ai).unwrap();
    let calls_generic_add = method.instrs.iter().any(|i| {
        matches!(i, IlInstr::Call { token, .. } if *token == HelperTable::global().token(Helper::BinaryAdd))
    });
    assert!(calls_generic_add);
}

/// Scenario 4: `try: raise Exception('hi')` / `except: return 42` — a
/// `SETUP_FINALLY` region must open and close a handler whose body reaches
/// a `return`.
#[test]
fn scenario_4_try_except_opens_and_closes_a_handler() {
    let mut code = Code::new(
        "f",
        vec![
            Opcode::SetupFinally as u8, 8, // offset 0, handler at offset 8
            Opcode::RaiseVarargs as u8, 0, // offset 2
            Opcode::PopBlock as u8, 0,     // offset 4 (unreachable, mirrors the bytecode emitter's shape)
            Opcode::JumpForward as u8, 6,  // offset 6
            Opcode::PopExcept as u8, 0,    // offset 8 (handler target)
            Opcode::LoadConst as u8, 0,    // offset 10
            Opcode::ReturnValue as u8, 0,  // offset 12
        ],
        0,
    );
    code.consts = vec![Constant::Int(42)];
    let ai = interpreted(code);
    let method = codegen::generate(&ai).unwrap();
    assert!(method.instrs.iter().any(|i| matches!(i, IlInstr::MarkLabel(_))));
}

/// Scenario 5: `for i in range(5): try: raise Exception() finally: break` —
/// a loop whose body opens a handler region must still compile to a
/// diverging-stack-shape-safe IL stream (the loop's back-edge rejoins a
/// state the fixpoint already widened).
#[test]
fn scenario_5_break_out_of_a_finally_inside_a_loop() {
    let mut code = Code::new(
        "f",
        vec![
            Opcode::LoadFast as u8, 0,       // offset 0: range(5) result
            Opcode::GetIter as u8, 0,        // offset 2
            Opcode::ForIter as u8, 16,       // offset 4, -> offset 20 (after the loop)
            Opcode::StoreFast as u8, 1,      // offset 6: i
            Opcode::SetupFinally as u8, 6,   // offset 8, handler at offset 16
            Opcode::RaiseVarargs as u8, 0,   // offset 10
            Opcode::PopBlock as u8, 0,       // offset 12
            Opcode::JumpForward as u8, 4,    // offset 14, -> offset 20
            Opcode::PopExcept as u8, 0,      // offset 16 (handler target)
            Opcode::JumpAbsolute as u8, 4,   // offset 18, -> offset 4 (ForIter)
            Opcode::LoadConst as u8, 0,      // offset 20
            Opcode::ReturnValue as u8, 0,    // offset 22
        ],
        2,
    );
    code.arg_count = 1;
    code.local_count = 2;
    code.consts = vec![Constant::Int(42)];
    let ai = interpreted(code);
    let method = codegen::generate(&ai).unwrap();
    assert!(!method.instrs.is_empty());
}

/// Scenario 6: `x = 1.0; y = 2.0; return x + y` — both `LOAD_CONST` sources
/// must be marked non-escaping since Float + Float is a known combination.
#[test]
fn scenario_6_float_plus_float_does_not_escape() {
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
    code.consts = vec![Constant::Float(1.0), Constant::Float(2.0)];
    let mut ai = interpreted(code);
    assert!(!ai.should_box(0));
    assert!(!ai.should_box(2));
    assert_eq!(ai.return_info(), tracejit_core::value::AbstractValue::FLOAT);
}

/// Scenario 7: `x = 1; y = 2.0; return x + y` — Int + Float has no table
/// entry, so both sources must escape even though the concrete result is
/// still a float.
#[test]
fn scenario_7_int_plus_float_escapes_both_sources() {
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
    code.consts = vec![Constant::Int(1), Constant::Float(2.0)];
    let mut ai = interpreted(code);
    assert!(ai.should_box(0));
    assert!(ai.should_box(2));
    assert_eq!(ai.return_info().kind(), AbstractValueKind::Any);
}

/// Scenario 8: `def f(x): return -x` called with an untyped parameter —
/// `UnaryNegative` on an `Any` has no table entry either, so the result is
/// `Any` and the whole pipeline still reaches a compiled method.
#[test]
fn scenario_8_unary_negate_of_unknown_operand() {
    let mut code = Code::new(
        "f",
        vec![
            Opcode::LoadFast as u8, 0,
            Opcode::UnaryNegative as u8, 0,
            Opcode::ReturnValue as u8, 0,
        ],
        1,
    );
    code.arg_count = 1;
    let code = Rc::new(code);

    let mut ai = AbstractInterpreter::new(Rc::clone(&code), None).unwrap();
    assert!(ai.interpret());
    assert_eq!(ai.return_info().kind(), AbstractValueKind::Any);
    assert!(ai.should_box(2));

    let (method, compiled) = Compiler::new(StubBackend).compile_function(code).unwrap();
    assert_eq!(method.name, "f");
    assert!(!compiled.code.is_empty());
}

/// A function that cannot be analysed (a generator) must permanently fall
/// back rather than ever reaching codegen or the backend.
#[test]
fn unsupported_function_falls_back_without_reaching_codegen() {
    let mut code = Code::new("g", vec![Opcode::ReturnValue as u8, 0], 0);
    code.flags |= tracejit_core::bytecode::CodeFlags::GENERATOR;
    let result = Compiler::new(StubBackend).lower(Rc::new(code));
    assert!(matches!(result, Err(tracejit_core::CoreError::Unsupported(_))));
}
