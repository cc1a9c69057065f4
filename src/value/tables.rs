//! Binary / unary result tables.
//!
//! Every operator/kind combination not covered here falls back to
//! "escape both sources, return `Any`" in `value::AbstractValue` — the
//! tables are the only place that contract is allowed to widen a result
//! past `Any`.

use super::AbstractValueKind as K;

/// `BINARY_*` / `INPLACE_*` operators share one result table; the code
/// generator tells the two apart, the lattice does not need to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    LShift,
    RShift,
    And,
    Or,
    Xor,
    Subscr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    Invert,
}

/// The six `COMPARE_OP` comparisons that go through `AbstractValue::compare`.
/// `is`/`is not`/`in`/`not in` are handled directly by the interpreter
///, not through
/// this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RichCompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

fn is_numeric(k: K) -> bool {
    matches!(k, K::Int | K::Float | K::Bool)
}

fn is_int_like(k: K) -> bool {
    matches!(k, K::Int | K::Bool)
}

fn int_arith_result(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::FloorDiv
            | BinOp::Mod
            | BinOp::Pow
            | BinOp::LShift
            | BinOp::RShift
            | BinOp::And
            | BinOp::Or
            | BinOp::Xor
    )
}

fn float_arith_op(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::TrueDiv | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow
    )
}

fn complex_arith_op(op: BinOp) -> bool {
    matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::TrueDiv | BinOp::Pow)
}

fn set_op(op: BinOp) -> bool {
    matches!(op, BinOp::And | BinOp::Or | BinOp::Sub | BinOp::Xor)
}

/// Look up the binary result kind, or `None` if the pair is not covered
/// (the caller escapes both sources and falls back to `Any`).
pub fn binary_result(left: K, op: BinOp, right: K) -> Option<K> {
    // Int (and Bool, which behaves like Int here) x Int/Bool.
    if is_int_like(left) && is_int_like(right) {
        if op == BinOp::TrueDiv {
            return Some(K::Float);
        }
        if int_arith_result(op) {
            return Some(K::Int);
        }
    }

    // Float x Float. Mixing Float with Int/Bool is deliberately excluded:
    // the result kind is only derivable without the generic helper when
    // both operands are already the same kind.
    if left == K::Float && right == K::Float && float_arith_op(op) {
        return Some(K::Float);
    }

    // Float x Complex.
    if left == K::Float && right == K::Complex && complex_arith_op(op) {
        return Some(K::Complex);
    }
    if left == K::Complex && right == K::Float && complex_arith_op(op) {
        return Some(K::Complex);
    }

    // Sequence repetition: Int/Bool * sequence (either operand order).
    if op == BinOp::Mul {
        if is_int_like(left) && matches!(right, K::Str | K::Bytes | K::List | K::Tuple) {
            return Some(right);
        }
        if is_int_like(right) && matches!(left, K::Str | K::Bytes | K::List | K::Tuple) {
            return Some(left);
        }
    }

    // Str operators.
    if left == K::Str {
        match op {
            BinOp::Add if right == K::Str => return Some(K::Str),
            BinOp::Mod => return Some(K::Str),
            _ => {}
        }
    }

    // Tuple / List concatenation.
    if op == BinOp::Add && left == K::Tuple && right == K::Tuple {
        return Some(K::Tuple);
    }
    if op == BinOp::Add && left == K::List && right == K::List {
        return Some(K::List);
    }

    // Set algebra.
    if left == K::Set && right == K::Set && set_op(op) {
        return Some(K::Set);
    }

    None
}

/// Unary result kind, or `None` to fall back to `Any` + escape.
pub fn unary_result(kind: K, op: UnaryOp) -> Option<K> {
    match op {
        // `not` is well-defined for any kind and never needs to look at
        // the operand's boxed representation to decide the *result* kind
        // (the CG may still need the boxed value to compute it).
        UnaryOp::Not => Some(K::Bool),
        UnaryOp::Negative if kind == K::Bool => Some(K::Int),
        UnaryOp::Positive | UnaryOp::Negative if matches!(kind, K::Int | K::Float | K::Complex) => Some(kind),
        UnaryOp::Invert if kind == K::Int => Some(K::Int),
        UnaryOp::Invert if kind == K::Bool => Some(K::Int),
        _ => None,
    }
}
