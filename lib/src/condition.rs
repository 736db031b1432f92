//! The expression evaluator (spec.md §4.4): evaluates a rule's
//! condition tree against an [`EvaluationContext`].
//!
//! The rule *parser* is out of scope (spec.md §1) — it is expected to
//! hand the core an already-built [`Expr`] tree using exactly the node
//! kinds below. This module only evaluates that tree; it never parses
//! text.
//!
//! `undefined` is modeled as `None` in the [`EvalResult`] alias rather
//! than as a dedicated `Value` variant, which keeps "propagates as
//! false at the boolean boundary" (spec.md §9) a one-line `unwrap_or`
//! instead of a match arm sprinkled through every operator.

use std::rc::Rc;

use crate::rule::Rule;
use crate::variables::VariableValue;

/// A typed evaluation result. `None` represents `undefined`.
pub type EvalResult = Option<Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Value {
    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(n) => Some(*n != 0),
            _ => None,
        }
    }
}

/// Byte width and signedness for [`Expr::ByteAccess`] (spec.md §4.4:
/// `uint8/uint16/uint32/int8/int16/int32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
}

impl IntWidth {
    fn byte_len(self) -> usize {
        match self {
            IntWidth::U8 | IntWidth::I8 => 1,
            IntWidth::U16 | IntWidth::I16 => 2,
            IntWidth::U32 | IntWidth::I32 => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> i64 {
        match self {
            IntWidth::U8 => bytes[0] as i64,
            IntWidth::I8 => bytes[0] as i8 as i64,
            IntWidth::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            IntWidth::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            IntWidth::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
            IntWidth::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// The count required by an `of` expression or a `for` quantifier
/// (spec.md §4.4: "any of (...)", "all of (...)", "N of (...)").
#[derive(Debug, Clone)]
pub enum Quantifier {
    Any,
    All,
    Exactly(Box<Expr>),
}

/// The string set an `of` expression ranges over.
#[derive(Debug, Clone)]
pub enum StringSet {
    Explicit(Vec<String>),
    /// `them` — every string declared in the rule.
    All,
}

/// The integer range a `for ... in (...)` quantifier ranges over.
#[derive(Debug, Clone)]
pub enum Range {
    Bounds(Box<Expr>, Box<Expr>),
    Set(Vec<Expr>),
}

/// The full set of condition-tree node kinds (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum Expr {
    IntLiteral(i64),
    BoolLiteral(bool),
    BytesLiteral(Vec<u8>),

    /// External variable lookup by identifier.
    Variable(String),
    /// A bound loop variable introduced by a `for` quantifier.
    LoopVariable(String),

    /// `$s` — truthy iff the atom has at least one match.
    StringRef(String),
    /// `#s` — number of matches.
    StringCount(String),
    /// `@s[k]` — offset of the k-th match (1-based); undefined if
    /// there are fewer than k matches.
    StringOffset(String, Box<Expr>),
    /// `$s at expr` — some match offset equals `expr`.
    StringAt(String, Box<Expr>),
    /// `$s in (lo..hi)` — some match offset falls in `[lo, hi]`.
    StringIn(String, Box<Expr>, Box<Expr>),

    ByteAccess(IntWidth, Box<Expr>),

    Neg(Box<Expr>),
    Not(Box<Expr>),
    BitNot(Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),

    Of(Quantifier, StringSet),
    ForLoop(Quantifier, String, Range, Box<Expr>),

    FileSize,
    EntryPoint,

    /// Identifier call used as a tag-presence check, e.g. `packed` used
    /// as a boolean where `packed` is one of the rule's tags.
    TagCheck(String),
}

/// A singly-linked stack of `for`-loop variable bindings. Built as a
/// cons-list so nested loops can shadow without any shared mutable
/// state (spec.md §9: coroutine-free, straightforward evaluation).
pub enum LoopScope<'a> {
    Empty,
    Bound { name: &'a str, value: i64, parent: &'a LoopScope<'a> },
}

impl<'a> LoopScope<'a> {
    fn lookup(&self, name: &str) -> Option<i64> {
        match self {
            LoopScope::Empty => None,
            LoopScope::Bound { name: n, value, parent } => {
                if *n == name {
                    Some(*value)
                } else {
                    parent.lookup(name)
                }
            }
        }
    }
}

/// Context threaded through evaluation of a single rule's condition
/// (spec.md §3, "EvaluationContext").
pub struct EvaluationContext<'a> {
    pub blocks: &'a crate::memory::MemoryBlockList<'a>,
    pub rule: &'a Rule,
    pub variables: &'a crate::variables::Variables,
    pub entry_point: Option<u64>,
}

/// Evaluates `expr` against `ctx`, returning `undefined` (`None`) for
/// out-of-range byte access, missing matches, and division by zero
/// (spec.md §4.4, §7).
pub fn eval(expr: &Expr, ctx: &EvaluationContext, scope: &LoopScope) -> EvalResult {
    match expr {
        Expr::IntLiteral(n) => Some(Value::Integer(*n)),
        Expr::BoolLiteral(b) => Some(Value::Bool(*b)),
        Expr::BytesLiteral(b) => Some(Value::Bytes(b.clone())),

        Expr::Variable(name) => match ctx.variables.get(name)? {
            VariableValue::Integer(n) => Some(Value::Integer(*n)),
            VariableValue::Boolean(b) => Some(Value::Bool(*b)),
            VariableValue::String(s) => Some(Value::Bytes(s.as_bytes().to_vec())),
        },
        Expr::LoopVariable(name) => scope.lookup(name).map(Value::Integer),

        Expr::StringRef(id) => {
            let atom = ctx.rule.find_atom(id)?;
            Some(Value::Bool(atom.has_match()))
        }
        Expr::StringCount(id) => {
            let atom = ctx.rule.find_atom(id)?;
            Some(Value::Integer(atom.match_count() as i64))
        }
        Expr::StringOffset(id, k) => {
            let atom = ctx.rule.find_atom(id)?;
            let k = eval(k, ctx, scope)?.as_integer()?;
            if k < 1 {
                return None;
            }
            atom.nth_match(k as usize).map(|m| Value::Integer(m.offset as i64))
        }
        Expr::StringAt(id, at) => {
            let atom = ctx.rule.find_atom(id)?;
            let at = eval(at, ctx, scope)?.as_integer()?;
            Some(Value::Bool(atom.matches_sorted().iter().any(|m| m.offset as i64 == at)))
        }
        Expr::StringIn(id, lo, hi) => {
            let atom = ctx.rule.find_atom(id)?;
            let lo = eval(lo, ctx, scope)?.as_integer()?;
            let hi = eval(hi, ctx, scope)?.as_integer()?;
            Some(Value::Bool(
                atom.matches_sorted().iter().any(|m| (m.offset as i64) >= lo && (m.offset as i64) <= hi),
            ))
        }

        Expr::ByteAccess(width, offset) => {
            let offset = eval(offset, ctx, scope)?.as_integer()?;
            if offset < 0 {
                return None;
            }
            let bytes = ctx.blocks.read_at(offset as u64, width.byte_len())?;
            Some(Value::Integer(width.decode(bytes)))
        }

        Expr::Neg(e) => eval(e, ctx, scope).and_then(|v| Some(Value::Integer(-v.as_integer()?))),
        Expr::Not(e) => {
            let v = eval(e, ctx, scope)?;
            Some(Value::Bool(!v.as_bool()?))
        }
        Expr::BitNot(e) => eval(e, ctx, scope).and_then(|v| Some(Value::Integer(!v.as_integer()?))),

        Expr::Arith(op, lhs, rhs) => {
            let a = eval(lhs, ctx, scope)?.as_integer()?;
            let b = eval(rhs, ctx, scope)?.as_integer()?;
            let result = match op {
                ArithOp::Add => a.checked_add(b)?,
                ArithOp::Sub => a.checked_sub(b)?,
                ArithOp::Mul => a.checked_mul(b)?,
                ArithOp::Div => {
                    if b == 0 {
                        return None;
                    }
                    a.checked_div(b)?
                }
                ArithOp::Mod => {
                    if b == 0 {
                        return None;
                    }
                    a.checked_rem(b)?
                }
                ArithOp::Shl => a.checked_shl(b as u32)?,
                ArithOp::Shr => a.checked_shr(b as u32)?,
                ArithOp::BitAnd => a & b,
                ArithOp::BitOr => a | b,
                ArithOp::BitXor => a ^ b,
            };
            Some(Value::Integer(result))
        }

        Expr::Cmp(op, lhs, rhs) => {
            let a = eval(lhs, ctx, scope)?;
            let b = eval(rhs, ctx, scope)?;
            let ordering = compare_values(&a, &b)?;
            let result = match op {
                CmpOp::Eq => ordering == std::cmp::Ordering::Equal,
                CmpOp::Ne => ordering != std::cmp::Ordering::Equal,
                CmpOp::Lt => ordering == std::cmp::Ordering::Less,
                CmpOp::Le => ordering != std::cmp::Ordering::Greater,
                CmpOp::Gt => ordering == std::cmp::Ordering::Greater,
                CmpOp::Ge => ordering != std::cmp::Ordering::Less,
            };
            Some(Value::Bool(result))
        }

        Expr::And(lhs, rhs) => {
            // Short-circuit: a false left side makes the whole
            // expression false regardless of whether the right side is
            // undefined (spec.md §4.4).
            let a = eval(lhs, ctx, scope).and_then(|v| v.as_bool()).unwrap_or(false);
            if !a {
                return Some(Value::Bool(false));
            }
            let b = eval(rhs, ctx, scope).and_then(|v| v.as_bool()).unwrap_or(false);
            Some(Value::Bool(b))
        }
        Expr::Or(lhs, rhs) => {
            let a = eval(lhs, ctx, scope).and_then(|v| v.as_bool()).unwrap_or(false);
            if a {
                return Some(Value::Bool(true));
            }
            let b = eval(rhs, ctx, scope).and_then(|v| v.as_bool()).unwrap_or(false);
            Some(Value::Bool(b))
        }

        Expr::Of(quantifier, set) => eval_of(quantifier, set, ctx, scope),
        Expr::ForLoop(quantifier, binder, range, body) => {
            eval_for_loop(quantifier, binder, range, body, ctx, scope)
        }

        Expr::FileSize => Some(Value::Integer(ctx.blocks.total_size() as i64)),
        Expr::EntryPoint => ctx.entry_point.map(|ep| Value::Integer(ep as i64)),

        Expr::TagCheck(tag) => Some(Value::Bool(ctx.rule.tags.iter().any(|t| t == tag))),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.partial_cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.partial_cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.partial_cmp(y),
        _ => None,
    }
}

/// Truth of the top-level rule condition: undefined collapses to false
/// at this boundary (spec.md §9).
pub fn is_true(expr: &Expr, ctx: &EvaluationContext) -> bool {
    eval(expr, ctx, &LoopScope::Empty).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn eval_of(quantifier: &Quantifier, set: &StringSet, ctx: &EvaluationContext, scope: &LoopScope) -> EvalResult {
    let ids: Vec<Rc<str>> = match set {
        StringSet::Explicit(ids) => ids.iter().map(|s| Rc::from(s.as_str())).collect(),
        StringSet::All => ctx.rule.atoms.iter().map(|a| Rc::from(a.id.as_str())).collect(),
    };
    let total = ids.len();
    let matched = ids
        .iter()
        .filter(|id| ctx.rule.find_atom(id).map(|a| a.has_match()).unwrap_or(false))
        .count();

    let required = match quantifier {
        Quantifier::Any => 1usize.min(total.max(1)),
        Quantifier::All => total,
        Quantifier::Exactly(n) => eval(n, ctx, scope)?.as_integer()? as usize,
    };

    if total == 0 {
        // Vacuous: "all of ()" is true, "any of ()" is false.
        return Some(Value::Bool(matches!(quantifier, Quantifier::All)));
    }

    Some(Value::Bool(matched >= required))
}

fn eval_for_loop(
    quantifier: &Quantifier,
    binder: &str,
    range: &Range,
    body: &Expr,
    ctx: &EvaluationContext,
    scope: &LoopScope,
) -> EvalResult {
    let values: Vec<i64> = match range {
        Range::Bounds(lo, hi) => {
            let lo = eval(lo, ctx, scope)?.as_integer()?;
            let hi = eval(hi, ctx, scope)?.as_integer()?;
            if lo > hi {
                Vec::new()
            } else {
                (lo..=hi).collect()
            }
        }
        Range::Set(exprs) => {
            let mut values = Vec::with_capacity(exprs.len());
            for e in exprs {
                values.push(eval(e, ctx, scope)?.as_integer()?);
            }
            values
        }
    };

    let total = values.len();
    let mut matched = 0usize;
    for value in &values {
        let child_scope = LoopScope::Bound { name: binder, value: *value, parent: scope };
        let truthy = eval(body, ctx, &child_scope).and_then(|v| v.as_bool()).unwrap_or(false);
        if truthy {
            matched += 1;
        }
    }

    let required = match quantifier {
        Quantifier::Any => 1,
        Quantifier::All => total,
        Quantifier::Exactly(n) => eval(n, ctx, scope)?.as_integer()? as usize,
    };

    if total == 0 {
        return Some(Value::Bool(matches!(quantifier, Quantifier::All)));
    }

    Some(Value::Bool(matched >= required))
}
