// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may
// not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Expression evaluation with C integer semantics.
//!
//! Integers carry an explicit storage width and signedness, and every
//! operator applies the C conversions first: sub-`int` operands are promoted
//! to 4-byte signed, then binary operators (except shifts) unify both sides
//! with the C99 balancing rules. The bit pattern is kept in a `u64` that is
//! always clamped to the storage width and sign-extended, so it reads back
//! exactly as the value a C program would load from that type.

use core::fmt;
use std::string::String as StdString;

use itertools::Itertools as _;

use crate::{
    cparser::{BinaryOp, Expr, UnaryOp},
    header::{Identifier, MemSize, Signedness},
    str::Str,
};

/// Errors produced while evaluating an expression.
///
/// These propagate as [Value::Err] through enclosing operators and render as
/// their message text, so they stay contained to the event being formatted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvalError {
    #[error("unknown variable {0}")]
    UnknownVariable(Identifier),

    #[error("unknown kernel function {0}")]
    UnknownFunction(Identifier),

    #[error("type expression has no value")]
    TypeHasNoValue,

    #[error("cast applied to non-integer {0}")]
    CastNonInteger(StdString),

    #[error("expected integer operand to {0}")]
    NonIntegerOperand(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("no event data in this context")]
    NoEventData,

    #[error("field {0} is out of range of the event record")]
    FieldOutOfRange(Identifier),

    #[error("field {0} has unsupported size {1}")]
    BadFieldSize(Identifier, MemSize),

    #[error("expected {expected} as argument to {helper}")]
    HelperArgs {
        helper: &'static str,
        expected: &'static str,
    },

    #[error("__get_str offset {0} too large")]
    GetStrOffset(usize),

    #[error("__get_str length {0} too large")]
    GetStrLength(usize),

    #[error("invalid integer suffix {0:?}")]
    InvalidIntegerSuffix(StdString),

    #[error("invalid integer constant {0:?}")]
    InvalidIntegerConstant(StdString),
}

/// Width and signedness of a C integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntType {
    pub size: MemSize,
    pub signedness: Signedness,
}

impl IntType {
    pub const INT: IntType = IntType::new(4, Signedness::Signed);

    #[inline]
    pub const fn new(size: MemSize, signedness: Signedness) -> IntType {
        IntType { size, signedness }
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        self.signedness.is_signed()
    }

    /// C integer promotion: anything narrower than `int` becomes a signed
    /// `int`.
    pub fn promote(self) -> IntType {
        if self.size < 4 {
            IntType::INT
        } else {
            self
        }
    }

    /// C99 usual arithmetic conversions for two already-promoted integer
    /// operands. Returns the common type both sides convert to.
    pub fn balance(mut a: IntType, mut b: IntType) -> (IntType, IntType) {
        use Signedness::*;

        if a.is_signed() == b.is_signed() {
            // Same signedness: the smaller rank converts to the larger.
            if a.size > b.size {
                b.size = a.size;
            } else {
                a.size = b.size;
            }
        } else if !a.is_signed() && a.size >= b.size {
            // The unsigned operand has rank >= the signed one.
            b.size = a.size;
            b.signedness = Unsigned;
        } else if !b.is_signed() && b.size >= a.size {
            a.size = b.size;
            a.signedness = Unsigned;
        } else if a.is_signed() && a.size > b.size {
            // The signed type can represent every value of the unsigned one.
            b.size = a.size;
            b.signedness = Signed;
        } else if b.is_signed() && b.size > a.size {
            a.size = b.size;
            a.signedness = Signed;
        } else if a.is_signed() {
            a.signedness = Unsigned;
            b.size = a.size;
        } else {
            b.signedness = Unsigned;
            a.size = b.size;
        }

        (a, b)
    }

    /// Canonical name, e.g. `int32` or `uint64`.
    pub fn dump(self) -> StdString {
        let sign = if self.is_signed() { "" } else { "u" };
        format!("{}int{}", sign, self.size * 8)
    }
}

/// Clamp a bit pattern to the storage width and sign-extend it, restoring
/// the invariant that the `u64` reads back as the C value.
fn normalize(bits: u64, typ: IntType) -> u64 {
    let width = typ.size * 8;
    if width >= 64 {
        return bits;
    }
    if width == 0 {
        return 0;
    }
    let mask = (1u64 << width) - 1;
    let clamped = bits & mask;
    if typ.is_signed() && clamped & (1 << (width - 1)) != 0 {
        clamped | !mask
    } else {
        clamped
    }
}

/// An integer value together with its C type.
///
/// The stored pattern is always normalized: bits above the storage width are
/// zero for unsigned values and copies of the sign bit for signed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntValue {
    bits: u64,
    typ: IntType,
}

impl IntValue {
    #[inline]
    pub fn new(bits: u64, typ: IntType) -> IntValue {
        IntValue {
            bits: normalize(bits, typ),
            typ,
        }
    }

    #[inline]
    pub fn typ(self) -> IntType {
        self.typ
    }

    /// Normalized 64-bit pattern: sign-extended for signed values.
    #[inline]
    pub fn bits(self) -> u64 {
        self.bits
    }

    /// Value clamped to the storage width, without sign extension.
    #[inline]
    pub fn as_u64(self) -> u64 {
        let width = self.typ.size * 8;
        if width >= 64 {
            self.bits
        } else {
            self.bits & ((1u64 << width) - 1)
        }
    }

    #[inline]
    pub fn as_i64(self) -> i64 {
        self.bits as i64
    }

    #[inline]
    pub fn as_bool(self) -> bool {
        self.bits != 0
    }

    /// New value of the same type from a raw computation result.
    #[inline]
    fn with_bits(self, bits: u64) -> IntValue {
        IntValue::new(bits, self.typ)
    }

    /// C cast: clamp then sign-extend into the target type.
    #[inline]
    pub fn convert(self, typ: IntType) -> IntValue {
        IntValue::new(self.bits, typ)
    }
}

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
    Int(IntValue),
    Str(Str<'a>),
    /// Only produced by brace groups, to pass `{key, label}` pairs to the
    /// kernel helpers.
    List(Vec<Value<'a>>),
    /// Error produced somewhere in the evaluation; operators pass it through
    /// unchanged.
    Err(EvalError),
}

impl<'a> Value<'a> {
    #[inline]
    pub fn int(bits: u64, size: MemSize, signedness: Signedness) -> Self {
        Value::Int(IntValue::new(bits, IntType::new(size, signedness)))
    }

    #[inline]
    pub fn from_bool(b: bool) -> Self {
        Value::int(b as u64, 4, Signedness::Signed)
    }

    #[inline]
    pub fn is_err(&self) -> bool {
        matches!(self, Value::Err(_))
    }

    #[inline]
    pub fn as_int(&self) -> Option<IntValue> {
        match self {
            Value::Int(x) => Some(*x),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&[Value<'a>]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_static(self) -> Value<'static> {
        match self {
            Value::Int(x) => Value::Int(x),
            Value::Str(s) => Value::Str(s.into_static()),
            Value::List(items) => {
                Value::List(items.into_iter().map(Value::into_static).collect())
            }
            Value::Err(err) => Value::Err(err),
        }
    }

    /// Debug rendering, with the type of integers spelled out.
    pub fn dump(&self) -> StdString {
        match self {
            Value::Int(x) => {
                if x.typ().is_signed() {
                    format!("({}){}", x.typ().dump(), x.as_i64())
                } else {
                    format!("({}){}", x.typ().dump(), x.as_u64())
                }
            }
            Value::Str(s) => format!("\"{s}\""),
            Value::List(items) => format!("{{{}}}", items.iter().map(Value::dump).join(", ")),
            Value::Err(err) => format!("value error: {err}"),
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Value::Int(x) => {
                if x.typ().is_signed() {
                    fmt::Display::fmt(&x.as_i64(), f)
                } else {
                    fmt::Display::fmt(&x.as_u64(), f)
                }
            }
            Value::Str(s) => fmt::Display::fmt(s, f),
            Value::List(_) => write!(f, "{}", self.dump()),
            Value::Err(err) => write!(f, "value error: {err}"),
        }
    }
}

/// Context an expression is evaluated in.
///
/// The defaults fail, which is what makes constant folding safe: any
/// subexpression touching event data refuses to fold.
pub trait EvalEnv {
    /// Binary content of the event record being formatted.
    fn event_data(&self) -> Result<&[u8], EvalError> {
        Err(EvalError::NoEventData)
    }

    /// Resolve a kernel address to a symbol name.
    fn kernel_symbol(&self, _addr: u64) -> Option<&str> {
        None
    }
}

/// Environment with no event attached, used for constant folding.
pub struct BasicEnv;

impl EvalEnv for BasicEnv {}

/// Runtime variable, resolved through the parse scope.
pub trait Variable: Send + Sync {
    fn get<'ee>(&self, env: &'ee dyn EvalEnv) -> Value<'ee>;
}

/// Function callable from an expression, such as the kernel helpers.
pub trait Function: Send + Sync {
    fn call<'ee>(&self, env: &'ee dyn EvalEnv, args: Vec<Value<'ee>>) -> Value<'ee>;
}

/// Fold a constant expression into a [Expr::Constant], keeping the original
/// for dumping.
pub(crate) fn fold(expr: Expr) -> Expr {
    let value = expr.eval(&BasicEnv).into_static();
    Expr::Constant(Some(Box::new(expr)), value)
}

impl Expr {
    /// Evaluate the expression. Errors are returned as [Value::Err] rather
    /// than aborting, so one bad subexpression spoils one value only.
    pub fn eval<'ee>(&self, env: &'ee dyn EvalEnv) -> Value<'ee> {
        match self {
            Expr::Constant(_, value) => value.clone(),

            Expr::Variable(Some(var), _) => var.get(env),
            Expr::Variable(None, name) => Value::Err(EvalError::UnknownVariable(name.clone())),

            Expr::Func(function, name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    let value = arg.eval(env);
                    if value.is_err() {
                        return value;
                    }
                    values.push(value);
                }
                match function {
                    Some(function) => function.call(env, values),
                    None => Value::Err(EvalError::UnknownFunction(name.clone())),
                }
            }

            Expr::Type(_) => Value::Err(EvalError::TypeHasNoValue),

            Expr::Cast(typ, operand) => match operand.eval(env) {
                Value::Int(x) => Value::Int(x.convert(*typ)),
                err @ Value::Err(_) => err,
                value => Value::Err(EvalError::CastNonInteger(value.dump())),
            },

            Expr::Unary(op, operand) => {
                let value = operand.eval(env);
                if value.is_err() {
                    return value;
                }
                let Some(x) = value.as_int() else {
                    return Value::Err(EvalError::NonIntegerOperand(op.symbol()));
                };
                let x = x.convert(x.typ().promote());
                match op {
                    UnaryOp::Plus => Value::Int(x),
                    UnaryOp::Minus => Value::Int(x.with_bits(x.bits().wrapping_neg())),
                    UnaryOp::Tilde => Value::Int(x.with_bits(!x.bits())),
                    UnaryOp::Bang => Value::from_bool(!x.as_bool()),
                }
            }

            Expr::Binary(op, left, right) => {
                let left = left.eval(env);
                if left.is_err() {
                    return left;
                }
                let right = right.eval(env);
                if right.is_err() {
                    return right;
                }
                eval_binary(*op, left, right)
            }

            Expr::Ternary(cond, if_true, if_false) => {
                let cond = cond.eval(env);
                if cond.is_err() {
                    return cond;
                }
                let Some(cond) = cond.as_int() else {
                    return Value::Err(EvalError::NonIntegerOperand("?:"));
                };
                let (chosen, other) = if cond.as_bool() {
                    (if_true, if_false)
                } else {
                    (if_false, if_true)
                };
                // The unchosen arm is not evaluated; it still participates
                // in balancing through its type when that is known at parse
                // time.
                match chosen.eval(env) {
                    Value::Int(x) => {
                        let mut x = x.convert(x.typ().promote());
                        if let Some(other_typ) = other.const_int_type() {
                            let (typ, _) = IntType::balance(x.typ(), other_typ.promote());
                            x = x.convert(typ);
                        }
                        Value::Int(x)
                    }
                    value => value,
                }
            }

            Expr::List(items) => {
                Value::List(items.iter().map(|item| item.eval(env)).collect())
            }

            Expr::Struct(items) => match items.as_slice() {
                [single] => single.eval(env),
                _ => Value::List(items.iter().map(|item| item.eval(env)).collect()),
            },
        }
    }
}

fn eval_binary<'ee>(op: BinaryOp, left: Value<'ee>, right: Value<'ee>) -> Value<'ee> {
    use BinaryOp::*;

    let (Value::Int(a), Value::Int(b)) = (left, right) else {
        return Value::Err(EvalError::NonIntegerOperand(op.symbol()));
    };

    let (a, b) = match op {
        // Shifts promote each side independently and do not balance.
        Shl | Shr => (
            a.convert(a.typ().promote()),
            b.convert(b.typ().promote()),
        ),
        _ => {
            let (ta, tb) = IntType::balance(a.typ().promote(), b.typ().promote());
            (a.convert(ta), b.convert(tb))
        }
    };

    macro_rules! cmp {
        ($op:tt) => {
            if a.typ().is_signed() {
                Value::from_bool(a.as_i64() $op b.as_i64())
            } else {
                Value::from_bool(a.bits() $op b.bits())
            }
        };
    }

    match op {
        Add => Value::Int(a.with_bits(a.bits().wrapping_add(b.bits()))),
        Sub => Value::Int(a.with_bits(a.bits().wrapping_sub(b.bits()))),
        Mul => Value::Int(a.with_bits(a.bits().wrapping_mul(b.bits()))),
        Div | Mod => eval_div_mod(op, a, b),

        Shl => {
            let n = b.as_u64();
            let bits = if n >= 64 { 0 } else { a.bits() << n };
            Value::Int(a.with_bits(bits))
        }
        // The stored pattern is sign-extended to 64 bits, so shifting it as
        // i64 gives the arithmetic shift on signed types; unsigned storage
        // is zero-extended and shifts logically.
        Shr => {
            let n = b.as_u64();
            let bits = if a.typ().is_signed() {
                (a.as_i64() >> n.min(63)) as u64
            } else if n >= 64 {
                0
            } else {
                a.bits() >> n
            };
            Value::Int(a.with_bits(bits))
        }

        BitAnd => Value::Int(a.with_bits(a.bits() & b.bits())),
        BitXor => Value::Int(a.with_bits(a.bits() ^ b.bits())),
        BitOr => Value::Int(a.with_bits(a.bits() | b.bits())),

        Lt => cmp!(<),
        Le => cmp!(<=),
        Gt => cmp!(>),
        Ge => cmp!(>=),

        // Normalized patterns make 64-bit comparison exact for any width.
        Eq => Value::from_bool(a.bits() == b.bits()),
        Ne => Value::from_bool(a.bits() != b.bits()),

        And => Value::from_bool(a.as_bool() && b.as_bool()),
        Or => Value::from_bool(a.as_bool() || b.as_bool()),
    }
}

/// C99 division and modulus: compute on unsigned magnitudes, then the
/// quotient takes the XOR of the operand signs and the remainder the sign of
/// the dividend.
fn eval_div_mod<'ee>(op: BinaryOp, a: IntValue, b: IntValue) -> Value<'ee> {
    let signed = a.typ().is_signed();

    let (neg_a, mag_a) = if signed && a.as_i64() < 0 {
        (true, a.as_i64().unsigned_abs())
    } else {
        (false, a.as_u64())
    };
    let (neg_b, mag_b) = if signed && b.as_i64() < 0 {
        (true, b.as_i64().unsigned_abs())
    } else {
        (false, b.as_u64())
    };

    if mag_b == 0 {
        return Value::Err(EvalError::DivisionByZero);
    }

    let (mut result, negate) = match op {
        BinaryOp::Div => (mag_a / mag_b, neg_a != neg_b),
        _ => (mag_a % mag_b, neg_a),
    };
    if negate {
        result = (result as i64).wrapping_neg() as u64;
    }
    Value::Int(a.with_bits(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cparser::{parse_exprs, tests::TestScope};
    use crate::header::Signedness::{Signed, Unsigned};

    fn s8(x: i64) -> Value<'static> {
        Value::int(x as u64, 1, Signed)
    }
    fn u8v(x: i64) -> Value<'static> {
        Value::int(x as u64, 1, Unsigned)
    }
    fn s16(x: i64) -> Value<'static> {
        Value::int(x as u64, 2, Signed)
    }
    fn u16v(x: i64) -> Value<'static> {
        Value::int(x as u64, 2, Unsigned)
    }
    fn s32(x: i64) -> Value<'static> {
        Value::int(x as u64, 4, Signed)
    }
    fn u32v(x: i64) -> Value<'static> {
        Value::int(x as u64, 4, Unsigned)
    }
    fn s64(x: i64) -> Value<'static> {
        Value::int(x as u64, 8, Signed)
    }
    fn u64v(x: i64) -> Value<'static> {
        Value::int(x as u64, 8, Unsigned)
    }

    fn values(x: i64, ctors: &[fn(i64) -> Value<'static>]) -> Vec<Value<'static>> {
        ctors.iter().map(|ctor| ctor(x)).collect()
    }

    /// Evaluate `v1 op v2` for every combination from both sets, in both
    /// operand orders, and expect the same typed result.
    fn test_binary_table(
        op: BinaryOp,
        cases: &[(Vec<Value<'static>>, Vec<Value<'static>>, Value<'static>)],
    ) {
        for (set1, set2, expected) in cases {
            for v1 in set1 {
                for v2 in set2 {
                    for (v1, v2) in [(v1, v2), (v2, v1)] {
                        let got = eval_binary(op, v1.clone(), v2.clone());
                        assert_eq!(
                            &got,
                            expected,
                            "{} {} {}",
                            v1.dump(),
                            op.symbol(),
                            v2.dump(),
                        );
                    }
                }
            }
        }
    }

    const ALL_THROUGH_S32: &[fn(i64) -> Value<'static>] = &[s8, u8v, s16, u16v, s32];

    #[test]
    fn conversion_test() {
        test_binary_table(
            BinaryOp::Add,
            &[
                (values(0, ALL_THROUGH_S32), values(0, ALL_THROUGH_S32), s32(0)),
                (
                    values(0, &[s8, u8v, s16, u16v, s32, u32v]),
                    values(0, &[u32v]),
                    u32v(0),
                ),
                (
                    values(0, &[s8, u8v, s16, u16v, s32, u32v, s64]),
                    values(0, &[s64]),
                    s64(0),
                ),
                (
                    values(0, &[s8, u8v, s16, u16v, s32, u32v, s64, u64v]),
                    values(0, &[u64v]),
                    u64v(0),
                ),
            ],
        );
    }

    #[test]
    fn addition_test() {
        let max_u8 = 0xff;
        let max_s8 = 0x7f;
        let min_s8 = -0x80;
        let max_u16 = 0xffff;
        let max_s16 = 0x7fff;
        let min_s16 = -0x8000;
        let max_u32 = 0xffffffff;
        let max_s32 = 0x7fffffff;
        let min_s32 = -0x80000000;
        let max_s64 = i64::MAX;
        let min_s64 = i64::MIN;

        test_binary_table(
            BinaryOp::Add,
            &[
                // 0 + 1 == 1
                (values(0, ALL_THROUGH_S32), values(1, ALL_THROUGH_S32), s32(1)),
                (values(0, &[u32v]), values(1, ALL_THROUGH_S32), u32v(1)),
                // 1 + -1 == 0
                (values(1, ALL_THROUGH_S32), values(-1, &[s8, s16, s32]), s32(0)),
                (values(1, &[u32v]), values(-1, &[s8, s16, s32]), u32v(0)),
                // 0xff + 1 == 0x100
                (
                    values(max_u8, ALL_THROUGH_S32),
                    values(1, ALL_THROUGH_S32),
                    s32(max_u8 + 1),
                ),
                (
                    values(max_u8, ALL_THROUGH_S32),
                    values(1, &[u32v]),
                    u32v(max_u8 + 1),
                ),
                (
                    values(max_u8, &[s8, u8v, s16, u16v, s32, u32v, s64]),
                    values(1, &[u64v]),
                    u64v(max_u8 + 1),
                ),
                // 0x7f + 1 == 0x80
                (
                    values(max_s8, ALL_THROUGH_S32),
                    values(1, ALL_THROUGH_S32),
                    s32(max_s8 + 1),
                ),
                // -0x80 + -1 == -0x81
                (
                    values(min_s8, &[s8, s16, s32]),
                    values(-1, &[s8, s16, s32]),
                    s32(min_s8 - 1),
                ),
                (
                    values(min_s8, &[s64]),
                    values(-1, &[s8, s16, s32, s64]),
                    s64(min_s8 - 1),
                ),
                // 0xffff + 1 == 0x10000
                (
                    values(max_u16, ALL_THROUGH_S32),
                    values(1, ALL_THROUGH_S32),
                    s32(max_u16 + 1),
                ),
                // 0x7fff + 1 == 0x8000
                (
                    values(max_s16, ALL_THROUGH_S32),
                    values(1, ALL_THROUGH_S32),
                    s32(max_s16 + 1),
                ),
                // -0x8000 + -1 == -0x8001
                (
                    values(min_s16, &[s16, s32]),
                    values(-1, &[s8, s16, s32]),
                    s32(min_s16 - 1),
                ),
                // 0xffffffff + 1 == 0 in 32 bits, 0x100000000 in 64
                (
                    values(max_u32, &[u32v]),
                    values(1, &[s8, u8v, s16, u16v, s32, u32v]),
                    u32v(0),
                ),
                (values(max_u32, &[u32v, s64]), values(1, &[u64v]), u64v(max_u32 + 1)),
                (
                    values(max_u32, &[u64v]),
                    values(1, &[s8, u8v, s16, u16v, s32, u32v, s64]),
                    u64v(max_u32 + 1),
                ),
                // 0x7fffffff + 1 == 0x80000000
                (
                    values(max_s32, &[s32]),
                    values(1, ALL_THROUGH_S32),
                    s32(min_s32),
                ),
                (values(max_s32, &[s32]), values(1, &[u32v]), u32v(max_s32 + 1)),
                (
                    values(max_s32, &[u32v]),
                    values(1, ALL_THROUGH_S32),
                    u32v(max_s32 + 1),
                ),
                // -0x80000000 + -1 wraps in 32 bits
                (values(min_s32, &[s32]), values(-1, &[s8, s16, s32]), s32(max_s32)),
                (
                    values(min_s32, &[s64]),
                    values(-1, &[s8, s16, s32, s64]),
                    s64(min_s32 - 1),
                ),
                // 0xffffffffffffffff + 1 == 0
                (
                    vec![Value::int(u64::MAX, 8, Unsigned)],
                    values(1, &[s8, u8v, s16, u16v, s32, u32v, s64, u64v]),
                    u64v(0),
                ),
                // 0x7fffffffffffffff + 1 wraps to the minimum
                (
                    values(max_s64, &[s64]),
                    values(1, &[s8, u8v, s16, u16v, s32, u32v, s64]),
                    s64(min_s64),
                ),
                (
                    values(max_s64, &[s64]),
                    values(1, &[u64v]),
                    Value::int(max_s64 as u64 + 1, 8, Unsigned),
                ),
                (
                    values(max_s64, &[u64v]),
                    values(1, &[s8, u8v, s16, u16v, s32, s64, u64v]),
                    Value::int(max_s64 as u64 + 1, 8, Unsigned),
                ),
            ],
        );
    }

    fn eval_str(input: &str) -> Value<'static> {
        let scope = TestScope::new();
        let exprs = parse_exprs(input, &scope)
            .unwrap_or_else(|err| panic!("failed to parse {input:?}: {err}"));
        assert_eq!(exprs.len(), 1, "more than one expression in {input:?}");
        exprs[0].eval(&BasicEnv).into_static()
    }

    fn test_truth_table(cases: &[&str], expect: bool) {
        for case in cases {
            let value = eval_str(case);
            let x = value
                .as_int()
                .unwrap_or_else(|| panic!("expected integer from {case:?}, got {}", value.dump()));
            assert_eq!(x.as_bool(), expect, "{case:?} ({})", value.dump());
        }
    }

    #[test]
    fn expression_false_test() {
        test_truth_table(
            &[
                "0==1", "1==0", "0!=0", "1!=1", "0>0", "0>1", "0>=1", "1<0", "0<0", "1<=0",
                "-1>0", "0<-1", "-1>=0", "0<=-1",
            ],
            false,
        );
    }

    #[test]
    fn expression_true_test() {
        test_truth_table(
            &[
                "0==0",
                "1==1",
                "0!=1",
                "1!=0",
                "0<1",
                "0<=0",
                "0<=1",
                "1>0",
                "0>=0",
                "1>=0",
                "0u<1u",
                "0u<=0u",
                "0u<=1u",
                "1u>0u",
                "0u>=0u",
                "1u>=0u",
                "-1<0",
                "0>-1",
                "-1<=0",
                "0>=-1",
                "1+1==2",
                "1-1==0",
                "1*1==1",
                "2*3==6",
                "8/4==2",
                "8%4==0",
                "8%3==2",
                "8/-3==-2",
                "8%-3==2",
                "-8/3==-2",
                "-8%3==-2",
                "-8/-3==2",
                "-8%-3==-2",
                "(1&3)==1",
                "(1&2)==0",
                "(1|3)==3",
                "(1|2)==3",
                "(1^2)==3",
                "(1^3)==2",
                "(1&&1)==1",
                "(0&&1)==0",
                "(0&&0)==0",
                "(1||1)==1",
                "(0||1)==1",
                "(0||0)==0",
                "1<<2==4",
                "1<<0==1",
                "4>>2==1",
                "4>>3==0",
                "-8>>1==-4",
                "0xffffffffu<<1==0xfffffffeu",
                "1?2:3==2",
                "0?2:3==3",
                "-(1)==-1",
                "+(1)==1",
                "!0",
                "!1==0",
                "-1u==0xffffffff",
                "+1u==1",
                "~0==0xffffffff",
                "~0u==0xffffffff",
                "~0ll==0xffffffffffffffffll",
                "~0ull==0xffffffffffffffffull",
            ],
            true,
        );
    }

    #[test]
    fn wrap_around_test() {
        // 0xff as u8 + 1 as int promotes and widens.
        assert_eq!(
            eval_binary(BinaryOp::Add, u8v(0xff), s32(1)),
            Value::int(0x100, 4, Signed)
        );
        // Unsigned 32-bit addition wraps.
        assert_eq!(
            eval_str("0xffffffffu + 1u"),
            Value::int(0, 4, Unsigned)
        );
        // Signed 64-bit addition wraps to the minimum.
        assert_eq!(
            eval_binary(BinaryOp::Add, s64(i64::MAX), s8(1)),
            Value::int(0x8000_0000_0000_0000, 8, Signed)
        );
        // Balancing turns both sides unsigned.
        assert_eq!(
            eval_str("0x7fffffff + 1u"),
            Value::int(0x8000_0000, 4, Unsigned)
        );
        assert_eq!(
            eval_str("~0ull"),
            Value::int(u64::MAX, 8, Unsigned)
        );
    }

    #[test]
    fn division_error_test() {
        assert_eq!(eval_str("1/0"), Value::Err(EvalError::DivisionByZero));
        assert_eq!(eval_str("1%0"), Value::Err(EvalError::DivisionByZero));
    }

    #[test]
    fn ternary_laziness_test() {
        // The untaken arm must not be evaluated, even when it holds an
        // error.
        assert_eq!(eval_str("1 ? 2 : 1/0"), Value::int(2, 4, Signed));
        assert_eq!(eval_str("0 ? 1/0 : 3"), Value::int(3, 4, Signed));
        // Balancing against the untaken constant arm still applies.
        assert_eq!(eval_str("1 ? 2 : 3u"), Value::int(2, 4, Unsigned));
    }

    #[test]
    fn balance_test() {
        type T = IntType;
        let s32t = T::new(4, Signed);
        let u32t = T::new(4, Unsigned);
        let s64t = T::new(8, Signed);
        let u64t = T::new(8, Unsigned);

        assert_eq!(T::balance(s32t, s32t), (s32t, s32t));
        assert_eq!(T::balance(s32t, u32t), (u32t, u32t));
        assert_eq!(T::balance(u32t, s64t), (s64t, s64t));
        assert_eq!(T::balance(s64t, u64t), (u64t, u64t));
        assert_eq!(T::balance(s32t, s64t), (s64t, s64t));
        assert_eq!(T::balance(u32t, u64t), (u64t, u64t));
    }

    #[test]
    fn idempotence_test() {
        let scope = TestScope::new();
        let exprs = parse_exprs("a + 1 < 3", &scope).unwrap();
        let first = exprs[0].eval(&BasicEnv).into_static();
        let second = exprs[0].eval(&BasicEnv).into_static();
        assert_eq!(first, second);
    }
}
