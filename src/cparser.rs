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

//! Lexer and parser for the restricted C expression subset used by ftrace
//! `print fmt` strings, e.g.:
//!
//! ```text
//! print fmt: "prev_comm=%s prev_pid=%d prev_state=%s", REC->prev_comm,
//!   REC->prev_pid, REC->prev_state & (1024-1) ? __print_flags(...) : "R"
//! ```
//!
//! The parser reduces the flat token list in place: bracketed groups first,
//! then literals, symbols, unary operators and casts, binary operators by
//! precedence, ternaries, and comma lists. Constant subtrees are folded as
//! they are built.

use core::fmt::{Debug, Formatter};
use std::{string::String as StdString, sync::Arc};

use itertools::Itertools as _;
use smartstring::alias::String;

use crate::{
    cinterp::{self, EvalError, Function, IntType, Value, Variable},
    header::{Abi, Identifier, Signedness},
    str::Str,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    Plus,
    Minus,
    Bang,
    Tilde,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    Amp,
    Caret,
    Pipe,
    AndAnd,
    OrOr,
    Question,
    Colon,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Arrow,
}

impl Punct {
    pub fn symbol(self) -> &'static str {
        use Punct::*;
        match self {
            Plus => "+",
            Minus => "-",
            Bang => "!",
            Tilde => "~",
            Star => "*",
            Slash => "/",
            Percent => "%",
            Shl => "<<",
            Shr => ">>",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            EqEq => "==",
            Ne => "!=",
            Amp => "&",
            Caret => "^",
            Pipe => "|",
            AndAnd => "&&",
            OrOr => "||",
            Question => "?",
            Colon => ":",
            Comma => ",",
            LParen => "(",
            RParen => ")",
            LBrace => "{",
            RBrace => "}",
            Arrow => "->",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// String literal without the surrounding quotes; backslash escapes are
    /// preserved as written.
    Str(String),
    /// Numeric literal, including any radix prefix and integer suffix.
    Num(String),
    /// Identifier; `->` is a continuation character so `REC->field` is one
    /// symbol.
    Symbol(Identifier),
    Punct(Punct),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CParseError {
    #[error("unterminated string")]
    UnterminatedString,

    #[error("unknown token {0:?}")]
    UnknownToken(char),

    #[error("missing closing token for {0:?}")]
    MissingClose(char),

    #[error("unbalanced {0:?}")]
    Unbalanced(char),

    #[error("empty parens without a function call")]
    EmptyParens,

    #[error("empty braces")]
    EmptyBraces,

    #[error("invalid type name {0:?}")]
    InvalidTypeName(StdString),

    #[error("expected expression to the left of {0}")]
    ExpectedExprBefore(&'static str),

    #[error("expected expression to the right of {0}")]
    ExpectedExprAfter(&'static str),

    #[error("expected ':' after '?'")]
    ExpectedColon,

    #[error("failed to parse expression {0}")]
    Unreduced(StdString),
}

#[inline]
fn is_symbol_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[inline]
fn is_symbol_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn punct2(a: u8, b: u8) -> Option<Punct> {
    use Punct::*;
    Some(match (a, b) {
        (b'<', b'<') => Shl,
        (b'>', b'>') => Shr,
        (b'<', b'=') => Le,
        (b'>', b'=') => Ge,
        (b'=', b'=') => EqEq,
        (b'!', b'=') => Ne,
        (b'&', b'&') => AndAnd,
        (b'|', b'|') => OrOr,
        (b'-', b'>') => Arrow,
        _ => return None,
    })
}

fn punct1(c: u8) -> Option<Punct> {
    use Punct::*;
    Some(match c {
        b'+' => Plus,
        b'-' => Minus,
        b'!' => Bang,
        b'~' => Tilde,
        b'*' => Star,
        b'/' => Slash,
        b'%' => Percent,
        b'<' => Lt,
        b'>' => Gt,
        b'&' => Amp,
        b'^' => Caret,
        b'|' => Pipe,
        b'?' => Question,
        b':' => Colon,
        b',' => Comma,
        b'(' => LParen,
        b')' => RParen,
        b'{' => LBrace,
        b'}' => RBrace,
        _ => return None,
    })
}

/// Tokenize an expression. ASCII-only by construction: identifier and digit
/// classification is byte-level.
pub fn lex(input: &str) -> Result<Vec<Token>, CParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
        } else if c == b'"' {
            let start = pos + 1;
            let mut i = start;
            loop {
                match bytes.get(i) {
                    None => return Err(CParseError::UnterminatedString),
                    Some(b'\\') => {
                        if i + 1 >= bytes.len() {
                            return Err(CParseError::UnterminatedString);
                        }
                        i += 2;
                    }
                    Some(b'"') => break,
                    Some(_) => i += 1,
                }
            }
            tokens.push(Token::Str(input[start..i].into()));
            pos = i + 1;
        } else if c.is_ascii_digit() {
            let start = pos;
            while pos < bytes.len() && is_symbol_byte(bytes[pos]) {
                pos += 1;
            }
            tokens.push(Token::Num(input[start..pos].into()));
        } else if is_symbol_start(c) {
            let start = pos;
            loop {
                if pos < bytes.len() && is_symbol_byte(bytes[pos]) {
                    pos += 1;
                } else if pos + 1 < bytes.len() && bytes[pos] == b'-' && bytes[pos + 1] == b'>' {
                    pos += 2;
                } else {
                    break;
                }
            }
            tokens.push(Token::Symbol(input[start..pos].into()));
        } else {
            let two = bytes
                .get(pos + 1)
                .and_then(|&next| punct2(c, next));
            match two.or_else(|| punct1(c)) {
                Some(p) => {
                    tokens.push(Token::Punct(p));
                    pos += if two.is_some() { 2 } else { 1 };
                }
                None => return Err(CParseError::UnknownToken(c as char)),
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Tilde,
    Bang,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::Tilde => "~",
            UnaryOp::Bang => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        use BinaryOp::*;
        match self {
            Mul => "*",
            Div => "/",
            Mod => "%",
            Add => "+",
            Sub => "-",
            Shl => "<<",
            Shr => ">>",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            Eq => "==",
            Ne => "!=",
            BitAnd => "&",
            BitXor => "^",
            BitOr => "|",
            And => "&&",
            Or => "||",
        }
    }
}

/// How a scope resolves a symbol found while parsing.
pub enum VarRes {
    /// Known constant; the expression collapses to its value so operators on
    /// it fold at parse time.
    Constant(Value<'static>),
    /// Runtime variable such as an event field.
    Runtime(Arc<dyn Variable>),
    /// Unresolved; evaluating the reference yields an error value.
    Unknown,
}

/// Symbol resolution scope for parsing.
pub trait ParseEnv {
    fn variable(&self, id: &str) -> VarRes;
    fn function(&self, id: &str) -> Option<Arc<dyn Function>>;
    /// Expansion of a typedef into C type keywords, e.g. `"unsigned int"`.
    fn typedef(&self, id: &str) -> Option<&str>;
    fn abi(&self) -> &Abi;
}

/// Parsed expression tree.
#[derive(Clone)]
pub enum Expr {
    /// Value known at parse time. The original expression, when there is
    /// one, is kept for dumping.
    Constant(Option<Box<Expr>>, Value<'static>),
    Variable(Option<Arc<dyn Variable>>, Identifier),
    Func(Option<Arc<dyn Function>>, Identifier, Vec<Expr>),
    Type(IntType),
    Cast(IntType, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    /// Brace-enclosed group, as used by the `{mask, label}` arguments of
    /// `__print_flags`.
    Struct(Vec<Expr>),
}

impl Debug for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(f, "{}", self.dump())
    }
}

impl Expr {
    pub fn new_unary(op: UnaryOp, operand: Expr) -> Expr {
        let constant = operand.is_constant();
        maybe_fold(Expr::Unary(op, Box::new(operand)), constant)
    }

    pub fn new_binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let constant = left.is_constant() && right.is_constant();
        maybe_fold(Expr::Binary(op, Box::new(left), Box::new(right)), constant)
    }

    pub fn new_ternary(cond: Expr, if_true: Expr, if_false: Expr) -> Expr {
        let constant =
            cond.is_constant() && if_true.is_constant() && if_false.is_constant();
        maybe_fold(
            Expr::Ternary(Box::new(cond), Box::new(if_true), Box::new(if_false)),
            constant,
        )
    }

    pub fn new_cast(typ: IntType, operand: Expr) -> Expr {
        let constant = operand.is_constant();
        maybe_fold(Expr::Cast(typ, Box::new(operand)), constant)
    }

    pub fn new_func(
        function: Option<Arc<dyn Function>>,
        name: Identifier,
        args: Vec<Expr>,
    ) -> Expr {
        Expr::Func(function, name, args)
    }

    /// Append `right` to `left`, flattening existing lists on both sides.
    pub fn new_list(left: Expr, right: Expr) -> Expr {
        let mut items = match left {
            Expr::List(items) => items,
            left => vec![left],
        };
        match right {
            Expr::List(rest) => items.extend(rest),
            right => items.push(right),
        }
        let constant = items.iter().all(Expr::is_constant);
        maybe_fold(Expr::List(items), constant)
    }

    pub fn new_struct(items: Vec<Expr>) -> Expr {
        Expr::Struct(items)
    }

    /// A constant expression always evaluates to the same value, in any
    /// context.
    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(..))
    }

    /// Type of the expression when it is an integer constant.
    pub fn const_int_type(&self) -> Option<IntType> {
        match self {
            Expr::Constant(_, Value::Int(x)) => Some(x.typ()),
            _ => None,
        }
    }

    /// Canonical fully-parenthesized rendering.
    pub fn dump(&self) -> StdString {
        match self {
            Expr::Constant(Some(orig), _) => orig.dump(),
            Expr::Constant(None, v) => v.dump(),
            Expr::Variable(_, name) => name.to_string(),
            Expr::Func(_, name, args) => {
                format!("{}({})", name, args.iter().map(Expr::dump).join(", "))
            }
            Expr::Type(typ) => typ.dump(),
            Expr::Cast(typ, e) => format!("({}){}", typ.dump(), e.dump()),
            Expr::Unary(op, e) => format!("({}{})", op.symbol(), e.dump()),
            Expr::Binary(op, l, r) => {
                format!("({} {} {})", l.dump(), op.symbol(), r.dump())
            }
            Expr::Ternary(c, t, f) => {
                format!("({} ? {} : {})", c.dump(), t.dump(), f.dump())
            }
            Expr::List(items) => format!("{{{}}}", items.iter().map(Expr::dump).join(", ")),
            Expr::Struct(items) => {
                format!("{{{}}}", items.iter().map(Expr::dump).join(", "))
            }
        }
    }
}

#[inline]
fn maybe_fold(expr: Expr, constant: bool) -> Expr {
    if constant {
        cinterp::fold(expr)
    } else {
        expr
    }
}

/// Build a constant expression from a numeric literal. A literal that does
/// not fit the type selected by its suffix becomes an error value rather
/// than a parse failure.
fn number_value(text: &str) -> Value<'static> {
    let lower = text.to_ascii_lowercase();
    let digits = lower.trim_end_matches(['u', 'l']);
    let suffix = &lower[digits.len()..];
    let (size, signedness) = match suffix {
        "" => (4, Signedness::Signed),
        "u" => (4, Signedness::Unsigned),
        "l" | "ll" => (8, Signedness::Signed),
        "lu" | "ul" | "llu" | "ull" => (8, Signedness::Unsigned),
        _ => return Value::Err(EvalError::InvalidIntegerSuffix(suffix.into())),
    };

    let (digits, radix) = if let Some(hex) = digits.strip_prefix("0x") {
        (hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (&digits[1..], 8)
    } else {
        (digits, 10)
    };

    match u64::from_str_radix(digits, radix) {
        Err(_) => Value::Err(EvalError::InvalidIntegerConstant(text.into())),
        Ok(x) if size < 8 && x >> (size * 8) != 0 => {
            Value::Err(EvalError::InvalidIntegerConstant(text.into()))
        }
        Ok(x) => Value::int(x, size, signedness),
    }
}

fn type_keyword_rank(word: &str) -> Option<u8> {
    Some(match word {
        "signed" | "unsigned" => 1,
        "short" | "long" => 2,
        "void" | "char" | "int" | "_Bool" => 3,
        _ => return None,
    })
}

#[inline]
fn is_type_keyword(word: &str) -> bool {
    type_keyword_rank(word).is_some()
}

fn int_type_by_name(name: &str) -> Option<IntType> {
    use Signedness::*;
    let (size, signedness) = match name {
        "char" | "signed char" => (1, Signed),
        "unsigned char" => (1, Unsigned),
        "short" | "signed short" | "short int" | "signed short int" => (2, Signed),
        "unsigned short" | "unsigned short int" => (2, Unsigned),
        "int" | "signed" | "signed int" => (4, Signed),
        "unsigned" | "unsigned int" => (4, Unsigned),
        "long" | "signed long" | "long int" | "signed long int" => (8, Signed),
        "unsigned long" | "unsigned long int" => (8, Unsigned),
        "long long" | "signed long long" | "long long int" | "signed long long int" => (8, Signed),
        "unsigned long long" | "unsigned long long int" => (8, Unsigned),
        _ => return None,
    };
    Some(IntType::new(size, signedness))
}

/// Resolve a keyword sequence to an integer type, reordering the keywords
/// into the canonical sign-length-base order first so that e.g. `int
/// unsigned` and `unsigned int` are the same type.
fn int_type_from_keywords(words: &[&str]) -> Result<IntType, CParseError> {
    if words.iter().any(|w| !is_type_keyword(w)) {
        return Err(CParseError::InvalidTypeName(words.join(" ")));
    }
    let mut sorted = words.to_vec();
    sorted.sort_by_key(|w| type_keyword_rank(w));
    let joined = sorted.join(" ");
    int_type_by_name(&joined).ok_or(CParseError::InvalidTypeName(joined))
}

enum Item {
    Tok(Token),
    Node(Expr),
    /// Parenthesized type waiting for the expression it casts. The cast
    /// target is only known once unary operators are handled.
    CastTo(IntType),
}

fn items_dump(items: &[Item]) -> StdString {
    items
        .iter()
        .map(|item| match item {
            Item::Tok(Token::Str(s)) => format!("`\"{s}\"`"),
            Item::Tok(Token::Num(s)) => format!("`{s}`"),
            Item::Tok(Token::Symbol(s)) => format!("`{s}`"),
            Item::Tok(Token::Punct(p)) => format!("`{}`", p.symbol()),
            Item::Node(e) => e.dump(),
            Item::CastTo(t) => format!("<<<({})>>>", t.dump()),
        })
        .join(" ")
}

#[inline]
fn is_node(item: &Item) -> bool {
    matches!(item, Item::Node(_))
}

/// Search leftward from `begin` (or the end of the list when `begin < 0`)
/// for a punctuation token in `set`.
fn find_punct_rev(items: &[Item], begin: isize, set: &[Punct]) -> (isize, Option<Punct>) {
    if items.is_empty() {
        return (-1, None);
    }
    let start = if begin < 0 {
        items.len() - 1
    } else {
        (begin as usize).min(items.len() - 1)
    };
    for i in (0..=start).rev() {
        if let Item::Tok(Token::Punct(p)) = &items[i] {
            if set.contains(p) {
                return (i as isize, Some(*p));
            }
        }
    }
    (-1, None)
}

/// Search leftward from `begin` (or the end when `begin < 0`) for a cast
/// placeholder.
fn find_cast_rev(items: &[Item], begin: isize) -> isize {
    if items.is_empty() {
        return -1;
    }
    let start = if begin < 0 {
        items.len() - 1
    } else {
        (begin as usize).min(items.len() - 1)
    };
    for i in (0..=start).rev() {
        if matches!(items[i], Item::CastTo(_)) {
            return i as isize;
        }
    }
    -1
}

fn find_punct_fwd(items: &[Item], set: &[(Punct, BinaryOp)]) -> Option<(usize, BinaryOp)> {
    items.iter().enumerate().find_map(|(i, item)| match item {
        Item::Tok(Token::Punct(p)) => set
            .iter()
            .find(|(punct, _)| punct == p)
            .map(|(_, op)| (i, *op)),
        _ => None,
    })
}

const BINARY_PRECEDENCE: &[&[(Punct, BinaryOp)]] = &[
    &[
        (Punct::Star, BinaryOp::Mul),
        (Punct::Slash, BinaryOp::Div),
        (Punct::Percent, BinaryOp::Mod),
    ],
    &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
    &[(Punct::Shl, BinaryOp::Shl), (Punct::Shr, BinaryOp::Shr)],
    &[
        (Punct::Lt, BinaryOp::Lt),
        (Punct::Le, BinaryOp::Le),
        (Punct::Gt, BinaryOp::Gt),
        (Punct::Ge, BinaryOp::Ge),
    ],
    &[(Punct::EqEq, BinaryOp::Eq), (Punct::Ne, BinaryOp::Ne)],
    &[(Punct::Amp, BinaryOp::BitAnd)],
    &[(Punct::Caret, BinaryOp::BitXor)],
    &[(Punct::Pipe, BinaryOp::BitOr)],
    &[(Punct::AndAnd, BinaryOp::And)],
    &[(Punct::OrOr, BinaryOp::Or)],
];

const UNARY_PUNCTS: &[Punct] = &[Punct::Plus, Punct::Minus, Punct::Tilde, Punct::Bang];

/// Parse a comma-separated sequence of expressions, as found after
/// `print fmt:`.
pub fn parse_exprs(input: &str, penv: &dyn ParseEnv) -> Result<Vec<Expr>, CParseError> {
    let tokens = lex(input)?;
    let items = tokens.into_iter().map(Item::Tok).collect();
    Ok(match reduce_items(items, penv)? {
        None => vec![],
        Some(Expr::List(exprs)) => exprs,
        Some(expr) => vec![expr],
    })
}

/// Reduce a bracket-free slice of the token list to at most one expression.
fn reduce_items(mut items: Vec<Item>, penv: &dyn ParseEnv) -> Result<Option<Expr>, CParseError> {
    // Brackets, innermost groups reduced recursively.
    loop {
        let open = items.iter().position(|item| {
            matches!(
                item,
                Item::Tok(Token::Punct(Punct::LParen | Punct::LBrace))
            )
        });
        let Some(open) = open else { break };
        let brace = matches!(items[open], Item::Tok(Token::Punct(Punct::LBrace)));
        let expected = if brace { Punct::RBrace } else { Punct::RParen };

        let mut depth = 1usize;
        let mut close = None;
        for (k, item) in items.iter().enumerate().skip(open + 1) {
            if let Item::Tok(Token::Punct(p)) = item {
                match p {
                    Punct::LParen | Punct::LBrace => depth += 1,
                    Punct::RParen | Punct::RBrace => {
                        depth -= 1;
                        if depth == 0 {
                            if *p != expected {
                                return Err(CParseError::Unbalanced(
                                    p.symbol().chars().next().unwrap_or('?'),
                                ));
                            }
                            close = Some(k);
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
        let Some(close) = close else {
            return Err(CParseError::MissingClose(if brace { '{' } else { '(' }));
        };

        let inner: Vec<Item> = items.drain(open + 1..close).collect();
        let inner_expr = reduce_items(inner, penv)?;
        // The closing token now sits right after the opening one.

        if brace {
            let Some(inner_expr) = inner_expr else {
                return Err(CParseError::EmptyBraces);
            };
            let fields = match inner_expr {
                Expr::List(items) => items,
                expr => vec![expr],
            };
            items.splice(open..=open + 1, [Item::Node(Expr::new_struct(fields))]);
            continue;
        }
        match inner_expr {
            Some(Expr::Type(typ)) => {
                items.splice(open..=open + 1, [Item::CastTo(typ)]);
            }
            inner_expr => {
                let called = match open.checked_sub(1).map(|i| &items[i]) {
                    Some(Item::Tok(Token::Symbol(name))) => Some(name.clone()),
                    _ => None,
                };
                match (called, inner_expr) {
                    (Some(name), inner_expr) => {
                        let args = match inner_expr {
                            None => vec![],
                            Some(Expr::List(items)) => items,
                            Some(expr) => vec![expr],
                        };
                        let function = penv.function(&name);
                        items.splice(
                            open - 1..=open + 1,
                            [Item::Node(Expr::new_func(function, name, args))],
                        );
                    }
                    (None, Some(inner_expr)) => {
                        items.splice(open..=open + 1, [Item::Node(inner_expr)]);
                    }
                    (None, None) => return Err(CParseError::EmptyParens),
                }
            }
        }
    }

    // Literals.
    for item in items.iter_mut() {
        if let Item::Tok(tok) = item {
            match tok {
                Token::Num(text) => *item = Item::Node(Expr::Constant(None, number_value(text))),
                Token::Str(text) => {
                    let s = Str::new_owned(core::mem::take(text));
                    *item = Item::Node(Expr::Constant(None, Value::Str(s)));
                }
                _ => {}
            }
        }
    }

    // C concatenates adjacent string literals; multi-line print fmt strings
    // rely on it.
    let mut i = 0;
    while i + 1 < items.len() {
        let pair = matches!(
            (&items[i], &items[i + 1]),
            (
                Item::Node(Expr::Constant(_, Value::Str(_))),
                Item::Node(Expr::Constant(_, Value::Str(_)))
            )
        );
        if !pair {
            i += 1;
            continue;
        }
        if let Item::Node(Expr::Constant(_, Value::Str(second))) = items.remove(i + 1) {
            if let Item::Node(Expr::Constant(_, Value::Str(first))) = &mut items[i] {
                let mut joined: String = (&**first).into();
                joined.push_str(&second);
                *first = Str::new_owned(joined);
            }
        }
    }

    // Symbols: type keyword runs, typedefs, then variables.
    loop {
        let found = items
            .iter()
            .position(|item| matches!(item, Item::Tok(Token::Symbol(_))));
        let Some(i) = found else { break };

        let keywords: Vec<Identifier> = items[i..]
            .iter()
            .map_while(|item| match item {
                Item::Tok(Token::Symbol(s)) if is_type_keyword(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        if !keywords.is_empty() {
            let words: Vec<&str> = keywords.iter().map(|s| s.as_str()).collect();
            let typ = int_type_from_keywords(&words)?;
            items.splice(i..i + keywords.len(), [Item::Node(Expr::Type(typ))]);
            continue;
        }

        let name = match &items[i] {
            Item::Tok(Token::Symbol(s)) => s.clone(),
            _ => continue,
        };
        if let Some(expansion) = penv.typedef(&name) {
            let words: Vec<&str> = expansion.split_whitespace().collect();
            let typ = int_type_from_keywords(&words)?;
            items[i] = Item::Node(Expr::Type(typ));
            continue;
        }
        items[i] = Item::Node(match penv.variable(&name) {
            VarRes::Constant(value) => {
                Expr::Constant(Some(Box::new(Expr::Variable(None, name))), value)
            }
            VarRes::Runtime(var) => Expr::Variable(Some(var), name),
            VarRes::Unknown => Expr::Variable(None, name),
        });
    }

    // Unary operators and casts, right to left. The rightmost cast
    // placeholder outranks a unary operator to its left; `+`/`-` with a
    // value on their left are binary and handled later.
    let mut cursor: isize = -1;
    loop {
        let (ti, punct) = find_punct_rev(&items, cursor, UNARY_PUNCTS);
        let ci = find_cast_rev(&items, ti);
        if ti < 0 && ci < 0 {
            break;
        }

        if ci > ti {
            let i = ci as usize;
            if i + 1 >= items.len() || !is_node(&items[i + 1]) {
                return Err(CParseError::ExpectedExprAfter("cast"));
            }
            let typ = match &items[i] {
                Item::CastTo(typ) => Some(*typ),
                _ => None,
            };
            if let (Some(typ), Item::Node(operand)) = (typ, items.remove(i + 1)) {
                items[i] = Item::Node(Expr::new_cast(typ, operand));
            }
            cursor = ci;
            continue;
        }

        let i = ti as usize;
        let punct = punct.unwrap_or(Punct::Plus);
        if matches!(punct, Punct::Plus | Punct::Minus) && i > 0 && is_node(&items[i - 1]) {
            cursor = ti - 1;
            continue;
        }
        if i + 1 >= items.len() || !is_node(&items[i + 1]) {
            return Err(CParseError::ExpectedExprAfter(punct.symbol()));
        }
        let op = match punct {
            Punct::Minus => UnaryOp::Minus,
            Punct::Tilde => UnaryOp::Tilde,
            Punct::Bang => UnaryOp::Bang,
            _ => UnaryOp::Plus,
        };
        if let Item::Node(operand) = items.remove(i + 1) {
            items[i] = Item::Node(Expr::new_unary(op, operand));
        }
        cursor = ti;
    }

    // Binary operators, one precedence level at a time, left to right.
    for level in BINARY_PRECEDENCE {
        while let Some((i, op)) = find_punct_fwd(&items, level) {
            if i == 0 || !is_node(&items[i - 1]) {
                return Err(CParseError::ExpectedExprBefore(op.symbol()));
            }
            if i + 1 >= items.len() || !is_node(&items[i + 1]) {
                return Err(CParseError::ExpectedExprAfter(op.symbol()));
            }
            if let (Item::Node(right), Item::Node(left)) =
                (items.remove(i + 1), items.remove(i - 1))
            {
                items[i - 1] = Item::Node(Expr::new_binary(op, left, right));
            }
        }
    }

    // Ternaries, right to left. As the lowest-precedence operator, the only
    // valid shape left is expr ? expr : expr.
    loop {
        let (qi, _) = find_punct_rev(&items, -1, &[Punct::Question]);
        if qi < 0 {
            break;
        }
        let i = qi as usize;
        if i == 0 || !is_node(&items[i - 1]) {
            return Err(CParseError::ExpectedExprBefore("?"));
        }
        if i + 1 >= items.len() || !is_node(&items[i + 1]) {
            return Err(CParseError::ExpectedExprAfter("?"));
        }
        if !matches!(
            items.get(i + 2),
            Some(Item::Tok(Token::Punct(Punct::Colon)))
        ) {
            return Err(CParseError::ExpectedColon);
        }
        if i + 3 >= items.len() || !is_node(&items[i + 3]) {
            return Err(CParseError::ExpectedExprAfter(":"));
        }
        let right = items.remove(i + 3);
        items.remove(i + 2);
        let middle = items.remove(i + 1);
        let left = items.remove(i - 1);
        if let (Item::Node(left), Item::Node(middle), Item::Node(right)) = (left, middle, right) {
            items[i - 1] = Item::Node(Expr::new_ternary(left, middle, right));
        }
    }

    // Comma lists, left to right.
    loop {
        let comma = items.iter().position(|item| {
            matches!(item, Item::Tok(Token::Punct(Punct::Comma)))
        });
        let Some(i) = comma else { break };
        if i == 0 || !is_node(&items[i - 1]) {
            return Err(CParseError::ExpectedExprBefore(","));
        }
        if i + 1 >= items.len() || !is_node(&items[i + 1]) {
            return Err(CParseError::ExpectedExprAfter(","));
        }
        if let (Item::Node(right), Item::Node(left)) = (items.remove(i + 1), items.remove(i - 1))
        {
            items[i - 1] = Item::Node(Expr::new_list(left, right));
        }
    }

    match items.len() {
        0 => Ok(None),
        1 => match items.pop() {
            Some(Item::Node(expr)) => Ok(Some(expr)),
            Some(item) => Err(CParseError::Unreduced(items_dump(&[item]))),
            None => Ok(None),
        },
        _ => Err(CParseError::Unreduced(items_dump(&items))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        cinterp::{EvalEnv, Function, Value, Variable},
        header::{Endianness, LongSize},
    };

    pub(crate) struct TestScope {
        abi: Abi,
    }

    impl TestScope {
        pub(crate) fn new() -> Self {
            TestScope {
                abi: Abi {
                    endianness: Endianness::Little,
                    long_size: LongSize::Bits64,
                },
            }
        }
    }

    struct One;

    impl Variable for One {
        fn get<'ee>(&self, _env: &'ee dyn EvalEnv) -> Value<'ee> {
            Value::int(1, 4, Signedness::Signed)
        }
    }

    struct CountArgs;

    impl Function for CountArgs {
        fn call<'ee>(&self, _env: &'ee dyn EvalEnv, args: Vec<Value<'ee>>) -> Value<'ee> {
            Value::int(args.len() as u64, 4, Signedness::Signed)
        }
    }

    impl ParseEnv for TestScope {
        fn variable(&self, _id: &str) -> VarRes {
            VarRes::Runtime(Arc::new(One))
        }

        fn function(&self, _id: &str) -> Option<Arc<dyn Function>> {
            Some(Arc::new(CountArgs))
        }

        fn typedef(&self, id: &str) -> Option<&str> {
            (id == "t").then_some("int")
        }

        fn abi(&self) -> &Abi {
            &self.abi
        }
    }

    fn parse_dump(input: &str) -> StdString {
        let scope = TestScope::new();
        let exprs = parse_exprs(input, &scope)
            .unwrap_or_else(|err| panic!("failed to parse {input:?}: {err}"));
        exprs.iter().map(Expr::dump).join(", ")
    }

    fn test_parse_table(cases: &[(&str, &str)]) {
        for (input, expected) in cases {
            assert_eq!(&parse_dump(input), expected, "while parsing {input:?}");
        }
    }

    #[test]
    fn lex_test() {
        use super::Punct::*;
        use super::Token::*;

        assert_eq!(
            lex("REC->comm == \"a\\\"b\" ? 0x1f : 2ULL").unwrap(),
            vec![
                Symbol("REC->comm".into()),
                Punct(EqEq),
                Str("a\\\"b".into()),
                Punct(Question),
                Num("0x1f".into()),
                Punct(Colon),
                Num("2ULL".into()),
            ]
        );
        assert_eq!(
            lex("a <= b << c").unwrap(),
            vec![
                Symbol("a".into()),
                Punct(Le),
                Symbol("b".into()),
                Punct(Shl),
                Symbol("c".into()),
            ]
        );
    }

    #[test]
    fn lex_error_test() {
        assert_eq!(
            lex("\"never closed"),
            Err(CParseError::UnterminatedString)
        );
        assert_eq!(lex("a $ b"), Err(CParseError::UnknownToken('$')));
        assert_eq!(lex("a = b"), Err(CParseError::UnknownToken('=')));
    }

    #[test]
    fn parse_operators_test() {
        test_parse_table(&[
            ("+ a", "(+a)"),
            ("- a", "(-a)"),
            ("! a", "(!a)"),
            ("~ a", "(~a)"),
            ("a*b", "(a * b)"),
            ("a/b", "(a / b)"),
            ("a%b", "(a % b)"),
            ("a+b", "(a + b)"),
            ("a-b", "(a - b)"),
            ("a<<b", "(a << b)"),
            ("a>>b", "(a >> b)"),
            ("a<b", "(a < b)"),
            ("a<=b", "(a <= b)"),
            ("a>b", "(a > b)"),
            ("a>=b", "(a >= b)"),
            ("a==b", "(a == b)"),
            ("a!=b", "(a != b)"),
            ("a&b", "(a & b)"),
            ("a^b", "(a ^ b)"),
            ("a|b", "(a | b)"),
            ("a&&b", "(a && b)"),
            ("a||b", "(a || b)"),
            ("a?b:c", "(a ? b : c)"),
            ("(a)", "a"),
            ("a,b", "a, b"),
            ("{a}", "{a}"),
            ("(int) a", "(int32)a"),
            ("(a)-b", "(a - b)"),
            ("(t)-b", "(int32)(-b)"),
            ("f (a)", "f(a)"),
            ("f(a,b)", "f(a, b)"),
            ("f ()", "f()"),
        ]);
    }

    #[test]
    fn parse_associativity_test() {
        test_parse_table(&[
            ("a * b / c % d", "(((a * b) / c) % d)"),
            ("a % b / c * d", "(((a % b) / c) * d)"),
            ("a + b - c", "((a + b) - c)"),
            ("a - b + c", "((a - b) + c)"),
            ("a << b >> c", "((a << b) >> c)"),
            ("a >> b << c", "((a >> b) << c)"),
            ("a < b <= c > d >= e", "((((a < b) <= c) > d) >= e)"),
            ("a >= b > c <= d < e", "((((a >= b) > c) <= d) < e)"),
            ("a == b != c", "((a == b) != c)"),
            ("a != b == c", "((a != b) == c)"),
            ("a & b & c", "((a & b) & c)"),
            ("a ^ b ^ c", "((a ^ b) ^ c)"),
            ("a | b | c", "((a | b) | c)"),
            ("a && b && c", "((a && b) && c)"),
            ("a || b || c", "((a || b) || c)"),
            ("a ? b ? c : d : e", "(a ? (b ? c : d) : e)"),
        ]);
    }

    #[test]
    fn parse_precedence_test() {
        test_parse_table(&[
            ("a + + b", "(a + (+b))"),
            ("a + b * c", "(a + (b * c))"),
            ("a << b + c", "(a << (b + c))"),
            ("a < b << c", "(a < (b << c))"),
            ("a == b < c", "(a == (b < c))"),
            ("a & b == c", "(a & (b == c))"),
            ("a ^ b & c", "(a ^ (b & c))"),
            ("a | b ^ c", "(a | (b ^ c))"),
            ("a && b | c", "(a && (b | c))"),
            ("a || b && c", "(a || (b && c))"),
            ("a || b ? c || d : e || f", "((a || b) ? (c || d) : (e || f))"),
        ]);
    }

    #[test]
    fn parse_int_literal_test() {
        test_parse_table(&[
            ("1", "(int32)1"),
            ("1U", "(uint32)1"),
            ("1L", "(int64)1"),
            ("1UL", "(uint64)1"),
            ("1LL", "(int64)1"),
            ("1ULL", "(uint64)1"),
            ("1LLU", "(uint64)1"),
            ("1llu", "(uint64)1"),
            ("0xffffffffffffffffLLU", "(uint64)18446744073709551615"),
            ("0xff", "(int32)255"),
            ("077", "(int32)63"),
        ]);
    }

    #[test]
    fn parse_string_concat_test() {
        test_parse_table(&[
            ("\"foo\" \"bar\"", "\"foobar\""),
            ("\"a\" \"b\" \"c\", x", "\"abc\", x"),
        ]);
    }

    #[test]
    fn parse_error_test() {
        let scope = TestScope::new();
        assert!(matches!(
            parse_exprs("a +", &scope),
            Err(CParseError::ExpectedExprAfter("+"))
        ));
        assert!(matches!(
            parse_exprs("* b", &scope),
            Err(CParseError::ExpectedExprBefore("*"))
        ));
        assert!(matches!(
            parse_exprs("(a", &scope),
            Err(CParseError::MissingClose('('))
        ));
        assert!(matches!(
            parse_exprs("a ? b", &scope),
            Err(CParseError::ExpectedColon)
        ));
        assert!(matches!(parse_exprs("()", &scope), Err(CParseError::EmptyParens)));
    }

    #[test]
    fn parse_sched_switch_test() {
        let fmt = r#""prev_comm=%s prev_pid=%d prev_prio=%d prev_state=%s%s ==> next_comm=%s next_pid=%d next_prio=%d", REC->prev_comm, REC->prev_pid, REC->prev_prio, REC->prev_state & (1024-1) ? __print_flags(REC->prev_state & (1024-1), "|", { 1, "S"} , { 2, "D" }, { 4, "T" }, { 8, "t" }, { 16, "Z" }, { 32, "X" }, { 64, "x" }, { 128, "K"}, { 256, "W" }, { 512, "P" }) : "R", REC->prev_state & 1024 ? "+" : "", REC->next_comm, REC->next_pid, REC->next_prio"#;
        let scope = TestScope::new();
        let exprs = parse_exprs(fmt, &scope).unwrap();
        assert_eq!(exprs.len(), 9);
        assert!(exprs[0].is_constant());
        match exprs[0].eval(&crate::cinterp::BasicEnv) {
            Value::Str(_) => {}
            other => panic!("expected string format, got {other:?}"),
        }
    }
}
