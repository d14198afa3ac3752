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

//! Printk-style format handling.
//!
//! A format string compiles once into a list of [PrintAtom]s. Conversion
//! specifiers are rewritten at compile time so the runtime side only ever
//! sees correctly typed values: length modifiers turn into casts around the
//! matching argument, `%p` becomes zero-padded hex over a `u64` cast, and an
//! extension hook lets the event-type layer swap in kernel helper calls for
//! the `%pf`/`%pF`/`%pK` forms.

use std::string::String as StdString;

use bitflags::bitflags;
use log::warn;

use crate::{
    cinterp::{IntType, IntValue, Value},
    cparser::Expr,
    header::{Abi, MemSize, Signedness},
};

/// Conversion characters this formatter understands.
const CONVERSION_SPECIFIERS: &str = "cdiopsuxX%";
/// Characters allowed between `%` and the conversion character.
const VALID_MODIFIERS: &str = "0123456789-#.* +hlLz";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PrintFmtError {
    #[error("expected at least one argument to a print format")]
    NoArguments,

    #[error("expected a constant string as the format, got {0}")]
    NotAConstantFormat(StdString),

    #[error("missing conversion specifier near {0:?}")]
    MissingConversion(StdString),

    #[error("unexpected conversion modifier {0:?}")]
    UnexpectedModifier(char),

    #[error("format string consumes more arguments than provided")]
    MissingArgument,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PrintError {
    #[error("dynamic width in printf format is missing")]
    MissingWidth,

    #[error("dynamic precision in printf format is missing")]
    MissingPrecision,

    #[error("missing value to interpolate in the format string")]
    MissingValue,

    #[error("value cannot be formatted as a string: {0}")]
    NotAString(StdString),

    #[error("value cannot be formatted as an integer: {0}")]
    NotAnInteger(StdString),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintSpecifier {
    Dec,
    Hex,
    UpperHex,
    Oct,
    Char,
    Str,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrintFlags: u8 {
        const LEFT_JUSTIFY = 0x01;
        const ZERO_PAD = 0x02;
        const BASE_PREFIX = 0x04;
        const POSITIVE_SIGN = 0x08;
        const SIGN_PLACEHOLDER = 0x10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintWidth {
    Unmodified,
    Fixed(usize),
    /// `*`: the width is the next argument.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintPrecision {
    Unmodified,
    Fixed(usize),
    /// `.*`: the precision is the next argument.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintAtom {
    /// Literal text, with C escapes already decoded.
    Fixed(StdString),
    Variable {
        spec: PrintSpecifier,
        flags: PrintFlags,
        width: PrintWidth,
        precision: PrintPrecision,
    },
}

/// Compiled format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintFmtStr {
    pub atoms: Vec<PrintAtom>,
}

/// One conversion handed to the extension hook before it is finalized.
///
/// The hook may consume characters from `suffix` (it follows the conversion
/// character) and replace the argument expression, which is how `%pf` turns
/// into a symbol-resolution call rendered with `%s`.
pub struct Conversion<'f> {
    pub specifier: u8,
    pub modifiers: &'f str,
    pub suffix: &'f str,
    pub arg: Expr,
}

/// Compile a parsed `print fmt` argument list: the leading constant string
/// plus one expression per conversion (dynamic widths consume their own).
pub fn compile_printf(
    abi: &Abi,
    mut args: Vec<Expr>,
    hook: Option<&dyn for<'f> Fn(Conversion<'f>) -> Conversion<'f>>,
) -> Result<(PrintFmtStr, Vec<Expr>), PrintFmtError> {
    if args.is_empty() {
        return Err(PrintFmtError::NoArguments);
    }
    let fmt_expr = args.remove(0);
    let fmt: StdString = match &fmt_expr {
        Expr::Constant(_, Value::Str(s)) => (**s).to_owned(),
        expr => return Err(PrintFmtError::NotAConstantFormat(expr.dump())),
    };

    let mut args = args.into_iter();
    let mut atoms = Vec::new();
    let mut out_args = Vec::new();
    let mut fixed = StdString::new();
    let mut rest: &str = &fmt;

    while let Some(pct) = rest.find('%') {
        unescape_into(&mut fixed, &rest[..pct]);
        rest = &rest[pct + 1..];

        let Some(end) = rest.find(|c| CONVERSION_SPECIFIERS.contains(c)) else {
            return Err(PrintFmtError::MissingConversion(rest.into()));
        };
        let raw_spec = rest.as_bytes()[end];
        let raw_modifiers = &rest[..end];
        let suffix = &rest[end + 1..];

        if raw_spec == b'%' {
            match raw_modifiers.chars().next() {
                Some(bad) => return Err(PrintFmtError::UnexpectedModifier(bad)),
                None => {
                    fixed.push('%');
                    rest = suffix;
                    continue;
                }
            }
        }
        if let Some(bad) = raw_modifiers
            .chars()
            .find(|c| !VALID_MODIFIERS.contains(*c))
        {
            return Err(PrintFmtError::UnexpectedModifier(bad));
        }

        // Dynamic width and precision arguments precede the value argument.
        let mut dynamic_args = Vec::new();
        for _ in 0..raw_modifiers.matches('*').count() {
            dynamic_args.push(args.next().ok_or(PrintFmtError::MissingArgument)?);
        }
        let value_arg = args.next().ok_or(PrintFmtError::MissingArgument)?;

        let mut conv = Conversion {
            specifier: raw_spec,
            modifiers: raw_modifiers,
            suffix,
            arg: value_arg,
        };
        if let Some(hook) = hook {
            conv = hook(conv);
        }
        rest = conv.suffix;

        let mut specifier = conv.specifier;
        if specifier == b'i' {
            specifier = b'd';
        }
        let (mut flags, mut width, precision) = parse_modifiers(conv.modifiers);

        let (spec, arg) = match specifier {
            b'd' | b'u' | b'x' | b'X' | b'o' => {
                let size = length_modifier_size(abi, conv.modifiers);
                let signedness = if specifier == b'd' {
                    Signedness::Signed
                } else {
                    Signedness::Unsigned
                };
                let spec = match specifier {
                    b'x' => PrintSpecifier::Hex,
                    b'X' => PrintSpecifier::UpperHex,
                    b'o' => PrintSpecifier::Oct,
                    _ => PrintSpecifier::Dec,
                };
                (
                    spec,
                    Expr::new_cast(IntType::new(size, signedness), conv.arg),
                )
            }
            b'p' => {
                flags |= PrintFlags::ZERO_PAD;
                width = PrintWidth::Fixed(16);
                (
                    PrintSpecifier::Hex,
                    Expr::new_cast(IntType::new(8, Signedness::Unsigned), conv.arg),
                )
            }
            b'c' => (PrintSpecifier::Char, conv.arg),
            b's' => (PrintSpecifier::Str, conv.arg),
            other => {
                return Err(PrintFmtError::MissingConversion(
                    (other as char).to_string(),
                ))
            }
        };

        if !fixed.is_empty() {
            atoms.push(PrintAtom::Fixed(core::mem::take(&mut fixed)));
        }
        atoms.push(PrintAtom::Variable {
            spec,
            flags,
            width,
            precision,
        });
        out_args.extend(dynamic_args);
        out_args.push(arg);
    }

    unescape_into(&mut fixed, rest);
    if !fixed.is_empty() {
        atoms.push(PrintAtom::Fixed(fixed));
    }

    let extra = args.count();
    if extra > 0 {
        warn!("print format ignores {extra} trailing argument(s)");
    }

    Ok((PrintFmtStr { atoms }, out_args))
}

impl PrintFmtStr {
    /// Interpolate one value per conversion (plus one per dynamic width or
    /// precision) into `out`.
    ///
    /// Error values render as their message in place of the value they were
    /// meant to be.
    pub fn interpolate<'v, I>(&self, values: I, out: &mut StdString) -> Result<(), PrintError>
    where
        I: IntoIterator<Item = Value<'v>>,
    {
        let mut values = values.into_iter();

        for atom in &self.atoms {
            match atom {
                PrintAtom::Fixed(text) => out.push_str(text),
                PrintAtom::Variable {
                    spec,
                    flags,
                    width,
                    precision,
                } => {
                    let width = match width {
                        PrintWidth::Unmodified => None,
                        PrintWidth::Fixed(n) => Some(*n),
                        PrintWidth::Dynamic => {
                            Some(dynamic_usize(values.next(), PrintError::MissingWidth)?)
                        }
                    };
                    let precision = match precision {
                        PrintPrecision::Unmodified => None,
                        PrintPrecision::Fixed(n) => Some(*n),
                        PrintPrecision::Dynamic => {
                            Some(dynamic_usize(values.next(), PrintError::MissingPrecision)?)
                        }
                    };
                    let value = values.next().ok_or(PrintError::MissingValue)?;
                    match value {
                        Value::Err(err) => out.push_str(&err.to_string()),
                        Value::Str(s) if *spec == PrintSpecifier::Str => {
                            format_str(out, &s, *flags, width, precision)
                        }
                        Value::Int(x) if *spec == PrintSpecifier::Char => {
                            let c = (x.as_u64() & 0xff) as u8 as char;
                            format_str(out, c.encode_utf8(&mut [0u8; 4]), *flags, width, None)
                        }
                        value if *spec == PrintSpecifier::Str => {
                            return Err(PrintError::NotAString(value.dump()))
                        }
                        Value::Int(x) => format_int(out, x, *spec, *flags, width, precision),
                        value => return Err(PrintError::NotAnInteger(value.dump())),
                    }
                }
            }
        }
        Ok(())
    }
}

fn dynamic_usize(value: Option<Value<'_>>, err: PrintError) -> Result<usize, PrintError> {
    match value.as_ref().and_then(Value::as_int) {
        Some(x) => Ok(x.as_i64().max(0) as usize),
        None => Err(err),
    }
}

/// Map a printf length modifier to a storage size. `l` and `z` follow the
/// ABI long size rather than assuming a 64-bit target.
fn length_modifier_size(abi: &Abi, modifiers: &str) -> MemSize {
    if modifiers.contains("ll") {
        8
    } else if modifiers.contains('l') || modifiers.contains('z') {
        abi.long_size_bytes()
    } else if modifiers.contains("hh") {
        1
    } else if modifiers.contains('h') {
        2
    } else {
        4
    }
}

fn parse_modifiers(modifiers: &str) -> (PrintFlags, PrintWidth, PrintPrecision) {
    let stripped: StdString = modifiers
        .chars()
        .filter(|c| !matches!(c, 'h' | 'l' | 'L' | 'z'))
        .collect();
    let mut chars = stripped.chars().peekable();

    let mut flags = PrintFlags::empty();
    while let Some(&c) = chars.peek() {
        let flag = match c {
            '-' => PrintFlags::LEFT_JUSTIFY,
            '0' => PrintFlags::ZERO_PAD,
            '#' => PrintFlags::BASE_PREFIX,
            '+' => PrintFlags::POSITIVE_SIGN,
            ' ' => PrintFlags::SIGN_PLACEHOLDER,
            _ => break,
        };
        flags |= flag;
        chars.next();
    }

    let width = if chars.peek() == Some(&'*') {
        chars.next();
        PrintWidth::Dynamic
    } else {
        match take_number(&mut chars) {
            Some(n) => PrintWidth::Fixed(n),
            None => PrintWidth::Unmodified,
        }
    };

    let precision = if chars.peek() == Some(&'.') {
        chars.next();
        if chars.peek() == Some(&'*') {
            chars.next();
            PrintPrecision::Dynamic
        } else {
            PrintPrecision::Fixed(take_number(&mut chars).unwrap_or(0))
        }
    } else {
        PrintPrecision::Unmodified
    };

    (flags, width, precision)
}

fn take_number(chars: &mut core::iter::Peekable<core::str::Chars>) -> Option<usize> {
    let mut number = None;
    while let Some(&c) = chars.peek() {
        let Some(digit) = c.to_digit(10) else { break };
        number = Some(number.unwrap_or(0) * 10 + digit as usize);
        chars.next();
    }
    number
}

/// Decode the C escapes the kernel's format strings use, so that the
/// rendered text matches what the kernel's own printf produced.
fn unescape_into(out: &mut StdString, text: &str) {
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
}

/// C printf integer formatting: sign or base prefix, zero padding between
/// prefix and digits, precision as minimum digit count, then justification
/// to the field width.
fn format_int(
    out: &mut StdString,
    x: IntValue,
    spec: PrintSpecifier,
    flags: PrintFlags,
    width: Option<usize>,
    precision: Option<usize>,
) {
    let width = width.unwrap_or(0);

    let (negative, magnitude) = match spec {
        PrintSpecifier::Dec if x.typ().is_signed() => {
            let v = x.as_i64();
            (v < 0, v.unsigned_abs())
        }
        _ => (false, x.as_u64()),
    };

    let mut digits = match spec {
        PrintSpecifier::Hex => format!("{magnitude:x}"),
        PrintSpecifier::UpperHex => format!("{magnitude:X}"),
        PrintSpecifier::Oct => format!("{magnitude:o}"),
        _ => format!("{magnitude}"),
    };
    if let Some(precision) = precision {
        if digits.len() < precision {
            digits.insert_str(0, &"0".repeat(precision - digits.len()));
        }
    }

    let sign = if negative {
        "-"
    } else if spec == PrintSpecifier::Dec && flags.contains(PrintFlags::POSITIVE_SIGN) {
        "+"
    } else if spec == PrintSpecifier::Dec && flags.contains(PrintFlags::SIGN_PLACEHOLDER) {
        " "
    } else {
        ""
    };

    let prefix = if flags.contains(PrintFlags::BASE_PREFIX) && magnitude != 0 {
        match spec {
            PrintSpecifier::Hex => "0x",
            PrintSpecifier::UpperHex => "0X",
            PrintSpecifier::Oct if !digits.starts_with('0') => "0",
            _ => "",
        }
    } else {
        ""
    };

    let content = sign.len() + prefix.len() + digits.len();
    if flags.contains(PrintFlags::LEFT_JUSTIFY) {
        out.push_str(sign);
        out.push_str(prefix);
        out.push_str(&digits);
        pad(out, width.saturating_sub(content), ' ');
    } else if flags.contains(PrintFlags::ZERO_PAD) && precision.is_none() {
        out.push_str(sign);
        out.push_str(prefix);
        pad(out, width.saturating_sub(content), '0');
        out.push_str(&digits);
    } else {
        pad(out, width.saturating_sub(content), ' ');
        out.push_str(sign);
        out.push_str(prefix);
        out.push_str(&digits);
    }
}

fn format_str(
    out: &mut StdString,
    s: &str,
    flags: PrintFlags,
    width: Option<usize>,
    precision: Option<usize>,
) {
    let s = match precision {
        Some(precision) if precision < s.len() => {
            let mut end = precision;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            &s[..end]
        }
        _ => s,
    };
    let width = width.unwrap_or(0);
    if flags.contains(PrintFlags::LEFT_JUSTIFY) {
        out.push_str(s);
        pad(out, width.saturating_sub(s.len()), ' ');
    } else {
        pad(out, width.saturating_sub(s.len()), ' ');
        out.push_str(s);
    }
}

fn pad(out: &mut StdString, count: usize, fill: char) {
    for _ in 0..count {
        out.push(fill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cinterp::{BasicEnv, EvalError},
        header::{Endianness, LongSize},
        str::Str,
    };

    fn abi() -> Abi {
        Abi {
            endianness: Endianness::Little,
            long_size: LongSize::Bits64,
        }
    }

    fn constant(value: Value<'static>) -> Expr {
        Expr::Constant(None, value)
    }

    fn fmt_arg(fmt: &str) -> Expr {
        constant(Value::Str(Str::new_owned(fmt)))
    }

    fn render(fmt: &str, values: Vec<Value<'static>>) -> StdString {
        let abi = abi();
        let mut args = vec![fmt_arg(fmt)];
        args.extend(values.into_iter().map(constant));
        let (print_fmt, args) = compile_printf(&abi, args, None)
            .unwrap_or_else(|err| panic!("failed to compile {fmt:?}: {err}"));
        let mut out = StdString::new();
        print_fmt
            .interpolate(args.iter().map(|arg| arg.eval(&BasicEnv)), &mut out)
            .unwrap_or_else(|err| panic!("failed to render {fmt:?}: {err}"));
        out
    }

    fn s32(x: i64) -> Value<'static> {
        Value::int(x as u64, 4, Signedness::Signed)
    }

    #[test]
    fn passthrough_test() {
        assert_eq!(render("no conversions", vec![]), "no conversions");
        assert_eq!(render("100%%", vec![]), "100%");
        assert_eq!(render("a=%d b=%s", vec![s32(5), Value::Str(Str::new_borrowed("x"))]),
            "a=5 b=x");
        assert_eq!(render("%c", vec![s32(65)]), "A");
    }

    #[test]
    fn rewrite_test() {
        // %i is %d.
        assert_eq!(render("%i", vec![s32(42)]), "42");
        // %u reads the value as unsigned, whatever its original type.
        assert_eq!(render("%u", vec![s32(-1)]), "4294967295");
        // %lu widens to the ABI long before reading.
        assert_eq!(render("%lu", vec![s32(-1)]), "18446744073709551615");
        // %ld widens without changing the value.
        assert_eq!(render("%ld", vec![s32(i32::MIN as i64)]), "-2147483648");
        // %hhu narrows to one byte.
        assert_eq!(render("%hhu", vec![s32(0x1ff)]), "255");
        // %p is 16-wide zero-padded hex.
        assert_eq!(
            render("%p", vec![Value::int(0xdeadbeef, 4, Signedness::Unsigned)]),
            "00000000deadbeef"
        );
    }

    #[test]
    fn flags_test() {
        assert_eq!(render("%03d", vec![s32(3)]), "003");
        assert_eq!(render("%-4d|", vec![s32(5)]), "5   |");
        assert_eq!(render("%4d", vec![s32(5)]), "   5");
        assert_eq!(render("%#x", vec![s32(255)]), "0xff");
        assert_eq!(render("%#o", vec![s32(8)]), "010");
        assert_eq!(render("%.3d", vec![s32(5)]), "005");
        assert_eq!(render("%6.3d", vec![s32(5)]), "   005");
        assert_eq!(render("%06d", vec![s32(-42)]), "-00042");
        assert_eq!(render("%+d", vec![s32(42)]), "+42");
        assert_eq!(render("%x", vec![s32(-1)]), "ffffffff");
        assert_eq!(render("%.4s", vec![Value::Str(Str::new_borrowed("kworker"))]), "kwor");
        assert_eq!(render("%8s", vec![Value::Str(Str::new_borrowed("ksoftirqd"))]), "ksoftirqd");
    }

    #[test]
    fn dynamic_width_test() {
        assert_eq!(render("%*d", vec![s32(4), s32(7)]), "   7");
        assert_eq!(render("%.*s", vec![s32(2), Value::Str(Str::new_borrowed("abcdef"))]), "ab");
    }

    #[test]
    fn escape_test() {
        assert_eq!(render("a\\nb=%d", vec![s32(1)]), "a\nb=1");
        assert_eq!(render("say \\\"hi\\\"", vec![]), "say \"hi\"");
    }

    #[test]
    fn error_value_test() {
        // An error value renders inline, in place of the one conversion it
        // feeds.
        assert_eq!(
            render(
                "x=%d y=%d",
                vec![Value::Err(EvalError::DivisionByZero), s32(7)]
            ),
            "x=division by zero y=7"
        );
    }

    #[test]
    fn compile_error_test() {
        let abi = abi();
        assert_eq!(
            compile_printf(&abi, vec![fmt_arg("%d %d"), constant(s32(1))], None).err(),
            Some(PrintFmtError::MissingArgument)
        );
        assert_eq!(
            compile_printf(&abi, vec![fmt_arg("%")], None).err(),
            Some(PrintFmtError::MissingConversion("".into()))
        );
        assert_eq!(
            compile_printf(&abi, vec![fmt_arg("%qd"), constant(s32(1))], None).err(),
            Some(PrintFmtError::UnexpectedModifier('q'))
        );
        assert!(matches!(
            compile_printf(&abi, vec![constant(s32(1))], None).err(),
            Some(PrintFmtError::NotAConstantFormat(_))
        ));
    }
}
