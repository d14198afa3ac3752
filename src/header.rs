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

//! Event-type registry: parse `events/<sub>/<event>/format` files into
//! [EventType] values, including the binary layout of every field and the
//! compiled `print fmt` expression, and describe the kernel ABI the binary
//! data follows.

use core::fmt::{Debug, Formatter};
use std::{io, string::String as StdString, sync::Arc};

use nom::{
    bytes::complete::is_not,
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt},
    multi::separated_list0,
    sequence::{pair, preceded, separated_pair, terminated},
    IResult,
};
use smartstring::alias::String;

use crate::{
    cinterp::{EvalEnv, EvalError, Value, Variable},
    cparser::{self, CParseError, Expr, ParseEnv, VarRes},
    error::convert_err_impl,
    kernel,
    print::{self, Conversion, PrintFmtError, PrintFmtStr},
    str::Str,
};

/// Identifier in a C declaration or expression.
pub type Identifier = String;

/// Offset in bytes inside an event record or a ring-buffer page.
pub type MemOffset = usize;
/// Size in bytes of an in-memory object.
pub type MemSize = usize;
/// Numeric ID of an event type, as stored in the first 16 bits of a record.
pub type EventId = u16;
/// Timestamp in nanoseconds.
pub type Timestamp = u64;
/// CPU index.
pub type Cpu = u32;
/// Process ID.
pub type Pid = i32;

/// Byte order of the traced kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Endianness {
    Little,
    Big,
}

/// Size of the `long` type of the traced kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LongSize {
    Bits32,
    Bits64,
}

impl From<LongSize> for usize {
    #[inline]
    fn from(size: LongSize) -> usize {
        match size {
            LongSize::Bits32 => 4,
            LongSize::Bits64 => 8,
        }
    }
}

/// Signedness of a C integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signedness {
    Signed,
    Unsigned,
}

impl Signedness {
    #[inline]
    pub fn is_signed(self) -> bool {
        self == Signedness::Signed
    }
}

/// ABI of the kernel that produced the trace data.
///
/// Raw pipe captures are decoded on the same machine or shipped raw, so the
/// ABI defaults to the host's. The long size also decides the width of the
/// `%l` printf length modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abi {
    pub endianness: Endianness,
    pub long_size: LongSize,
}

macro_rules! parse_int {
    ($name:ident, $typ:ty) => {
        pub fn $name<'a>(&self, input: &'a [u8]) -> io::Result<(&'a [u8], $typ)> {
            const N: usize = core::mem::size_of::<$typ>();
            let bytes = input
                .get(..N)
                .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
            let arr: [u8; N] = bytes.try_into().expect("checked length");
            let x = match self.endianness {
                Endianness::Little => <$typ>::from_le_bytes(arr),
                Endianness::Big => <$typ>::from_be_bytes(arr),
            };
            Ok((&input[N..], x))
        }
    };
}

impl Abi {
    /// ABI of the machine this code runs on.
    pub fn host() -> Abi {
        Abi {
            endianness: if cfg!(target_endian = "big") {
                Endianness::Big
            } else {
                Endianness::Little
            },
            long_size: if cfg!(target_pointer_width = "32") {
                LongSize::Bits32
            } else {
                LongSize::Bits64
            },
        }
    }

    parse_int!(parse_u16, u16);
    parse_int!(parse_u32, u32);
    parse_int!(parse_u64, u64);

    /// Parse a kernel `long`, zero-extended to 64 bits.
    pub fn parse_ulong<'a>(&self, input: &'a [u8]) -> io::Result<(&'a [u8], u64)> {
        match self.long_size {
            LongSize::Bits32 => self.parse_u32(input).map(|(rest, x)| (rest, x.into())),
            LongSize::Bits64 => self.parse_u64(input),
        }
    }

    #[inline]
    pub fn long_size_bytes(&self) -> MemSize {
        self.long_size.into()
    }
}

/// Binary format of one event field, as declared by a `field:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventField {
    pub name: Identifier,
    /// C type of the field, with the array bracket and the data-loc prefix
    /// stripped.
    pub ctype: StdString,
    pub offset: MemOffset,
    pub size: MemSize,
    pub signedness: Signedness,
    pub array: bool,
    /// The field value is a `(length << 16) | offset` location word pointing
    /// at an inline payload elsewhere in the record.
    pub data_loc: bool,
}

impl EventField {
    /// Load the field from an event record, zero-extended.
    ///
    /// Returns `None` when the record is too short or the field has a size
    /// that is not a scalar integer size.
    pub fn read_u64(&self, record: &[u8], abi: &Abi) -> Option<u64> {
        let bytes = record.get(self.offset..self.offset + self.size)?;
        Some(match self.size {
            1 => bytes[0].into(),
            2 => abi.parse_u16(bytes).ok()?.1.into(),
            4 => abi.parse_u32(bytes).ok()?.1.into(),
            8 => abi.parse_u64(bytes).ok()?.1,
            _ => return None,
        })
    }

    /// Load the field from an event record, sign-extended.
    pub fn read_i64(&self, record: &[u8], abi: &Abi) -> Option<i64> {
        let bytes = record.get(self.offset..self.offset + self.size)?;
        Some(match self.size {
            1 => (bytes[0] as i8).into(),
            2 => (abi.parse_u16(bytes).ok()?.1 as i16).into(),
            4 => (abi.parse_u32(bytes).ok()?.1 as i32).into(),
            8 => abi.parse_u64(bytes).ok()?.1 as i64,
            _ => return None,
        })
    }
}

/// Errors while parsing a format file.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HeaderError {
    #[error("format file is not valid UTF-8")]
    NotUtf8,

    #[error("missing ':' on line {0}")]
    MissingColon(usize),

    #[error("unexpected key {0:?}")]
    UnexpectedKey(StdString),

    #[error("invalid event id {0:?}")]
    InvalidId(StdString),

    #[error("invalid field declaration {0:?}")]
    InvalidField(StdString),

    #[error("missing field type and name in {0:?}")]
    MissingFieldName(StdString),

    #[error("expected ']' after '[' in field name {0:?}")]
    UnterminatedBracket(StdString),

    #[error("unknown field property {0:?}")]
    UnknownFieldProp(StdString),

    #[error("invalid {0} value {1:?} in field declaration")]
    InvalidFieldProp(&'static str, StdString),

    #[error("missing {0} in field declaration")]
    MissingFieldProp(&'static str),

    #[error("could not parse print fmt: {0}")]
    PrintFmtParse(CParseError),

    #[error("could not compile print fmt: {0}")]
    PrintFmtCompile(PrintFmtError),

    #[error("page header format is missing the {0:?} field")]
    MissingPageField(&'static str),
}

convert_err_impl!(CParseError, PrintFmtParse, HeaderError);
convert_err_impl!(PrintFmtError, PrintFmtCompile, HeaderError);

/// Schema of one kind of ftrace event: field layout, numeric id and the
/// compiled print format.
pub struct EventType {
    /// Name of the event, without the subsystem.
    pub name: Identifier,
    /// Numeric id, unique within a trace session.
    pub id: EventId,
    path: StdString,
    fields: Vec<Arc<EventField>>,
    size: MemSize,
    print: Option<(PrintFmtStr, Vec<Expr>)>,
    pub(crate) pid_field: Option<usize>,
    pub(crate) flags_field: Option<usize>,
    pub(crate) preempt_field: Option<usize>,
    abi: Abi,
}

impl Debug for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), core::fmt::Error> {
        f.debug_struct("EventType")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl EventType {
    /// Parse an `events/<sub>/<event>/format` file.
    ///
    /// `path` is the `<sub>/<event>` part, `name` the event name.
    pub fn from_format(
        abi: &Abi,
        path: &str,
        name: &str,
        data: &[u8],
    ) -> Result<EventType, HeaderError> {
        let (id, fields, print_line) = parse_format_data(data)?;

        let print = match print_line {
            None => None,
            Some(line) => {
                let scope = EventScope {
                    fields: &fields,
                    abi,
                };
                let exprs = cparser::parse_exprs(&line, &scope)?;
                let hook: &dyn for<'f> Fn(Conversion<'f>) -> Conversion<'f> = &printk_pointer_hook;
                Some(print::compile_printf(abi, exprs, Some(hook))?)
            }
        };

        let size = fields
            .iter()
            .map(|f| f.offset + f.size)
            .max()
            .unwrap_or(0);

        let field_index = |name: &str| fields.iter().position(|f| f.name.as_str() == name);

        Ok(EventType {
            name: name.into(),
            id: id.unwrap_or(0),
            path: path.into(),
            pid_field: field_index("common_pid"),
            flags_field: field_index("common_flags"),
            preempt_field: field_index("common_preempt_count"),
            fields,
            size,
            print,
            abi: *abi,
        })
    }

    /// Parse the `events/header_page` meta-format describing the ring-buffer
    /// page layout.
    pub fn header_page(abi: &Abi, data: &[u8]) -> Result<EventType, HeaderError> {
        EventType::from_format(abi, "header_page", "header_page", data)
    }

    /// Path of the event below `events/`.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn fields(&self) -> &[Arc<EventField>] {
        &self.fields
    }

    /// Total record size: the highest `offset + size` over all fields.
    #[inline]
    pub fn size(&self) -> MemSize {
        self.size
    }

    #[inline]
    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name.as_str() == name)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Arc<EventField>> {
        self.fields.iter().find(|f| f.name.as_str() == name)
    }

    /// Render the event body by evaluating the compiled print format in
    /// `env`.
    ///
    /// Expression errors render as their message so a single bad event does
    /// not take the stream down.
    pub fn format(&self, env: &dyn EvalEnv) -> StdString {
        match &self.print {
            None => format!("event type {} has no formatter", self.path),
            Some((fmt, args)) => {
                let mut out = StdString::new();
                let values = args.iter().map(|arg| arg.eval(env));
                match fmt.interpolate(values, &mut out) {
                    Ok(()) => out,
                    Err(err) => err.to_string(),
                }
            }
        }
    }
}

/// Rewrite `%pf`, `%pF` and `%pK` into kernel symbol-resolution calls
/// rendered with `%s`.
fn printk_pointer_hook(conv: Conversion<'_>) -> Conversion<'_> {
    match (conv.specifier, conv.suffix.as_bytes().first()) {
        (b'p', Some(&(c @ (b'f' | b'F' | b'K')))) => {
            let name = match c {
                b'f' => "__printk_pf",
                b'F' => "__printk_pF",
                _ => "__printk_pK",
            };
            Conversion {
                specifier: b's',
                modifiers: "",
                suffix: &conv.suffix[1..],
                arg: Expr::new_func(kernel::function(name), name.into(), vec![conv.arg]),
            }
        }
        _ => conv,
    }
}

#[allow(clippy::type_complexity)]
fn parse_format_data(
    data: &[u8],
) -> Result<(Option<EventId>, Vec<Arc<EventField>>, Option<StdString>), HeaderError> {
    let text = core::str::from_utf8(data).map_err(|_| HeaderError::NotUtf8)?;

    let mut id = None;
    let mut fields = Vec::new();
    let mut print_line = None;

    for (n, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let colon = line.find(':').ok_or(HeaderError::MissingColon(n + 1))?;
        let key = line[..colon].trim();
        let value = line[colon + 1..].trim();

        match key {
            "name" | "format" => {}
            "ID" => {
                id = Some(
                    value
                        .parse()
                        .map_err(|_| HeaderError::InvalidId(value.into()))?,
                );
            }
            "field" => fields.push(Arc::new(parse_field(value)?)),
            "print fmt" => print_line = Some(value.to_owned()),
            key => return Err(HeaderError::UnexpectedKey(key.into())),
        }
    }

    Ok((id, fields, print_line))
}

fn field_props(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    separated_list0(
        char(';'),
        map(
            separated_pair(preceded(multispace0, is_not(":;")), char(':'), is_not(";")),
            |(k, v): (&str, &str)| (k.trim(), v.trim()),
        ),
    )(input)
}

fn field_line(input: &str) -> IResult<&str, (&str, Vec<(&str, &str)>)> {
    all_consuming(terminated(
        separated_pair(is_not(";"), char(';'), field_props),
        pair(opt(char(';')), multispace0),
    ))(input)
}

/// Parse everything following `field:` in a format file line.
fn parse_field(line: &str) -> Result<EventField, HeaderError> {
    let (_, (decl, props)) =
        field_line(line).map_err(|_| HeaderError::InvalidField(line.into()))?;

    let decl = decl.trim();
    let split = decl
        .rfind(' ')
        .ok_or_else(|| HeaderError::MissingFieldName(decl.into()))?;
    let ctype = decl[..split].trim_end();
    let mut name = &decl[split + 1..];

    let mut array = false;
    if let Some(bracket) = name.find('[') {
        match name.find(']') {
            Some(end) if end > bracket => {}
            _ => return Err(HeaderError::UnterminatedBracket(name.into())),
        }
        array = true;
        name = &name[..bracket];
    }

    let (ctype, data_loc) = strip_data_loc(ctype);

    let mut offset = None;
    let mut size = None;
    let mut signedness = Signedness::Unsigned;
    for (key, value) in props {
        match key {
            "offset" => {
                offset = Some(
                    value
                        .parse()
                        .map_err(|_| HeaderError::InvalidFieldProp("offset", value.into()))?,
                );
            }
            "size" => {
                size = Some(
                    value
                        .parse()
                        .map_err(|_| HeaderError::InvalidFieldProp("size", value.into()))?,
                );
            }
            "signed" => {
                signedness = match value {
                    "0" | "false" => Signedness::Unsigned,
                    "1" | "true" => Signedness::Signed,
                    _ => return Err(HeaderError::InvalidFieldProp("signed", value.into())),
                };
            }
            key => return Err(HeaderError::UnknownFieldProp(key.into())),
        }
    }

    Ok(EventField {
        name: name.into(),
        ctype: ctype.into(),
        offset: offset.ok_or(HeaderError::MissingFieldProp("offset"))?,
        size: size.ok_or(HeaderError::MissingFieldProp("size"))?,
        signedness,
        array,
        data_loc,
    })
}

/// Recognize the dynamic-string declaration idiom.
///
/// Only `char[]` payloads decode as strings; any other `__data_loc` element
/// type would extend the match here and keeps the raw location word until
/// then.
fn strip_data_loc(ctype: &str) -> (&str, bool) {
    match ctype.strip_prefix("__data_loc char[]") {
        Some(rest) => (rest.trim_start(), true),
        None => (ctype, false),
    }
}

/// Scope used to parse an event's `print fmt` expression: `REC->field`
/// resolves to that event's fields, everything else to the kernel tables.
struct EventScope<'a> {
    fields: &'a [Arc<EventField>],
    abi: &'a Abi,
}

impl ParseEnv for EventScope<'_> {
    fn variable(&self, id: &str) -> VarRes {
        let name = id.strip_prefix("REC->").unwrap_or(id);
        if let Some(field) = self.fields.iter().find(|f| f.name.as_str() == name) {
            return VarRes::Runtime(Arc::new(FieldVariable {
                field: Arc::clone(field),
                abi: *self.abi,
            }));
        }
        match kernel::constant(id) {
            Some(v) => VarRes::Constant(Value::int(v as i64 as u64, 4, Signedness::Signed)),
            None => VarRes::Unknown,
        }
    }

    fn function(&self, id: &str) -> Option<Arc<dyn crate::cinterp::Function>> {
        kernel::function(id)
    }

    fn typedef(&self, id: &str) -> Option<&str> {
        kernel::typedef(id)
    }

    fn abi(&self) -> &Abi {
        self.abi
    }
}

/// Reads one event field out of the record provided by the evaluation
/// environment.
struct FieldVariable {
    field: Arc<EventField>,
    abi: Abi,
}

impl Variable for FieldVariable {
    fn get<'ee>(&self, env: &'ee dyn EvalEnv) -> Value<'ee> {
        let data = match env.event_data() {
            Ok(data) => data,
            Err(err) => return Value::Err(err),
        };
        let field = &self.field;
        let Some(bytes) = data.get(field.offset..field.offset + field.size) else {
            return Value::Err(EvalError::FieldOutOfRange(field.name.clone()));
        };

        if field.ctype == "char" {
            let bytes = bytes.split(|b| *b == 0).next().unwrap_or(&[]);
            return match core::str::from_utf8(bytes) {
                Ok(s) => Value::Str(Str::new_borrowed(s)),
                Err(_) => Value::Str(Str::new_owned(
                    StdString::from_utf8_lossy(bytes).as_ref(),
                )),
            };
        }

        let bits = if field.signedness.is_signed() {
            field.read_i64(data, &self.abi).map(|x| x as u64)
        } else {
            field.read_u64(data, &self.abi)
        };
        match bits {
            Some(bits) => Value::int(bits, field.size, field.signedness),
            None => Value::Err(EvalError::BadFieldSize(field.name.clone(), field.size)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cinterp::EvalEnv;

    const WAKEUP_FORMAT: &str = "\
name: sched_wakeup
ID: 316
format:
\tfield:unsigned short common_type;\toffset:0;\tsize:2;\tsigned:0;
\tfield:unsigned char common_flags;\toffset:2;\tsize:1;\tsigned:0;
\tfield:unsigned char common_preempt_count;\toffset:3;\tsize:1;\tsigned:0;
\tfield:int common_pid;\toffset:4;\tsize:4;\tsigned:1;

\tfield:char comm[16];\toffset:8;\tsize:16;\tsigned:1;
\tfield:pid_t pid;\toffset:24;\tsize:4;\tsigned:1;
\tfield:int prio;\toffset:28;\tsize:4;\tsigned:1;
\tfield:int success;\toffset:32;\tsize:4;\tsigned:1;
\tfield:int target_cpu;\toffset:36;\tsize:4;\tsigned:1;

print fmt: \"comm=%s pid=%d prio=%d success=%d target_cpu=%03d\", REC->comm, REC->pid, REC->prio, REC->success, REC->target_cpu
";

    fn abi() -> Abi {
        Abi {
            endianness: Endianness::Little,
            long_size: LongSize::Bits64,
        }
    }

    struct RecEnv<'a>(&'a [u8]);

    impl EvalEnv for RecEnv<'_> {
        fn event_data(&self) -> Result<&[u8], EvalError> {
            Ok(self.0)
        }
    }

    fn wakeup_record() -> Vec<u8> {
        let mut rec = vec![0u8; 40];
        rec[0..2].copy_from_slice(&316u16.to_le_bytes());
        rec[4..8].copy_from_slice(&1234i32.to_le_bytes());
        rec[8..12].copy_from_slice(b"bash");
        rec[24..28].copy_from_slice(&1234i32.to_le_bytes());
        rec[28..32].copy_from_slice(&120i32.to_le_bytes());
        rec[32..36].copy_from_slice(&1i32.to_le_bytes());
        rec[36..40].copy_from_slice(&3i32.to_le_bytes());
        rec
    }

    #[test]
    fn format_file_test() {
        let abi = abi();
        let etype =
            EventType::from_format(&abi, "sched/sched_wakeup", "sched_wakeup", WAKEUP_FORMAT.as_bytes())
                .unwrap();

        assert_eq!(etype.id, 316);
        assert_eq!(etype.name.as_str(), "sched_wakeup");
        assert_eq!(etype.size(), 40);
        assert_eq!(etype.fields().len(), 9);
        assert_eq!(etype.pid_field, Some(3));
        assert_eq!(etype.flags_field, Some(1));
        assert_eq!(etype.preempt_field, Some(2));

        let comm = etype.field_by_name("comm").unwrap();
        assert!(comm.array);
        assert_eq!(comm.ctype, "char");
        assert_eq!(comm.offset, 8);
        assert_eq!(comm.size, 16);
    }

    #[test]
    fn format_event_test() {
        let abi = abi();
        let etype =
            EventType::from_format(&abi, "sched/sched_wakeup", "sched_wakeup", WAKEUP_FORMAT.as_bytes())
                .unwrap();

        let rec = wakeup_record();
        let body = etype.format(&RecEnv(&rec));
        assert_eq!(body, "comm=bash pid=1234 prio=120 success=1 target_cpu=003");
    }

    #[test]
    fn data_loc_test() {
        let format = "\
ID: 7
\tfield:__data_loc char[] name;\toffset:8;\tsize:4;\tsigned:1;
print fmt: \"name=%s\", __get_str(name)
";
        let abi = abi();
        let etype = EventType::from_format(&abi, "irq/irq_handler_entry", "irq_handler_entry", format.as_bytes())
            .unwrap();
        let field = etype.field_by_name("name").unwrap();
        assert!(field.data_loc);
        assert_eq!(field.ctype, "");
        assert_eq!(field.size, 4);

        // Location word: length 6 at offset 12, payload "timer\0".
        let mut rec = vec![0u8; 18];
        let loc: u32 = (6 << 16) | 12;
        rec[8..12].copy_from_slice(&loc.to_le_bytes());
        rec[12..18].copy_from_slice(b"timer\0");
        assert_eq!(etype.format(&RecEnv(&rec)), "name=timer");
    }

    #[test]
    fn printk_pointer_test() {
        let format = "\
ID: 9
\tfield:unsigned long function;\toffset:8;\tsize:8;\tsigned:0;
print fmt: \"func=%pf\", REC->function
";
        struct SymEnv<'a>(&'a [u8]);
        impl EvalEnv for SymEnv<'_> {
            fn event_data(&self) -> Result<&[u8], EvalError> {
                Ok(self.0)
            }
            fn kernel_symbol(&self, addr: u64) -> Option<&str> {
                (addr == 0xffff_f000).then_some("do_timer")
            }
        }

        let abi = abi();
        let etype = EventType::from_format(&abi, "timer/timer_start", "timer_start", format.as_bytes())
            .unwrap();
        let mut rec = vec![0u8; 16];
        rec[8..16].copy_from_slice(&0xffff_f000u64.to_le_bytes());
        assert_eq!(etype.format(&SymEnv(&rec)), "func=do_timer");
    }

    #[test]
    fn bad_format_test() {
        let abi = abi();
        assert!(matches!(
            EventType::from_format(&abi, "x/y", "y", b"bogus line without separator\n"),
            Err(HeaderError::MissingColon(1))
        ));
        assert!(matches!(
            EventType::from_format(&abi, "x/y", "y", b"surprise: 1\n"),
            Err(HeaderError::UnexpectedKey(_))
        ));
        assert!(matches!(
            EventType::from_format(&abi, "x/y", "y", b"\tfield:int x;\toffset:a;\tsize:4;\tsigned:1;\n"),
            Err(HeaderError::InvalidFieldProp("offset", _))
        ));
    }

    #[test]
    fn header_page_test() {
        let format = "\
\tfield: u64 timestamp;\toffset:0;\tsize:8;\tsigned:0;
\tfield: local_t commit;\toffset:8;\tsize:8;\tsigned:1;
\tfield: int overwrite;\toffset:8;\tsize:1;\tsigned:1;
\tfield: char data;\toffset:16;\tsize:4080;\tsigned:0;
";
        let abi = abi();
        let page = EventType::header_page(&abi, format.as_bytes()).unwrap();
        assert_eq!(page.field_by_name("timestamp").unwrap().offset, 0);
        assert_eq!(page.field_by_name("commit").unwrap().size, 8);
        assert_eq!(page.field_by_name("data").unwrap().offset, 16);
    }
}
