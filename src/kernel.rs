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

//! Kernel-side vocabulary of `print fmt` expressions: the helper functions
//! (`__print_flags`, `__print_symbolic`, `__get_str`, the `__printk_p*`
//! symbol resolvers), enum constants and typedefs, plus the lazily-loaded
//! `saved_cmdlines` and `kallsyms` tables.

use std::{collections::HashMap, string::String as StdString, sync::Arc};

use log::warn;
use once_cell::sync::OnceCell;

use crate::{
    cinterp::{EvalEnv, EvalError, Function, Value},
    header::Pid,
    io::FileAccess,
    str::Str,
};

/// Look up a kernel helper function by name.
pub fn function(name: &str) -> Option<Arc<dyn Function>> {
    Some(match name {
        "__print_flags" => Arc::new(PrintFlagsFn),
        "__print_symbolic" => Arc::new(PrintSymbolicFn),
        "__get_str" => Arc::new(GetStrFn),
        // __printk_pF would additionally print the offset into the symbol;
        // it resolves like the others until that is needed.
        "__printk_pf" | "__printk_pF" | "__printk_pK" => Arc::new(PrintkSymbolFn),
        _ => return None,
    })
}

/// Enumeration constants the kernel uses in `print fmt` expressions without
/// declaring them anywhere the format file shows.
pub fn constant(name: &str) -> Option<i32> {
    Some(match name {
        "HI_SOFTIRQ" => 0,
        "TIMER_SOFTIRQ" => 1,
        "NET_TX_SOFTIRQ" => 2,
        "NET_RX_SOFTIRQ" => 3,
        "BLOCK_SOFTIRQ" => 4,
        "BLOCK_IOPOLL_SOFTIRQ" => 5,
        "TASKLET_SOFTIRQ" => 6,
        "SCHED_SOFTIRQ" => 7,
        "HRTIMER_SOFTIRQ" => 8,
        "RCU_SOFTIRQ" => 9,

        "TLB_FLUSH_ON_TASK_SWITCH" => 0,
        "TLB_REMOTE_SHOOTDOWN" => 1,
        "TLB_LOCAL_SHOOTDOWN" => 2,
        "TLB_LOCAL_MM_SHOOTDOWN" => 3,
        _ => return None,
    })
}

/// Kernel typedefs that field declarations and casts rely on, expanded to
/// plain C type keywords.
pub fn typedef(name: &str) -> Option<&'static str> {
    Some(match name {
        "gfp_t" => "unsigned int",
        "pid_t" => "int",
        "uid_t" | "gid_t" => "unsigned int",
        "size_t" => "unsigned long",
        "ssize_t" => "long",
        "u8" | "__u8" => "unsigned char",
        "s8" | "__s8" => "signed char",
        "u16" | "__u16" => "unsigned short",
        "s16" | "__s16" => "short",
        "u32" | "__u32" => "unsigned int",
        "s32" | "__s32" => "int",
        "u64" | "__u64" => "unsigned long long",
        "s64" | "__s64" => "long long",
        _ => return None,
    })
}

fn args_err(helper: &'static str, expected: &'static str) -> Value<'static> {
    Value::Err(EvalError::HelperArgs { helper, expected })
}

fn pair<'v>(value: &'v Value<'_>) -> Option<(i64, &'v str)> {
    match value.as_list()? {
        [key, label] => Some((key.as_int()?.as_i64(), label.as_str()?)),
        _ => None,
    }
}

/// `__print_flags(val, delim, {mask, label}, ...)`: join the labels of the
/// mask bits set in `val`.
struct PrintFlagsFn;

impl Function for PrintFlagsFn {
    fn call<'ee>(&self, _env: &'ee dyn EvalEnv, args: Vec<Value<'ee>>) -> Value<'ee> {
        const HELPER: &str = "__print_flags";
        if args.len() < 3 {
            return args_err(HELPER, "at least 3 arguments");
        }
        let Some(value) = args[0].as_int() else {
            return args_err(HELPER, "an integer first argument");
        };
        let value = value.as_i64();
        let Some(delim) = args[1].as_str() else {
            return args_err(HELPER, "a string delimiter");
        };

        let mut out = StdString::new();
        let mut first = true;
        for flag in &args[2..] {
            let Some((mask, label)) = pair(flag) else {
                return args_err(HELPER, "{mask, label} pairs");
            };
            if value & mask != 0 {
                if !first {
                    out.push_str(delim);
                }
                out.push_str(label);
                first = false;
            }
        }
        Value::Str(Str::new_owned(out))
    }
}

/// `__print_symbolic(val, {key, label}, ...)`: the label whose key equals
/// `val`, or the empty string.
struct PrintSymbolicFn;

impl Function for PrintSymbolicFn {
    fn call<'ee>(&self, _env: &'ee dyn EvalEnv, args: Vec<Value<'ee>>) -> Value<'ee> {
        const HELPER: &str = "__print_symbolic";
        if args.len() < 2 {
            return args_err(HELPER, "at least 2 arguments");
        }
        let Some(value) = args[0].as_int() else {
            return args_err(HELPER, "an integer first argument");
        };
        let value = value.as_i64();

        for sym in &args[1..] {
            let Some((key, label)) = pair(sym) else {
                return args_err(HELPER, "{key, label} pairs");
            };
            if value == key {
                return Value::Str(Str::new_owned(label));
            }
        }
        Value::Str(Str::new_borrowed(""))
    }
}

/// `__get_str(loc)`: fetch the dynamic string whose `(length << 16) |
/// offset` location word is `loc`, truncated at the first NUL.
struct GetStrFn;

impl Function for GetStrFn {
    fn call<'ee>(&self, env: &'ee dyn EvalEnv, args: Vec<Value<'ee>>) -> Value<'ee> {
        const HELPER: &str = "__get_str";
        let [loc] = args.as_slice() else {
            return args_err(HELPER, "exactly 1 argument");
        };
        let Some(loc) = loc.as_int() else {
            return args_err(HELPER, "an integer argument");
        };
        let data = match env.event_data() {
            Ok(data) => data,
            Err(err) => return Value::Err(err),
        };

        let loc = loc.as_i64();
        let offset = (loc & 0xffff) as usize;
        let length = ((loc >> 16) & 0xffff) as usize;
        if offset >= data.len() {
            return Value::Err(EvalError::GetStrOffset(offset));
        }
        if offset + length > data.len() {
            return Value::Err(EvalError::GetStrLength(length));
        }

        let bytes = &data[offset..offset + length];
        let bytes = bytes.split(|b| *b == 0).next().unwrap_or(&[]);
        match core::str::from_utf8(bytes) {
            Ok(s) => Value::Str(Str::new_borrowed(s)),
            Err(_) => Value::Str(Str::new_owned(StdString::from_utf8_lossy(bytes).as_ref())),
        }
    }
}

/// `__printk_pf`/`__printk_pF`/`__printk_pK`: resolve an address through the
/// kallsyms table. An unresolvable address renders as the empty string, like
/// an anonymous symbol would.
struct PrintkSymbolFn;

impl Function for PrintkSymbolFn {
    fn call<'ee>(&self, env: &'ee dyn EvalEnv, args: Vec<Value<'ee>>) -> Value<'ee> {
        const HELPER: &str = "__printk_pf";
        let [addr] = args.as_slice() else {
            return args_err(HELPER, "exactly 1 argument");
        };
        let Some(addr) = addr.as_int() else {
            return args_err(HELPER, "an integer argument");
        };
        match env.kernel_symbol(addr.as_u64()) {
            Some(name) => Value::Str(Str::new_borrowed(name)),
            None => Value::Str(Str::new_borrowed("")),
        }
    }
}

/// Lazily-loaded `saved_cmdlines` table mapping pids to command names.
///
/// The one-shot initialization means concurrent first lookups parse the file
/// once; a load failure logs and acts as an empty table.
pub struct CommCache {
    files: Arc<dyn FileAccess>,
    comms: OnceCell<HashMap<Pid, StdString>>,
}

impl CommCache {
    pub fn new(files: Arc<dyn FileAccess>) -> Self {
        CommCache {
            files,
            comms: OnceCell::new(),
        }
    }

    pub fn comm_of(&self, pid: Pid) -> Option<&str> {
        self.comms().get(&pid).map(StdString::as_str)
    }

    fn comms(&self) -> &HashMap<Pid, StdString> {
        self.comms.get_or_init(|| {
            match self.files.read_ftrace("saved_cmdlines") {
                Ok(data) => parse_saved_cmdlines(&data),
                Err(err) => {
                    warn!("could not read saved_cmdlines: {err}");
                    HashMap::new()
                }
            }
        })
    }
}

fn parse_saved_cmdlines(data: &[u8]) -> HashMap<Pid, StdString> {
    let mut comms = HashMap::new();
    for line in StdString::from_utf8_lossy(data).lines() {
        let Some((pid, comm)) = line.split_once(' ') else {
            continue;
        };
        let Ok(pid) = pid.parse() else {
            continue;
        };
        comms.insert(pid, comm.to_owned());
    }
    comms
}

/// Lazily-loaded `/proc/kallsyms` table.
pub struct SymCache {
    files: Arc<dyn FileAccess>,
    symbols: OnceCell<HashMap<u64, StdString>>,
}

impl SymCache {
    pub fn new(files: Arc<dyn FileAccess>) -> Self {
        SymCache {
            files,
            symbols: OnceCell::new(),
        }
    }

    pub fn symbol(&self, addr: u64) -> Option<&str> {
        self.symbols().get(&addr).map(StdString::as_str)
    }

    fn symbols(&self) -> &HashMap<u64, StdString> {
        self.symbols.get_or_init(|| match self.files.read_proc("kallsyms") {
            Ok(data) => parse_kallsyms(&data),
            Err(err) => {
                warn!("could not read kallsyms: {err}");
                HashMap::new()
            }
        })
    }
}

fn parse_kallsyms(data: &[u8]) -> HashMap<u64, StdString> {
    let mut symbols = HashMap::new();
    for line in StdString::from_utf8_lossy(data).lines() {
        let mut parts = line.splitn(3, ' ');
        let (Some(addr), Some(_kind), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Ok(addr) = u64::from_str_radix(addr, 16) else {
            continue;
        };
        // Module symbols carry a "\t[module]" suffix.
        symbols.insert(addr, name.replace('\t', " "));
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cinterp::BasicEnv,
        header::Signedness,
        io::ReplayFiles,
    };

    fn s32(x: i64) -> Value<'static> {
        Value::int(x as u64, 4, Signedness::Signed)
    }

    fn pair_value(key: i64, label: &'static str) -> Value<'static> {
        Value::List(vec![s32(key), Value::Str(Str::new_borrowed(label))])
    }

    #[test]
    fn print_flags_test() {
        let f = function("__print_flags").unwrap();
        let args = vec![
            s32(0b101),
            Value::Str(Str::new_borrowed("|")),
            pair_value(1, "S"),
            pair_value(2, "D"),
            pair_value(4, "T"),
        ];
        assert_eq!(f.call(&BasicEnv, args).as_str(), Some("S|T"));

        let none = vec![
            s32(0),
            Value::Str(Str::new_borrowed("|")),
            pair_value(1, "S"),
        ];
        assert_eq!(f.call(&BasicEnv, none).as_str(), Some(""));

        assert!(f.call(&BasicEnv, vec![s32(1)]).is_err());
    }

    #[test]
    fn print_symbolic_test() {
        let f = function("__print_symbolic").unwrap();
        let args = vec![s32(2), pair_value(1, "one"), pair_value(2, "two")];
        assert_eq!(f.call(&BasicEnv, args).as_str(), Some("two"));

        let miss = vec![s32(9), pair_value(1, "one")];
        assert_eq!(f.call(&BasicEnv, miss).as_str(), Some(""));
    }

    #[test]
    fn get_str_test() {
        struct RecEnv<'a>(&'a [u8]);
        impl EvalEnv for RecEnv<'_> {
            fn event_data(&self) -> Result<&[u8], EvalError> {
                Ok(self.0)
            }
        }

        let mut rec = vec![0u8; 16];
        rec[10..16].copy_from_slice(b"abc\0xy");
        let env = RecEnv(&rec);
        let f = function("__get_str").unwrap();

        let loc = |length: i64, offset: i64| s32((length << 16) | offset);
        assert_eq!(f.call(&env, vec![loc(6, 10)]).as_str(), Some("abc"));
        assert_eq!(
            f.call(&env, vec![loc(0, 100)]),
            Value::Err(EvalError::GetStrOffset(100))
        );
        assert_eq!(
            f.call(&env, vec![loc(100, 10)]),
            Value::Err(EvalError::GetStrLength(100))
        );
    }

    #[test]
    fn comm_cache_test() {
        let mut files = ReplayFiles::default();
        files.insert_ftrace("saved_cmdlines", b"1 init\n1234 bash with spaces\nbroken\n".to_vec());
        let cache = CommCache::new(Arc::new(files));
        assert_eq!(cache.comm_of(1), Some("init"));
        assert_eq!(cache.comm_of(1234), Some("bash with spaces"));
        assert_eq!(cache.comm_of(99), None);
    }

    #[test]
    fn sym_cache_test() {
        let mut files = ReplayFiles::default();
        files.insert_proc(
            "kallsyms",
            b"ffffffff81000000 T _stext\nffffffff81234567 t do_timer\tsome_module\nnot a line\n"
                .to_vec(),
        );
        let cache = SymCache::new(Arc::new(files));
        assert_eq!(cache.symbol(0xffffffff81000000), Some("_stext"));
        assert_eq!(
            cache.symbol(0xffffffff81234567),
            Some("do_timer some_module")
        );
        assert_eq!(cache.symbol(0xdead), None);
    }
}
