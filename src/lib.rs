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

//! This crate reads the Linux kernel's ftrace ring buffer through the raw
//! per-CPU pipes (`per_cpu/cpuN/trace_pipe_raw`), decodes the binary pages
//! into typed events and renders each event exactly as the kernel's own
//! plain-text `trace` file would, by interpreting the `print fmt` expression
//! registered for the event type.
//!
//! The decoding side only needs the raw pipe bytes plus a handful of metadata
//! files (`events/*/*/format`, `events/header_page`, `saved_cmdlines`,
//! `/proc/kallsyms`), so it can run on a different host than the traced
//! device. The [io::FileAccess] trait is the boundary: a local back-end talks
//! to tracefs directly, while the recording/replay back-ends move captures
//! across machines or into tests.

mod error;

pub mod buffer;
pub mod cinterp;
pub mod cparser;
pub mod ftrace;
pub mod header;
pub mod io;
pub mod kernel;
pub mod print;
pub mod str;
