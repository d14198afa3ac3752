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

//! Capture orchestration and event rendering.
//!
//! [Ftrace] owns the session: the event-type registry, the page-header
//! layout, the comm/symbol caches and the per-CPU raw pipes. During a
//! capture, one reader thread per CPU decodes pages and feeds a single
//! bounded channel; the consumer multiplexes that channel against a done
//! channel. Per CPU, events arrive in timestamp order; across CPUs, sort by
//! [Event::sort_key] when a global order is needed.

use std::{
    collections::BTreeMap,
    io::{self, Read},
    mem,
    string::String as StdString,
    sync::Arc,
};

use crossbeam::{
    channel::{bounded, Receiver, Sender},
    select,
    thread::scope,
};
use log::{debug, warn};

use crate::{
    buffer::{decode_page, Event, PageFmt},
    cinterp::{EvalEnv, EvalError},
    header::{Abi, Cpu, EventId, EventType, HeaderError, Pid},
    io::{safe_ftrace_path, FileAccess},
    kernel::{CommCache, SymCache},
};

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum FtraceError {
    #[error("file access failed: {0}")]
    Io(#[from] io::Error),

    #[error("could not parse format: {0}")]
    Header(#[from] HeaderError),

    #[error("bad event name {0:?}")]
    BadEventName(StdString),

    #[error("event id {0} is already registered")]
    DuplicateEventId(EventId),

    #[error("capture is not prepared")]
    NotPrepared,
}

/// One tracing session against a [FileAccess] back-end.
pub struct Ftrace {
    files: Arc<dyn FileAccess>,
    abi: Abi,
    page_fmt: PageFmt,
    event_types: BTreeMap<EventId, Arc<EventType>>,
    comms: CommCache,
    symbols: SymCache,
    pipes: Vec<(Cpu, Box<dyn Read + Send>)>,
    done: Option<Receiver<()>>,
    page_size: usize,
}

impl Ftrace {
    /// Set up a session: reads `events/header_page` to learn the ring-buffer
    /// page layout.
    pub fn new(files: Arc<dyn FileAccess>) -> Result<Ftrace, FtraceError> {
        let abi = Abi::host();
        let data = files.read_ftrace("events/header_page")?;
        let header_page = EventType::header_page(&abi, &data)?;
        let page_fmt = PageFmt::new(&header_page)?;

        Ok(Ftrace {
            comms: CommCache::new(Arc::clone(&files)),
            symbols: SymCache::new(Arc::clone(&files)),
            files,
            abi,
            page_fmt,
            event_types: BTreeMap::new(),
            pipes: Vec::new(),
            done: None,
            page_size: page_size(),
        })
    }

    #[inline]
    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    /// Load `events/<sub>/<event>/format` and register the event type for
    /// decoding.
    pub fn register_event(&mut self, path: &str) -> Result<Arc<EventType>, FtraceError> {
        if !safe_ftrace_path(path) {
            return Err(FtraceError::BadEventName(path.into()));
        }
        let data = self.files.read_ftrace(&format!("events/{path}/format"))?;
        let name = path.rsplit('/').next().unwrap_or(path);
        let etype = Arc::new(EventType::from_format(&self.abi, path, name, &data)?);
        if self.event_types.contains_key(&etype.id) {
            return Err(FtraceError::DuplicateEventId(etype.id));
        }
        self.event_types.insert(etype.id, Arc::clone(&etype));
        Ok(etype)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &Arc<EventType>> {
        self.event_types.values()
    }

    pub fn enable(&self) -> io::Result<()> {
        debug!("tracing on");
        self.files.write_ftrace("tracing_on", b"1")
    }

    pub fn disable(&self) -> io::Result<()> {
        debug!("tracing off");
        self.files.write_ftrace("tracing_on", b"0")
    }

    /// Truncate the kernel's text trace.
    pub fn clear(&self) -> io::Result<()> {
        self.files.write_ftrace("trace", b"")
    }

    /// The kernel's own text rendering, for comparison against ours.
    pub fn read_kernel_trace(&self) -> io::Result<Vec<u8>> {
        self.files.read_ftrace("trace")
    }

    pub fn enable_event(&self, etype: &EventType) -> io::Result<()> {
        self.files
            .write_ftrace(&format!("events/{}/enable", etype.path()), b"1")
    }

    pub fn disable_event(&self, etype: &EventType) -> io::Result<()> {
        self.files
            .write_ftrace(&format!("events/{}/enable", etype.path()), b"0")
    }

    /// Open one raw pipe per CPU. The capture stops when the `done` sender
    /// is dropped (or a reader hits end of stream); note that a reader
    /// blocked in a pipe read only notices once that read returns.
    pub fn prepare(&mut self, cpus: Cpu, done: Receiver<()>) -> Result<(), FtraceError> {
        for cpu in 0..cpus {
            let pipe = self
                .files
                .open_raw_pipe(&format!("per_cpu/cpu{cpu}/trace_pipe_raw"))?;
            self.pipes.push((cpu, pipe));
        }
        self.done = Some(done);
        Ok(())
    }

    /// Stream decoded events to `consumer`, one batch per page, until the
    /// done channel fires and the readers drain.
    pub fn capture<F>(&mut self, mut consumer: F) -> Result<(), FtraceError>
    where
        F: FnMut(Vec<Event>),
    {
        let done = self.done.take().ok_or(FtraceError::NotPrepared)?;
        let pipes = mem::take(&mut self.pipes);
        if pipes.is_empty() {
            return Ok(());
        }

        let (tx, rx) = bounded::<Vec<Event>>(pipes.len());
        let page_fmt = &self.page_fmt;
        let event_types = &self.event_types;
        let page_size = self.page_size;

        scope(|s| {
            for (cpu, mut pipe) in pipes {
                let tx = tx.clone();
                let done = done.clone();
                s.spawn(move |_| {
                    read_cpu_pipe(page_fmt, event_types, cpu, &mut *pipe, page_size, tx, done)
                });
            }
            drop(tx);

            loop {
                select! {
                    recv(done) -> _ => break,
                    recv(rx) -> events => match events {
                        Ok(events) => consumer(events),
                        Err(_) => break,
                    },
                }
            }
        })
        .expect("cpu reader thread panicked");

        Ok(())
    }

    /// Task name the text trace shows for a pid.
    pub fn task_name(&self, pid: Pid) -> &str {
        if pid == 0 {
            "<idle>"
        } else {
            self.comms.comm_of(pid).unwrap_or("<...>")
        }
    }

    /// Evaluate the event's print format against its record.
    pub fn format_event(&self, event: &Event) -> StdString {
        let env = EventEnv {
            event,
            symbols: &self.symbols,
        };
        event.etype.format(&env)
    }

    /// The canonical trace line, byte-identical to the kernel's `trace`
    /// file.
    pub fn render_line(&self, event: &Event) -> StdString {
        format!(
            "{:>16}-{:<5} [{:03}] {} {:>6}.{:06}: {}: {}",
            self.task_name(event.pid),
            event.pid,
            event.cpu,
            event.flag_chars(),
            event.seconds(),
            event.microseconds(),
            event.etype.name,
            self.format_event(event),
        )
    }
}

/// Evaluation context for one event: its record bytes plus the session's
/// symbol cache. Rendering takes the caches from [Ftrace] explicitly, so
/// events do not need a back-pointer to the session.
pub struct EventEnv<'a> {
    pub event: &'a Event,
    pub symbols: &'a SymCache,
}

impl EvalEnv for EventEnv<'_> {
    fn event_data(&self) -> Result<&[u8], EvalError> {
        Ok(self.event.record())
    }

    fn kernel_symbol(&self, addr: u64) -> Option<&str> {
        self.symbols.symbol(addr)
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is a pure query.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

fn read_cpu_pipe(
    page_fmt: &PageFmt,
    event_types: &BTreeMap<EventId, Arc<EventType>>,
    cpu: Cpu,
    pipe: &mut dyn Read,
    page_size: usize,
    tx: Sender<Vec<Event>>,
    done: Receiver<()>,
) {
    let mut buf = vec![0u8; page_size];
    loop {
        let n = match pipe.read(&mut buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("cpu{cpu}: raw pipe read failed: {err}");
                break;
            }
            Ok(0) => break,
            Ok(n) => n,
        };

        let (events, lazy_err) = match decode_page(page_fmt, event_types, cpu, &buf[..n]) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!("cpu{cpu}: dropping page: {err}");
                continue;
            }
        };
        if let Some(err) = lazy_err {
            warn!("cpu{cpu}: dropped event: {err}");
        }

        select! {
            recv(done) -> _ => break,
            send(tx, events) -> sent => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!("cpu{cpu}: reader finished");
}
