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

//! Ring-buffer page decoding.
//!
//! A page starts with the layout described by `events/header_page`: an
//! absolute timestamp base, a commit word whose low 30 bits are the payload
//! length, and the payload at the `data` offset. The payload is a sequence
//! of 4-byte-aligned entries, each with a 32-bit header holding a 5-bit
//! `type_len` and a 27-bit timestamp delta.

use core::fmt::Write as _;
use std::{collections::BTreeMap, string::String as StdString, sync::Arc};

use crate::header::{
    Abi, Cpu, EventField, EventId, EventType, HeaderError, Identifier, MemOffset, MemSize, Pid,
    Timestamp,
};

const TYPE_PADDING: u32 = 29;
const TYPE_TIME_EXTEND: u32 = 30;
const TYPE_TIME_STAMP: u32 = 31;

/// Errors while decoding a ring-buffer page.
///
/// [BufferError::UnknownEventId] and [BufferError::RecordTooShort] affect a
/// single record and are reported lazily; the others are structural and
/// abort the page.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BufferError {
    #[error("page header is malformed")]
    BadPageHeader,

    #[error("truncated entry header at offset {0:#x}")]
    TruncatedEntry(MemOffset),

    #[error("entry at offset {0:#x} overruns the page")]
    EntryOverrun(MemOffset),

    #[error("unknown event type id {0}")]
    UnknownEventId(EventId),

    #[error("record of {got} bytes is too short for event {name} ({need} bytes)")]
    RecordTooShort {
        name: Identifier,
        need: MemSize,
        got: MemSize,
    },
}

/// Field layout of a ring-buffer page, extracted from the `header_page`
/// meta-format.
#[derive(Debug, Clone)]
pub struct PageFmt {
    timestamp: Arc<EventField>,
    commit: Arc<EventField>,
    data_offset: MemOffset,
    abi: Abi,
}

impl PageFmt {
    pub fn new(header_page: &EventType) -> Result<PageFmt, HeaderError> {
        let field = |name: &'static str| {
            header_page
                .field_by_name(name)
                .cloned()
                .ok_or(HeaderError::MissingPageField(name))
        };
        Ok(PageFmt {
            timestamp: field("timestamp")?,
            commit: field("commit")?,
            data_offset: field("data")?.offset,
            abi: *header_page.abi(),
        })
    }
}

/// One decoded trace event.
///
/// The record bytes are owned so events can cross threads; field contents
/// are sliced back out of them on demand.
#[derive(Debug, Clone)]
pub struct Event {
    pub etype: Arc<EventType>,
    pub cpu: Cpu,
    /// Absolute timestamp in nanoseconds.
    pub when: Timestamp,
    pub pid: Pid,
    pub flags: u32,
    pub preempt: u32,
    record: Box<[u8]>,
}

const FLAG_IRQS_OFF: u32 = 0x1;
const FLAG_IRQS_NOSUPPORT: u32 = 0x2;
const FLAG_NEED_RESCHED: u32 = 0x4;
const FLAG_HARDIRQ: u32 = 0x8;
const FLAG_SOFTIRQ: u32 = 0x10;
const FLAG_PREEMPT_RESCHED: u32 = 0x20;

impl Event {
    /// Full record, including the common fields.
    #[inline]
    pub fn record(&self) -> &[u8] {
        &self.record
    }

    /// Bytes of the field at `index` in the event type's field list.
    pub fn field_bytes(&self, index: usize) -> Option<&[u8]> {
        let field = self.etype.fields().get(index)?;
        self.record.get(field.offset..field.offset + field.size)
    }

    #[inline]
    fn when_micros(&self) -> u64 {
        (self.when + 500) / 1000
    }

    pub fn seconds(&self) -> u64 {
        self.when_micros() / 1_000_000
    }

    pub fn microseconds(&self) -> u64 {
        self.when_micros() % 1_000_000
    }

    /// Order events from different CPUs into a single stream.
    #[inline]
    pub fn sort_key(&self) -> (Timestamp, Cpu) {
        (self.when, self.cpu)
    }

    /// The four-column latency flags of the text trace format: irqs-off,
    /// need-resched, irq context, preemption depth.
    pub fn flag_chars(&self) -> StdString {
        let flags = self.flags;
        let mut out = StdString::with_capacity(4);

        out.push(if flags & FLAG_IRQS_OFF != 0 {
            'd'
        } else if flags & FLAG_IRQS_NOSUPPORT != 0 {
            'X'
        } else {
            '.'
        });

        let need = flags & FLAG_NEED_RESCHED != 0;
        let lazy = flags & FLAG_PREEMPT_RESCHED != 0;
        out.push(match (need, lazy) {
            (true, true) => 'N',
            (true, false) => 'n',
            (false, true) => 'p',
            (false, false) => '.',
        });

        let hard = flags & FLAG_HARDIRQ != 0;
        let soft = flags & FLAG_SOFTIRQ != 0;
        out.push(match (hard, soft) {
            (true, true) => 'H',
            (true, false) => 'h',
            (false, true) => 's',
            (false, false) => '.',
        });

        if self.preempt == 0 {
            out.push('.');
        } else {
            let _ = write!(out, "{:x}", self.preempt);
        }

        out
    }
}

/// True when at least one event of the given type was decoded.
pub fn has_event_type(events: &[Event], etype: &Arc<EventType>) -> bool {
    events.iter().any(|event| Arc::ptr_eq(&event.etype, etype))
}

impl EventType {
    /// Build an [Event] from a raw record, extracting the well-known common
    /// fields.
    pub fn decode_event(
        self: &Arc<Self>,
        record: &[u8],
        cpu: Cpu,
        when: Timestamp,
    ) -> Result<Event, BufferError> {
        if record.len() < self.size() {
            return Err(BufferError::RecordTooShort {
                name: self.name.clone(),
                need: self.size(),
                got: record.len(),
            });
        }

        let abi = *self.abi();
        let mut event = Event {
            etype: Arc::clone(self),
            cpu,
            when,
            pid: 0,
            flags: 0,
            preempt: 0,
            record: record.into(),
        };

        let fields = self.fields();
        if let Some(i) = self.pid_field {
            if let Some(pid) = fields[i].read_i64(record, &abi) {
                event.pid = pid as Pid;
            }
        }
        if let Some(i) = self.flags_field {
            if let Some(flags) = fields[i].read_u64(record, &abi) {
                event.flags = flags as u32;
            }
        }
        if let Some(i) = self.preempt_field {
            if let Some(preempt) = fields[i].read_u64(record, &abi) {
                event.preempt = preempt as u32;
            }
        }

        Ok(event)
    }
}

fn read_u32(
    abi: &Abi,
    payload: &[u8],
    pos: &mut usize,
    entry_offset: MemOffset,
) -> Result<u32, BufferError> {
    let (_, x) = abi
        .parse_u32(&payload[*pos..])
        .map_err(|_| BufferError::TruncatedEntry(entry_offset))?;
    *pos += 4;
    Ok(x)
}

/// Decode one page worth of raw pipe bytes.
///
/// Returns the decoded events plus the last per-record error, if any:
/// unknown ids and short records drop the one record and decoding carries
/// on. Structural errors abort the whole page instead.
pub fn decode_page(
    page_fmt: &PageFmt,
    event_types: &BTreeMap<EventId, Arc<EventType>>,
    cpu: Cpu,
    data: &[u8],
) -> Result<(Vec<Event>, Option<BufferError>), BufferError> {
    let abi = &page_fmt.abi;
    let base = page_fmt
        .timestamp
        .read_u64(data, abi)
        .ok_or(BufferError::BadPageHeader)?;
    let commit = page_fmt
        .commit
        .read_u64(data, abi)
        .ok_or(BufferError::BadPageHeader)?;

    // The high bits of the commit word are status flags.
    let page_len = (commit & ((1 << 30) - 1)) as usize;
    let data_offset = page_fmt.data_offset;
    if data.len() < data_offset + page_len {
        return Err(BufferError::BadPageHeader);
    }
    let payload = &data[data_offset..data_offset + page_len];

    let mut events = Vec::with_capacity(16);
    let mut lazy_err = None;
    let mut when = base;
    let mut pos = 0;

    while pos < payload.len() {
        let entry_offset = data_offset + pos;
        let header = read_u32(abi, payload, &mut pos, entry_offset)?;
        let type_len = header & 0x1f;
        let delta = (header >> 5) as u64;

        match type_len {
            TYPE_PADDING => {
                // A zero delta means the rest of the page is padding.
                if delta == 0 {
                    break;
                }
                let len = read_u32(abi, payload, &mut pos, entry_offset)? as usize;
                // The length covers the entry header word holding it.
                pos = (pos + len.saturating_sub(4)).min(payload.len());
            }
            TYPE_TIME_EXTEND => {
                let ext = read_u32(abi, payload, &mut pos, entry_offset)? as u64;
                when += delta | (ext << 27);
            }
            TYPE_TIME_STAMP => {
                // Absolute timestamp, replacing the accumulated base but
                // keeping its most significant bits.
                let ext = read_u32(abi, payload, &mut pos, entry_offset)? as u64;
                let msb = when & (0xf8 << 56);
                when = msb | delta | (ext << 27);
            }
            _ => {
                when += delta;
                let len = if type_len == 0 {
                    // Extended length in the next word, which counts itself.
                    let total = read_u32(abi, payload, &mut pos, entry_offset)? as usize;
                    total.saturating_sub(4)
                } else {
                    type_len as usize * 4
                };
                if len < 2 || pos + len > payload.len() {
                    return Err(BufferError::EntryOverrun(entry_offset));
                }
                let record = &payload[pos..pos + len];
                pos = (pos + len + 3) & !3;

                let id = abi
                    .parse_u16(record)
                    .map_err(|_| BufferError::EntryOverrun(entry_offset))?
                    .1;
                let Some(etype) = event_types.get(&id) else {
                    lazy_err = Some(BufferError::UnknownEventId(id));
                    continue;
                };
                match etype.decode_event(record, cpu, when) {
                    Ok(event) => events.push(event),
                    Err(err) => lazy_err = Some(err),
                }
            }
        }
    }

    Ok((events, lazy_err))
}
