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

//! File access boundary.
//!
//! Everything the decoder needs from the traced machine goes through
//! [FileAccess]: ftrace control and format files, the raw per-CPU pipes and
//! a few proc files. [LocalFiles] talks to tracefs directly,
//! [RecordingFiles] additionally captures every read so a session can be
//! replayed later through [ReplayFiles], which is also the fixture back-end
//! for tests.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Cursor, Read},
    path::PathBuf,
    sync::{Arc, Mutex},
};

/// Default mount point of the ftrace control filesystem.
pub const TRACEFS_ROOT: &str = "/sys/kernel/debug/tracing";

const PROC_ROOT: &str = "/proc";

const PROC_WHITELIST: &[&str] = &["kallsyms"];

/// Access to the files of a traced machine.
///
/// Paths are relative to the ftrace directory (resp. `/proc`); back-ends
/// must reject anything escaping them.
pub trait FileAccess: Send + Sync {
    fn read_ftrace(&self, path: &str) -> io::Result<Vec<u8>>;
    fn write_ftrace(&self, path: &str, data: &[u8]) -> io::Result<()>;
    fn read_proc(&self, path: &str) -> io::Result<Vec<u8>>;
    /// Open a streaming raw pipe such as `per_cpu/cpu0/trace_pipe_raw`.
    fn open_raw_pipe(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// An ftrace path is confined to the tracing directory: relative, with no
/// `..` component.
pub fn safe_ftrace_path(path: &str) -> bool {
    !path.is_empty() && !path.starts_with('/') && path.split('/').all(|part| part != "..")
}

/// Proc files are served from a whitelist only.
pub fn safe_proc_path(path: &str) -> bool {
    PROC_WHITELIST.contains(&path)
}

fn unsafe_path(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("unsafe path {path:?}"))
}

fn not_recorded(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no recorded file {path:?}"))
}

/// Direct access to the local tracefs and procfs.
pub struct LocalFiles {
    root: PathBuf,
    proc_root: PathBuf,
}

impl LocalFiles {
    pub fn new() -> Self {
        Self::with_root(TRACEFS_ROOT)
    }

    /// Use another tracing directory, e.g. `/sys/kernel/tracing` on systems
    /// where tracefs is not mounted under debugfs.
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        LocalFiles {
            root: root.into(),
            proc_root: PROC_ROOT.into(),
        }
    }
}

impl Default for LocalFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl FileAccess for LocalFiles {
    fn read_ftrace(&self, path: &str) -> io::Result<Vec<u8>> {
        if !safe_ftrace_path(path) {
            return Err(unsafe_path(path));
        }
        fs::read(self.root.join(path))
    }

    fn write_ftrace(&self, path: &str, data: &[u8]) -> io::Result<()> {
        if !safe_ftrace_path(path) {
            return Err(unsafe_path(path));
        }
        fs::write(self.root.join(path), data)
    }

    fn read_proc(&self, path: &str) -> io::Result<Vec<u8>> {
        if !safe_proc_path(path) {
            return Err(unsafe_path(path));
        }
        fs::read(self.proc_root.join(path))
    }

    fn open_raw_pipe(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        if !safe_ftrace_path(path) {
            return Err(unsafe_path(path));
        }
        Ok(Box::new(fs::File::open(self.root.join(path))?))
    }
}

#[derive(Default)]
struct Recorded {
    ftrace: BTreeMap<String, Vec<u8>>,
    proc_files: BTreeMap<String, Vec<u8>>,
}

/// Wraps another back-end and captures everything read through it,
/// including the raw pipe streams, so the session can be replayed
/// elsewhere.
pub struct RecordingFiles {
    inner: Arc<dyn FileAccess>,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingFiles {
    pub fn new(inner: Arc<dyn FileAccess>) -> Self {
        RecordingFiles {
            inner,
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    /// Copy of everything captured so far, as a replay back-end.
    pub fn snapshot(&self) -> ReplayFiles {
        let recorded = self.recorded.lock().unwrap();
        ReplayFiles {
            ftrace: recorded.ftrace.clone(),
            proc_files: recorded.proc_files.clone(),
        }
    }
}

impl FileAccess for RecordingFiles {
    fn read_ftrace(&self, path: &str) -> io::Result<Vec<u8>> {
        let data = self.inner.read_ftrace(path)?;
        self.recorded
            .lock()
            .unwrap()
            .ftrace
            .insert(path.to_owned(), data.clone());
        Ok(data)
    }

    fn write_ftrace(&self, path: &str, data: &[u8]) -> io::Result<()> {
        self.inner.write_ftrace(path, data)
    }

    fn read_proc(&self, path: &str) -> io::Result<Vec<u8>> {
        let data = self.inner.read_proc(path)?;
        self.recorded
            .lock()
            .unwrap()
            .proc_files
            .insert(path.to_owned(), data.clone());
        Ok(data)
    }

    fn open_raw_pipe(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let inner = self.inner.open_raw_pipe(path)?;
        self.recorded
            .lock()
            .unwrap()
            .ftrace
            .entry(path.to_owned())
            .or_default();
        Ok(Box::new(RecordingReader {
            inner,
            path: path.to_owned(),
            recorded: Arc::clone(&self.recorded),
        }))
    }
}

struct RecordingReader {
    inner: Box<dyn Read + Send>,
    path: String,
    recorded: Arc<Mutex<Recorded>>,
}

impl Read for RecordingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.recorded
                .lock()
                .unwrap()
                .ftrace
                .entry(self.path.clone())
                .or_default()
                .extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }
}

/// Serves a recorded (or hand-written) set of files. Raw pipes yield the
/// captured bytes and then end of stream, which terminates a capture
/// cleanly.
#[derive(Default, Clone)]
pub struct ReplayFiles {
    ftrace: BTreeMap<String, Vec<u8>>,
    proc_files: BTreeMap<String, Vec<u8>>,
}

impl ReplayFiles {
    pub fn insert_ftrace<P: Into<String>>(&mut self, path: P, data: Vec<u8>) {
        self.ftrace.insert(path.into(), data);
    }

    pub fn insert_proc<P: Into<String>>(&mut self, path: P, data: Vec<u8>) {
        self.proc_files.insert(path.into(), data);
    }
}

impl FileAccess for ReplayFiles {
    fn read_ftrace(&self, path: &str) -> io::Result<Vec<u8>> {
        if !safe_ftrace_path(path) {
            return Err(unsafe_path(path));
        }
        self.ftrace.get(path).cloned().ok_or_else(|| not_recorded(path))
    }

    fn write_ftrace(&self, path: &str, _data: &[u8]) -> io::Result<()> {
        if !safe_ftrace_path(path) {
            return Err(unsafe_path(path));
        }
        Ok(())
    }

    fn read_proc(&self, path: &str) -> io::Result<Vec<u8>> {
        if !safe_proc_path(path) {
            return Err(unsafe_path(path));
        }
        self.proc_files
            .get(path)
            .cloned()
            .ok_or_else(|| not_recorded(path))
    }

    fn open_raw_pipe(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        if !safe_ftrace_path(path) {
            return Err(unsafe_path(path));
        }
        let data = self
            .ftrace
            .get(path)
            .cloned()
            .ok_or_else(|| not_recorded(path))?;
        Ok(Box::new(Cursor::new(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_safety_test() {
        assert!(safe_ftrace_path("tracing_on"));
        assert!(safe_ftrace_path("events/sched/sched_switch/format"));
        assert!(!safe_ftrace_path("../shadow"));
        assert!(!safe_ftrace_path("events/../../etc/passwd"));
        assert!(!safe_ftrace_path("/etc/passwd"));
        assert!(!safe_ftrace_path(""));

        assert!(safe_proc_path("kallsyms"));
        assert!(!safe_proc_path("self/mem"));
        assert!(!safe_proc_path("../kallsyms"));
    }

    #[test]
    fn replay_test() {
        let mut files = ReplayFiles::default();
        files.insert_ftrace("tracing_on", b"0\n".to_vec());
        assert_eq!(files.read_ftrace("tracing_on").unwrap(), b"0\n");
        assert!(files.read_ftrace("missing").is_err());
        assert!(files.read_ftrace("../evil").is_err());
        assert!(files.write_ftrace("tracing_on", b"1").is_ok());
    }

    #[test]
    fn recording_round_trip_test() {
        let mut source = ReplayFiles::default();
        source.insert_ftrace("events/header_page", b"fields\n".to_vec());
        source.insert_ftrace("per_cpu/cpu0/trace_pipe_raw", vec![1, 2, 3, 4]);
        source.insert_proc("kallsyms", b"0 T x\n".to_vec());

        let recording = RecordingFiles::new(Arc::new(source));
        recording.read_ftrace("events/header_page").unwrap();
        recording.read_proc("kallsyms").unwrap();
        let mut pipe = recording.open_raw_pipe("per_cpu/cpu0/trace_pipe_raw").unwrap();
        let mut buf = [0u8; 16];
        let n = pipe.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 4]);

        let replay = recording.snapshot();
        assert_eq!(replay.read_ftrace("events/header_page").unwrap(), b"fields\n");
        assert_eq!(replay.read_proc("kallsyms").unwrap(), b"0 T x\n");
        let mut pipe = replay.open_raw_pipe("per_cpu/cpu0/trace_pipe_raw").unwrap();
        let mut replayed = Vec::new();
        pipe.read_to_end(&mut replayed).unwrap();
        assert_eq!(replayed, vec![1, 2, 3, 4]);
    }
}
