//! In-memory [`InotifyHandle`] that replays scripted reads.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::decoder::encode_record;
use crate::mask::Mask;
use crate::sys::InotifyHandle;
use crate::watch::WatchDescriptor;

#[derive(Default)]
struct Script {
    chunks: VecDeque<io::Result<Vec<u8>>>,
    watched: HashMap<PathBuf, i32>,
    denied: HashMap<PathBuf, i32>,
    adds: Vec<PathBuf>,
    fail_close: bool,
    next_wd: i32,
    removed: Vec<i32>,
    reads: usize,
    closes: usize,
    waker: Option<Waker>,
}

/// Handle whose reads return queued byte chunks, one chunk per read.
#[derive(Clone, Default)]
pub(crate) struct ScriptedHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the bytes the next read returns.
    pub(crate) fn push_chunk(&self, bytes: Vec<u8>) {
        let mut script = self.script.lock().unwrap();
        script.chunks.push_back(Ok(bytes));
        if let Some(waker) = script.waker.take() {
            waker.wake();
        }
    }

    /// Queue a failing read.
    pub(crate) fn push_error(&self, kind: io::ErrorKind) {
        let mut script = self.script.lock().unwrap();
        script.chunks.push_back(Err(io::Error::from(kind)));
        if let Some(waker) = script.waker.take() {
            waker.wake();
        }
    }

    /// Make every add_watch on `path` fail with `errno`.
    pub(crate) fn deny(&self, path: &Path, errno: i32) {
        self.script.lock().unwrap().denied.insert(path.to_path_buf(), errno);
    }

    /// Make the next close fail.
    pub(crate) fn fail_close(&self) {
        self.script.lock().unwrap().fail_close = true;
    }

    /// How many times add_watch was called for `path`.
    pub(crate) fn adds(&self, path: &Path) -> usize {
        self.script.lock().unwrap().adds.iter().filter(|p| *p == path).count()
    }

    pub(crate) fn reads(&self) -> usize {
        self.script.lock().unwrap().reads
    }

    pub(crate) fn closes(&self) -> usize {
        self.script.lock().unwrap().closes
    }

    pub(crate) fn removed(&self) -> Vec<i32> {
        self.script.lock().unwrap().removed.clone()
    }

    fn pop(&self, buf: &mut [u8]) -> Option<io::Result<usize>> {
        let mut script = self.script.lock().unwrap();
        let chunk = script.chunks.pop_front()?;
        script.reads += 1;
        Some(chunk.map(|bytes| {
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            n
        }))
    }
}

impl InotifyHandle for ScriptedHandle {
    fn add_watch(&self, path: &Path, _mask: Mask) -> io::Result<WatchDescriptor> {
        if !path.starts_with("/") {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        let mut script = self.script.lock().unwrap();
        script.adds.push(path.to_path_buf());
        if let Some(errno) = script.denied.get(path) {
            return Err(io::Error::from_raw_os_error(*errno));
        }
        if let Some(wd) = script.watched.get(path) {
            return Ok(WatchDescriptor::from_raw(*wd));
        }
        script.next_wd += 1;
        let wd = script.next_wd;
        script.watched.insert(path.to_path_buf(), wd);
        Ok(WatchDescriptor::from_raw(wd))
    }

    fn rm_watch(&self, wd: WatchDescriptor) -> io::Result<()> {
        let mut script = self.script.lock().unwrap();
        let before = script.watched.len();
        script.watched.retain(|_, v| *v != wd.as_raw());
        if script.watched.len() == before {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        script.removed.push(wd.as_raw());
        Ok(())
    }

    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        match self.pop(buf) {
            Some(result) => Poll::Ready(result),
            None => {
                self.script.lock().unwrap().waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    fn wait_readable(&self, _timeout: Option<Duration>) -> io::Result<bool> {
        Ok(!self.script.lock().unwrap().chunks.is_empty())
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.pop(buf)
            .unwrap_or_else(|| Err(io::Error::from(io::ErrorKind::WouldBlock)))
    }

    fn close(self) -> io::Result<()> {
        let mut script = self.script.lock().unwrap();
        script.closes += 1;
        if script.fail_close {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(())
    }
}

/// Bytes of one record with its name padded to a multiple of 16.
pub(crate) fn record(wd: i32, mask: Mask, cookie: u32, name: Option<&str>) -> Vec<u8> {
    match name {
        Some(name) => {
            let padded = (name.len() + 1).div_ceil(16) * 16;
            encode_record(wd, mask.bits(), cookie, name.as_bytes(), padded)
        }
        None => encode_record(wd, mask.bits(), cookie, b"", 0),
    }
}
