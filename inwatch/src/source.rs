//! Event retrieval from an inotify handle.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use tracing::{debug, info, trace, warn};

use crate::config::{InotifyConfig, buffer_len};
use crate::decoder::RecordDecoder;
use crate::error::{InotifyError, Result};
use crate::event::Event;
use crate::mask::Mask;
use crate::sys::{Inotify, InotifyHandle};
use crate::watch::{Watch, WatchRegistry};

/// Reads, decodes and hands out inotify events one at a time.
///
/// One read may return many records. They are decoded together, attached to
/// their watches, and queued, so later calls are served without touching the
/// handle until the queue runs dry.
///
/// A source supports a single reader. Closing it while a retrieval future is
/// still pending elsewhere is the caller's responsibility to avoid: cancel or
/// drain that retrieval first.
pub struct EventSource<H: InotifyHandle = Inotify> {
    handle: Option<H>,
    registry: WatchRegistry,
    queue: VecDeque<Event>,
    buffer: Vec<u8>,
    cache_size: usize,
    failed: bool,
}

impl EventSource<Inotify> {
    /// Create a source with default settings.
    pub fn new() -> Result<Self> {
        Self::from_config(&InotifyConfig::default())
    }

    /// Create a source from a config.
    pub fn from_config(config: &InotifyConfig) -> Result<Self> {
        let handle = Inotify::init(config.init_flags()).map_err(InotifyError::Init)?;
        debug!("Created inotify instance with flags {:?}", config.init_flags());
        Ok(Self::with_handle(handle, config.cache_size))
    }
}

impl<H: InotifyHandle> EventSource<H> {
    /// Wrap an existing handle.
    pub fn with_handle(handle: H, cache_size: usize) -> Self {
        Self {
            handle: Some(handle),
            registry: WatchRegistry::new(),
            queue: VecDeque::new(),
            buffer: vec![0; buffer_len(cache_size)],
            cache_size,
            failed: false,
        }
    }

    /// Watch `path` for the events in `mask`.
    ///
    /// Watching an inode that already has a watch returns the existing
    /// [`Watch`] with its mask updated.
    pub fn add_watch(&mut self, path: impl AsRef<Path>, mask: Mask) -> Result<Arc<Watch>> {
        let path = path.as_ref();
        let handle = self.handle.as_ref().ok_or(InotifyError::Closed)?;
        let wd = handle
            .add_watch(path, mask)
            .map_err(|e| InotifyError::from_add_watch(path, e))?;
        Ok(self.registry.register(wd, path, mask))
    }

    /// Ask the kernel to drop a watch.
    ///
    /// The watch stays registered until its IGNORED event is read; that event
    /// carries the owning reference.
    pub fn rm_watch(&mut self, watch: &Watch) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(InotifyError::Closed)?;
        handle
            .rm_watch(watch.wd())
            .map_err(|source| InotifyError::RemoveWatch {
                wd: watch.wd(),
                source,
            })?;
        debug!("Requested removal of watch {} on {}", watch.wd(), watch.path().display());
        Ok(())
    }

    /// The active watches.
    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Maximum-size records per read.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Resize the read buffer. Takes effect on the next read.
    pub fn set_cache_size(&mut self, cache_size: usize) {
        self.cache_size = cache_size;
        self.buffer.resize(buffer_len(cache_size), 0);
    }

    /// Events decoded but not yet handed out.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether [`EventSource::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Next event, waiting as long as it takes.
    ///
    /// Cancel safe: dropping the future loses nothing, since bytes are only
    /// taken from the handle in the same poll that decodes and queues them.
    pub async fn get(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.pop()? {
                return Ok(event);
            }

            let handle = self.handle.as_ref().ok_or(InotifyError::Closed)?;
            let buffer = &mut self.buffer;
            let read = poll_fn(|cx| handle.poll_read(cx, &mut buffer[..])).await;
            let len = self.check_read(read)?;
            self.ingest(len)?;
        }
    }

    /// Next event, or `None` if nothing arrives within `timeout`.
    pub async fn get_timeout(&mut self, timeout: Duration) -> Result<Option<Event>> {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(event) => event.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Next event, blocking the current thread.
    ///
    /// With `timeout` set, returns `None` once it passes without an event;
    /// without one it waits indefinitely.
    pub fn blocking_get(&mut self, timeout: Option<Duration>) -> Result<Option<Event>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(event) = self.pop()? {
                return Ok(Some(event));
            }

            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) => Some(left),
                    None => return Ok(None),
                },
                None => None,
            };

            let handle = self.handle.as_ref().ok_or(InotifyError::Closed)?;
            let ready = handle.wait_readable(remaining);
            if !self.check_read(ready)? {
                return Ok(None);
            }

            let handle = self.handle.as_ref().ok_or(InotifyError::Closed)?;
            match handle.try_read(&mut self.buffer) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                read => {
                    let len = self.check_read(read)?;
                    self.ingest(len)?;
                }
            }
        }
    }

    /// Release the handle. Calling this again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let discarded = self.queue.len();
        self.queue.clear();
        handle.close().map_err(InotifyError::Io)?;
        info!("Closed inotify instance ({discarded} events discarded)");
        Ok(())
    }

    /// Turn the source into a stream that yields events until the first
    /// error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Event>> {
        async_stream::try_stream! {
            loop {
                let event = self.get().await?;
                yield event;
            }
        }
    }

    fn pop(&mut self) -> Result<Option<Event>> {
        if self.handle.is_none() {
            return Err(InotifyError::Closed);
        }
        if let Some(event) = self.queue.pop_front() {
            return Ok(Some(event));
        }
        if self.failed {
            return Err(InotifyError::Failed);
        }
        Ok(None)
    }

    fn check_read<T>(&mut self, read: io::Result<T>) -> Result<T> {
        read.map_err(|e| {
            warn!("Reading from inotify failed: {e}");
            self.failed = true;
            InotifyError::Read(e)
        })
    }

    /// Decode the first `len` bytes of the buffer into the queue.
    fn ingest(&mut self, len: usize) -> Result<()> {
        let before = self.queue.len();
        for record in RecordDecoder::new(&self.buffer[..len]) {
            match record {
                Ok(record) => self.queue.push_back(self.registry.attach(record)),
                Err(e) => {
                    warn!("Dropping inotify source after malformed record: {e}");
                    self.failed = true;
                    return Err(e.into());
                }
            }
        }
        trace!("Decoded {} events from {len} bytes", self.queue.len() - before);
        Ok(())
    }
}

impl<H: InotifyHandle> Drop for EventSource<H> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close inotify instance: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedHandle, record};
    use crate::watch::WatchDescriptor;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn source() -> (EventSource<ScriptedHandle>, ScriptedHandle) {
        let handle = ScriptedHandle::new();
        (EventSource::with_handle(handle.clone(), 4), handle)
    }

    #[tokio::test]
    async fn test_one_read_serves_many_events() {
        let (mut source, handle) = source();
        let watch = source.add_watch("/tmp/dir", Mask::CREATE).unwrap();
        let wd = watch.wd().as_raw();

        let mut chunk = record(wd, Mask::CREATE, 0, Some("a"));
        chunk.extend(record(wd, Mask::CREATE, 0, Some("b")));
        chunk.extend(record(wd, Mask::CREATE | Mask::ISDIR, 0, Some("c")));
        handle.push_chunk(chunk);

        let names: Vec<PathBuf> = vec![
            source.get().await.unwrap().path().unwrap(),
            source.get().await.unwrap().path().unwrap(),
            source.get().await.unwrap().path().unwrap(),
        ];

        assert_eq!(
            names,
            vec![
                PathBuf::from("/tmp/dir/a"),
                PathBuf::from("/tmp/dir/b"),
                PathBuf::from("/tmp/dir/c"),
            ]
        );
        assert_eq!(handle.reads(), 1);
        assert_eq!(source.pending(), 0);
    }

    #[tokio::test]
    async fn test_ignored_event_owns_removed_watch() {
        let (mut source, handle) = source();
        let watch = source.add_watch("/tmp/dir", Mask::CREATE).unwrap();
        let wd = watch.wd();

        source.rm_watch(&watch).unwrap();
        assert_eq!(handle.removed(), vec![wd.as_raw()]);
        assert!(source.registry().contains(wd));

        handle.push_chunk(record(wd.as_raw(), Mask::IGNORED, 0, None));
        let event = source.get().await.unwrap();

        assert!(event.owns_watch());
        assert!(source.registry().resolve(wd).is_none());
        assert!(Arc::ptr_eq(&event.watch().unwrap(), &watch));
    }

    #[tokio::test]
    async fn test_move_pair_shares_cookie() {
        let (mut source, handle) = source();
        let wd = source.add_watch("/tmp/dir", Mask::MOVE | Mask::CREATE).unwrap().wd().as_raw();

        let mut chunk = record(wd, Mask::MOVED_FROM, 77, Some("a"));
        chunk.extend(record(wd, Mask::CREATE, 0, Some("other")));
        chunk.extend(record(wd, Mask::MOVED_TO, 77, Some("b")));
        handle.push_chunk(chunk);

        let from = source.get().await.unwrap();
        let unrelated = source.get().await.unwrap();
        let to = source.get().await.unwrap();

        assert_eq!(from.cookie(), to.cookie());
        assert_ne!(from.cookie(), 0);
        assert_eq!(unrelated.cookie(), 0);
    }

    #[tokio::test]
    async fn test_timeout_returns_none() {
        let (mut source, _handle) = source();

        let start = Instant::now();
        let event = source.get_timeout(Duration::from_millis(50)).await.unwrap();

        assert!(event.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_zero_length_read_keeps_waiting() {
        let (mut source, handle) = source();
        handle.push_chunk(Vec::new());

        let event = source.get_timeout(Duration::from_millis(20)).await.unwrap();
        assert!(event.is_none());
        assert_eq!(handle.reads(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_get_keeps_source_usable() {
        let (mut source, handle) = source();

        assert!(source.get_timeout(Duration::from_millis(10)).await.unwrap().is_none());

        handle.push_chunk(record(-1, Mask::Q_OVERFLOW, 0, None));
        let event = source.get().await.unwrap();
        assert!(event.is_overflow());
        assert!(event.watch().is_none());
    }

    #[tokio::test]
    async fn test_decode_error_is_fatal() {
        let (mut source, handle) = source();
        let wd = source.add_watch("/tmp/dir", Mask::CREATE).unwrap().wd().as_raw();

        let mut chunk = record(wd, Mask::CREATE, 0, Some("ok"));
        chunk.extend_from_slice(&[0u8; 5]);
        handle.push_chunk(chunk);

        let err = source.get().await.unwrap_err();
        assert!(matches!(err, InotifyError::Decode(_)));

        // Records decoded before the bad one are still delivered.
        let event = source.get().await.unwrap();
        assert_eq!(event.name(), Some(Path::new("ok")));
        assert!(matches!(source.get().await, Err(InotifyError::Failed)));
    }

    #[tokio::test]
    async fn test_read_error_is_fatal() {
        let (mut source, handle) = source();
        handle.push_error(io::ErrorKind::PermissionDenied);
        handle.push_chunk(record(-1, Mask::Q_OVERFLOW, 0, None));

        assert!(matches!(source.get().await, Err(InotifyError::Read(_))));
        assert!(matches!(source.get().await, Err(InotifyError::Failed)));
        assert_eq!(handle.reads(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut source, handle) = source();
        handle.push_chunk(record(-1, Mask::Q_OVERFLOW, 0, None));

        source.close().unwrap();
        source.close().unwrap();
        drop(source);

        assert_eq!(handle.closes(), 1);
    }

    #[tokio::test]
    async fn test_failed_close_still_discards_queue() {
        let (mut source, handle) = source();
        let wd = source.add_watch("/tmp/dir", Mask::CREATE).unwrap().wd().as_raw();
        let mut chunk = record(wd, Mask::CREATE, 0, Some("a"));
        chunk.extend(record(wd, Mask::CREATE, 0, Some("b")));
        handle.push_chunk(chunk);
        source.get().await.unwrap();
        assert_eq!(source.pending(), 1);

        handle.fail_close();
        assert!(matches!(source.close(), Err(InotifyError::Io(_))));

        assert_eq!(source.pending(), 0);
        assert!(source.is_closed());
        assert!(matches!(source.get().await, Err(InotifyError::Closed)));
    }

    #[tokio::test]
    async fn test_retrieval_after_close_fails() {
        let (mut source, _handle) = source();
        source.close().unwrap();

        assert!(matches!(source.get().await, Err(InotifyError::Closed)));
        assert!(matches!(source.blocking_get(None), Err(InotifyError::Closed)));
        assert!(matches!(
            source.add_watch("/tmp", Mask::CREATE),
            Err(InotifyError::Closed)
        ));
    }

    #[test]
    fn test_blocking_get() {
        let (mut source, handle) = source();
        let wd = source.add_watch("/tmp/dir", Mask::MODIFY).unwrap().wd().as_raw();

        assert!(source.blocking_get(Some(Duration::ZERO)).unwrap().is_none());

        handle.push_chunk(record(wd, Mask::MODIFY, 0, Some("f")));
        let event = source.blocking_get(Some(Duration::from_millis(10))).unwrap().unwrap();
        assert_eq!(event.path(), Some(PathBuf::from("/tmp/dir/f")));
    }

    #[test]
    fn test_add_watch_error_is_classified() {
        let (mut source, _handle) = source();
        let err = source.add_watch("relative", Mask::CREATE).unwrap_err();
        assert!(matches!(err, InotifyError::NotFound { .. }));
        assert!(source.registry().is_empty());
    }

    #[test]
    fn test_same_inode_keeps_one_watch() {
        let (mut source, _handle) = source();
        let first = source.add_watch("/tmp/dir", Mask::CREATE).unwrap();
        let second = source.add_watch("/tmp/dir", Mask::DELETE).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.registry().len(), 1);
        assert_eq!(
            source.registry().get(WatchDescriptor::from_raw(1)).map(|w| w.mask()),
            Some(Mask::DELETE)
        );
    }

    #[test]
    fn test_set_cache_size_resizes_buffer() {
        let (mut source, _handle) = source();
        source.set_cache_size(2);
        assert_eq!(source.cache_size(), 2);
        assert_eq!(source.buffer.len(), buffer_len(2));
    }

    #[tokio::test]
    async fn test_into_stream() {
        use futures::StreamExt;

        let (source, handle) = source();
        handle.push_chunk(record(-1, Mask::Q_OVERFLOW, 0, None));
        handle.push_error(io::ErrorKind::Other);

        let stream = source.into_stream();
        tokio::pin!(stream);

        assert!(stream.next().await.unwrap().unwrap().is_overflow());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
