//! Keeping a watch on every directory of a tree.
//!
//! [`RecursiveWatcher`] installs a watch on each directory below a root and
//! then follows the event stream: new directories get watches (and their
//! contents are walked) before the event that revealed them is handed on, and
//! retired watches drop out of the registry on their IGNORED event. Only
//! events matching the caller's mask are returned.
//!
//! Known limits, inherent to inotify:
//! - A directory moved out of the root keeps its watches and keeps reporting
//!   events under its old path.
//! - Moves are reconciled as an entry appearing in the target directory, not
//!   by pairing cookies.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info, trace, warn};

use crate::config::RecursiveConfig;
use crate::error::{InotifyError, Result};
use crate::event::{Event, WatchRef};
use crate::mask::Mask;
use crate::source::EventSource;
use crate::sys::{Inotify, InotifyHandle};
use crate::walk::DirectoryWalker;
use crate::watch::Watch;

/// Flags that describe what happened, as opposed to how a watch behaves.
const REPORTABLE: Mask = Mask::ALL_EVENTS
    .union(Mask::UNMOUNT)
    .union(Mask::Q_OVERFLOW)
    .union(Mask::IGNORED);

/// Watches a directory tree and keeps the set of watches in step with it.
pub struct RecursiveWatcher<H: InotifyHandle = Inotify> {
    source: EventSource<H>,
    root: PathBuf,
    mask: Mask,
    synthesize_creates: bool,
    pending: VecDeque<Event>,
}

impl RecursiveWatcher<Inotify> {
    /// Create an inotify instance and watch the tree described by `config`.
    pub fn new(config: RecursiveConfig) -> Result<Self> {
        let source = EventSource::from_config(&config.inotify)?;
        Self::with_source(source, config)
    }
}

impl<H: InotifyHandle> RecursiveWatcher<H> {
    /// Watch the tree described by `config` using an existing source.
    ///
    /// Fails if the root itself cannot be watched. Directories below it that
    /// cannot be watched are logged and skipped.
    pub fn with_source(source: EventSource<H>, config: RecursiveConfig) -> Result<Self> {
        let mut watcher = Self {
            source,
            root: config.root,
            mask: config.mask,
            synthesize_creates: config.synthesize_creates,
            pending: VecDeque::new(),
        };

        let root = watcher.root.clone();
        let (top, _) = watcher.watch_directory(&root)?;
        watcher.install_below(&root, top, false);

        info!(
            "Watching {} directories under {}",
            watcher.source.registry().len(),
            root.display()
        );
        Ok(watcher)
    }

    /// Root of the watched tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Events the caller asked for.
    pub fn mask(&self) -> Mask {
        self.mask
    }

    /// The underlying source.
    pub fn source(&self) -> &EventSource<H> {
        &self.source
    }

    /// Paths of every directory currently watched.
    pub fn watched_directories(&self) -> BTreeSet<PathBuf> {
        self.source.registry().iter().map(|watch| watch.path()).collect()
    }

    /// Next event matching the caller's mask.
    ///
    /// Cancel safe, like [`EventSource::get`].
    pub async fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            let event = self.source.get().await?;
            self.process(event);
        }
    }

    /// Next matching event, or `None` if none arrives within `timeout`.
    pub async fn next_event_timeout(&mut self, timeout: Duration) -> Result<Option<Event>> {
        match tokio::time::timeout(timeout, self.next_event()).await {
            Ok(event) => event.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Close the underlying source.
    pub fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.source.close()
    }

    /// Turn the watcher into a stream of matching events that ends after
    /// the first error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Event>> {
        async_stream::try_stream! {
            loop {
                let event = self.next_event().await?;
                yield event;
            }
        }
    }

    fn watch_mask(&self) -> Mask {
        self.mask | Mask::TREE_MAINTENANCE
    }

    /// Handle one event from the source, queueing whatever the caller should see.
    fn process(&mut self, event: Event) {
        let mask = event.mask();
        let mut discovered = Vec::new();

        if mask.intersects(Mask::CREATE | Mask::MOVED_TO) {
            if let Some(path) = event.path().filter(|p| is_directory(p)) {
                discovered = self.install_subtree(&path);
            }
        }

        if mask.contains(Mask::IGNORED) {
            match event.watch() {
                Some(watch) => debug!("Stopped tracking {}", watch.path().display()),
                None => trace!("IGNORED for an already retired watch"),
            }
        }

        if mask.contains(Mask::Q_OVERFLOW) {
            warn!("Event queue overflowed; watched tree under {} may be incomplete", self.root.display());
        }

        if mask.intersects(self.mask & REPORTABLE) {
            self.pending.push_back(event);
        } else {
            trace!("Consumed bookkeeping event {event}");
        }

        if self.mask.contains(Mask::CREATE) {
            self.pending.extend(discovered);
        }
    }

    /// Watch `dir`. The flag is false when the inode was already watched, in
    /// which case the existing watch comes back with its path corrected.
    fn watch_directory(&mut self, dir: &Path) -> Result<(Arc<Watch>, bool)> {
        let mask = self.watch_mask() | Mask::ONLYDIR;
        let before = self.source.registry().len();
        let watch = self.source.add_watch(dir, mask)?;
        let fresh = self.source.registry().len() > before;
        if watch.path() != dir {
            debug!(
                "Watch {} moved from {} to {}",
                watch.wd(),
                watch.path().display(),
                dir.display()
            );
            watch.set_path(dir);
        }
        Ok((watch, fresh))
    }

    /// Watch a directory that just appeared and everything below it.
    ///
    /// Returns CREATE events for entries found inside directories that had no
    /// watch before, when synthesis is enabled.
    fn install_subtree(&mut self, top: &Path) -> Vec<Event> {
        match self.watch_directory(top) {
            Ok((watch, fresh)) => self.install_below(top, watch, fresh && self.synthesize_creates),
            Err(e) => {
                skip(top, &e);
                Vec::new()
            }
        }
    }

    /// Watch every directory strictly below `top`, which is already watched
    /// by `top_watch`.
    ///
    /// With `synthesize` set, entries inside newly watched directories are
    /// returned as CREATE events attributed to their parent's watch.
    /// Re-watched directories contribute nothing: their entries are not new.
    fn install_below(&mut self, top: &Path, top_watch: Arc<Watch>, synthesize: bool) -> Vec<Event> {
        let mut fresh: HashMap<PathBuf, Arc<Watch>> = HashMap::new();
        if synthesize {
            fresh.insert(top.to_path_buf(), top_watch);
        }
        let mut created = Vec::new();

        for entry in DirectoryWalker::new(top) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to list part of {}: {e}", top.display());
                    continue;
                }
            };
            if entry.depth == 0 {
                continue;
            }

            let parent = entry.path.parent().and_then(|p| fresh.get(p));
            if let (Some(parent), Some(name)) = (parent, entry.path.file_name()) {
                let mut flags = Mask::CREATE;
                flags.set(Mask::ISDIR, entry.is_dir);
                created.push(Event::new(
                    flags,
                    0,
                    Some(PathBuf::from(name)),
                    Some(WatchRef::Shared(Arc::downgrade(parent))),
                ));
            }

            if !entry.is_dir {
                continue;
            }
            match self.watch_directory(&entry.path) {
                Ok((watch, is_new)) => {
                    debug!("Watching {}", entry.path.display());
                    if synthesize && is_new {
                        fresh.insert(entry.path, watch);
                    }
                }
                Err(e) => skip(&entry.path, &e),
            }
        }

        created
    }
}

/// A directory below the root that cannot be watched is left unwatched.
fn skip(dir: &Path, e: &InotifyError) {
    if e.is_vanished() {
        debug!("{} vanished before it could be watched", dir.display());
    } else {
        warn!("Not watching {}: {e}", dir.display());
    }
}

fn is_directory(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.is_dir())
}
