//! Events decoded from the inotify stream.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::mask::Mask;
use crate::watch::Watch;

/// How an event refers to the watch that produced it.
#[derive(Debug)]
pub enum WatchRef {
    /// The registry still owns the watch.
    Shared(Weak<Watch>),

    /// The watch was retired by this event; the event is its last owner.
    Owned(Arc<Watch>),
}

/// One inotify event.
pub struct Event {
    mask: Mask,
    cookie: u32,
    name: Option<PathBuf>,
    watch: Option<WatchRef>,
}

impl Event {
    pub(crate) fn new(mask: Mask, cookie: u32, name: Option<PathBuf>, watch: Option<WatchRef>) -> Self {
        Self {
            mask,
            cookie,
            name,
            watch,
        }
    }

    /// Flags reported for this event.
    pub fn mask(&self) -> Mask {
        self.mask
    }

    /// Rename correlation cookie. Both halves of a rename share a non-zero
    /// cookie; every other event has 0.
    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    /// Name of the child the event is about, `None` when it concerns the
    /// watched object itself.
    pub fn name(&self) -> Option<&Path> {
        self.name.as_deref()
    }

    /// The watch that generated this event, if it is still reachable.
    ///
    /// Queue overflow events never have one. A shared reference stops
    /// resolving once the watch is retired and its owning event dropped.
    pub fn watch(&self) -> Option<Arc<Watch>> {
        match self.watch.as_ref()? {
            WatchRef::Shared(weak) => weak.upgrade(),
            WatchRef::Owned(watch) => Some(Arc::clone(watch)),
        }
    }

    /// Whether this event holds the last owning reference to its watch.
    pub fn owns_watch(&self) -> bool {
        matches!(self.watch, Some(WatchRef::Owned(_)))
    }

    /// Watch path joined with the event name.
    ///
    /// `None` if the watch is no longer reachable.
    pub fn path(&self) -> Option<PathBuf> {
        let watch = self.watch()?;
        let base = watch.path();
        Some(match &self.name {
            Some(name) => base.join(name),
            None => base,
        })
    }

    /// Whether every flag in `flags` is set on this event.
    pub fn contains(&self, flags: Mask) -> bool {
        self.mask.contains(flags)
    }

    /// Whether the subject of the event is a directory.
    pub fn is_dir(&self) -> bool {
        self.mask.contains(Mask::ISDIR)
    }

    /// Whether the kernel dropped events before this one.
    pub fn is_overflow(&self) -> bool {
        self.mask.contains(Mask::Q_OVERFLOW)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("mask", &self.mask)
            .field("cookie", &self.cookie)
            .field("watch", &self.watch())
            .field("owns_watch", &self.owns_watch())
            .finish()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Some(path) => write!(f, "{} {}", self.mask, path.display())?,
            None => write!(f, "{}", self.mask)?,
        }
        if self.cookie != 0 {
            write!(f, " (cookie {})", self.cookie)?;
        }
        Ok(())
    }
}
