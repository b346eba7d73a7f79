//! Watches and the registry that owns them.
//!
//! The registry holds the only strong reference to every active [`Watch`].
//! Events normally receive a [`Weak`] reference. When a record signals that
//! the kernel has retired a watch (IGNORED, or the first event of a ONESHOT
//! watch), the strong reference moves out of the registry and into that one
//! event in a single step.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::debug;

use crate::decoder::RawRecord;
use crate::event::{Event, WatchRef};
use crate::mask::Mask;

/// Kernel-assigned watch identifier.
///
/// Unique among active watches, but the kernel may hand out the same value
/// again once a watch is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchDescriptor(pub(crate) i32);

impl WatchDescriptor {
    /// Descriptor carried by queue overflow events.
    pub const OVERFLOW: WatchDescriptor = WatchDescriptor(-1);

    /// Wrap a raw descriptor.
    pub fn from_raw(wd: i32) -> Self {
        Self(wd)
    }

    /// The raw descriptor value.
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A watch installed on one filesystem object.
pub struct Watch {
    wd: WatchDescriptor,
    path: RwLock<PathBuf>,
    mask: AtomicU32,
}

impl Watch {
    fn new(wd: WatchDescriptor, path: PathBuf, mask: Mask) -> Self {
        Self {
            wd,
            path: RwLock::new(path),
            mask: AtomicU32::new(mask.bits()),
        }
    }

    /// The kernel watch descriptor.
    pub fn wd(&self) -> WatchDescriptor {
        self.wd
    }

    /// Path the watch was added with, or the last path set with [`Watch::set_path`].
    ///
    /// The kernel watch follows the inode, so after the object is renamed
    /// this path is stale until someone updates it.
    pub fn path(&self) -> PathBuf {
        match self.path.read() {
            Ok(path) => path.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the recorded path.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        match self.path.write() {
            Ok(mut guard) => *guard = path,
            Err(poisoned) => *poisoned.into_inner() = path,
        }
    }

    /// Mask the watch was added with.
    pub fn mask(&self) -> Mask {
        Mask::from_bits_retain(self.mask.load(Ordering::Acquire))
    }

    fn update_mask(&self, mask: Mask) {
        let merged = if mask.contains(Mask::MASK_ADD) {
            self.mask() | mask
        } else {
            mask
        };
        self.mask.store(merged.bits(), Ordering::Release);
    }

    /// Whether the kernel retires this watch after its first event.
    pub fn is_oneshot(&self) -> bool {
        self.mask().contains(Mask::ONESHOT)
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("wd", &self.wd)
            .field("path", &self.path())
            .field("mask", &self.mask())
            .finish()
    }
}

/// Maps watch descriptors to the watches they belong to.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watches: HashMap<WatchDescriptor, Arc<Watch>>,
}

impl WatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a watch the kernel just handed back.
    ///
    /// Adding a watch on an already watched inode returns the existing
    /// descriptor; in that case the existing watch is kept and only its mask
    /// changes.
    pub fn register(&mut self, wd: WatchDescriptor, path: impl Into<PathBuf>, mask: Mask) -> Arc<Watch> {
        if let Some(existing) = self.watches.get(&wd) {
            existing.update_mask(mask);
            debug!("Updated mask of watch {wd} to {}", existing.mask());
            return Arc::clone(existing);
        }

        let watch = Arc::new(Watch::new(wd, path.into(), mask));
        debug!("Registered watch {wd} on {}", watch.path().display());
        self.watches.insert(wd, Arc::clone(&watch));
        watch
    }

    /// Non-owning reference to an active watch.
    pub fn resolve(&self, wd: WatchDescriptor) -> Option<Weak<Watch>> {
        self.watches.get(&wd).map(Arc::downgrade)
    }

    /// Remove a watch and hand back the owning reference.
    pub fn finalize_removal(&mut self, wd: WatchDescriptor) -> Option<Arc<Watch>> {
        let watch = self.watches.remove(&wd);
        if let Some(watch) = &watch {
            debug!("Watch {wd} on {} retired", watch.path().display());
        }
        watch
    }

    /// Turn a decoded record into an event, moving ownership of the watch
    /// into the event when the record retires it.
    pub fn attach(&mut self, record: RawRecord) -> Event {
        let wd = WatchDescriptor(record.wd);
        let mask = Mask::from_bits_retain(record.mask);

        let retires = match self.watches.get(&wd) {
            Some(watch) => mask.contains(Mask::IGNORED) || watch.is_oneshot(),
            None => false,
        };

        let watch = if retires {
            self.finalize_removal(wd).map(WatchRef::Owned)
        } else {
            self.resolve(wd).map(WatchRef::Shared)
        };

        Event::new(mask, record.cookie, record.name, watch)
    }

    /// Shared reference to an active watch.
    pub fn get(&self, wd: WatchDescriptor) -> Option<&Arc<Watch>> {
        self.watches.get(&wd)
    }

    /// Whether `wd` names an active watch.
    pub fn contains(&self, wd: WatchDescriptor) -> bool {
        self.watches.contains_key(&wd)
    }

    /// Find the active watch recorded for `path`.
    pub fn find_by_path(&self, path: &Path) -> Option<&Arc<Watch>> {
        self.watches.values().find(|watch| watch.path() == path)
    }

    /// Iterate over active watches in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Watch>> {
        self.watches.values()
    }

    /// Number of active watches.
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Whether no watches are active.
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}
