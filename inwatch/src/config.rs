//! Configuration types for event sources and recursive watching.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::decoder::MAX_RECORD_SIZE;
use crate::mask::{InitFlags, Mask};

/// Configuration for an inotify event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InotifyConfig {
    /// Set close-on-exec on the descriptor.
    pub close_on_exec: bool,

    /// Request non-blocking mode. The descriptor ends up non-blocking either
    /// way, since readiness is awaited before every read.
    pub non_blocking: bool,

    /// How many maximum-size records one read can hold.
    pub cache_size: usize,
}

impl InotifyConfig {
    /// Default number of maximum-size records per read.
    pub const DEFAULT_CACHE_SIZE: usize = 10;

    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            close_on_exec: true,
            non_blocking: true,
            cache_size: Self::DEFAULT_CACHE_SIZE,
        }
    }

    /// Set the cache size.
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Keep the descriptor open across exec.
    pub fn inherit_on_exec(mut self) -> Self {
        self.close_on_exec = false;
        self
    }

    /// Drop the non-blocking request. Has no effect on how reads behave.
    pub fn blocking(mut self) -> Self {
        self.non_blocking = false;
        self
    }

    /// Flags passed when creating the instance.
    pub fn init_flags(&self) -> InitFlags {
        let mut flags = InitFlags::empty();
        flags.set(InitFlags::CLOEXEC, self.close_on_exec);
        flags.set(InitFlags::NONBLOCK, self.non_blocking);
        flags
    }

    /// Size of the read buffer.
    pub fn buffer_len(&self) -> usize {
        buffer_len(self.cache_size)
    }
}

impl Default for InotifyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Read buffer length for `cache_size` maximum-size records; never zero.
pub(crate) fn buffer_len(cache_size: usize) -> usize {
    cache_size.max(1) * MAX_RECORD_SIZE
}

/// Configuration for watching a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursiveConfig {
    /// Root of the tree.
    pub root: PathBuf,

    /// Events the caller wants to receive.
    pub mask: Mask,

    /// Settings for the underlying event source.
    #[serde(default)]
    pub inotify: InotifyConfig,

    /// Report entries found while installing watches on a new subtree as
    /// CREATE events.
    #[serde(default = "default_true")]
    pub synthesize_creates: bool,
}

fn default_true() -> bool {
    true
}

impl RecursiveConfig {
    /// Create a new recursive config.
    pub fn new(root: impl Into<PathBuf>, mask: Mask) -> Self {
        Self {
            root: root.into(),
            mask,
            inotify: InotifyConfig::default(),
            synthesize_creates: true,
        }
    }

    /// Set the event source configuration.
    pub fn with_inotify(mut self, inotify: InotifyConfig) -> Self {
        self.inotify = inotify;
        self
    }

    /// Only report events the kernel produced.
    pub fn without_synthesized_creates(mut self) -> Self {
        self.synthesize_creates = false;
        self
    }

    /// Mask installed on every directory: the caller's events plus the ones
    /// needed to keep the tree in sync.
    pub fn watch_mask(&self) -> Mask {
        self.mask | Mask::TREE_MAINTENANCE
    }
}
